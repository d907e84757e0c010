//! Edit Applier: orchestrates matching over the target
//! file and, on failure, a bounded fallback over other in-chat files;
//! writes; optionally commits. The only stage besides `collab`'s concrete
//! implementations that touches the filesystem or VCS.

use crate::collab::{FileSystemService, Vcs};
use crate::matcher::apply_match;
use crate::EditBlock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Per-attempt applier options.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub auto_commit: bool,
    pub dry_run: bool,
    pub lenient_whitespace: bool,
    pub fallback_breadth: usize,
    pub dirty_commits: bool,
}

impl From<&codingbuddy_core::EditConfig> for ApplyOptions {
    fn from(cfg: &codingbuddy_core::EditConfig) -> Self {
        Self {
            auto_commit: cfg.auto_commit,
            dry_run: cfg.dry_run,
            lenient_whitespace: cfg.lenient_whitespace,
            fallback_breadth: cfg.fallback_breadth,
            dirty_commits: cfg.dirty_commits,
        }
    }
}

/// Outcome of applying one batch of validated blocks.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub applied_file_paths: BTreeSet<String>,
    pub failed_edits: Vec<EditBlock>,
    /// `Some(Ok(committed_paths))` / `Some(Err(cause))` when a commit was
    /// attempted; `None` when auto-commit was skipped entirely (disabled, a
    /// dry run, no VCS, or nothing survived the `dirty_commits` filter).
    pub commit_result: Option<Result<Vec<String>, String>>,
}

/// Applies `blocks` against `abs_fnames_in_chat` (the paths the model may
/// edit without asking), using `fs` to read/write and, if configured,
/// `vcs` to auto-commit afterwards. A block's failure is local — other
/// blocks proceed regardless.
///
/// `initially_dirty` is the snapshot the session controller took before its
/// first attempt: when `dirty_commits` is false, a file that was already
/// dirty at session entry is excluded from the auto-commit so pre-existing,
/// unrelated uncommitted work never gets bundled into this session's commit.
pub fn apply_blocks(
    blocks: &[EditBlock],
    abs_fnames_in_chat: &[PathBuf],
    fs: &dyn FileSystemService,
    vcs: Option<&dyn Vcs>,
    opts: &ApplyOptions,
    initially_dirty: &BTreeSet<String>,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for block in blocks {
        match apply_one_block(block, abs_fnames_in_chat, fs, opts) {
            Some(rel_path) => {
                outcome.applied_file_paths.insert(rel_path);
            }
            None => outcome.failed_edits.push(block.clone()),
        }
    }

    if opts.auto_commit && !opts.dry_run && !outcome.applied_file_paths.is_empty() {
        if let Some(vcs) = vcs {
            let paths: Vec<String> = if opts.dirty_commits {
                outcome.applied_file_paths.iter().cloned().collect()
            } else {
                outcome
                    .applied_file_paths
                    .iter()
                    .filter(|p| !initially_dirty.contains(*p))
                    .cloned()
                    .collect()
            };
            if !paths.is_empty() {
                outcome.commit_result = Some(
                    vcs.commit_files(&paths, "codingbuddy: apply edit blocks")
                        .map(|()| paths)
                        .map_err(|e| e.to_string()),
                );
            }
        }
    }

    outcome
}

/// Attempts the target file first, then falls back across
/// `abs_fnames_in_chat` (capped by `fallback_breadth`) on a match miss.
/// Returns the resolved relative path the edit actually landed in.
fn apply_one_block(
    block: &EditBlock,
    abs_fnames_in_chat: &[PathBuf],
    fs: &dyn FileSystemService,
    opts: &ApplyOptions,
) -> Option<String> {
    let target_abs = resolve_target_path(abs_fnames_in_chat, &block.file_path)
        .unwrap_or_else(|| PathBuf::from(&block.file_path));

    if let Some(new_content) = try_apply_at(&target_abs, block, fs, opts) {
        return write_result(&target_abs, &block.file_path, new_content, fs, opts);
    }

    for candidate in abs_fnames_in_chat.iter().take(opts.fallback_breadth) {
        if *candidate == target_abs {
            continue;
        }
        if let Some(new_content) = try_apply_at(candidate, block, fs, opts) {
            let rel = relative_label(candidate);
            return write_result(candidate, &rel, new_content, fs, opts);
        }
    }

    None
}

fn resolve_target_path(abs_fnames_in_chat: &[PathBuf], file_path: &str) -> Option<PathBuf> {
    abs_fnames_in_chat
        .iter()
        .find(|p| p.ends_with(file_path) || p.to_string_lossy().ends_with(file_path))
        .cloned()
}

fn try_apply_at(
    abs: &Path,
    block: &EditBlock,
    fs: &dyn FileSystemService,
    opts: &ApplyOptions,
) -> Option<String> {
    let whole = fs.read_file(abs).ok().flatten();
    apply_match(
        whole.as_deref(),
        &block.original_text,
        &block.updated_text,
        opts.lenient_whitespace,
    )
}

fn write_result(
    abs: &Path,
    rel_label: &str,
    content: String,
    fs: &dyn FileSystemService,
    opts: &ApplyOptions,
) -> Option<String> {
    if opts.dry_run {
        return Some(rel_label.to_string());
    }
    // A write I/O error converts the block to a failure with the *original*
    // filename, not the fallback target — the caller
    // only ever sees `None` here and reports against `block.file_path`.
    fs.write_file(abs, &content).ok()?;
    Some(rel_label.to_string())
}

fn relative_label(abs: &Path) -> String {
    abs.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeFs {
        files: RefCell<HashMap<PathBuf, String>>,
        fail_writes_to: RefCell<BTreeSet<PathBuf>>,
    }

    impl FakeFs {
        fn new() -> Self {
            Self {
                files: RefCell::new(HashMap::new()),
                fail_writes_to: RefCell::new(BTreeSet::new()),
            }
        }

        fn seed(&self, path: &Path, content: &str) {
            self.files.borrow_mut().insert(path.to_path_buf(), content.to_string());
        }

        fn fail_write(&self, path: &Path) {
            self.fail_writes_to.borrow_mut().insert(path.to_path_buf());
        }
    }

    impl FileSystemService for FakeFs {
        fn file_exists(&self, abs: &Path) -> bool {
            self.files.borrow().contains_key(abs)
        }

        fn read_file(&self, abs: &Path) -> anyhow::Result<Option<String>> {
            Ok(self.files.borrow().get(abs).cloned())
        }

        fn write_file(&self, abs: &Path, content: &str) -> anyhow::Result<()> {
            if self.fail_writes_to.borrow().contains(abs) {
                anyhow::bail!("simulated write failure");
            }
            self.files.borrow_mut().insert(abs.to_path_buf(), content.to_string());
            Ok(())
        }

        fn ensure_dir(&self, _abs: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn list_repo_files(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.files.borrow().keys().map(|p| p.to_string_lossy().to_string()).collect())
        }

        fn vcs_root(&self) -> Option<PathBuf> {
            None
        }
    }

    struct FakeVcs {
        committed: RefCell<Vec<Vec<String>>>,
        fail: bool,
    }

    impl FakeVcs {
        fn new() -> Self {
            Self {
                committed: RefCell::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                committed: RefCell::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl Vcs for FakeVcs {
        fn is_dirty(&self, _rel: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn commit_all_tracked(&self, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn commit_files(&self, paths: &[String], _message: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("simulated commit failure");
            }
            self.committed.borrow_mut().push(paths.to_vec());
            Ok(())
        }

        fn head_sha(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        fn current_branch(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    fn default_opts() -> ApplyOptions {
        ApplyOptions {
            auto_commit: false,
            dry_run: false,
            lenient_whitespace: true,
            fallback_breadth: 16,
            dirty_commits: true,
        }
    }

    fn no_dirty() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn block(path: &str, original: &str, updated: &str) -> EditBlock {
        EditBlock {
            file_path: path.to_string(),
            original_text: original.to_string(),
            updated_text: updated.to_string(),
        }
    }

    #[test]
    fn applies_exact_match_on_target_file() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target.clone()], &fs, None, &default_opts(), &no_dirty());
        assert!(outcome.failed_edits.is_empty());
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert_eq!(fs.read_file(&target).unwrap(), Some("Hello universe.\n".to_string()));
    }

    #[test]
    fn creates_new_file_from_empty_search() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/new.txt");
        let blocks = vec![block("new.txt", "", "This is new.\n")];
        let outcome = apply_blocks(&blocks, &[target.clone()], &fs, None, &default_opts(), &no_dirty());
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert_eq!(fs.read_file(&target).unwrap(), Some("This is new.\n".to_string()));
    }

    #[test]
    fn search_miss_reports_as_failed_edit() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Actual content.\n");
        let blocks = vec![block("a.txt", "NonExistent\n", "X\n")];
        let outcome = apply_blocks(&blocks, &[target.clone()], &fs, None, &default_opts(), &no_dirty());
        assert!(outcome.applied_file_paths.is_empty());
        assert_eq!(outcome.failed_edits.len(), 1);
    }

    #[test]
    fn falls_back_to_another_in_chat_file() {
        let fs = FakeFs::new();
        let original = PathBuf::from("/repo/original.txt");
        let fallback = PathBuf::from("/repo/fallback.txt");
        fs.seed(&original, "unrelated\n");
        fs.seed(&fallback, "Search this in fallback.\nMore lines.\n");

        let blocks = vec![block(
            "original.txt",
            "Search this in fallback.\n",
            "Replaced in fallback.\n",
        )];
        let outcome = apply_blocks(
            &blocks,
            &[original.clone(), fallback.clone()],
            &fs,
            None,
            &default_opts(),
            &no_dirty(),
        );
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert_eq!(fs.read_file(&original).unwrap(), Some("unrelated\n".to_string()));
        assert_eq!(
            fs.read_file(&fallback).unwrap(),
            Some("Replaced in fallback.\nMore lines.\n".to_string())
        );
    }

    #[test]
    fn write_failure_reports_original_filename_not_fallback() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        fs.fail_write(&target);
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target.clone()], &fs, None, &default_opts(), &no_dirty());
        assert_eq!(outcome.failed_edits.len(), 1);
        assert_eq!(outcome.failed_edits[0].file_path, "a.txt");
    }

    #[test]
    fn dry_run_never_writes_but_still_reports_success() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let mut opts = default_opts();
        opts.dry_run = true;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target.clone()], &fs, None, &opts, &no_dirty());
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert_eq!(fs.read_file(&target).unwrap(), Some("Hello world.\n".to_string()));
    }

    #[test]
    fn apply_options_derived_from_edit_config_match_its_fields() {
        let cfg = codingbuddy_core::EditConfig::default();
        let opts: ApplyOptions = (&cfg).into();
        assert_eq!(opts.auto_commit, cfg.auto_commit);
        assert_eq!(opts.dry_run, cfg.dry_run);
        assert_eq!(opts.lenient_whitespace, cfg.lenient_whitespace);
        assert_eq!(opts.fallback_breadth, cfg.fallback_breadth);
        assert_eq!(opts.dirty_commits, cfg.dirty_commits);
    }

    #[test]
    fn one_block_failure_does_not_block_others() {
        let fs = FakeFs::new();
        let a = PathBuf::from("/repo/a.txt");
        let b = PathBuf::from("/repo/b.txt");
        fs.seed(&a, "keep\n");
        fs.seed(&b, "Hello world.\n");
        let blocks = vec![
            block("a.txt", "NonExistent\n", "X\n"),
            block("b.txt", "Hello world.\n", "Hello universe.\n"),
        ];
        let outcome = apply_blocks(&blocks, &[a, b.clone()], &fs, None, &default_opts(), &no_dirty());
        assert_eq!(outcome.failed_edits.len(), 1);
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert_eq!(fs.read_file(&b).unwrap(), Some("Hello universe.\n".to_string()));
    }

    #[test]
    fn auto_commit_includes_pre_existing_dirt_when_dirty_commits_enabled() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let vcs = FakeVcs::new();
        let mut opts = default_opts();
        opts.auto_commit = true;
        opts.dirty_commits = true;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let mut dirty = BTreeSet::new();
        dirty.insert("a.txt".to_string());
        let outcome = apply_blocks(&blocks, &[target], &fs, Some(&vcs), &opts, &dirty);
        let committed = vcs.committed.borrow();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0], vec!["a.txt".to_string()]);
        assert!(matches!(outcome.commit_result, Some(Ok(ref files)) if files == &vec!["a.txt".to_string()]));
    }

    #[test]
    fn auto_commit_excludes_pre_existing_dirt_when_dirty_commits_disabled() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let vcs = FakeVcs::new();
        let mut opts = default_opts();
        opts.auto_commit = true;
        opts.dirty_commits = false;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let mut dirty = BTreeSet::new();
        dirty.insert("a.txt".to_string());
        let outcome = apply_blocks(&blocks, &[target], &fs, Some(&vcs), &opts, &dirty);
        assert!(vcs.committed.borrow().is_empty());
        assert!(outcome.commit_result.is_none());
    }

    #[test]
    fn auto_commit_commits_clean_file_even_when_dirty_commits_disabled() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let vcs = FakeVcs::new();
        let mut opts = default_opts();
        opts.auto_commit = true;
        opts.dirty_commits = false;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target], &fs, Some(&vcs), &opts, &no_dirty());
        assert_eq!(vcs.committed.borrow().len(), 1);
        assert!(matches!(outcome.commit_result, Some(Ok(_))));
    }

    #[test]
    fn auto_commit_failure_is_captured_not_swallowed() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let vcs = FakeVcs::failing();
        let mut opts = default_opts();
        opts.auto_commit = true;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target], &fs, Some(&vcs), &opts, &no_dirty());
        assert_eq!(outcome.applied_file_paths.len(), 1);
        assert!(matches!(outcome.commit_result, Some(Err(_))));
    }

    #[test]
    fn dry_run_never_commits_even_with_auto_commit_enabled() {
        let fs = FakeFs::new();
        let target = PathBuf::from("/repo/a.txt");
        fs.seed(&target, "Hello world.\n");
        let vcs = FakeVcs::new();
        let mut opts = default_opts();
        opts.auto_commit = true;
        opts.dry_run = true;
        let blocks = vec![block("a.txt", "Hello world.\n", "Hello universe.\n")];
        let outcome = apply_blocks(&blocks, &[target], &fs, Some(&vcs), &opts, &no_dirty());
        assert!(vcs.committed.borrow().is_empty());
        assert!(outcome.commit_result.is_none());
    }
}
