//! External collaborator contracts: the LLM is the only collaborator this
//! crate doesn't define, since `codingbuddy-llm` owns that one.
//! `FileSystemService` and `Vcs` are defined here, plus concrete
//! implementations backed by direct `std::fs` and
//! `std::process::Command::new("git")` use. The applier never constructs one
//! of these — it only borrows `&dyn`.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Read/write/exists over a repo-rooted path space, plus enough to let the
/// Applier create parent directories for newly created files.
pub trait FileSystemService: Send + Sync {
    fn file_exists(&self, abs: &Path) -> bool;
    fn read_file(&self, abs: &Path) -> Result<Option<String>>;
    fn write_file(&self, abs: &Path, content: &str) -> Result<()>;
    fn ensure_dir(&self, abs: &Path) -> Result<()>;
    fn list_repo_files(&self) -> Result<Vec<String>>;
    fn vcs_root(&self) -> Option<PathBuf>;
}

/// Dirty check, stage, commit, branch/head introspection.
pub trait Vcs: Send + Sync {
    fn is_dirty(&self, rel: &str) -> Result<bool>;
    fn commit_all_tracked(&self, message: &str) -> Result<()>;
    fn commit_files(&self, paths: &[String], message: &str) -> Result<()>;
    fn head_sha(&self) -> Result<Option<String>>;
    fn current_branch(&self) -> Result<Option<String>>;
}

/// A plain `std::fs`-backed `FileSystemService` rooted at `workspace`.
pub struct LocalFileSystem {
    workspace: PathBuf,
}

impl LocalFileSystem {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl FileSystemService for LocalFileSystem {
    fn file_exists(&self, abs: &Path) -> bool {
        abs.is_file()
    }

    fn read_file(&self, abs: &Path) -> Result<Option<String>> {
        if !abs.exists() {
            return Ok(None);
        }
        Ok(Some(
            std::fs::read_to_string(abs).with_context(|| format!("reading {}", abs.display()))?,
        ))
    }

    fn write_file(&self, abs: &Path, content: &str) -> Result<()> {
        if let Some(parent) = abs.parent() {
            self.ensure_dir(parent)?;
        }
        std::fs::write(abs, content).with_context(|| format!("writing {}", abs.display()))
    }

    fn ensure_dir(&self, abs: &Path) -> Result<()> {
        std::fs::create_dir_all(abs).with_context(|| format!("creating {}", abs.display()))
    }

    fn list_repo_files(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        walk(&self.workspace, &self.workspace, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn vcs_root(&self) -> Option<PathBuf> {
        if self.workspace.join(".git").exists() {
            Some(self.workspace.clone())
        } else {
            None
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" || file_name == ".codingbuddy" {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// `git`-backed `Vcs`, shelling out via `std::process::Command` rather than
/// linking a git binding.
pub struct GitVcs {
    workspace: PathBuf,
}

impl GitVcs {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .output()
            .context("failed to execute git")?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Vcs for GitVcs {
    fn is_dirty(&self, rel: &str) -> Result<bool> {
        let out = self.git(&["status", "--porcelain", "--", rel])?;
        Ok(!out.trim().is_empty())
    }

    fn commit_all_tracked(&self, message: &str) -> Result<()> {
        self.git(&["add", "-u"])?;
        self.git(&["commit", "-m", message])?;
        Ok(())
    }

    fn commit_files(&self, paths: &[String], message: &str) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args)?;
        self.git(&["commit", "-m", message])?;
        Ok(())
    }

    fn head_sha(&self) -> Result<Option<String>> {
        match self.git(&["rev-parse", "HEAD"]) {
            Ok(sha) => Ok(Some(sha.trim().to_string())),
            Err(_) => Ok(None),
        }
    }

    fn current_branch(&self) -> Result<Option<String>> {
        match self.git(&["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(branch) => Ok(Some(branch.trim().to_string())),
            Err(_) => Ok(None),
        }
    }
}
