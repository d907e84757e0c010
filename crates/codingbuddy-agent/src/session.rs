//! Session & Retry Controller: drives one edit request
//! to completion across ≤`max_attempts` attempts, expressed as an explicit
//! state machine (`Init → Asking → Parsing → Validating → Applying →
//! {Done|Reflecting}`) rather than nested callbacks,
//! owned as a mutable aggregate rather than module-wide globals.

use crate::prompt::{self, PromptRequest};
use crate::templates::PromptFlags;
use codingbuddy_core::{CancellationToken, ChatMessage, EditConfig, EditEvent, EventEnvelope};
use codingbuddy_diff::applier::{self, ApplyOptions};
use codingbuddy_diff::collab::{FileSystemService, Vcs};
use codingbuddy_diff::reflection::build_report;
use codingbuddy_diff::validator::{self, ValidatorContext};
use codingbuddy_diff::{EditBlock, EditFormat, Fence};
use codingbuddy_errors::EditEngineError;
use codingbuddy_llm::{GenerateOptions, LlmClient};
use codingbuddy_observe::Observer;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The unit of work for one user request.
#[derive(Debug)]
pub struct EditSession {
    pub id: Uuid,
    pub working_dir: PathBuf,
    pub attempt: u32,
    pub llm_request: String,
    pub llm_response: Option<String>,
    pub parsed_blocks: Vec<EditBlock>,
    pub validated_blocks: Vec<EditBlock>,
    pub applied_files: BTreeSet<String>,
    pub reflection_messages: Vec<String>,
    pub abs_fnames_in_chat: Vec<PathBuf>,
    pub initially_dirty_files: BTreeSet<String>,
}

impl EditSession {
    pub fn new(working_dir: PathBuf, llm_request: impl Into<String>, abs_fnames_in_chat: Vec<PathBuf>) -> Self {
        Self {
            id: Uuid::now_v7(),
            working_dir,
            attempt: 0,
            llm_request: llm_request.into(),
            llm_response: None,
            parsed_blocks: Vec::new(),
            validated_blocks: Vec::new(),
            applied_files: BTreeSet::new(),
            reflection_messages: Vec::new(),
            abs_fnames_in_chat,
            initially_dirty_files: BTreeSet::new(),
        }
    }
}

fn edit_format_from_config(config: &EditConfig) -> EditFormat {
    match config.edit_format.as_str() {
        "diff_fenced" => EditFormat::DiffFenced,
        "whole" => EditFormat::Whole,
        "architect" => EditFormat::Architect,
        _ => EditFormat::Diff,
    }
}

pub struct SessionController<'a> {
    llm: &'a dyn LlmClient,
    fs: &'a dyn FileSystemService,
    vcs: Option<&'a dyn Vcs>,
    observer: Option<&'a Observer>,
    config: EditConfig,
    cancellation: CancellationToken,
    seq_no: u64,
}

impl<'a> SessionController<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        fs: &'a dyn FileSystemService,
        vcs: Option<&'a dyn Vcs>,
        observer: Option<&'a Observer>,
        config: EditConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            llm,
            fs,
            vcs,
            observer,
            config,
            cancellation,
            seq_no: 0,
        }
    }

    fn emit(&mut self, session_id: Uuid, kind: EditEvent) {
        let Some(observer) = self.observer else {
            return;
        };
        let envelope = EventEnvelope {
            seq_no: self.seq_no,
            at: chrono::Utc::now(),
            session_id,
            kind,
        };
        self.seq_no += 1;
        let _ = observer.record_event(&envelope);
    }

    /// Drives `session` through `Asking → Parsing → Validating → Applying →
    /// {Done|Reflecting}` until success, attempt exhaustion, or
    /// cancellation. Returns the set of relative paths edited on success.
    pub fn run_to_completion(
        &mut self,
        session: &mut EditSession,
    ) -> Result<BTreeSet<String>, EditEngineError> {
        session.initially_dirty_files = self.snapshot_dirty(session);
        self.emit(
            session.id,
            EditEvent::SessionStarted {
                attempt_max: self.config.max_attempts,
            },
        );

        let mut next_request = session.llm_request.clone();

        loop {
            if self.cancellation.is_cancelled() {
                return Err(EditEngineError::Cancelled);
            }

            session.attempt += 1;
            self.emit(
                session.id,
                EditEvent::AttemptStarted {
                    attempt: session.attempt,
                },
            );

            let messages = self.build_messages(session, &next_request);
            let response = self
                .llm
                .generate(&messages, &GenerateOptions::default())
                .map_err(|e| EditEngineError::LlmError { cause: e.to_string() })?;
            session.llm_response = Some(response.text.clone());

            let dialect = edit_format_from_config(&self.config).parses_as();
            let outcome = codingbuddy_diff::parser::parse(&response.text, dialect);
            self.emit(
                session.id,
                EditEvent::BlocksParsed {
                    count: outcome.blocks.len(),
                },
            );
            session.parsed_blocks = outcome.blocks.clone();

            if outcome.blocks.is_empty() {
                if let Some(result) = self.exhaust_or_reflect(
                    session,
                    "No SEARCH/REPLACE blocks were found in the response. Resend the \
                     edit as SEARCH/REPLACE blocks."
                        .to_string(),
                    &mut next_request,
                ) {
                    return result;
                }
                continue;
            }

            let (validated, failed_validation) = self.run_validation(session, &outcome.blocks);
            session.validated_blocks = validated.clone();

            if !failed_validation.is_empty() && validated.is_empty() {
                let report = format!(
                    "All {} proposed block(s) failed validation:\n{}",
                    failed_validation.len(),
                    failed_validation
                        .iter()
                        .map(|(b, issues)| format!(
                            "- {}: {}",
                            b.file_path,
                            issues
                                .iter()
                                .map(|i| i.reason.clone())
                                .collect::<Vec<_>>()
                                .join("; ")
                        ))
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                if let Some(result) = self.exhaust_or_reflect(session, report, &mut next_request) {
                    return result;
                }
                continue;
            }

            let opts = ApplyOptions::from(&self.config);
            let apply_outcome = applier::apply_blocks(
                &validated,
                &session.abs_fnames_in_chat,
                self.fs,
                self.vcs,
                &opts,
                &session.initially_dirty_files,
            );

            match &apply_outcome.commit_result {
                Some(Ok(files)) => self.emit(
                    session.id,
                    EditEvent::CommitSucceeded {
                        files: files.clone(),
                    },
                ),
                Some(Err(cause)) => self.emit(
                    session.id,
                    EditEvent::CommitFailed {
                        cause: cause.clone(),
                    },
                ),
                None => {}
            }

            for file in &apply_outcome.applied_file_paths {
                session.applied_files.insert(file.clone());
                self.emit(session.id, EditEvent::BlockApplied { file: file.clone() });
            }
            for block in &apply_outcome.failed_edits {
                self.emit(
                    session.id,
                    EditEvent::BlockFailed {
                        file: block.file_path.clone(),
                        reason: "SearchReplaceNoExactMatch".to_string(),
                    },
                );
            }

            let all_failed: Vec<(EditBlock, String)> = apply_outcome
                .failed_edits
                .iter()
                .cloned()
                .map(|b| (b, "SearchReplaceNoExactMatch".to_string()))
                .chain(failed_validation.iter().map(|(b, issues)| {
                    let reason = issues
                        .iter()
                        .map(|i| i.reason.clone())
                        .collect::<Vec<_>>()
                        .join("; ");
                    (b.clone(), reason)
                }))
                .collect();

            if all_failed.is_empty() {
                self.emit(
                    session.id,
                    EditEvent::SessionCompleted {
                        applied_files: session.applied_files.iter().cloned().collect(),
                    },
                );
                return Ok(session.applied_files.clone());
            }

            let passed: Vec<String> = session.applied_files.iter().cloned().collect();
            let working_dir = session.working_dir.clone();
            let report = build_report(&all_failed, &passed, &|file| {
                self.fs.read_file(&working_dir.join(file)).ok().flatten()
            });

            if let Some(result) = self.exhaust_or_reflect(session, report, &mut next_request) {
                return result;
            }
        }
    }

    /// Common tail of every reflectable failure path: either terminate with
    /// `AttemptsExhausted` (returning the report as part of the error's
    /// paired reflection history) or record the report and loop back to
    /// `Asking`. Returns `Some(result)` when the caller should return
    /// immediately, `None` when it should `continue` the outer loop.
    fn exhaust_or_reflect(
        &mut self,
        session: &mut EditSession,
        report: String,
        next_request: &mut String,
    ) -> Option<Result<BTreeSet<String>, EditEngineError>> {
        session.reflection_messages.push(report.clone());
        self.emit(
            session.id,
            EditEvent::ReflectionEmitted {
                failed_count: session.parsed_blocks.len().saturating_sub(session.applied_files.len()),
                applied_count: session.applied_files.len(),
            },
        );

        if session.attempt >= self.config.max_attempts {
            self.emit(
                session.id,
                EditEvent::SessionFailed {
                    attempts_used: session.attempt,
                },
            );
            return Some(Err(EditEngineError::AttemptsExhausted {
                attempts: session.attempt,
            }));
        }

        *next_request = report;
        None
    }

    fn run_validation(
        &self,
        session: &EditSession,
        blocks: &[EditBlock],
    ) -> (Vec<EditBlock>, Vec<(EditBlock, Vec<codingbuddy_errors::ValidationIssue>)>) {
        let repo_files = self.fs.list_repo_files().unwrap_or_default();
        let pipeline = validator::default_pipeline();
        let mut validated = Vec::new();
        let mut rejected = Vec::new();

        for block in blocks {
            let abs = session.working_dir.join(&block.file_path);
            let current_content = self.fs.read_file(&abs).ok().flatten();
            let ctx = ValidatorContext {
                repo_files: &repo_files,
                current_content: current_content.as_deref(),
                similar_file_enabled: self.config.similar_file_enabled,
                similar_file_threshold: self.config.similar_file_threshold,
                duplicate_code_enabled: self.config.duplicate_code_enabled,
                duplicate_code_threshold: self.config.duplicate_code_threshold,
            };
            let issues = validator::validate(block, &ctx, &pipeline);
            if issues.is_empty() {
                validated.push(block.clone());
            } else {
                rejected.push((block.clone(), issues));
            }
        }

        (validated, rejected)
    }

    fn build_messages(&self, session: &EditSession, request_text: &str) -> Vec<ChatMessage> {
        let edit_format = edit_format_from_config(&self.config);
        let fence = Fence {
            open: self.config.fence_open.clone(),
            close: self.config.fence_close.clone(),
        };
        let in_chat: Vec<String> = session
            .abs_fnames_in_chat
            .iter()
            .map(|p| relative_or_display(&session.working_dir, p))
            .collect();
        let flags = PromptFlags {
            suggest_shell: self.config.suggest_shell_commands,
            lazy: false,
            overeager: false,
        };
        let prompt_request = PromptRequest {
            user_request: request_text,
            in_chat_files: &in_chat,
            read_only_files: &[],
            repo_map: None,
            edit_format,
            fence: &fence,
            language: "unspecified",
            platform: std::env::consts::OS,
            flags,
        };

        match prompt::assemble(&prompt_request) {
            Ok(messages) => messages,
            // Placeholder assembly should never fail for a well-formed
            // config; fall back to a minimal valid sequence rather than
            // panicking the session loop.
            Err(_) => vec![ChatMessage::User {
                content: request_text.to_string(),
            }],
        }
    }

    fn snapshot_dirty(&self, session: &EditSession) -> BTreeSet<String> {
        let Some(vcs) = self.vcs else {
            return BTreeSet::new();
        };
        session
            .abs_fnames_in_chat
            .iter()
            .filter_map(|abs| {
                let rel = relative_or_display(&session.working_dir, abs);
                match vcs.is_dirty(&rel) {
                    Ok(true) => Some(rel),
                    _ => None,
                }
            })
            .collect()
    }
}

fn relative_or_display(working_dir: &Path, abs: &Path) -> String {
    abs.strip_prefix(working_dir)
        .unwrap_or(abs)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use codingbuddy_core::TelemetryConfig;
    use codingbuddy_llm::GenerateResponse;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct ScriptedLlm {
        responses: RefCell<Vec<String>>,
    }

    impl LlmClient for ScriptedLlm {
        fn generate(
            &self,
            _messages: &[ChatMessage],
            _opts: &GenerateOptions,
        ) -> anyhow::Result<GenerateResponse> {
            let text = self.responses.borrow_mut().remove(0);
            Ok(GenerateResponse {
                text,
                usage: Default::default(),
            })
        }
    }

    struct FakeFs {
        files: RefCell<HashMap<PathBuf, String>>,
    }

    impl FakeFs {
        fn new() -> Self {
            Self {
                files: RefCell::new(HashMap::new()),
            }
        }

        fn seed(&self, path: &Path, content: &str) {
            self.files.borrow_mut().insert(path.to_path_buf(), content.to_string());
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
            self.files.borrow_mut().insert(abs.to_path_buf(), content.to_string());
            Ok(())
        }

        fn ensure_dir(&self, _abs: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn list_repo_files(&self) -> anyhow::Result<Vec<String>> {
            Ok(self
                .files
                .borrow()
                .keys()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                .collect())
        }

        fn vcs_root(&self) -> Option<PathBuf> {
            None
        }
    }

    fn observer_for(workspace: &Path) -> Observer {
        Observer::new(workspace, &TelemetryConfig::default()).unwrap()
    }

    #[test]
    fn successful_first_attempt_reaches_done_with_applied_files() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let target = workspace.join("a.txt");
        fs.seed(&target, "Hello world.\n");

        let llm = ScriptedLlm {
            responses: RefCell::new(vec![
                "a.txt\n````\n<<<<<<< SEARCH\nHello world.\n=======\nHello universe.\n>>>>>>> REPLACE\n````\n".to_string(),
            ]),
        };
        let observer = observer_for(&workspace);
        let mut controller = SessionController::new(
            &llm,
            &fs,
            None,
            Some(&observer),
            EditConfig {
                auto_commit: false,
                ..EditConfig::default()
            },
            CancellationToken::new(),
        );
        let mut session = EditSession::new(workspace.clone(), "please fix the greeting", vec![target.clone()]);

        let applied = controller.run_to_completion(&mut session).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            fs.read_file(&target).unwrap(),
            Some("Hello universe.\n".to_string())
        );
        assert_eq!(session.attempt, 1);
        assert!(session.reflection_messages.is_empty());
    }

    #[test]
    fn search_miss_triggers_reflection_then_succeeds_on_retry() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let target = workspace.join("a.txt");
        fs.seed(&target, "Actual content.\n");

        let llm = ScriptedLlm {
            responses: RefCell::new(vec![
                "a.txt\n````\n<<<<<<< SEARCH\nNonExistent\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
                "a.txt\n````\n<<<<<<< SEARCH\nActual content.\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
            ]),
        };
        let mut controller = SessionController::new(
            &llm,
            &fs,
            None,
            None,
            EditConfig {
                auto_commit: false,
                max_attempts: 3,
                ..EditConfig::default()
            },
            CancellationToken::new(),
        );
        let mut session = EditSession::new(workspace.clone(), "fix it", vec![target.clone()]);

        let applied = controller.run_to_completion(&mut session).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(session.attempt, 2);
        assert_eq!(session.reflection_messages.len(), 1);
        assert!(session.reflection_messages[0].contains("a.txt"));
    }

    #[test]
    fn attempts_exhausted_returns_terminal_error() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let target = workspace.join("a.txt");
        fs.seed(&target, "Actual content.\n");

        let llm = ScriptedLlm {
            responses: RefCell::new(vec![
                "a.txt\n````\n<<<<<<< SEARCH\nNonExistent\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
                "a.txt\n````\n<<<<<<< SEARCH\nNonExistent\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
            ]),
        };
        let mut controller = SessionController::new(
            &llm,
            &fs,
            None,
            None,
            EditConfig {
                auto_commit: false,
                max_attempts: 2,
                ..EditConfig::default()
            },
            CancellationToken::new(),
        );
        let mut session = EditSession::new(workspace.clone(), "fix it", vec![target.clone()]);

        let result = controller.run_to_completion(&mut session);
        assert!(matches!(result, Err(EditEngineError::AttemptsExhausted { attempts: 2 })));
        assert_eq!(session.attempt, 2);
    }

    #[test]
    fn cancellation_observed_before_first_attempt() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let llm = ScriptedLlm {
            responses: RefCell::new(vec!["irrelevant".to_string()]),
        };
        let token = CancellationToken::new();
        token.cancel();
        let mut controller = SessionController::new(&llm, &fs, None, None, EditConfig::default(), token);
        let mut session = EditSession::new(workspace.clone(), "fix it", vec![]);

        let result = controller.run_to_completion(&mut session);
        assert!(matches!(result, Err(EditEngineError::Cancelled)));
        assert_eq!(session.attempt, 0);
    }

    #[test]
    fn applied_files_monotonic_and_reflection_count_matches_attempts() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let target = workspace.join("a.txt");
        fs.seed(&target, "Actual content.\n");

        let llm = ScriptedLlm {
            responses: RefCell::new(vec![
                "a.txt\n````\n<<<<<<< SEARCH\nNonExistent\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
                "a.txt\n````\n<<<<<<< SEARCH\nActual content.\n=======\nX\n>>>>>>> REPLACE\n````\n".to_string(),
            ]),
        };
        let mut controller = SessionController::new(
            &llm,
            &fs,
            None,
            None,
            EditConfig {
                auto_commit: false,
                max_attempts: 3,
                ..EditConfig::default()
            },
            CancellationToken::new(),
        );
        let mut session = EditSession::new(workspace.clone(), "fix it", vec![target.clone()]);
        controller.run_to_completion(&mut session).unwrap();

        assert_eq!(session.reflection_messages.len(), session.attempt as usize - 1);
    }

    struct FakeVcs {
        committed: RefCell<Vec<Vec<String>>>,
    }

    impl FakeVcs {
        fn new() -> Self {
            Self {
                committed: RefCell::new(Vec::new()),
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

    #[test]
    fn auto_commit_success_commits_applied_files_through_vcs() {
        let workspace_dir = tempfile::TempDir::new().unwrap();
        let workspace = workspace_dir.path().to_path_buf();
        let fs = FakeFs::new();
        let target = workspace.join("a.txt");
        fs.seed(&target, "Hello world.\n");

        let llm = ScriptedLlm {
            responses: RefCell::new(vec![
                "a.txt\n````\n<<<<<<< SEARCH\nHello world.\n=======\nHello universe.\n>>>>>>> REPLACE\n````\n".to_string(),
            ]),
        };
        let vcs = FakeVcs::new();
        let mut controller = SessionController::new(
            &llm,
            &fs,
            Some(&vcs),
            None,
            EditConfig {
                auto_commit: true,
                dirty_commits: true,
                ..EditConfig::default()
            },
            CancellationToken::new(),
        );
        let mut session = EditSession::new(workspace.clone(), "please fix the greeting", vec![target.clone()]);

        let applied = controller.run_to_completion(&mut session).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(vcs.committed.borrow().len(), 1);
        assert_eq!(vcs.committed.borrow()[0], vec!["a.txt".to_string()]);
    }
}
