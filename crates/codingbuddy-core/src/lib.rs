//! Shared types used across the `codingbuddy-*` edit-engine crates: session
//! identity, the event envelope recorded by `codingbuddy-observe`, chat
//! messages exchanged with the LLM collaborator, cooperative cancellation,
//! and the merged JSON configuration layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Runtime state directory for a workspace, e.g. `<workspace>/.codingbuddy`.
/// Holds settings overlays, the event log, and anything else scoped to one
/// checkout rather than to the user's home directory.
pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".codingbuddy")
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a session controller and
/// whatever is driving it. Checked at every suspension point (LLM call, file
/// write) — never forces an in-flight write to abort midway.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Reset the token to "not cancelled" for reuse across sessions.
    pub fn reset(&self) {
        self.cancelled
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

// ── Chat messages ────────────────────────────────────────────────────────

/// One message in the sequence sent to the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl ChatMessage {
    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Assistant { content } => content,
        }
    }
}

/// Aggregate token usage for one LLM call, if the collaborator reports it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

// ── Event log ────────────────────────────────────────────────────────────

/// Envelope recorded by `codingbuddy-observe` for every notable event in an
/// edit session's lifecycle: a monotonic `seq_no`, a timestamp, the owning
/// `session_id`, and the event `kind` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: chrono::DateTime<chrono::Utc>,
    pub session_id: Uuid,
    pub kind: EditEvent,
}

/// Lifecycle events emitted by the Session & Retry Controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EditEvent {
    SessionStarted { attempt_max: u32 },
    AttemptStarted { attempt: u32 },
    BlocksParsed { count: usize },
    ValidationRejected { file: String, reason: String },
    BlockApplied { file: String },
    BlockFailed { file: String, reason: String },
    ReflectionEmitted { failed_count: usize, applied_count: usize },
    SessionCompleted { applied_files: Vec<String> },
    SessionFailed { attempts_used: u32 },
    CommitSucceeded { files: Vec<String> },
    CommitFailed { cause: String },
}

// ── Configuration ────────────────────────────────────────────────────────

/// Telemetry sink configuration — disabled unless an endpoint is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
        }
    }
}

fn default_edit_format() -> String {
    "diff".to_string()
}

fn default_fence_open() -> String {
    "````".to_string()
}

fn default_fence_close() -> String {
    "````".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_similar_file_threshold() -> f64 {
    0.9
}

/// Edit-engine behavioural knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    #[serde(default = "default_edit_format")]
    pub edit_format: String,
    #[serde(default = "default_fence_open")]
    pub fence_open: String,
    #[serde(default = "default_fence_close")]
    pub fence_close: String,
    pub lenient_whitespace: bool,
    pub auto_commit: bool,
    pub dirty_commits: bool,
    pub dry_run: bool,
    pub suggest_shell_commands: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_similar_file_threshold")]
    pub similar_file_threshold: f64,
    pub similar_file_enabled: bool,
    pub duplicate_code_enabled: bool,
    #[serde(default = "default_duplicate_code_threshold")]
    pub duplicate_code_threshold: f64,
    #[serde(default = "default_fallback_breadth")]
    pub fallback_breadth: usize,
}

fn default_duplicate_code_threshold() -> f64 {
    0.5
}

fn default_fallback_breadth() -> usize {
    16
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            edit_format: default_edit_format(),
            fence_open: default_fence_open(),
            fence_close: default_fence_close(),
            lenient_whitespace: true,
            auto_commit: true,
            dirty_commits: true,
            dry_run: false,
            suggest_shell_commands: true,
            max_attempts: default_max_attempts(),
            similar_file_threshold: default_similar_file_threshold(),
            similar_file_enabled: false,
            duplicate_code_enabled: false,
            duplicate_code_threshold: default_duplicate_code_threshold(),
            fallback_breadth: default_fallback_breadth(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

/// LLM collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

/// Top-level settings document, merged from defaults + user + project +
/// project-local overlays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub edit: EditConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".codingbuddy/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    /// Load defaults, then overlay user, project, and project-local settings
    /// files in that order (each optional; later layers win on conflict).
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let overlay: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &overlay);
        }

        Ok(serde_json::from_value(merged)?)
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
