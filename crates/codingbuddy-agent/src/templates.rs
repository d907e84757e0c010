//! Prompt templates: per-format
//! system prompts and example exchanges held as string constants, combined
//! with a `TemplateStore` placeholder map modelling "a mapping from
//! placeholder names to values" rather than ad-hoc string concatenation.

use codingbuddy_diff::EditFormat;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptAssemblyError {
    #[error("unknown placeholder {{{0}}} left unsubstituted")]
    UnknownPlaceholder(String),
}

/// A mapping from placeholder name to value, substituted into a template
/// string. Unknown placeholders left in the source are a hard error rather
/// than shipped to the model silently.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    values: HashMap<&'static str, String>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    /// Substitutes every `{name}` token found in `values`; any `{...}`-shaped
    /// token that survives substitution (because no value was registered for
    /// it) is reported as an error rather than sent on as literal text.
    pub fn substitute(&self, template: &str) -> Result<String, PromptAssemblyError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                out.push('{');
                rest = after_open;
                continue;
            };
            let key = &after_open[..close];
            match self.values.get(key) {
                Some(value) => out.push_str(value),
                None => return Err(PromptAssemblyError::UnknownPlaceholder(key.to_string())),
            }
            rest = &after_open[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Flags bearing on the final-reminders block and shell-command section.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptFlags {
    pub suggest_shell: bool,
    pub lazy: bool,
    pub overeager: bool,
}

fn final_reminders(flags: PromptFlags) -> String {
    let mut lines = vec![
        "Only output SEARCH/REPLACE blocks for files that need changes.".to_string(),
        "Every SEARCH block must match the current file content exactly, including whitespace."
            .to_string(),
    ];
    if flags.lazy {
        lines.push("Do not elide unchanged code with comments like \"... rest unchanged\"; use the `...` elision marker inside a SEARCH/REPLACE block instead.".to_string());
    }
    if flags.overeager {
        lines.push("Only make the changes the user explicitly requested; do not refactor unrelated code.".to_string());
    }
    lines.join("\n")
}

fn shell_cmd_prompt_section(flags: PromptFlags) -> &'static str {
    if flags.suggest_shell {
        "After the edits, suggest any shell commands the user should run (install, test, build)."
    } else {
        ""
    }
}

/// System prompt constants, one per `EditFormat`. Each embeds the
/// placeholders the Prompt Assembler is required to substitute.
const SYSTEM_PROMPT_DIFF: &str = "\
You are an expert software engineer. Propose changes as SEARCH/REPLACE \
blocks using {fence_0}{language} fences. Put the filename on its own line \
immediately before the fence.{quad_backtick_reminder}

{shell_cmd_prompt_section}

{final_reminders}";

const SYSTEM_PROMPT_DIFF_FENCED: &str = "\
You are an expert software engineer working on {platform}. Propose changes \
as SEARCH/REPLACE blocks inside a single {fence_0}{language} fence, with the \
filename as the first line inside the fence.{quad_backtick_reminder}

{shell_cmd_prompt_section}

{final_reminders}";

const SYSTEM_PROMPT_WHOLE: &str = "\
You are an expert software engineer. Propose changes as SEARCH/REPLACE \
blocks exactly like the `diff` format; `whole` only changes how the \
conversation is framed, not the wire format.

{shell_cmd_prompt_section}

{final_reminders}";

const SYSTEM_PROMPT_ARCHITECT: &str = "\
You are a software architect planning an implementation. Describe the \
change, then express it as SEARCH/REPLACE blocks exactly like the `diff` \
format.

{shell_cmd_prompt_section}

{final_reminders}";

pub fn system_prompt_template(format: EditFormat) -> &'static str {
    match format {
        EditFormat::Diff => SYSTEM_PROMPT_DIFF,
        EditFormat::DiffFenced => SYSTEM_PROMPT_DIFF_FENCED,
        EditFormat::Whole => SYSTEM_PROMPT_WHOLE,
        EditFormat::Architect => SYSTEM_PROMPT_ARCHITECT,
    }
}

/// One example (user, assistant) exchange per format, used to show the
/// model the exact wire shape before the real request.
pub fn example_exchange(format: EditFormat) -> (&'static str, &'static str) {
    match format {
        EditFormat::DiffFenced => (
            "Change the greeting in hello.py to say \"Goodbye\".",
            "````\nhello.py\n<<<<<<< SEARCH\nprint(\"Hello\")\n=======\nprint(\"Goodbye\")\n>>>>>>> REPLACE\n````\n",
        ),
        EditFormat::Diff | EditFormat::Whole | EditFormat::Architect => (
            "Change the greeting in hello.py to say \"Goodbye\".",
            "hello.py\n````python\n<<<<<<< SEARCH\nprint(\"Hello\")\n=======\nprint(\"Goodbye\")\n>>>>>>> REPLACE\n````\n",
        ),
    }
}

/// Builds a fully populated `TemplateStore` for one system-prompt rendering,
/// with every named placeholder already set.
pub fn store_for(
    format: EditFormat,
    fence: &codingbuddy_diff::Fence,
    language: &str,
    platform: &str,
    flags: PromptFlags,
) -> TemplateStore {
    let mut store = TemplateStore::new();
    store
        .set("fence_0", fence.open.clone())
        .set("fence_1", fence.close.clone())
        .set("language", language.to_string())
        .set("platform", platform.to_string())
        .set("final_reminders", final_reminders(flags))
        .set("shell_cmd_prompt_section", shell_cmd_prompt_section(flags))
        .set(
            "quad_backtick_reminder",
            if fence.open == "````" {
                " Use four backticks, not three, since file contents may contain triple-backtick fences.".to_string()
            } else {
                String::new()
            },
        );
    store
}
