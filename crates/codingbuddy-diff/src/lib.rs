//! The SEARCH/REPLACE code-edit engine.
//!
//! Takes a free-form model response containing structured edit blocks,
//! parses it (`parser`, `filename`), validates the result against repository
//! state (`validator`), applies it through a cascade of increasingly
//! tolerant matching strategies with a fallback across candidate files
//! (`matcher`, `applier`), and — on any failure — synthesises a reflection
//! report (`reflection`) to feed back to the model. `collab` defines the
//! filesystem/VCS contracts the applier consumes; everything else in this
//! crate is pure and side-effect-free.

pub mod applier;
pub mod collab;
pub mod filename;
pub mod matcher;
pub mod parser;
pub mod reflection;
pub mod validator;

use serde::{Deserialize, Serialize};

/// A single proposed edit, parsed out of a model response.
///
/// `original_text` may be empty (intent to create a file); `updated_text`
/// may be empty (deletion). Every block carries its filename explicitly —
/// sticky filenames are resolved to a concrete path at parse time, so later
/// stages never need to chase one down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBlock {
    pub file_path: String,
    pub original_text: String,
    pub updated_text: String,
}

/// Which wire format the model was prompted with. Determines where the
/// filename sits relative to the fence and which system-prompt variant the
/// Prompt Assembler emits. `Whole` and `Architect` parse exactly like `Diff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditFormat {
    Diff,
    DiffFenced,
    Whole,
    Architect,
}

impl EditFormat {
    /// The parser state machine `Diff` and `DiffFenced` use genuinely
    /// different filename-extraction rules; everything else defers to `Diff`.
    pub fn parses_as(self) -> ParseDialect {
        match self {
            EditFormat::DiffFenced => ParseDialect::DiffFenced,
            EditFormat::Diff | EditFormat::Whole | EditFormat::Architect => ParseDialect::Diff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseDialect {
    Diff,
    DiffFenced,
}

/// The outer code-fence delimiter pair. Quadruple backticks by default, to
/// avoid colliding with triple-backtick fences that may appear inside an
/// edit block's own content (e.g. a Markdown file being edited).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fence {
    pub open: String,
    pub close: String,
}

impl Default for Fence {
    fn default() -> Self {
        Self {
            open: "````".to_string(),
            close: "````".to_string(),
        }
    }
}

/// Ensures `s` ends with exactly one trailing newline; leaves an empty
/// string empty (never invent content for a block that
/// legitimately has none).
pub(crate) fn ensure_trailing_newline(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if s.ends_with('\n') {
        s.to_string()
    } else {
        format!("{s}\n")
    }
}

/// Splits file content into a line array with newlines stripped, the shape
/// every pure function in this crate operates on.
pub(crate) fn split_lines(s: &str) -> Vec<&str> {
    s.lines().collect()
}

/// Rejoins a line array into file content, normalised to end with exactly
/// one `\n` (or to be truly empty, if there are no lines at all).
pub(crate) fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_trailing_newline_appends_when_missing() {
        assert_eq!(ensure_trailing_newline("abc"), "abc\n");
        assert_eq!(ensure_trailing_newline("abc\n"), "abc\n");
        assert_eq!(ensure_trailing_newline(""), "");
    }

    #[test]
    fn join_lines_empty_is_empty() {
        assert_eq!(join_lines::<&str>(&[]), "");
    }

    #[test]
    fn join_lines_terminates_with_single_newline() {
        assert_eq!(join_lines(&["a", "b"]), "a\nb\n");
    }

    #[test]
    fn edit_format_parse_dialect_mapping() {
        assert_eq!(EditFormat::Diff.parses_as(), ParseDialect::Diff);
        assert_eq!(EditFormat::Whole.parses_as(), ParseDialect::Diff);
        assert_eq!(EditFormat::Architect.parses_as(), ParseDialect::Diff);
        assert_eq!(EditFormat::DiffFenced.parses_as(), ParseDialect::DiffFenced);
    }
}
