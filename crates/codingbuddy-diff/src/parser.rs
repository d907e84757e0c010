//! Marker Parser: a line-based state machine that turns a free-form model
//! response into `EditBlock`s. Never panics and never
//! returns `Err` — malformed input degrades to a smaller `blocks` list plus
//! an incremented `dropped` count, which the caller folds into
//! `EditEngineError::ParseMalformed` when appropriate.

use crate::{EditBlock, ParseDialect, filename, join_lines};

/// Result of a single parse pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub blocks: Vec<EditBlock>,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekHeader,
    InOriginal,
    InUpdated,
}

/// Tracks where the filename for the in-progress block came from, so sticky
/// carry-forward only kicks in when the current block's window genuinely
/// had nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilenameSource {
    FromWindow(String),
    Sticky(String),
}

impl FilenameSource {
    fn into_path(self) -> String {
        match self {
            FilenameSource::FromWindow(p) | FilenameSource::Sticky(p) => p,
        }
    }
}

pub fn parse(text: &str, dialect: ParseDialect) -> ParseOutcome {
    let mut state = State::SeekHeader;
    let mut sticky_filename: Option<String> = None;
    let mut last_candidate: Option<String> = None;
    let mut awaiting_fenced_filename = false;
    let mut current_file: Option<FilenameSource> = None;
    let mut original_buf: Vec<&str> = Vec::new();
    let mut updated_buf: Vec<&str> = Vec::new();
    let mut blocks: Vec<EditBlock> = Vec::new();
    let mut dropped = 0usize;

    let resolve_filename = |last_candidate: &Option<String>, sticky: &Option<String>| -> Option<FilenameSource> {
        if let Some(f) = last_candidate {
            Some(FilenameSource::FromWindow(f.clone()))
        } else {
            sticky.clone().map(FilenameSource::Sticky)
        }
    };

    for line in text.lines() {
        match state {
            State::SeekHeader => {
                if is_marker_line(line, '<', Some("SEARCH")) {
                    current_file = resolve_filename(&last_candidate, &sticky_filename);
                    original_buf.clear();
                    updated_buf.clear();
                    state = State::InOriginal;
                } else if is_fence_line(line) {
                    if dialect == ParseDialect::DiffFenced {
                        awaiting_fenced_filename = true;
                    }
                } else if line.trim().is_empty() {
                    // blank separator, ignore
                } else {
                    match dialect {
                        ParseDialect::Diff => {
                            if let Some(f) = filename::extract(line) {
                                last_candidate = Some(f);
                            }
                        }
                        ParseDialect::DiffFenced => {
                            if awaiting_fenced_filename {
                                if let Some(f) = filename::extract(line) {
                                    last_candidate = Some(f);
                                }
                                awaiting_fenced_filename = false;
                            }
                        }
                    }
                }
            }
            State::InOriginal => {
                if is_marker_line(line, '=', None) {
                    state = State::InUpdated;
                } else if is_marker_line(line, '<', Some("SEARCH")) {
                    dropped += 1;
                    current_file = resolve_filename(&last_candidate, &sticky_filename);
                    original_buf.clear();
                    updated_buf.clear();
                    state = State::InOriginal;
                } else {
                    original_buf.push(line);
                }
            }
            State::InUpdated => {
                if is_marker_line(line, '>', Some("REPLACE")) {
                    match current_file.take() {
                        Some(source) => {
                            let path = source.into_path();
                            sticky_filename = Some(path.clone());
                            blocks.push(EditBlock {
                                file_path: path,
                                original_text: join_lines(&original_buf),
                                updated_text: join_lines(&updated_buf),
                            });
                        }
                        None => dropped += 1,
                    }
                    state = State::SeekHeader;
                    last_candidate = None;
                } else if is_marker_line(line, '<', Some("SEARCH")) {
                    dropped += 1;
                    current_file = resolve_filename(&last_candidate, &sticky_filename);
                    original_buf.clear();
                    updated_buf.clear();
                    state = State::InOriginal;
                } else {
                    updated_buf.push(line);
                }
            }
        }
    }

    if state != State::SeekHeader {
        dropped += 1;
    }

    ParseOutcome { blocks, dropped }
}

fn is_marker_line(line: &str, ch: char, keyword: Option<&str>) -> bool {
    let trimmed = line.trim();
    let run_len = trimmed.chars().take_while(|&c| c == ch).count();
    if !(5..=9).contains(&run_len) {
        return false;
    }
    if trimmed[run_len..].chars().any(|c| c == ch) {
        return false;
    }
    let rest = trimmed[run_len..].trim();
    match keyword {
        Some(kw) => rest.is_empty() || rest.eq_ignore_ascii_case(kw),
        None => rest.is_empty(),
    }
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}
