//! The Patch Matcher: a pure function `(whole, original, updated) ->
//! Option<new_whole>` implementing the match cascade.
//! No I/O — `whole = None` stands for "target file does not exist yet"
//! rather than the matcher reading anything itself.

use crate::{ensure_trailing_newline, join_lines, split_lines};

/// Attempts to splice `updated` into `whole` wherever `original` is found,
/// trying increasingly tolerant strategies in order (first success wins).
/// Returns `None` if no strategy succeeds, meaning the caller should try a
/// different candidate file or report the block as failed.
///
/// `lenient` gates stages 3 (indent-normalised) and 4 (elision) — when
/// false, only exact and leading-blank-tolerant matching are attempted.
pub fn apply_match(whole: Option<&str>, original: &str, updated: &str, lenient: bool) -> Option<String> {
    match whole {
        None => {
            if original.trim().is_empty() {
                Some(ensure_trailing_newline(updated))
            } else {
                None
            }
        }
        Some(w) => {
            if original.is_empty() {
                Some(append_with_separator(w, updated))
            } else {
                match_existing(w, original, updated, lenient)
            }
        }
    }
}

fn append_with_separator(whole: &str, updated: &str) -> String {
    if whole.is_empty() {
        return ensure_trailing_newline(updated);
    }
    let mut out = whole.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&ensure_trailing_newline(updated));
    out
}

fn match_existing(whole: &str, original: &str, updated: &str, lenient: bool) -> Option<String> {
    let whole_lines = split_lines(whole);
    let original_lines = split_lines(original);
    let updated_lines = split_lines(updated);

    if let Some(result) = try_exact(&whole_lines, &original_lines, &updated_lines) {
        return Some(result);
    }

    if original_lines.first() == Some(&"") {
        if let Some(result) = try_exact(&whole_lines, &original_lines[1..], &updated_lines) {
            return Some(result);
        }
    }

    if !lenient {
        return None;
    }

    if let Some(result) = try_indent_normalised(&whole_lines, &original_lines, &updated_lines) {
        return Some(result);
    }

    try_elision(&whole_lines, &original_lines, &updated_lines)
}

/// Stage 1/2: exact line-sequence match. Multiple matches still accept the
/// first (leftmost) occurrence — SEARCH blocks replace the first match.
fn try_exact(whole: &[&str], original: &[&str], updated: &[&str]) -> Option<String> {
    if original.is_empty() || original.len() > whole.len() {
        return None;
    }
    let start = find_first_window(whole, original)?;
    let end = start + original.len();
    Some(splice(whole, start, end, updated))
}

fn find_first_window(haystack: &[&str], needle: &[&str]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&start| &haystack[start..start + needle.len()] == needle)
}

fn splice(whole: &[&str], start: usize, end: usize, updated: &[&str]) -> String {
    let mut result: Vec<&str> = Vec::with_capacity(whole.len() - (end - start) + updated.len());
    result.extend_from_slice(&whole[..start]);
    result.extend_from_slice(updated);
    result.extend_from_slice(&whole[end..]);
    join_lines(&result)
}

/// Stage 3: outdent `original`/`updated` by their shared minimum indent,
/// then look for a window in `whole` that matches line-by-line once both
/// sides are trimmed, with one consistent external indent across the
/// window. Re-indents `updated` by that external prefix before splicing.
fn try_indent_normalised(whole: &[&str], original: &[&str], updated: &[&str]) -> Option<String> {
    if original.is_empty() || original.len() > whole.len() {
        return None;
    }
    let min_indent = min_leading_ws(original.iter().chain(updated.iter()));
    let outdented_original: Vec<&str> = original.iter().map(|l| outdent(l, min_indent)).collect();
    let outdented_updated: Vec<String> = updated
        .iter()
        .map(|l| outdent(l, min_indent).to_string())
        .collect();

    for start in 0..=whole.len() - original.len() {
        let window = &whole[start..start + original.len()];
        let Some(prefix) = common_window_prefix(window, &outdented_original) else {
            continue;
        };
        let reindented: Vec<String> = outdented_updated
            .iter()
            .map(|l| reindent(l, &prefix))
            .collect();
        let result = splice(
            whole,
            start,
            start + original.len(),
            &reindented.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        return Some(result);
    }
    None
}

fn min_leading_ws<'a>(lines: impl Iterator<Item = &'a &'a str>) -> usize {
    lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_ws_len(l))
        .min()
        .unwrap_or(0)
}

fn leading_ws_len(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn outdent(line: &str, count: usize) -> &str {
    let ws_len = leading_ws_len(line);
    &line[ws_len.min(count)..]
}

fn reindent(line: &str, prefix: &str) -> String {
    if line.is_empty() {
        String::new()
    } else {
        format!("{prefix}{line}")
    }
}

/// For each line of `window` paired with the corresponding already-outdented
/// `original` line, requires the content past leading whitespace to match
/// exactly (`trim_start` equality) and derives that line's *external* indent
/// as the prefix of `window`'s line left over once the outdented line's own
/// length is accounted for — so nested indentation already present in
/// `outdented_original` (e.g. a deeper line inside an `if`) is preserved
/// rather than flattened. Every non-blank line must agree on that external
/// prefix for the window to be accepted.
fn common_window_prefix(window: &[&str], outdented_original: &[&str]) -> Option<String> {
    let mut prefix: Option<&str> = None;
    for (line, o) in window.iter().zip(outdented_original.iter()) {
        if line.trim_start() != o.trim_start() {
            return None;
        }
        if line.trim().is_empty() {
            continue;
        }
        if line.len() < o.len() {
            return None;
        }
        let this_prefix = &line[..line.len() - o.len()];
        match prefix {
            None => prefix = Some(this_prefix),
            Some(p) if p == this_prefix => {}
            Some(_) => return None,
        }
    }
    Some(prefix.unwrap_or("").to_string())
}

/// Stage 4: `...` elision. Splits both sides on lines that trim to exactly
/// `...`, then splices each non-elided segment's replacement at the single
/// unambiguous occurrence of its search text in `whole`, preserving
/// everything else (the content the `...` stood for) untouched.
fn try_elision(whole: &[&str], original: &[&str], updated: &[&str]) -> Option<String> {
    let orig_segments = split_on_elision(original);
    let upd_segments = split_on_elision(updated);

    let has_elision = orig_segments.len() > 1;
    if !has_elision || orig_segments.len() != upd_segments.len() {
        return None;
    }

    let mut result: Vec<&str> = Vec::new();
    let mut cursor = 0usize;

    for (p_i, r_i) in orig_segments.iter().zip(upd_segments.iter()) {
        if p_i.is_empty() {
            result.extend_from_slice(r_i);
            continue;
        }
        let haystack = &whole[cursor..];
        let occurrences = count_occurrences(haystack, p_i);
        if occurrences != 1 {
            return None;
        }
        let rel_start = find_first_window(haystack, p_i)?;
        let abs_start = cursor + rel_start;
        let abs_end = abs_start + p_i.len();
        result.extend_from_slice(&whole[cursor..abs_start]);
        result.extend_from_slice(r_i);
        cursor = abs_end;
    }
    result.extend_from_slice(&whole[cursor..]);
    Some(join_lines(&result))
}

fn split_on_elision<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut segments = vec![Vec::new()];
    for line in lines {
        if line.trim() == "..." {
            segments.push(Vec::new());
        } else {
            segments.last_mut().unwrap().push(*line);
        }
    }
    segments
}

fn count_occurrences(haystack: &[&str], needle: &[&str]) -> usize {
    if needle.is_empty() || needle.len() > haystack.len() {
        return 0;
    }
    (0..=haystack.len() - needle.len())
        .filter(|&start| &haystack[start..start + needle.len()] == needle)
        .count()
}
