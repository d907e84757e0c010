//! Filename Extractor: turns the free-form text a model puts on the line(s)
//! before a SEARCH marker into a clean repository-relative path, or rejects
//! it outright.

const QUOTE_PAIRS: &[(char, char)] = &[('`', '`'), ('*', '*'), ('_', '_'), ('"', '"'), ('\'', '\'')];
const COMMENT_PREFIXES: &[&str] = &["#", "//", "--"];

/// Extracts a candidate filename from a single candidate line, or `None` if
/// the line doesn't look like one at all after stripping decoration.
pub fn extract(line: &str) -> Option<String> {
    let mut candidate = line.trim();
    if candidate.is_empty() {
        return None;
    }

    for prefix in COMMENT_PREFIXES {
        if let Some(rest) = candidate.strip_prefix(prefix) {
            if rest.starts_with(char::is_whitespace) {
                candidate = rest.trim_start();
            }
        }
    }

    loop {
        let stripped = strip_one_quote_pair(candidate);
        if stripped == candidate {
            break;
        }
        candidate = stripped;
    }

    candidate = candidate.trim();
    candidate = candidate.strip_suffix(':').unwrap_or(candidate).trim_end();

    if is_rejected(candidate) {
        return None;
    }

    Some(candidate.to_string())
}

fn strip_one_quote_pair(s: &str) -> &str {
    for (open, close) in QUOTE_PAIRS {
        if s.len() >= 2 {
            let mut chars = s.chars();
            let first = chars.next().unwrap();
            let last = s.chars().last().unwrap();
            if first == *open && last == *close && s.len() > 1 {
                let inner = &s[first.len_utf8()..s.len() - close.len_utf8()];
                if !inner.is_empty() {
                    return inner;
                }
            }
        }
    }
    s
}

fn is_rejected(candidate: &str) -> bool {
    candidate.is_empty()
        || candidate.chars().any(char::is_whitespace)
        || candidate.starts_with("```")
        || candidate.starts_with("````")
}
