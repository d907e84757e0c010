//! Validator Pipeline: composable rules over parsed blocks.
//! Rules run in declared order; a block is kept iff every rule
//! returns `None`. All issues from a rejected block are collected, not just
//! the first.

use crate::EditBlock;
use codingbuddy_errors::ValidationIssue;
use std::path::Path;

/// Everything a rule needs besides the block itself. `current_content` is
/// the target file's content before this edit, when it exists — only
/// `DuplicateCode` uses it.
pub struct ValidatorContext<'a> {
    pub repo_files: &'a [String],
    pub current_content: Option<&'a str>,
    pub similar_file_enabled: bool,
    pub similar_file_threshold: f64,
    pub duplicate_code_enabled: bool,
    pub duplicate_code_threshold: f64,
}

pub trait ValidatorRule {
    fn check(&self, block: &EditBlock, ctx: &ValidatorContext) -> Option<ValidationIssue>;
}

fn issue(file: &str, reason: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        file: file.to_string(),
        reason: reason.into(),
    }
}

/// Reject paths whose first character is `#` or `@`, except markdown
/// heading shapes (`^#+\s`).
pub struct ModuleAlias;

impl ValidatorRule for ModuleAlias {
    fn check(&self, block: &EditBlock, _ctx: &ValidatorContext) -> Option<ValidationIssue> {
        let path = &block.file_path;
        let first = path.chars().next()?;
        if first != '#' && first != '@' {
            return None;
        }
        if first == '#' && is_markdown_heading_shape(path) {
            return None;
        }
        Some(issue(path, "path begins with a module-alias sigil (#/@)"))
    }
}

fn is_markdown_heading_shape(path: &str) -> bool {
    let hashes = path.chars().take_while(|&c| c == '#').count();
    path.chars().nth(hashes).is_some_and(char::is_whitespace)
}

/// If the path is absent from `repo_files` and `original_text` is
/// non-blank, the block targets a file that doesn't exist without
/// signalling file creation — reject.
pub struct PathExists;

impl ValidatorRule for PathExists {
    fn check(&self, block: &EditBlock, ctx: &ValidatorContext) -> Option<ValidationIssue> {
        if ctx.repo_files.iter().any(|f| f == &block.file_path) {
            return None;
        }
        if block.original_text.trim().is_empty() {
            return None;
        }
        Some(issue(
            &block.file_path,
            "target file does not exist and SEARCH is non-empty",
        ))
    }
}

/// If the path is absent but shares both basename and immediate parent
/// directory *name* with some existing path, reject with a "did you mean"
/// reason — a typo'd ancestor with the right leaf directory and file. An
/// optional `strsim`-based threshold check supplements the exact-sibling
/// check when enabled (disabled by default).
pub struct SimilarFileName;

impl ValidatorRule for SimilarFileName {
    fn check(&self, block: &EditBlock, ctx: &ValidatorContext) -> Option<ValidationIssue> {
        if ctx.repo_files.iter().any(|f| f == &block.file_path) {
            return None;
        }
        let target = Path::new(&block.file_path);
        let target_name = target.file_name();
        let target_parent_name = target.parent().and_then(Path::file_name);

        for candidate in ctx.repo_files {
            let candidate_path = Path::new(candidate);
            if candidate_path.file_name() == target_name
                && candidate_path.parent().and_then(Path::file_name) == target_parent_name
            {
                return Some(issue(
                    &block.file_path,
                    format!("did you mean {candidate}?"),
                ));
            }
        }

        if ctx.similar_file_enabled {
            for candidate in ctx.repo_files {
                let score = strsim::normalized_levenshtein(&block.file_path, candidate);
                if score >= ctx.similar_file_threshold {
                    return Some(issue(
                        &block.file_path,
                        format!("did you mean {candidate}? (similarity {score:.2})"),
                    ));
                }
            }
        }

        None
    }
}

/// Advisory rule, disabled by default: rejects an edit that would raise the
/// post-edit file's duplicate-line ratio above a configured threshold.
/// Ratio is computed over non-blank, whitespace-trimmed lines only.
pub struct DuplicateCode;

impl ValidatorRule for DuplicateCode {
    fn check(&self, block: &EditBlock, ctx: &ValidatorContext) -> Option<ValidationIssue> {
        if !ctx.duplicate_code_enabled {
            return None;
        }
        let Some(current) = ctx.current_content else {
            return None;
        };
        let Some(projected) = current.find(&block.original_text).map(|idx| {
            let mut s = current.to_string();
            s.replace_range(idx..idx + block.original_text.len(), &block.updated_text);
            s
        }) else {
            return None;
        };

        let ratio = duplicate_line_ratio(&projected);
        if ratio > ctx.duplicate_code_threshold {
            Some(issue(
                &block.file_path,
                format!("edit raises duplicate-line ratio to {ratio:.2}"),
            ))
        } else {
            None
        }
    }
}

fn duplicate_line_ratio(content: &str) -> f64 {
    let trimmed_lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if trimmed_lines.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for line in &trimmed_lines {
        *counts.entry(*line).or_insert(0usize) += 1;
    }
    let duplicates: usize = counts
        .values()
        .filter(|&&c| c > 1)
        .map(|&c| c - 1)
        .sum();
    duplicates as f64 / trimmed_lines.len() as f64
}

/// The four default rules, in execution order.
pub fn default_pipeline() -> Vec<Box<dyn ValidatorRule>> {
    vec![
        Box::new(ModuleAlias),
        Box::new(PathExists),
        Box::new(SimilarFileName),
        Box::new(DuplicateCode),
    ]
}

/// Runs every rule in `pipeline` against `block`, collecting all issues
/// (not short-circuiting on the first).
pub fn validate(
    block: &EditBlock,
    ctx: &ValidatorContext,
    pipeline: &[Box<dyn ValidatorRule>],
) -> Vec<ValidationIssue> {
    pipeline.iter().filter_map(|rule| rule.check(block, ctx)).collect()
}
