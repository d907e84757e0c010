//! Reflection Report Builder: on partial or total
//! failure, assembles a human- and model-readable report identifying each
//! failing block, the file it targeted, and the passing ones — fed back to
//! the model as the next user message by the Session controller.

use crate::EditBlock;

/// Builds the plain-text reflection report for one failed attempt.
///
/// `failed` pairs each block with the reason it failed — `"SearchReplaceNoExactMatch"`
/// for a matcher-cascade miss, or the validator's own issue text for a
/// validation rejection. `failed` keeps the original marker widths the model
/// used wherever they're still available; callers that only have
/// `EditBlock`s (which don't retain raw marker text) pass the default
/// five-character markers, which is always an accepted marker width.
pub fn build_report(
    failed: &[(EditBlock, String)],
    passed: &[String],
    repo_current: &dyn Fn(&str) -> Option<String>,
) -> String {
    let mut report = String::new();

    if !passed.is_empty() {
        report.push_str("# Already applied successfully, do not resend these blocks:\n");
        for file in passed {
            report.push_str(&format!("- {file}\n"));
        }
        report.push('\n');
    }

    report.push_str("# The following SEARCH/REPLACE blocks failed to apply:\n\n");
    for (block, reason) in failed {
        report.push_str(&format!("## {} ({reason})\n\n", block.file_path));
        report.push_str("<<<<<<< SEARCH\n");
        report.push_str(&block.original_text);
        report.push_str("=======\n");
        report.push_str(&block.updated_text);
        report.push_str(">>>>>>> REPLACE\n\n");

        if let Some(current) = repo_current(&block.file_path) {
            if !block.updated_text.is_empty() && current.contains(&block.updated_text) {
                report.push_str(
                    "Note: the REPLACE text already appears in the current file — this edit may be redundant.\n\n",
                );
            }
        }
    }

    report.push_str(
        "Resend only the failing blocks above, corrected so the SEARCH text matches the \
         current file exactly. Do not resend blocks already applied.\n",
    );

    report
}
