//! Prompt Assembler: composes the message sequence
//! `[System, (ExampleUser, ExampleAssistant)*, ContextUser, ContextAssistant,
//! UserRequest]` from templates, placing the filename relative to the fence
//! per the chosen `EditFormat`.

use crate::templates::{self, PromptFlags, PromptAssemblyError};
use codingbuddy_core::ChatMessage;
use codingbuddy_diff::{EditFormat, Fence};

/// Everything the Prompt Assembler needs besides the template store itself.
pub struct PromptRequest<'a> {
    pub user_request: &'a str,
    pub in_chat_files: &'a [String],
    pub read_only_files: &'a [String],
    pub repo_map: Option<&'a str>,
    pub edit_format: EditFormat,
    pub fence: &'a Fence,
    pub language: &'a str,
    pub platform: &'a str,
    pub flags: PromptFlags,
}

/// Assembles the ordered message sequence for one LLM call. `Architect` and
/// `Whole` defer to the `Diff` example exchange and system prompt exactly
/// like they defer to `Diff` parsing.
pub fn assemble(request: &PromptRequest) -> Result<Vec<ChatMessage>, PromptAssemblyError> {
    let store = templates::store_for(
        request.edit_format,
        request.fence,
        request.language,
        request.platform,
        request.flags,
    );

    let system_text = store.substitute(templates::system_prompt_template(request.edit_format))?;
    let mut messages = vec![ChatMessage::System { content: system_text }];

    let (example_user, example_assistant) = templates::example_exchange(request.edit_format);
    messages.push(ChatMessage::User {
        content: example_user.to_string(),
    });
    messages.push(ChatMessage::Assistant {
        content: example_assistant.to_string(),
    });

    messages.push(ChatMessage::User {
        content: context_user_message(request),
    });
    messages.push(ChatMessage::Assistant {
        content: "Understood. I have the repository context; send the request.".to_string(),
    });

    messages.push(ChatMessage::User {
        content: request.user_request.to_string(),
    });

    Ok(messages)
}

fn context_user_message(request: &PromptRequest) -> String {
    let mut out = String::new();
    if !request.in_chat_files.is_empty() {
        out.push_str("Files you may edit:\n");
        for f in request.in_chat_files {
            out.push_str(&format!("- {f}\n"));
        }
    }
    if !request.read_only_files.is_empty() {
        out.push_str("Read-only files for context:\n");
        for f in request.read_only_files {
            out.push_str(&format!("- {f}\n"));
        }
    }
    if let Some(map) = request.repo_map {
        out.push_str("Repository map:\n");
        out.push_str(map);
        out.push('\n');
    }
    out
}
