//! Prompt assembly for grounded answers.

use crate::models::{MatchedSnippet, Message, Role};
use crate::provenance::format_tag;

pub const SYSTEM_INSTRUCTION: &str = "You are the customer support assistant for a porcelain \
products company. Answer questions about our dinnerware, tea sets, vases and other porcelain \
products using only the information in the provided context. After every fact you state, add \
the bracketed citation tag of the context entry it came from, copied exactly, for example \
[Product: <id>, Source: <type>, ID: <id>]. Never invent products, prices, specifications or \
policies. If the context does not contain the answer, say that you do not know and suggest \
contacting customer support. Be friendly and concise.";

/// Render snippets as tagged context entries separated by blank lines.
pub fn build_context(snippets: &[MatchedSnippet]) -> String {
    snippets
        .iter()
        .map(|s| {
            let mut entry = format_tag(s);
            entry.push('\n');
            if let Some(name) = &s.product_name {
                entry.push_str("Product name: ");
                entry.push_str(name);
                entry.push('\n');
            }
            entry.push_str(s.content.trim());
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render prior turns as `Customer:` and `Assistant:` lines. System turns are skipped.
pub fn build_history(history: &[Message]) -> String {
    history
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(format!("Customer: {}", m.content.trim())),
            Role::Assistant => Some(format!("Assistant: {}", m.content.trim())),
            Role::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(question: &str, snippets: &[MatchedSnippet], history: &[Message]) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Context\n\n");
    prompt.push_str(&build_context(snippets));
    prompt.push_str("\n\n");

    let history = build_history(history);
    if !history.is_empty() {
        prompt.push_str("## Conversation so far\n\n");
        prompt.push_str(&history);
        prompt.push_str("\n\n");
    }

    prompt.push_str("## Customer question\n\n");
    prompt.push_str(question.trim());
    prompt.push_str(
        "\n\nAnswer using only the context above and cite every fact with its tag exactly as shown.",
    );

    prompt
}
