use glaze_core::models::SourceType;
use serde_json::{json, Value};

use crate::catalog::CatalogEntry;
use crate::chunk::chunk_text;

pub const DOCUMENT_CHUNK_CHARS: usize = 1000;
pub const DOCUMENT_CHUNK_OVERLAP: usize = 150;

/// Text cut from a product, waiting to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub content: String,
    pub metadata: Value,
}

fn description_text(entry: &CatalogEntry) -> String {
    let mut text = entry.name.trim().to_string();
    if let Some(category) = entry.category.as_deref().filter(|c| !c.trim().is_empty()) {
        text.push_str("\nCategory: ");
        text.push_str(category.trim());
    }
    if let Some(price) = entry.price {
        text.push_str(&format!("\nPrice: {:.2}", price));
    }
    text.push_str("\n\n");
    text.push_str(entry.description.trim());
    text
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn flatten_specs(prefix: &str, specs: &serde_json::Map<String, Value>, lines: &mut Vec<String>) {
    for (key, value) in specs {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_specs(&key, nested, lines),
            Value::Null => {}
            other => lines.push(format!("{}: {}", key, render_value(other))),
        }
    }
}

/// Document IDs end up inside citation tags, so only `[A-Za-z0-9._-]` survive.
/// Anything else becomes `-`.
fn citation_safe_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Cut a catalogue entry into embeddable snippets: one description, one
/// specification sheet (when present), one per FAQ, and overlapping chunks of
/// every attached document.
pub fn build_snippets(entry: &CatalogEntry) -> Vec<Snippet> {
    let base = json!({ "sku": entry.sku.trim(), "name": entry.name.trim() });
    let mut snippets = vec![Snippet {
        source_type: SourceType::Description,
        source_id: None,
        content: description_text(entry),
        metadata: base.clone(),
    }];

    let mut spec_lines = Vec::new();
    flatten_specs("", &entry.specifications, &mut spec_lines);
    if !spec_lines.is_empty() {
        snippets.push(Snippet {
            source_type: SourceType::Spec,
            source_id: Some("spec".to_string()),
            content: format!("{} specifications\n{}", entry.name.trim(), spec_lines.join("\n")),
            metadata: base.clone(),
        });
    }

    for (n, faq) in entry.faqs.iter().enumerate() {
        if faq.question.trim().is_empty() || faq.answer.trim().is_empty() {
            continue;
        }
        let mut metadata = base.clone();
        metadata["question"] = json!(faq.question.trim());
        snippets.push(Snippet {
            source_type: SourceType::Faq,
            source_id: Some(format!("faq-{}", n + 1)),
            content: format!("Q: {}\nA: {}", faq.question.trim(), faq.answer.trim()),
            metadata,
        });
    }

    for (n, doc) in entry.documents.iter().enumerate() {
        let doc_id = doc
            .id
            .as_deref()
            .map(citation_safe_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("doc-{}", n + 1));
        for (c, chunk) in chunk_text(&doc.text, DOCUMENT_CHUNK_CHARS, DOCUMENT_CHUNK_OVERLAP)
            .into_iter()
            .enumerate()
        {
            let mut metadata = base.clone();
            metadata["document"] = json!(doc_id);
            metadata["chunk"] = json!(c);
            if let Some(title) = &doc.title {
                metadata["title"] = json!(title);
            }
            snippets.push(Snippet {
                source_type: SourceType::Document,
                source_id: Some(format!("{}#{}", doc_id, c)),
                content: chunk,
                metadata,
            });
        }
    }

    snippets
}
