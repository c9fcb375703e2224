//! Citation tags and answer grounding.
//!
//! Every fact shown to a customer must be traceable to a retrieved snippet via
//! a tag of the exact form `[Product: <id>, Source: <type>, ID: <id>]`.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::models::{MatchedSnippet, ProvenanceItem};

/// Reply used verbatim when nothing in the knowledge base clears the relevance bar.
pub const ESCALATION_MESSAGE: &str = "I'm sorry, but I don't have enough information to answer that question accurately. Please contact our customer support team and a specialist will be happy to help you.";

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"\[Product: ([^,\]]+), Source: ([a-z]+), ID: ([^\]]+)\]")
            .expect("citation tag pattern is valid")
    })
}

pub fn format_tag(snippet: &MatchedSnippet) -> String {
    format!(
        "[Product: {}, Source: {}, ID: {}]",
        snippet.product_id,
        snippet.source_type,
        snippet.citation_id()
    )
}

/// A citation tag found in generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    pub product_id: String,
    pub source_type: String,
    pub id: String,
    pub start: usize,
    pub end: usize,
}

pub fn parse_tags(text: &str) -> Vec<ParsedTag> {
    tag_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ParsedTag {
                product_id: caps[1].to_string(),
                source_type: caps[2].to_string(),
                id: caps[3].to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

fn resolve<'a>(tag: &ParsedTag, snippets: &'a [MatchedSnippet]) -> Option<&'a MatchedSnippet> {
    let product_id: Uuid = tag.product_id.parse().ok()?;
    snippets.iter().find(|s| {
        s.product_id == product_id
            && s.source_type.as_str() == tag.source_type
            && s.citation_id() == tag.id
    })
}

/// `Sources:` line citing every snippet, used when an answer cites nothing valid.
pub fn sources_line(snippets: &[MatchedSnippet]) -> String {
    let tags: Vec<String> = snippets.iter().map(format_tag).collect();
    format!("Sources: {}", tags.join(" "))
}

/// True when `text` cites at least one of `snippets`.
pub fn cites_any(text: &str, snippets: &[MatchedSnippet]) -> bool {
    parse_tags(text)
        .iter()
        .any(|tag| resolve(tag, snippets).is_some())
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    pub provenance: Vec<ProvenanceItem>,
}

/// Reconcile a generated answer with the snippets it was grounded on.
///
/// Tags that resolve to a retrieved snippet are kept; tags that resolve to
/// nothing are removed. When no valid tag remains, a `Sources:` line citing
/// every retrieved snippet is appended. Provenance lists cited snippets once,
/// in first-citation order.
pub fn ground_answer(answer: &str, snippets: &[MatchedSnippet]) -> GroundedAnswer {
    let mut text = String::with_capacity(answer.len());
    let mut provenance = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = 0;

    for tag in parse_tags(answer) {
        match resolve(&tag, snippets) {
            Some(snippet) => {
                if seen.insert(snippet.id) {
                    provenance.push(ProvenanceItem::from(snippet));
                }
            }
            None => {
                tracing::warn!(
                    product_id = %tag.product_id,
                    source_type = %tag.source_type,
                    id = %tag.id,
                    "Dropping citation that matches no retrieved snippet"
                );
                text.push_str(answer[cursor..tag.start].trim_end_matches(' '));
                cursor = tag.end;
            }
        }
    }
    text.push_str(&answer[cursor..]);

    let mut text = text.trim_end().to_string();

    if provenance.is_empty() && !snippets.is_empty() {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&sources_line(snippets));
        provenance = snippets.iter().map(ProvenanceItem::from).collect();
    }

    GroundedAnswer { text, provenance }
}

const TAG_PREFIX: &str = "[Product: ";

/// Longest bracketed run held back while waiting for a tag to close.
const MAX_PENDING_TAG: usize = 256;

/// Incremental version of the citation check in [`ground_answer`], for text
/// that arrives in chunks.
///
/// Text outside brackets passes straight through. From a `[` that could open a
/// tag, output is held until the tag closes; a closed tag that resolves to a
/// retrieved snippet is released, one that does not is dropped along with the
/// spaces before it.
#[derive(Debug, Default)]
pub struct CitationFilter {
    gap: String,
    pending: String,
}

impl CitationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return what can be sent now.
    pub fn push(&mut self, chunk: &str, snippets: &[MatchedSnippet]) -> String {
        let mut out = String::with_capacity(chunk.len());

        for ch in chunk.chars() {
            if self.pending.is_empty() {
                match ch {
                    ' ' => self.gap.push(ch),
                    '[' => self.pending.push(ch),
                    _ => {
                        out.push_str(&self.gap);
                        self.gap.clear();
                        out.push(ch);
                    }
                }
                continue;
            }

            self.pending.push(ch);
            if ch == ']' {
                self.settle(&mut out, snippets);
            } else if !self.could_be_tag() {
                // a fresh `[` may itself open a tag
                let reopen = ch == '[';
                if reopen {
                    self.pending.pop();
                }
                self.release(&mut out);
                if reopen {
                    self.pending.push('[');
                }
            }
        }

        out
    }

    /// Release anything still held once the stream has ended.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        self.release(&mut out);
        out
    }

    fn could_be_tag(&self) -> bool {
        self.pending.len() <= MAX_PENDING_TAG
            && (TAG_PREFIX.starts_with(self.pending.as_str())
                || self.pending.starts_with(TAG_PREFIX))
    }

    fn release(&mut self, out: &mut String) {
        out.push_str(&self.gap);
        out.push_str(&self.pending);
        self.gap.clear();
        self.pending.clear();
    }

    fn settle(&mut self, out: &mut String, snippets: &[MatchedSnippet]) {
        let tags = parse_tags(&self.pending);
        let fabricated = match tags.first() {
            Some(tag) if tag.start == 0 && tag.end == self.pending.len() => {
                let unknown = resolve(tag, snippets).is_none();
                if unknown {
                    tracing::warn!(
                        product_id = %tag.product_id,
                        source_type = %tag.source_type,
                        id = %tag.id,
                        "Dropping streamed citation that matches no retrieved snippet"
                    );
                }
                unknown
            }
            _ => false,
        };

        if fabricated {
            self.gap.clear();
            self.pending.clear();
        } else {
            self.release(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn snippet(product: u128, source_type: SourceType, source_id: Option<&str>) -> MatchedSnippet {
        MatchedSnippet {
            id: Uuid::from_u128(product * 1000 + 1),
            product_id: Uuid::from_u128(product),
            product_name: Some("Sakura Dinner Set".to_string()),
            source_type,
            source_id: source_id.map(str::to_string),
            content: "A 12-piece bone china dinner set.".to_string(),
            metadata: serde_json::json!({}),
            similarity: 0.83,
        }
    }

    #[test]
    fn test_format_tag_uses_literal_layout() {
        let s = snippet(7, SourceType::Faq, Some("faq-2"));
        assert_eq!(
            format_tag(&s),
            "[Product: 00000000-0000-0000-0000-000000000007, Source: faq, ID: faq-2]"
        );
    }

    #[test]
    fn test_format_tag_falls_back_to_record_id() {
        let s = snippet(7, SourceType::Description, None);
        assert_eq!(
            format_tag(&s),
            format!("[Product: {}, Source: description, ID: {}]", s.product_id, s.id)
        );
    }

    #[test]
    fn test_parse_tags_finds_every_tag_in_order() {
        let text = "Dishwasher safe [Product: a1, Source: spec, ID: spec] and microwave safe \
                    [Product: b2, Source: faq, ID: faq-1].";
        let tags = parse_tags(text);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].product_id, "a1");
        assert_eq!(tags[0].source_type, "spec");
        assert_eq!(tags[1].id, "faq-1");
        assert!(tags[0].end <= tags[1].start);
    }

    #[test]
    fn test_ground_answer_keeps_valid_citations() {
        let s = snippet(1, SourceType::Description, Some("desc"));
        let answer = format!("The Sakura set has 12 pieces {}.", format_tag(&s));
        let grounded = ground_answer(&answer, std::slice::from_ref(&s));

        assert_eq!(grounded.text, answer);
        assert_eq!(grounded.provenance.len(), 1);
        assert_eq!(grounded.provenance[0].product_id, s.product_id);
        assert_eq!(grounded.provenance[0].source_type, SourceType::Description);
        assert_eq!(grounded.provenance[0].source_id.as_deref(), Some("desc"));
    }

    #[test]
    fn test_ground_answer_strips_fabricated_citations() {
        let real = snippet(1, SourceType::Description, Some("desc"));
        let answer = format!(
            "It has 12 pieces {}. It costs $5 [Product: 00000000-0000-0000-0000-000000000099, Source: spec, ID: spec].",
            format_tag(&real)
        );
        let grounded = ground_answer(&answer, std::slice::from_ref(&real));

        assert!(!grounded.text.contains("000000000099"));
        assert!(grounded.text.contains("It costs $5."));
        assert_eq!(grounded.provenance.len(), 1);
    }

    #[test]
    fn test_ground_answer_appends_sources_when_uncited() {
        let a = snippet(1, SourceType::Description, None);
        let b = snippet(2, SourceType::Faq, Some("faq-1"));
        let snippets = vec![a.clone(), b.clone()];
        let grounded = ground_answer("We have two lovely dinner sets.", &snippets);

        assert!(grounded.text.starts_with("We have two lovely dinner sets.\n\nSources: "));
        assert!(grounded.text.contains(&format_tag(&a)));
        assert!(grounded.text.contains(&format_tag(&b)));
        assert_eq!(grounded.provenance.len(), 2);
    }

    #[test]
    fn test_ground_answer_deduplicates_repeat_citations() {
        let s = snippet(3, SourceType::Spec, Some("spec"));
        let tag = format_tag(&s);
        let answer = format!("Oven safe {}. Freezer safe {}.", tag, tag);
        let grounded = ground_answer(&answer, std::slice::from_ref(&s));
        assert_eq!(grounded.provenance.len(), 1);
    }

    #[test]
    fn test_cites_any_requires_a_resolvable_tag() {
        let s = snippet(4, SourceType::Document, Some("care-guide#0"));
        assert!(cites_any(&format!("Hand wash {}", format_tag(&s)), std::slice::from_ref(&s)));
        assert!(!cites_any("Hand wash [Product: x, Source: document, ID: y]", &[s]));
    }

    fn run_filter(chunks: &[&str], snippets: &[MatchedSnippet]) -> String {
        let mut filter = CitationFilter::new();
        let mut out: String = chunks.iter().map(|c| filter.push(c, snippets)).collect();
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn test_citation_filter_passes_valid_tag_split_across_chunks() {
        let s = snippet(5, SourceType::Faq, Some("faq-1"));
        let tag = format_tag(&s);
        let (head, tail) = tag.split_at(17);
        let out = run_filter(&["Oven safe ", head, tail, "."], std::slice::from_ref(&s));
        assert_eq!(out, format!("Oven safe {}.", tag));
    }

    #[test]
    fn test_citation_filter_drops_fabricated_tag() {
        let s = snippet(5, SourceType::Faq, Some("faq-1"));
        let out = run_filter(
            &[
                "Oven safe ",
                &format_tag(&s),
                ". Gift boxed [Product: 00000000-0000-0000-0000-0000000000dd, ",
                "Source: faq, ID: faq-9].",
            ],
            std::slice::from_ref(&s),
        );
        assert_eq!(out, format!("Oven safe {}. Gift boxed.", format_tag(&s)));
    }

    #[test]
    fn test_citation_filter_leaves_other_brackets_alone() {
        let s = snippet(5, SourceType::Faq, Some("faq-1"));
        let out = run_filter(&["Sizes [S", "/M] and [[L] ", "[Prod"], std::slice::from_ref(&s));
        assert_eq!(out, "Sizes [S/M] and [[L] [Prod");
    }
}
