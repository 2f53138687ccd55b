//! Turns ordered `SearchResult`s into a token-budgeted text block plus a
//! citation list whose numbering matches that block (§4.3).

use crate::types::{Citation, SearchResult};
use std::collections::HashMap;

pub const EMPTY_CONTEXT_SENTINEL: &str = "No relevant context found";

#[derive(Debug, Clone)]
pub struct ContextBuilderOptions {
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub max_results: usize,
    pub min_relevance: f32,
}

impl Default for ContextBuilderOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            reserved_tokens: 512,
            max_results: 20,
            min_relevance: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Character/4 heuristic; monotone in character count, used consistently
/// wherever a budget comparison is made (§4.3).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

pub struct ContextBuilder;

impl ContextBuilder {
    pub fn build(results: &[SearchResult], options: &ContextBuilderOptions) -> BuiltContext {
        let available = options.max_tokens.saturating_sub(options.reserved_tokens);

        struct Group {
            order: usize,
            filename: String,
            document_id: String,
            chunks: Vec<(String, Option<u32>, f32)>,
        }

        let mut group_order: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut used_tokens = 0usize;
        let mut admitted = 0usize;

        for result in results {
            if admitted >= options.max_results {
                break;
            }
            if result.combined_score < options.min_relevance {
                continue;
            }

            let needed = estimate_tokens(&result.content);
            if used_tokens + needed > available {
                continue;
            }

            let idx = *group_order.entry(result.document_id.clone()).or_insert_with(|| {
                let idx = groups.len();
                groups.push(Group {
                    order: idx,
                    filename: if result.filename.is_empty() {
                        result.document_id.clone()
                    } else {
                        result.filename.clone()
                    },
                    document_id: result.document_id.clone(),
                    chunks: Vec::new(),
                });
                idx
            });

            let page = result
                .location
                .as_ref()
                .and_then(|l| l.page_numbers.as_ref())
                .and_then(|p| p.first().copied());

            groups[idx].chunks.push((result.content.clone(), page, result.combined_score));
            used_tokens += needed;
            admitted += 1;
        }

        if groups.is_empty() {
            return BuiltContext {
                text: EMPTY_CONTEXT_SENTINEL.to_string(),
                citations: Vec::new(),
            };
        }

        let mut text = String::new();
        let mut citations = Vec::with_capacity(groups.len());

        for group in &groups {
            let n = group.order + 1;
            let page_label = match group.chunks.first().and_then(|(_, p, _)| *p) {
                Some(p) => format!(" (page {p})"),
                None => String::new(),
            };
            text.push_str(&format!("[{n}] {}{page_label}\n", group.filename));
            for (chunk_text, _, _) in &group.chunks {
                text.push_str(chunk_text);
                text.push('\n');
            }
            text.push('\n');

            let mut pages: Vec<u32> = group.chunks.iter().filter_map(|(_, p, _)| *p).collect();
            pages.sort_unstable();
            pages.dedup();

            let best_relevance = group
                .chunks
                .iter()
                .map(|(_, _, score)| *score)
                .fold(f32::MIN, f32::max);

            let (page_number, all_pages) = match pages.len() {
                0 => (None, None),
                1 => (Some(pages[0]), None),
                _ => (None, Some(pages)),
            };

            citations.push(Citation {
                document_id: group.document_id.clone(),
                filename: group.filename.clone(),
                page_number,
                all_pages,
                char_start: None,
                char_end: None,
                relevance: Some(best_relevance),
            });
        }

        BuiltContext { text, citations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn result(document_id: &str, filename: &str, content: &str, score: f32, page: Option<u32>) -> SearchResult {
        SearchResult {
            content: content.to_string(),
            combined_score: score,
            semantic_score: Some(score),
            keyword_score: None,
            semantic_rank: Some(0),
            keyword_rank: None,
            rrf_score: score,
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            chunk_id: format!("{document_id}_chunk_0"),
            chunk_index: 0,
            metadata: Map::new(),
            location: page.map(|p| crate::types::ChunkLocation {
                page_numbers: Some(vec![p]),
                char_start: 0,
                char_end: content.len(),
            }),
        }
    }

    #[test]
    fn empty_input_yields_sentinel() {
        let built = ContextBuilder::build(&[], &ContextBuilderOptions::default());
        assert_eq!(built.text, EMPTY_CONTEXT_SENTINEL);
        assert!(built.citations.is_empty());
    }

    #[test]
    fn citation_order_matches_text_group_numbering() {
        let results = vec![
            result("doc_a", "a.pdf", "first chunk", 0.9, Some(1)),
            result("doc_b", "b.pdf", "second chunk", 0.8, Some(2)),
        ];
        let built = ContextBuilder::build(&results, &ContextBuilderOptions::default());
        assert!(built.text.starts_with("[1] a.pdf"));
        assert_eq!(built.citations[0].document_id, "doc_a");
        assert_eq!(built.citations[1].document_id, "doc_b");
    }

    #[test]
    fn page_aggregation_dedupes_and_sorts() {
        let results = vec![
            result("doc_a", "a.pdf", "c1", 0.9, Some(5)),
            result("doc_a", "a.pdf", "c2", 0.7, Some(1)),
            result("doc_a", "a.pdf", "c3", 0.6, Some(3)),
        ];
        let built = ContextBuilder::build(&results, &ContextBuilderOptions::default());
        assert_eq!(built.citations.len(), 1);
        assert_eq!(built.citations[0].all_pages, Some(vec![1, 3, 5]));
        assert!(built.citations[0].page_number.is_none());
    }

    #[test]
    fn respects_token_budget() {
        let long_chunk = "x".repeat(10_000);
        let results = vec![result("doc_a", "a.pdf", &long_chunk, 0.9, None)];
        let options = ContextBuilderOptions {
            max_tokens: 100,
            reserved_tokens: 50,
            ..ContextBuilderOptions::default()
        };
        let built = ContextBuilder::build(&results, &options);
        assert_eq!(built.text, EMPTY_CONTEXT_SENTINEL);
    }
}
