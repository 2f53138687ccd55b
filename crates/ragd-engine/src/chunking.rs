//! Default chunking pipeline stage. Out of scope per the distilled spec is
//! chunking *algorithm design*; this is the reference sliding-window
//! implementation every ingest path uses unless a caller supplies its own.

use crate::types::Chunk;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct RawChunk {
    text: String,
    index: usize,
    heading: Option<String>,
    start_offset: usize,
    end_offset: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        }
    }

    fn raw_chunk(&self, text: &str) -> Vec<RawChunk> {
        if text.len() <= self.chunk_size {
            if text.len() < self.min_chunk_size {
                return Vec::new();
            }
            return vec![RawChunk {
                text: text.to_string(),
                index: 0,
                heading: None,
                start_offset: 0,
                end_offset: text.len(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < text.len() {
            let raw_end = (start + self.chunk_size).min(text.len());
            let end = snap_to_char_boundary(text, raw_end);

            let actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };

            let chunk_text = &text[start..actual_end];

            if chunk_text.len() >= self.min_chunk_size {
                let heading = extract_heading(chunk_text);
                chunks.push(RawChunk {
                    text: chunk_text.to_string(),
                    index,
                    heading,
                    start_offset: start,
                    end_offset: actual_end,
                });
                index += 1;
            }

            let step = if actual_end - start > self.chunk_overlap {
                actual_end - start - self.chunk_overlap
            } else {
                actual_end - start
            };

            let raw_next = start + step;
            start = snap_to_char_boundary(text, raw_next);
            if start >= text.len() {
                break;
            }
        }

        chunks
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let raw_search_start = preferred_end.saturating_sub(200).max(start);
        let search_start = snap_to_char_boundary(text, raw_search_start);
        let safe_end = snap_to_char_boundary(text, preferred_end);

        if search_start >= safe_end {
            return safe_end;
        }

        let search_region = &text[search_start..safe_end];

        if let Some(pos) = search_region.rfind("\n\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(". ") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(".\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind('\n') {
            return search_start + pos + 1;
        }
        if let Some(pos) = search_region.rfind(' ') {
            return search_start + pos + 1;
        }

        safe_end
    }

    /// Split `text` into `Chunk`s for `document_id`. If `doc_title`/`doc_source`
    /// are given and contextual ingestion is enabled by the caller, a short
    /// gloss is attached via `context` (see `Chunk::indexable_text`).
    pub fn chunk(
        &self,
        document_id: &str,
        text: &str,
        doc_title: Option<&str>,
        doc_source: Option<&str>,
        with_context: bool,
    ) -> Vec<Chunk> {
        let raw = self.raw_chunk(text);

        let doc_summary: String = text
            .split("\n\n")
            .next()
            .unwrap_or("")
            .chars()
            .take(200)
            .collect();

        raw.into_iter()
            .map(|rc| {
                let context = if with_context {
                    let section = rc
                        .heading
                        .as_deref()
                        .filter(|h| !h.is_empty())
                        .unwrap_or(&doc_summary);
                    Some(format!(
                        "Document: \"{}\". Source: {}. Section: {}.",
                        doc_title.unwrap_or("untitled"),
                        doc_source.unwrap_or("unknown"),
                        section
                    ))
                } else {
                    None
                };

                Chunk {
                    chunk_id: Chunk::make_id(document_id, rc.index),
                    document_id: document_id.to_string(),
                    text: rc.text,
                    chunk_index: rc.index,
                    char_start: rc.start_offset,
                    char_end: rc.end_offset,
                    page_numbers: None,
                    section: rc.heading,
                    context,
                    metadata: HashMap::new(),
                }
            })
            .collect()
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1750, 200, 100)
    }
}

fn extract_heading(text: &str) -> Option<String> {
    let first_line = text.lines().next()?;
    if first_line.starts_with('#') {
        Some(first_line.trim_start_matches('#').trim().to_string())
    } else {
        None
    }
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary (rounding down).
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_below_min_size_is_dropped() {
        let chunker = TextChunker::new(1000, 100, 50);
        let chunks = chunker.chunk("doc1", "too short", None, None, false);
        assert!(chunks.is_empty());
    }

    #[test]
    fn single_chunk_when_under_chunk_size() {
        let chunker = TextChunker::new(1000, 100, 10);
        let text = "A paragraph of reasonable length that stays under the chunk size limit.";
        let chunks = chunker.chunk("doc1", text, None, None, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "doc1_chunk_0");
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn splits_long_text_with_overlap() {
        let chunker = TextChunker::new(200, 40, 20);
        let text = "word ".repeat(200);
        let chunks = chunker.chunk("doc1", &text, None, None, false);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end);
        }
    }

    #[test]
    fn contextual_chunks_carry_gloss_separately_from_text() {
        let chunker = TextChunker::new(1000, 100, 10);
        let text = "# Intro\nSome narrative content about the topic at hand.";
        let chunks = chunker.chunk("doc1", text, Some("Report"), Some("report.pdf"), true);
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert!(chunk.context.is_some());
        assert!(chunk.indexable_text().starts_with("Document: \"Report\"."));
        assert!(chunk.text.starts_with("# Intro"));
    }
}
