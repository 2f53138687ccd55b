//! Composes dense and keyword results into a single ranking (§4.2).

use crate::config::SearchConfig;
use crate::embeddings::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::store::keyword::{normalise_bm25, KeywordQueryError};
use crate::store::IndexStore;
use crate::types::{ChunkLocation, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Semantic,
    Keyword,
}

/// Cooperative cancellation signal shared across the two modality calls of
/// one hybrid search (§5 "Cancellation").
#[derive(Clone)]
pub struct Cancellation(Arc<tokio::sync::Notify>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    pub fn cancel(&self) {
        self.0.notify_waiters();
    }

    async fn race<T>(&self, fut: impl std::future::Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.0.notified() => None,
            out = fut => Some(out),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SearchOptions<'a> {
    pub mode: SearchMode,
    pub limit: usize,
    pub min_score: f32,
    pub filter: Option<&'a Filter>,
    pub weight_semantic: Option<f32>,
    pub weight_keyword: Option<f32>,
    pub rrf_k: Option<usize>,
    pub cancellation: Option<Cancellation>,
}

impl<'a> Default for SearchOptions<'a> {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            limit: 10,
            min_score: 0.0,
            filter: None,
            weight_semantic: None,
            weight_keyword: None,
            rrf_k: None,
            cancellation: None,
        }
    }
}

pub struct HybridSearcher {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl HybridSearcher {
    pub fn new(store: Arc<IndexStore>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn search(&self, query: &str, options: SearchOptions<'_>) -> EngineResult<Vec<SearchResult>> {
        match options.mode {
            SearchMode::Semantic => self.search_semantic(query, &options).await,
            SearchMode::Keyword => self.search_keyword(query, &options).await,
            SearchMode::Hybrid => self.search_hybrid(query, &options).await,
        }
    }

    async fn embed_query(&self, query: &str, cancellation: &Option<Cancellation>) -> EngineResult<Vec<f32>> {
        let fut = self.embedder.embed_query(query);
        match cancellation {
            Some(c) => c.race(fut).await.ok_or(EngineError::Cancelled)?,
            None => fut.await,
        }
    }

    async fn search_semantic(&self, query: &str, options: &SearchOptions<'_>) -> EngineResult<Vec<SearchResult>> {
        let vector = self.embed_query(query, &options.cancellation).await?;
        let hits = self
            .store
            .vector_search(&vector, options.limit, options.filter, self.config.exact_filter_multiple)
            .await?;

        let mut results = Vec::new();
        for (rank, hit) in hits.into_iter().enumerate() {
            if hit.score < options.min_score {
                continue;
            }
            results.push(SearchResult {
                content: hit.content,
                combined_score: hit.score,
                semantic_score: Some(hit.score),
                keyword_score: None,
                semantic_rank: Some(rank),
                keyword_rank: None,
                rrf_score: hit.score,
                document_id: hit.document_id,
                filename: hit.filename,
                chunk_id: hit.chunk_id,
                chunk_index: hit.chunk_index,
                metadata: hit.metadata,
                location: Some(location_from_chunk(hit.page_numbers, hit.char_start, hit.char_end)),
            });
        }
        Ok(results)
    }

    async fn search_keyword(&self, query: &str, options: &SearchOptions<'_>) -> EngineResult<Vec<SearchResult>> {
        let hits = self
            .store
            .keyword_search(query, options.limit)
            .await
            .map_err(keyword_query_err)?;

        let divisor = self.config.bm25_divisor;
        let mut results = Vec::new();
        for hit in hits {
            let s_norm = normalise_bm25(hit.bm25_score, divisor);
            if s_norm < options.min_score {
                continue;
            }
            results.push(SearchResult {
                content: hit.content,
                combined_score: s_norm,
                semantic_score: None,
                keyword_score: Some(s_norm),
                semantic_rank: None,
                keyword_rank: Some(hit.rank),
                rrf_score: s_norm,
                document_id: hit.document_id,
                filename: hit.filename,
                chunk_id: hit.chunk_id,
                chunk_index: hit.chunk_index,
                metadata: HashMap::new(),
                location: Some(location_from_chunk(hit.page_numbers, hit.char_start, hit.char_end)),
            });
        }
        Ok(results)
    }

    async fn search_hybrid(&self, query: &str, options: &SearchOptions<'_>) -> EngineResult<Vec<SearchResult>> {
        let overfetch = options.limit * self.config.overfetch_multiplier;
        let rrf_k = options.rrf_k.unwrap_or(self.config.rrf_k);
        let w_sem = options.weight_semantic.unwrap_or(self.config.weight_semantic);
        let w_kw = options.weight_keyword.unwrap_or(self.config.weight_keyword);

        let vector = self.embed_query(query, &options.cancellation).await?;

        let sem_fut = self
            .store
            .vector_search(&vector, overfetch, options.filter, self.config.exact_filter_multiple);
        let kw_query = query.to_string();
        let store = self.store.clone();
        let kw_fut = async move { store.keyword_search(&kw_query, overfetch).await.map_err(keyword_query_err) };

        let (sem_hits, kw_hits) = match &options.cancellation {
            Some(c) => {
                let sem = c.race(sem_fut).await.ok_or(EngineError::Cancelled)??;
                let kw = c.race(kw_fut).await.ok_or(EngineError::Cancelled)??;
                (sem, kw)
            }
            None => {
                let (sem, kw) = tokio::join!(sem_fut, kw_fut);
                (sem?, kw?)
            }
        };

        let divisor = self.config.bm25_divisor;

        #[derive(Default)]
        struct Merged {
            content: String,
            document_id: String,
            filename: String,
            chunk_index: usize,
            page_numbers: Option<Vec<u32>>,
            char_start: usize,
            char_end: usize,
            metadata: HashMap<String, String>,
            semantic_score: Option<f32>,
            keyword_score: Option<f32>,
            semantic_rank: Option<usize>,
            keyword_rank: Option<usize>,
        }

        let mut merged: HashMap<String, Merged> = HashMap::new();

        for (rank, hit) in sem_hits.into_iter().enumerate() {
            let entry = merged.entry(hit.chunk_id.clone()).or_default();
            entry.content = hit.content;
            entry.document_id = hit.document_id;
            entry.filename = hit.filename;
            entry.chunk_index = hit.chunk_index;
            entry.page_numbers = hit.page_numbers;
            entry.char_start = hit.char_start;
            entry.char_end = hit.char_end;
            entry.metadata = hit.metadata;
            entry.semantic_score = Some(hit.score);
            entry.semantic_rank = Some(rank);
        }

        for (rank, hit) in kw_hits.into_iter().enumerate() {
            let s_norm = normalise_bm25(hit.bm25_score, divisor);
            let entry = merged.entry(hit.chunk_id.clone()).or_default();
            if entry.content.is_empty() {
                entry.content = hit.content;
            }
            if entry.document_id.is_empty() {
                entry.document_id = hit.document_id;
            }
            if entry.filename.is_empty() {
                entry.filename = hit.filename;
                entry.chunk_index = hit.chunk_index;
                entry.page_numbers = hit.page_numbers;
                entry.char_start = hit.char_start;
                entry.char_end = hit.char_end;
            }
            entry.keyword_score = Some(s_norm);
            entry.keyword_rank = Some(rank);
        }

        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .map(|(chunk_id, m)| {
                let mut rrf_score = 0.0f32;
                if let Some(r) = m.semantic_rank {
                    rrf_score += 1.0 / (rrf_k as f32 + r as f32 + 1.0);
                }
                if let Some(r) = m.keyword_rank {
                    rrf_score += 1.0 / (rrf_k as f32 + r as f32 + 1.0);
                }

                let mut weight_sum = 0.0f32;
                let mut combined = 0.0f32;
                if let Some(s) = m.semantic_score {
                    combined += w_sem * s;
                    weight_sum += w_sem;
                }
                if let Some(s) = m.keyword_score {
                    combined += w_kw * s;
                    weight_sum += w_kw;
                }
                let combined_score = if weight_sum > 0.0 { combined } else { 0.0 };

                SearchResult {
                    content: m.content,
                    combined_score,
                    semantic_score: m.semantic_score,
                    keyword_score: m.keyword_score,
                    semantic_rank: m.semantic_rank,
                    keyword_rank: m.keyword_rank,
                    rrf_score,
                    document_id: m.document_id,
                    filename: m.filename,
                    chunk_id,
                    chunk_index: m.chunk_index,
                    metadata: m.metadata,
                    location: Some(location_from_chunk(m.page_numbers, m.char_start, m.char_end)),
                }
            })
            .filter(|r| r.combined_score >= options.min_score || r.rrf_score >= options.min_score)
            .collect();

        // Primary key: rrf_score descending. Ties: semantic_rank asc, keyword_rank asc, chunk_id asc.
        results.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.semantic_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.semantic_rank.unwrap_or(usize::MAX))
                })
                .then_with(|| {
                    a.keyword_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.keyword_rank.unwrap_or(usize::MAX))
                })
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        results.truncate(options.limit);
        Ok(results)
    }
}

fn keyword_query_err(e: KeywordQueryError) -> EngineError {
    match e {
        KeywordQueryError::Syntax { message, position } => EngineError::QueryParse { message, position },
        KeywordQueryError::Backend(message) => EngineError::BackendUnavailable {
            backend: "keyword".to_string(),
            message,
        },
    }
}

/// Builds a `ChunkLocation` from raw page/char-span data, used once a hit's
/// full chunk record (not just its search-time projection) is available.
pub fn location_from_chunk(page_numbers: Option<Vec<u32>>, char_start: usize, char_end: usize) -> ChunkLocation {
    ChunkLocation {
        page_numbers,
        char_start,
        char_end,
    }
}
