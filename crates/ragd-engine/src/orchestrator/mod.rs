//! Converts a possibly context-dependent question into a high-quality
//! retrieval plus an optional faithfulness gate on the generator's output
//! (§4.4).

pub mod rewriter;

use crate::config::OrchestratorConfig;
use crate::context::{BuiltContext, ContextBuilder, ContextBuilderOptions};
use crate::error::{EngineError, EngineResult};
use crate::generator::{GenerationRequest, Generator};
use crate::search::hybrid::{HybridSearcher, SearchMode, SearchOptions};
use crate::types::{ChatTurn, Citation};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Rewritten,
    Original,
    LoweredThreshold,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalQuality {
    Excellent,
    Good,
    Poor,
    Irrelevant,
}

impl RetrievalQuality {
    fn from_relevance(relevance: f32) -> Self {
        if relevance >= 0.8 {
            Self::Excellent
        } else if relevance >= 0.6 {
            Self::Good
        } else if relevance >= 0.4 {
            Self::Poor
        } else {
            Self::Irrelevant
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorAnswer {
    pub answer_text: String,
    pub confidence: f32,
    pub retrieval_quality: RetrievalQuality,
    pub strategy_used: RetrievalStrategy,
    pub rewrites_attempted: usize,
    pub refinements_attempted: usize,
    pub citations: Vec<Citation>,
    pub metadata: std::collections::HashMap<String, String>,
}

impl OrchestratorAnswer {
    fn empty(strategy_used: RetrievalStrategy) -> Self {
        Self {
            answer_text: crate::context::EMPTY_CONTEXT_SENTINEL.to_string(),
            confidence: 0.0,
            retrieval_quality: RetrievalQuality::Irrelevant,
            strategy_used,
            rewrites_attempted: 0,
            refinements_attempted: 0,
            citations: Vec::new(),
            metadata: std::collections::HashMap::new(),
        }
    }
}

/// Intermediate result of retrieval plus the optional CRAG gate, carrying
/// everything [`OrchestratorAnswer`] needs except the generated text itself.
struct GatedRetrieval {
    context: BuiltContext,
    strategy_used: RetrievalStrategy,
    rewrites_attempted: usize,
    relevance: f32,
}

impl GatedRetrieval {
    fn into_answer(
        self,
        answer_text: String,
        refinements_attempted: usize,
        faithfulness: f32,
        alpha: f32,
        beta: f32,
    ) -> OrchestratorAnswer {
        let confidence = (alpha * self.relevance + beta * faithfulness).clamp(0.0, 1.0);
        OrchestratorAnswer {
            answer_text,
            confidence,
            retrieval_quality: RetrievalQuality::from_relevance(self.relevance),
            strategy_used: self.strategy_used,
            rewrites_attempted: self.rewrites_attempted,
            refinements_attempted,
            citations: self.context.citations,
            metadata: std::collections::HashMap::new(),
        }
    }
}

/// Handle returned by [`AgenticOrchestrator::answer_stream`]: drain
/// `fragments` for incremental display, then await `finish()` for the final
/// result shape (citations and confidence are not available mid-stream).
pub struct AnswerStream {
    pub fragments: crate::generator::TokenStream,
    done: tokio::sync::oneshot::Receiver<OrchestratorAnswer>,
}

impl AnswerStream {
    /// Resolves once the underlying generation (and any Self-RAG refinement)
    /// has completed. Callers should have fully drained `fragments` first.
    pub async fn finish(self) -> OrchestratorAnswer {
        self.done.await.unwrap_or_else(|_| OrchestratorAnswer::empty(RetrievalStrategy::None))
    }
}

pub struct AgenticOrchestrator {
    searcher: Arc<HybridSearcher>,
    generator: Arc<dyn Generator>,
    config: OrchestratorConfig,
}

impl AgenticOrchestrator {
    pub fn new(searcher: Arc<HybridSearcher>, generator: Arc<dyn Generator>, config: OrchestratorConfig) -> Self {
        Self {
            searcher,
            generator,
            config,
        }
    }

    pub async fn answer(&self, question: &str, history: &[ChatTurn]) -> OrchestratorAnswer {
        let Some(retrieval) = self.retrieve_and_gate(question, history).await else {
            tracing::info!(question, "no retrieval strategy produced results");
            return OrchestratorAnswer::empty(RetrievalStrategy::None);
        };

        let mut answer_text = self.generate_answer(question, &retrieval.context.text).await;
        let (answer_text_final, refinements_attempted, faithfulness) =
            self.self_rag_gate(answer_text.clone(), &retrieval.context.text).await;
        answer_text = answer_text_final;

        retrieval.into_answer(answer_text, refinements_attempted, faithfulness, self.config.confidence_alpha, self.config.confidence_beta)
    }

    /// Streaming variant of [`Self::answer`]: the retrieval, CRAG gate, and
    /// the final citation/confidence computation are identical; only the
    /// generation step yields incremental fragments. Self-RAG refinement,
    /// per §4.4 ("Streaming"), runs only after the stream completes — there
    /// is no way to judge faithfulness of a partial answer, and a refinement
    /// restart re-streams from scratch rather than patching the tail.
    ///
    /// Requires `self: Arc<Self>` because the fragment forwarding and the
    /// post-stream gate run as two halves of one background task that must
    /// outlive the borrow of any single call.
    pub async fn answer_stream(
        self: Arc<Self>,
        question: &str,
        history: &[ChatTurn],
    ) -> EngineResult<AnswerStream> {
        let Some(retrieval) = self.retrieve_and_gate(question, history).await else {
            return Err(EngineError::Internal("no retrieval strategy produced results".to_string()));
        };

        let prompt = format!("Context:\n{}\n\nQuestion: {question}\n\nAnswer:", retrieval.context.text);
        let request = GenerationRequest::new(prompt, "default");
        let mut inner = self.generator.generate_stream(&request).await?;

        let (fragment_tx, fragment_rx) = tokio::sync::mpsc::channel(16);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let mut collected = String::new();
            while let Some(fragment) = inner.next().await {
                collected.push_str(&fragment);
                if fragment_tx.send(fragment).await.is_err() {
                    // Caller dropped the receiver; stop forwarding but still
                    // run the gate so `finish()` has a coherent answer if awaited.
                }
            }
            let (answer_text, refinements_attempted, faithfulness) =
                orchestrator.self_rag_gate(collected, &retrieval.context.text).await;
            let answer = retrieval.into_answer(
                answer_text,
                refinements_attempted,
                faithfulness,
                orchestrator.config.confidence_alpha,
                orchestrator.config.confidence_beta,
            );
            let _ = done_tx.send(answer);
        });

        Ok(AnswerStream {
            fragments: crate::generator::TokenStream::new(fragment_rx),
            done: done_rx,
        })
    }

    /// Cascading retrieval followed by the optional CRAG relevance gate
    /// (§4.4). Returns `None` when no strategy produced results.
    async fn retrieve_and_gate(&self, question: &str, history: &[ChatTurn]) -> Option<GatedRetrieval> {
        let history_turns = self.config.rewrite_history_turns.max(4);

        let (retrieved, strategy_used, effective_query) =
            self.cascading_retrieve(question, history, history_turns).await;

        let mut results = retrieved?;

        let mut rewrites_attempted = 0usize;
        let mut relevance = 0.5f32;

        if self.config.enable_crag {
            let mut context = ContextBuilder::build(&results, &ContextBuilderOptions::default());
            loop {
                relevance = self.judge_relevance(&effective_query, &context.text).await;
                if relevance >= self.config.crag_relevance_threshold
                    || rewrites_attempted >= self.config.max_rewrites
                {
                    break;
                }
                rewrites_attempted += 1;
                let rewritten = self.crag_rewrite(&effective_query, &context.text).await;
                tracing::debug!(rewrite = %rewritten, attempt = rewrites_attempted, "CRAG corrective rewrite");
                results = self.retrieve(&rewritten, self.config.min_relevance).await.unwrap_or_default();
                context = ContextBuilder::build(&results, &ContextBuilderOptions::default());
            }
        }

        let context = ContextBuilder::build(&results, &ContextBuilderOptions::default());

        Some(GatedRetrieval {
            context,
            strategy_used,
            rewrites_attempted,
            relevance,
        })
    }

    /// Self-RAG faithfulness loop (§4.4). Returns the (possibly refined)
    /// answer text, the number of refinements performed, and the final
    /// faithfulness score used in the confidence blend.
    async fn self_rag_gate(&self, mut answer_text: String, context_text: &str) -> (String, usize, f32) {
        let mut refinements_attempted = 0usize;
        let mut faithfulness = 0.5f32;

        if self.config.enable_self_rag {
            loop {
                faithfulness = self.judge_faithfulness(&answer_text, context_text).await;
                if faithfulness >= self.config.faithfulness_threshold
                    || refinements_attempted >= self.config.max_refinements
                {
                    break;
                }
                refinements_attempted += 1;
                answer_text = self.refine_answer(&answer_text, context_text).await;
            }
        }

        (answer_text, refinements_attempted, faithfulness)
    }

    /// Cascading retrieval: rewritten → original → lowered threshold → none
    /// (§4.4). Returns the results used, the strategy tag, and the query
    /// text that produced them (needed by the CRAG loop).
    async fn cascading_retrieve(
        &self,
        question: &str,
        history: &[ChatTurn],
        history_turns: usize,
    ) -> (Option<Vec<crate::types::SearchResult>>, RetrievalStrategy, String) {
        if !history.is_empty() && rewriter::looks_like_follow_up(question) {
            let prompt = rewriter::build_rewrite_prompt(question, history, history_turns);
            let request = GenerationRequest {
                prompt,
                system_prompt: None,
                temperature: self.config.rewrite_temperature,
                max_tokens: self.config.rewrite_max_tokens,
                model: "default".to_string(),
            };
            if let Ok(response) = self.generator.generate(&request).await {
                let rewritten = response.content.trim().to_string();
                if !rewritten.is_empty() && rewritten != question {
                    if let Ok(results) = self.retrieve(&rewritten, self.config.min_relevance).await {
                        if !results.is_empty() {
                            return (Some(results), RetrievalStrategy::Rewritten, rewritten);
                        }
                    }
                }
            }
        }

        if let Ok(results) = self.retrieve(question, self.config.min_relevance).await {
            if !results.is_empty() {
                return (Some(results), RetrievalStrategy::Original, question.to_string());
            }
        }

        if self.config.enable_fallback_retrieval {
            if let Ok(results) = self.retrieve(question, self.config.fallback_min_relevance).await {
                if !results.is_empty() {
                    return (Some(results), RetrievalStrategy::LoweredThreshold, question.to_string());
                }
            }
        }

        (None, RetrievalStrategy::None, question.to_string())
    }

    async fn retrieve(&self, query: &str, min_score: f32) -> crate::error::EngineResult<Vec<crate::types::SearchResult>> {
        self.searcher
            .search(
                query,
                SearchOptions {
                    mode: SearchMode::Hybrid,
                    limit: 10,
                    min_score,
                    ..SearchOptions::default()
                },
            )
            .await
    }

    async fn judge_relevance(&self, query: &str, context: &str) -> f32 {
        let prompt = format!(
            "Question: {query}\n\nRetrieved context:\n{context}\n\n\
             On a scale of 0 to 1, how relevant is this context to answering the question? \
             Reply with only the number."
        );
        self.judge_score(prompt).await
    }

    async fn judge_faithfulness(&self, answer: &str, context: &str) -> f32 {
        let prompt = format!(
            "Context:\n{context}\n\nAnswer:\n{answer}\n\n\
             On a scale of 0 to 1, how faithfully does the answer reflect only the context above \
             (no unsupported claims)? Reply with only the number."
        );
        self.judge_score(prompt).await
    }

    async fn judge_score(&self, prompt: String) -> f32 {
        let request = GenerationRequest {
            prompt,
            system_prompt: None,
            temperature: 0.0,
            max_tokens: 16,
            model: "default".to_string(),
        };
        match self.generator.generate(&request).await {
            Ok(response) => rewriter::parse_score(&response.content, 0.5),
            Err(e) => {
                tracing::warn!(error = %e, "judge call failed; defaulting to neutral score");
                0.5
            }
        }
    }

    async fn crag_rewrite(&self, query: &str, poor_context: &str) -> String {
        let prompt = format!(
            "The following context was retrieved for the question \"{query}\" but judged \
             insufficiently relevant:\n{poor_context}\n\nPropose a better search query. \
             Reply with only the query."
        );
        let request = GenerationRequest {
            prompt,
            system_prompt: None,
            temperature: self.config.rewrite_temperature,
            max_tokens: self.config.rewrite_max_tokens,
            model: "default".to_string(),
        };
        match self.generator.generate(&request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content.trim().to_string(),
            _ => query.to_string(),
        }
    }

    async fn generate_answer(&self, question: &str, context: &str) -> String {
        let prompt = format!("Context:\n{context}\n\nQuestion: {question}\n\nAnswer:");
        let request = GenerationRequest::new(prompt, "default");
        match self.generator.generate(&request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(error = %e, "generation failed");
                String::new()
            }
        }
    }

    async fn refine_answer(&self, answer: &str, context: &str) -> String {
        let prompt = format!(
            "Context:\n{context}\n\nDraft answer:\n{answer}\n\n\
             Revise the draft so every claim is supported by the context above. Reply with only the revised answer."
        );
        let request = GenerationRequest::new(prompt, "default");
        match self.generator.generate(&request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            _ => answer.to_string(),
        }
    }
}
