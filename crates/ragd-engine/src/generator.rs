//! The answer-generating LLM is an external collaborator (§1 Non-goals: no
//! final-answer rendering lives here). This module defines the `Generator`
//! boundary the orchestrator drives and an HTTP-backed implementation.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub model: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.3,
            max_tokens: 1024,
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<usize>,
    pub finish_reason: Option<String>,
}

/// A stream of text deltas from a generation call.
pub struct TokenStream {
    receiver: mpsc::Receiver<String>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub async fn collect(mut self) -> String {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token);
        }
        result
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Generation boundary the orchestrator and context builder drive. The
/// concrete implementation may be any OpenAI/Anthropic-compatible HTTP
/// endpoint, or a test double.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> EngineResult<GenerationResponse>;

    async fn generate_stream(&self, request: &GenerationRequest) -> EngineResult<TokenStream>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageWire<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessageWire<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<usize>,
}

/// A chat-completions-compatible HTTP generator (OpenAI/Anthropic-proxy
/// shaped payloads). Connection failures, timeouts, and unknown models all
/// surface as `EngineError::ExternalService`; malformed bodies surface as
/// `EngineError::ExternalService` with a parse-error message.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

/// Generator calls default to a 120s timeout (§5 "Timeouts") — long enough
/// for a slow model to finish a non-streamed completion.
const GENERATOR_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(GENERATOR_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn build_messages<'a>(&self, request: &'a GenerationRequest) -> Vec<ChatMessageWire<'a>> {
        let mut messages = Vec::new();
        if let Some(sys) = &request.system_prompt {
            messages.push(ChatMessageWire {
                role: "system",
                content: sys,
            });
        }
        messages.push(ChatMessageWire {
            role: "user",
            content: &request.prompt,
        });
        messages
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> EngineResult<GenerationResponse> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: self.build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("generation request timed out: {e}")
            } else if e.is_connect() {
                format!("connection refused: {e}")
            } else {
                e.to_string()
            };
            EngineError::ExternalService {
                service: "generator".to_string(),
                message,
            }
        })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::ExternalService {
                service: "generator".to_string(),
                message: format!("model not found: {}", request.model),
            });
        }
        if !resp.status().is_success() {
            return Err(EngineError::ExternalService {
                service: "generator".to_string(),
                message: format!("HTTP {}", resp.status()),
            });
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| EngineError::ExternalService {
            service: "generator".to_string(),
            message: format!("parse error: {e}"),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ExternalService {
                service: "generator".to_string(),
                message: "parse error: empty choices array".to_string(),
            })?;

        Ok(GenerationResponse {
            content: choice.message.content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            tokens_used: parsed.usage.and_then(|u| u.total_tokens),
            finish_reason: choice.finish_reason,
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> EngineResult<TokenStream> {
        // Falls back to a single-shot call and replays it as one token; a
        // production deployment would parse the SSE stream instead.
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(response.content).await;
        Ok(TokenStream::new(rx))
    }
}
