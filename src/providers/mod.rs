// Sidebot Engine — Chat Transport Registry
// AnyProvider wraps Box<dyn AiProvider> so adding a new backend never
// requires touching the conversation loop — implement the trait, add a
// factory arm if the wire format is unique.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::error::EngineResult;
use crate::types::{Message, ProviderConfig, ProviderKind, StreamChunk, ToolDefinition};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Live stream of normalized chunks for one model round. Each awaited item
/// is a suspension point; dropping the stream cancels the transfer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = EngineResult<StreamChunk>> + Send>>;

/// The one seam between the engine and a vendor chat API. Implementations
/// normalize their envelope into `StreamChunk`s (text delta, tool-call
/// delta, finish signal); the conversation loop never branches on which
/// backend is in use.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Open a streaming completion request. Transport failures after the
    /// stream starts arrive as `Err` items inside the stream.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        temperature: Option<f64>,
    ) -> EngineResult<ChunkStream>;
}

// ── Provider factory ───────────────────────────────────────────────────

/// Type-erased chat transport. Callers hold `AnyProvider` and call
/// `.chat_stream()` without knowing which concrete backend is in use.
pub struct AnyProvider(Box<dyn AiProvider>);

impl AnyProvider {
    /// Wrap a custom backend (used by hosts with their own transport and by
    /// the test suite's scripted provider).
    pub fn new(provider: Box<dyn AiProvider>) -> Self {
        AnyProvider(provider)
    }

    /// Construct the right concrete provider from a `ProviderConfig`.
    /// Everything except Anthropic speaks the OpenAI-compatible wire format
    /// and routes through the catch-all arm.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let provider: Box<dyn AiProvider> = match config.kind {
            ProviderKind::Anthropic => Box::new(AnthropicProvider::new(config)),
            _ => Box::new(OpenAiProvider::new(config)),
        };
        AnyProvider(provider)
    }

    /// Construct a provider by model name alone, using the default base URL
    /// for whichever vendor serves that model family.
    pub fn for_model(model: &str, api_key: impl Into<String>) -> Self {
        Self::from_config(&ProviderConfig {
            kind: ProviderKind::for_model(model),
            api_key: api_key.into(),
            base_url: None,
        })
    }

    pub async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        temperature: Option<f64>,
    ) -> EngineResult<ChunkStream> {
        self.0.chat_stream(messages, tools, model, temperature).await
    }

    /// The ProviderKind discriminant of the underlying provider.
    pub fn kind(&self) -> ProviderKind {
        self.0.kind()
    }
}
