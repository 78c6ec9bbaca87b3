// Sidebot Engine — OpenAI-Compatible Provider
// Handles: OpenAI, Groq, Ollama, and any OpenAI-compatible REST API.
// All chat-completions SSE parsing lives here; the loop only ever sees
// normalized StreamChunks.

use crate::error::{EngineError, EngineResult};
use crate::providers::{AiProvider, ChunkStream};
use crate::types::{
    truncate_utf8, ContentBlock, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderKind, StreamChunk, TokenUsage, ToolCallDelta, ToolDefinition,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    kind: ProviderKind,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        OpenAiProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
            kind: config.kind,
        }
    }

    fn format_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let content_val = match &msg.content {
                    MessageContent::Text(s) => json!(s),
                    MessageContent::Blocks(blocks) => {
                        let parts: Vec<Value> = blocks
                            .iter()
                            .map(|b| match b {
                                ContentBlock::Text { text } => {
                                    json!({"type": "text", "text": text})
                                }
                                ContentBlock::ImageUrl { image_url } => json!({
                                    "type": "image_url",
                                    "image_url": {
                                        "url": image_url.url,
                                        "detail": image_url.detail.as_deref().unwrap_or("auto"),
                                    }
                                }),
                            })
                            .collect();
                        json!(parts)
                    }
                };
                let mut m = json!({
                    "role": msg.role,
                    "content": content_val,
                });
                if let Some(tc) = &msg.tool_calls {
                    m["tool_calls"] = json!(tc);
                }
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }
                m
            })
            .collect()
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": t.tool_type,
                    "function": {
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters,
                    }
                })
            })
            .collect()
    }

    /// Normalize the wire finish reason. Unknown values are preserved so
    /// the loop can surface them instead of silently dropping the round.
    fn parse_finish_reason(s: &str) -> FinishReason {
        match s {
            "stop" => FinishReason::Stop,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Parse a single SSE data line from an OpenAI-compatible stream.
    fn parse_sse_chunk(data: &str) -> Option<StreamChunk> {
        let v: Value = serde_json::from_str(data).ok()?;

        let model = v["model"].as_str().map(|s| s.to_string());

        // Usage-only final chunks (stream_options.include_usage) have an
        // empty choices array; keep them for metering.
        let usage = v.get("usage").and_then(|u| {
            let input = u["prompt_tokens"].as_u64().unwrap_or(0);
            let output = u["completion_tokens"].as_u64().unwrap_or(0);
            if input > 0 || output > 0 {
                Some(TokenUsage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: u["total_tokens"].as_u64().unwrap_or(input + output),
                })
            } else {
                None
            }
        });

        let choice = match v["choices"].get(0) {
            Some(c) => c,
            None => {
                return if usage.is_some() {
                    Some(StreamChunk { usage, model, ..Default::default() })
                } else {
                    None
                };
            }
        };
        let delta = &choice["delta"];
        let finish_reason = choice["finish_reason"]
            .as_str()
            .map(Self::parse_finish_reason);

        let delta_text = delta["content"].as_str().map(|s| s.to_string());

        let mut tool_calls = Vec::new();
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let func = &tc["function"];
                tool_calls.push(ToolCallDelta {
                    index: tc["index"].as_u64().unwrap_or(0) as usize,
                    id: tc["id"].as_str().map(|s| s.to_string()),
                    function_name: func["name"].as_str().map(|s| s.to_string()),
                    arguments_delta: func["arguments"].as_str().map(|s| s.to_string()),
                });
            }
        }

        Some(StreamChunk {
            delta_text,
            tool_calls,
            finish_reason,
            usage,
            model,
        })
    }
}

// ── AiProvider implementation ──────────────────────────────────────────

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Send a chat completion request and stream normalized chunks as the
    /// SSE lines arrive. One attempt only: transport failures are terminal
    /// for the round.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        temperature: Option<f64>,
    ) -> EngineResult<ChunkStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": model,
            "messages": Self::format_messages(messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }
        if let Some(temp) = temperature {
            body["temperature"] = json!(temp);
        }

        info!("[engine] OpenAI request to {} model={}", url, model);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            error!(
                "[engine] OpenAI error {}: {}",
                status,
                truncate_utf8(&body_text, 500)
            );
            return Err(EngineError::provider(
                "openai",
                format!("API error {}: {}", status, truncate_utf8(&body_text, 200)),
            ));
        }

        // Pump SSE lines into a channel so the caller sees each chunk the
        // moment it is parsed, not after the response completes.
        let (tx, rx) = mpsc::unbounded_channel::<EngineResult<StreamChunk>>();
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(result) = byte_stream.next().await {
                let bytes = match result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::provider(
                            "openai",
                            format!("Stream read error: {}", e),
                        )));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete SSE lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if let Some(data) = line.strip_prefix("data: ") {
                        if data == "[DONE]" {
                            return;
                        }
                        if let Some(chunk) = Self::parse_sse_chunk(data) {
                            if tx.send(Ok(chunk)).is_err() {
                                // Receiver dropped: the round was cancelled.
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
