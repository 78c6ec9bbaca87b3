// Sidebot Engine — Anthropic Claude Provider
// All Claude-specific SSE event parsing lives here. Tool results travel as
// user-role tool_result blocks, and stop reasons are renamed on the wire;
// both quirks are flattened into the engine's normal shapes before anything
// reaches the conversation loop.

use crate::error::{EngineError, EngineResult};
use crate::providers::{AiProvider, ChunkStream};
use crate::types::{
    truncate_utf8, ContentBlock, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderKind, Role, StreamChunk, TokenUsage, ToolCallDelta, ToolDefinition,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.kind.default_base_url().to_string());
        AnthropicProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
        }
    }

    /// Split out the system prompt and reshape history into Anthropic's
    /// message format (tool results become user-role tool_result blocks).
    fn format_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut formatted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    system = Some(msg.content.as_text());
                }
                Role::Tool => {
                    if let Some(tc_id) = &msg.tool_call_id {
                        formatted.push(json!({
                            "role": "user",
                            "content": [{
                                "type": "tool_result",
                                "tool_use_id": tc_id,
                                "content": msg.content.as_text(),
                            }]
                        }));
                    }
                }
                Role::Assistant => {
                    if let Some(tool_calls) = &msg.tool_calls {
                        let mut content_blocks: Vec<Value> = vec![];
                        let text = msg.content.as_text();
                        if !text.is_empty() {
                            content_blocks.push(json!({"type": "text", "text": text}));
                        }
                        for tc in tool_calls {
                            let input: Value =
                                serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                            content_blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.function.name,
                                "input": input,
                            }));
                        }
                        formatted.push(json!({
                            "role": "assistant",
                            "content": content_blocks,
                        }));
                    } else {
                        formatted.push(json!({
                            "role": "assistant",
                            "content": msg.content.as_text(),
                        }));
                    }
                }
                Role::User => match &msg.content {
                    MessageContent::Blocks(blocks) => {
                        let mut content_blocks: Vec<Value> = Vec::new();
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } => {
                                    content_blocks.push(json!({"type": "text", "text": text}));
                                }
                                ContentBlock::ImageUrl { image_url } => {
                                    // data:image/png;base64,… → base64 source;
                                    // anything else is passed as a url source.
                                    if let Some(rest) = image_url.url.strip_prefix("data:") {
                                        if let Some((media_type, b64)) =
                                            rest.split_once(";base64,")
                                        {
                                            content_blocks.push(json!({
                                                "type": "image",
                                                "source": {
                                                    "type": "base64",
                                                    "media_type": media_type,
                                                    "data": b64,
                                                }
                                            }));
                                        }
                                    } else {
                                        content_blocks.push(json!({
                                            "type": "image",
                                            "source": {
                                                "type": "url",
                                                "url": image_url.url,
                                            }
                                        }));
                                    }
                                }
                            }
                        }
                        formatted.push(json!({
                            "role": "user",
                            "content": content_blocks,
                        }));
                    }
                    MessageContent::Text(s) => {
                        formatted.push(json!({
                            "role": "user",
                            "content": s,
                        }));
                    }
                },
            }
        }

        (system, formatted)
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description.as_deref().unwrap_or(""),
                    "input_schema": t.function.parameters,
                })
            })
            .collect()
    }

    fn parse_stop_reason(s: &str) -> FinishReason {
        match s {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "tool_use" => FinishReason::ToolCalls,
            "max_tokens" => FinishReason::Length,
            "refusal" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    fn parse_sse_event(data: &str) -> Option<StreamChunk> {
        let v: Value = serde_json::from_str(data).ok()?;
        let event_type = v["type"].as_str()?;

        match event_type {
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => Some(StreamChunk {
                        delta_text: delta["text"].as_str().map(|s| s.to_string()),
                        ..Default::default()
                    }),
                    "input_json_delta" => Some(StreamChunk {
                        tool_calls: vec![ToolCallDelta {
                            index: v["index"].as_u64().unwrap_or(0) as usize,
                            id: None,
                            function_name: None,
                            arguments_delta: delta["partial_json"]
                                .as_str()
                                .map(|s| s.to_string()),
                        }],
                        ..Default::default()
                    }),
                    _ => None,
                }
            }
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    Some(StreamChunk {
                        tool_calls: vec![ToolCallDelta {
                            index: v["index"].as_u64().unwrap_or(0) as usize,
                            id: block["id"].as_str().map(|s| s.to_string()),
                            function_name: block["name"].as_str().map(|s| s.to_string()),
                            arguments_delta: None,
                        }],
                        ..Default::default()
                    })
                } else {
                    None
                }
            }
            "message_delta" => {
                let finish_reason = v["delta"]["stop_reason"]
                    .as_str()
                    .map(Self::parse_stop_reason);
                let usage = v.get("usage").and_then(|u| {
                    let output = u["output_tokens"].as_u64().unwrap_or(0);
                    (output > 0).then_some(TokenUsage {
                        input_tokens: 0,
                        output_tokens: output,
                        total_tokens: output,
                    })
                });
                Some(StreamChunk { finish_reason, usage, ..Default::default() })
            }
            "message_start" => {
                // Carries the input token count and the resolved model name.
                let msg = v.get("message");
                let model = msg.and_then(|m| m["model"].as_str()).map(|s| s.to_string());
                let usage = msg.and_then(|m| m.get("usage")).and_then(|u| {
                    let input = u["input_tokens"].as_u64().unwrap_or(0);
                    (input > 0).then_some(TokenUsage {
                        input_tokens: input,
                        output_tokens: 0,
                        total_tokens: input,
                    })
                });
                Some(StreamChunk { usage, model, ..Default::default() })
            }
            _ => None,
        }
    }
}

// ── AiProvider trait implementation ────────────────────────────────────

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        temperature: Option<f64>,
    ) -> EngineResult<ChunkStream> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let (system, formatted_messages) = Self::format_messages(messages);

        // claude-3-haiku caps at 4096; everything newer supports 8192+.
        let max_tokens = if model.contains("claude-3-haiku") { 4096 } else { 8192 };

        let mut body = json!({
            "model": model,
            "messages": formatted_messages,
            "max_tokens": max_tokens,
            "stream": true,
        });
        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }
        if let Some(temp) = temperature {
            body["temperature"] = json!(temp);
        }

        info!("[engine] Anthropic request to {} model={}", url, model);

        let response = self
            .client
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            error!(
                "[engine] Anthropic error {}: {}",
                status,
                truncate_utf8(&body_text, 500)
            );
            return Err(EngineError::provider(
                "anthropic",
                format!("API error {}: {}", status, truncate_utf8(&body_text, 200)),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel::<EngineResult<StreamChunk>>();
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(result) = byte_stream.next().await {
                let bytes = match result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::provider(
                            "anthropic",
                            format!("Stream read error: {}", e),
                        )));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Some(chunk) = Self::parse_sse_event(data) {
                            if tx.send(Ok(chunk)).is_err() {
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
