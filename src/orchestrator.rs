// Sidebot Engine — Conversation Loop
//
// The state machine driving one user turn: stream a model round, forward
// text deltas live, reassemble the full response, then either dispatch the
// requested tool calls and loop, or terminate on the model's finish signal.
//
// History discipline: the reconstructed assistant message and the tool
// results for a round are appended only after that round's stream is fully
// drained and all dispatches have joined. Cancelling the turn at any await
// point therefore leaves history without half-appended tool-call records.

use crate::error::EngineError;
use crate::providers::AnyProvider;
use crate::toolbox::Toolbox;
use crate::types::{
    ChatFragment, FinishReason, FunctionCall, Message, MessageContent, Role, StreamChunk,
    TokenUsage, ToolCall,
};
use async_stream::stream;
use futures::{Stream, StreamExt};
use log::{info, warn};
use std::collections::BTreeMap;

/// How many times an empty tool-call round is retried before the turn is
/// abandoned. A backend that keeps signalling `tool_calls` while sending
/// none would otherwise loop forever.
pub const MAX_EMPTY_TOOL_CALL_RETRIES: u32 = 2;

/// Emitted between tool-dispatch rounds so concatenated fragments from
/// different rounds stay readable.
const ROUND_SEPARATOR: &str = "\n\n";

const EMPTY_TOOL_CALLS_NOTICE: &str =
    "\n\n*The model requested tool calls but sent none; retrying.*\n\n";

fn inline_error(detail: &str) -> String {
    format!("**Error:** {}", detail)
}

// ── Chunk accumulation ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Merges the chunks of one assistant round back into a single logical
/// response. Merging is order-preserving concatenation per field: text
/// fragments append to one buffer, argument fragments append per tool-call
/// index.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
    model: Option<String>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        if let Some(text) = chunk.delta_text {
            self.text.push_str(&text);
        }
        for delta in chunk.tool_calls {
            let entry = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                entry.id = id;
            }
            if let Some(name) = delta.function_name {
                entry.name = name;
            }
            if let Some(args) = delta.arguments_delta {
                entry.arguments.push_str(&args);
            }
        }
        // First finish signal wins; well-behaved streams only send one.
        if self.finish_reason.is_none() {
            self.finish_reason = chunk.finish_reason;
        }
        if let Some(usage) = chunk.usage {
            let merged = self.usage.get_or_insert_with(TokenUsage::default);
            merged.input_tokens += usage.input_tokens;
            merged.output_tokens += usage.output_tokens;
            merged.total_tokens += usage.total_tokens;
        }
        if self.model.is_none() {
            self.model = chunk.model;
        }
    }

    pub fn assemble(self) -> AssembledResponse {
        let tool_calls = self
            .calls
            .into_values()
            .map(|partial| ToolCall {
                id: if partial.id.is_empty() {
                    // Some backends omit ids on streamed calls; synthesize
                    // one so call/result pairing stays intact.
                    format!("call_{}", uuid::Uuid::new_v4())
                } else {
                    partial.id
                },
                call_type: "function".into(),
                function: FunctionCall { name: partial.name, arguments: partial.arguments },
            })
            .collect();

        AssembledResponse {
            text: self.text,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
            model: self.model,
        }
    }
}

/// One fully reassembled assistant round.
#[derive(Debug)]
pub struct AssembledResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl AssembledResponse {
    /// The assistant message committed to history. An empty call list is
    /// recorded as an absent field, not an empty one; the two cases carry
    /// different meaning for finish classification.
    pub fn to_message(&self) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::Text(self.text.clone()),
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls.clone())
            },
            tool_call_id: None,
            name: None,
        }
    }
}

// ── The loop ───────────────────────────────────────────────────────────

/// Run one user turn: append the user message, then loop model rounds until
/// a terminal finish signal, yielding fragments as they arrive.
///
/// Every failure past this point is surfaced inline as an `**Error:**`
/// fragment and recorded in history, so the session stays usable for the
/// next submission. Only the empty-tool-call anomaly is retried; transport
/// failures are terminal for the turn.
pub fn perform_query<'a>(
    history: &'a mut Vec<Message>,
    user_input: impl Into<MessageContent>,
    toolbox: &'a Toolbox,
    provider: &'a AnyProvider,
    model: &'a str,
) -> impl Stream<Item = ChatFragment> + 'a {
    let content = user_input.into();

    stream! {
        history.push(Message {
            role: Role::User,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });

        let tools = toolbox.schema_list();
        let mut empty_retries = 0u32;
        let mut round = 0u32;

        'turn: loop {
            round += 1;
            info!(
                "[engine] Round {} model={} history={} messages",
                round,
                model,
                history.len()
            );

            let mut chunks = match provider.chat_stream(history, &tools, model, None).await {
                Ok(stream) => stream,
                Err(e) => {
                    let notice = inline_error(&e.to_string());
                    history.push(Message::text(Role::Assistant, notice.clone()));
                    yield ChatFragment::assistant(notice);
                    break 'turn;
                }
            };

            let mut acc = ResponseAccumulator::new();
            let mut transport_failure: Option<EngineError> = None;

            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        if let Some(text) = chunk.delta_text.as_deref() {
                            if !text.is_empty() {
                                yield ChatFragment::assistant(text.to_string());
                            }
                        }
                        acc.push(chunk);
                    }
                    Err(e) => {
                        transport_failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = transport_failure {
                let notice = inline_error(&e.to_string());
                history.push(Message::text(Role::Assistant, notice.clone()));
                yield ChatFragment::assistant(notice);
                break 'turn;
            }

            let response = acc.assemble();
            history.push(response.to_message());

            let failure: Option<String> = match &response.finish_reason {
                Some(FinishReason::Stop) => {
                    info!("[engine] Turn complete after {} round(s)", round);
                    break 'turn;
                }
                Some(FinishReason::ToolCalls) if !response.tool_calls.is_empty() => {
                    info!(
                        "[engine] Dispatching {} tool call(s)",
                        response.tool_calls.len()
                    );
                    let results = toolbox.dispatch_all(&response.tool_calls).await;
                    for result in results {
                        history.push(result.into_message());
                    }
                    yield ChatFragment::assistant(ROUND_SEPARATOR);
                    None
                }
                // A `tool_calls` finish with zero calls is a provider
                // anomaly, distinct from "calls field absent": warn inline
                // and retry the round instead of aborting the turn.
                Some(FinishReason::ToolCalls) => {
                    empty_retries += 1;
                    if empty_retries > MAX_EMPTY_TOOL_CALL_RETRIES {
                        Some("the model kept requesting tool calls without sending any".into())
                    } else {
                        warn!(
                            "[engine] Empty tool-call list (attempt {}/{})",
                            empty_retries, MAX_EMPTY_TOOL_CALL_RETRIES
                        );
                        yield ChatFragment::assistant(EMPTY_TOOL_CALLS_NOTICE.to_string());
                        None
                    }
                }
                Some(FinishReason::ContentFilter) => {
                    Some("the response was blocked by the provider's content filter".into())
                }
                Some(FinishReason::Length) => {
                    Some("the response was cut off because it reached the maximum output length".into())
                }
                Some(FinishReason::Other(reason)) => {
                    Some(format!("unexpected finish reason '{}' from the model", reason))
                }
                None => Some("the model stream ended without a finish signal".into()),
            };

            if let Some(detail) = failure {
                warn!("[engine] Turn failed: {}", detail);
                let notice = inline_error(&detail);
                history.push(Message::text(Role::Assistant, notice.clone()));
                yield ChatFragment::assistant(notice);
                break 'turn;
            }
        }
    }
}
