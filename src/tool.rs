// Sidebot Engine — Tool Wrapper
//
// Wraps an async handler into a uniform invocable unit carrying its name and
// derived schema. `invoke` guarantees the conversation loop never crashes
// because of a single tool: argument parse failures and handler errors are
// converted into structured failure payloads that flow back to the model as
// ordinary tool results.

use crate::error::{EngineError, EngineResult};
use crate::schema::{build_parameters, ParamSpec};
use crate::types::{truncate_utf8, FunctionDefinition, ToolDefinition};
use futures::future::BoxFuture;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Type-erased async tool handler. Receives the parsed argument object and
/// returns a JSON-serializable payload.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, EngineResult<Value>> + Send + Sync>;

/// Raw outcome of one `invoke`, before the toolbox attaches call identity.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub success: bool,
}

// ── Tool ───────────────────────────────────────────────────────────────

pub struct Tool {
    name: String,
    definition: ToolDefinition,
    handler: ToolHandler,
}

impl Tool {
    /// Start declaring a tool. The descriptor is derived when `build` is
    /// called and is immutable afterwards.
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder { name: name.into(), description: None, params: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Parse the raw argument JSON and run the handler.
    ///
    /// Never returns an error: any failure (malformed arguments, handler
    /// error) is serialized into a `{"success": false, …}` payload so the
    /// model can see and react to it.
    pub async fn invoke(&self, arguments: &str) -> ToolOutput {
        info!(
            "[engine] Executing tool: {} args={}",
            self.name,
            truncate_utf8(arguments, 200)
        );

        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "[engine] Malformed tool args for '{}' — JSON parse failed: {}",
                    self.name, e
                );
                return ToolOutput {
                    content: failure_payload(&EngineError::tool(
                        &self.name,
                        format!("invalid arguments JSON: {}", e),
                    )),
                    success: false,
                };
            }
        };

        match (self.handler)(args).await {
            Ok(value) => match serde_json::to_string(&value) {
                Ok(content) => ToolOutput { content, success: true },
                Err(e) => ToolOutput {
                    content: failure_payload(&EngineError::Serialization(e)),
                    success: false,
                },
            },
            Err(e) => {
                warn!("[engine] Tool '{}' failed: {}", self.name, e);
                ToolOutput { content: failure_payload(&e), success: false }
            }
        }
    }
}

/// Serialize a failure into the payload shape the model receives. The
/// `traceback` field carries the error source chain.
pub(crate) fn failure_payload(error: &EngineError) -> String {
    let mut chain = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(s) = source {
        chain.push(s.to_string());
        source = s.source();
    }

    json!({
        "success": false,
        "error": error.to_string(),
        "traceback": chain.join("\ncaused by: "),
    })
    .to_string()
}

// ── Builder ────────────────────────────────────────────────────────────

pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    params: Vec<ParamSpec>,
}

impl ToolBuilder {
    /// The tool's top-level description, shown to the model.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Attach the handler and derive the schema. Schema failures are fatal
    /// here, at registration time, never at call time.
    pub fn build<F, Fut>(self, handler: F) -> EngineResult<Tool>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EngineResult<Value>> + Send + 'static,
    {
        let parameters = build_parameters(&self.name, &self.params)?;
        let definition = ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description,
                parameters,
            },
        };
        Ok(Tool {
            name: self.name,
            definition,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        })
    }
}
