// Sidebot Engine — Toolbox
//
// Named registry of tool wrappers. Resolves incoming tool calls by name and
// produces the protocol-level tool result. Unknown names and tool failures
// both come back as well-formed results; dispatch never raises.

use crate::error::{EngineError, EngineResult};
use crate::tool::{failure_payload, Tool};
use crate::types::{ToolCall, ToolDefinition, ToolResult};
use log::{info, warn};

#[derive(Default)]
pub struct Toolbox {
    tools: Vec<Tool>,
}

impl Toolbox {
    pub fn new() -> Self {
        Toolbox { tools: Vec::new() }
    }

    /// Register a tool. Duplicate names are fatal at registration time.
    pub fn register(&mut self, tool: Tool) -> EngineResult<()> {
        if self.get(tool.name()).is_some() {
            return Err(EngineError::schema(
                tool.name(),
                "a tool with this name is already registered",
            ));
        }
        info!("[engine] Registered tool: {}", tool.name());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The combined descriptor list handed to the model, in registration
    /// order.
    pub fn schema_list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    /// Execute a single tool call. An unknown tool name yields a failure
    /// payload in the result content, never an error.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let name = &call.function.name;
        match self.get(name) {
            Some(tool) => {
                let out = tool.invoke(&call.function.arguments).await;
                ToolResult {
                    tool_call_id: call.id.clone(),
                    name: name.clone(),
                    content: out.content,
                    success: out.success,
                }
            }
            None => {
                warn!("[engine] Unknown tool requested: {}", name);
                ToolResult {
                    tool_call_id: call.id.clone(),
                    name: name.clone(),
                    content: failure_payload(&EngineError::tool(
                        name,
                        format!("Unknown tool: {}", name),
                    )),
                    success: false,
                }
            }
        }
    }

    /// Execute every call in one assistant turn. Calls run concurrently but
    /// results come back in the order the calls were issued, so history
    /// appends stay coherent for the model.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        futures::future::join_all(calls.iter().map(|c| self.dispatch(c))).await
    }
}
