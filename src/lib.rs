// Sidebot Engine — crate root
//
// An LLM-backed chat engine that turns natural-language questions into SQL
// filtering/sorting commands against a fixed tabular dataset and drives a
// data dashboard through tool calls. The host UI registers tools, seeds a
// session, and renders the fragment stream each turn yields; everything
// vendor-specific stays behind the provider seam.

pub mod dashboard;
pub mod datasource;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod schema;
pub mod session;
pub mod tool;
pub mod toolbox;
pub mod types;

pub use dashboard::{dashboard_toolbox, DashboardSink, DashboardState, SharedDashboard};
pub use datasource::{ColumnInfo, ColumnKind, Dataset, QueryEngine, SqliteQueryEngine};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{perform_query, ResponseAccumulator};
pub use providers::{AiProvider, AnyProvider};
pub use schema::{ParamSpec, ParamType, RecordField};
pub use session::ChatSession;
pub use tool::Tool;
pub use toolbox::Toolbox;
pub use types::{
    ChatFragment, ContentBlock, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderKind, Role, StreamChunk, ToolCall, ToolCallDelta, ToolDefinition, ToolResult,
};
