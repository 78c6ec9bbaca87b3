// ── Sidebot Engine: Error Types ────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (Serialization, Network, DB…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Tool failures are NOT errors at the loop boundary: the wrapper in
//     tool.rs converts them into structured result payloads. Only
//     registration-time schema failures are allowed to abort startup.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// AI provider HTTP or API-level failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Tool execution failure, raised inside tool handlers and captured
    /// by the wrapper before it can reach the conversation loop.
    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Tool schema construction failure. Fatal at registration time.
    #[error("Schema error: {tool}: {message}")]
    Schema { tool: String, message: String },

    /// A SQL statement was rejected before reaching the query engine.
    #[error("Query error: {0}")]
    Query(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create a tool error with name and message.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    /// Create a schema error with tool name and message.
    pub fn schema(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema { tool: tool.into(), message: message.into() }
    }
}

// ── Bridge: String → EngineError ───────────────────────────────────────────
// Allows `?` on ad-hoc `Result<T, String>` expressions inside tool handlers
// that return `EngineResult<T>`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
