// Sidebot Engine — Dashboard Tools
//
// The three capabilities the model gets over the data dashboard: run a
// query, update the filter/sort + title, reset to the unfiltered state.
// Dashboard state itself lives with the host UI; the engine only pushes
// updates through the sink trait.

use crate::datasource::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::schema::{ParamSpec, ParamType};
use crate::tool::Tool;
use crate::toolbox::Toolbox;
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ── Dashboard state ────────────────────────────────────────────────────

/// The filter/title context the model can mutate. An empty query means
/// "no filter, show the full dataset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardState {
    pub query: String,
    pub title: String,
}

/// Receives committed dashboard updates. The host UI implements this to
/// re-render; `SharedDashboard` is the in-process default.
#[async_trait]
pub trait DashboardSink: Send + Sync {
    async fn update(&self, query: &str, title: &str) -> EngineResult<()>;
}

/// Mutex-guarded dashboard state for hosts that poll rather than react.
#[derive(Default)]
pub struct SharedDashboard {
    state: Mutex<DashboardState>,
}

impl SharedDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl DashboardSink for SharedDashboard {
    async fn update(&self, query: &str, title: &str) -> EngineResult<()> {
        info!("[engine] Dashboard update: title={:?} query={:?}", title, query);
        let mut state = self.state.lock();
        state.query = query.to_string();
        state.title = title.to_string();
        Ok(())
    }
}

// ── Tool registration ──────────────────────────────────────────────────

fn require_str(args: &Value, tool: &str, param: &str) -> EngineResult<String> {
    args.get(param)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            EngineError::tool(tool, format!("missing required parameter '{}'", param))
        })
}

/// Build a toolbox carrying the standard dashboard tool set.
pub fn dashboard_toolbox(
    engine: Arc<dyn QueryEngine>,
    sink: Arc<dyn DashboardSink>,
) -> EngineResult<Toolbox> {
    let mut toolbox = Toolbox::new();
    register_dashboard_tools(&mut toolbox, engine, sink)?;
    Ok(toolbox)
}

/// Register `query`, `update_dashboard` and `reset_dashboard` into an
/// existing toolbox. Fails fast on schema or duplicate-name problems.
pub fn register_dashboard_tools(
    toolbox: &mut Toolbox,
    engine: Arc<dyn QueryEngine>,
    sink: Arc<dyn DashboardSink>,
) -> EngineResult<()> {
    let query_engine = engine.clone();
    toolbox.register(
        Tool::builder("query")
            .description("Perform a SQL query on the data, and return the results as JSON.")
            .param(
                ParamSpec::new("query", ParamType::String)
                    .described("A SQL query; must be a SELECT statement."),
            )
            .build(move |args| {
                let engine = query_engine.clone();
                async move {
                    let sql = require_str(&args, "query", "query")?;
                    let rows = engine.execute(&sql)?;
                    Ok(serde_json::from_str(&rows)?)
                }
            })?,
    )?;

    let update_engine = engine;
    let update_sink = sink.clone();
    toolbox.register(
        Tool::builder("update_dashboard")
            .description(
                "Modifies the data presented in the data dashboard, based on the \
                 given SQL query, and also updates the title.",
            )
            .param(
                ParamSpec::new("query", ParamType::String)
                    .described("A SQL query; must be a SELECT statement."),
            )
            .param(ParamSpec::new("title", ParamType::String).described(
                "A title to display at the top of the data dashboard, summarizing \
                 the intent of the SQL query.",
            ))
            .build(move |args| {
                let engine = update_engine.clone();
                let sink = update_sink.clone();
                async move {
                    let sql = require_str(&args, "update_dashboard", "query")?;
                    let title = require_str(&args, "update_dashboard", "title")?;
                    // Verify that the query is OK before committing anything
                    // to the dashboard; a bad query must leave it untouched.
                    engine.execute(&sql)?;
                    sink.update(&sql, &title).await?;
                    Ok(Value::Null)
                }
            })?,
    )?;

    let reset_sink = sink;
    toolbox.register(
        Tool::builder("reset_dashboard")
            .description(
                "Resets the filter/sort and title of the data dashboard back to \
                 its initial state.",
            )
            .build(move |_args| {
                let sink = reset_sink.clone();
                async move {
                    sink.update("", "").await?;
                    Ok(Value::Null)
                }
            })?,
    )?;

    Ok(())
}
