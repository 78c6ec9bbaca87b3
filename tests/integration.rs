// Sidebot Engine — integration tests
// Single test binary (see Cargo.toml [[test]]). Modules mirror the crate:
// schema derivation, tool wrapping, toolbox dispatch, chunk accumulation,
// the conversation loop against a scripted provider, the query engine, and
// the prompt renderer.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sidebot::datasource::ensure_select;
use sidebot::orchestrator::ResponseAccumulator;
use sidebot::providers::{AiProvider, AnyProvider, ChunkStream};
use sidebot::types::{FinishReason, FunctionCall, StreamChunk, ToolCallDelta};
use sidebot::{
    dashboard_toolbox, perform_query, prompt, ChatFragment, DashboardSink, EngineError,
    EngineResult, Message, ParamSpec, ParamType, QueryEngine, RecordField, Role,
    SharedDashboard, SqliteQueryEngine, Tool, ToolCall, ToolDefinition, Toolbox,
};

// ── Shared helpers ─────────────────────────────────────────────────────

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn text_chunk(text: &str) -> StreamChunk {
    StreamChunk { delta_text: Some(text.to_string()), ..Default::default() }
}

fn finish_chunk(reason: FinishReason) -> StreamChunk {
    StreamChunk { finish_reason: Some(reason), ..Default::default() }
}

fn call_chunk(index: usize, id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index,
            id: Some(id.to_string()),
            function_name: Some(name.to_string()),
            arguments_delta: Some(arguments.to_string()),
        }],
        ..Default::default()
    }
}

fn arg_delta(index: usize, fragment: &str) -> StreamChunk {
    StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index,
            id: None,
            function_name: None,
            arguments_delta: Some(fragment.to_string()),
        }],
        ..Default::default()
    }
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        call_type: "function".into(),
        function: FunctionCall { name: name.to_string(), arguments: arguments.to_string() },
    }
}

/// Scripted transport: each chat_stream call pops the next round's chunks.
struct MockProvider {
    rounds: Mutex<VecDeque<Vec<EngineResult<StreamChunk>>>>,
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> sidebot::ProviderKind {
        sidebot::ProviderKind::Custom
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _model: &str,
        _temperature: Option<f64>,
    ) -> EngineResult<ChunkStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let round = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(round)))
    }
}

fn mock_provider(
    rounds: Vec<Vec<EngineResult<StreamChunk>>>,
) -> (AnyProvider, Arc<AtomicUsize>) {
    let requests = Arc::new(AtomicUsize::new(0));
    let provider = MockProvider {
        rounds: Mutex::new(rounds.into_iter().collect()),
        requests: requests.clone(),
    };
    (AnyProvider::new(Box::new(provider)), requests)
}

/// Query engine wrapper that counts execute() calls.
struct CountingEngine {
    inner: SqliteQueryEngine,
    calls: Arc<AtomicUsize>,
}

impl QueryEngine for CountingEngine {
    fn execute(&self, sql: &str) -> EngineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql)
    }
}

fn tips_engine() -> SqliteQueryEngine {
    let engine = SqliteQueryEngine::open_in_memory().unwrap();
    engine
        .execute_batch(
            "CREATE TABLE tips (
                total_bill REAL,
                tip REAL,
                sex TEXT,
                smoker TEXT,
                day TEXT,
                time TEXT,
                size INTEGER
            );
            INSERT INTO tips VALUES
                (16.99, 1.01, 'Female', 'No', 'Sun', 'Dinner', 2),
                (10.34, 1.66, 'Male', 'No', 'Sun', 'Dinner', 3),
                (23.68, 3.31, 'Male', 'Yes', 'Sat', 'Dinner', 3),
                (24.59, 3.61, 'Female', 'No', 'Thur', 'Lunch', 4);",
        )
        .unwrap();
    engine
}

// ── Schema derivation ──────────────────────────────────────────────────

mod schema {
    use super::*;

    fn noop_tool(name: &str, params: Vec<ParamSpec>) -> Tool {
        let mut builder = Tool::builder(name);
        for p in params {
            builder = builder.param(p);
        }
        builder.build(|_args| async move { Ok(Value::Null) }).unwrap()
    }

    #[test]
    fn described_string_param() {
        let tool = noop_tool(
            "greet",
            vec![ParamSpec::new("who", ParamType::String).described("description")],
        );
        let params = &tool.definition().function.parameters;
        assert_eq!(params["properties"]["who"]["type"], "string");
        assert_eq!(params["properties"]["who"]["description"], "description");
        assert_eq!(params["required"], json!(["who"]));
    }

    #[test]
    fn required_is_exactly_params_without_defaults() {
        let tool = noop_tool(
            "f",
            vec![
                ParamSpec::new("a", ParamType::Integer),
                ParamSpec::new("b", ParamType::String).optional(),
                ParamSpec::new("c", ParamType::String).described("The c string"),
            ],
        );
        let params = &tool.definition().function.parameters;
        assert_eq!(params["required"], json!(["a", "c"]));
        assert_eq!(params["properties"]["b"]["type"], "string");
    }

    #[test]
    fn docstring_becomes_tool_description() {
        let tool = Tool::builder("doc")
            .description("Docstring for the function")
            .build(|_args| async move { Ok(Value::Null) })
            .unwrap();
        assert_eq!(
            tool.definition().function.description.as_deref(),
            Some("Docstring for the function")
        );
        // No description declared: the field is absent, not empty.
        let bare = noop_tool("bare", vec![]);
        assert!(bare.definition().function.description.is_none());
    }

    #[test]
    fn record_type_renders_nested_object() {
        let user = ParamType::Record(vec![
            RecordField::new("name", ParamType::String),
            RecordField::new("age", ParamType::Integer),
            RecordField::new("email", ParamType::String),
            RecordField::new("is_active", ParamType::Boolean),
            RecordField::new("blah", ParamType::Null),
        ]);
        let tool = noop_tool("save_user", vec![ParamSpec::new("user", user)]);
        let props = &tool.definition().function.parameters["properties"]["user"];
        assert_eq!(props["type"], "object");
        assert_eq!(props["properties"]["name"]["type"], "string");
        assert_eq!(props["properties"]["age"]["type"], "integer");
        assert_eq!(props["properties"]["is_active"]["type"], "boolean");
        assert_eq!(props["properties"]["blah"]["type"], "null");
    }

    #[test]
    fn array_and_map_types() {
        let tool = noop_tool(
            "shapes",
            vec![
                ParamSpec::new("tags", ParamType::Array(Box::new(ParamType::String))),
                ParamSpec::new("scores", ParamType::Map(Box::new(ParamType::Number))),
                ParamSpec::new("extra", ParamType::Object),
            ],
        );
        let props = &tool.definition().function.parameters["properties"];
        assert_eq!(props["tags"]["type"], "array");
        assert_eq!(props["tags"]["items"]["type"], "string");
        assert_eq!(props["scores"]["type"], "object");
        assert_eq!(props["scores"]["additionalProperties"]["type"], "number");
        assert_eq!(props["extra"], json!({"type": "object"}));
    }

    #[test]
    fn invalid_declarations_fail_at_registration() {
        let dup = Tool::builder("dup")
            .param(ParamSpec::new("x", ParamType::String))
            .param(ParamSpec::new("x", ParamType::Integer))
            .build(|_args| async move { Ok(Value::Null) });
        assert!(matches!(dup, Err(EngineError::Schema { .. })));

        let empty_record = Tool::builder("rec")
            .param(ParamSpec::new("r", ParamType::Record(vec![])))
            .build(|_args| async move { Ok(Value::Null) });
        assert!(matches!(empty_record, Err(EngineError::Schema { .. })));
    }

    #[test]
    fn schema_list_has_one_descriptor_per_tool() {
        let mut toolbox = Toolbox::new();
        toolbox.register(noop_tool("a", vec![])).unwrap();
        toolbox
            .register(noop_tool("b", vec![ParamSpec::new("x", ParamType::String)]))
            .unwrap();
        let schemas = toolbox.schema_list();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].function.name, "a");
        assert_eq!(schemas[1].function.name, "b");
        assert_eq!(schemas[1].tool_type, "function");
    }

    #[test]
    fn duplicate_tool_name_fails() {
        let mut toolbox = Toolbox::new();
        toolbox.register(noop_tool("same", vec![])).unwrap();
        let err = toolbox.register(noop_tool("same", vec![]));
        assert!(matches!(err, Err(EngineError::Schema { .. })));
    }
}

// ── Tool wrapper ───────────────────────────────────────────────────────

mod tool_wrapper {
    use super::*;

    fn failing_tool() -> Tool {
        Tool::builder("boom")
            .build(|_args| async move {
                Err::<Value, _>(EngineError::tool("boom", "it broke"))
            })
            .unwrap()
    }

    #[tokio::test]
    async fn handler_error_becomes_failure_payload() {
        let out = failing_tool().invoke("{}").await;
        assert!(!out.success);
        let payload: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(payload["success"], json!(false));
        assert!(!payload["error"].as_str().unwrap().is_empty());
        assert!(!payload["traceback"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_become_failure_payload() {
        let tool = Tool::builder("echo")
            .param(ParamSpec::new("text", ParamType::String))
            .build(|args| async move { Ok(args["text"].clone()) })
            .unwrap();
        let out = tool.invoke("{not json").await;
        assert!(!out.success);
        let payload: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(payload["success"], json!(false));
    }

    #[tokio::test]
    async fn success_serializes_return_value() {
        let tool = Tool::builder("add")
            .param(ParamSpec::new("a", ParamType::Integer))
            .param(ParamSpec::new("b", ParamType::Integer))
            .build(|args| async move {
                let a = args["a"].as_i64().ok_or("a must be an integer")?;
                let b = args["b"].as_i64().ok_or("b must be an integer")?;
                Ok(json!(a + b))
            })
            .unwrap();
        let out = tool.invoke(r#"{"a": 2, "b": 40}"#).await;
        assert!(out.success);
        assert_eq!(out.content, "42");
    }
}

// ── Toolbox dispatch ───────────────────────────────────────────────────

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_never_raises() {
        let toolbox = Toolbox::new();
        let result = toolbox.dispatch(&tool_call("c1", "nope", "{}")).await;
        assert!(!result.success);
        assert_eq!(result.tool_call_id, "c1");
        assert_eq!(result.name, "nope");
        let payload: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload["success"], json!(false));
        assert!(payload["error"].as_str().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_all_preserves_call_order() {
        let mut toolbox = Toolbox::new();
        toolbox
            .register(
                Tool::builder("slow")
                    .build(|_args| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(json!("slow"))
                    })
                    .unwrap(),
            )
            .unwrap();
        toolbox
            .register(
                Tool::builder("fast")
                    .build(|_args| async move { Ok(json!("fast")) })
                    .unwrap(),
            )
            .unwrap();

        let calls =
            vec![tool_call("c1", "slow", "{}"), tool_call("c2", "fast", "{}")];
        let results = toolbox.dispatch_all(&calls).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[0].content, "\"slow\"");
        assert_eq!(results[1].tool_call_id, "c2");
        assert_eq!(results[1].content, "\"fast\"");
    }
}

// ── Stream chunk accumulation ──────────────────────────────────────────

mod accumulation {
    use super::*;

    #[test]
    fn text_fragments_concatenate_in_order() {
        let mut acc = ResponseAccumulator::new();
        for part in ["Hel", "lo, ", "world"] {
            acc.push(text_chunk(part));
        }
        let response = acc.assemble();
        assert_eq!(response.text, "Hello, world");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_argument_fragments_concatenate_per_index() {
        let mut acc = ResponseAccumulator::new();
        acc.push(call_chunk(0, "call_1", "query", ""));
        acc.push(arg_delta(0, r#"{"query": "SELECT"#));
        acc.push(arg_delta(0, r#" * FROM tips"}"#));
        acc.push(finish_chunk(FinishReason::ToolCalls));

        let response = acc.assemble();
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.function.name, "query");
        assert_eq!(call.function.arguments, r#"{"query": "SELECT * FROM tips"}"#);
    }

    #[test]
    fn parallel_calls_keep_index_order_and_get_ids() {
        let mut acc = ResponseAccumulator::new();
        // Second call arrives first on the wire, and without an id.
        acc.push(StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index: 1,
                id: None,
                function_name: Some("reset_dashboard".into()),
                arguments_delta: Some("{}".into()),
            }],
            ..Default::default()
        });
        acc.push(call_chunk(0, "call_a", "query", "{}"));

        let response = acc.assemble();
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].function.name, "query");
        assert_eq!(response.tool_calls[1].function.name, "reset_dashboard");
        assert!(response.tool_calls[1].id.starts_with("call_"));
    }
}

// ── Conversation loop ──────────────────────────────────────────────────

mod conversation {
    use super::*;

    async fn run_turn(
        history: &mut Vec<Message>,
        provider: &AnyProvider,
        toolbox: &Toolbox,
        input: &str,
    ) -> Vec<ChatFragment> {
        perform_query(history, input, toolbox, provider, "mock-model")
            .collect()
            .await
    }

    #[tokio::test]
    async fn streams_text_live_and_stops() {
        init_logs();
        let (provider, requests) = mock_provider(vec![vec![
            Ok(text_chunk("Hello")),
            Ok(text_chunk(" there")),
            Ok(finish_chunk(FinishReason::Stop)),
        ]]);
        let toolbox = Toolbox::new();
        let mut history = Vec::new();

        let fragments = run_turn(&mut history, &provider, &toolbox, "hi").await;
        let texts: Vec<&str> = fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(texts, vec!["Hello", " there"]);
        assert_eq!(requests.load(Ordering::SeqCst), 1);

        // History: user turn plus the reassembled assistant message.
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content.as_text(), "Hello there");
    }

    #[tokio::test]
    async fn empty_tool_call_round_warns_and_retries_once() {
        init_logs();
        let (provider, requests) = mock_provider(vec![
            vec![Ok(finish_chunk(FinishReason::ToolCalls))],
            vec![Ok(text_chunk("ok")), Ok(finish_chunk(FinishReason::Stop))],
        ]);
        let toolbox = Toolbox::new();
        let mut history = Vec::new();

        let fragments = run_turn(&mut history, &provider, &toolbox, "go").await;
        let warnings: Vec<_> = fragments
            .iter()
            .filter(|f| f.content.contains("retrying"))
            .collect();
        assert_eq!(warnings.len(), 1);
        // Exactly one more model request after the anomaly.
        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(history.last().unwrap().content.as_text(), "ok");
    }

    #[tokio::test]
    async fn persistent_empty_tool_calls_hit_the_retry_cap() {
        init_logs();
        let rounds = (0..5)
            .map(|_| vec![Ok(finish_chunk(FinishReason::ToolCalls))])
            .collect();
        let (provider, requests) = mock_provider(rounds);
        let toolbox = Toolbox::new();
        let mut history = Vec::new();

        let fragments = run_turn(&mut history, &provider, &toolbox, "go").await;
        // Initial round + 2 retries, then the turn is abandoned.
        assert_eq!(requests.load(Ordering::SeqCst), 3);
        let last = fragments.last().unwrap();
        assert!(last.content.starts_with("**Error:**"));
    }

    #[tokio::test]
    async fn content_filter_is_terminal_with_inline_error() {
        init_logs();
        let (provider, requests) =
            mock_provider(vec![vec![Ok(finish_chunk(FinishReason::ContentFilter))]]);
        let toolbox = Toolbox::new();
        let mut history = Vec::new();

        let fragments = run_turn(&mut history, &provider, &toolbox, "hmm").await;
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert!(fragments.last().unwrap().content.contains("content filter"));
        // History stays valid for the next submission.
        assert_eq!(history.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn length_and_unknown_finish_reasons_are_terminal() {
        init_logs();
        for (reason, needle) in [
            (FinishReason::Length, "maximum output length"),
            (FinishReason::Other("weird".into()), "weird"),
        ] {
            let (provider, _) = mock_provider(vec![vec![Ok(finish_chunk(reason))]]);
            let toolbox = Toolbox::new();
            let mut history = Vec::new();
            let fragments = run_turn(&mut history, &provider, &toolbox, "x").await;
            let last = fragments.last().unwrap();
            assert!(last.content.starts_with("**Error:**"));
            assert!(last.content.contains(needle));
        }
    }

    #[tokio::test]
    async fn transport_error_mid_stream_is_terminal_not_retried() {
        init_logs();
        let (provider, requests) = mock_provider(vec![vec![
            Ok(text_chunk("partial")),
            Err(EngineError::provider("mock", "connection reset")),
        ]]);
        let toolbox = Toolbox::new();
        let mut history = Vec::new();

        let fragments = run_turn(&mut history, &provider, &toolbox, "x").await;
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert_eq!(fragments[0].content, "partial");
        assert!(fragments.last().unwrap().content.starts_with("**Error:**"));
        assert_eq!(history.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_round_dispatches_and_separates_rounds() {
        init_logs();
        let engine: Arc<dyn QueryEngine> = Arc::new(tips_engine());
        let dashboard = Arc::new(SharedDashboard::new());
        let toolbox = dashboard_toolbox(engine, dashboard.clone()).unwrap();

        let args = r#"{"query": "SELECT * FROM tips WHERE sex='Female'", "title": "Female tippers"}"#;
        let (provider, requests) = mock_provider(vec![
            vec![
                Ok(call_chunk(0, "call_1", "update_dashboard", args)),
                Ok(finish_chunk(FinishReason::ToolCalls)),
            ],
            vec![
                Ok(text_chunk("Dashboard updated.")),
                Ok(finish_chunk(FinishReason::Stop)),
            ],
        ]);
        let mut history = Vec::new();

        let fragments =
            run_turn(&mut history, &provider, &toolbox, "show female tippers").await;

        assert_eq!(requests.load(Ordering::SeqCst), 2);
        // Separator fragment between the tool round and the final round.
        assert!(fragments.iter().any(|f| f.content == "\n\n"));

        let state = dashboard.snapshot();
        assert_eq!(state.query, "SELECT * FROM tips WHERE sex='Female'");
        assert_eq!(state.title, "Female tippers");

        // user, assistant(tool_calls), tool, assistant(final)
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history[1].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn reset_turn_end_to_end() {
        init_logs();
        let engine: Arc<dyn QueryEngine> = Arc::new(tips_engine());
        let dashboard = Arc::new(SharedDashboard::new());
        dashboard
            .update("SELECT * FROM tips WHERE day='Sun'", "Sunday only")
            .await
            .unwrap();
        let toolbox = dashboard_toolbox(engine, dashboard.clone()).unwrap();

        let (provider, _) = mock_provider(vec![
            vec![
                Ok(call_chunk(0, "call_r", "reset_dashboard", "{}")),
                Ok(finish_chunk(FinishReason::ToolCalls)),
            ],
            vec![
                Ok(text_chunk("Reset done.")),
                Ok(finish_chunk(FinishReason::Stop)),
            ],
        ]);
        let mut history = Vec::new();

        run_turn(&mut history, &provider, &toolbox, "Reset").await;

        let tool_results: Vec<&Message> =
            history.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_results.len(), 1);
        assert_eq!(tool_results[0].name.as_deref(), Some("reset_dashboard"));
        assert_eq!(dashboard.snapshot(), sidebot::DashboardState::default());
        assert_eq!(history.last().unwrap().content.as_text(), "Reset done.");
    }
}

// ── Dashboard tools ────────────────────────────────────────────────────

mod dashboard {
    use super::*;

    fn counting_toolbox(
        dashboard: Arc<SharedDashboard>,
    ) -> (Toolbox, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine: Arc<dyn QueryEngine> =
            Arc::new(CountingEngine { inner: tips_engine(), calls: calls.clone() });
        (dashboard_toolbox(engine, dashboard).unwrap(), calls)
    }

    #[tokio::test]
    async fn update_validates_query_before_sink() {
        let dashboard = Arc::new(SharedDashboard::new());
        let (toolbox, calls) = counting_toolbox(dashboard.clone());

        let args = r#"{"query": "SELECT * FROM tips WHERE sex='Female'", "title": "Female tippers"}"#;
        let result = toolbox
            .dispatch(&tool_call("c1", "update_dashboard", args))
            .await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = dashboard.snapshot();
        assert_eq!(state.query, "SELECT * FROM tips WHERE sex='Female'");
        assert_eq!(state.title, "Female tippers");
    }

    #[tokio::test]
    async fn non_select_update_never_reaches_sink() {
        let dashboard = Arc::new(SharedDashboard::new());
        let (toolbox, _) = counting_toolbox(dashboard.clone());

        let args = r#"{"query": "DROP TABLE tips", "title": "x"}"#;
        let result = toolbox
            .dispatch(&tool_call("c1", "update_dashboard", args))
            .await;

        assert!(!result.success);
        let payload: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload["success"], json!(false));
        assert_eq!(dashboard.snapshot(), sidebot::DashboardState::default());
    }

    #[tokio::test]
    async fn query_tool_returns_rows_as_json() {
        let dashboard = Arc::new(SharedDashboard::new());
        let (toolbox, _) = counting_toolbox(dashboard);

        let args = r#"{"query": "SELECT sex, tip FROM tips WHERE tip > 3 ORDER BY tip"}"#;
        let result = toolbox.dispatch(&tool_call("c1", "query", args)).await;

        assert!(result.success);
        let rows: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[0]["sex"], "Male");
        assert_eq!(rows[1]["tip"], 3.61);
    }
}

// ── Query engine ───────────────────────────────────────────────────────

mod query_engine {
    use super::*;

    #[test]
    fn select_returns_json_rows() {
        let engine = tips_engine();
        let rows: Value =
            serde_json::from_str(&engine.execute("SELECT COUNT(*) AS n FROM tips").unwrap())
                .unwrap();
        assert_eq!(rows[0]["n"], 4);
    }

    #[test]
    fn statement_guard_rejects_mutations() {
        for sql in [
            "DROP TABLE tips",
            "INSERT INTO tips VALUES (1, 1, 'x', 'x', 'x', 'x', 1)",
            "UPDATE tips SET tip = 0",
            "DELETE FROM tips",
            "PRAGMA page_size",
            "",
        ] {
            assert!(matches!(ensure_select(sql), Err(EngineError::Query(_))), "{}", sql);
        }
    }

    #[test]
    fn guard_accepts_ctes_and_comments() {
        ensure_select("WITH big AS (SELECT * FROM tips WHERE tip > 3) SELECT * FROM big")
            .unwrap();
        ensure_select("-- filter\nSELECT * FROM tips").unwrap();
        ensure_select("/* note */ SELECT 1").unwrap();
        // A comment must not smuggle a mutation through.
        assert!(ensure_select("/* SELECT */ DROP TABLE tips").is_err());
    }

    #[test]
    fn rejected_statement_leaves_data_intact() {
        let engine = tips_engine();
        assert!(engine.execute("DELETE FROM tips").is_err());
        let rows: Value =
            serde_json::from_str(&engine.execute("SELECT COUNT(*) AS n FROM tips").unwrap())
                .unwrap();
        assert_eq!(rows[0]["n"], 4);
    }
}

// ── Prompt rendering ───────────────────────────────────────────────────

mod prompt_render {
    use super::*;
    use sidebot::prompt::{render_system_prompt, schema_text};

    #[test]
    fn renders_types_ranges_and_categories() {
        let engine = tips_engine();
        let schema = schema_text(&engine, "tips", 10).unwrap();

        assert!(schema.starts_with("Table: tips\nColumns:"));
        assert!(schema.contains("- total_bill (FLOAT)"));
        assert!(schema.contains("  Range: 10.34 to 24.59"));
        assert!(schema.contains("- size (INTEGER)"));
        assert!(schema.contains("  Range: 2 to 4"));
        // First-appearance order, as a reader of the raw data sees them.
        assert!(schema.contains("- sex (TEXT)\n  Categorical values: 'Female', 'Male'"));
        assert!(schema.contains("'Sun', 'Sat', 'Thur'"));
    }

    #[test]
    fn cardinality_above_threshold_is_not_listed() {
        let engine = tips_engine();
        let schema = schema_text(&engine, "tips", 2).unwrap();
        // sex has 2 distinct values, day has 3.
        assert!(schema.contains("Categorical values: 'Female', 'Male'"));
        assert!(!schema.contains("'Sun'"));
    }

    #[test]
    fn template_splice_is_exact() {
        assert_eq!(render_system_prompt("A ${SCHEMA} B", "X"), "A X B");
        let rendered =
            render_system_prompt(prompt::DEFAULT_PROMPT_TEMPLATE, "Table: tips");
        assert!(rendered.contains("Table: tips"));
        assert!(!rendered.contains("${SCHEMA}"));
    }

    #[test]
    fn unknown_table_is_an_error() {
        let engine = tips_engine();
        assert!(schema_text(&engine, "nope", 10).is_err());
    }

    #[test]
    fn runtime_context_names_model_and_table() {
        let ctx = prompt::runtime_context("gpt-4o-mini", "tips");
        assert!(ctx.starts_with("## Runtime"));
        assert!(ctx.contains("gpt-4o-mini"));
        assert!(ctx.contains("Table: tips"));
    }
}

// ── Provider routing ───────────────────────────────────────────────────

mod routing {
    use sidebot::ProviderKind;

    #[test]
    fn model_names_route_to_their_vendor() {
        assert_eq!(ProviderKind::for_model("gpt-4o-mini"), ProviderKind::OpenAI);
        assert_eq!(
            ProviderKind::for_model("claude-3-5-sonnet-20240620"),
            ProviderKind::Anthropic
        );
        assert_eq!(
            ProviderKind::for_model("Llama-3.1-70b-Versatile"),
            ProviderKind::Groq
        );
        assert_eq!(ProviderKind::for_model("qwen2.5"), ProviderKind::Custom);
    }
}

// ── Session ────────────────────────────────────────────────────────────

mod session {
    use super::*;
    use sidebot::ChatSession;

    #[tokio::test]
    async fn seeded_session_runs_a_turn() {
        init_logs();
        let (provider, _) = mock_provider(vec![vec![
            Ok(text_chunk("Hi!")),
            Ok(finish_chunk(FinishReason::Stop)),
        ]]);
        let mut session = ChatSession::new(provider, "mock-model", Toolbox::new())
            .with_system_prompt("You are a dashboard assistant.")
            .with_greeting(prompt::GREETING);

        assert_eq!(session.history().len(), 2);

        let fragments: Vec<ChatFragment> = session.ask("hello").collect().await;
        assert_eq!(fragments[0].content, "Hi!");

        // system, greeting, user, assistant
        assert_eq!(session.history().len(), 4);
        assert_eq!(session.history()[0].role, Role::System);
        assert_eq!(session.history()[3].content.as_text(), "Hi!");
    }
}
