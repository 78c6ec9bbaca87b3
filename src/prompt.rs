// Sidebot Engine — System Prompt Rendering
//
// Turns the dataset's column types and cardinalities into the textual schema
// block spliced into the system prompt. Pure functions of the dataset's
// current contents; recompute after the data changes, nothing is cached.

use crate::datasource::Dataset;
use crate::error::EngineResult;
use log::info;

/// Token replaced by the rendered schema block in a prompt template.
pub const SCHEMA_PLACEHOLDER: &str = "${SCHEMA}";

/// TEXT columns with at most this many distinct values get their literal
/// category values listed in the schema block.
pub const DEFAULT_CATEGORICAL_THRESHOLD: u64 = 10;

/// Default system-prompt template. Hosts with their own prompt file can pass
/// any template containing the `${SCHEMA}` token instead.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are a chat assistant embedded in a data dashboard. The dashboard shows a
single table of data, and you can filter and sort it for the user by writing
SQL.

You have three tools available:

- `update_dashboard`: change what the dashboard shows by providing a SQL
  SELECT query (and a short title summarizing it). The query must return all
  columns of the table; only filtering and sorting are possible.
- `reset_dashboard`: restore the dashboard to the full, unfiltered dataset.
- `query`: run a SQL SELECT query and get the results back as JSON, for
  answering questions about the data without changing the dashboard.

Rules:

- Only SELECT statements are allowed. Never attempt to modify the data.
- Refer only to the table and columns listed in the schema below.
- When the user asks to filter or sort, call `update_dashboard`; when they
  ask a question about the data, call `query` and answer from the result.
- After updating the dashboard, briefly confirm what is now shown.

The data schema is:

${SCHEMA}
";

/// Greeting shown as the assistant's first message in a fresh session.
pub const GREETING: &str = "\
You can use this sidebar to filter and sort the data based on the columns \
available in the table. Here are some examples of the kinds of questions \
you can ask me:

1. Filter by specific values: 'Show only Female tippers on Sunday.'
2. Combine multiple filters: 'Show only Male smokers who had Dinner on Saturday.'
3. Sort the data: 'Show all data sorted by total_bill in descending order.'
4. Combine filters and sorting: 'Show Female tippers on Friday sorted by tip \
amount in ascending order.'

Please note that the query will always return all columns in the table, so \
requests that require a different set of columns will not be possible.";

// ── Schema block ───────────────────────────────────────────────────────

/// Render the dataset's schema as the textual block the model sees: one line
/// per column with its SQL-like type, observed ranges for numeric columns,
/// and literal category values for low-cardinality TEXT columns.
pub fn schema_text(
    data: &dyn Dataset,
    table: &str,
    categorical_threshold: u64,
) -> EngineResult<String> {
    let mut out = Vec::new();
    out.push(format!("Table: {}", table));
    out.push("Columns:".to_string());

    for col in data.columns(table)? {
        out.push(format!("- {} ({})", col.name, col.kind));

        if col.kind.is_numeric() {
            if let Some((min, max)) = data.numeric_range(table, &col.name)? {
                out.push(format!("  Range: {} to {}", fmt_number(min), fmt_number(max)));
            }
        } else if col.kind == crate::datasource::ColumnKind::Text {
            let unique = data.distinct_count(table, &col.name)?;
            if unique <= categorical_threshold {
                let values = data.distinct_values(table, &col.name)?;
                let quoted: Vec<String> =
                    values.iter().map(|v| format!("'{}'", v)).collect();
                out.push(format!("  Categorical values: {}", quoted.join(", ")));
            }
        }
    }

    info!("[engine] Rendered schema for table '{}' ({} lines)", table, out.len());
    Ok(out.join("\n"))
}

/// Splice the rendered schema into a prompt template at `${SCHEMA}`.
pub fn render_system_prompt(template: &str, schema: &str) -> String {
    template.replace(SCHEMA_PLACEHOLDER, schema)
}

/// Compact runtime context block appended after the main prompt so the model
/// knows the current date and what it is talking to.
pub fn runtime_context(model: &str, table: &str) -> String {
    let now = chrono::Local::now();
    format!(
        "## Runtime\n\
        Model: {} | Table: {}\n\
        Date: {} {}",
        model,
        table,
        now.format("%Y-%m-%d"),
        now.format("%A"),
    )
}

fn fmt_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
