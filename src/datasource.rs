// Sidebot Engine — Embedded Query Engine
// Executes read-only SQL against the host's dataset via rusqlite and exposes
// the column metadata the prompt renderer needs. The engine is deliberately
// behind traits so a host with a different analytic store only has to
// implement `execute` and the dataset accessors.

use crate::error::{EngineError, EngineResult};
use log::info;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

// ── Consumed interfaces ────────────────────────────────────────────────

/// Execute SQL, return rows as a JSON array string. Non-SELECT statements
/// must be rejected before touching the database.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, sql: &str) -> EngineResult<String>;
}

/// Column-level access for the schema-to-prompt renderer.
pub trait Dataset: Send + Sync {
    fn columns(&self, table: &str) -> EngineResult<Vec<ColumnInfo>>;
    fn distinct_count(&self, table: &str, column: &str) -> EngineResult<u64>;
    /// Distinct non-null values in first-appearance order.
    fn distinct_values(&self, table: &str, column: &str) -> EngineResult<Vec<String>>;
    fn numeric_range(&self, table: &str, column: &str) -> EngineResult<Option<(f64, f64)>>;
}

// ── Column metadata ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Datetime,
    Text,
}

impl ColumnKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }

    /// Map a SQLite declared type to the SQL-like kind shown to the model.
    fn from_decl(decl: &str) -> ColumnKind {
        let d = decl.to_ascii_uppercase();
        if d.contains("BOOL") {
            ColumnKind::Boolean
        } else if d.contains("DATE") || d.contains("TIME") {
            ColumnKind::Datetime
        } else if d.contains("INT") {
            ColumnKind::Integer
        } else if d.contains("REAL")
            || d.contains("FLOA")
            || d.contains("DOUB")
            || d.contains("DEC")
            || d.contains("NUM")
        {
            ColumnKind::Float
        } else {
            ColumnKind::Text
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Float => "FLOAT",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Datetime => "DATETIME",
            ColumnKind::Text => "TEXT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

// ── Statement guard ────────────────────────────────────────────────────

static SQL_COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").expect("static regex"));

/// Reject anything that is not a SELECT (or WITH … SELECT) statement.
/// Comments are stripped first so `-- note\nSELECT …` still passes.
pub fn ensure_select(sql: &str) -> EngineResult<()> {
    let stripped = SQL_COMMENTS.replace_all(sql, " ");
    let first = stripped
        .split_whitespace()
        .next()
        .map(|w| w.to_ascii_uppercase())
        .unwrap_or_default();
    match first.as_str() {
        "SELECT" | "WITH" => Ok(()),
        "" => Err(EngineError::Query("empty SQL statement".into())),
        other => Err(EngineError::Query(format!(
            "only SELECT statements are allowed, got '{}'",
            other
        ))),
    }
}

// ── SQLite-backed engine ───────────────────────────────────────────────

/// Thread-safe wrapper over a rusqlite connection holding the dataset.
pub struct SqliteQueryEngine {
    conn: Mutex<Connection>,
}

impl SqliteQueryEngine {
    /// Wrap an existing connection (the host owns data loading).
    pub fn new(conn: Connection) -> Self {
        SqliteQueryEngine { conn: Mutex::new(conn) }
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Run host-side setup SQL (table creation, data load). Not reachable
    /// from any tool; the model only ever goes through `execute`.
    pub fn execute_batch(&self, sql: &str) -> EngineResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// Double-quote an identifier coming from the host configuration.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_ref_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

impl QueryEngine for SqliteQueryEngine {
    fn execute(&self, sql: &str) -> EngineResult<String> {
        ensure_select(sql)?;
        info!("[engine] Query: {}", crate::types::truncate_utf8(sql, 200));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows_out: Vec<Value> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut obj = Map::new();
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            rows_out.push(Value::Object(obj));
        }

        Ok(serde_json::to_string(&rows_out)?)
    }
}

impl Dataset for SqliteQueryEngine {
    fn columns(&self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let cols = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let decl: String = row.get("type")?;
                Ok(ColumnInfo { name, kind: ColumnKind::from_decl(&decl) })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if cols.is_empty() {
            return Err(EngineError::Query(format!("no such table: {}", table)));
        }
        Ok(cols)
    }

    fn distinct_count(&self, table: &str, column: &str) -> EngineResult<u64> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT COUNT(DISTINCT {c}) FROM {t}",
            c = quote_ident(column),
            t = quote_ident(table)
        );
        Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))? as u64)
    }

    fn distinct_values(&self, table: &str, column: &str) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        // GROUP BY + MIN(rowid) preserves first-appearance order, the order
        // a reader of the raw data would see the categories in.
        let sql = format!(
            "SELECT {c} FROM {t} WHERE {c} IS NOT NULL GROUP BY {c} ORDER BY MIN(rowid)",
            c = quote_ident(column),
            t = quote_ident(table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
                    other => value_ref_to_json(other).to_string(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    fn numeric_range(&self, table: &str, column: &str) -> EngineResult<Option<(f64, f64)>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT MIN({c}), MAX({c}) FROM {t}",
            c = quote_ident(column),
            t = quote_ident(table)
        );
        let range = conn.query_row(&sql, [], |row| {
            Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;
        Ok(match range {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }
}
