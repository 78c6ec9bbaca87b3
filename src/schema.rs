// Sidebot Engine — Tool Parameter Schemas
//
// A declarative mapping from a closed set of parameter type tags to JSON
// schema fragments. Descriptors are built exactly once, when a tool is
// registered, and stored alongside the wrapper; nothing is re-derived per
// call. Invalid descriptors fail at registration time so a misconfigured
// tool can never surface mid-conversation.

use crate::error::{EngineError, EngineResult};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

// ── Type tags ──────────────────────────────────────────────────────────

/// The parameter types a tool may declare. Map keys are textual by
/// construction; there is no way to express a non-string-keyed map.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    /// Homogeneous array, recursively typed by element.
    Array(Box<ParamType>),
    /// String-keyed map, recursively typed by value.
    Map(Box<ParamType>),
    /// Free-form JSON object with no declared shape.
    Object,
    /// Structured record with named, typed fields.
    Record(Vec<RecordField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
}

impl RecordField {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        RecordField { name: name.into(), ty, description: None }
    }

    pub fn described(name: impl Into<String>, ty: ParamType, desc: impl Into<String>) -> Self {
        RecordField { name: name.into(), ty, description: Some(desc.into()) }
    }
}

impl ParamType {
    /// Render this type tag as a JSON schema fragment.
    fn to_schema(&self, description: Option<&str>) -> Value {
        let mut obj = Map::new();
        match self {
            ParamType::String => {
                obj.insert("type".into(), json!("string"));
            }
            ParamType::Integer => {
                obj.insert("type".into(), json!("integer"));
            }
            ParamType::Number => {
                obj.insert("type".into(), json!("number"));
            }
            ParamType::Boolean => {
                obj.insert("type".into(), json!("boolean"));
            }
            ParamType::Null => {
                obj.insert("type".into(), json!("null"));
            }
            ParamType::Array(item) => {
                obj.insert("type".into(), json!("array"));
                obj.insert("items".into(), item.to_schema(None));
            }
            ParamType::Map(value) => {
                obj.insert("type".into(), json!("object"));
                obj.insert("additionalProperties".into(), value.to_schema(None));
            }
            ParamType::Object => {
                obj.insert("type".into(), json!("object"));
            }
            ParamType::Record(fields) => {
                obj.insert("type".into(), json!("object"));
                let mut props = Map::new();
                for f in fields {
                    props.insert(f.name.clone(), f.ty.to_schema(f.description.as_deref()));
                }
                obj.insert("properties".into(), Value::Object(props));
            }
        }
        if let Some(desc) = description {
            obj.insert("description".into(), json!(desc));
        }
        Value::Object(obj)
    }

    /// Registration-time validation of nested record shapes.
    fn validate(&self, tool: &str) -> EngineResult<()> {
        match self {
            ParamType::Array(item) | ParamType::Map(item) => item.validate(tool),
            ParamType::Record(fields) => {
                if fields.is_empty() {
                    return Err(EngineError::schema(tool, "record type has no fields"));
                }
                let mut seen = HashSet::new();
                for f in fields {
                    if f.name.is_empty() {
                        return Err(EngineError::schema(tool, "record field with empty name"));
                    }
                    if !seen.insert(f.name.as_str()) {
                        return Err(EngineError::schema(
                            tool,
                            format!("duplicate record field '{}'", f.name),
                        ));
                    }
                    f.ty.validate(tool)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ── Parameter specs ────────────────────────────────────────────────────

/// One declared parameter of a tool. Parameters are required unless
/// explicitly marked optional (i.e. the handler supplies a default).
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        ParamSpec { name: name.into(), ty, description: None, required: true }
    }

    /// Attach a human-readable description, lifted into the schema.
    pub fn described(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Mark the parameter as having a default, removing it from `required`.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

// ── Descriptor assembly ────────────────────────────────────────────────

/// Build the `parameters` JSON schema object for a tool from its declared
/// parameter list. Fails fast on invalid declarations.
pub fn build_parameters(tool: &str, params: &[ParamSpec]) -> EngineResult<Value> {
    if tool.is_empty() {
        return Err(EngineError::schema("<unnamed>", "tool name is empty"));
    }

    let mut seen = HashSet::new();
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for p in params {
        if p.name.is_empty() {
            return Err(EngineError::schema(tool, "parameter with empty name"));
        }
        if !seen.insert(p.name.as_str()) {
            return Err(EngineError::schema(
                tool,
                format!("duplicate parameter '{}'", p.name),
            ));
        }
        p.ty.validate(tool)?;
        properties.insert(p.name.clone(), p.ty.to_schema(p.description.as_deref()));
        if p.required {
            required.push(json!(p.name));
        }
    }

    Ok(json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    }))
}
