//! Parameter schemas and argument validation

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Type tag of a tool parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
    Object,
}

impl ParamType {
    /// JSON Schema `type` keyword for this parameter
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array(_) => "array",
            ParamType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array(items) => value
                .as_array()
                .map(|values| values.iter().all(|v| items.matches(v)))
                .unwrap_or(false),
            ParamType::Object => value.is_object(),
        }
    }

    fn schema(&self) -> Value {
        match self {
            ParamType::Array(items) => json!({ "type": "array", "items": items.schema() }),
            other => json!({ "type": other.json_type() }),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Array(items) => write!(f, "array of {}", items),
            other => f.write_str(other.json_type()),
        }
    }
}

/// Declared parameter of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
    /// The value names a filesystem location and is confined to the sandbox.
    pub path: bool,
    /// Substituted when an optional parameter is omitted.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            path: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn as_path(mut self) -> Self {
        self.path = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Render parameter specs as a JSON Schema object for advertisement
pub fn json_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut schema = param.kind.schema();
        schema["description"] = json!(param.description);
        if let Some(default) = &param.default {
            schema["default"] = default.clone();
        }
        properties.insert(param.name.clone(), schema);
        if param.required {
            required.push(param.name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// One reason a set of arguments failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentIssue {
    NotAnObject { found: &'static str },
    Missing { param: String },
    WrongType {
        param: String,
        expected: String,
        found: &'static str,
    },
}

impl ArgumentIssue {
    /// The parameter this issue is about, if it concerns a single one
    pub fn param(&self) -> Option<&str> {
        match self {
            ArgumentIssue::NotAnObject { .. } => None,
            ArgumentIssue::Missing { param } | ArgumentIssue::WrongType { param, .. } => {
                Some(param)
            }
        }
    }
}

impl fmt::Display for ArgumentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentIssue::NotAnObject { found } => {
                write!(f, "arguments must be a JSON object, got {}", found)
            }
            ArgumentIssue::Missing { param } => {
                write!(f, "missing required parameter `{}`", param)
            }
            ArgumentIssue::WrongType {
                param,
                expected,
                found,
            } => write!(f, "parameter `{}` must be {}, got {}", param, expected, found),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check `arguments` against `params`, filling declared defaults.
///
/// Every issue is collected rather than stopping at the first, so the model
/// sees all offending parameters at once. Explicit `null` counts as omitted.
/// Undeclared parameters are dropped.
pub fn validate(params: &[ParamSpec], arguments: &Value) -> Result<Map<String, Value>, Vec<ArgumentIssue>> {
    let supplied = match arguments {
        Value::Object(map) => map,
        Value::Null => {
            return validate(params, &Value::Object(Map::new()));
        }
        other => {
            return Err(vec![ArgumentIssue::NotAnObject {
                found: value_kind(other),
            }])
        }
    };

    let mut values = Map::new();
    let mut issues = Vec::new();

    for param in params {
        match supplied.get(&param.name).filter(|v| !v.is_null()) {
            Some(value) if param.kind.matches(value) => {
                values.insert(param.name.clone(), value.clone());
            }
            Some(value) => issues.push(ArgumentIssue::WrongType {
                param: param.name.clone(),
                expected: param.kind.to_string(),
                found: value_kind(value),
            }),
            None => {
                if let Some(default) = &param.default {
                    values.insert(param.name.clone(), default.clone());
                } else if param.required {
                    issues.push(ArgumentIssue::Missing {
                        param: param.name.clone(),
                    });
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(values)
    } else {
        Err(issues)
    }
}

/// Arguments that passed validation, with path parameters already resolved
/// inside the sandbox.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    values: Map<String, Value>,
    paths: HashMap<String, PathBuf>,
    root: PathBuf,
}

impl ToolArgs {
    pub(crate) fn new(values: Map<String, Value>, paths: HashMap<String, PathBuf>, root: PathBuf) -> Self {
        Self {
            values,
            paths,
            root,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// String elements of an array parameter; empty when absent.
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.values
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolved absolute location of a path parameter
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    /// Sandbox root the call was resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }
}
