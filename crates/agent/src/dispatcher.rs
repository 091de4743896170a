//! Validating and routing requested calls to their implementations.

use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::tools::schema::{self, ArgumentIssue, ToolArgs};
use crate::tools::{Sandbox, ToolRegistry};
use crate::ErrorKind;

/// A failed call, reported back to the model rather than the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool `{name}`; available tools: {}", .available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("invalid arguments: {}", join_issues(.0))]
    InvalidArguments(Vec<ArgumentIssue>),

    #[error("cannot access \"{path}\" ({param}): it is outside the permitted working directory")]
    PathEscape { param: String, path: String },

    #[error("{0}")]
    ExecutionFailed(String),
}

fn join_issues(issues: &[ArgumentIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool { .. } => ErrorKind::UnknownTool,
            ToolError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            ToolError::PathEscape { .. } => ErrorKind::PathEscape,
            ToolError::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
        }
    }

    /// Parameters named by an `InvalidArguments` or `PathEscape` error
    pub fn offending_params(&self) -> Vec<&str> {
        match self {
            ToolError::InvalidArguments(issues) => {
                issues.iter().filter_map(ArgumentIssue::param).collect()
            }
            ToolError::PathEscape { param, .. } => vec![param.as_str()],
            _ => Vec::new(),
        }
    }
}

/// Result of one dispatched call
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub tool: String,
    pub result: Result<Value, ToolError>,
}

impl CallOutcome {
    pub fn ok(tool: impl Into<String>, value: Value) -> Self {
        Self {
            tool: tool.into(),
            result: Ok(value),
        }
    }

    pub fn err(tool: impl Into<String>, error: ToolError) -> Self {
        Self {
            tool: tool.into(),
            result: Err(error),
        }
    }

    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(ToolError::kind)
    }

    /// Structured payload sent back to the model
    pub fn to_payload(&self) -> Value {
        match &self.result {
            Ok(value) => json!({ "result": value }),
            Err(error) => json!({
                "error": {
                    "kind": error.kind().as_str(),
                    "message": error.to_string(),
                }
            }),
        }
    }

    pub fn payload_text(&self) -> String {
        self.to_payload().to_string()
    }
}

/// Routes calls through the registry, the argument schema, and the sandbox.
///
/// Never fails: every problem becomes an unsuccessful `CallOutcome`.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    sandbox: Sandbox,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, sandbox: Sandbox, call_timeout: Duration) -> Self {
        Self {
            registry,
            sandbox,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub async fn dispatch(&self, name: &str, arguments: &Value) -> CallOutcome {
        let outcome = match self.prepare(name, arguments).await {
            Ok(args) => self.invoke(name, args).await,
            Err(error) => CallOutcome::err(name, error),
        };

        if let Err(error) = &outcome.result {
            warn!("◆ CALL {} FAILED ({}): {}", name, error.kind(), error);
        }
        outcome
    }

    async fn prepare(&self, name: &str, arguments: &Value) -> Result<ToolArgs, ToolError> {
        let spec = self
            .registry
            .lookup(name)
            .map_err(|_| ToolError::UnknownTool {
                name: name.to_string(),
                available: self.registry.names(),
            })?;

        let values = schema::validate(spec.params(), arguments).map_err(ToolError::InvalidArguments)?;

        if let Some(extra) = arguments.as_object() {
            for key in extra.keys().filter(|k| !values.contains_key(*k)) {
                debug!("◆ IGNORING UNDECLARED ARGUMENT {} FOR {}", key, name);
            }
        }

        let mut paths = HashMap::new();
        for param in spec.params().iter().filter(|p| p.path) {
            if let Some(raw) = values.get(&param.name).and_then(Value::as_str) {
                let resolved = self
                    .sandbox
                    .resolve(raw)
                    .await
                    .map_err(|e| ToolError::PathEscape {
                        param: param.name.clone(),
                        path: e.path,
                    })?;
                paths.insert(param.name.clone(), resolved);
            }
        }

        Ok(ToolArgs::new(values, paths, self.sandbox.root().to_path_buf()))
    }

    async fn invoke(&self, name: &str, args: ToolArgs) -> CallOutcome {
        // `prepare` already looked the tool up; the registry is immutable.
        let handler = match self.registry.lookup(name) {
            Ok(spec) => Arc::clone(spec.handler()),
            Err(e) => return CallOutcome::err(name, ToolError::ExecutionFailed(e.to_string())),
        };

        let call = AssertUnwindSafe(handler.execute(args)).catch_unwind();
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(failure))) => Err(execution_failed(failure.to_string())),
            Ok(Err(_panic)) => Err(execution_failed("tool panicked".to_string())),
            Err(_) => Err(execution_failed(format!(
                "timed out after {} seconds",
                self.call_timeout.as_secs_f64()
            ))),
        };

        CallOutcome {
            tool: name.to_string(),
            result,
        }
    }
}

fn execution_failed(message: String) -> ToolError {
    if message.trim().is_empty() {
        ToolError::ExecutionFailed("tool failed without a message".to_string())
    } else {
        ToolError::ExecutionFailed(message)
    }
}
