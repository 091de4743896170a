//! Sandboxed function-calling agent core
//!
//! A model is asked for a final answer or a set of function calls; calls are
//! validated, confined to a working directory, executed, and fed back until
//! the model answers or the run hits a limit.

use std::fmt;
use thiserror::Error;

use sandagent_provider::Usage;

pub mod context;
pub mod conversation;
pub mod dispatcher;
pub mod loop_agent;
pub mod tools;

pub use context::ContextBuilder;
pub use conversation::{Conversation, Turn};
pub use dispatcher::{CallOutcome, Dispatcher, ToolError};
pub use loop_agent::{AgentAnswer, AgentConfig, AgentLoop};
pub use tools::{Sandbox, ToolRegistry, ToolSpec, ToolTrait};

/// Every way a call or a run can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownTool,
    InvalidArguments,
    PathEscape,
    ExecutionFailed,
    BackendUnavailable,
    MaxIterationsExceeded,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::PathEscape => "PathEscape",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::MaxIterationsExceeded => "MaxIterationsExceeded",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Recovered kinds are reported to the model instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownTool
                | ErrorKind::InvalidArguments
                | ErrorKind::PathEscape
                | ErrorKind::ExecutionFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("◆ BACKEND UNAVAILABLE AFTER {attempts} ATTEMPT(S): {message}")]
    BackendUnavailable { attempts: u32, message: String },

    #[error("◆ MAX ITERATIONS EXCEEDED: {0}")]
    MaxIterationsExceeded(u32),

    #[error("◆ RUN CANCELLED: {0}")]
    Cancelled(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            AgentError::MaxIterationsExceeded(_) => ErrorKind::MaxIterationsExceeded,
            AgentError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

/// A failed run with the context needed to diagnose it
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct AgentFailure {
    pub error: AgentError,
    pub iterations: u32,
    pub usage: Usage,
    pub recent_turns: Vec<Turn>,
}

impl AgentFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Multi-line report: the error, then the most recent turns
    pub fn summary(&self) -> String {
        let mut lines = vec![
            self.error.to_string(),
            format!("kind: {}, iterations: {}", self.kind(), self.iterations),
        ];
        if !self.recent_turns.is_empty() {
            lines.push(format!("last {} turn(s):", self.recent_turns.len()));
            lines.extend(self.recent_turns.iter().map(|t| format!("  {}", t)));
        }
        lines.join("\n")
    }
}

pub type Result<T> = std::result::Result<T, AgentFailure>;
