//! Tests for call dispatch: lookup, validation, sandboxing, and failure capture

use async_trait::async_trait;
use sandagent_agent::tools::{ParamSpec, ParamType, Sandbox, ToolArgs, ToolFailure, ToolRegistry, ToolTrait};
use sandagent_agent::{Dispatcher, ErrorKind, ToolError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Adds two integers and counts its invocations
struct AddTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolTrait for AddTool {
    fn name(&self) -> &str {
        "add"
    }
    fn description(&self) -> &str {
        "Adds two integers"
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("a", ParamType::Integer, "left"),
            ParamSpec::required("b", ParamType::Integer, "right"),
        ]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let a = args.i64("a").ok_or("a missing")?;
        let b = args.i64("b").ok_or("b missing")?;
        Ok(json!(a + b))
    }
}

/// Reads a path parameter and counts its invocations
struct OpenTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolTrait for OpenTool {
    fn name(&self) -> &str {
        "open"
    }
    fn description(&self) -> &str {
        "Reports the resolved path"
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("file_path", ParamType::String, "target").as_path()]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = args.path("file_path").ok_or("unresolved")?;
        Ok(json!(path.to_string_lossy()))
    }
}

struct FailingTool {
    message: &'static str,
}

#[async_trait]
impl ToolTrait for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }
    async fn execute(&self, _args: ToolArgs) -> Result<Value, ToolFailure> {
        Err(self.message.into())
    }
}

struct SlowTool;

#[async_trait]
impl ToolTrait for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Never finishes in time"
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }
    async fn execute(&self, _args: ToolArgs) -> Result<Value, ToolFailure> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    }
}

struct PanickingTool;

#[async_trait]
impl ToolTrait for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }
    async fn execute(&self, _args: ToolArgs) -> Result<Value, ToolFailure> {
        panic!("tool bug");
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    add_calls: Arc<AtomicUsize>,
    open_calls: Arc<AtomicUsize>,
}

fn fixture(root: &str) -> Fixture {
    let add_calls = Arc::new(AtomicUsize::new(0));
    let open_calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ToolRegistry::new();
    registry
        .register_tool(AddTool {
            calls: Arc::clone(&add_calls),
        })
        .unwrap();
    registry
        .register_tool(OpenTool {
            calls: Arc::clone(&open_calls),
        })
        .unwrap();
    registry.register_tool(FailingTool { message: "disk on fire" }).unwrap();
    registry.register_tool(SlowTool).unwrap();
    registry.register_tool(PanickingTool).unwrap();

    Fixture {
        dispatcher: Dispatcher::new(
            Arc::new(registry),
            Sandbox::new(root),
            Duration::from_millis(100),
        ),
        add_calls,
        open_calls,
    }
}

#[tokio::test]
async fn test_dispatch_success() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("add", &json!({"a": 2, "b": 3})).await;

    assert!(outcome.success());
    assert_eq!(outcome.tool, "add");
    assert_eq!(outcome.result, Ok(json!(5)));
    assert_eq!(fx.add_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_tool_never_invokes_anything() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("delete_everything", &json!({})).await;

    assert!(!outcome.success());
    assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownTool));
    match outcome.result {
        Err(ToolError::UnknownTool { name, available }) => {
            assert_eq!(name, "delete_everything");
            assert!(available.contains(&"add".to_string()));
        }
        other => panic!("expected UnknownTool, got {:?}", other),
    }
    assert_eq!(fx.add_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.open_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_field_names_parameter() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("add", &json!({"a": 2})).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidArguments));
    let error = outcome.result.unwrap_err();
    assert_eq!(error.offending_params(), vec!["b"]);
    assert!(error.to_string().contains("`b`"));
    assert_eq!(fx.add_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_type_mismatch_and_non_object() {
    let fx = fixture("/workspace");

    let outcome = fx.dispatcher.dispatch("add", &json!({"a": "2", "b": 3})).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidArguments));
    assert_eq!(outcome.result.unwrap_err().offending_params(), vec!["a"]);

    let outcome = fx.dispatcher.dispatch("add", &json!("{not json")).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidArguments));

    assert_eq!(fx.add_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_extra_arguments_ignored() {
    let fx = fixture("/workspace");
    let outcome = fx
        .dispatcher
        .dispatch("add", &json!({"a": 1, "b": 1, "c": 99}))
        .await;
    assert_eq!(outcome.result, Ok(json!(2)));
}

#[tokio::test]
async fn test_traversal_rejected_before_invocation() {
    let fx = fixture("/workspace");
    let outcome = fx
        .dispatcher
        .dispatch("open", &json!({"file_path": "../secret.txt"}))
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::PathEscape));
    assert_eq!(
        outcome.result.unwrap_err(),
        ToolError::PathEscape {
            param: "file_path".to_string(),
            path: "../secret.txt".to_string(),
        }
    );
    assert_eq!(fx.open_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_absolute_path_outside_root_rejected() {
    let fx = fixture("/workspace");
    let outcome = fx
        .dispatcher
        .dispatch("open", &json!({"file_path": "/etc/passwd"}))
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::PathEscape));
    assert_eq!(fx.open_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_path_resolved_inside_root() {
    let fx = fixture("/workspace");
    let outcome = fx
        .dispatcher
        .dispatch("open", &json!({"file_path": "pkg/./calc.py"}))
        .await;

    assert_eq!(outcome.result, Ok(json!("/workspace/pkg/calc.py")));
    assert_eq!(fx.open_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_tool_becomes_execution_failed() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("fail", &json!({})).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionFailed));
    assert_eq!(
        outcome.to_payload(),
        json!({"error": {"kind": "ExecutionFailed", "message": "disk on fire"}})
    );
}

#[tokio::test]
async fn test_timeout_becomes_execution_failed() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("slow", &json!({})).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionFailed));
    assert!(outcome.result.unwrap_err().to_string().contains("timed out"));
}

#[tokio::test]
async fn test_panic_becomes_execution_failed() {
    let fx = fixture("/workspace");
    let outcome = fx.dispatcher.dispatch("panic", &json!({})).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionFailed));
    assert_eq!(
        outcome.result.unwrap_err(),
        ToolError::ExecutionFailed("tool panicked".to_string())
    );
}
