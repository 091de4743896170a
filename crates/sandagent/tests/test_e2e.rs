//! End-to-end runs of the binary against a mock chat-completions backend

mod common;

use common::TestEnv;
use mockito::Matcher;
use predicates::prelude::*;
use serde_json::json;

fn text_reply(text: &str) -> String {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
    })
    .to_string()
}

fn call_reply(id: &str, name: &str, arguments: serde_json::Value) -> String {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
    .to_string()
}

#[test]
fn test_run_prints_final_answer() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(text_reply("Hello from the agent"))
        .expect(1)
        .create();

    let env = TestEnv::new().unwrap();
    env.create_config(Some(&server.url())).unwrap();

    env.command()
        .args(["run", "say hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello from the agent"));
    mock.assert();
}

#[test]
fn test_run_executes_tool_call_in_working_dir() {
    let mut server = mockito::Server::new();
    let first = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("list the files".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(call_reply("call_1", "get_files_info", json!({"directory": "."})))
        .expect(1)
        .create();

    let env = TestEnv::new().unwrap();
    env.create_config(Some(&server.url())).unwrap();
    std::fs::write(env.working_file("main.py"), "print('hi')\n").unwrap();

    // Matched after the first mock is exhausted: the follow-up request carries the tool result.
    let second = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("main.py: file_size=12 bytes".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(text_reply("There is one file: main.py"))
        .expect(1)
        .create();

    env.command()
        .args(["run", "list the files", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("User prompt: list the files"))
        .stdout(predicate::str::contains("Calling function: get_files_info"))
        .stdout(predicate::str::contains("There is one file: main.py"))
        .stdout(predicate::str::contains("Prompt tokens: 12"));

    first.assert();
    second.assert();
}

#[test]
fn test_run_backend_error_exits_nonzero() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": {"message": "invalid api key"}}).to_string())
        .create();

    let env = TestEnv::new().unwrap();
    env.create_config(Some(&server.url())).unwrap();

    env.command()
        .args(["run", "say hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kind: BackendUnavailable"))
        .stderr(predicate::str::contains("invalid api key"));
}

#[test]
fn test_run_iteration_limit_reports_diagnostic() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(call_reply("call_x", "delete_everything", json!({})))
        .expect(2)
        .create();

    let env = TestEnv::new().unwrap();
    env.create_config(Some(&server.url())).unwrap();

    env.command()
        .args(["run", "clean up", "--max-iterations", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MAX ITERATIONS EXCEEDED: 2"))
        .stderr(predicate::str::contains("UnknownTool"))
        .stderr(predicate::function(|err: &str| {
            err.matches("MAX ITERATIONS EXCEEDED").count() == 1
        }))
        .stderr(predicate::str::contains("Run failed").not());
}

#[test]
fn test_run_accepts_relative_working_dir() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(text_reply("Relative roots work"))
        .create();

    let env = TestEnv::new().unwrap();
    env.create_config(Some(&server.url())).unwrap();

    env.command()
        .current_dir(env.temp_dir.path())
        .args(["run", "say hello", "--working-dir", "calculator"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Relative roots work"));
}
