//! Python script execution inside the working directory

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{ParamSpec, ParamType, ToolArgs, ToolFailure, ToolTrait};

pub const DEFAULT_INTERPRETER: &str = "python3";

const MAX_OUTPUT_CHARS: usize = 10_000;

/// Runs a `.py` file with optional arguments.
///
/// The child is killed if the call is dropped, so the dispatcher's timeout
/// and run cancellation both stop it.
pub struct RunPythonFileTool {
    interpreter: String,
}

impl RunPythonFileTool {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for RunPythonFileTool {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

#[async_trait]
impl ToolTrait for RunPythonFileTool {
    fn name(&self) -> &str {
        "run_python_file"
    }
    fn description(&self) -> &str {
        "Executes a Python file with optional command-line arguments, constrained to the working directory, and returns its output."
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "file_path",
                ParamType::String,
                "The path of the Python file to execute, relative to the working directory.",
            )
            .as_path(),
            ParamSpec::optional(
                "args",
                ParamType::Array(Box::new(ParamType::String)),
                "Optional command-line arguments passed to the script.",
            )
            .with_default(json!([])),
        ]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        let shown = args.str("file_path").unwrap_or_default().to_string();
        let path = args.path("file_path").ok_or("file_path was not resolved")?;
        let argv = args.strings("args");

        if !tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(format!("File \"{}\" not found.", shown).into());
        }
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            return Err(format!("\"{}\" is not a Python file.", shown).into());
        }

        debug!("◆ EXECUTING: {} {:?} {:?}", self.interpreter, path, argv);
        let output = Command::new(&self.interpreter)
            .arg(path)
            .args(&argv)
            .current_dir(args.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Error executing Python file: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", stdout));
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", stderr));
        }
        match output.status.code() {
            Some(0) => {}
            Some(code) => parts.push(format!("Process exited with code {}", code)),
            None => parts.push("Process terminated by signal".to_string()),
        }

        let result = if parts.is_empty() {
            "No output produced.".to_string()
        } else {
            parts.join("\n")
        };
        Ok(json!(cap_output(result)))
    }
}

fn cap_output(result: String) -> String {
    match result.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => {
            let remaining = result[cut..].chars().count();
            format!(
                "{}\n[OUTPUT TRUNCATED: {} CHARACTERS REMAINING]",
                &result[..cut],
                remaining
            )
        }
        None => result,
    }
}
