//! Common test utilities for sandagent integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::json;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Path to the sandagent binary
pub fn bin_path() -> PathBuf {
    env!("CARGO_BIN_EXE_sandagent").into()
}

/// Test environment with an isolated home directory
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".sandagent");
        let working_dir = temp_dir.path().join("calculator");

        std::fs::create_dir_all(&config_dir)?;

        Ok(Self {
            temp_dir,
            config_dir,
            working_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn working_file(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    /// A command whose home, and so whose config, is the test environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sandagent"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("OPENAI_API_KEY");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config pointing the provider at `api_base` and create the working dir
    pub fn create_config(&self, api_base: Option<&str>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.working_dir)?;
        let mut config = json!({
            "agent": {
                "working_dir": self.working_dir,
                "model": "test-model",
                "max_iterations": 4,
                "max_retries": 0,
                "retry_backoff_ms": 1
            },
            "provider": {
                "api_key": "test-api-key"
            }
        });
        if let Some(base) = api_base {
            config["provider"]["api_base"] = json!(base);
        }
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
