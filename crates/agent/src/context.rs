//! System instructions for a run

use chrono::Local;

use crate::tools::ToolRegistry;

/// Builds the system prompt sent ahead of the conversation
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    override_prompt: Option<String>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the generated instructions with a fixed text
    pub fn with_override(mut self, prompt: Option<String>) -> Self {
        self.override_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn build_system_prompt(&self, registry: &ToolRegistry) -> String {
        match &self.override_prompt {
            Some(prompt) => prompt.clone(),
            None => self.generated(registry),
        }
    }

    fn generated(&self, registry: &ToolRegistry) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        let operations = self.operations(registry);

        format!(
            r#"# sandagent

You are a helpful AI coding agent.

When a user asks a question or makes a request, make a function call plan. You can perform the following operations:

{}

All paths you provide should be relative to the working directory. You do not need to specify the working directory in your function calls as it is automatically injected for security reasons.

When the task is complete, reply with your final answer as plain text and make no further function calls.

## Current Time
{}"#,
            operations, now
        )
    }

    fn operations(&self, registry: &ToolRegistry) -> String {
        if registry.is_empty() {
            return "- (no operations available)".to_string();
        }
        registry
            .describe_all()
            .into_iter()
            .map(|spec| {
                let params: Vec<String> = spec
                    .params()
                    .iter()
                    .map(|p| {
                        if p.required {
                            p.name.clone()
                        } else {
                            format!("{}?", p.name)
                        }
                    })
                    .collect();
                format!("- {}({}): {}", spec.name(), params.join(", "), spec.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
