//! Tool registry and the built-in toolset

pub mod filesystem;
pub mod python;
pub mod sandbox;
pub mod schema;

pub use filesystem::{GetFileContentTool, GetFilesInfoTool, WriteFileTool};
pub use python::RunPythonFileTool;
pub use sandbox::{PathEscapeError, Sandbox};
pub use schema::{ArgumentIssue, ParamSpec, ParamType, ToolArgs};

use async_trait::async_trait;
use sandagent_provider::Tool;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a tool implementation
pub type ToolFailure = Box<dyn std::error::Error + Send + Sync>;

/// A callable operation
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ParamSpec>;
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("◆ DUPLICATE TOOL: {0}")]
    DuplicateTool(String),

    #[error("◆ TOOL NOT FOUND: {0}")]
    NotFound(String),
}

/// Name, schema, and implementation of one registered tool
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    handler: Arc<dyn ToolTrait>,
}

impl ToolSpec {
    pub fn new<T: ToolTrait + 'static>(tool: T) -> Self {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(handler: Arc<dyn ToolTrait>) -> Self {
        Self {
            name: handler.name().to_string(),
            description: handler.description().to_string(),
            params: handler.parameters(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ToolTrait> {
        &self.handler
    }

    /// JSON Schema advertised to the model
    pub fn json_schema(&self) -> Value {
        schema::json_schema(&self.params)
    }

    pub fn to_provider_tool(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.json_schema())
    }
}

impl PartialEq for ToolSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.params == other.params
            && std::ptr::eq(
                Arc::as_ptr(&self.handler) as *const (),
                Arc::as_ptr(&other.handler) as *const (),
            )
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// The fixed set of tools the agent may call.
///
/// Built once at startup, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(spec.name()) {
            return Err(RegistryError::DuplicateTool(spec.name().to_string()));
        }
        self.tools.insert(spec.name().to_string(), spec);
        Ok(())
    }

    pub fn register_tool<T: ToolTrait + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        self.register(ToolSpec::new(tool))
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolSpec, RegistryError> {
        self.tools
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Every registered tool, in name order
    pub fn describe_all(&self) -> Vec<&ToolSpec> {
        self.tools.values().collect()
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.values().map(ToolSpec::to_provider_tool).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Knobs for the built-in toolset
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub max_file_chars: usize,
    pub python: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_file_chars: filesystem::DEFAULT_MAX_FILE_CHARS,
            python: python::DEFAULT_INTERPRETER.to_string(),
        }
    }
}

/// Register the built-in file and code-execution tools
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    settings: &ToolSettings,
) -> Result<(), RegistryError> {
    registry.register_tool(GetFilesInfoTool)?;
    registry.register_tool(GetFileContentTool::new(settings.max_file_chars))?;
    registry.register_tool(WriteFileTool)?;
    registry.register_tool(RunPythonFileTool::new(settings.python.clone()))?;
    Ok(())
}

/// A registry holding exactly the built-in tools
pub fn default_registry(settings: &ToolSettings) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, settings)?;
    Ok(registry)
}
