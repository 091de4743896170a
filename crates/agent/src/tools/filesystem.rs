//! File listing, reading, and writing inside the working directory

use async_trait::async_trait;
use serde_json::{json, Value};

use tracing::debug;

use super::{ParamSpec, ParamType, ToolArgs, ToolFailure, ToolTrait};

pub const DEFAULT_MAX_FILE_CHARS: usize = 10_000;

/// Directory listing tool
pub struct GetFilesInfoTool;

#[async_trait]
impl ToolTrait for GetFilesInfoTool {
    fn name(&self) -> &str {
        "get_files_info"
    }
    fn description(&self) -> &str {
        "Lists files in the specified directory along with their sizes, constrained to the working directory."
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::optional(
            "directory",
            ParamType::String,
            "The directory to list files from, relative to the working directory. Defaults to the working directory itself.",
        )
        .as_path()
        .with_default(json!("."))]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        let shown = args.str("directory").unwrap_or(".").to_string();
        let path = args.path("directory").ok_or("directory was not resolved")?;

        debug!("◆ LISTING: {:?}", path);
        let is_dir = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(format!("\"{}\" is not a directory", shown).into());
        }

        let mut entries = tokio::fs::read_dir(path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;
            items.push((name, metadata.len(), metadata.is_dir()));
        }
        items.sort();

        if items.is_empty() {
            return Ok(json!(format!("\"{}\" is empty", shown)));
        }
        let lines: Vec<String> = items
            .into_iter()
            .map(|(name, size, is_dir)| {
                format!("- {}: file_size={} bytes, is_dir={}", name, size, is_dir)
            })
            .collect();
        Ok(json!(lines.join("\n")))
    }
}

/// File reading tool
pub struct GetFileContentTool {
    max_chars: usize,
}

impl GetFileContentTool {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for GetFileContentTool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_CHARS)
    }
}

#[async_trait]
impl ToolTrait for GetFileContentTool {
    fn name(&self) -> &str {
        "get_file_content"
    }
    fn description(&self) -> &str {
        "Reads the contents of the specified file, constrained to the working directory. Long files are truncated."
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "file_path",
            ParamType::String,
            "The path of the file to read, relative to the working directory.",
        )
        .as_path()]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        let shown = args.str("file_path").unwrap_or_default().to_string();
        let path = args.path("file_path").ok_or("file_path was not resolved")?;

        debug!("◆ READING: {:?}", path);
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(format!("File not found or is not a regular file: \"{}\"", shown).into());
        }

        let content = tokio::fs::read_to_string(path).await?;
        Ok(json!(truncate_chars(&content, self.max_chars, &shown)))
    }
}

/// Cut `content` after `max_chars` characters, noting the truncation.
fn truncate_chars(content: &str, max_chars: usize, shown: &str) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}[...File \"{}\" truncated at {} characters]",
            &content[..cut],
            shown,
            max_chars
        ),
        None => content.to_string(),
    }
}

/// File writing tool
pub struct WriteFileTool;

#[async_trait]
impl ToolTrait for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Writes content to a file, creating it and any missing parent directories or overwriting it, constrained to the working directory."
    }
    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "file_path",
                ParamType::String,
                "The path of the file to write, relative to the working directory.",
            )
            .as_path(),
            ParamSpec::required("content", ParamType::String, "The content to write to the file."),
        ]
    }
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolFailure> {
        let shown = args.str("file_path").unwrap_or_default().to_string();
        let path = args.path("file_path").ok_or("file_path was not resolved")?;
        let content = args.str("content").ok_or("content is required")?;

        debug!("◆ WRITING: {:?}", path);
        if tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(format!("Cannot write to \"{}\" as it is a directory", shown).into());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;

        Ok(json!(format!(
            "Successfully wrote to \"{}\" ({} characters written)",
            shown,
            content.chars().count()
        )))
    }
}
