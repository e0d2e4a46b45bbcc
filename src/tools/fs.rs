//! File-system tools. Every operation is a reverse request to the client.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{parse_args, ToolContext, ToolDefinition, ToolFuture};
use crate::protocol::{
    self, methods, GrepSearchParams, ListDirsParams, ReadTextFileParams, WriteTextFileParams,
};
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct GrepSearchArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_sensitive: Option<bool>,
    #[serde(default)]
    file_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListDirectoryArgs {
    path: String,
    #[serde(default)]
    recursive: bool,
}

/// Definitions of the four file-system tools.
#[must_use]
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "read_file",
            "Read the full text of a file in the user's workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path, relative to the workspace root" }
                },
                "required": ["path"]
            }),
            read_file,
        ),
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a text file in the user's workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path, relative to the workspace root" },
                    "content": { "type": "string", "description": "Complete new file contents" }
                },
                "required": ["path", "content"]
            }),
            write_file,
        ),
        ToolDefinition::new(
            "grep_search",
            "Search files in the user's workspace for lines matching a regular expression.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "path": { "type": "string", "description": "File or directory to search; defaults to the workspace root" },
                    "case_sensitive": { "type": "boolean", "default": false },
                    "file_pattern": { "type": "string", "description": "Glob on file names, e.g. *.rs" }
                },
                "required": ["pattern"]
            }),
            grep_search,
        ),
        ToolDefinition::new(
            "list_directory",
            "List the entries of a directory in the user's workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory path, relative to the workspace root" },
                    "recursive": { "type": "boolean", "default": false }
                },
                "required": ["path"]
            }),
            list_directory,
        ),
    ]
}

fn read_file(args: Map<String, Value>, ctx: ToolContext<'_>) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ReadFileArgs = parse_args("read_file", args)?;
        let path = non_empty_path("read_file", args.path)?;
        let params = ReadTextFileParams {
            session_id: Some(ctx.session_id.to_owned()),
            path,
        };
        call_client(ctx, methods::FS_READ_TEXT_FILE, &params).await
    })
}

fn write_file(args: Map<String, Value>, ctx: ToolContext<'_>) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: WriteFileArgs = parse_args("write_file", args)?;
        let path = non_empty_path("write_file", args.path)?;
        let bytes = args.content.len();
        let params = WriteTextFileParams {
            session_id: Some(ctx.session_id.to_owned()),
            path: path.clone(),
            content: args.content,
        };
        call_client(ctx, methods::FS_WRITE_TEXT_FILE, &params).await?;
        Ok(json!({ "path": path, "bytesWritten": bytes }))
    })
}

fn grep_search(args: Map<String, Value>, ctx: ToolContext<'_>) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: GrepSearchArgs = parse_args("grep_search", args)?;
        if args.pattern.is_empty() {
            return Err(AppError::ToolExecution(
                "grep_search: pattern must not be empty".into(),
            ));
        }
        let params = GrepSearchParams {
            session_id: Some(ctx.session_id.to_owned()),
            pattern: args.pattern,
            path: args.path,
            case_sensitive: args.case_sensitive,
            file_pattern: args.file_pattern,
        };
        call_client(ctx, methods::FS_GREP_SEARCH, &params).await
    })
}

fn list_directory(args: Map<String, Value>, ctx: ToolContext<'_>) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ListDirectoryArgs = parse_args("list_directory", args)?;
        let path = non_empty_path("list_directory", args.path)?;
        let params = ListDirsParams {
            session_id: Some(ctx.session_id.to_owned()),
            path,
            recursive: args.recursive,
        };
        call_client(ctx, methods::FS_LIST_DIRS, &params).await
    })
}

async fn call_client<P: Serialize>(
    ctx: ToolContext<'_>,
    method: &'static str,
    params: &P,
) -> Result<Value> {
    let params = protocol::to_value(params)?;
    ctx.peer.request(method, params).await
}

fn non_empty_path(tool: &str, path: String) -> Result<String> {
    if path.trim().is_empty() {
        return Err(AppError::ToolExecution(format!(
            "{tool}: path must not be empty"
        )));
    }
    Ok(path)
}
