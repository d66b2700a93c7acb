//! File system handlers for agent `fs/*` requests
//!
//! Paths must be absolute and are resolved through symlinks before use.
//! Reads of non-existent files answer `{content: null, exists: false}` so
//! agents can probe for existence without triggering an error round-trip.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::debug;

use crate::protocol::{codes, RpcError};

/// Handle `fs/read_text_file`: `{path}` -> `{content}`.
pub async fn handle_read_text_file(params: &Value) -> Result<Value, RpcError> {
    let path = require_absolute_path(params)?;

    // Resolve symlinks; a missing file is the probe case, not an error.
    let resolved = match tokio::fs::canonicalize(&path).await {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(json!({"content": null, "exists": false}));
        }
        Err(err) => return Err(map_fs_error(&path, err)),
    };

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|err| map_fs_error(&path, err))?;
    if metadata.is_dir() {
        return Err(RpcError::new(
            codes::NOT_A_FILE,
            format!("Path is not a file: {}", path.display()),
        ));
    }

    match tokio::fs::read_to_string(&resolved).await {
        Ok(content) => {
            debug!(path = %resolved.display(), bytes = content.len(), "file read");
            Ok(json!({"content": content}))
        }
        Err(err) if err.kind() == ErrorKind::InvalidData => Err(RpcError::new(
            codes::INVALID_UTF8,
            format!("File is not valid UTF-8 text: {}", path.display()),
        )),
        Err(err) => Err(map_fs_error(&path, err)),
    }
}

/// Handle `fs/write_text_file`: `{path, content}` -> `{success: true}`.
///
/// Parent directories are created as needed; writing over an existing
/// directory is refused.
pub async fn handle_write_text_file(params: &Value) -> Result<Value, RpcError> {
    let path = require_absolute_path(params)?;
    let content = params
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("Missing required parameter: content"))?;

    if tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(RpcError::new(
            codes::NOT_A_FILE,
            format!("Path is a directory: {}", path.display()),
        ));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| map_fs_error(&path, err))?;
        }
    }

    tokio::fs::write(&path, content)
        .await
        .map_err(|err| map_fs_error(&path, err))?;

    debug!(path = %path.display(), bytes = content.len(), "file written");
    Ok(json!({"success": true}))
}

fn require_absolute_path(params: &Value) -> Result<PathBuf, RpcError> {
    let path = params
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| RpcError::invalid_params("Missing required parameter: path"))?;

    let path = PathBuf::from(path);
    if !path.is_absolute() {
        return Err(RpcError::invalid_params(format!(
            "Path must be absolute: {}",
            path.display()
        )));
    }
    Ok(path)
}

fn map_fs_error(path: &Path, err: std::io::Error) -> RpcError {
    match err.kind() {
        ErrorKind::PermissionDenied => RpcError::new(
            codes::ACCESS_DENIED,
            format!("Permission denied: {}", path.display()),
        ),
        _ => RpcError::new(
            codes::AGENT_ERROR,
            format!("File operation failed on {}: {err}", path.display()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("note.txt");
        tokio::fs::write(&file, "hello world").await.unwrap();

        let result = handle_read_text_file(&json!({"path": file.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(result["content"], "hello world");
    }

    #[tokio::test]
    async fn test_read_missing_file_reports_exists_false() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("missing.txt");

        let result = handle_read_text_file(&json!({"path": file.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(result["content"], Value::Null);
        assert_eq!(result["exists"], false);
    }

    #[tokio::test]
    async fn test_read_relative_path_rejected() {
        let err = handle_read_text_file(&json!({"path": "relative/file.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_read_missing_path_param_rejected() {
        let err = handle_read_text_file(&json!({})).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_read_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let err = handle_read_text_file(&json!({"path": dir.path().to_str().unwrap()}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::NOT_A_FILE);
    }

    #[tokio::test]
    async fn test_read_non_utf8_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("binary.dat");
        tokio::fs::write(&file, [0xff_u8, 0xfe, 0x00, 0x9f]).await.unwrap();

        let err = handle_read_text_file(&json!({"path": file.to_str().unwrap()}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_UTF8);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_follows_symlinks() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target.txt");
        tokio::fs::write(&target, "through the link").await.unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = handle_read_text_file(&json!({"path": link.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(result["content"], "through the link");
    }

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("deep/nested/out.txt");

        let result = handle_write_text_file(
            &json!({"path": file.to_str().unwrap(), "content": "payload"}),
        )
        .await
        .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(tokio::fs::read_to_string(&file).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_write_over_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let err = handle_write_text_file(
            &json!({"path": dir.path().to_str().unwrap(), "content": "x"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, codes::NOT_A_FILE);
    }

    #[tokio::test]
    async fn test_write_missing_content_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.txt");
        let err = handle_write_text_file(&json!({"path": file.to_str().unwrap()}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cycle.txt");
        let path = file.to_str().unwrap();

        handle_write_text_file(&json!({"path": path, "content": "first"}))
            .await
            .unwrap();
        handle_write_text_file(&json!({"path": path, "content": "second"}))
            .await
            .unwrap();

        let result = handle_read_text_file(&json!({"path": path})).await.unwrap();
        assert_eq!(result["content"], "second");
    }
}
