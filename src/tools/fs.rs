//! Filesystem tools confined to the run's working directory.

use std::path::{Component, Path, PathBuf};

use crate::errors::ToolError;

/// Max bytes returned by `file_read` before truncation.
pub const MAX_READ_BYTES: usize = 200_000;

/// Resolve `relative` against `cwd`, rejecting anything that escapes it.
///
/// The check is lexical so it also works for paths that do not exist yet
/// (`file_write`); symlinks inside the root are followed as-is.
pub fn resolve_safe(tool: &str, relative: &str, cwd: &Path) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(ToolError::execution(
            tool,
            format!("Path '{}' must be relative to the project root", relative),
        ));
    }

    let mut resolved = cwd.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ToolError::execution(
                        tool,
                        format!("Path traversal outside project root: '{}'", relative),
                    ));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::execution(
                    tool,
                    format!("Path '{}' must be relative to the project root", relative),
                ));
            }
        }
    }
    Ok(resolved)
}

pub async fn file_read(relative: &str, cwd: &Path) -> Result<String, ToolError> {
    let path = resolve_safe("file_read", relative, cwd)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ToolError::execution("file_read", format!("{}: {}", relative, e)))?;

    if bytes.len() > MAX_READ_BYTES {
        let head = String::from_utf8_lossy(&bytes[..MAX_READ_BYTES]);
        return Ok(format!(
            "{}\n\n[... truncated, {} bytes total ...]",
            head,
            bytes.len()
        ));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Sorted entry names; directories carry a trailing `/`.
pub async fn file_list(relative: &str, cwd: &Path) -> Result<Vec<String>, ToolError> {
    let path = resolve_safe("file_list", relative, cwd)?;
    let mut dir = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| ToolError::execution("file_list", format!("{}: {}", relative, e)))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::execution("file_list", e.to_string()))?
    {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(entries)
}

/// Write `content`, creating parent directories. Returns the written path.
pub async fn file_write(relative: &str, content: &str, cwd: &Path) -> Result<PathBuf, ToolError> {
    let path = resolve_safe("file_write", relative, cwd)?;
    if path == cwd {
        return Err(ToolError::execution("file_write", "Path must name a file"));
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::execution("file_write", e.to_string()))?;
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| ToolError::execution("file_write", format!("{}: {}", relative, e)))?;
    Ok(path)
}
