//! File operations over the sandbox.
//!
//! Shared by the REST transport and the websocket transport. Every
//! operation resolves its path through [`Sandbox`] before touching the
//! filesystem.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::Sandbox;
use crate::api::types::{FileData, FileEntry, FileRequest, FileResponse};
use crate::error::{ConduitError, Result};

/// Permissions applied to files created by `write`.
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// What the transport should do with a decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Send this response to the client.
    Respond(FileResponse),
    /// Subscribe the connection to changes in this directory. No response.
    Watch { dir: PathBuf, label: String },
}

/// List, read and write files inside one sandbox.
#[derive(Debug, Clone)]
pub struct FileService {
    sandbox: Sandbox,
}

impl FileService {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Direct children of a directory, sorted by name.
    pub async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let dir = self.sandbox.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            let mod_time = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
                mod_time,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Whole file contents, base64 encoded.
    pub async fn read(&self, path: &str) -> Result<String> {
        let file = self.sandbox.resolve(path)?;
        let content = tokio::fs::read(&file).await?;
        Ok(STANDARD.encode(content))
    }

    /// Decode `content` and write it. Nothing is touched if decoding fails.
    pub async fn write(&self, path: &str, content: &str) -> Result<()> {
        let target = self.sandbox.resolve(path)?;
        let data = STANDARD
            .decode(content)
            .map_err(|_| ConduitError::InvalidEncoding)?;
        write_file(target, &data).await
    }

    /// Write raw bytes, creating or truncating the file.
    pub async fn write_bytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.sandbox.resolve(path)?;
        write_file(target, data).await
    }

    /// Listing for a directory, contents for anything else.
    pub async fn fetch(&self, path: &str) -> Result<FileResponse> {
        let target = self.sandbox.resolve(path)?;
        let meta = tokio::fs::metadata(&target).await?;
        if meta.is_dir() {
            let entries = self.list(path).await?;
            Ok(FileResponse::ok("list", path, FileData::Entries(entries)))
        } else {
            let content = self.read(path).await?;
            Ok(FileResponse::ok("read", path, FileData::Text(content)))
        }
    }

    /// Execute one request. Errors are carried in the response.
    pub async fn handle(&self, request: FileRequest) -> FileOutcome {
        let FileRequest {
            action,
            path,
            content,
        } = request;

        let result = match action.as_str() {
            "list" => self.list(&path).await.map(|e| Some(FileData::Entries(e))),
            "read" => self.read(&path).await.map(|c| Some(FileData::Text(c))),
            "write" => match content {
                Some(content) => self.write(&path, &content).await.map(|_| None),
                None => {
                    return FileOutcome::Respond(FileResponse::error(
                        action,
                        path,
                        "missing content",
                    ))
                }
            },
            "watch" => {
                return match self.sandbox.resolve(&path) {
                    Ok(dir) => FileOutcome::Watch { dir, label: path },
                    Err(e) => FileOutcome::Respond(FileResponse::error(
                        action,
                        path,
                        client_message(&e),
                    )),
                };
            }
            _ => return FileOutcome::Respond(FileResponse::error(action, path, "Unknown action")),
        };

        FileOutcome::Respond(match result {
            Ok(Some(data)) => FileResponse::ok(action, path, data),
            Ok(None) => FileResponse::done(action, path),
            Err(e) => {
                debug!("File {} {:?} failed: {}", action, path, e);
                FileResponse::error(action, path, client_message(&e))
            }
        })
    }
}

/// The text sent to clients for a failed operation. Never contains a
/// resolved path.
pub fn client_message(err: &ConduitError) -> String {
    match err {
        ConduitError::Io(e) => e.to_string(),
        ConduitError::Watch(e) => match &e.kind {
            notify::ErrorKind::Io(io) => io.to_string(),
            notify::ErrorKind::PathNotFound => "path not found".to_string(),
            _ => "watch failed".to_string(),
        },
        other => other.to_string(),
    }
}

async fn write_file(target: PathBuf, data: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);

    let mut file = options.open(&target).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}
