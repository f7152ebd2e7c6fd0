//! API request and response types.

use serde::{Deserialize, Serialize};

/// Client-to-server terminal message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TerminalInput {
    /// Change the pty geometry.
    Resize {
        #[serde(default)]
        cols: u16,
        #[serde(default)]
        rows: u16,
    },
    /// Keystrokes, written verbatim to the shell.
    Data {
        #[serde(default)]
        content: String,
    },
    /// Any other message type; ignored.
    #[serde(other)]
    Unknown,
}

/// Server-to-client terminal message. Shell output itself is sent as raw
/// text frames, not wrapped in this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TerminalOutput {
    /// Sent once when the session starts.
    TerminalInfo { hostname: String, cwd: String },
}

/// File service request, shared by both transports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRequest {
    pub action: String,
    #[serde(default)]
    pub path: String,
    /// Base64 content; required for `write`.
    #[serde(default)]
    pub content: Option<String>,
}

impl FileRequest {
    pub fn new(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            path: path.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// File service response. Carries either `error` or `data`, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResponse {
    pub action: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FileData>,
}

impl FileResponse {
    pub fn ok(action: impl Into<String>, path: impl Into<String>, data: FileData) -> Self {
        Self {
            action: action.into(),
            path: path.into(),
            error: None,
            data: Some(data),
        }
    }

    pub fn error(
        action: impl Into<String>,
        path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            path: path.into(),
            error: Some(error.into()),
            data: None,
        }
    }

    /// Success with no payload (`write`).
    pub fn done(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            path: path.into(),
            error: None,
            data: None,
        }
    }

    /// Asynchronous change notification for a watched directory.
    pub fn notify(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::ok("notify", path, FileData::Text(kind.into()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Payload of a successful file response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FileData {
    /// Directory listing.
    Entries(Vec<FileEntry>),
    /// Base64 file content, or an event kind for `notify`.
    Text(String),
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mod_time: i64,
}

/// Health endpoint body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub active_connections: usize,
    pub is_installed: bool,
}

/// Generic API error response for the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_input_variants() {
        let resize: TerminalInput =
            serde_json::from_str(r#"{"type":"resize","cols":80,"rows":24}"#).unwrap();
        assert_eq!(resize, TerminalInput::Resize { cols: 80, rows: 24 });

        let data: TerminalInput =
            serde_json::from_str(r#"{"type":"data","content":"ls\n"}"#).unwrap();
        assert_eq!(
            data,
            TerminalInput::Data {
                content: "ls\n".into()
            }
        );

        let other: TerminalInput = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(other, TerminalInput::Unknown);
    }

    #[test]
    fn test_terminal_input_missing_type_fails() {
        assert!(serde_json::from_str::<TerminalInput>(r#"{"content":"x"}"#).is_err());
    }

    #[test]
    fn test_terminal_info_shape() {
        let info = TerminalOutput::TerminalInfo {
            hostname: "box".into(),
            cwd: "/home/u".into(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"type": "terminalInfo", "hostname": "box", "cwd": "/home/u"})
        );
    }

    #[test]
    fn test_file_request_optional_fields() {
        let req: FileRequest = serde_json::from_str(r#"{"action":"list"}"#).unwrap();
        assert_eq!(req, FileRequest::new("list", ""));
    }

    #[test]
    fn test_file_response_error_has_no_data() {
        let resp = FileResponse::error("read", "a.txt", "Forbidden");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"action": "read", "path": "a.txt", "error": "Forbidden"})
        );
    }

    #[test]
    fn test_file_response_listing_shape() {
        let resp = FileResponse::ok(
            "list",
            ".",
            FileData::Entries(vec![FileEntry {
                name: "a.txt".into(),
                is_dir: false,
                size: 10,
                mod_time: 1_700_000_000,
            }]),
        );
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "action": "list",
                "path": ".",
                "data": [{"name": "a.txt", "isDir": false, "size": 10, "modTime": 1_700_000_000}]
            })
        );
    }

    #[test]
    fn test_notify_shape() {
        assert_eq!(
            serde_json::to_value(FileResponse::notify("docs", "WRITE")).unwrap(),
            json!({"action": "notify", "path": "docs", "data": "WRITE"})
        );
    }
}
