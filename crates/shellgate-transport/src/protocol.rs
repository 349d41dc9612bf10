//! Wire protocol for client-server communication.

use std::{collections::BTreeMap, path::PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use shellgate_core::{
    AssistantContext, AssistantRequestKind, AssistantResponse, OutputChunk, OutputStream,
    Permission, RemoteCommandResult, ShellContext,
};

/// Run a command in the connection's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Client-chosen correlation id.
    pub id: String,
    pub command: String,
    /// Directory to switch to before running; persists for the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Variables to overlay before running; persist for the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    /// Emit `output` events while the command runs.
    #[serde(default)]
    pub stream: bool,
}

/// Ask the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiQueryRequest {
    pub id: String,
    pub request_type: AssistantRequestKind,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AssistantContext>,
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Execute(ExecuteRequest),
    ChangeDirectory { id: String, path: String },
    AiQuery(AiQueryRequest),
    EnvironmentQuery { id: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Correlation id, if the message carries one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Execute(req) => Some(&req.id),
            Self::AiQuery(req) => Some(&req.id),
            Self::ChangeDirectory { id, .. } | Self::EnvironmentQuery { id } => Some(id),
            Self::Ping => None,
        }
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PermissionDenied,
    InvalidDirectory,
    InvalidMessage,
    SessionNotFound,
    AssistantFailed,
    HistoryFailed,
}

/// Sent once after a connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    pub connection_id: String,
    pub user: String,
    pub working_directory: PathBuf,
    pub permissions: Vec<Permission>,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedInfo),
    /// Live output chunk (base64 encoded).
    Output {
        id: String,
        stream: OutputStream,
        data: String,
    },
    CommandResult {
        id: String,
        result: RemoteCommandResult,
    },
    DirectoryChanged {
        id: String,
        #[serde(rename = "workingDirectory")]
        working_directory: PathBuf,
    },
    AiResponse {
        id: String,
        response: AssistantResponse,
    },
    Environment {
        id: String,
        #[serde(flatten)]
        context: ShellContext,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        code: ErrorCode,
        message: String,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create an output message from a captured chunk.
    #[must_use]
    pub fn output(id: impl Into<String>, chunk: &OutputChunk) -> Self {
        Self::Output {
            id: id.into(),
            stream: chunk.stream,
            data: BASE64.encode(&chunk.data),
        }
    }

    /// Decode output data from base64.
    #[must_use]
    pub fn decode_output(&self) -> Option<Vec<u8>> {
        if let Self::Output { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }

    #[must_use]
    pub fn error(id: Option<&str>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.map(str::to_string),
            code,
            message: message.into(),
        }
    }
}
