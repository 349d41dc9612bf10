//! Request and response types exchanged with the assistant collaborator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::CommandResult;

/// What the caller wants the assistant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantRequestKind {
    /// Turn a natural-language description into a shell command.
    NaturalLanguage,
    /// Explain why the last command failed and how to fix it.
    ErrorAnalysis,
    /// Explain what a command does.
    Explain,
    /// Free-form conversation.
    Chat,
}

/// Kind of content the assistant returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantResponseKind {
    Command,
    Explanation,
    Suggestion,
    Chat,
}

impl AssistantRequestKind {
    /// Response kind produced for this request kind.
    #[must_use]
    pub const fn response_kind(self) -> AssistantResponseKind {
        match self {
            Self::NaturalLanguage => AssistantResponseKind::Command,
            Self::ErrorAnalysis => AssistantResponseKind::Suggestion,
            Self::Explain => AssistantResponseKind::Explanation,
            Self::Chat => AssistantResponseKind::Chat,
        }
    }
}

/// Optional shell context attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

/// A single assistant request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    #[serde(rename = "requestType")]
    pub kind: AssistantRequestKind,
    pub query: String,
    #[serde(default)]
    pub context: AssistantContext,
}

/// The assistant's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    #[serde(rename = "responseType")]
    pub kind: AssistantResponseKind,
    pub content: String,
    /// Command extracted from `content`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}
