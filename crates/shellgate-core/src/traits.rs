//! Collaborator traits for history storage and the assistant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AssistantRequest, AssistantResponse, CommandResult};

/// Identifier assigned by a history store.
pub type HistoryId = i64;

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest page a single history query may return.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Default number of entries in [`HistoryStatistics::top_commands`].
pub const DEFAULT_TOP_COMMANDS: usize = 10;

/// A stored command result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: HistoryId,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// History search filter.
///
/// All conditions are combined with AND; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    /// Substring the command text must contain.
    pub keyword: Option<String>,
    /// Inclusive lower bound on completion time.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on completion time.
    pub until: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub user: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryFilter {
    /// Filter matching commands that contain `keyword`.
    #[must_use]
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Self::default()
        }
    }

    /// Whether a result satisfies every condition (paging excluded).
    #[must_use]
    pub fn matches(&self, result: &CommandResult) -> bool {
        if let Some(keyword) = &self.keyword {
            if !result.command.contains(keyword.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| result.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| result.timestamp > until) {
            return false;
        }
        if self.exit_code.is_some_and(|code| result.exit_code != code) {
            return false;
        }
        if let Some(user) = &self.user {
            if &result.user != user {
                return false;
            }
        }
        true
    }

    /// Page size, defaulted and clamped.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT)
    }

    #[must_use]
    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// How often a command string occurs in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCount {
    pub command: String,
    pub count: u64,
}

/// Aggregate history summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Most frequent commands, by count descending then command ascending.
    pub top_commands: Vec<CommandCount>,
}

/// History store error.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
    #[error("History store error: {0}")]
    Internal(String),
}

/// Trait for command history backends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a result and return its identifier.
    async fn add_entry(&self, result: &CommandResult) -> Result<HistoryId, HistoryError>;

    /// Entries matching `filter`, most recent first.
    async fn search(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// The most recently added entry.
    async fn last_entry(&self) -> Result<Option<HistoryEntry>, HistoryError>;

    /// Aggregate counts with the `top` most frequent commands.
    async fn statistics(&self, top: usize) -> Result<HistoryStatistics, HistoryError>;
}

/// Assistant error.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Assistant not configured")]
    NotConfigured,
    #[error("Assistant request failed: {0}")]
    RequestFailed(String),
    #[error("Assistant returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Trait for natural-language assistants.
///
/// Implementations are stateless: every call carries its own context.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn request(&self, request: AssistantRequest) -> Result<AssistantResponse, AssistantError>;
}

/// Assistant used when none is configured; every request fails.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredAssistant;

#[async_trait]
impl Assistant for UnconfiguredAssistant {
    async fn request(&self, _request: AssistantRequest) -> Result<AssistantResponse, AssistantError> {
        Err(AssistantError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Duration;

    use super::*;

    fn result(command: &str, exit_code: i32, user: &str) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            timestamp: Utc::now(),
            working_directory: PathBuf::from("/"),
            user: user.to_string(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(HistoryFilter::default().matches(&result("ls", 1, "bob")));
    }

    #[test]
    fn test_filter_conditions_combine() {
        let filter = HistoryFilter {
            keyword: Some("git".to_string()),
            exit_code: Some(0),
            user: Some("alice".to_string()),
            ..HistoryFilter::default()
        };
        assert!(filter.matches(&result("git status", 0, "alice")));
        assert!(!filter.matches(&result("git status", 1, "alice")));
        assert!(!filter.matches(&result("git status", 0, "bob")));
        assert!(!filter.matches(&result("ls", 0, "alice")));
    }

    #[test]
    fn test_date_bounds() {
        let entry = result("ls", 0, "alice");
        let before = HistoryFilter {
            until: Some(entry.timestamp - Duration::seconds(1)),
            ..HistoryFilter::default()
        };
        let after = HistoryFilter {
            since: Some(entry.timestamp),
            ..HistoryFilter::default()
        };
        assert!(!before.matches(&entry));
        assert!(after.matches(&entry));
    }

    #[test]
    fn test_limit_is_clamped() {
        let filter = HistoryFilter {
            limit: Some(MAX_HISTORY_LIMIT * 10),
            ..HistoryFilter::default()
        };
        assert_eq!(filter.effective_limit(), MAX_HISTORY_LIMIT);
        assert_eq!(HistoryFilter::default().effective_limit(), DEFAULT_HISTORY_LIMIT);
    }
}
