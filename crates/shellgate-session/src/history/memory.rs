//! In-memory history store.

use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::RwLock,
};

use async_trait::async_trait;
use shellgate_core::{
    CommandResult, HistoryEntry, HistoryError, HistoryFilter, HistoryId, HistoryStatistics,
    HistoryStore, traits::CommandCount,
};

struct Inner {
    entries: Vec<HistoryEntry>,
    next_id: HistoryId,
}

/// In-memory history implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryHistory {
    inner: RwLock<Inner>,
}

impl MemoryHistory {
    /// Create an empty in-memory history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> HistoryError {
    HistoryError::Internal(e.to_string())
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn add_entry(&self, result: &CommandResult) -> Result<HistoryId, HistoryError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(HistoryEntry {
            id,
            result: result.clone(),
        });
        Ok(id)
    }

    async fn search(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
        let inner = self.inner.read().map_err(poisoned)?;

        let mut matched: Vec<&HistoryEntry> = inner
            .entries
            .iter()
            .filter(|entry| filter.matches(&entry.result))
            .collect();

        // Most recent first; insertion order breaks timestamp ties.
        matched.sort_by_key(|entry| Reverse((entry.result.timestamp, entry.id)));

        Ok(matched
            .into_iter()
            .skip(filter.effective_offset())
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }

    async fn last_entry(&self) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.inner.read().map_err(poisoned)?.entries.last().cloned())
    }

    async fn statistics(&self, top: usize) -> Result<HistoryStatistics, HistoryError> {
        let inner = self.inner.read().map_err(poisoned)?;

        let mut counts: HashMap<&str, u64> = HashMap::new();
        let mut successful = 0;
        for entry in &inner.entries {
            if entry.result.success() {
                successful += 1;
            }
            *counts.entry(entry.result.command.as_str()).or_default() += 1;
        }

        let mut top_commands: Vec<CommandCount> = counts
            .into_iter()
            .map(|(command, count)| CommandCount {
                command: command.to_string(),
                count,
            })
            .collect();
        top_commands.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.command.cmp(&b.command)));
        top_commands.truncate(top);

        let total = inner.entries.len() as u64;
        Ok(HistoryStatistics {
            total,
            successful,
            failed: total - successful,
            top_commands,
        })
    }
}
