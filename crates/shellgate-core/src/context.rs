//! Snapshot of a session's shell state.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Working directory and environment of a session at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellContext {
    /// Absolute working directory.
    pub working_directory: PathBuf,

    /// Effective environment, ordered by key.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ShellContext {
    /// Create a context with an empty environment.
    #[must_use]
    pub const fn new(working_directory: PathBuf) -> Self {
        Self {
            working_directory,
            environment: BTreeMap::new(),
        }
    }

    /// Get an environment variable by name.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }
}
