//! Shell command executor for shellgate.
//!
//! Provides:
//! - `Executor` - Run commands for one session and capture `CommandResult`s
//! - Shell detection utilities for Unix and Windows
//! - `HttpAssistant` - OpenAI-compatible assistant client

pub mod assistant;
pub mod executor;
pub mod shell;

pub use assistant::{HttpAssistant, HttpAssistantConfig, extract_command};
pub use executor::{Executor, ExecutorError, KillHandle, NESTED_MARKER_VAR};
pub use shell::{ShellCommand, current_user};
