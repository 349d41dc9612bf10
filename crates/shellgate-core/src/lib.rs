//! Core data model for shellgate.
//!
//! This crate provides the types every other crate speaks:
//! - `CommandResult` - Structured outcome of one command
//! - `ShellContext` - Working directory and environment snapshot
//! - `Permission` - Capabilities carried by remote auth tokens
//! - `HistoryStore` and `Assistant` collaborator traits

pub mod assistant;
pub mod context;
pub mod permission;
pub mod result;
pub mod traits;

pub use assistant::{
    AssistantContext, AssistantRequest, AssistantRequestKind, AssistantResponse,
    AssistantResponseKind,
};
pub use context::ShellContext;
pub use permission::Permission;
pub use result::{
    CommandResult, LAUNCH_FAILURE_EXIT_CODE, OutputChunk, OutputStream, RemoteCommandResult,
};
pub use traits::{
    Assistant, AssistantError, HistoryEntry, HistoryError, HistoryFilter, HistoryId,
    HistoryStatistics, HistoryStore, UnconfiguredAssistant,
};
