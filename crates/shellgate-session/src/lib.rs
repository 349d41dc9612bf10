//! Session registry and history storage for shellgate.
//!
//! Provides:
//! - `SessionRegistry` - Map remote connections to their own executors
//! - History store implementations (memory, SQLite)

pub mod history;
pub mod registry;

pub use registry::{
    ConnectionId, Identity, RegistryError, Session, SessionDefaults, SessionLease, SessionRegistry,
};
