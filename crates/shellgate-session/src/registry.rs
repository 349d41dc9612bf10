//! Registry of live remote sessions.

use std::{
    collections::{HashMap, hash_map::Entry},
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shellgate_core::{Permission, permission};
use shellgate_executor::{Executor, KillHandle, ShellCommand};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Identifier of one remote connection.
pub type ConnectionId = Uuid;

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session already exists: {0}")]
    AlreadyExists(ConnectionId),
}

/// Who owns a session and what they may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Client name from the auth token.
    pub subject: String,
    pub permissions: Vec<Permission>,
}

impl Identity {
    #[must_use]
    pub fn allows(&self, required: Permission) -> bool {
        permission::allows(&self.permissions, required)
    }
}

/// Settings applied to every new session's executor.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub working_dir: PathBuf,
    /// Inherited variables hidden from remote commands.
    pub hidden_vars: Vec<String>,
    /// Interpreter override; detected when unset.
    pub shell: Option<ShellCommand>,
}

impl SessionDefaults {
    #[must_use]
    pub const fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            hidden_vars: Vec::new(),
            shell: None,
        }
    }

    fn executor(&self) -> Executor {
        let executor =
            Executor::new(self.working_dir.clone()).with_hidden_vars(self.hidden_vars.iter().cloned());
        match &self.shell {
            Some(shell) => executor.with_shell(shell.clone()),
            None => executor,
        }
    }
}

/// One logical shell context bound to a connection.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    identity: Identity,
    created_at: DateTime<Utc>,
    executor: Mutex<Executor>,
    kill: KillHandle,
}

impl Session {
    fn new(id: ConnectionId, identity: Identity, executor: Executor) -> Self {
        let kill = executor.kill_handle();
        Self {
            id,
            identity,
            created_at: Utc::now(),
            executor: Mutex::new(executor),
            kill,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Exclusive access to the executor; waits for any in-flight action.
    pub async fn executor(&self) -> MutexGuard<'_, Executor> {
        self.executor.lock().await
    }

    /// Kill the in-flight command, if any, and refuse new ones.
    pub fn terminate(&self) {
        self.kill.kill();
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.kill.is_killed()
    }
}

/// Maps connection identifiers to their sessions.
///
/// `create`, `get` and `destroy` each take the map lock once, so concurrent
/// connects and disconnects never observe a half-applied change.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
    defaults: SessionDefaults,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    #[must_use]
    pub const fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    /// Allocate a fresh session for `id`.
    ///
    /// # Errors
    /// Returns [`RegistryError::AlreadyExists`] if `id` is live.
    pub fn create(&self, id: ConnectionId, identity: Identity) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(id, identity, self.defaults.executor()));
                slot.insert(Arc::clone(&session));
                tracing::info!(connection_id = %id, subject = %session.identity.subject, "Session created");
                Ok(session)
            }
        }
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove a session and terminate its executor.
    ///
    /// Returns the removed session, or `None` if `id` was not live.
    pub fn destroy(&self, id: ConnectionId) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(session) = &removed {
            session.terminate();
            tracing::info!(connection_id = %id, "Session destroyed");
        }
        removed
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Create a session that is destroyed when the returned lease drops.
    ///
    /// # Errors
    /// Returns [`RegistryError::AlreadyExists`] if `id` is live.
    pub fn lease(self: &Arc<Self>, id: ConnectionId, identity: Identity) -> Result<SessionLease, RegistryError> {
        let session = self.create(id, identity)?;
        Ok(SessionLease {
            registry: Arc::clone(self),
            session,
        })
    }
}

/// Owns a session's registration for the lifetime of a connection.
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl SessionLease {
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.session.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.destroy(self.session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            subject: "test".to_string(),
            permissions: vec![Permission::All],
        }
    }

    fn registry(dir: &std::path::Path) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(SessionDefaults::new(
            dir.canonicalize().unwrap(),
        )))
    }

    #[test]
    fn test_duplicate_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let id = Uuid::new_v4();

        registry.create(id, identity()).unwrap();
        assert!(matches!(
            registry.create(id, identity()),
            Err(RegistryError::AlreadyExists(existing)) if existing == id
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_destroy_removes_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let id = Uuid::new_v4();
        let session = registry.create(id, identity()).unwrap();

        assert!(registry.destroy(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(session.is_terminated());
        assert!(registry.destroy(id).is_none());
    }

    #[test]
    fn test_id_can_be_recreated_after_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let id = Uuid::new_v4();

        let first = registry.create(id, identity()).unwrap();
        registry.destroy(id);
        let second = registry.create(id, identity()).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_terminated());
    }

    #[test]
    fn test_lease_drop_destroys_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let id = Uuid::new_v4();

        let lease = registry.lease(id, identity()).unwrap();
        assert_eq!(lease.id(), id);
        assert_eq!(lease.session().id(), id);
        assert!(registry.get(id).is_some());
        drop(lease);

        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_identity_permissions() {
        let identity = Identity {
            subject: "ro".to_string(),
            permissions: vec![Permission::History],
        };
        assert!(identity.allows(Permission::History));
        assert!(!identity.allows(Permission::Execute));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let registry = registry(dir.path());
        let a = registry.create(Uuid::new_v4(), identity()).unwrap();
        let b = registry.create(Uuid::new_v4(), identity()).unwrap();

        {
            let mut exec_a = a.executor().await;
            exec_a.set_environment("X", "1");
            exec_a.change_directory("a").await.unwrap();
        }

        let exec_b = b.executor().await;
        let echoed = exec_b.execute("echo $X").await;
        assert_eq!(echoed.stdout.trim(), "");
        assert_eq!(exec_b.current_directory(), dir.path().canonicalize().unwrap());

        let exec_a = a.executor().await;
        assert_eq!(exec_a.execute("echo $X").await.stdout.trim(), "1");
    }
}
