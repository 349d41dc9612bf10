//! Action routing for authenticated connections.

use std::sync::Arc;

use shellgate_core::{
    Assistant, AssistantRequest, HistoryStore, Permission, RemoteCommandResult,
};
use shellgate_session::{ConnectionId, RegistryError, Session, SessionLease, SessionRegistry};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    auth::{AuthError, Claims, TokenAuthority},
    protocol::{
        AiQueryRequest, ClientMessage, ConnectedInfo, ErrorCode, ExecuteRequest, ServerMessage,
    },
};

/// Routes remote actions to per-connection sessions.
///
/// Transport-independent: the WebSocket handler feeds it parsed messages and
/// forwards whatever it returns.
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    history: Arc<dyn HistoryStore>,
    assistant: Arc<dyn Assistant>,
    authority: TokenAuthority,
}

impl Gateway {
    /// Create a new gateway.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        history: Arc<dyn HistoryStore>,
        assistant: Arc<dyn Assistant>,
        authority: TokenAuthority,
    ) -> Self {
        Self {
            registry,
            history,
            assistant,
            authority,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    #[must_use]
    pub const fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    /// Verify a presented token.
    ///
    /// # Errors
    /// Returns an [`AuthError`] for missing, malformed, foreign or expired tokens.
    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        self.authority.verify(token)
    }

    /// Register a session for a newly authenticated connection.
    ///
    /// The session lives until the returned lease is dropped.
    ///
    /// # Errors
    /// Returns error if the generated id collides with a live session.
    pub fn open_session(&self, claims: &Claims) -> Result<SessionLease, RegistryError> {
        self.registry.lease(Uuid::new_v4(), claims.identity())
    }

    /// Greeting sent once a session is open.
    pub async fn connected_info(&self, session: &Session) -> ConnectedInfo {
        let executor = session.executor().await;
        ConnectedInfo {
            connection_id: session.id().to_string(),
            user: executor.user().to_string(),
            working_directory: executor.current_directory().to_path_buf(),
            permissions: session.identity().permissions.clone(),
        }
    }

    /// Handle one action and return its response.
    ///
    /// Intermediate events (live output, history failures) go to `events`
    /// before the response is returned.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
        events: &mpsc::UnboundedSender<ServerMessage>,
    ) -> ServerMessage {
        let Some(session) = self.registry.get(connection_id) else {
            tracing::debug!(%connection_id, "Dropping action for closed connection");
            return ServerMessage::error(
                message.id(),
                ErrorCode::SessionNotFound,
                "connection is no longer active",
            );
        };

        match message {
            ClientMessage::Ping => ServerMessage::Pong,
            ClientMessage::Execute(request) => self.execute(&session, request, events).await,
            ClientMessage::ChangeDirectory { id, path } => {
                self.change_directory(&session, id, &path).await
            }
            ClientMessage::AiQuery(request) => self.ai_query(&session, request).await,
            ClientMessage::EnvironmentQuery { id } => {
                let context = session.executor().await.context();
                ServerMessage::Environment { id, context }
            }
        }
    }

    async fn execute(
        &self,
        session: &Session,
        request: ExecuteRequest,
        events: &mpsc::UnboundedSender<ServerMessage>,
    ) -> ServerMessage {
        let ExecuteRequest {
            id,
            command,
            working_directory,
            environment,
            stream,
        } = request;

        if let Err(denied) = require(session, &id, Permission::Execute) {
            return denied;
        }

        let mut executor = session.executor().await;

        if let Some(dir) = working_directory {
            if let Err(e) = executor.change_directory(&dir).await {
                return ServerMessage::error(Some(&id), ErrorCode::InvalidDirectory, e.to_string());
            }
        }
        for (key, value) in environment.unwrap_or_default() {
            executor.set_environment(key, value);
        }

        let result = if stream {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let forward_id = id.clone();
            let forward_events = events.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    let _ = forward_events.send(ServerMessage::output(forward_id.as_str(), &chunk));
                }
            });
            let result = executor.execute_streaming(&command, Some(tx)).await;
            // Every output event must precede the final result.
            let _ = forwarder.await;
            result
        } else {
            executor.execute(&command).await
        };
        drop(executor);

        tracing::info!(
            connection_id = %session.id(),
            command_id = %id,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Command executed"
        );

        if let Err(e) = self.history.add_entry(&result).await {
            tracing::warn!(command_id = %id, "Failed to record history: {e}");
            let _ = events.send(ServerMessage::error(
                Some(&id),
                ErrorCode::HistoryFailed,
                e.to_string(),
            ));
        }

        ServerMessage::CommandResult {
            id: id.clone(),
            result: RemoteCommandResult::new(id, result),
        }
    }

    async fn change_directory(&self, session: &Session, id: String, path: &str) -> ServerMessage {
        if let Err(denied) = require(session, &id, Permission::Execute) {
            return denied;
        }
        match session.executor().await.change_directory(path).await {
            Ok(working_directory) => ServerMessage::DirectoryChanged { id, working_directory },
            Err(e) => ServerMessage::error(Some(&id), ErrorCode::InvalidDirectory, e.to_string()),
        }
    }

    async fn ai_query(&self, session: &Session, request: AiQueryRequest) -> ServerMessage {
        let AiQueryRequest {
            id,
            request_type,
            query,
            context,
        } = request;

        if let Err(denied) = require(session, &id, Permission::Ai) {
            return denied;
        }

        let mut context = context.unwrap_or_default();
        if context.working_directory.is_none() {
            context.working_directory =
                Some(session.executor().await.current_directory().to_path_buf());
        }

        let request = AssistantRequest {
            kind: request_type,
            query,
            context,
        };
        match self.assistant.request(request).await {
            Ok(response) => ServerMessage::AiResponse { id, response },
            Err(e) => {
                tracing::warn!(command_id = %id, "Assistant request failed: {e}");
                ServerMessage::error(Some(&id), ErrorCode::AssistantFailed, e.to_string())
            }
        }
    }
}

fn require(session: &Session, id: &str, permission: Permission) -> Result<(), ServerMessage> {
    if session.identity().allows(permission) {
        Ok(())
    } else {
        tracing::warn!(
            connection_id = %session.id(),
            command_id = id,
            %permission,
            "Permission denied"
        );
        Err(ServerMessage::error(
            Some(id),
            ErrorCode::PermissionDenied,
            format!("permission denied: requires '{permission}'"),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use shellgate_core::{
        AssistantRequestKind, CommandResult, HistoryEntry, HistoryError, HistoryFilter, HistoryId,
        HistoryStatistics, UnconfiguredAssistant,
    };
    use shellgate_session::{SessionDefaults, history::MemoryHistory};

    use super::*;

    const CREDENTIAL: &str = "0123456789abcdef0123456789abcdef";

    /// Store whose every write fails.
    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn add_entry(&self, _result: &CommandResult) -> Result<HistoryId, HistoryError> {
            Err(HistoryError::Unavailable("disk full".to_string()))
        }

        async fn search(&self, _filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
            Ok(Vec::new())
        }

        async fn last_entry(&self) -> Result<Option<HistoryEntry>, HistoryError> {
            Ok(None)
        }

        async fn statistics(&self, _top: usize) -> Result<HistoryStatistics, HistoryError> {
            Err(HistoryError::Unavailable("disk full".to_string()))
        }
    }

    fn gateway(root: &Path, history: Arc<dyn HistoryStore>) -> Gateway {
        let registry = Arc::new(SessionRegistry::new(SessionDefaults::new(root.to_path_buf())));
        let authority =
            TokenAuthority::new(CREDENTIAL, b"gateway-test-key", chrono::Duration::minutes(5)).unwrap();
        Gateway::new(registry, history, Arc::new(UnconfiguredAssistant), authority)
    }

    fn claims(permissions: Vec<Permission>) -> Claims {
        Claims {
            sub: "test".to_string(),
            permissions,
            iat: 0,
            exp: i64::MAX,
        }
    }

    fn ai_query(id: &str) -> ClientMessage {
        ClientMessage::AiQuery(AiQueryRequest {
            id: id.to_string(),
            request_type: AssistantRequestKind::NaturalLanguage,
            query: "list files".to_string(),
            context: None,
        })
    }

    fn execute(id: &str, command: &str) -> ClientMessage {
        ClientMessage::Execute(ExecuteRequest {
            id: id.to_string(),
            command: command.to_string(),
            working_directory: None,
            environment: None,
            stream: false,
        })
    }

    fn error_code(message: &ServerMessage, expected_id: &str) -> ErrorCode {
        match message {
            ServerMessage::Error { id, code, .. } => {
                assert_eq!(id.as_deref(), Some(expected_id));
                *code
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_history_only_token_is_gated_per_action() {
        let (_dir, root) = canonical_tempdir();
        let gateway = gateway(&root, Arc::new(MemoryHistory::new()));
        let lease = gateway.open_session(&claims(vec![Permission::History])).unwrap();
        let (events, _rx) = mpsc::unbounded_channel();

        let reply = gateway.dispatch(lease.id(), ai_query("q1"), &events).await;
        assert_eq!(error_code(&reply, "q1"), ErrorCode::PermissionDenied);

        let change = ClientMessage::ChangeDirectory {
            id: "d1".to_string(),
            path: "/".to_string(),
        };
        let reply = gateway.dispatch(lease.id(), change, &events).await;
        assert_eq!(error_code(&reply, "d1"), ErrorCode::PermissionDenied);
        assert_eq!(lease.session().executor().await.current_directory(), root);

        let query = ClientMessage::EnvironmentQuery { id: "e1".to_string() };
        match gateway.dispatch(lease.id(), query, &events).await {
            ServerMessage::Environment { id, context } => {
                assert_eq!(id, "e1");
                assert_eq!(context.working_directory, root);
            }
            other => panic!("expected environment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_assistant_failure_keeps_session_usable() {
        let (_dir, root) = canonical_tempdir();
        let gateway = gateway(&root, Arc::new(MemoryHistory::new()));
        let lease = gateway.open_session(&claims(vec![Permission::All])).unwrap();
        let (events, _rx) = mpsc::unbounded_channel();

        let reply = gateway.dispatch(lease.id(), ai_query("q1"), &events).await;
        assert_eq!(error_code(&reply, "q1"), ErrorCode::AssistantFailed);

        match gateway.dispatch(lease.id(), execute("c1", "echo ok"), &events).await {
            ServerMessage::CommandResult { id, result } => {
                assert_eq!(id, "c1");
                assert_eq!(result.result.exit_code, 0);
                assert_eq!(result.result.stdout, "ok\n");
            }
            other => panic!("expected command result, got {other:?}"),
        }
        assert_eq!(gateway.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_is_reported_before_result() {
        let (_dir, root) = canonical_tempdir();
        let gateway = gateway(&root, Arc::new(BrokenHistory));
        let lease = gateway.open_session(&claims(vec![Permission::Execute])).unwrap();
        let (events, mut rx) = mpsc::unbounded_channel();

        let reply = gateway.dispatch(lease.id(), execute("c1", "exit 3"), &events).await;

        let event = rx.try_recv().expect("history failure event");
        assert_eq!(error_code(&event, "c1"), ErrorCode::HistoryFailed);
        match reply {
            ServerMessage::CommandResult { result, .. } => assert_eq!(result.result.exit_code, 3),
            other => panic!("expected command result, got {other:?}"),
        }
        assert!(gateway.registry().get(lease.id()).is_some());
    }

    #[tokio::test]
    async fn test_dispatch_after_close_reports_missing_session() {
        let (_dir, root) = canonical_tempdir();
        let gateway = gateway(&root, Arc::new(MemoryHistory::new()));
        let lease = gateway.open_session(&claims(vec![Permission::All])).unwrap();
        let id = lease.id();
        drop(lease);
        let (events, _rx) = mpsc::unbounded_channel();

        let reply = gateway.dispatch(id, execute("c1", "echo hi"), &events).await;
        assert_eq!(error_code(&reply, "c1"), ErrorCode::SessionNotFound);
    }
}
