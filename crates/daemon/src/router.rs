//! Message router for dispatching client requests to the session registry.
//!
//! The router parses and validates every incoming frame before anything
//! reaches the session core, then turns the outcome into the event that is
//! sent back to the requesting client.

use std::sync::Arc;

use termbridge_protocol::{
    ClientRequest, CloseTerminal, CreateTerminal, ProtocolError, ServerEvent, TerminalInput,
    TerminalResize,
};
use tracing::{debug, info, warn};

use crate::session::{SessionError, SessionManager};
use crate::transport::ClientId;

/// Result type for router operations.
pub type RouterResult = Result<Option<ServerEvent>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Session-related error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The frame could not be parsed or failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RouterError {
    /// Convert the error to a `terminal_error` event.
    pub fn to_event(&self, session_id: Option<String>) -> ServerEvent {
        let message = match self {
            RouterError::Protocol(ProtocolError::InvalidRequest(reason)) => reason.clone(),
            RouterError::Session(SessionError::SpawnFailed(reason)) => {
                format!("Failed to create terminal session: {}", reason)
            }
            RouterError::Session(e) => e.to_string(),
            RouterError::Protocol(e) => e.to_string(),
        };
        ServerEvent::error(message, session_id)
    }
}

/// Message router that dispatches client requests to the session manager.
pub struct MessageRouter<S: SessionManager> {
    sessions: Arc<S>,
}

impl<S: SessionManager> MessageRouter<S> {
    /// Create a new message router backed by `sessions`.
    pub fn new(sessions: Arc<S>) -> Self {
        Self { sessions }
    }

    /// Returns the session manager.
    pub fn sessions(&self) -> &Arc<S> {
        &self.sessions
    }

    /// Route one text frame from `client`.
    ///
    /// Returns the event to send back to that client, or `None` when the
    /// request has no reply (successful input).
    pub async fn route(&self, client: &ClientId, frame: &str) -> Option<ServerEvent> {
        let request = match ClientRequest::from_json(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(client_id = %client, error = %e, "Rejected malformed frame");
                return Some(RouterError::from(e).to_event(None));
            }
        };

        // Creation failures are reported without a session id.
        let scope = match &request {
            ClientRequest::CreateTerminal(_) => None,
            other => other
                .session_id()
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string),
        };

        if let Err(e) = request.validate() {
            warn!(
                client_id = %client,
                event = request.event_name(),
                error = %e,
                "Rejected invalid request"
            );
            return Some(RouterError::from(e).to_event(scope));
        }

        debug!(client_id = %client, event = request.event_name(), "Routing request");

        match self.dispatch(client, request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(client_id = %client, error = %e, "Request failed");
                Some(e.to_event(scope))
            }
        }
    }

    async fn dispatch(&self, client: &ClientId, request: ClientRequest) -> RouterResult {
        match request {
            ClientRequest::CreateTerminal(req) => self.handle_create(client, req).await,
            ClientRequest::TerminalInput(req) => self.handle_input(req).await,
            ClientRequest::TerminalResize(req) => self.handle_resize(req).await,
            ClientRequest::CloseTerminal(req) => self.handle_close(req).await,
        }
    }

    /// Closes every session owned by a client whose connection ended.
    pub async fn client_disconnected(&self, client: &ClientId) {
        let closed = self.sessions.close_client_sessions(client).await;
        info!(
            client_id = %client,
            closed = closed.len(),
            "Client disconnected"
        );
    }

    // =========================================================================
    // Session Handlers
    // =========================================================================

    async fn handle_create(&self, client: &ClientId, req: CreateTerminal) -> RouterResult {
        info!(
            client_id = %client,
            requested_id = ?req.requested_id(),
            working_dir = ?req.requested_dir(),
            "Creating terminal"
        );

        let session_id = self
            .sessions
            .create_session(req.requested_id(), req.requested_dir(), client)
            .await?;

        Ok(Some(ServerEvent::created(session_id)))
    }

    async fn handle_input(&self, req: TerminalInput) -> RouterResult {
        if self
            .sessions
            .send_input(&req.session_id, req.data.as_bytes())
            .await
        {
            Ok(None)
        } else {
            Err(SessionError::NotFound(req.session_id).into())
        }
    }

    async fn handle_resize(&self, req: TerminalResize) -> RouterResult {
        debug!(
            session_id = %req.session_id,
            cols = req.cols,
            rows = req.rows,
            "Resizing terminal"
        );

        if self
            .sessions
            .resize_session(&req.session_id, req.cols, req.rows)
            .await
        {
            Ok(Some(ServerEvent::resized(req.session_id, req.cols, req.rows)))
        } else {
            Err(SessionError::NotFound(req.session_id).into())
        }
    }

    async fn handle_close(&self, req: CloseTerminal) -> RouterResult {
        info!(session_id = %req.session_id, "Closing terminal");

        if self.sessions.close_session(&req.session_id).await {
            Ok(Some(ServerEvent::closed(req.session_id, None)))
        } else {
            Err(SessionError::NotFound(req.session_id).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionId, SessionInfo};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock session manager for testing.
    #[derive(Default)]
    struct MockSessionManager {
        should_fail: bool,
        /// Live session id -> owner.
        sessions: Mutex<HashMap<SessionId, ClientId>>,
        inputs: Mutex<Vec<(SessionId, Vec<u8>)>>,
    }

    impl MockSessionManager {
        fn new() -> Self {
            Self::default()
        }

        fn failing() -> Self {
            Self {
                should_fail: true,
                ..Self::default()
            }
        }

        fn with_session(self, id: &str, owner: &str) -> Self {
            self.sessions
                .lock()
                .unwrap()
                .insert(id.to_string(), owner.to_string());
            self
        }
    }

    impl SessionManager for MockSessionManager {
        async fn create_session(
            &self,
            requested_id: Option<&str>,
            _working_dir: Option<&str>,
            owner: &ClientId,
        ) -> Result<SessionId, SessionError> {
            if self.should_fail {
                return Err(SessionError::SpawnFailed("Mock failure".to_string()));
            }
            let id = requested_id.unwrap_or("term_1_0").to_string();
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&id) {
                return Err(SessionError::AlreadyExists(id));
            }
            sessions.insert(id.clone(), owner.clone());
            Ok(id)
        }

        async fn send_input(&self, session_id: &str, data: &[u8]) -> bool {
            if !self.sessions.lock().unwrap().contains_key(session_id) {
                return false;
            }
            self.inputs
                .lock()
                .unwrap()
                .push((session_id.to_string(), data.to_vec()));
            true
        }

        async fn resize_session(&self, session_id: &str, _cols: u16, _rows: u16) -> bool {
            self.sessions.lock().unwrap().contains_key(session_id)
        }

        async fn close_session(&self, session_id: &str) -> bool {
            self.sessions.lock().unwrap().remove(session_id).is_some()
        }

        async fn close_client_sessions(&self, owner: &ClientId) -> Vec<SessionId> {
            let mut sessions = self.sessions.lock().unwrap();
            let owned: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, o)| *o == owner)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &owned {
                sessions.remove(id);
            }
            owned
        }

        async fn close_all_sessions(&self) {
            self.sessions.lock().unwrap().clear();
        }

        fn list(&self) -> Vec<SessionInfo> {
            vec![]
        }

        fn count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }
    }

    fn client() -> ClientId {
        "client-1".to_string()
    }

    fn expect_error(event: Option<ServerEvent>) -> (String, Option<String>) {
        match event {
            Some(ServerEvent::TerminalError(err)) => (err.error, err.session_id),
            other => panic!("expected terminal_error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_terminal() {
        let router = MessageRouter::new(Arc::new(MockSessionManager::new()));

        let reply = router
            .route(
                &client(),
                r#"{"event":"create_terminal","data":{"session_id":"t1","working_dir":"/tmp"}}"#,
            )
            .await;

        assert_eq!(reply, Some(ServerEvent::created("t1")));
        assert_eq!(router.sessions().count(), 1);
    }

    #[tokio::test]
    async fn test_create_terminal_failure_has_no_session_id() {
        let router = MessageRouter::new(Arc::new(MockSessionManager::failing()));

        let reply = router
            .route(
                &client(),
                r#"{"event":"create_terminal","data":{"session_id":"t1"}}"#,
            )
            .await;

        let (error, session_id) = expect_error(reply);
        assert!(error.starts_with("Failed to create terminal session"));
        assert_eq!(session_id, None);
    }

    #[tokio::test]
    async fn test_create_duplicate_id() {
        let manager = MockSessionManager::new().with_session("t1", "other");
        let router = MessageRouter::new(Arc::new(manager));

        let reply = router
            .route(
                &client(),
                r#"{"event":"create_terminal","data":{"session_id":"t1"}}"#,
            )
            .await;

        let (error, _) = expect_error(reply);
        assert_eq!(error, "session already exists: t1");
    }

    #[tokio::test]
    async fn test_input_has_no_reply() {
        let manager = Arc::new(MockSessionManager::new().with_session("t1", "client-1"));
        let router = MessageRouter::new(Arc::clone(&manager));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_input","data":{"session_id":"t1","data":"ls\n"}}"#,
            )
            .await;

        assert_eq!(reply, None);
        let inputs = manager.inputs.lock().unwrap();
        assert_eq!(inputs.as_slice(), &[("t1".to_string(), b"ls\n".to_vec())]);
    }

    #[tokio::test]
    async fn test_input_unknown_session() {
        let router = MessageRouter::new(Arc::new(MockSessionManager::new()));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_input","data":{"session_id":"ghost","data":"ls\n"}}"#,
            )
            .await;

        let (error, session_id) = expect_error(reply);
        assert_eq!(error, "invalid session or session not found: ghost");
        assert_eq!(session_id.as_deref(), Some("ghost"));
    }

    #[tokio::test]
    async fn test_input_missing_session_id() {
        let router = MessageRouter::new(Arc::new(MockSessionManager::new()));

        let reply = router
            .route(&client(), r#"{"event":"terminal_input","data":{"data":"ls\n"}}"#)
            .await;

        let (error, session_id) = expect_error(reply);
        assert_eq!(error, "session_id required");
        assert_eq!(session_id, None);
    }

    #[tokio::test]
    async fn test_resize_known_and_unknown() {
        let manager = MockSessionManager::new().with_session("t1", "client-1");
        let router = MessageRouter::new(Arc::new(manager));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_resize","data":{"session_id":"t1","cols":120,"rows":40}}"#,
            )
            .await;
        assert_eq!(reply, Some(ServerEvent::resized("t1", 120, 40)));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_resize","data":{"session_id":"nope"}}"#,
            )
            .await;
        let (_, session_id) = expect_error(reply);
        assert_eq!(session_id.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_resize_defaults_dimensions() {
        let manager = MockSessionManager::new().with_session("t1", "client-1");
        let router = MessageRouter::new(Arc::new(manager));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_resize","data":{"session_id":"t1"}}"#,
            )
            .await;
        assert_eq!(reply, Some(ServerEvent::resized("t1", 80, 24)));
    }

    #[tokio::test]
    async fn test_resize_out_of_range() {
        let manager = MockSessionManager::new().with_session("t1", "client-1");
        let router = MessageRouter::new(Arc::new(manager));

        let reply = router
            .route(
                &client(),
                r#"{"event":"terminal_resize","data":{"session_id":"t1","cols":0,"rows":24}}"#,
            )
            .await;

        let (error, session_id) = expect_error(reply);
        assert!(error.starts_with("cols must be between"));
        assert_eq!(session_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_close_twice() {
        let manager = MockSessionManager::new().with_session("t1", "client-1");
        let router = MessageRouter::new(Arc::new(manager));
        let frame = r#"{"event":"close_terminal","data":{"session_id":"t1"}}"#;

        assert_eq!(
            router.route(&client(), frame).await,
            Some(ServerEvent::closed("t1", None))
        );

        let (_, session_id) = expect_error(router.route(&client(), frame).await);
        assert_eq!(session_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_malformed_frames() {
        let router = MessageRouter::new(Arc::new(MockSessionManager::new()));

        for frame in [
            "not json",
            r#"{"event":"unknown_event","data":{}}"#,
            r#"{"data":{"session_id":"t1"}}"#,
        ] {
            let (error, session_id) = expect_error(router.route(&client(), frame).await);
            assert!(error.starts_with("malformed frame"), "{}", error);
            assert_eq!(session_id, None);
        }
    }

    #[tokio::test]
    async fn test_client_disconnected_closes_owned_sessions() {
        let manager = Arc::new(
            MockSessionManager::new()
                .with_session("a", "client-1")
                .with_session("b", "client-1")
                .with_session("c", "client-2"),
        );
        let router = MessageRouter::new(Arc::clone(&manager));

        router.client_disconnected(&client()).await;

        assert_eq!(manager.count(), 1);
        assert!(manager.sessions.lock().unwrap().contains_key("c"));
    }

    #[test]
    fn test_router_error_messages() {
        let err = RouterError::from(ProtocolError::InvalidRequest(
            "session_id required".to_string(),
        ));
        assert_eq!(
            err.to_event(None),
            ServerEvent::error("session_id required", None)
        );

        let err = RouterError::from(SessionError::NotFound("t9".to_string()));
        assert_eq!(
            err.to_event(Some("t9".to_string())),
            ServerEvent::error(
                "invalid session or session not found: t9",
                Some("t9".to_string())
            )
        );
    }
}
