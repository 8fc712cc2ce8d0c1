//! SSE session management
//!
//! Each `GET /sse` connection owns one session. The session map is the only
//! route from a `POST /messages?sessionId=` request to its stream, and it is
//! mutated only when a session opens or closes.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::protocol::{McpError, McpMessage, RequestHandler};

/// How long `close_all` waits for each stream to acknowledge its close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum SessionEvent {
    Message(McpMessage),
    Close,
}

struct Session {
    sender: mpsc::UnboundedSender<SessionEvent>,
    closed: oneshot::Receiver<()>,
}

/// Owner of the session map
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    handler: Arc<RequestHandler>,
    /// Set by `close_all`; only read or written under the map's write lock
    closing: AtomicBool,
}

impl SessionManager {
    pub fn new(handler: Arc<RequestHandler>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            handler,
            closing: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session; it is routable before this returns.
    ///
    /// Dropping the returned stream closes the session. Refused with
    /// `ShuttingDown` once `close_all` has started.
    pub fn open_session(self: &Arc<Self>) -> Result<SessionStream, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let session_id = {
            let mut sessions = self.write();
            if self.closing.load(Ordering::SeqCst) {
                return Err(TransportError::ShuttingDown);
            }
            let mut session_id = Uuid::new_v4().to_string();
            while sessions.contains_key(&session_id) {
                session_id = Uuid::new_v4().to_string();
            }
            sessions.insert(
                session_id.clone(),
                Session {
                    sender,
                    closed: closed_rx,
                },
            );
            session_id
        };

        info!("[SSE] Client connected: {}", session_id);

        Ok(SessionStream {
            receiver,
            guard: SessionGuard {
                session_id,
                manager: Arc::downgrade(self),
                closed: Some(closed_tx),
            },
        })
    }

    /// Route an inbound message to its session.
    ///
    /// Returns once the message is accepted. The handler runs in its own task
    /// and its reply goes out on the session's stream, so the reply does not
    /// depend on the POST connection staying open.
    pub fn route_message(&self, session_id: Option<&str>, body: &[u8]) -> Result<(), TransportError> {
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .ok_or(TransportError::MissingSessionId)?;

        let sender = self
            .read()
            .get(session_id)
            .map(|session| session.sender.clone())
            .ok_or_else(|| TransportError::UnknownSession(session_id.to_string()))?;

        if sender.is_closed() {
            return Err(stream_closed(session_id));
        }

        let message: McpMessage = serde_json::from_slice(body)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        debug!("[SSE] Message for session {}", session_id);

        let handler = self.handler.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = deliver(handler, sender, &session_id, message).await {
                error!("[SSE] Reply for session {} was not delivered: {}", session_id, e);
            }
        });

        Ok(())
    }

    /// Close every open session concurrently and empty the map.
    ///
    /// New sessions are refused from here on, until `reopen`. Every close is
    /// attempted; failures are counted, not short-circuited.
    pub async fn close_all(&self) -> Result<(), TransportError> {
        let sessions: Vec<(String, Session)> = {
            let mut sessions = self.write();
            self.closing.store(true, Ordering::SeqCst);
            sessions.drain().collect()
        };
        let total = sessions.len();

        let results = join_all(
            sessions
                .into_iter()
                .map(|(session_id, session)| close_session(session_id, session)),
        )
        .await;

        let failed = results.into_iter().filter(|closed| !closed).count();
        if failed > 0 {
            return Err(TransportError::ShutdownIncomplete { failed, total });
        }

        info!("[SSE] Closed {} sessions", total);
        Ok(())
    }

    /// Accept sessions again after `close_all`
    pub fn reopen(&self) {
        let _sessions = self.write();
        self.closing.store(false, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    fn remove(&self, session_id: &str) {
        if self.write().remove(session_id).is_some() {
            info!("[SSE] Client disconnected: {}", session_id);
        }
    }
}

fn stream_closed(session_id: &str) -> TransportError {
    TransportError::Processing(format!("stream for session {} is closed", session_id))
}

/// Handle one message and queue its reply on the session's stream.
///
/// A handler that dies without replying still answers a request with a
/// `-32603` error response.
async fn deliver(
    handler: Arc<RequestHandler>,
    sender: mpsc::UnboundedSender<SessionEvent>,
    session_id: &str,
    message: McpMessage,
) -> Result<(), TransportError> {
    let id = message.id.clone();
    let reply = match tokio::spawn(async move { handler.handle(message).await }).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("[SSE] Message handling failed for session {}: {}", session_id, e);
            id.map(|id| McpMessage::error_response(Some(id), McpError::internal_error(e.to_string())))
        }
    };

    match reply {
        Some(reply) => sender
            .send(SessionEvent::Message(reply))
            .map_err(|_| stream_closed(session_id)),
        None => Ok(()),
    }
}

/// Ask the stream to finish and wait for it to be released
async fn close_session(session_id: String, session: Session) -> bool {
    // A stream that is already gone has nothing left to close.
    if session.sender.send(SessionEvent::Close).is_err() {
        return true;
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, session.closed).await {
        Ok(_) => true,
        Err(_) => {
            warn!("[SSE] Session {} did not close within {:?}", session_id, CLOSE_TIMEOUT);
            false
        }
    }
}

/// Removes the session from the map when the stream is released
struct SessionGuard {
    session_id: String,
    manager: Weak<SessionManager>,
    closed: Option<oneshot::Sender<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.session_id);
        }
        if let Some(closed) = self.closed.take() {
            let _ = closed.send(());
        }
    }
}

/// Outbound side of one session
pub struct SessionStream {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
    guard: SessionGuard,
}

impl SessionStream {
    pub fn session_id(&self) -> &str {
        &self.guard.session_id
    }

    /// Next message for the client; `None` once the session is closed
    pub async fn next_message(&mut self) -> Option<McpMessage> {
        match self.receiver.recv().await {
            Some(SessionEvent::Message(message)) => Some(message),
            Some(SessionEvent::Close) | None => None,
        }
    }
}
