//! Main MCP server orchestration

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use template_core::config::ENV_API_KEY;
use template_core::{ConfigOverrides, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, InitializeOptions};
use crate::error::{Result, ServerError, TransportError};
use crate::protocol::RequestHandler;
use crate::tools::ToolRegistry;
use crate::transport::{router, SessionManager, StdioTransport};

/// Methods answered by the protocol handler itself
const BUILT_IN_METHODS: [&str; 4] = ["initialize", "ping", "tools/list", "tools/call"];

/// How long `SseServer::shutdown` waits for the HTTP task after closing sessions
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Construction options shared by both server flavours
pub struct ServerOptions {
    pub name: String,
    pub version: String,
    pub debug: bool,
    /// Explicit configuration; `MCP_*` environment values still take priority
    pub config: ConfigOverrides,
    pub tools: ToolRegistry,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "example-mcp".to_string(),
            version: "1.0.0".to_string(),
            debug: false,
            config: ConfigOverrides::default(),
            tools: ToolRegistry::with_example_tools(),
        }
    }
}

/// State shared by the stdio and SSE servers
struct ServerCore {
    config: RwLock<ServerConfig>,
    debug: bool,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<RequestHandler>,
}

impl ServerCore {
    fn new(options: ServerOptions) -> Result<Self> {
        let config = ServerConfig::load(options.config)?;
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(options.tools), config.timeout()));
        let handler = Arc::new(RequestHandler::new(
            dispatcher.clone(),
            options.name,
            options.version,
        ));

        if options.debug {
            info!("[Server] Debug mode enabled");
            if config.api_key.is_none() {
                warn!("[Server] No API key configured ({} is unset)", ENV_API_KEY);
            }
        }

        Ok(Self {
            config: RwLock::new(config),
            debug: options.debug,
            dispatcher,
            handler,
        })
    }

    fn config(&self) -> ServerConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_config(&self, updates: ConfigOverrides) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.update(updates);
        self.dispatcher.set_timeout(config.timeout());
    }

    fn initialize(&self, options: InitializeOptions) -> Result<bool> {
        if let Some((method, _)) = options
            .custom_handlers
            .iter()
            .find(|(method, _)| BUILT_IN_METHODS.contains(&method.as_str()))
        {
            return Err(ServerError::Initialization(format!(
                "custom handler cannot replace built-in method {}",
                method
            )));
        }

        Ok(self.dispatcher.initialize(options))
    }

    fn ensure_initialized(&self) {
        if !self.dispatcher.is_initialized() {
            self.dispatcher.initialize(InitializeOptions::default());
        }
    }
}

/// MCP server on the standard streams
pub struct McpServer {
    core: ServerCore,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<std::result::Result<(), TransportError>>>>,
}

impl McpServer {
    /// Create a new MCP server; configuration is resolved here
    pub fn new(options: ServerOptions) -> Result<Self> {
        Ok(Self {
            core: ServerCore::new(options)?,
            shutdown_tx: std::sync::Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> ServerConfig {
        self.core.config()
    }

    /// Shallow-merge configuration; the new timeout applies to later calls
    pub fn update_config(&self, updates: ConfigOverrides) {
        self.core.update_config(updates);
    }

    pub fn is_debug(&self) -> bool {
        self.core.debug
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.core.dispatcher
    }

    /// Install middleware and custom handlers; returns `false` if the server
    /// was already initialized
    pub fn initialize(&self, options: InitializeOptions) -> Result<bool> {
        self.core.initialize(options)
    }

    /// Serve on stdin/stdout
    pub async fn start(&self) -> Result<()> {
        self.start_with(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serve on the given streams in a background task
    pub async fn start_with<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        self.core.ensure_initialized();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let transport = StdioTransport::new(self.core.handler.clone());
        *task = Some(tokio::spawn(async move {
            transport
                .serve(reader, writer, async {
                    let _ = shutdown_rx.await;
                })
                .await
        }));
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        info!("[Server] MCP server started on stdio");
        Ok(())
    }

    /// Wait for the transport to finish (EOF or shutdown)
    pub async fn wait(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.as_mut() else {
            return Ok(());
        };

        let result = handle.await;
        *task = None;
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match result {
            Ok(result) => result.map_err(ServerError::from),
            Err(e) => Err(TransportError::Processing(e.to_string()).into()),
        }
    }

    /// Stop reading input and wait for in-flight responses; safe to repeat
    pub async fn shutdown(&self) -> Result<()> {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(());
        }

        self.wait().await?;
        info!("[Server] MCP server stopped");
        Ok(())
    }
}

/// MCP server on HTTP with one SSE stream per session
pub struct SseServer {
    core: ServerCore,
    sessions: Arc<SessionManager>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl SseServer {
    pub fn new(options: ServerOptions) -> Result<Self> {
        let core = ServerCore::new(options)?;
        let sessions = Arc::new(SessionManager::new(core.handler.clone()));

        Ok(Self {
            core,
            sessions,
            local_addr: std::sync::Mutex::new(None),
            shutdown_tx: std::sync::Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> ServerConfig {
        self.core.config()
    }

    pub fn update_config(&self, updates: ConfigOverrides) {
        self.core.update_config(updates);
    }

    pub fn is_debug(&self) -> bool {
        self.core.debug
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.core.dispatcher
    }

    pub fn initialize(&self, options: InitializeOptions) -> Result<bool> {
        let initialized = self.core.initialize(options)?;
        if initialized {
            info!("[SSE] Server initialized");
        }
        Ok(initialized)
    }

    /// Bind and serve in a background task, returning the bound address
    pub async fn start(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        self.core.ensure_initialized();
        self.sessions.reopen();

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(self.sessions.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *task = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        }));
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local_addr);

        if self.core.debug {
            info!("[SSE] Debug mode enabled");
        }
        info!("[SSE] HTTP server started on {}", local_addr);
        Ok(local_addr)
    }

    /// Address the server is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    /// Stop accepting connections, close every session, then wait for the
    /// HTTP task. Safe to repeat.
    pub async fn shutdown(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let Some(mut handle) = task.take() else {
            return Ok(());
        };

        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(());
        }

        // Open streams hold their connections; the HTTP task only finishes
        // once they are closed.
        let closed = self.sessions.close_all().await;
        if let Err(e) = &closed {
            error!("[SSE] {}", e);
        }

        let served = match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(result)) => result.map_err(ServerError::from),
            Ok(Err(e)) => Err(TransportError::Processing(e.to_string()).into()),
            Err(_) => {
                warn!(
                    "[SSE] HTTP server did not stop within {:?}, aborting",
                    HTTP_SHUTDOWN_GRACE
                );
                handle.abort();
                Err(ServerError::ShutdownTimeout(HTTP_SHUTDOWN_GRACE))
            }
        };

        self.local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        closed?;
        served?;
        info!("[SSE] Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Endpoint, ToolRequest};
    use crate::error::DispatchError;
    use crate::protocol::ToolCallResult;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct Info;

    #[async_trait]
    impl Endpoint for Info {
        async fn call(&self, _request: &ToolRequest) -> std::result::Result<ToolCallResult, DispatchError> {
            Ok(ToolCallResult::text("info"))
        }
    }

    #[tokio::test]
    async fn test_custom_handler_cannot_shadow_built_in() {
        let server = McpServer::new(ServerOptions::default()).unwrap();

        let err = server
            .initialize(InitializeOptions::default().with_custom_handler("tools/call", Arc::new(Info)))
            .unwrap_err();
        assert!(matches!(err, ServerError::Initialization(_)));
        assert!(!server.dispatcher().is_initialized());

        assert!(server
            .initialize(InitializeOptions::default().with_custom_handler("server/info", Arc::new(Info)))
            .unwrap());
        assert!(!server.initialize(InitializeOptions::default()).unwrap());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logs_while(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_missing_api_key_warns_only_in_debug() {
        let options = |debug| ServerOptions {
            debug,
            config: ConfigOverrides {
                api_key: None,
                ..Default::default()
            },
            ..Default::default()
        };

        let quiet = logs_while(|| {
            McpServer::new(options(false)).unwrap();
        });
        assert!(!quiet.contains("No API key configured"));

        // Only meaningful when the environment does not supply a key.
        if std::env::var(ENV_API_KEY).is_err() {
            let noisy = logs_while(|| {
                McpServer::new(options(true)).unwrap();
            });
            assert!(noisy.contains("No API key configured"));
        }
    }

    #[tokio::test]
    async fn test_update_config_adjusts_timeout() {
        let server = McpServer::new(ServerOptions {
            config: ConfigOverrides {
                timeout_ms: Some(5000),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        server.update_config(ConfigOverrides {
            timeout_ms: Some(250),
            ..Default::default()
        });

        assert_eq!(server.config().timeout_ms, 250);
        assert_eq!(server.dispatcher().timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_stdio_server_lifecycle() {
        let server = McpServer::new(ServerOptions::default()).unwrap();
        let (mut client_in, server_in) = duplex(4096);
        let (server_out, client_out) = duplex(4096);

        server.start_with(server_in, server_out).await.unwrap();
        assert!(server.dispatcher().is_initialized());

        let (again_in, _) = duplex(64);
        let (again_out, _) = duplex(64);
        assert!(matches!(
            server.start_with(again_in, again_out).await,
            Err(ServerError::AlreadyStarted)
        ));

        client_in
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(client_out).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    async fn sse_server() -> (SseServer, String) {
        let server = SseServer::new(ServerOptions::default()).unwrap();
        let addr = server.start("127.0.0.1:0").await.unwrap();
        (server, format!("http://{}", addr))
    }

    #[tokio::test]
    async fn test_health() {
        let (server, base) = sse_server().await;

        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
        assert!(body["uptimeSeconds"].is_number());

        server.shutdown().await.unwrap();
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_messages_rejects_bad_sessions() {
        let (server, base) = sse_server().await;
        let client = reqwest::Client::new();

        let missing = client
            .post(format!("{}/messages", base))
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 400);

        let unknown = client
            .post(format!("{}/messages?sessionId=nope", base))
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);
        let body: Value = unknown.json().await.unwrap();
        assert_eq!(body["error"], "Unknown session: nope");

        server.shutdown().await.unwrap();
    }

    async fn read_until(response: &mut reqwest::Response, buffer: &mut String, needle: &str) {
        while !buffer.contains(needle) {
            let chunk = response.chunk().await.unwrap().expect("stream ended early");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Open an SSE stream and read its endpoint event, returning the session id
    async fn open_sse(client: &reqwest::Client, base: &str) -> (reqwest::Response, String) {
        let mut stream = client
            .get(format!("{}/sse", base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(stream.status(), 200);

        let mut buffer = String::new();
        read_until(&mut stream, &mut buffer, "sessionId=").await;
        read_until(&mut stream, &mut buffer, "\n\n").await;
        assert!(buffer.starts_with("event: endpoint\n"));
        let session_id = buffer
            .split("sessionId=")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .unwrap()
            .to_string();
        (stream, session_id)
    }

    #[tokio::test]
    async fn test_sse_session_roundtrip() {
        let (server, base) = sse_server().await;
        let client = reqwest::Client::new();

        let (mut stream, session_id) = open_sse(&client, &base).await;
        assert_eq!(server.session_count(), 1);

        let accepted = client
            .post(format!("{}/messages?sessionId={}", base, session_id))
            .body(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 202);
        assert_eq!(accepted.text().await.unwrap(), "Accepted");

        let mut buffer = String::new();
        read_until(&mut stream, &mut buffer, "\"id\":9").await;
        assert!(buffer.contains("event: message"));

        server.shutdown().await.unwrap();
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_does_not_wait_on_post_connection() {
        let (server, base) = sse_server().await;
        let client = reqwest::Client::new();
        let (mut stream, session_id) = open_sse(&client, &base).await;

        // The tool takes a second; the POST gives up long before that.
        let started = std::time::Instant::now();
        let accepted = client
            .post(format!("{}/messages?sessionId={}", base, session_id))
            .timeout(Duration::from_millis(200))
            .body(r#"{"jsonrpc":"2.0","id":42,"method":"tools/call","params":{"name":"process_data","arguments":{"input":"slow"}}}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 202);
        assert!(started.elapsed() < Duration::from_secs(1));

        let mut buffer = String::new();
        read_until(&mut stream, &mut buffer, "Processed: slow (took 1 second)").await;
        assert!(buffer.contains("\"id\":42"));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_disconnect_removes_session() {
        let (server, base) = sse_server().await;
        let client = reqwest::Client::new();

        let (stream, _) = open_sse(&client, &base).await;
        assert_eq!(server.session_count(), 1);
        drop(stream);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while server.session_count() > 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.session_count(), 0);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_shutdown_accepts_sessions() {
        let (server, _) = sse_server().await;
        server.shutdown().await.unwrap();

        let addr = server.start("127.0.0.1:0").await.unwrap();
        let client = reqwest::Client::new();
        let (_stream, _) = open_sse(&client, &format!("http://{}", addr)).await;
        assert_eq!(server.session_count(), 1);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sse_shutdown_is_idempotent() {
        let (server, _) = sse_server().await;
        assert!(matches!(
            server.start("127.0.0.1:0").await,
            Err(ServerError::AlreadyStarted)
        ));

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }
}
