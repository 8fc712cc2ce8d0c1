//! mcp-template CLI - start an MCP server or open it in the MCP inspector
//!
//! `start` serves on stdio by default, the transport MCP desktop clients
//! spawn. `--transport sse` serves HTTP with one SSE stream per session.

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use template_core::ConfigOverrides;
use tracing::{error, info};

use mcp_server::{
    logging, DispatchError, Endpoint, InitializeOptions, LoggingMiddleware, McpServer,
    ServerError, ServerOptions, SseServer, ToolCallResult, ToolRegistry, ToolRequest,
};

const SERVER_NAME: &str = "mcp-template";
const INSPECTOR_PACKAGE: &str = "@modelcontextprotocol/inspector";

/// MCP server template - typed tools, middleware, stdio and HTTP/SSE transports
#[derive(Parser, Debug)]
#[command(name = "mcp-template")]
#[command(version)]
#[command(about = "MCP (Model Context Protocol) server template CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server
    Start(StartArgs),

    /// Run the MCP inspector against this server
    Inspect {
        /// Enable debug logging
        #[arg(short, long)]
        debug: bool,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Do not register the logging middleware
    #[arg(long)]
    no_middleware: bool,

    /// Do not register the server/info method
    #[arg(long)]
    no_custom_handlers: bool,

    /// Transport to serve on
    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    transport: TransportKind,

    /// Bind host for the SSE transport (default: configured host)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Bind port for the SSE transport (default: configured port)
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TransportKind {
    Stdio,
    Sse,
}

/// `server/info`: identity and uptime of the running server
struct ServerInfoHandler {
    name: &'static str,
    version: &'static str,
    tools: usize,
    started: Instant,
}

#[async_trait]
impl Endpoint for ServerInfoHandler {
    async fn call(&self, _request: &ToolRequest) -> Result<ToolCallResult, DispatchError> {
        Ok(ToolCallResult::json(serde_json::json!({
            "name": self.name,
            "version": self.version,
            "tools": self.tools,
            "uptimeSeconds": self.started.elapsed().as_secs_f64(),
        })))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(cli));
    // A pending stdin read would otherwise keep the runtime alive.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Start(args) => {
            logging::init(args.debug);
            match start(args).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("[Error] Server failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Inspect { debug } => {
            logging::init(debug);
            inspect(debug).await
        }
    }
}

async fn start(args: StartArgs) -> Result<(), ServerError> {
    let version = env!("CARGO_PKG_VERSION");
    let tools = ToolRegistry::with_example_tools();

    let mut init = InitializeOptions::default();
    if !args.no_middleware {
        init = init.with_middleware(Arc::new(LoggingMiddleware));
    }
    if !args.no_custom_handlers {
        init = init.with_custom_handler(
            "server/info",
            Arc::new(ServerInfoHandler {
                name: SERVER_NAME,
                version,
                tools: tools.len(),
                started: Instant::now(),
            }),
        );
    }

    let options = ServerOptions {
        name: SERVER_NAME.to_string(),
        version: version.to_string(),
        debug: args.debug,
        config: ConfigOverrides::default(),
        tools,
    };

    match args.transport {
        TransportKind::Stdio => {
            let server = McpServer::new(options)?;
            server.initialize(init)?;
            server.start().await?;

            let finished = tokio::select! {
                result = server.wait() => Some(result),
                _ = shutdown_signal() => None,
            };
            match finished {
                Some(result) => result,
                None => server.shutdown().await,
            }
        }
        TransportKind::Sse => {
            let server = SseServer::new(options)?;
            server.initialize(init)?;

            let config = server.config();
            let host = args.host.unwrap_or(config.host);
            let port = args.port.unwrap_or(config.port);
            server.start((host.as_str(), port)).await?;

            shutdown_signal().await;
            server.shutdown().await
        }
    }
}

/// Run the inspector with this binary as the server command
async fn inspect(debug: bool) -> ExitCode {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!("[Error] Cannot locate server binary: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut command = tokio::process::Command::new("npx");
    command.arg(INSPECTOR_PACKAGE).arg(&exe).arg("start");
    if debug {
        command.arg("--debug");
    }

    info!("[CLI] Launching inspector for {}", exe.display());

    match command.status().await {
        Ok(status) if status.success() => ExitCode::SUCCESS,
        Ok(status) => {
            let code = status.code().unwrap_or(1);
            error!("[Error] Inspector exited abnormally (code: {})", code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => {
            error!("[Error] Failed to launch inspector: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("[CLI] Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("[CLI] Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flags() {
        let cli = Cli::try_parse_from([
            "mcp-template",
            "start",
            "-d",
            "--no-middleware",
            "--transport",
            "sse",
            "--port",
            "8080",
        ])
        .unwrap();

        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert!(args.debug);
        assert!(args.no_middleware);
        assert!(!args.no_custom_handlers);
        assert_eq!(args.transport, TransportKind::Sse);
        assert_eq!(args.port, Some(8080));
    }

    #[test]
    fn test_transport_defaults_to_stdio() {
        let cli = Cli::try_parse_from(["mcp-template", "start"]).unwrap();
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.transport, TransportKind::Stdio);
    }

    #[tokio::test]
    async fn test_server_info_handler() {
        let handler = ServerInfoHandler {
            name: SERVER_NAME,
            version: "1.0.0",
            tools: 2,
            started: Instant::now(),
        };

        let result = handler
            .call(&ToolRequest::new("server/info", None))
            .await
            .unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][0]["type"], "json");
        assert_eq!(value["content"][0]["data"]["tools"], 2);
    }
}
