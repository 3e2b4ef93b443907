//! dice-mcp
//!
//! This binary runs the dice MCP server over Streamable HTTP, or an
//! interactive client that talks to one.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dice_mcp::server::{TransportConfig, DEFAULT_SHUTDOWN_GRACE_SECS};
use dice_mcp::{
    ClientError, ClientSessionManager, McpHttpServer, ServerConfig, TerminateOutcome,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dice-mcp", version, about = "Session-addressed MCP dice server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over Streamable HTTP (default)
    Serve(ServeArgs),
    /// Run an interactive client against a running server
    Client(ClientArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (e.g., 127.0.0.1:3000)
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
    /// Port override; replaces the port of --bind
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Endpoint path
    #[arg(long, default_value = "/mcp")]
    path: String,
    /// Use stateless mode (no sessions; DELETE and GET answer 405)
    #[arg(long)]
    stateless: bool,
    /// Always answer with application/json instead of an event stream
    #[arg(long)]
    json_response: bool,
    /// Allowed Origin values (comma-separated, `*` for any)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = concat!(
            "http://localhost:8080,http://localhost:3000,",
            "http://localhost,http://127.0.0.1"
        )
    )]
    allow_origin: Vec<String>,
    /// Seconds to wait for in-flight work on shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    shutdown_grace_secs: u64,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            port: std::env::var("PORT").ok().and_then(|p| p.parse().ok()),
            path: "/mcp".to_string(),
            stateless: false,
            json_response: false,
            allow_origin: ServerConfig::default().allowed_origins,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

#[derive(Args)]
struct ClientArgs {
    /// Server endpoint
    #[arg(long, env = "MCP_SERVER_URL", default_value = "http://localhost:3000/mcp")]
    url: String,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for client output)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dice_mcp=info")))
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => rt.block_on(run_server(args)),
        Command::Client(args) => rt.block_on(run_client(args)),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn server_config(args: ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut bind: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
    if let Some(port) = args.port {
        bind.set_port(port);
    }

    let mut config = ServerConfig {
        bind,
        transport: TransportConfig {
            path: args.path,
            json_response: args.json_response,
            ..TransportConfig::default()
        },
        allowed_origins: args.allow_origin,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        ..ServerConfig::default()
    };
    if args.stateless {
        config = config.stateless();
    }
    Ok(config)
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let config = server_config(args)?;
    let mode = config.mode;
    info!(%mode, "Starting dice MCP server");

    let handle = McpHttpServer::new(config)
        .start()
        .await
        .context("bind failed")?;

    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Shutdown signal handler failed: {e}");
    } else {
        info!("Shutdown signal received");
    }
    handle.shutdown().await?;
    info!("Server stopped");
    Ok(())
}

fn print_help() {
    println!("\nAvailable commands:");
    println!("1. list-tools");
    println!("2. call-tool <sides>");
    println!("3. server-info");
    println!("4. terminate-session");
    println!("5. exit");
}

async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let client = ClientSessionManager::new(args.url);
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.url()))?;
    match client.session_id().await {
        Some(id) => println!("Connected. Session ID: {id}"),
        None => println!("Connected (no session)."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_help();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };

        match command {
            "list-tools" | "1" => match client.list_tools().await {
                Ok(tools) => {
                    println!("Tools:");
                    for tool in tools {
                        let description = tool.description.as_deref().unwrap_or("");
                        println!("  {} - {description}", tool.name);
                    }
                }
                Err(e) => println!("list-tools failed: {e}"),
            },
            "call-tool" | "2" => {
                let sides = match parts.next().map(str::parse::<u64>) {
                    None => 6,
                    Some(Ok(sides)) => sides,
                    Some(Err(_)) => {
                        println!("usage: call-tool <sides>");
                        continue;
                    }
                };
                match client.roll_dice(sides).await {
                    Ok(roll) => println!("Rolled {roll} (d{sides})"),
                    Err(e) => println!("call-tool failed: {e}"),
                }
            }
            "server-info" | "3" => match client.server_info().await {
                Ok(info) => println!(
                    "{} {} ({})",
                    info.server.name, info.server.version, info.mode
                ),
                Err(e) => println!("server-info failed: {e}"),
            },
            "terminate-session" | "4" => match client.terminate().await {
                Ok(TerminateOutcome::Terminated) => {
                    println!("Session terminated.");
                    break;
                }
                Ok(TerminateOutcome::NotSupported) => {
                    println!("Server does not support session termination.");
                }
                Ok(TerminateOutcome::Retained { session_id, status }) => {
                    println!("Termination failed (HTTP {status}); still holding {session_id}");
                }
                Err(ClientError::NoSession) => println!("No active session to terminate."),
                Err(e) => println!("terminate-session failed: {e}"),
            },
            "exit" | "5" => break,
            other => println!("Unknown command: {other}"),
        }
    }

    client.disconnect().await;
    Ok(())
}
