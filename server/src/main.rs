#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # homectl
//!
//! Wake, halt and watch hosts on a home network.
//!
//! ## Subcommands
//!
//! - `homectl serve` (default): run the HTTP/WS API
//! - `homectl run <command> <target>`: act on an inventory target directly
//!
//! `<command>` is one of `wake`, `halt`, `status`, `status-stream`.
//!
//! ## API surface
//!
//! | Method | Path                  | Auth | Description                         |
//! |--------|-----------------------|------|-------------------------------------|
//! | GET    | `/api/health`         | No   | Liveness probe of the server itself |
//! | POST   | `/api/wake`           | Yes  | Send a Wake-on-LAN magic packet     |
//! | POST   | `/api/halt`           | Yes  | Power a host off over SSH           |
//! | GET    | `/api/status/{host}`  | Yes  | One-shot ICMP liveness check        |
//! | GET    | `/api/status-stream`  | Yes* | WebSocket of liveness updates       |
//!
//! *WebSocket auth is via `?token=<key>` query param (no `Authorization` header
//! available during the upgrade handshake).
//!
//! ICMP probing uses raw sockets: run as root or grant `CAP_NET_RAW`.

use std::future::IntoFuture;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use homectl::terminal::{self, status_line};
use homectl::tls::{self, TlsListener};
use homectl::{routes, AppState, Command, Config, Dispatcher, Inventory, Outcome, StatusStream};

/// Wake, halt and watch hosts on a home network.
#[derive(Parser)]
#[command(name = "homectl", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Run a command against a target from the local inventory.
    Run {
        /// One of `wake`, `halt`, `status`, `status-stream`.
        command: String,
        /// Target id from `run_targets`.
        target: String,
        /// Path to the YAML inventory (default `~/.homectl/config.yml`).
        #[arg(long)]
        inventory: Option<String>,
        /// Path to TOML config file (timeouts, wake defaults).
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run {
            command,
            target,
            inventory,
            config,
        }) => run_command(&command, &target, inventory.as_deref(), config.as_deref()).await,
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing from `RUST_LOG`, falling back to `default_level`. Logs
/// go to stderr so stdout carries only command output.
fn init_tracing(default_level: &str) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_server(config_path: Option<&str>) -> Result<(), String> {
    let config = Config::load(config_path)?;
    init_tracing(&config.logging.level);

    info!("homectl v{} starting", env!("CARGO_PKG_VERSION"));
    info!("HTTP listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key; set HOMECTL_API_KEY or update config");
    }

    let dispatcher = Dispatcher::system(&config).map_err(|e| e.to_string())?;
    let state = AppState::new(config, dispatcher);
    let app = routes::router(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .map_err(|e| format!("Failed to bind {}: {e}", state.config.server.listen))?;

    let shutdown = CancellationToken::new();
    let https = match state.config.server.tls_paths() {
        Some((cert, key)) => {
            let tls_config = tls::load_server_config(Path::new(cert), Path::new(key))?;
            let addr = &state.config.server.https_listen;
            let listener = TlsListener::bind(addr, tls_config)
                .await
                .map_err(|e| format!("Failed to bind {addr}: {e}"))?;
            info!("HTTPS listening on {addr}");
            Some(listener)
        }
        None => {
            if state.config.server.tls_cert.is_some() || state.config.server.tls_key.is_some() {
                warn!("HTTPS disabled: both tls_cert and tls_key must be set");
            }
            None
        }
    };

    info!("Server ready");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    let http = axum::serve(listener, app.clone())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    match https {
        Some(listener) => {
            let https = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .into_future();
            tokio::try_join!(http, https).map_err(|e| format!("Server error: {e}"))?;
        }
        None => http.await.map_err(|e| format!("Server error: {e}"))?,
    }

    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}

async fn run_command(
    command: &str,
    target_id: &str,
    inventory_path: Option<&str>,
    config_path: Option<&str>,
) -> Result<(), String> {
    let config = Config::load(config_path)?;
    init_tracing("warn");

    let command: Command = command.parse().map_err(|e: homectl::ActionError| e.to_string())?;
    let inventory = Inventory::load(inventory_path)?;
    let entry = inventory
        .run_target(target_id)
        .ok_or_else(|| format!("Run target '{target_id}' not found"))?;
    let target = entry.to_target().map_err(|e| e.to_string())?;

    let mut dispatcher = Dispatcher::system(&config).map_err(|e| e.to_string())?;
    if let Some(prompt) = terminal::passphrase_prompt() {
        dispatcher = dispatcher.with_passphrase_prompt(prompt);
    }

    match dispatcher
        .dispatch(command, &target)
        .await
        .map_err(|e| e.to_string())?
    {
        Outcome::Woke { .. } => {
            let mac = target.mac.map(|m| m.to_string()).unwrap_or_default();
            println!("Magic packet sent to '{}' to mac '{mac}'", entry.id);
        }
        Outcome::Halted => println!("Halt command sent to '{}'", entry.id),
        Outcome::Status { online } => println!("{}", status_line(&entry.id, online)),
        Outcome::Stream(stream) => follow_stream(&entry.id, stream).await?,
    }
    Ok(())
}

/// Print the status on the first update and on every change, until Ctrl-C.
async fn follow_stream(target_id: &str, mut stream: StatusStream) -> Result<(), String> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last = None;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            update = stream.next() => {
                let Some(online) = update else { break };
                if last != Some(online) {
                    println!("{}", status_line(target_id, online));
                    last = Some(online);
                }
            }
        }
    }
    stream.finish().await.map_err(|e| e.to_string())
}
