//! # homectl-remote
//!
//! Drives a remote `homectl serve` instance. The remote and the target are
//! looked up by id in the local inventory, and the command is sent over the
//! server's HTTP and WebSocket API.
//!
//! ```text
//! homectl-remote --remote home --target nas wake
//! homectl-remote --remote home --target nas status-stream
//! ```
//!
//! ## Architecture
//!
//! ```text
//! main.rs       entry point, command dispatch, output
//! config.rs     CLI parsing, inventory lookup, request bodies
//! client.rs     HTTP client for the REST endpoints
//! websocket.rs  status-stream follower
//! ```

mod client;
mod config;
#[cfg(test)]
mod testing;
mod websocket;

use std::ops::ControlFlow;
use std::process::ExitCode;

use clap::Parser;
use client::HomectlClient;
use config::{Cli, Resolved};
use homectl::terminal::status_line;
use homectl::Command;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let resolved = match config::resolve(&cli) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("homectl-remote: configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&resolved).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(resolved: &Resolved) -> Result<(), String> {
    let target = &resolved.target;
    let client = HomectlClient::new(&resolved.base_url, resolved.auth_token.clone())
        .map_err(|e| e.to_string())?;

    match resolved.command {
        Command::Wake => {
            let payload = config::wake_payload(target)?;
            client.wake(&payload).await.map_err(|e| e.to_string())?;
            println!("Wake request sent to {}.", client.base_url());
        }
        Command::Halt => {
            let payload = config::halt_payload(target)?;
            client.halt(&payload).await.map_err(|e| e.to_string())?;
            println!("Halt request sent to {}.", client.base_url());
        }
        Command::Status => {
            let host = config::target_host(target)?;
            let data = client.status(host).await.map_err(|e| e.to_string())?;
            println!("{}", status_line(&target.id, data.is_online));
        }
        Command::StatusStream => {
            let host = config::target_host(target)?;
            let url = websocket::build_ws_url(client.base_url(), host, client.token())?;
            let mut last = None;
            websocket::follow(
                &url,
                |online| {
                    if last != Some(online) {
                        println!("{}", status_line(&target.id, online));
                        last = Some(online);
                    }
                    ControlFlow::Continue(())
                },
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await?;
        }
    }
    Ok(())
}
