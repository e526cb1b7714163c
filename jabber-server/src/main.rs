//! jabber-server - XMPP ↔ MCP bridge
//!
//! Two modes share one binary: the default mode runs the XMPP-backed
//! server (credentials from `XMPP_USER` / `XMPP_PASSWORD`), `stdio` mode
//! runs the same bridge over the in-process transport with no credentials.
//! Exit codes: 0 clean, 1 fatal error, 2 bad arguments.

mod address_book;
mod bridge;
mod config;
mod inbox;
mod mcp;
mod queue;
mod xmpp;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use jabber_utils::{BridgeError, Result};

use bridge::Bridge;
use config::{AppConfig, ConfigLoader};
use mcp::McpServer;
use xmpp::client::{Credentials, XmppClient};
use xmpp::MemoryClient;

enum Mode {
    /// XMPP-backed server (default)
    Xmpp,
    /// Bridge over the in-process transport, no credentials required
    Stdio,
}

fn usage() {
    eprintln!("Usage: jabber-server [stdio]");
    eprintln!();
    eprintln!("  (default)  run the XMPP-backed MCP server");
    eprintln!("             requires XMPP_USER and XMPP_PASSWORD in the environment");
    eprintln!("  stdio      run the MCP server over the in-process transport");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match args.as_slice() {
        [] => Mode::Xmpp,
        [arg] if arg == "stdio" => Mode::Stdio,
        [arg] if arg == "--help" || arg == "-h" => {
            usage();
            return ExitCode::SUCCESS;
        }
        _ => {
            usage();
            return ExitCode::from(2);
        }
    };

    // stdout carries JSON-RPC frames; all logging goes to stderr
    if let Err(e) = jabber_utils::init_logging() {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(mode).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode) -> Result<()> {
    let config = ConfigLoader::load_and_validate()?;

    let creds = match mode {
        Mode::Stdio => Credentials::local(),
        Mode::Xmpp => Credentials::from_env(&config.xmpp).ok_or_else(|| {
            BridgeError::config("XMPP_USER and XMPP_PASSWORD must be set in the environment")
        })?,
    };

    // The wire protocol client is pluggable behind the XmppClient trait;
    // this build wires the in-process transport.
    let client: Arc<dyn XmppClient> = MemoryClient::new();

    let bridge = Bridge::new(&config, client, creds, book_path(&config));
    bridge.clone().start().await;

    let server = McpServer::new(bridge.clone());
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                warn!(error = %e, "server loop ended with error");
            }
            info!("stdin closed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    bridge.stop().await;
    Ok(())
}

fn book_path(config: &AppConfig) -> PathBuf {
    config
        .address_book
        .path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(jabber_utils::address_book_file)
}
