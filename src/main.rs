//! # chorus
//!
//! Static file server with WebSocket broadcast chat on the same port.
//!
//! ```text
//! chorus <address> <port> <document_root>
//! ```

#![deny(unsafe_code)]

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chorus_core::logging;
use chorus_server::{ChorusServer, ServerConfig};
use clap::Parser;

/// HTTP static file server with WebSocket broadcast chat.
#[derive(Parser, Debug)]
#[command(name = "chorus", version, about)]
struct Cli {
    /// Address to bind, e.g. 0.0.0.0.
    address: IpAddr,

    /// Port to bind (0 for auto-assign).
    port: u16,

    /// Directory to serve files from.
    document_root: PathBuf,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.address,
            port: self.port,
            document_root: self.document_root,
            ..ServerConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = cli.into_config();
    config.apply_env_overrides();
    logging::init_subscriber(&config.log_level, config.log_format());
    config.check();

    if !config.document_root.is_dir() {
        bail!(
            "document root {} is not a directory",
            config.document_root.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> Result<()> {
    let server = ChorusServer::new(config);
    let (addr, mut handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("chorus listening on http://{addr}");

    tokio::select! {
        signal = shutdown_signal() => signal?,
        joined = &mut handle => {
            return joined
                .context("Listener task failed")?
                .context("Listener stopped with an error");
        }
    }

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    handle
        .await
        .context("Listener task failed")?
        .context("Listener stopped with an error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            ctrl_c = tokio::signal::ctrl_c() => ctrl_c.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}
