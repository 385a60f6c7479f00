//! Storage server binary.
//!
//! Serves the files under one local directory. On start the server
//! registers with the naming server, announcing every file it holds;
//! files the naming server already knows are deleted locally and empty
//! directories pruned. Clients then read and write file bytes directly
//! against this server's storage port.
//!
//! # Usage
//!
//! ```bash
//! alder-storage --root /srv/alder --hostname storage-1.example.net \
//!     --naming-host naming.example.net
//! ```

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alder::StorageConfig;
use alder::StorageServer;

#[derive(Parser, Debug)]
#[command(name = "alder-storage")]
struct Args {
    /// Local directory whose contents this server exposes.
    #[arg(long)]
    root: PathBuf,

    /// Externally routable hostname of this machine; placed into the
    /// stubs handed to the naming server and to clients.
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Port for the Storage (data) interface. Zero picks an ephemeral
    /// port.
    #[arg(long, default_value_t = 0)]
    storage_port: u16,

    /// Port for the Command interface. Zero picks an ephemeral port.
    #[arg(long, default_value_t = 0)]
    command_port: u16,

    /// Hostname of the naming server.
    #[arg(long, default_value = "127.0.0.1")]
    naming_host: String,

    /// Registration port of the naming server.
    #[arg(long, default_value_t = alder_wire::REGISTRATION_PORT)]
    naming_port: u16,

    /// Maximum concurrent connections per listener.
    #[arg(long, default_value_t = 64)]
    max_connections: u32,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let server = StorageServer::new(StorageConfig {
        root: args.root,
        hostname: args.hostname,
        storage_port: args.storage_port,
        command_port: args.command_port,
        naming_host: args.naming_host,
        naming_port: args.naming_port,
        max_connections: args.max_connections,
    });
    server.on_stopped(|cause| match cause {
        None => info!("storage server shut down"),
        Some(err) => error!(error = %err, "storage server shut down abnormally"),
    });
    let (storage_stub, command_stub) =
        server.start().await.context("failed to start the storage server")?;
    info!(storage = %storage_stub, command = %command_stub, "storage server running");

    signal::ctrl_c().await.context("failed to wait for the shutdown signal")?;
    info!("shutdown signal received");
    server.stop().await;
    Ok(())
}
