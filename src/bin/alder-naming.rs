//! Naming server binary.
//!
//! Runs the single naming server of an alder deployment: the directory
//! tree, the storage registry, path locking, and replication. Clients
//! connect on the service port, storage servers register on the
//! registration port. The server keeps no persistent state; a restart is
//! a cold start and storage servers must re-register.
//!
//! # Usage
//!
//! ```bash
//! alder-naming
//! alder-naming --service-port 8080 --registration-port 8090
//! ```

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alder::NamingConfig;
use alder::NamingServer;

#[derive(Parser, Debug)]
#[command(name = "alder-naming")]
struct Args {
    /// Port for the client Service interface.
    #[arg(long, default_value_t = alder_wire::SERVICE_PORT)]
    service_port: u16,

    /// Port for the storage-server Registration interface.
    #[arg(long, default_value_t = alder_wire::REGISTRATION_PORT)]
    registration_port: u16,

    /// Maximum concurrent connections per listener.
    #[arg(long, default_value_t = 64)]
    max_connections: u32,

    /// Maximum concurrent background replication tasks.
    #[arg(long, default_value_t = 32)]
    max_replication_tasks: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let server = NamingServer::new(NamingConfig {
        service_port: args.service_port,
        registration_port: args.registration_port,
        max_connections: args.max_connections,
        max_replication_tasks: args.max_replication_tasks,
    });
    server.on_stopped(|cause| match cause {
        None => info!("naming server shut down"),
        Some(err) => error!(error = %err, "naming server shut down abnormally"),
    });
    server.start().await.context("failed to start the naming server")?;

    signal::ctrl_c().await.context("failed to wait for the shutdown signal")?;
    info!("shutdown signal received");
    server.stop().await;
    Ok(())
}
