use clap::Parser;
use log::info;
use server::network::{Server, ServerMessage};
use shared::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of connected replicas
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Seconds without a heartbeat before a replica is dropped
    #[clap(long, default_value = "5")]
    client_timeout_secs: u64,
}

/// Binds the store host and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(
        &address,
        Arc::new(MemoryStore::new()),
        args.max_clients,
        Duration::from_secs(args.client_timeout_secs),
    )
    .await?;
    let control = server.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    server.run().await
}
