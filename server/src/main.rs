use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig, ServerResult};
use server::persistence::MemoryStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value_t = shared::MAX_PLAYERS)]
    max_sessions: usize,

    /// Milliseconds of silence before a session is evicted
    #[arg(long, default_value = "5000")]
    session_timeout_ms: u64,

    /// Slot count of the persistence queue
    #[arg(long, default_value = "256")]
    persist_queue: usize,
}

#[tokio::main]
async fn main() -> ServerResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        max_sessions: args.max_sessions.min(shared::MAX_PLAYERS),
        session_timeout: Duration::from_millis(args.session_timeout_ms),
        persist_queue_capacity: args.persist_queue,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config, Arc::new(MemoryStore::new())).await?;

    let running = server.running_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            running.store(false, Ordering::Release);
        }
    });

    server.run().await
}
