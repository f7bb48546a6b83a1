//! Bridge RPC Server - exposes resolvers over HTTP.
//!
//! Unary resolvers answer with one JSON envelope, stream resolvers with a server-sent event
//! stream of envelopes. Values travel through the bridge codec in both directions.

mod handler;
mod middleware;
mod resolvers;
mod server;

use anyhow::Result;
use bridge_core::warm::{WarmOnce, Warmup};
use bridge_core::MiddlewareChain;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "bridge-rpc")]
#[command(about = "HTTP server for resolver calls")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Route prefix for resolver calls
    #[arg(long, default_value = "/api")]
    base_path: String,

    /// Default interval between getServerTime ticks, in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting Bridge RPC Server");

    let store = Arc::new(resolvers::ProjectStore::new());
    let registry = resolvers::registry(store.clone(), Duration::from_millis(args.tick_ms));
    let warmup: Arc<dyn Warmup> = Arc::new(WarmOnce::new(store));

    let config = server::ServerConfig {
        registry,
        chain: MiddlewareChain::new().with(middleware::AccessLog),
        warmup: Some(warmup),
        base_path: args.base_path,
    };

    // Start the server
    let addr = server::start_server(config, &args.host, args.port).await?;

    // Print port for the parent process to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
