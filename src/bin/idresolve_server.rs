//! idresolve gRPC server
//!
//! Serves `idresolve.IdentityService` over a persistent or in-memory store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use idresolve::storage::persistent::open_database;
use idresolve::storage::{ContactStore, InMemoryContactStore};
use idresolve::transport::IdentityServiceImpl;
use idresolve::{IdentityResolver, ResolverConfig};

#[derive(Parser, Debug)]
#[command(name = "idresolve-server")]
#[command(about = "Identity resolution service for contact fragments")]
struct Args {
    /// Address to bind to
    #[arg(long, env = "IDRESOLVE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Data directory for persistent storage
    #[arg(short, long, env = "IDRESOLVE_DATA_DIR", default_value = "./contacts.idr")]
    data_dir: PathBuf,

    /// Keep contacts in memory only; nothing survives a restart
    #[arg(long)]
    in_memory: bool,

    /// Longest link chain followed while resolving roots
    #[arg(long, default_value_t = 128)]
    max_link_hops: usize,

    /// Attempts per request when the store reports a conflict
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("idresolve=info".parse()?))
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting idresolve-server");

    // The persistent store holds an exclusive lock for the process lifetime.
    let store: Arc<dyn ContactStore> = if args.in_memory {
        info!("using in-memory contact store");
        Arc::new(InMemoryContactStore::new())
    } else {
        info!(data_dir = %args.data_dir.display(), "opening contact store");
        Arc::new(open_database(&args.data_dir, None)?)
    };

    let config = ResolverConfig {
        max_link_hops: args.max_link_hops,
        max_attempts: args.max_attempts,
    };
    let resolver = IdentityResolver::with_config(store, config)?;
    let svc = IdentityServiceImpl::new(resolver).into_server();

    info!(%addr, "serving gRPC");
    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(addr, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    info!("shut down");
    Ok(())
}
