//! `apx_control`: connect to a peer with no local node of its own and
//! report on the RMF file exchange as it happens (spec §6's CLI adapter,
//! used for inspecting a running connection rather than publishing data).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apx_rmf::cli::{styles, CommonArgs, Resource, EXIT_RUNTIME_FAILURE};
use apx_rmf::connection::{Connection, Role};
use apx_rmf::routing::SignatureMap;
use apx_rmf::rmf::FileManager;
use apx_rmf::transport::ByteStreamEndpoint;
use apx_rmf::{json, logging};
use clap::Parser;
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor an RMF connection's file exchange", styles = styles())]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// How long to observe the connection before exiting.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// How often to print a status snapshot.
    #[arg(long, default_value_t = 1)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.common.verbose, args.common.quiet);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(EXIT_RUNTIME_FAILURE);
    }
}

async fn run(args: Args) -> Result<()> {
    let signature_map = Arc::new(SignatureMap::new());
    let duration = Duration::from_secs(args.duration_secs);
    let interval = Duration::from_secs(args.interval_secs.max(1));

    match args.common.resource {
        Resource::Tcp { host, port } => {
            let endpoint = apx_rmf::transport::TcpEndpoint::connect(&format!("{}:{}", host, port))
                .await
                .with_context(|| format!("connecting to {}:{}", host, port))?;
            let connection = Connection::new(endpoint, Role::Client, signature_map);
            observe(connection, duration, interval).await
        }
        Resource::Unix { path } => {
            let endpoint = apx_rmf::transport::UnixEndpoint::connect(&path.display().to_string())
                .await
                .with_context(|| format!("connecting to {}", path.display()))?;
            let connection = Connection::new(endpoint, Role::Client, signature_map);
            observe(connection, duration, interval).await
        }
    }
}

/// Hand the handshake and message loop to a background task, then print a
/// JSON status line on `interval` until `duration` elapses. `run()` drives
/// its own handshake internally, so the file manager handle is grabbed
/// before handing `connection` to the background task rather than by
/// handshaking here first.
async fn observe<T>(mut connection: Connection<T>, duration: Duration, interval: Duration) -> Result<()>
where
    T: ByteStreamEndpoint + Send + 'static,
{
    let file_manager: Arc<FileManager> = connection.file_manager().clone();

    let driver = tokio::spawn(async move {
        let _ = connection.run().await;
    });

    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let status = json::to_json(&apx_rmf::Value::Hash({
            let mut fields = indexmap::IndexMap::new();
            fields.insert("local_files".to_string(), apx_rmf::Value::U64(file_manager.local_file_count() as u64));
            fields.insert("remote_files".to_string(), apx_rmf::Value::U64(file_manager.remote_file_count() as u64));
            fields
        }));
        println!("{}", status);
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    driver.abort();
    Ok(())
}
