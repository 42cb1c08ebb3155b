//! `apx_listen`: host one node definition and serve it to any number of
//! connecting peers (spec §6's "external collaborator" CLI front-end).
//! Thin adapter over `apx_rmf::server::Server` / `Connection`: parses its
//! arguments with clap, initializes logging, then hands off to the core.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use apx_rmf::cli::{styles, CommonArgs, Resource, EXIT_RUNTIME_FAILURE};
use apx_rmf::connection::{Connection, Role};
use apx_rmf::server::Server;
use apx_rmf::{logging, parse_document};
use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve an APX node definition over RMF", styles = styles())]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the APX node definition text to serve.
    apx_file: PathBuf,
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
    let text = std::fs::read_to_string(&args.apx_file)
        .with_context(|| format!("reading {}", args.apx_file.display()))?;
    let node = parse_document(&text).context("parsing APX definition")?;
    info!(node = %node.name, "loaded node definition");

    let server = Arc::new(Server::new());
    server.spawn_cleanup_worker();

    match args.common.resource {
        Resource::Tcp { host, port } => {
            let listener = TcpListener::bind((host.as_str(), port))
                .await
                .with_context(|| format!("binding {}:{}", host, port))?;
            info!(host, port, "listening");
            loop {
                let endpoint = apx_rmf::transport::TcpEndpoint::accept(&listener).await?;
                spawn_one(&server, &node, endpoint);
            }
        }
        Resource::Unix { path } => {
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("binding {}", path.display()))?;
            info!(path = %path.display(), "listening");
            loop {
                let endpoint = apx_rmf::transport::UnixEndpoint::accept(&listener).await?;
                spawn_one(&server, &node, endpoint);
            }
        }
    }
}

/// Finalize a fresh instance of the served node for this connection and hand
/// it off to the server. Each peer gets its own node instance rather than
/// sharing one across connections, keeping per-connection state isolated.
fn spawn_one<T>(server: &Arc<Server>, node: &apx_rmf::Node, endpoint: T)
where
    T: apx_rmf::transport::ByteStreamEndpoint + Send + 'static,
{
    let node = node.clone();
    let server = server.clone();
    match node.finalize() {
        Ok(instance) => {
            let mut connection = Connection::new(endpoint, Role::Server, server.signature_map().clone());
            connection.register_node_instance(Arc::new(instance));
            server.spawn_connection(connection);
        }
        Err(e) => error!(error = %e, "failed to finalize node instance for new connection"),
    }
}
