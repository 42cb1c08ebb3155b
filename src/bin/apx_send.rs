//! `apx_send`: connect to a peer, publish one node definition, write a
//! single value to one of its provide ports, then keep the connection
//! alive to service subsequent opens and routing (spec §6's CLI adapter).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use apx_rmf::cli::{styles, CommonArgs, Resource, EXIT_RUNTIME_FAILURE};
use apx_rmf::connection::{Connection, Role};
use apx_rmf::model::NodeInstance;
use apx_rmf::routing::SignatureMap;
use apx_rmf::transport::ByteStreamEndpoint;
use apx_rmf::{logging, parse_document, Value};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish a node and write one provide port over RMF", styles = styles())]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to the APX node definition text to publish.
    apx_file: PathBuf,

    /// Name of the provide port to write.
    #[arg(long)]
    port: String,

    /// Value to write, as JSON (e.g. `42`, `"hello"`, `true`).
    #[arg(long)]
    value: String,
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
    let instance = Arc::new(node.finalize().context("resolving node definition")?);

    let port_index = instance
        .provide_port_index(&args.port)
        .with_context(|| format!("node '{}' has no provide port named '{}'", instance.name, args.port))?;

    let json: serde_json::Value =
        serde_json::from_str(&args.value).with_context(|| format!("parsing --value '{}' as JSON", args.value))?;
    let value: Value = apx_rmf::json::from_json(&json).context("converting value to APX dynamic value")?;

    let signature_map = Arc::new(SignatureMap::new());
    match args.common.resource {
        Resource::Tcp { host, port } => {
            let endpoint = apx_rmf::transport::TcpEndpoint::connect(&format!("{}:{}", host, port))
                .await
                .with_context(|| format!("connecting to {}:{}", host, port))?;
            let connection = Connection::new(endpoint, Role::Client, signature_map);
            send_and_serve(connection, instance, port_index, &value, &args.port).await
        }
        Resource::Unix { path } => {
            let endpoint = apx_rmf::transport::UnixEndpoint::connect(&path.display().to_string())
                .await
                .with_context(|| format!("connecting to {}", path.display()))?;
            let connection = Connection::new(endpoint, Role::Client, signature_map);
            send_and_serve(connection, instance, port_index, &value, &args.port).await
        }
    }
}

/// Write the one requested value, flush it through routing, then service
/// the connection (handshake included) until the peer closes it. The value
/// is written before `run()` so the handshake's post-`ACTIVE` file publish
/// snapshots the already-updated provide data; `run()` drives its own
/// handshake internally, so it must not be called again here. Generic over
/// the transport so both resource kinds share this one code path.
async fn send_and_serve<T: ByteStreamEndpoint>(
    mut connection: Connection<T>,
    instance: Arc<NodeInstance>,
    port_index: usize,
    value: &Value,
    port_name: &str,
) -> Result<()> {
    connection.register_node_instance(instance.clone());
    instance.write_provide_port(port_index, value).context("writing provide port")?;
    connection.sync_dirty_ports().context("routing provide-port write")?;
    info!(port = %port_name, "wrote value, serving connection");

    connection.run().await.context("connection loop")?;
    Ok(())
}
