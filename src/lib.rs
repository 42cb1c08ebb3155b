//! # APX/RMF
//!
//! A signal-exchange middleware: APX node definitions describe typed
//! provide/require ports, RMF ("Remote Memory File") is the wire protocol
//! that keeps each side's published port data in sync over a byte-stream
//! transport (TCP or a local-domain socket).

pub mod cli;
pub mod connection;
pub mod error;
pub mod json;
pub mod logging;
pub mod model;
pub mod parser;
pub mod rmf;
pub mod routing;
pub mod server;
pub mod transport;
pub mod vm;

pub use cli::{CommonArgs, Resource};
pub use connection::{Connection, ConnectionState, Role};
pub use error::{ApxResult, ErrorKind};
pub use model::{Node, NodeInstance, Value};
pub use parser::parse_document;
pub use routing::SignatureMap;
pub use server::Server;

/// The current version of the APX/RMF crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
