//! Port signature map and routing (spec §3/§4.4): matches provide-ports to
//! require-ports by signature string and fans out connector-change events.

pub mod signature_map;

pub use signature_map::{PortBinding, SignatureMap};
