//! Command-line surface (spec §6's "CLI surface (collaborator)"). Not part
//! of the core: `apx_listen`, `apx_send`, and `apx_control` each flatten
//! [`CommonArgs`] into their own `clap::Parser` and translate it into a
//! [`Resource`] before handing off to the core connection/server types.
//!
//! Grounded on the teacher's `src/cli.rs`: the same `styles()` helper and
//! derive-based argument parsing, adapted from benchmark parameters to the
//! resource-string argument spec.md §6 describes (`ipv4[:port]`,
//! `localhost[:port]`, or a local-domain socket path).

use clap::builder::styling::{AnsiColor, Styles};
use clap::Args as ClapArgs;
use std::path::PathBuf;

/// Default TCP port used when a resource string omits one (spec.md §6 leaves
/// the default to the tool; the teacher's own TCP benchmark default is 8080).
pub const DEFAULT_PORT: u16 = 8080;

pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// A parsed resource string: where to connect or listen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

/// Parse a resource string of the form `ipv4[:port]`, `localhost[:port]`, or
/// a local-domain socket path (spec.md §6). A string containing `/` is
/// always treated as a socket path; otherwise it is a host with an optional
/// `:port` suffix.
pub fn parse_resource(s: &str) -> Result<Resource, String> {
    if s.is_empty() {
        return Err("resource string cannot be empty".to_string());
    }

    if s.contains('/') {
        return Ok(Resource::Unix { path: PathBuf::from(s) });
    }

    let (host, port) = match s.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| format!("invalid port in resource string: {}", port_str))?;
            (host.to_string(), port)
        }
        None => (s.to_string(), DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err("resource string has no host".to_string());
    }
    Ok(Resource::Tcp { host, port })
}

/// Arguments shared by all three CLI front-ends: where to connect/listen,
/// and how verbose/quiet to be on stderr logging.
#[derive(ClapArgs, Debug, Clone)]
pub struct CommonArgs {
    /// Resource to connect to or listen on: `host[:port]` or a socket path.
    #[arg(value_parser = parse_resource)]
    pub resource: Resource,

    /// Increase diagnostic log verbosity on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Silence all user-facing informational output on stdout.
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,
}

/// Process exit codes (spec.md §6): 0 success, 1 runtime failure, negative
/// for argument-parse errors. Clap itself already exits with its own code
/// for parse errors before `main` runs, so this covers the runtime half.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RUNTIME_FAILURE: i32 = 1;
