use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for the bridgeproxy binary.
#[derive(Debug, Parser)]
#[command(name = "bridgeproxy", version, about = "Anthropic-to-OpenAI translating reverse proxy")]
pub struct Args {
    /// Path to the flat KEY=VALUE configuration file.
    #[arg(short, long, env = "BRIDGEPROXY_CONFIG", default_value = "bridgeproxy.env")]
    pub config: PathBuf,

    /// Optional path to a YAML overrides file (tool descriptions, system message rewrites).
    #[arg(long, env = "BRIDGEPROXY_OVERRIDES")]
    pub overrides: Option<PathBuf>,

    /// Address to bind the HTTP listener to.
    #[arg(short, long, env = "BRIDGEPROXY_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Log filter string, e.g. "info" or "pipeline=debug,server=info".
    #[arg(long, env = "BRIDGEPROXY_LOG", default_value = "info")]
    pub log_filter: String,
}
