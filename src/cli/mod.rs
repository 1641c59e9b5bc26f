pub mod commands;
pub mod config;
pub mod output;
pub mod url;

use clap::{Parser, Subcommand};

use crate::cli::output::OutputFormat;

#[derive(Parser)]
#[command(name = "logtail")]
#[command(about = "Stream live application logs from a log aggregator")]
#[command(version)]
pub struct Cli {
    /// Emit diagnostics as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a .logtail.toml in the current directory
    Init(InitArgs),
    /// Stream live logs for an application
    Tail(TailArgs),
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Aggregator endpoint (host:port, or a URL whose scheme selects TLS)
    #[arg(long)]
    pub endpoint: String,

    /// Connect with TLS
    #[arg(long)]
    pub tls: bool,

    /// Skip server certificate verification
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// HTTP proxy (host:port) used with CONNECT
    #[arg(long)]
    pub proxy: Option<String>,

    /// Seconds between keepalive writes
    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct TailArgs {
    /// Application id to tail
    pub app_id: String,

    /// Aggregator endpoint (falls back to .logtail.toml)
    #[arg(long, env = "LOGTAIL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Value sent verbatim in the Authorization header
    #[arg(long, env = "LOGTAIL_AUTH_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Connect with TLS
    #[arg(long)]
    pub tls: bool,

    /// Skip server certificate verification (implies --tls)
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// HTTP proxy (host:port) used with CONNECT
    #[arg(long, env = "LOGTAIL_PROXY")]
    pub proxy: Option<String>,

    /// Seconds between keepalive writes
    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}
