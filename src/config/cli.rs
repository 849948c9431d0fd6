use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the varnish-xkey binary.
#[derive(Debug, Parser)]
#[command(
    name = "varnish-xkey",
    version,
    about = "Varnish xkey tagging, TTL resolution and purge broadcasting"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VARNISH_XKEY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the admin HTTP listener (purge API and logout endpoint).
    Serve(Box<ServeArgs>),
    /// Purge a raw xkey tag on every backend.
    Purge(PurgeArgs),
    /// Purge one content item, or the whole site when no id is given.
    Flush(FlushArgs),
    /// Resolve the cache lifetime of a content item JSON document.
    Ttl(TtlArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct VarnishOverrides {
    /// Override the site key used as tag prefix.
    #[arg(long = "site-key", value_name = "KEY")]
    pub site_key: Option<String>,

    /// Override the purge targets (repeatable or comma separated).
    #[arg(long = "varnish-target", value_name = "HOST:PORT", value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Override the per-request purge timeout.
    #[arg(long = "varnish-timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,

    /// Toggle purging the CDN endpoint as well.
    #[arg(
        long = "varnish-protection",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub protection: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub varnish: VarnishOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle cache headers globally.
    #[arg(
        long = "varnish-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub varnish_enabled: Option<bool>,

    /// Toggle the debug header.
    #[arg(
        long = "varnish-debug",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub varnish_debug: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub varnish: VarnishOverrides,

    /// Tag to purge, sent as is.
    #[arg(value_name = "TAG")]
    pub tag: String,
}

#[derive(Debug, Args, Clone)]
pub struct FlushArgs {
    #[command(flatten)]
    pub varnish: VarnishOverrides,

    /// Content id; the site tag is purged when omitted.
    #[arg(value_name = "CONTENT_ID")]
    pub content_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct TtlArgs {
    /// Override the TTL policy (first_match|minimum).
    #[arg(long = "ttl-policy", value_name = "POLICY")]
    pub policy: Option<String>,

    /// Path to a content item JSON document.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}
