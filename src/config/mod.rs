//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{collections::BTreeMap, net::SocketAddr, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, FlushArgs, PurgeArgs, ServeArgs, ServeOverrides, TtlArgs, VarnishOverrides,
};

use crate::application::{
    invalidation::ContentEventKind,
    session::{DEFAULT_LOGOUT_PATH, SessionConfig},
};
use crate::domain::{
    keys::SiteKey,
    purge::PurgeTarget,
    ttl::{TtlPolicy, TtlTable},
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "varnish-xkey";
const ENV_PREFIX: &str = "VARNISH_XKEY";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3080;
const DEFAULT_HOME_URL: &str = "http://localhost/";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TTL_SECONDS: u32 = 86_400;
const DEFAULT_COOKIE_PATH: &str = "/";
/// Admin routes the logout endpoint must not shadow.
const RESERVED_PATHS: [&str; 4] = ["/healthz", "/purge", "/flush", "/events"];

/// Lifetimes applied when `ttl.layouts` does not say otherwise.
const BUILTIN_LAYOUT_TTLS: [(&str, u32); 8] = [
    ("auto_focus", 14_400),
    ("auto_focus_topics", 14_400),
    ("auto_focus_random", 1_800),
    ("auto_focus_topics_random", 1_800),
    ("auto_focus_sheets", 7_200),
    ("manual_focus_minisheet", 7_200),
    ("weather", 3_600),
    ("infolive", 600),
];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub varnish: VarnishSettings,
    pub ttl: TtlTable,
    pub session: SessionConfig,
    pub invalidation: InvalidationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub key: SiteKey,
    pub home_url: Url,
}

#[derive(Debug, Clone)]
pub struct VarnishSettings {
    pub enabled: bool,
    pub debug: bool,
    pub targets: Vec<PurgeTarget>,
    pub timeout: Duration,
    pub protection: bool,
    pub cdn_endpoint: Option<PurgeTarget>,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub events: Vec<ContentEventKind>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("varnish.targets")
            .with_list_parse_key("ttl.random_layouts")
            .with_list_parse_key("invalidation.events")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_varnish_overrides(&args.varnish),
        Some(Command::Flush(args)) => raw.apply_varnish_overrides(&args.varnish),
        Some(Command::Ttl(args)) => raw.apply_ttl_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    varnish: RawVarnishSettings,
    ttl: RawTtlSettings,
    session: RawSessionSettings,
    invalidation: RawInvalidationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.varnish_enabled {
            self.varnish.enabled = Some(enabled);
        }
        if let Some(debug) = overrides.varnish_debug {
            self.varnish.debug = Some(debug);
        }

        self.apply_varnish_overrides(&overrides.varnish);
    }

    fn apply_varnish_overrides(&mut self, overrides: &VarnishOverrides) {
        if let Some(key) = overrides.site_key.as_ref() {
            self.site.key = Some(key.clone());
        }
        if !overrides.targets.is_empty() {
            self.varnish.targets = Some(overrides.targets.clone());
        }
        if let Some(timeout) = overrides.timeout_ms {
            self.varnish.timeout_ms = Some(timeout);
        }
        if let Some(protection) = overrides.protection {
            self.varnish.protection = Some(protection);
        }
    }

    fn apply_ttl_overrides(&mut self, args: &TtlArgs) {
        if let Some(policy) = args.policy.as_ref() {
            self.ttl.policy = Some(policy.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            varnish,
            ttl,
            session,
            invalidation,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let site = build_site_settings(site)?;
        let varnish = build_varnish_settings(varnish)?;
        let ttl = build_ttl_table(ttl)?;
        let session = build_session_config(session, &site)?;
        let invalidation = build_invalidation_settings(invalidation)?;

        Ok(Self {
            server,
            logging,
            site,
            varnish,
            ttl,
            session,
            invalidation,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;
    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let key = site
        .key
        .ok_or_else(|| LoadError::invalid("site.key", "a site key is required"))?;
    let key = SiteKey::new(key).map_err(|err| LoadError::invalid("site.key", err.to_string()))?;

    let home_url = site
        .home_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_HOME_URL);
    let home_url = Url::parse(home_url)
        .map_err(|err| LoadError::invalid("site.home_url", format!("invalid url: {err}")))?;
    if !matches!(home_url.scheme(), "http" | "https") || home_url.host_str().is_none() {
        return Err(LoadError::invalid(
            "site.home_url",
            "must be an absolute http(s) url",
        ));
    }

    Ok(SiteSettings { key, home_url })
}

fn build_varnish_settings(varnish: RawVarnishSettings) -> Result<VarnishSettings, LoadError> {
    let targets = varnish
        .targets
        .unwrap_or_default()
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            PurgeTarget::parse(value)
                .map_err(|err| LoadError::invalid("varnish.targets", err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let timeout_ms = varnish.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "varnish.timeout_ms",
            "must be greater than zero",
        ));
    }

    let cdn_endpoint = varnish
        .cdn_endpoint
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            PurgeTarget::parse(value)
                .map_err(|err| LoadError::invalid("varnish.cdn_endpoint", err.to_string()))
        })
        .transpose()?;
    let protection = varnish.protection.unwrap_or(false);
    if protection && cdn_endpoint.is_none() {
        return Err(LoadError::invalid(
            "varnish.cdn_endpoint",
            "required when varnish.protection is enabled",
        ));
    }

    Ok(VarnishSettings {
        enabled: varnish.enabled.unwrap_or(false),
        debug: varnish.debug.unwrap_or(false),
        targets,
        timeout: Duration::from_millis(timeout_ms),
        protection,
        cdn_endpoint,
    })
}

fn build_ttl_table(ttl: RawTtlSettings) -> Result<TtlTable, LoadError> {
    let policy = match ttl.policy.as_deref() {
        Some(policy) => TtlPolicy::from_str(policy)
            .map_err(|err| LoadError::invalid("ttl.policy", err.to_string()))?,
        None => TtlPolicy::default(),
    };

    let mut table = TtlTable::new(ttl.default_seconds.unwrap_or(DEFAULT_TTL_SECONDS))
        .with_policy(policy);
    for (key, seconds) in BUILTIN_LAYOUT_TTLS {
        table = table.with_layout(key, seconds);
    }
    for (key, seconds) in ttl.layouts.unwrap_or_default() {
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(LoadError::invalid("ttl.layouts", "layout keys must not be empty"));
        }
        table = table.with_layout(key, seconds);
    }
    for kind in ttl.random_layouts.unwrap_or_default() {
        let kind = kind.trim();
        if !kind.is_empty() {
            table = table.with_random_kind(kind);
        }
    }

    Ok(table)
}

fn build_session_config(
    session: RawSessionSettings,
    site: &SiteSettings,
) -> Result<SessionConfig, LoadError> {
    let cookie_name = session
        .cookie_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    if let Some(name) = cookie_name.as_deref()
        && name.contains(|c: char| c.is_whitespace() || matches!(c, ';' | '=' | ','))
    {
        return Err(LoadError::invalid(
            "session.cookie_name",
            format!("`{name}` is not a valid cookie name"),
        ));
    }

    let logout_path = session
        .logout_path
        .unwrap_or_else(|| DEFAULT_LOGOUT_PATH.to_string());
    if !logout_path.starts_with('/') || logout_path.contains('?') {
        return Err(LoadError::invalid(
            "session.logout_path",
            "must be an absolute path without a query",
        ));
    }
    if RESERVED_PATHS
        .iter()
        .any(|reserved| logout_path == *reserved || logout_path.starts_with(&format!("{reserved}/")))
    {
        return Err(LoadError::invalid(
            "session.logout_path",
            format!("`{logout_path}` collides with an admin route"),
        ));
    }

    Ok(SessionConfig {
        cookie_name,
        cookie_path: session
            .cookie_path
            .unwrap_or_else(|| DEFAULT_COOKIE_PATH.to_string()),
        cookie_domain: session.cookie_domain.filter(|domain| !domain.is_empty()),
        logout_path,
        home_url: site.home_url.clone(),
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let events = match invalidation.events {
        Some(names) => names
            .iter()
            .map(|name| {
                ContentEventKind::from_str(name)
                    .map_err(|err| LoadError::invalid("invalidation.events", err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => ContentEventKind::ALL.to_vec(),
    };
    Ok(InvalidationSettings { events })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    key: Option<String>,
    home_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVarnishSettings {
    enabled: Option<bool>,
    debug: Option<bool>,
    targets: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    protection: Option<bool>,
    cdn_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    default_seconds: Option<u32>,
    layouts: Option<BTreeMap<String, u32>>,
    random_layouts: Option<Vec<String>>,
    policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    cookie_name: Option<String>,
    cookie_path: Option<String>,
    cookie_domain: Option<String>,
    logout_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    events: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests;
