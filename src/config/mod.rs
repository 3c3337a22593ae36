//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::DEFAULT_FETCH_SCHEDULE;
use crate::domain::region::Region;
use crate::infra::archive::{DEFAULT_API_BASE, DEFAULT_ASSET_BASE};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "paperwall";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORAGE_ROOT: &str = "pictures";
const DEFAULT_PREVIEW_DIR: &str = "preview";
const DEFAULT_REGIONS: &[&str] = &["en-US", "zh-CN", "ja-JP", "de-DE", "en-GB"];
const DEFAULT_REGION: &str = "en-US";
const DEFAULT_RETENTION_DAYS: u32 = 0;

/// Command-line arguments for the paperwall binary.
#[derive(Debug, Parser)]
#[command(name = "paperwall", version, about = "Daily image acquisition server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PAPERWALL_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service with the scheduled fetcher.
    Serve(ServeArgs),
    /// Run one acquisition pass and exit.
    Fetch(FetchArgs),
    /// Run one retention sweep and exit.
    Collect(CollectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// Restrict the pass to a single region code.
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CollectArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the blob storage directory.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Override the retention window in days (0 disables expiry).
    #[arg(long = "retention-days", value_name = "DAYS")]
    pub retention_days: Option<u32>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub upstream: UpstreamSettings,
    pub fetch: FetchSettings,
    pub storage: StorageSettings,
    pub preview: PreviewSettings,
    pub scheduler: SchedulerSettings,
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub api_base: String,
    pub asset_base: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub regions: Vec<Region>,
    pub default_region: Region,
    pub on_demand: bool,
    pub region_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub public_url_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub write_daily_files: bool,
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub cron: String,
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub days: u32,
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

    builder = builder.add_source(Environment::with_prefix("PAPERWALL").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Fetch(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Collect(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&ServeOverrides::default()),
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
    database: RawDatabaseSettings,
    upstream: RawUpstreamSettings,
    fetch: RawFetchSettings,
    storage: RawStorageSettings,
    preview: RawPreviewSettings,
    scheduler: RawSchedulerSettings,
    retention: RawRetentionSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &ServeOverrides) {
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
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(count) = overrides.database_max_connections {
            self.database.max_connections = Some(count);
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(days) = overrides.retention_days {
            self.retention.days = Some(days);
        }
    }
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    api_base: Option<String>,
    asset_base: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFetchSettings {
    regions: Option<Vec<String>>,
    default_region: Option<String>,
    on_demand: Option<bool>,
    region_fallback: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
    public_url_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    write_daily_files: Option<bool>,
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    enabled: Option<bool>,
    cron: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetentionSettings {
    days: Option<u32>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            upstream,
            fetch,
            storage,
            preview,
            scheduler,
            retention,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            upstream: build_upstream_settings(upstream)?,
            fetch: build_fetch_settings(fetch)?,
            storage: build_storage_settings(storage),
            preview: build_preview_settings(preview),
            scheduler: build_scheduler_settings(scheduler)?,
            retention: RetentionSettings {
                days: retention.days.unwrap_or(DEFAULT_RETENTION_DAYS),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    let candidate = format!("{host}:{port}");
    let public_addr: SocketAddr = candidate
        .parse()
        .map_err(|err| LoadError::invalid("server", format!("invalid address `{candidate}`: {err}")))?;
    Ok(ServerSettings { public_addr })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(value)
        .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than zero"))?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        api_base: upstream
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        asset_base: upstream
            .asset_base
            .unwrap_or_else(|| DEFAULT_ASSET_BASE.to_string()),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_fetch_settings(fetch: RawFetchSettings) -> Result<FetchSettings, LoadError> {
    let codes = fetch
        .regions
        .unwrap_or_else(|| DEFAULT_REGIONS.iter().map(|code| code.to_string()).collect());
    if codes.is_empty() {
        return Err(LoadError::invalid("fetch.regions", "must not be empty"));
    }

    let mut regions = Vec::with_capacity(codes.len());
    for code in &codes {
        let region = Region::parse(code)
            .map_err(|err| LoadError::invalid("fetch.regions", err.to_string()))?;
        if !regions.contains(&region) {
            regions.push(region);
        }
    }

    let default_region = Region::parse(
        fetch
            .default_region
            .as_deref()
            .unwrap_or(DEFAULT_REGION),
    )
    .map_err(|err| LoadError::invalid("fetch.default_region", err.to_string()))?;

    // The default region is always part of the scheduled rotation so the
    // fallback tier has something to fall back to.
    if !regions.contains(&default_region) {
        regions.push(default_region.clone());
    }

    Ok(FetchSettings {
        regions,
        default_region,
        on_demand: fetch.on_demand.unwrap_or(true),
        region_fallback: fetch.region_fallback.unwrap_or(true),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> StorageSettings {
    StorageSettings {
        root: storage
            .root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
        public_url_prefix: storage.public_url_prefix.and_then(|value| {
            let trimmed = value.trim().trim_end_matches('/');
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }),
    }
}

fn build_preview_settings(preview: RawPreviewSettings) -> PreviewSettings {
    PreviewSettings {
        write_daily_files: preview.write_daily_files.unwrap_or(false),
        directory: preview
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_DIR)),
    }
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let cron = scheduler
        .cron
        .unwrap_or_else(|| DEFAULT_FETCH_SCHEDULE.to_string());
    crate::application::jobs::daily_fetch_schedule(Some(&cron))
        .map_err(|err| LoadError::invalid("scheduler.cron", err.to_string()))?;

    Ok(SchedulerSettings {
        enabled: scheduler.enabled.unwrap_or(true),
        cron,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_every_section() {
        let settings = Settings::from_raw(RawSettings::default()).expect("defaults valid");
        assert_eq!(settings.server.public_addr.port(), DEFAULT_PORT);
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert_eq!(settings.database.max_connections.get(), 8);
        assert_eq!(settings.fetch.default_region.as_str(), "en-US");
        assert!(settings.fetch.on_demand);
        assert_eq!(settings.retention.days, 0);
        assert!(settings.scheduler.enabled);
        assert_eq!(settings.scheduler.cron, DEFAULT_FETCH_SCHEDULE);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("warn".to_string());

        let overrides = ServeOverrides {
            server_port: Some(5000),
            log_level: Some("debug".to_string()),
            retention_days: Some(45),
            ..ServeOverrides::default()
        };
        raw.apply_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("valid");
        assert_eq!(settings.server.public_addr.port(), 5000);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.retention.days, 45);
    }

    #[test]
    fn json_flag_switches_log_format() {
        let mut raw = RawSettings::default();
        raw.logging.json = Some(true);
        let settings = Settings::from_raw(raw).expect("valid");
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn malformed_region_is_rejected() {
        let mut raw = RawSettings::default();
        raw.fetch.regions = Some(vec!["en-US".to_string(), "nonsense".to_string()]);
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key: "fetch.regions", .. })
        ));
    }

    #[test]
    fn default_region_joins_the_rotation() {
        let mut raw = RawSettings::default();
        raw.fetch.regions = Some(vec!["ja-JP".to_string()]);
        raw.fetch.default_region = Some("en-US".to_string());
        let settings = Settings::from_raw(raw).expect("valid");
        assert!(settings
            .fetch
            .regions
            .contains(&Region::parse("en-US").expect("region")));
    }

    #[test]
    fn malformed_cron_is_rejected() {
        let mut raw = RawSettings::default();
        raw.scheduler.cron = Some("whenever".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key: "scheduler.cron", .. })
        ));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut raw = RawSettings::default();
        raw.database.max_connections = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }
}
