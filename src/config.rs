use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "BUCKET_CATALOG_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root of the filesystem object source; one subdirectory per bucket.
    pub storage_root: String,
    /// 5-field cron expression for full sweeps.
    pub scan_schedule: String,
    pub scan_on_startup: bool,
    pub sync: SyncSettings,
}

/// Knobs for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Scan only this bucket instead of discovering all of them.
    pub target_bucket: Option<String>,
    pub region: String,
    pub skip_bucket_validation: bool,
    pub enable_deletion_sync: bool,
    pub enable_bucket_sync: bool,
    /// Minimum time between two bucket lifecycle sweeps.
    pub sync_threshold: Duration,
    /// How long a bucket may stay permanently inaccessible before it is purged.
    pub delete_threshold: Duration,
    /// Total probe attempts per bucket validation.
    pub max_retries: u32,
    /// Linear backoff unit between probe attempts.
    pub retry_delay: Duration,
    pub page_size: usize,
    pub checkpoint_interval: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            target_bucket: None,
            region: "local".into(),
            skip_bucket_validation: false,
            enable_deletion_sync: true,
            enable_bucket_sync: false,
            sync_threshold: Duration::from_secs(3600),
            delete_threshold: Duration::from_secs(168 * 3600),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            page_size: 1000,
            checkpoint_interval: 100,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Mirrors object-store buckets into a SQLite catalog")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_CATALOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_CATALOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BUCKET_CATALOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory holding one subdirectory per bucket (overrides BUCKET_CATALOG_STORAGE_ROOT)
    #[arg(long)]
    pub storage_root: Option<String>,

    /// Scan only this bucket (overrides BUCKET_CATALOG_TARGET_BUCKET)
    #[arg(long)]
    pub target_bucket: Option<String>,

    /// Region recorded on discovered buckets
    #[arg(long)]
    pub region: Option<String>,

    #[arg(long)]
    pub skip_bucket_validation: Option<bool>,

    #[arg(long)]
    pub enable_deletion_sync: Option<bool>,

    #[arg(long)]
    pub enable_bucket_sync: Option<bool>,

    /// Minimum interval between bucket lifecycle sweeps, e.g. `1h`
    #[arg(long)]
    pub sync_threshold: Option<String>,

    /// Quarantine period before an inaccessible bucket is purged, e.g. `168h`
    #[arg(long)]
    pub delete_threshold: Option<String>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Backoff unit between probe attempts, e.g. `1s`
    #[arg(long)]
    pub retry_delay: Option<String>,

    #[arg(long)]
    pub page_size: Option<usize>,

    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Cron expression for full sweeps, e.g. `0 */6 * * *`
    #[arg(long)]
    pub scan_schedule: Option<String>,

    #[arg(long)]
    pub scan_on_startup: Option<bool>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup`, falling back to defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvReader { lookup };
        let defaults = SyncSettings::default();

        let sync = SyncSettings {
            target_bucket: args
                .target_bucket
                .or(env.string("TARGET_BUCKET"))
                .filter(|b| !b.trim().is_empty()),
            region: args
                .region
                .or(env.string("REGION"))
                .unwrap_or(defaults.region),
            skip_bucket_validation: pick(
                args.skip_bucket_validation,
                env.parsed("SKIP_BUCKET_VALIDATION")?,
                defaults.skip_bucket_validation,
            ),
            enable_deletion_sync: pick(
                args.enable_deletion_sync,
                env.parsed("ENABLE_DELETION_SYNC")?,
                defaults.enable_deletion_sync,
            ),
            enable_bucket_sync: pick(
                args.enable_bucket_sync,
                env.parsed("ENABLE_BUCKET_SYNC")?,
                defaults.enable_bucket_sync,
            ),
            sync_threshold: duration_setting(
                args.sync_threshold,
                &env,
                "SYNC_THRESHOLD",
                defaults.sync_threshold,
            )?,
            delete_threshold: duration_setting(
                args.delete_threshold,
                &env,
                "DELETE_THRESHOLD",
                defaults.delete_threshold,
            )?,
            max_retries: pick(
                args.max_retries,
                env.parsed("MAX_RETRIES")?,
                defaults.max_retries,
            ),
            retry_delay: duration_setting(
                args.retry_delay,
                &env,
                "RETRY_DELAY",
                defaults.retry_delay,
            )?,
            page_size: pick(args.page_size, env.parsed("PAGE_SIZE")?, defaults.page_size),
            checkpoint_interval: pick(
                args.checkpoint_interval,
                env.parsed("CHECKPOINT_INTERVAL")?,
                defaults.checkpoint_interval,
            ),
        };

        if sync.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }

        Ok(Self {
            host: args
                .host
                .or(env.string("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, env.parsed("PORT")?, 3000),
            database_url: args
                .database_url
                .or(env.string("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/catalog.db".into()),
            storage_root: args
                .storage_root
                .or(env.string("STORAGE_ROOT"))
                .unwrap_or_else(|| "./data/objects".into()),
            scan_schedule: args
                .scan_schedule
                .or(env.string("SCAN_SCHEDULE"))
                .unwrap_or_else(|| "0 */6 * * *".into()),
            scan_on_startup: pick(
                args.scan_on_startup,
                env.parsed("SCAN_ON_STARTUP")?,
                false,
            ),
            sync,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn pick<T>(arg: Option<T>, env: Option<T>, default: T) -> T {
    arg.or(env).unwrap_or(default)
}

fn duration_setting<F: Fn(&str) -> Option<String>>(
    arg: Option<String>,
    env: &EnvReader<F>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match arg {
        Some(value) => parse_duration(key, &value),
        None => match env.string(key) {
            Some(value) => parse_duration(key, &value),
            None => Ok(default),
        },
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, key, value))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key))
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, key, value)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = AppConfig::from_sources(Args::default(), env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.database_url, "sqlite://./data/meta/catalog.db");
        assert_eq!(cfg.scan_schedule, "0 */6 * * *");
        assert!(cfg.sync.target_bucket.is_none());
        assert!(cfg.sync.enable_deletion_sync);
        assert!(!cfg.sync.enable_bucket_sync);
        assert_eq!(cfg.sync.delete_threshold, Duration::from_secs(168 * 3600));
        assert_eq!(cfg.sync.max_retries, 3);
    }

    #[test]
    fn env_values_are_parsed() {
        let cfg = AppConfig::from_sources(
            Args::default(),
            env(&[
                ("BUCKET_CATALOG_PORT", "8080"),
                ("BUCKET_CATALOG_TARGET_BUCKET", "demo"),
                ("BUCKET_CATALOG_ENABLE_BUCKET_SYNC", "true"),
                ("BUCKET_CATALOG_DELETE_THRESHOLD", "1h 30m"),
                ("BUCKET_CATALOG_RETRY_DELAY", "250ms"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sync.target_bucket.as_deref(), Some("demo"));
        assert!(cfg.sync.enable_bucket_sync);
        assert_eq!(cfg.sync.delete_threshold, Duration::from_secs(5400));
        assert_eq!(cfg.sync.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn args_override_env() {
        let args = Args::parse_from(["bucket-catalog", "--port", "9000", "--sync-threshold", "5m"]);
        let cfg = AppConfig::from_sources(
            args,
            env(&[
                ("BUCKET_CATALOG_PORT", "8080"),
                ("BUCKET_CATALOG_SYNC_THRESHOLD", "2h"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.sync.sync_threshold, Duration::from_secs(300));
    }

    #[test]
    fn empty_target_bucket_means_discover_all() {
        let cfg =
            AppConfig::from_sources(Args::default(), env(&[("BUCKET_CATALOG_TARGET_BUCKET", "")]))
                .unwrap();
        assert!(cfg.sync.target_bucket.is_none());
    }

    #[test]
    fn invalid_values_name_the_setting() {
        let err = AppConfig::from_sources(
            Args::default(),
            env(&[("BUCKET_CATALOG_DELETE_THRESHOLD", "a week")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("BUCKET_CATALOG_DELETE_THRESHOLD"));

        let err =
            AppConfig::from_sources(Args::default(), env(&[("BUCKET_CATALOG_PORT", "http")]))
                .unwrap_err();
        assert!(err.to_string().contains("BUCKET_CATALOG_PORT"));
    }
}
