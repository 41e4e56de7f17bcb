//! Worker configuration loaded via OrthoConfig.
//!
//! Values come from `LEDGER_*` environment variables, a configuration file or
//! command-line flags. Leaving `database_url` unset runs the worker against
//! the in-process adapters.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::task_queue::TaskProcessorConfig;
use crate::domain::task_queue::handlers::VerifyEmailSettings;
use crate::outbound::blob::LOCAL_HANDLER;
use crate::outbound::persistence::PoolConfig;

const DEFAULT_UPLOAD_DIR: &str = "./static";

/// Runtime settings for the ledger worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LEDGER")]
pub struct LedgerSettings {
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    #[ortho_config(default = 10)]
    pub db_max_connections: u32,
    /// Task deliveries running at once.
    #[ortho_config(default = 10)]
    pub worker_concurrency: usize,
    /// Idle pause between queue polls, in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// Delay before a task's first retry, in milliseconds.
    #[ortho_config(default = 1000)]
    pub initial_backoff_ms: u64,
    /// Ceiling on any retry delay, in milliseconds.
    #[ortho_config(default = 600_000)]
    pub max_backoff_ms: u64,
    /// Age after which an active claim is treated as abandoned.
    #[ortho_config(default = 300)]
    pub stale_after_secs: u64,
    /// Avatar storage backend: `local` or `memory`.
    pub blob_handler: Option<String>,
    /// Directory used by the `local` blob handler.
    pub blob_upload_dir: Option<PathBuf>,
    /// Page that redeems verification links.
    pub verify_email_base_url: Option<String>,
}

impl LedgerSettings {
    /// Return the configured blob handler, falling back to `local`.
    pub fn blob_handler(&self) -> &str {
        self.blob_handler.as_deref().unwrap_or(LOCAL_HANDLER)
    }

    /// Return the configured upload directory, falling back to `./static`.
    pub fn blob_upload_dir(&self) -> PathBuf {
        self.blob_upload_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR))
    }

    /// Pool settings, or `None` when no database is configured.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        self.database_url
            .as_deref()
            .map(|url| PoolConfig::new(url).with_max_size(self.db_max_connections))
    }

    pub fn processor_config(&self) -> TaskProcessorConfig {
        TaskProcessorConfig {
            concurrency: self.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn verify_email_settings(&self) -> VerifyEmailSettings {
        let defaults = VerifyEmailSettings::default();
        VerifyEmailSettings {
            link_base_url: self
                .verify_email_base_url
                .clone()
                .unwrap_or(defaults.link_base_url),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for worker configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const KEYS: [&str; 10] = [
        "LEDGER_DATABASE_URL",
        "LEDGER_DB_MAX_CONNECTIONS",
        "LEDGER_WORKER_CONCURRENCY",
        "LEDGER_POLL_INTERVAL_MS",
        "LEDGER_INITIAL_BACKOFF_MS",
        "LEDGER_MAX_BACKOFF_MS",
        "LEDGER_STALE_AFTER_SECS",
        "LEDGER_BLOB_HANDLER",
        "LEDGER_BLOB_UPLOAD_DIR",
        "LEDGER_VERIFY_EMAIL_BASE_URL",
    ];

    fn load_from_empty_args() -> LedgerSettings {
        LedgerSettings::load_from_iter([OsString::from("ledger")]).expect("config should load")
    }

    fn cleared_except(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        KEYS.iter()
            .map(|key| {
                let value = overrides
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| (*value).to_owned());
                (*key, value)
            })
            .collect()
    }

    #[rstest]
    fn defaults_select_in_process_adapters() {
        let _guard = lock_env(cleared_except(&[]));

        let settings = load_from_empty_args();
        assert!(settings.database_url.is_none());
        assert!(settings.pool_config().is_none());
        assert_eq!(settings.blob_handler(), "local");
        assert_eq!(settings.blob_upload_dir(), PathBuf::from("./static"));
        assert_eq!(settings.processor_config(), TaskProcessorConfig::default());
        assert_eq!(settings.verify_email_settings(), VerifyEmailSettings::default());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(cleared_except(&[
            ("LEDGER_DATABASE_URL", "postgres://ledger@db/ledger"),
            ("LEDGER_DB_MAX_CONNECTIONS", "4"),
            ("LEDGER_WORKER_CONCURRENCY", "3"),
            ("LEDGER_POLL_INTERVAL_MS", "250"),
            ("LEDGER_MAX_BACKOFF_MS", "5000"),
            ("LEDGER_BLOB_HANDLER", "memory"),
            ("LEDGER_VERIFY_EMAIL_BASE_URL", "https://bank.example/verify"),
        ]));

        let settings = load_from_empty_args();
        let pool = settings.pool_config().expect("pool config");
        assert_eq!(pool.database_url(), "postgres://ledger@db/ledger");
        assert_eq!(settings.blob_handler(), "memory");

        let processor = settings.processor_config();
        assert_eq!(processor.concurrency, 3);
        assert_eq!(processor.poll_interval, Duration::from_millis(250));
        assert_eq!(processor.max_backoff, Duration::from_secs(5));
        assert_eq!(
            settings.verify_email_settings().link_base_url,
            "https://bank.example/verify"
        );
    }

    #[rstest]
    fn zero_concurrency_still_runs_one_delivery() {
        let _guard = lock_env(cleared_except(&[("LEDGER_WORKER_CONCURRENCY", "0")]));

        assert_eq!(load_from_empty_args().processor_config().concurrency, 1);
    }
}
