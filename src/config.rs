use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::error::ConfigError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for the scheduling and dispatch engine.
///
/// Built once at startup and handed to [`Runner::new`](crate::runner::Runner::new);
/// it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Capacity of the bounded work queue. Should be at least the number of
    /// sites, otherwise the tail of each batch is dropped for that cycle.
    pub queue_capacity: usize,
    /// Number of concurrent dispatch workers
    pub workers: usize,
    /// How often the site list is re-fetched and reshuffled
    pub refresh_interval: Duration,
    /// How often an empty queue is refilled with the current site list
    pub requeue_interval: Duration,
    /// Upper bound for each individual dispatch call. `None` waits forever.
    pub dispatch_timeout: Option<Duration>,
    /// Seed for the scheduler's shuffle. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            dispatch_timeout: None,
            seed: None,
        }
    }
}

impl RunnerConfig {
    pub fn new(queue_capacity: usize, workers: usize) -> Self {
        Self {
            queue_capacity,
            workers,
            ..Default::default()
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject values the engine cannot run with.
    ///
    /// Intervals must also fit as a deadline from now; the scheduler arms its
    /// timers with `now + interval`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.queue_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        check_interval("refresh interval", self.refresh_interval)?;
        check_interval("requeue interval", self.requeue_interval)?;
        if let Some(timeout) = self.dispatch_timeout {
            check_interval("dispatch timeout", timeout)?;
        }
        Ok(())
    }

    /// Limit the pool to a single worker on single-CPU hosts.
    ///
    /// WP-CLI is CPU bound; several workers on one core only saturate it
    /// (and trip CPU-based autoscaling) without finishing sooner.
    pub fn clamp_workers_to_cpus(mut self, cpus: usize) -> Self {
        if cpus == 1 && self.workers > 1 {
            tracing::warn!(
                configured = self.workers,
                "Single CPU detected, limiting the number of workers to 1"
            );
            self.workers = 1;
        }
        self
    }
}

fn check_interval(name: &'static str, interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() || Instant::now().checked_add(interval).is_none() {
        return Err(ConfigError::InvalidInterval { name });
    }
    Ok(())
}

pub const DEFAULT_WP_CLI_PATH: &str = "/usr/local/bin/wp";
pub const DEFAULT_WP_PATH: &str = "/srv/www/wp";
pub const DEFAULT_CRON_EVENT: &str = "sqs_capi_sync_background_update";
pub const DEFAULT_PLACEHOLDER_HOST: &str = "vip.local";

/// Where WP-CLI lives and what it is asked to do on every site.
#[derive(Debug, Clone)]
pub struct WpCliConfig {
    /// WP-CLI binary
    pub wp_cli_path: PathBuf,
    /// WordPress installation directory
    pub wp_path: PathBuf,
    /// Cron event scheduled on each site before running due events
    pub cron_event: String,
    /// Default network site that never receives dispatched work
    pub placeholder_host: String,
}

impl Default for WpCliConfig {
    fn default() -> Self {
        Self {
            wp_cli_path: PathBuf::from(DEFAULT_WP_CLI_PATH),
            wp_path: PathBuf::from(DEFAULT_WP_PATH),
            cron_event: DEFAULT_CRON_EVENT.to_string(),
            placeholder_host: DEFAULT_PLACEHOLDER_HOST.to_string(),
        }
    }
}

impl WpCliConfig {
    pub fn new(wp_cli_path: impl Into<PathBuf>, wp_path: impl Into<PathBuf>) -> Self {
        Self {
            wp_cli_path: wp_cli_path.into(),
            wp_path: wp_path.into(),
            ..Default::default()
        }
    }

    /// Make both paths absolute and check that they exist.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        self.wp_cli_path = resolve_path("wp-cli", &self.wp_cli_path)?;
        self.wp_path = resolve_path("path", &self.wp_path)?;
        Ok(self)
    }
}

fn resolve_path(name: &'static str, path: &Path) -> Result<PathBuf, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::EmptyPath { name });
    }

    let absolute =
        std::path::absolute(path).map_err(|source| ConfigError::PathResolution { name, source })?;

    match absolute.try_exists() {
        Ok(true) => Ok(absolute),
        Ok(false) => Err(ConfigError::PathNotFound {
            name,
            path: absolute,
        }),
        Err(source) => Err(ConfigError::PathResolution { name, source }),
    }
}
