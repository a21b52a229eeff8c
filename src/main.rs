use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cron_runner::config::{
    RunnerConfig, WpCliConfig, DEFAULT_CRON_EVENT, DEFAULT_PLACEHOLDER_HOST,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, DEFAULT_WP_CLI_PATH, DEFAULT_WP_PATH,
};
use cron_runner::runner::Runner;
use cron_runner::shutdown::install_shutdown_handler;
use cron_runner::wp_cli::WpCli;

#[derive(Parser, Debug)]
#[command(name = "cron-runner")]
#[command(version)]
#[command(about = "Runs WordPress cron events across every site of a multisite network")]
struct Args {
    /// Path to the WordPress installation
    #[arg(long, env = "CRON_RUNNER_WP_PATH", default_value = DEFAULT_WP_PATH)]
    path: PathBuf,

    /// Path to the WP-CLI binary
    #[arg(long = "wp-cli", env = "CRON_RUNNER_WP_CLI_PATH", default_value = DEFAULT_WP_CLI_PATH)]
    wp_cli: PathBuf,

    /// Capacity of the site queue; should be at least the number of sites
    #[arg(long = "queue", env = "CRON_RUNNER_QUEUE_SIZE", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_size: usize,

    /// Number of concurrent dispatch workers
    #[arg(long, env = "CRON_RUNNER_MAX_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Seconds between site list refreshes
    #[arg(long, default_value = "60")]
    refresh_interval_secs: u64,

    /// Seconds between requeue attempts
    #[arg(long, default_value = "1")]
    requeue_interval_secs: u64,

    /// Upper bound in seconds for each WP-CLI dispatch call (unbounded if unset)
    #[arg(long)]
    dispatch_timeout_secs: Option<u64>,

    /// Cron event scheduled on every site before running due events
    #[arg(long, default_value = DEFAULT_CRON_EVENT)]
    event: String,

    /// Host of the network's placeholder site, which never receives work
    #[arg(long, default_value = DEFAULT_PLACEHOLDER_HOST)]
    placeholder_host: String,

    /// Seed for the site shuffle (random if unset)
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::new(self.queue_size, self.workers)
            .with_refresh_interval(Duration::from_secs(self.refresh_interval_secs))
            .with_requeue_interval(Duration::from_secs(self.requeue_interval_secs));
        if let Some(secs) = self.dispatch_timeout_secs {
            config = config.with_dispatch_timeout(Duration::from_secs(secs));
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }

    fn wp_cli_config(&self) -> WpCliConfig {
        WpCliConfig {
            cron_event: self.event.clone(),
            placeholder_host: self.placeholder_host.clone(),
            ..WpCliConfig::new(&self.wp_cli, &self.path)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let wp_config = args.wp_cli_config().resolve()?;

    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    let config = args.runner_config().clamp_workers_to_cpus(cpus);

    let wp = Arc::new(WpCli::new(&wp_config));

    let cli_version = wp.version().await?;
    tracing::info!(version = %cli_version, "WP-CLI version");
    let core_version = wp.core_version().await?;
    tracing::info!(version = %core_version, "WordPress core version");

    let stop = install_shutdown_handler()?;
    let runner = Runner::new(config, wp.clone(), wp)?;
    let report = runner.run(stop).await;

    tracing::info!(abandoned = report.abandoned, "Bye, bye!");
    Ok(())
}
