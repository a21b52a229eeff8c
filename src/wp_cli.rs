use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use url::Url;

use crate::config::WpCliConfig;
use crate::error::{DirectoryError, DispatchError, RunnerError};
use crate::sites::{SiteDirectory, SiteId, TaskInvoker};
use crate::worker::dispatch::{ENQUEUE_TASK, RUN_DUE_TASKS};

/// Runs WP-CLI against one WordPress multisite installation.
///
/// Serves as both the [`SiteDirectory`] (`wp site list`) and the
/// [`TaskInvoker`] (`wp cron event ...`) of the engine. Every invocation gets
/// `--path=<install> --quiet --allow-root` appended.
#[derive(Debug, Clone)]
pub struct WpCli {
    binary: PathBuf,
    global_args: Vec<String>,
    cron_event: String,
    placeholder_host: String,
}

/// One row of `wp site list --format=json`.
#[derive(Debug, Deserialize)]
struct SiteRow {
    domain: String,
    url: String,
}

impl WpCli {
    pub fn new(config: &WpCliConfig) -> Self {
        Self {
            binary: config.wp_cli_path.clone(),
            global_args: vec![
                format!("--path={}", config.wp_path.display()),
                "--quiet".to_string(),
                "--allow-root".to_string(),
            ],
            cron_event: config.cron_event.clone(),
            placeholder_host: config.placeholder_host.clone(),
        }
    }

    /// Run WP-CLI with `subcommands` and return its stdout.
    ///
    /// The error string carries stderr, or the exit status when stderr is empty.
    async fn run(&self, subcommands: &[&str]) -> Result<Vec<u8>, String> {
        tracing::trace!(?subcommands, "Running WP-CLI");

        let output = Command::new(&self.binary)
            .args(subcommands)
            .args(&self.global_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("{}: {}", self.binary.display(), e))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(if stderr.is_empty() {
                format!("exit status: {}", output.status)
            } else {
                stderr
            })
        }
    }

    async fn run_trimmed(&self, subcommands: &[&str]) -> Result<String, String> {
        let out = self.run(subcommands).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// WP-CLI's own version.
    pub async fn version(&self) -> Result<String, RunnerError> {
        self.run_trimmed(&["cli", "version"])
            .await
            .map_err(RunnerError::WpCli)
    }

    /// Version of the WordPress core installation.
    pub async fn core_version(&self) -> Result<String, RunnerError> {
        self.run_trimmed(&["core", "version"])
            .await
            .map_err(RunnerError::WpCli)
    }
}

/// Parse a `wp site list --format=json` listing into site ids.
///
/// Rows whose URL does not parse, or whose host or domain is the placeholder
/// host, are left out.
pub fn parse_site_list(json: &[u8], placeholder_host: &str) -> Result<Vec<SiteId>, DirectoryError> {
    let rows: Vec<SiteRow> = serde_json::from_slice(json)?;

    let sites = rows
        .into_iter()
        .filter(|row| {
            let host = match Url::parse(&row.url) {
                Ok(url) => url.host_str().map(str::to_owned),
                Err(e) => {
                    tracing::warn!(url = %row.url, error = %e, "Skipping site with invalid URL");
                    return false;
                }
            };
            host.as_deref() != Some(placeholder_host) && row.domain != placeholder_host
        })
        .map(|row| SiteId::new(row.url))
        .collect();

    Ok(sites)
}

#[async_trait]
impl SiteDirectory for WpCli {
    async fn list_sites(&self) -> Result<Vec<SiteId>, DirectoryError> {
        let out = self
            .run(&[
                "site",
                "list",
                "--fields=domain,url",
                "--archived=false",
                "--deleted=false",
                "--spam=false",
                "--format=json",
            ])
            .await
            .map_err(DirectoryError::Command)?;

        parse_site_list(&out, &self.placeholder_host)
    }
}

#[async_trait]
impl TaskInvoker for WpCli {
    async fn enqueue_task(&self, site: &SiteId) -> Result<(), DispatchError> {
        let url = format!("--url={}", site);
        self.run(&["cron", "event", "schedule", &self.cron_event, "now", &url])
            .await
            .map(|_| ())
            .map_err(|details| DispatchError::Command {
                action: ENQUEUE_TASK,
                details,
            })
    }

    async fn run_due_tasks(&self, site: &SiteId) -> Result<(), DispatchError> {
        let url = format!("--url={}", site);
        self.run(&["cron", "event", "run", "--due-now", &url])
            .await
            .map(|_| ())
            .map_err(|details| DispatchError::Command {
                action: RUN_DUE_TASKS,
                details,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {"domain": "vip.local", "url": "http://vip.local/"},
        {"domain": "a.example", "url": "https://a.example/"},
        {"domain": "b.example", "url": "https://b.example/blog/"}
    ]"#;

    #[test]
    fn parse_skips_placeholder_site() {
        let sites = parse_site_list(LISTING.as_bytes(), "vip.local").unwrap();
        assert_eq!(
            sites,
            vec![
                SiteId::from("https://a.example/"),
                SiteId::from("https://b.example/blog/")
            ]
        );
    }

    #[test]
    fn parse_skips_placeholder_by_domain_or_host() {
        let json = r#"[
            {"domain": "vip.local", "url": "https://mapped.example/"},
            {"domain": "c.example", "url": "http://vip.local/c/"},
            {"domain": "d.example", "url": "https://d.example/"}
        ]"#;
        let sites = parse_site_list(json.as_bytes(), "vip.local").unwrap();
        assert_eq!(sites, vec![SiteId::from("https://d.example/")]);
    }

    #[test]
    fn parse_skips_invalid_urls() {
        let json = r#"[
            {"domain": "broken", "url": "not a url"},
            {"domain": "e.example", "url": "https://e.example/"}
        ]"#;
        let sites = parse_site_list(json.as_bytes(), "vip.local").unwrap();
        assert_eq!(sites, vec![SiteId::from("https://e.example/")]);
    }

    #[test]
    fn parse_skips_urls_without_scheme() {
        let json = r#"[
            {"domain": "example.com", "url": "example.com/x"},
            {"domain": "f.example", "url": "https://f.example/"}
        ]"#;
        let sites = parse_site_list(json.as_bytes(), "vip.local").unwrap();
        assert_eq!(sites, vec![SiteId::from("https://f.example/")]);
    }

    #[test]
    fn parse_empty_listing() {
        let sites = parse_site_list(b"[]", "vip.local").unwrap();
        assert!(sites.is_empty());
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_site_list(b"Error: This is not a multisite installation.", "vip.local")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Parse(_)));
    }

    #[test]
    fn new_builds_global_args() {
        let config = WpCliConfig::new("/usr/bin/wp", "/var/www/html");
        let cli = WpCli::new(&config);
        assert_eq!(
            cli.global_args,
            vec!["--path=/var/www/html", "--quiet", "--allow-root"]
        );
        assert_eq!(cli.cron_event, "sqs_capi_sync_background_update");
    }
}
