//! Sites and the two capabilities the engine needs from the outside world.
//!
//! - [`SiteDirectory`] enumerates the sites eligible for dispatched work.
//! - [`TaskInvoker`] performs the two dispatch actions against one site.
//!
//! The engine only ever talks to these traits; [`WpCli`](crate::wp_cli::WpCli)
//! is the production implementation of both.

use std::fmt;

use async_trait::async_trait;

use crate::error::{DirectoryError, DispatchError};

/// Opaque identifier of one site, in practice its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SiteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Source of the current site list.
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// Return every site that should receive work.
    ///
    /// Implementations must leave out administrative placeholder sites.
    async fn list_sites(&self) -> Result<Vec<SiteId>, DirectoryError>;
}

/// Performs the remote actions of one dispatch.
///
/// Both actions are idempotent and reported independently.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Ask the site to run its background task now.
    async fn enqueue_task(&self, site: &SiteId) -> Result<(), DispatchError>;

    /// Run whatever tasks are currently due on the site.
    async fn run_due_tasks(&self, site: &SiteId) -> Result<(), DispatchError>;
}
