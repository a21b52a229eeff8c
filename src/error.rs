use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid startup configuration. Always fatal: the engine is never started.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "invalid queue capacity: must be between 1 and {}",
        tokio::sync::Semaphore::MAX_PERMITS
    )]
    InvalidQueueCapacity,

    #[error("invalid worker count: must be greater than zero")]
    InvalidWorkerCount,

    #[error("invalid {name}: must be greater than zero and small enough to schedule")]
    InvalidInterval { name: &'static str },

    #[error("invalid argument \"{name}\": required and must not be empty")]
    EmptyPath { name: &'static str },

    #[error("invalid argument \"{name}\": {path}: no such file or directory")]
    PathNotFound { name: &'static str, path: PathBuf },

    #[error("invalid argument \"{name}\": {source}")]
    PathResolution {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// The site directory could not produce a site list.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("site listing command failed: {0}")]
    Command(String),

    #[error("site listing is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One dispatch action against one site failed.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{action} failed: {details}")]
    Command {
        action: &'static str,
        details: String,
    },

    #[error("{action} timed out after {after:?}")]
    TimedOut {
        action: &'static str,
        after: Duration,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is full")]
    Full,

    #[error("work queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Site directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("WP-CLI error: {0}")]
    WpCli(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
