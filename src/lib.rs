pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod sites;
pub mod worker;
pub mod wp_cli;
