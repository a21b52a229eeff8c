//! Worker pool draining the work queue.
//!
//! - **Dequeue**: each worker waits for either cancellation or the next site,
//!   checking cancellation first.
//! - **Dispatch**: for every site, "enqueue task" then "run due tasks" on the
//!   [`TaskInvoker`](crate::sites::TaskInvoker). The two calls are independent;
//!   a failure in one never skips the other and nothing is retried.
//!
//! # Components
//!
//! - [`Worker`]: one dequeue/dispatch loop
//! - [`WorkerPool`]: spawns N workers on the shared task tracker

pub mod dispatch;
pub mod pool;

pub use dispatch::{DispatchReport, Worker, WorkerId};
pub use pool::WorkerPool;
