#![doc = include_str!("../README.md")]

pub mod config;
pub mod endpoint;
pub mod link;
pub mod pool;
pub mod telemetry;

pub use config::PoolConfig;
pub use endpoint::{Actions, Endpoint, spawn_worker};
pub use link::{WorkerHandle, WorkerPort};
pub use pool::{Dispatcher, JobHandle, PoolStats};
pub use workhost_core::{self, Error, JobError, WorkerActionError};
