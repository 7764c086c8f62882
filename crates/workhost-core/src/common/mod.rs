//! Types shared by the dispatcher and the worker endpoint.
//!
//! - [`types`] - identifiers, payloads, messages and typed method contracts.
//! - [`wire`] - conversion between messages and the array frames that cross a
//!   worker link.
//! - [`error`] - protocol, system and job-level error types.

pub mod error;
pub mod types;
pub mod wire;

pub use error::{Error, JobError, Result, WorkerActionError};
