//! The worker side of the pool.
//!
//! - [`actions`] - the registry of named handlers a worker can run.
//! - [`worker`] - the [`Endpoint`] request loop that answers one request at a
//!   time over a [`WorkerPort`](crate::link::WorkerPort).

pub mod actions;
pub mod worker;

pub use actions::{Actions, Handler, HandlerFuture};
pub use worker::{Endpoint, spawn_worker};
