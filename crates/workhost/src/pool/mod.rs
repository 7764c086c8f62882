//! The dispatcher side of the pool.
//!
//! - [`scheduler`] - pending queue, in-flight table and worker slots.
//! - [`manager`] - the [`Dispatcher`] handle and the task that owns the
//!   scheduler.
//! - [`handle`] - [`JobHandle`], the pending result returned by `submit`.

pub mod handle;
pub mod manager;
pub mod scheduler;

pub use handle::JobHandle;
pub use manager::Dispatcher;
pub use scheduler::{PoolStats, SlotState};
