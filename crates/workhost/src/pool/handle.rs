//! The pending result handed back by
//! [`Dispatcher::submit`](super::Dispatcher::submit).
//!
//! A [`JobHandle`] wraps the receiving half of a oneshot channel. The
//! dispatcher task holds the sender until the job settles, so a handle whose
//! sender disappears without a value belongs to a dispatcher that stopped.

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use workhost_core::{JobError, types::Payload};

/// Pending result of a submitted job.
///
/// Resolves once, with the worker's payload or a [`JobError`]. Dropping the
/// handle does not cancel the job; the result is discarded when it arrives.
#[derive(Debug)]
#[must_use = "a job handle does nothing unless awaited"]
pub struct JobHandle {
    rx: oneshot::Receiver<Result<Payload, JobError>>,
}

impl JobHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Payload, JobError>>) -> Self {
        Self { rx }
    }

    /// A handle that is already settled with `err`.
    pub(crate) fn rejected(err: JobError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl Future for JobHandle {
    type Output = Result<Payload, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the dispatcher went away with the job unsettled.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(JobError::Shutdown)))
    }
}
