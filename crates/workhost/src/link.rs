//! In-process transport between the dispatcher and a worker.
//!
//! [`channel`] creates the two ends of a link: a [`WorkerHandle`] for the
//! dispatcher and a [`WorkerPort`] for the worker endpoint. Messages cross as
//! [`Envelope`]s holding the array frames defined in
//! [`workhost_core::wire`], so the same codec applies to any transport that
//! carries structured values.
//!
//! The request side is bounded to a single message. The dispatcher never has
//! more than one request outstanding per worker, so a full request channel
//! means the two sides disagree about who is busy.

use tokio::sync::mpsc::{self, error::TrySendError};
use workhost_core::{Error, types::Request, wire::Envelope};

/// Capacity of the dispatcher to worker channel.
pub const REQUEST_BUFFER_SIZE: usize = 1;

/// Capacity of the worker to dispatcher channel.
pub const RESPONSE_BUFFER_SIZE: usize = 16;

/// Sending half used by the scheduler to hand a request to a worker.
///
/// Posting must not block: the scheduler calls it from inside a drain step.
pub trait WorkerLink: Send + 'static {
    /// Hands `request` to the worker, or gives it back if the link cannot
    /// accept it.
    fn post(&self, request: Request) -> Result<(), PostError>;
}

/// A request that could not be posted, returned to the caller intact.
#[derive(Debug)]
pub enum PostError {
    /// The worker side of the link has gone away.
    Closed(Request),
    /// The worker already holds an unread request.
    Full(Request),
}

impl PostError {
    /// Recovers the request that could not be posted.
    pub fn into_request(self) -> Request {
        match self {
            Self::Closed(request) | Self::Full(request) => request,
        }
    }
}

/// Creates a connected dispatcher/worker pair.
pub fn channel() -> (WorkerHandle, WorkerPort) {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);
    let (response_tx, response_rx) = mpsc::channel(RESPONSE_BUFFER_SIZE);

    (
        WorkerHandle {
            requests: request_tx,
            responses: response_rx,
        },
        WorkerPort {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

/// Dispatcher end of a worker link, passed to `Dispatcher::register_worker`.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::Sender<Envelope>,
    responses: mpsc::Receiver<Envelope>,
}

impl WorkerHandle {
    /// Separates the request sender from the response stream so they can be
    /// owned by the scheduler and a forwarding task respectively.
    pub fn split(self) -> (RequestSender, mpsc::Receiver<Envelope>) {
        (
            RequestSender {
                tx: self.requests,
            },
            self.responses,
        )
    }
}

/// The [`WorkerLink`] implementation for in-process workers.
#[derive(Clone, Debug)]
pub struct RequestSender {
    tx: mpsc::Sender<Envelope>,
}

impl WorkerLink for RequestSender {
    fn post(&self, request: Request) -> Result<(), PostError> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                permit.send(request.into_envelope());
                Ok(())
            }
            Err(TrySendError::Closed(())) => Err(PostError::Closed(request)),
            Err(TrySendError::Full(())) => Err(PostError::Full(request)),
        }
    }
}

/// Worker end of a link.
#[derive(Debug)]
pub struct WorkerPort {
    requests: mpsc::Receiver<Envelope>,
    responses: mpsc::Sender<Envelope>,
}

impl WorkerPort {
    /// Waits for the next request frame. Returns `None` once the dispatcher
    /// has dropped its end.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.requests.recv().await
    }

    /// Sends a response frame back to the dispatcher.
    pub async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.responses
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelError {
                context: "dispatcher dropped the response channel".to_string(),
            })
    }
}
