use super::actions::{Actions, HandlerFuture};
use crate::link::{self, WorkerHandle, WorkerPort};
use anyhow::anyhow;
use core::{any::Any, panic::AssertUnwindSafe};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use workhost_core::{
    Error,
    types::{HELO, HELO_ACK, Helo, JobId, LogLevel, Payload, Request, Response},
    wire::Envelope,
};

/// Request loop running inside one worker.
///
/// An endpoint handles one request at a time: it decodes the request, runs the
/// matching action and sends back a `finished` or `errored` response tagged
/// with the request's job id. Requests that arrive while a handler is
/// suspended wait in the link until the handler completes.
///
/// # Request Types
///
/// - `helo` - the handshake. Stores the requested log level as this
///   endpoint's diagnostic level and answers `"hello"`.
/// - A registered action - runs the handler. A handler error or panic becomes
///   an `errored` response carrying the error chain as text.
/// - Anything else - answered with an `errored` response describing the
///   unknown method. The worker keeps serving; the dispatcher sees an
///   ordinary job failure.
#[derive(Debug)]
pub struct Endpoint {
    actions: Arc<Actions>,
    log_level: LogLevel,
}

impl Endpoint {
    /// Creates an endpoint at the default `error` level. The handshake
    /// overrides the level.
    pub fn new(actions: Arc<Actions>) -> Self {
        Self {
            actions,
            log_level: LogLevel::default(),
        }
    }

    /// The level set by the most recent handshake.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Whether diagnostics at `level` are emitted by this endpoint.
    pub fn traces(&self, level: LogLevel) -> bool {
        level <= self.log_level
    }

    /// Runs a single request to completion.
    pub async fn handle(&mut self, request: Request) -> Response {
        let Request {
            id,
            method,
            payload,
        } = request;

        if self.traces(LogLevel::Debug) {
            tracing::debug!(job = %id, %method, "Worker received request");
        }

        let result = if method == HELO {
            self.helo(payload)
        } else if let Some(handler) = self.actions.get(&method) {
            invoke(handler(payload)).await
        } else {
            tracing::error!(job = %id, %method, "Request for an unregistered method");
            Err(anyhow!(Error::UnknownMethod { method }))
        };

        match result {
            Ok(payload) => {
                if self.traces(LogLevel::Trace) {
                    tracing::trace!(job = %id, "Worker finished request");
                }
                Response::finished(id, payload)
            }
            Err(err) => {
                if self.traces(LogLevel::Warn) {
                    tracing::warn!(job = %id, error = %format!("{err:#}"), "Worker action errored");
                }
                Response::errored(id, format!("{err:#}"))
            }
        }
    }

    fn helo(&mut self, payload: Payload) -> anyhow::Result<Payload> {
        let helo: Helo = match payload.value {
            Value::Null => Helo::default(),
            value => serde_json::from_value(value)?,
        };
        self.log_level = helo.log_level;

        if self.traces(LogLevel::Debug) {
            tracing::debug!(log_level = %self.log_level, "Worker log level set");
        }
        Ok(Payload::new(HELO_ACK))
    }

    /// Decodes and runs one request frame.
    ///
    /// A frame that fails to decode but still starts with a job id is
    /// answered `errored`, so the dispatcher frees the worker. Without an id
    /// nobody can be answered and `None` is returned.
    pub async fn answer(&mut self, envelope: Envelope) -> Option<Response> {
        let id = envelope.message.get(0).and_then(Value::as_u64).map(JobId);

        match Request::from_envelope(envelope) {
            Ok(request) => Some(self.handle(request).await),
            Err(err) => {
                tracing::error!(job = ?id, error = %err, "Worker received an undecodable request");
                id.map(|id| Response::errored(id, err.to_string()))
            }
        }
    }

    /// Serves requests from `port` until the dispatcher closes the link, then
    /// returns the endpoint.
    pub async fn serve(mut self, mut port: WorkerPort) -> Self {
        while let Some(envelope) = port.recv().await {
            let Some(response) = self.answer(envelope).await else {
                continue;
            };
            if let Err(err) = port.send(response.into_envelope()).await {
                tracing::debug!(error = %err, "Worker stopping, dispatcher is gone");
                break;
            }
        }

        if self.traces(LogLevel::Debug) {
            tracing::debug!("Worker stopped");
        }
        self
    }

    /// Spawns [`serve`](Self::serve) on the current runtime.
    pub fn spawn(self, port: WorkerPort) -> JoinHandle<Self> {
        tokio::spawn(self.serve(port))
    }
}

/// Starts an in-process worker for `actions` and returns the dispatcher end of
/// its link along with the worker task.
pub fn spawn_worker(actions: &Arc<Actions>) -> (WorkerHandle, JoinHandle<Endpoint>) {
    let (handle, port) = link::channel();
    let task = Endpoint::new(Arc::clone(actions)).spawn(port);
    (handle, task)
}

async fn invoke(future: HandlerFuture) -> anyhow::Result<Payload> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
