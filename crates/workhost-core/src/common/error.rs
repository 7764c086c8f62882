//! Error types for the job dispatcher and its workers.
//!
//! Two audiences see errors here, so there are two enums:
//!
//! - [`Error`] covers system and protocol faults: stale or malformed responses,
//!   broken channels, invalid registrations. These are not attributable to a
//!   single caller and are reported through logs and the dispatcher's fault
//!   stream.
//! - [`JobError`] is what a caller of `submit` observes on its pending result.
//!   The ordinary failure path is [`JobError::Action`], which carries the
//!   message a worker reported for a failed handler.

use crate::types::{JobId, SlotId};
use serde_json::Value;

pub type Result<T> = core::result::Result<T, Error>;

/// System and protocol errors.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A response referenced a job that is not in flight (duplicate or late
    /// reply).
    #[error("Stale response: job {id} from worker {slot} is not in flight")]
    StaleResponse { id: JobId, slot: SlotId },

    /// A response carried an outcome tag other than `finished` or `errored`.
    #[error("Unknown response outcome {outcome:?} for job {id}")]
    UnknownResponseOutcome { id: JobId, outcome: String },

    /// A request named a method that is not part of the agreed method set.
    #[error("Unknown method \"{method}\"")]
    UnknownMethod { method: String },

    /// An action tried to register under a reserved method name.
    #[error("Method \"{method}\" is reserved")]
    ReservedMethod { method: String },

    /// An action tried to register under a name that is already taken.
    #[error("Method \"{method}\" is already registered")]
    DuplicateMethod { method: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A message could not be encoded or decoded.
    #[error("Codec error: {context}")]
    Codec { context: String },

    /// The dispatcher is shutting down or already stopped.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Configuration values were rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            context: err.to_string(),
        }
    }
}

/// Failure reported by a worker for a handler that returned an error.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("Worker action failed: {message}")]
pub struct WorkerActionError {
    message: String,
}

impl WorkerActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The description supplied by the worker.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Builds the error from the payload of an `errored` response. Workers
    /// send a string; anything else is rendered as JSON text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self { message },
            other => Self {
                message: other.to_string(),
            },
        }
    }
}

/// Failure observed by the caller of a submitted job.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum JobError {
    /// The worker ran the handler and it failed.
    #[error(transparent)]
    Action(#[from] WorkerActionError),

    /// The method is not part of the pool's manifest; the job never left the
    /// dispatcher.
    #[error("Unknown method \"{method}\"")]
    UnknownMethod { method: String },

    /// The method is reserved for the dispatcher itself and cannot be
    /// submitted as a job.
    #[error("Method \"{method}\" is reserved")]
    ReservedMethod { method: String },

    /// Typed parameters or results could not be converted.
    #[error("Codec error: {context}")]
    Codec { context: String },

    /// Every worker in the pool has disconnected.
    #[error("No live workers remain in the pool")]
    NoWorkers,

    /// The worker holding the job disconnected before replying.
    #[error("Worker {slot} disconnected before replying")]
    WorkerLost { slot: SlotId },

    /// The dispatcher stopped before the job settled.
    #[error("Service is shutting down")]
    Shutdown,
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            context: err.to_string(),
        }
    }
}

impl JobError {
    /// Returns the worker-reported failure, if that is what this is.
    pub fn as_action(&self) -> Option<&WorkerActionError> {
        match self {
            Self::Action(err) => Some(err),
            _ => None,
        }
    }
}
