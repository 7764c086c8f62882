//! Array frames exchanged over a worker link.
//!
//! A request travels as `[id, method, payload]` and a response as
//! `[id, outcome, payload]`, where `outcome` is `"finished"` or `"errored"`.
//! Binary attachments are not part of the array; they ride beside it in the
//! [`Envelope`] so that they move instead of being re-encoded.

use crate::{
    Error, Result,
    types::{JobId, Outcome, Payload, Request, Response},
};
use bytes::Bytes;
use serde_json::Value;

/// A structured frame plus the attachments that move with it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub message: Value,
    pub transfer: Vec<Bytes>,
}

impl Envelope {
    pub fn new(message: Value) -> Self {
        Self {
            message,
            transfer: Vec::new(),
        }
    }
}

impl Request {
    /// Encodes the request as `[id, method, payload]`.
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            message: Value::Array(vec![
                Value::from(self.id.0),
                Value::String(self.method),
                self.payload.value,
            ]),
            transfer: self.payload.transfer,
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope { message, transfer } = envelope;
        let [id, method, value] = split_frame(message, "request")?;
        let id = job_id(&id)?;
        let Value::String(method) = method else {
            return Err(Error::Codec {
                context: format!("request {id} has a non-string method: {method}"),
            });
        };

        Ok(Self {
            id,
            method,
            payload: Payload { value, transfer },
        })
    }
}

impl Response {
    /// Encodes the response as `[id, outcome, payload]`.
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            message: Value::Array(vec![
                Value::from(self.id.0),
                Value::String(self.outcome.as_str().to_string()),
                self.payload.value,
            ]),
            transfer: self.payload.transfer,
        }
    }

    /// Decodes a response frame.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownResponseOutcome`] if the outcome tag is neither
    ///   `finished` nor `errored`.
    /// - [`Error::Codec`] if the frame is not a three-element array with an
    ///   integer id.
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope { message, transfer } = envelope;
        let [id, outcome, value] = split_frame(message, "response")?;
        let id = job_id(&id)?;
        let outcome = match outcome {
            Value::String(tag) => {
                Outcome::from_tag(&tag).ok_or(Error::UnknownResponseOutcome { id, outcome: tag })?
            }
            other => {
                return Err(Error::UnknownResponseOutcome {
                    id,
                    outcome: other.to_string(),
                });
            }
        };

        Ok(Self {
            id,
            outcome,
            payload: Payload { value, transfer },
        })
    }
}

fn split_frame(message: Value, kind: &str) -> Result<[Value; 3]> {
    let Value::Array(parts) = message else {
        return Err(Error::Codec {
            context: format!("{kind} frame is not an array"),
        });
    };

    parts.try_into().map_err(|parts: Vec<Value>| Error::Codec {
        context: format!("{kind} frame has {} elements, expected 3", parts.len()),
    })
}

fn job_id(value: &Value) -> Result<JobId> {
    value.as_u64().map(JobId).ok_or_else(|| Error::Codec {
        context: format!("job id {value} is not an unsigned integer"),
    })
}
