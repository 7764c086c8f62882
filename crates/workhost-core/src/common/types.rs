//! Identifiers, payloads and messages exchanged over a worker link.

use bytes::Bytes;
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc};

/// Reserved handshake method, answered by every worker endpoint regardless of
/// the actions it registers.
pub const HELO: &str = "helo";

/// Value a worker returns from a successful handshake.
pub const HELO_ACK: &str = "hello";

/// Identifier of a job, unique for the lifetime of one dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a worker in the pool, assigned at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a request or response.
///
/// `value` is the structured part and is always representable on the wire.
/// `transfer` holds binary attachments that move with the message by
/// ownership: [`Bytes`] is reference counted, so handing an attachment to a
/// worker never copies its contents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    pub value: Value,
    pub transfer: Vec<Bytes>,
}

impl Payload {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            transfer: Vec::new(),
        }
    }

    /// Attaches buffers that should be moved rather than copied.
    #[must_use]
    pub fn with_transfer(mut self, items: impl IntoIterator<Item = Bytes>) -> Self {
        self.transfer.extend(items);
        self
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Dispatcher to worker: run `method` with `payload` and reply with `id`.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: JobId,
    pub method: String,
    pub payload: Payload,
}

/// How a worker finished a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Finished,
    Errored,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }

    /// Parses a wire tag, returning `None` for anything unrecognised.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "finished" => Some(Self::Finished),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker to dispatcher: the result of request `id`.
///
/// For [`Outcome::Errored`] the payload value is a human-readable string.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: JobId,
    pub outcome: Outcome,
    pub payload: Payload,
}

impl Response {
    pub fn finished(id: JobId, payload: Payload) -> Self {
        Self {
            id,
            outcome: Outcome::Finished,
            payload,
        }
    }

    pub fn errored(id: JobId, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Errored,
            payload: Payload::new(Value::String(message.into())),
        }
    }
}

/// Diagnostic verbosity pushed to workers through the handshake.
///
/// Ordered from least to most verbose, so `level <= configured` means a
/// message at `level` should be emitted.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(crate::Error::InvalidConfig {
                reason: format!("unknown log level {other:?}"),
            }),
        }
    }
}

/// Payload of the reserved [`HELO`] request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Helo {
    #[serde(default)]
    pub log_level: LogLevel,
}

impl From<Helo> for Payload {
    fn from(helo: Helo) -> Self {
        Self::new(serde_json::json!({ "logLevel": helo.log_level.as_str() }))
    }
}

/// A typed method contract shared by the dispatcher and the worker endpoint.
///
/// Implementors are usually unit structs:
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use workhost_core::types::Method;
///
/// #[derive(Serialize, Deserialize)]
/// pub struct Add {
///     pub a: i64,
///     pub b: i64,
/// }
///
/// pub struct Sum;
///
/// impl Method for Sum {
///     const NAME: &'static str = "sum";
///     type Params = Add;
///     type Output = i64;
/// }
/// ```
pub trait Method {
    const NAME: &'static str;
    type Params: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// The closed set of method names a pool of workers understands.
///
/// The handshake method is always a member.
///
/// ```
/// use workhost_core::types::{HELO, Manifest};
///
/// let manifest = Manifest::new(["pi", "checksum"]);
/// assert!(manifest.contains("pi"));
/// assert!(manifest.contains(HELO));
/// assert_eq!(manifest.iter().collect::<Vec<_>>(), ["checksum", HELO, "pi"]);
/// assert_eq!(manifest.len(), 3);
/// assert!(!manifest.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest(Arc<BTreeSet<String>>);

impl Manifest {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: BTreeSet<String> = methods.into_iter().map(Into::into).collect();
        set.insert(HELO.to_string());
        Self(Arc::new(set))
    }

    /// Whether `method` is listed. The handshake always is, although the
    /// dispatcher refuses to submit it as a job.
    pub fn contains(&self, method: &str) -> bool {
        self.0.contains(method)
    }

    /// Method names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of methods, counting the handshake.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, since the handshake is listed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(core::iter::empty::<String>())
    }
}
