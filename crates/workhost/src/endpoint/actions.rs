//! Registry of the actions a worker can run.
//!
//! Actions are registered once, before any worker starts, and the resulting
//! [`Actions`] is shared by every worker in a pool. The registry is the build
//! time contract between the dispatcher and its workers: its
//! [`manifest`](Actions::manifest) can be handed to the dispatcher so that
//! unknown methods are refused at submission instead of at the worker.

use core::future::Future;
use futures::{FutureExt, future::BoxFuture};
use std::{collections::HashMap, fmt, sync::Arc};
use workhost_core::{
    Error,
    types::{HELO, Manifest, Method, Payload},
};

/// Boxed future returned by a registered handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Payload>>;

/// A type-erased action handler.
pub type Handler = Arc<dyn Fn(Payload) -> HandlerFuture + Send + Sync>;

#[derive(Clone, Default)]
pub struct Actions {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("Actions").field("methods", &methods).finish()
    }
}

impl Actions {
    /// Creates an empty registry. Only the handshake is answered until
    /// actions are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an untyped handler for `method`.
    ///
    /// The handler receives the request payload and may return anything that
    /// converts into a [`Payload`], such as a `serde_json::Value`.
    ///
    /// # Errors
    ///
    /// - [`Error::ReservedMethod`] for the handshake method.
    /// - [`Error::DuplicateMethod`] if `method` is already registered.
    pub fn register<F, Fut, T>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, Error>
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Into<Payload>,
    {
        let method = method.into();
        if method == HELO {
            return Err(Error::ReservedMethod { method });
        }
        if self.handlers.contains_key(&method) {
            return Err(Error::DuplicateMethod { method });
        }

        let handler: Handler = Arc::new(move |payload: Payload| -> HandlerFuture {
            let fut = handler(payload);
            async move { fut.await.map(Into::into) }.boxed()
        });
        self.handlers.insert(method, handler);
        Ok(self)
    }

    /// Registers a handler for a typed [`Method`] contract. Parameters are
    /// decoded from the payload value and the output is encoded back into it.
    pub fn register_method<M, F, Fut>(&mut self, handler: F) -> Result<&mut Self, Error>
    where
        M: Method,
        F: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<M::Output>> + Send + 'static,
    {
        self.register(M::NAME, move |payload: Payload| {
            let call = serde_json::from_value::<M::Params>(payload.value).map(&handler);
            async move {
                let output = call?.await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(output)?)
            }
        })
    }

    /// The handler registered for `method`. The handshake has no handler; the
    /// endpoint answers it itself.
    pub fn get(&self, method: &str) -> Option<&Handler> {
        self.handlers.get(method)
    }

    /// Whether a worker built from this registry answers `method`.
    pub fn contains(&self, method: &str) -> bool {
        method == HELO || self.handlers.contains_key(method)
    }

    /// The method names this registry answers, including the handshake.
    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.handlers.keys().cloned())
    }

    /// Number of registered actions, not counting the handshake.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no action is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
