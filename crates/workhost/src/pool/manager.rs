//! The dispatcher: a cloneable handle to the task that owns the scheduler.
//!
//! All scheduling state lives in one spawned task. Submissions, worker
//! registrations and worker responses reach it as messages and are handled
//! one at a time, so no lock guards the queues or the busy flags. Each
//! registered worker gets a small forwarding task that tags its responses with
//! the worker's slot and reports when the worker goes away.
//!
//! Protocol faults (stale responses, unknown outcome tags, malformed frames)
//! cannot be routed to a caller. They are logged at `error` level and
//! broadcast to [`Dispatcher::faults`] subscribers; the dispatcher keeps
//! serving every other job.

use super::{
    handle::JobHandle,
    scheduler::{PoolStats, Reply, Scheduler},
};
use crate::{
    config::PoolConfig,
    link::{RequestSender, WorkerHandle},
};
use futures::future::BoxFuture;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use workhost_core::{
    Error, JobError,
    types::{HELO, Manifest, Method, Payload, Response, SlotId},
    wire::Envelope,
};

enum Command {
    Submit {
        method: String,
        payload: Payload,
        reply: Reply,
    },
    Register(WorkerHandle),
    Snapshot(oneshot::Sender<PoolStats>),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Message(SlotId, Envelope),
    Closed(SlotId),
}

/// Distributes jobs across a pool of workers.
///
/// Cloning is cheap; every clone talks to the same pool. The pool keeps
/// running until [`shutdown`](Self::shutdown) is called, or until every
/// handle is dropped and the remaining work has settled.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
    faults: broadcast::Sender<Error>,
    manifest: Option<Manifest>,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    /// Builds a pool from `workers` and starts the dispatcher task.
    ///
    /// Every worker is registered in order and sent its handshake before this
    /// returns, so handshakes precede any job submitted afterwards.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig, workers: impl IntoIterator<Item = WorkerHandle>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (faults, _) = broadcast::channel(config.fault_buffer_size.max(1));
        let shutdown_token = CancellationToken::new();

        let mut actor = Actor {
            scheduler: Scheduler::new(config.log_level),
            commands: command_rx,
            events: event_rx,
            event_tx,
            faults: faults.clone(),
            shutdown_token: shutdown_token.clone(),
            shutdown_timeout: config.shutdown_timeout,
            accepting: true,
            deadline: None,
            waiters: Vec::new(),
        };
        for worker in workers {
            actor.attach(worker);
        }

        tracing::info!(
            workers = actor.scheduler.snapshot().workers,
            log_level = %config.log_level,
            "Dispatcher started"
        );
        tokio::spawn(actor.run());

        Self {
            commands,
            faults,
            manifest: config.manifest,
            shutdown_token,
        }
    }

    /// Queues `method` with `payload` and returns its pending result.
    ///
    /// Never blocks. The handle is already settled when:
    ///
    /// - `method` is the reserved handshake, with [`JobError::ReservedMethod`].
    ///   Workers are only ever greeted once, at registration.
    /// - the pool was built with a manifest that does not list `method`, with
    ///   [`JobError::UnknownMethod`].
    pub fn submit(&self, method: impl Into<String>, payload: impl Into<Payload>) -> JobHandle {
        let method = method.into();

        if method == HELO {
            tracing::warn!(%method, "Rejected job for the reserved handshake method");
            return JobHandle::rejected(JobError::ReservedMethod { method });
        }
        if let Some(manifest) = &self.manifest {
            if !manifest.contains(&method) {
                tracing::warn!(%method, "Rejected job for a method outside the manifest");
                return JobHandle::rejected(JobError::UnknownMethod { method });
            }
        }
        if self.shutdown_token.is_cancelled() {
            return JobHandle::rejected(JobError::Shutdown);
        }

        let (reply, rx) = oneshot::channel();
        let command = Command::Submit {
            method,
            payload: payload.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return JobHandle::rejected(JobError::Shutdown);
        }
        JobHandle::new(rx)
    }

    /// Typed form of [`submit`](Self::submit) for a [`Method`] contract.
    ///
    /// The job is queued before this returns; the future only waits for and
    /// decodes the result.
    pub fn call<M: Method>(
        &self,
        params: M::Params,
    ) -> BoxFuture<'static, Result<M::Output, JobError>> {
        let handle = match serde_json::to_value(params) {
            Ok(value) => self.submit(M::NAME, value),
            Err(err) => JobHandle::rejected(err.into()),
        };

        Box::pin(async move {
            let payload = handle.await?;
            Ok(serde_json::from_value(payload.value)?)
        })
    }

    /// Adds a worker to a running pool. It receives its handshake before any
    /// other job.
    pub fn register_worker(&self, worker: WorkerHandle) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }
        self.commands
            .send(Command::Register(worker))
            .map_err(|_| Error::ServiceShutdown)
    }

    /// Current pool counters.
    pub async fn snapshot(&self) -> Result<PoolStats, Error> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .map_err(|_| Error::ServiceShutdown)?;
        rx.await.map_err(|_| Error::ServiceShutdown)
    }

    /// Subscribes to protocol faults raised from now on.
    pub fn faults(&self) -> broadcast::Receiver<Error> {
        self.faults.subscribe()
    }

    /// True once shutdown has started. Submissions made after this point are
    /// rejected with [`JobError::Shutdown`].
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Gracefully shuts the pool down.
    ///
    /// - Refuses new submissions.
    /// - Rejects every pending job with [`JobError::Shutdown`].
    /// - Waits up to the configured timeout for in-flight jobs to settle.
    /// - Closes every worker link so worker endpoints stop.
    ///
    /// Returns once the dispatcher task has finished. Calling it again, or
    /// from several clones, is harmless.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_err() {
            return Ok(());
        }
        // The task may finish before acknowledging; either way it is gone.
        let _ = rx.await;
        Ok(())
    }
}

/// Task that owns the scheduler.
struct Actor {
    scheduler: Scheduler<RequestSender>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    event_tx: mpsc::UnboundedSender<Event>,
    faults: broadcast::Sender<Error>,
    shutdown_token: CancellationToken,
    shutdown_timeout: core::time::Duration,
    /// False once every `Dispatcher` handle is gone.
    accepting: bool,
    /// Set once shutdown starts.
    deadline: Option<Instant>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            if self.finished() {
                break;
            }

            let deadline = self.deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                command = self.commands.recv(), if self.accepting => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!("All dispatcher handles dropped, finishing outstanding work");
                        self.accepting = false;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                () = sleep_until(deadline), if self.deadline.is_some() => {
                    tracing::warn!(
                        in_flight = self.scheduler.snapshot().in_flight,
                        "Shutdown timed out with jobs still in flight"
                    );
                    break;
                }
            }
        }

        self.scheduler.close();
        self.shutdown_token.cancel();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::info!("Dispatcher stopped");
    }

    fn finished(&mut self) -> bool {
        let stopping = self.deadline.is_some() || !self.accepting;
        if !stopping {
            return false;
        }
        // Nobody can add workers any more, so queued jobs would never run.
        if self.scheduler.live_workers() == 0 {
            self.scheduler.reject_pending(&JobError::Shutdown);
        }
        self.scheduler.is_quiescent()
    }

    fn attach(&mut self, worker: WorkerHandle) {
        let (link, responses) = worker.split();
        let slot = self.scheduler.register_worker(link);
        tokio::spawn(forward_responses(slot, responses, self.event_tx.clone()));
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                method,
                payload,
                reply,
            } => {
                if self.deadline.is_some() {
                    let _ = reply.send(Err(JobError::Shutdown));
                } else {
                    self.scheduler.submit(method, payload, reply);
                }
            }
            Command::Register(worker) => {
                if self.deadline.is_some() {
                    tracing::debug!("Ignoring worker registered during shutdown");
                } else {
                    self.attach(worker);
                }
            }
            Command::Snapshot(tx) => {
                let _ = tx.send(self.scheduler.snapshot());
            }
            Command::Shutdown(tx) => {
                self.waiters.push(tx);
                if self.deadline.is_none() {
                    let stats = self.scheduler.snapshot();
                    tracing::info!(
                        pending = stats.pending,
                        in_flight = stats.in_flight,
                        "Shutting down dispatcher"
                    );
                    self.shutdown_token.cancel();
                    self.deadline = Some(Instant::now() + self.shutdown_timeout);
                    self.scheduler.reject_pending(&JobError::Shutdown);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message(slot, envelope) => {
                let result = Response::from_envelope(envelope)
                    .and_then(|response| self.scheduler.on_response(slot, response));
                if let Err(fault) = result {
                    self.report(slot, fault);
                }
            }
            Event::Closed(slot) => self.scheduler.on_worker_closed(slot),
        }
    }

    fn report(&self, slot: SlotId, fault: Error) {
        tracing::error!(%slot, %fault, "Protocol fault");
        // No subscribers is fine; the log line above is the report.
        let _ = self.faults.send(fault);
    }
}

/// Moves one worker's responses into the dispatcher task, then reports the
/// worker as closed once its channel ends.
async fn forward_responses(
    slot: SlotId,
    mut responses: mpsc::Receiver<Envelope>,
    events: mpsc::UnboundedSender<Event>,
) {
    while let Some(envelope) = responses.recv().await {
        if events.send(Event::Message(slot, envelope)).is_err() {
            return;
        }
    }
    let _ = events.send(Event::Closed(slot));
}
