//! Single-threaded scheduling core of the dispatcher.
//!
//! [`Scheduler`] owns the worker slots, the pending queue and the in-flight
//! table. Every method runs to completion without suspending, so a drain step
//! is atomic with respect to submissions and completions as long as one task
//! owns the scheduler (see [`super::manager`]).
//!
//! Invariants maintained here:
//!
//! - A job is either pending, in flight, or settled and dropped.
//! - A slot is [`SlotState::Busy`] exactly when one in-flight job names it.
//! - Pending jobs leave the queue strictly in submission order.

use crate::link::{PostError, WorkerLink};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use workhost_core::{
    Error, JobError, WorkerActionError,
    types::{HELO, Helo, JobId, LogLevel, Outcome, Payload, Request, Response, SlotId},
};

/// Sender used to settle a caller's pending result.
pub type Reply = oneshot::Sender<Result<Payload, JobError>>;

/// Who is waiting for a job's result.
#[derive(Debug)]
enum Settle {
    Caller(Reply),
    Handshake,
}

#[derive(Debug)]
struct Job {
    id: JobId,
    method: String,
    payload: Payload,
    settle: Settle,
}

#[derive(Debug)]
struct InFlight {
    slot: SlotId,
    settle: Settle,
}

/// Lifecycle of a worker slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Busy(JobId),
    /// The worker's link closed; the slot is never assigned again.
    Retired,
}

#[derive(Debug)]
struct WorkerSlot<L> {
    id: SlotId,
    state: SlotState,
    link: Option<L>,
}

impl<L> WorkerSlot<L> {
    fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }

    fn retire(&mut self) {
        self.state = SlotState::Retired;
        self.link = None;
    }
}

/// Point-in-time counters for a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub retired: usize,
    pub pending: usize,
    pub in_flight: usize,
}

/// Pending queue, in-flight table and worker slots of one dispatcher.
#[derive(Debug)]
pub struct Scheduler<L> {
    slots: Vec<WorkerSlot<L>>,
    pending: VecDeque<Job>,
    in_flight: HashMap<JobId, InFlight>,
    next_job_id: u64,
    log_level: LogLevel,
}

impl<L: WorkerLink> Scheduler<L> {
    /// Creates an empty scheduler. `log_level` is pushed to every worker in
    /// its handshake.
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            slots: Vec::new(),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            next_job_id: 0,
            log_level,
        }
    }

    fn next_id(&mut self) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        id
    }

    /// Adds a worker and sends it the handshake.
    ///
    /// The handshake goes straight to the new slot, which is idle by
    /// construction, so it is the first request that worker ever sees. It is
    /// not queued behind pending jobs and its result is only logged.
    pub fn register_worker(&mut self, link: L) -> SlotId {
        let slot = SlotId(self.slots.len());
        self.slots.push(WorkerSlot {
            id: slot,
            state: SlotState::Idle,
            link: Some(link),
        });

        let handshake = Job {
            id: self.next_id(),
            method: HELO.to_string(),
            payload: Helo {
                log_level: self.log_level,
            }
            .into(),
            settle: Settle::Handshake,
        };

        tracing::debug!(%slot, job = %handshake.id, "Registered worker, sending handshake");
        self.dispatch(slot.0, handshake);
        slot
    }

    /// Queues a job and runs a drain step. Returns the job's identifier.
    pub fn submit(&mut self, method: String, payload: Payload, reply: Reply) -> JobId {
        let id = self.next_id();
        tracing::trace!(job = %id, %method, "Job queued");
        self.pending.push_back(Job {
            id,
            method,
            payload,
            settle: Settle::Caller(reply),
        });
        self.drain();
        id
    }

    /// Assigns pending jobs to idle workers, oldest job first, scanning slots
    /// in registration order, until one of the two runs out.
    pub fn drain(&mut self) {
        while !self.pending.is_empty() {
            let Some(index) = self.slots.iter().position(WorkerSlot::is_idle) else {
                break;
            };
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(index, job);
        }

        if !self.pending.is_empty() && !self.slots.is_empty() && self.live_workers() == 0 {
            tracing::error!(
                pending = self.pending.len(),
                "Every worker has disconnected, rejecting pending jobs"
            );
            self.reject_pending(&JobError::NoWorkers);
        }
    }

    fn dispatch(&mut self, index: usize, job: Job) {
        let Job {
            id,
            method,
            payload,
            settle,
        } = job;
        let slot = &mut self.slots[index];

        tracing::debug!(job = %id, %method, slot = %slot.id, "Dispatching job");
        let request = Request {
            id,
            method,
            payload,
        };
        let posted = match slot.link.as_ref() {
            Some(link) => link.post(request),
            None => Err(PostError::Closed(request)),
        };

        match posted {
            Ok(()) => {
                slot.state = SlotState::Busy(id);
                self.in_flight.insert(
                    id,
                    InFlight {
                        slot: slot.id,
                        settle,
                    },
                );
            }
            Err(err) => {
                match &err {
                    PostError::Closed(_) => {
                        tracing::warn!(slot = %slot.id, "Worker link closed, retiring slot");
                    }
                    PostError::Full(_) => {
                        tracing::error!(
                            slot = %slot.id,
                            "Worker link already holds a request, retiring slot"
                        );
                    }
                }
                slot.retire();

                let Request {
                    id,
                    method,
                    payload,
                } = err.into_request();
                // Handshakes belong to the retired slot; jobs go back to the
                // head so FIFO order holds.
                if let Settle::Caller(_) = settle {
                    self.pending.push_front(Job {
                        id,
                        method,
                        payload,
                        settle,
                    });
                }
            }
        }
    }

    /// Handles a decoded response from worker `from`.
    ///
    /// The worker is released and a drain step runs before the caller is
    /// settled, so a freed worker picks up the next job without waiting for
    /// the caller to react.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleResponse`] if no job with that id is in flight.
    /// Nothing else is touched in that case.
    pub fn on_response(&mut self, from: SlotId, response: Response) -> Result<(), Error> {
        let Response {
            id,
            outcome,
            payload,
        } = response;
        let Some(flight) = self.in_flight.remove(&id) else {
            return Err(Error::StaleResponse { id, slot: from });
        };

        if flight.slot != from {
            tracing::warn!(job = %id, assigned = %flight.slot, %from, "Response arrived from a different worker");
        }
        if let Some(slot) = self.slots.get_mut(flight.slot.0) {
            if slot.state == SlotState::Busy(id) {
                slot.state = SlotState::Idle;
            }
        }

        self.drain();

        match (flight.settle, outcome) {
            (Settle::Caller(reply), Outcome::Finished) => {
                tracing::debug!(job = %id, "Job finished");
                if reply.send(Ok(payload)).is_err() {
                    tracing::trace!(job = %id, "Caller dropped its handle");
                }
            }
            (Settle::Caller(reply), Outcome::Errored) => {
                let err = WorkerActionError::from_value(payload.value);
                tracing::debug!(job = %id, error = %err, "Job errored");
                if reply.send(Err(err.into())).is_err() {
                    tracing::trace!(job = %id, "Caller dropped its handle");
                }
            }
            (Settle::Handshake, Outcome::Finished) => {
                tracing::debug!(slot = %flight.slot, "Worker acknowledged handshake");
            }
            (Settle::Handshake, Outcome::Errored) => {
                // The worker stays in the pool.
                tracing::warn!(
                    slot = %flight.slot,
                    error = %WorkerActionError::from_value(payload.value),
                    "Worker failed its handshake"
                );
            }
        }

        Ok(())
    }

    /// Retires `slot` after its response channel closed. A job it was running
    /// fails with [`JobError::WorkerLost`].
    pub fn on_worker_closed(&mut self, slot: SlotId) {
        let Some(worker) = self.slots.get_mut(slot.0) else {
            return;
        };
        let previous = worker.state;
        worker.retire();
        tracing::warn!(%slot, "Worker disconnected");

        if let SlotState::Busy(id) = previous {
            if let Some(InFlight {
                settle: Settle::Caller(reply),
                ..
            }) = self.in_flight.remove(&id)
            {
                let _ = reply.send(Err(JobError::WorkerLost { slot }));
            } else {
                tracing::debug!(%slot, job = %id, "Dropped in-flight handshake of lost worker");
            }
        }

        self.drain();
    }

    /// Settles every pending job with `err`, leaving in-flight jobs alone.
    pub fn reject_pending(&mut self, err: &JobError) {
        for job in self.pending.drain(..) {
            if let Settle::Caller(reply) = job.settle {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    /// Drops every worker link so endpoint loops observe a closed channel.
    pub fn close(&mut self) {
        for slot in &mut self.slots {
            slot.link = None;
        }
    }

    /// Number of slots that have not been retired.
    pub fn live_workers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Retired)
            .count()
    }

    /// State of `slot`, or `None` if no such worker was registered.
    pub fn slot_state(&self, slot: SlotId) -> Option<SlotState> {
        self.slots.get(slot.0).map(|slot| slot.state)
    }

    /// True when nothing is pending and nothing is in flight.
    pub fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Counts slots by state along with the pending and in-flight jobs.
    pub fn snapshot(&self) -> PoolStats {
        let mut stats = PoolStats {
            workers: self.slots.len(),
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            ..PoolStats::default()
        };
        for slot in &self.slots {
            match slot.state {
                SlotState::Idle => stats.idle += 1,
                SlotState::Busy(_) => stats.busy += 1,
                SlotState::Retired => stats.retired += 1,
            }
        }
        stats
    }
}
