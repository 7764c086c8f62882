//! End-to-end tests for a dispatcher driving in-process workers.
//!
//! Most tests run real endpoints through `spawn_worker`. The protocol tests
//! drive a `WorkerPort` by hand so they can send frames a well-behaved worker
//! never would.

use anyhow::anyhow;
use bytes::Bytes;
use core::time::Duration;
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use workhost::{
    Actions, Dispatcher, Error, JobError, PoolConfig, PoolStats, WorkerPort, link, spawn_worker,
    workhost_core::{
        types::{HELO, HELO_ACK, JobId, LogLevel, Method, Payload, Request, Response, SlotId},
        wire::Envelope,
    },
};

struct Double;

impl Method for Double {
    const NAME: &'static str = "double";
    type Params = i64;
    type Output = i64;
}

fn actions() -> Actions {
    let mut actions = Actions::new();
    actions
        .register("echo", |payload: Payload| async move {
            Ok::<_, anyhow::Error>(payload)
        })
        .unwrap()
        .register("fail", |payload: Payload| async move {
            Err::<Value, _>(anyhow!("boom: {}", payload.value))
        })
        .unwrap()
        .register_method::<Double, _, _>(|n| async move { Ok::<_, anyhow::Error>(n * 2) })
        .unwrap();
    actions
}

fn pool(size: usize, config: PoolConfig, actions: Actions) -> Dispatcher {
    let actions = Arc::new(actions);
    let workers = (0..size).map(|_| spawn_worker(&actions).0);
    Dispatcher::new(config, workers)
}

/// Waits until the dispatcher reports `done`.
async fn wait_for(pool: &Dispatcher, done: impl Fn(&PoolStats) -> bool) -> PoolStats {
    loop {
        let stats = pool.snapshot().await.unwrap();
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Reads the handshake from a hand-driven worker and acknowledges it.
async fn ack_handshake(port: &mut WorkerPort) -> Request {
    let helo = Request::from_envelope(port.recv().await.unwrap()).unwrap();
    assert_eq!(helo.method, HELO);
    port.send(Response::finished(helo.id, Payload::new(HELO_ACK)).into_envelope())
        .await
        .unwrap();
    helo
}

#[tokio::test]
async fn echo_round_trip_moves_attachments() {
    let pool = pool(2, PoolConfig::default(), actions());
    let blob = Bytes::from(vec![7u8; 4096]);

    let reply = pool
        .submit(
            "echo",
            Payload::new(json!({ "name": "blob" })).with_transfer([blob.clone()]),
        )
        .await
        .unwrap();

    assert_eq!(reply.value, json!({ "name": "blob" }));
    assert_eq!(reply.transfer.len(), 1);
    assert_eq!(reply.transfer[0].as_ptr(), blob.as_ptr());

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn single_worker_runs_jobs_in_submission_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut actions = Actions::new();
    let log = Arc::clone(&seen);
    actions
        .register("record", move |payload: Payload| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(payload.value.as_u64().unwrap());
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>(payload)
            }
        })
        .unwrap();
    let pool = pool(1, PoolConfig::default(), actions);

    let handles: Vec<_> = (0..10u64).map(|i| pool.submit("record", json!(i))).collect();
    let results = join_all(handles).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().value, json!(i));
    }
    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<u64>>());

    let stats = pool.snapshot().await.unwrap();
    assert_eq!(stats.busy, stats.in_flight);
    assert_eq!(stats.pending, 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn jobs_spread_across_the_pool() {
    let pool = pool(4, PoolConfig::default(), actions());

    let results = join_all((0..64i64).map(|n| pool.call::<Double>(n))).await;
    for (n, result) in (0..64i64).zip(results) {
        assert_eq!(result.unwrap(), n * 2);
    }

    let stats = wait_for(&pool, |s| s.in_flight == 0).await;
    assert_eq!(stats.workers, 4);
    assert_eq!(stats.idle, 4);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn action_failures_reach_the_caller() {
    let pool = pool(1, PoolConfig::default(), actions());

    let err = pool.submit("fail", json!("disk")).await.unwrap_err();
    let action = err.as_action().unwrap();
    assert_eq!(action.message(), "boom: \"disk\"");

    // The worker that failed is free for the next job.
    let reply = pool.submit("echo", json!(1)).await.unwrap();
    assert_eq!(reply.value, json!(1));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_method_without_manifest_fails_on_the_worker() {
    let pool = pool(1, PoolConfig::default(), actions());

    let err = pool.submit("teleport", Value::Null).await.unwrap_err();
    let JobError::Action(action) = err else {
        panic!("expected an action error, got {err:?}");
    };
    assert!(action.message().contains("teleport"));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_method_with_manifest_is_rejected_at_submit() {
    let actions = actions();
    let config = PoolConfig::default().with_manifest(actions.manifest());
    let pool = pool(1, config, actions);

    let err = pool.submit("teleport", Value::Null).await.unwrap_err();
    assert_eq!(
        err,
        JobError::UnknownMethod {
            method: "teleport".into()
        }
    );
    assert_eq!(pool.call::<Double>(4).await.unwrap(), 8);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn typed_call_reports_decode_errors() {
    let mut actions = actions();
    actions
        .register("text", |_: Payload| async move {
            Ok::<_, anyhow::Error>(json!("not a number"))
        })
        .unwrap();
    let pool = pool(1, PoolConfig::default(), actions);

    struct Text;
    impl Method for Text {
        const NAME: &'static str = "text";
        type Params = ();
        type Output = i64;
    }

    let err = pool.call::<Text>(()).await.unwrap_err();
    assert!(matches!(err, JobError::Codec { .. }));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn handshake_carries_the_pool_log_level() {
    let actions = Arc::new(actions());
    let (worker, task) = spawn_worker(&actions);
    let pool = Dispatcher::new(
        PoolConfig::default().with_log_level(LogLevel::Debug),
        [worker],
    );

    assert_eq!(pool.call::<Double>(1).await.unwrap(), 2);
    pool.shutdown().await.unwrap();

    let endpoint = task.await.unwrap();
    assert_eq!(endpoint.log_level(), LogLevel::Debug);
}

#[tokio::test]
async fn handshake_method_cannot_be_submitted() {
    let actions = Arc::new(actions());
    let (worker, task) = spawn_worker(&actions);
    let pool = Dispatcher::new(
        PoolConfig::default()
            .with_log_level(LogLevel::Debug)
            .with_manifest(actions.manifest()),
        [worker],
    );

    let err = pool
        .submit(HELO, json!({ "logLevel": "error" }))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        JobError::ReservedMethod {
            method: HELO.into()
        }
    );

    // Without a manifest the handshake is still refused.
    let open = Dispatcher::new(PoolConfig::default(), []);
    assert!(matches!(
        open.submit(HELO, Value::Null).await,
        Err(JobError::ReservedMethod { .. })
    ));
    open.shutdown().await.unwrap();

    assert_eq!(pool.call::<Double>(3).await.unwrap(), 6);
    pool.shutdown().await.unwrap();

    let endpoint = task.await.unwrap();
    assert_eq!(endpoint.log_level(), LogLevel::Debug);
}

#[tokio::test]
async fn handshake_is_the_first_request_a_worker_sees() {
    let (handle, mut port) = link::channel();
    let pool = Dispatcher::new(PoolConfig::default(), [handle]);
    let job = pool.submit("echo", json!("first"));

    let helo = ack_handshake(&mut port).await;
    assert_eq!(helo.id, JobId(0));
    assert_eq!(helo.payload.value, json!({ "logLevel": "error" }));

    let request = Request::from_envelope(port.recv().await.unwrap()).unwrap();
    assert_eq!(request.method, "echo");
    port.send(Response::finished(request.id, request.payload).into_envelope())
        .await
        .unwrap();

    assert_eq!(job.await.unwrap().value, json!("first"));
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn protocol_faults_are_reported_without_disturbing_jobs() {
    let (handle, mut port) = link::channel();
    let pool = Dispatcher::new(PoolConfig::default(), [handle]);
    let mut faults = pool.faults();
    ack_handshake(&mut port).await;

    port.send(Response::finished(JobId(999), Payload::default()).into_envelope())
        .await
        .unwrap();
    assert_eq!(
        faults.recv().await.unwrap(),
        Error::StaleResponse {
            id: JobId(999),
            slot: SlotId(0),
        }
    );

    let job = pool.submit("echo", json!(5));
    let request = Request::from_envelope(port.recv().await.unwrap()).unwrap();

    port.send(Envelope::new(json!([request.id.0, "bogus", null])))
        .await
        .unwrap();
    assert_eq!(
        faults.recv().await.unwrap(),
        Error::UnknownResponseOutcome {
            id: request.id,
            outcome: "bogus".into(),
        }
    );

    port.send(Envelope::new(json!("garbage"))).await.unwrap();
    assert!(matches!(
        faults.recv().await.unwrap(),
        Error::Codec { .. }
    ));

    port.send(Response::finished(request.id, request.payload).into_envelope())
        .await
        .unwrap();
    assert_eq!(job.await.unwrap().value, json!(5));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn lost_worker_fails_its_job_and_then_the_queue() {
    let (handle, mut port) = link::channel();
    let pool = Dispatcher::new(PoolConfig::default(), [handle]);
    ack_handshake(&mut port).await;

    let job = pool.submit("echo", json!(1));
    let _request = port.recv().await.unwrap();
    drop(port);

    assert_eq!(
        job.await.unwrap_err(),
        JobError::WorkerLost { slot: SlotId(0) }
    );
    assert_eq!(
        pool.submit("echo", json!(2)).await.unwrap_err(),
        JobError::NoWorkers
    );

    let stats = pool.snapshot().await.unwrap();
    assert_eq!(stats.retired, 1);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_pool_holds_jobs_until_a_worker_registers() {
    let pool = Dispatcher::new(PoolConfig::default(), []);
    let job = pool.submit("echo", json!("late"));

    let stats = wait_for(&pool, |s| s.pending == 1).await;
    assert_eq!(stats.workers, 0);

    let actions = Arc::new(actions());
    pool.register_worker(spawn_worker(&actions).0).unwrap();
    assert_eq!(job.await.unwrap().value, json!("late"));

    pool.shutdown().await.unwrap();
}

fn gated_actions(gate: &Arc<Notify>) -> Actions {
    let mut actions = actions();
    let gate = Arc::clone(gate);
    actions
        .register("wait", move |payload: Payload| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<_, anyhow::Error>(payload)
            }
        })
        .unwrap();
    actions
}

#[tokio::test]
async fn shutdown_rejects_pending_and_lets_in_flight_finish() {
    let gate = Arc::new(Notify::new());
    let pool = pool(1, PoolConfig::default(), gated_actions(&gate));

    let running = pool.submit("wait", json!("running"));
    let queued = pool.submit("echo", json!("queued"));
    wait_for(&pool, |s| s.in_flight == 1 && s.pending == 1).await;

    let closer = pool.clone();
    let shutdown = tokio::spawn(async move { closer.shutdown().await });

    assert_eq!(queued.await.unwrap_err(), JobError::Shutdown);
    assert!(pool.is_shutdown());
    assert_eq!(
        pool.submit("echo", json!(0)).await.unwrap_err(),
        JobError::Shutdown
    );
    assert!(matches!(
        pool.register_worker(link::channel().0),
        Err(Error::ServiceShutdown)
    ));

    gate.notify_one();
    assert_eq!(running.await.unwrap().value, json!("running"));
    shutdown.await.unwrap().unwrap();

    // Shutting down again is harmless.
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_gives_up_on_stuck_jobs_after_the_timeout() {
    let gate = Arc::new(Notify::new());
    let config = PoolConfig::default().with_shutdown_timeout(Duration::from_millis(50));
    let pool = pool(1, config, gated_actions(&gate));

    let stuck = pool.submit("wait", Value::Null);
    wait_for(&pool, |s| s.in_flight == 1 && s.pending == 0).await;

    pool.shutdown().await.unwrap();
    assert_eq!(stuck.await.unwrap_err(), JobError::Shutdown);
    assert!(pool.snapshot().await.is_err());
}
