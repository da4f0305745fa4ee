//! Integration tests for worker exit reconciliation
//!
//! These tests drive a supervisor through in-memory workers and check the
//! three exit scenarios: killed by a signal, clean exit and crash.

use switchboard_protocol::WorkerMessage;
use switchboard_supervisor::{
    ControllerEvent, ListenOptions, MemoryLauncher, MemoryWorker, NetworkSettings, Supervisor,
    WorkerExit,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

struct Pool {
    supervisor: Arc<Supervisor>,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    launched: mpsc::UnboundedReceiver<MemoryWorker>,
}

/// Helper to start a pool of `size` in-memory workers
async fn start_pool(size: usize) -> (Pool, Vec<MemoryWorker>) {
    let (launcher, launched) = MemoryLauncher::new();
    let (supervisor, events) = Supervisor::new(launcher, NetworkSettings::default(), None);
    supervisor
        .listen_with_env(
            ListenOptions {
                workers: Some(size),
                ..Default::default()
            },
            |_| None,
        )
        .expect("pool should start");

    let mut pool = Pool {
        supervisor,
        events,
        launched,
    };
    let mut workers = Vec::new();
    for _ in 0..size {
        workers.push(next_worker(&mut pool).await);
    }
    (pool, workers)
}

async fn next_worker(pool: &mut Pool) -> MemoryWorker {
    timeout(Duration::from_secs(2), pool.launched.recv())
        .await
        .expect("a worker should be launched")
        .expect("launcher is alive")
}

async fn next_event(pool: &mut Pool) -> ControllerEvent {
    timeout(Duration::from_secs(2), pool.events.recv())
        .await
        .expect("an event should arrive")
        .expect("supervisor is alive")
}

fn connect(worker: &MemoryWorker, socket_id: &str) {
    worker.send(WorkerMessage::Connect {
        socket_id: socket_id.to_string(),
        remote_ip: "203.0.113.7".to_string(),
        protocol: "websocket".to_string(),
    });
}

#[tokio::test]
async fn test_killed_worker_is_removed_and_replaced() {
    let (mut pool, mut workers) = start_pool(2).await;
    let mut victim = workers.remove(0);
    connect(&victim, "1");
    assert!(matches!(next_event(&mut pool).await, ControllerEvent::Connect { .. }));

    victim.exit(WorkerExit::with_signal(libc::SIGTERM));

    assert_eq!(
        next_event(&mut pool).await,
        ControllerEvent::Disconnect {
            worker_id: victim.id(),
            socket_id: "1".to_string()
        }
    );
    let replacement = next_worker(&mut pool).await;
    assert_eq!(replacement.id(), 3);

    assert_eq!(pool.supervisor.worker_ids(), vec![2, 3]);
    assert_eq!(pool.supervisor.live_workers(), 2);
    assert!(pool.supervisor.crash_reports().is_empty());
}

#[tokio::test]
async fn test_clean_exit_is_removed_and_replaced() {
    let (mut pool, mut workers) = start_pool(1).await;
    workers[0].exit(WorkerExit::with_code(0));

    let replacement = next_worker(&mut pool).await;
    assert_eq!(replacement.id(), 2);
    assert_eq!(pool.supervisor.worker_ids(), vec![2]);
    assert_eq!(pool.supervisor.live_workers(), 1);
    assert!(pool.supervisor.crash_reports().is_empty());
}

#[tokio::test]
async fn test_crashed_worker_is_retained_and_replaced() {
    let (mut pool, mut workers) = start_pool(1).await;
    let mut crashed = workers.remove(0);
    connect(&crashed, "1");
    connect(&crashed, "2");
    next_event(&mut pool).await;
    next_event(&mut pool).await;

    crashed.exit(WorkerExit::with_code(1));

    let mut lost = vec![next_event(&mut pool).await, next_event(&mut pool).await];
    lost.sort_by_key(|event| format!("{:?}", event));
    assert_eq!(
        lost,
        vec![
            ControllerEvent::Disconnect {
                worker_id: 1,
                socket_id: "1".to_string()
            },
            ControllerEvent::Disconnect {
                worker_id: 1,
                socket_id: "2".to_string()
            },
        ]
    );
    let mut replacement = next_worker(&mut pool).await;

    // Kept for inspection, but out of the routing.
    assert_eq!(pool.supervisor.worker_ids(), vec![1, 2]);
    assert_eq!(pool.supervisor.live_workers(), 1);
    let handle = pool.supervisor.worker(1).expect("crashed worker is retained");
    assert!(handle.has_exited());
    assert!(!handle.is_connected());

    let reports = pool.supervisor.crash_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].worker_id, 1);
    assert_eq!(reports[0].exit, WorkerExit::with_code(1));
    assert_eq!(reports[0].lost_connections, 2);

    // Broadcasts still reach the live replacement and skip the dead entry.
    pool.supervisor.channel_broadcast("lobby", "|after crash");
    assert_eq!(replacement.recv().await.as_deref(), Some("#lobby\n|after crash"));
    assert!(crashed.try_recv().is_none());
}

#[tokio::test]
async fn test_messages_sent_before_exit_are_delivered_first() {
    let (mut pool, mut workers) = start_pool(1).await;
    let mut worker = workers.remove(0);
    connect(&worker, "1");
    worker.send(WorkerMessage::Receive {
        socket_id: "1".to_string(),
        message: "|last words".to_string(),
    });
    worker.exit(WorkerExit::with_code(0));

    assert!(matches!(next_event(&mut pool).await, ControllerEvent::Connect { .. }));
    assert!(matches!(next_event(&mut pool).await, ControllerEvent::Receive { .. }));
    assert!(matches!(next_event(&mut pool).await, ControllerEvent::Disconnect { .. }));
    next_worker(&mut pool).await;
}

#[tokio::test]
async fn test_pool_size_survives_repeated_crashes() {
    let (mut pool, mut workers) = start_pool(3).await;
    for round in 0..5 {
        let mut worker = workers.remove(0);
        worker.exit(WorkerExit::with_code(round + 1));
        workers.push(next_worker(&mut pool).await);
        assert_eq!(pool.supervisor.live_workers(), 3);
    }
    assert_eq!(pool.supervisor.crash_reports().len(), 5);
}
