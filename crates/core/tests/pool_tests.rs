//! Integration tests for the bounded task pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buildlog_core::{PoolError, TaskPool};
use tokio::sync::Notify;
use tokio::time::sleep;

#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl Probe {
    async fn work(&self, millis: u64) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(millis)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn explode() -> anyhow::Result<()> {
    panic!("boom")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_capacity() {
    let pool = TaskPool::new(8).unwrap();
    let probe = Arc::new(Probe::default());

    for i in 0..50usize {
        let probe = Arc::clone(&probe);
        pool.add_task(async move {
            probe.work(5 + (i % 3) as u64).await;
            Ok(i)
        });
    }
    assert_eq!(pool.pending(), 50);

    let mut outputs = pool.run_all().await.unwrap();
    outputs.sort_unstable();

    assert_eq!(outputs, (0..50).collect::<Vec<_>>());
    assert_eq!(probe.finished.load(Ordering::SeqCst), 50);
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak <= 8, "peak concurrency {peak} exceeded capacity");
    assert!(peak > 1, "tasks never overlapped");
    assert_eq!(pool.pending(), 0);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn test_capacity_one_starts_tasks_in_fifo_order() {
    let pool = TaskPool::new(1).unwrap();
    let started = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10usize {
        let started = Arc::clone(&started);
        pool.add_task(async move {
            started.lock().unwrap().push(i);
            sleep(Duration::from_millis(1)).await;
            Ok(())
        });
    }
    pool.run_all().await.unwrap();

    assert_eq!(*started.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_run_all_waits_for_tasks_added_mid_run() {
    let pool: TaskPool<&'static str> = TaskPool::new(2).unwrap();
    let probe = Arc::new(Probe::default());

    let handle = pool.clone();
    let seed_probe = Arc::clone(&probe);
    pool.add_task(async move {
        for _ in 0..5 {
            let probe = Arc::clone(&seed_probe);
            handle.add_task(async move {
                probe.work(10).await;
                Ok("follow-up")
            });
        }
        Ok("seed")
    });

    let outputs = pool.run_all().await.unwrap();

    assert_eq!(outputs.len(), 6);
    assert_eq!(outputs.iter().filter(|o| **o == "follow-up").count(), 5);
    assert_eq!(probe.finished.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_task_errors_are_isolated() {
    let pool = TaskPool::new(3).unwrap();
    for i in 0..10u32 {
        pool.add_task(async move {
            if i % 4 == 1 {
                anyhow::bail!("task {i} failed");
            }
            Ok(i)
        });
    }

    let mut outputs = pool.run_all().await.unwrap();
    outputs.sort_unstable();

    assert_eq!(outputs, vec![0, 2, 3, 4, 6, 7, 8]);
}

#[tokio::test]
async fn test_panicking_task_is_reported_after_siblings_finish() {
    let pool = TaskPool::new(2).unwrap();
    let probe = Arc::new(Probe::default());

    pool.add_task(async { explode() });
    for _ in 0..4 {
        let probe = Arc::clone(&probe);
        pool.add_task(async move {
            probe.work(2).await;
            Ok(())
        });
    }

    let err = pool.run_all().await.unwrap_err();

    assert_eq!(err, PoolError::TaskPanicked { count: 1 });
    assert_eq!(probe.finished.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_second_concurrent_run_is_rejected() {
    let pool = TaskPool::new(1).unwrap();
    let gate = Arc::new(Notify::new());

    let wait = Arc::clone(&gate);
    pool.add_task(async move {
        wait.notified().await;
        Ok(())
    });

    let runner = pool.clone();
    let first = tokio::spawn(async move { runner.run_all().await });
    while pool.in_flight() == 0 {
        sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(pool.run_all().await, Err(PoolError::AlreadyRunning));

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap().len(), 1);

    // The flag is released once the first run returns.
    assert!(pool.run_all().await.unwrap().is_empty());
}
