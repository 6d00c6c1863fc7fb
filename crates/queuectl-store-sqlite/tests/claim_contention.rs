//! Claim correctness under contention: many concurrent claimers, several
//! independent store handles on one database file, zero double-claims and
//! zero lost transitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tempfile::TempDir;
use tokio::task::JoinSet;

use queuectl_core::{EnqueueSpec, JobStore, QueueConfig, QueueError};
use queuectl_store_sqlite::SqliteJobStore;

const JOBS: usize = 100;
const STORES: usize = 3;
const WORKERS_PER_STORE: usize = 3;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_are_disjoint() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let defaults = QueueConfig::default();

    // Seed a backlog of pending jobs with mixed priorities.
    let seeder = SqliteJobStore::open(&db_path).await.unwrap();
    let now = Utc::now();
    for i in 0..JOBS {
        let spec = EnqueueSpec {
            id: format!("job-{i:03}"),
            command: "true".into(),
            priority: Some((i % 5) as i64 - 2),
            ..EnqueueSpec::default()
        };
        seeder.enqueue(&spec, &defaults, now).await.unwrap();
    }

    let claimed = Arc::new(DashSet::<String>::new());
    let mut workers = JoinSet::new();

    // Separate SqliteJobStore instances mean separate connection pools,
    // approximating independent worker processes on one database file.
    for s in 0..STORES {
        let store = Arc::new(SqliteJobStore::open(&db_path).await.unwrap());
        for w in 0..WORKERS_PER_STORE {
            let store = store.clone();
            let claimed = claimed.clone();
            let worker_id = format!("w-{s}-{w}");
            workers.spawn(async move {
                loop {
                    match store.claim_one(&worker_id, Utc::now()).await {
                        Ok(Some(job)) => {
                            assert!(
                                claimed.insert(job.id.clone()),
                                "job {} was claimed twice",
                                job.id
                            );
                            // Widen the interleaving window a little.
                            if fastrand::u8(..) % 3 == 0 {
                                tokio::task::yield_now().await;
                            } else {
                                tokio::time::sleep(Duration::from_millis(fastrand::u64(0..3)))
                                    .await;
                            }
                            complete_with_retry(&store, &job.id).await;
                        }
                        Ok(None) => {
                            if store.status_summary().await.unwrap().pending == 0 {
                                break;
                            }
                            tokio::task::yield_now().await;
                        }
                        Err(QueueError::Busy) => tokio::task::yield_now().await,
                        Err(e) => panic!("claim failed: {e}"),
                    }
                }
            });
        }
    }

    let drained = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(res) = workers.join_next().await {
            res.unwrap();
        }
    })
    .await;
    assert!(drained.is_ok(), "workers timed out (possible deadlock)");

    assert_eq!(claimed.len(), JOBS, "not all jobs were claimed");

    let summary = seeder.status_summary().await.unwrap();
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.processing, 0);
    assert_eq!(summary.completed, JOBS as i64);

    // Every completed job kept both of its lifecycle timestamps.
    for job in seeder.list(None).await.unwrap() {
        assert!(job.started_at.is_some(), "{} lost started_at", job.id);
        assert!(job.finished_at.is_some(), "{} lost finished_at", job.id);
    }
}

async fn complete_with_retry(store: &SqliteJobStore, id: &str) {
    for attempt in 0..50u32 {
        match store.complete(id, Utc::now()).await {
            Ok(()) => return,
            Err(QueueError::Busy) => {
                tokio::time::sleep(Duration::from_millis(u64::from(attempt).min(10))).await;
            }
            Err(e) => panic!("completion transition for {id} was lost: {e}"),
        }
    }
    panic!("completion for {id} stayed busy");
}
