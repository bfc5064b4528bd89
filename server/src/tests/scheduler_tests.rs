//! Tests for the scheduler loop

use crate::preflight::Preflight;
use crate::scheduler::SchedulerLoop;
use chrono::{DateTime, TimeZone, Utc};
use shared::jobrun::JobRunStore;
use shared::kv::{Kv, MemoryKv};
use shared::locks::TaskLocks;
use shared::queue::DispatchQueue;
use shared::registry::{MetadataStore, ScheduleRegistry};
use shared::schedule::{MaintenanceWindow, ScheduleEntry, ScheduleMetadata};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct Harness {
    scheduler: SchedulerLoop,
    registry: ScheduleRegistry,
    metadata: MetadataStore,
    queue: DispatchQueue,
    locks: TaskLocks,
    jobruns: Arc<Mutex<JobRunStore>>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let registry = ScheduleRegistry::new(kv.clone());
    let metadata = MetadataStore::new(kv.clone());
    let queue = DispatchQueue::new(kv.clone());
    let locks = TaskLocks::new(kv.clone());
    let jobruns = Arc::new(Mutex::new(
        JobRunStore::open(dir.path().join("jobruns.db")).unwrap(),
    ));
    let scheduler = SchedulerLoop::new(
        registry.clone(),
        metadata.clone(),
        queue.clone(),
        locks.clone(),
        Preflight::new(kv, Arc::clone(&jobruns)),
        Arc::clone(&jobruns),
        Duration::from_secs(1),
    );
    Harness {
        scheduler,
        registry,
        metadata,
        queue,
        locks,
        jobruns,
        _dir: dir,
    }
}

fn hourly_entry(name: &str, task: &str) -> ScheduleEntry {
    ScheduleEntry {
        name: name.to_string(),
        task: task.to_string(),
        cron: "0 * * * *".to_string(),
        timezone: "UTC".to_string(),
        args: vec![],
        kwargs: BTreeMap::new(),
        enabled: true,
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap()
}

async fn drain(queue: &DispatchQueue, name: &str) -> usize {
    let mut count = 0;
    while queue
        .pop(&[name.to_string()], Duration::from_millis(10))
        .await
        .unwrap()
        .is_some()
    {
        count += 1;
    }
    count
}

#[tokio::test]
async fn first_sight_primes_without_dispatching() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "monitor.health")).await.unwrap();

    let dispatched = h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    assert!(dispatched.is_empty());
    assert_eq!(h.queue.depth("default").await.unwrap(), 0);
}

#[tokio::test]
async fn due_entry_dispatches_with_metadata_snapshot() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "monitor.health")).await.unwrap();
    let meta = ScheduleMetadata {
        queue: Some("critical".to_string()),
        priority: Some(2),
        ..ScheduleMetadata::default()
    };
    h.metadata.save("probe", Some(&meta)).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["probe"]);

    let message = h
        .queue
        .pop(&["critical".to_string()], Duration::from_millis(20))
        .await
        .unwrap()
        .expect("dispatch should land on the metadata queue");
    assert_eq!(message.task, "monitor.health");
    assert_eq!(message.options.priority, Some(2));
    let snapshot = message.options.headers.schedule_metadata.unwrap();
    assert_eq!(snapshot.queue.as_deref(), Some("critical"));

    // Fire advanced: an immediate re-tick dispatches nothing.
    let dispatched = h.scheduler.tick_once(at(11, 0, 1)).await.unwrap();
    assert!(dispatched.is_empty());
}

#[tokio::test]
async fn simultaneous_fires_dispatch_in_name_order() {
    let mut h = harness();
    for name in ["zebra", "alpha", "mango"] {
        h.registry
            .put(&hourly_entry(name, &format!("t.{name}")))
            .await
            .unwrap();
    }

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["alpha", "mango", "zebra"]);
}

#[tokio::test]
async fn maintenance_window_suppresses_and_advances_past_it() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "monitor.health")).await.unwrap();
    let meta = ScheduleMetadata {
        maintenance_windows: vec![MaintenanceWindow {
            start: "2025-06-01T10:45:00+00:00".to_string(),
            end: "2025-06-01T11:30:00+00:00".to_string(),
            timezone: "UTC".to_string(),
        }],
        ..ScheduleMetadata::default()
    };
    h.metadata.save("probe", Some(&meta)).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();

    // 11:00 falls inside the window: suppressed, not deferred.
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert!(dispatched.is_empty());
    assert_eq!(h.queue.depth("default").await.unwrap(), 0);

    // Still nothing right after the window; the fire moved to 12:00.
    let dispatched = h.scheduler.tick_once(at(11, 31, 0)).await.unwrap();
    assert!(dispatched.is_empty());

    let dispatched = h.scheduler.tick_once(at(12, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["probe"]);
}

#[tokio::test]
async fn preflight_failure_defers_to_the_next_tick() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "monitor.health")).await.unwrap();
    let meta = ScheduleMetadata {
        preflight_checks: vec!["warehouse".to_string()],
        ..ScheduleMetadata::default()
    };
    h.metadata.save("probe", Some(&meta)).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert!(dispatched.is_empty());

    // Deferred, not advanced: once the check passes the fire happens
    // immediately, not at the next cron boundary.
    let healthy = ScheduleMetadata {
        preflight_checks: vec!["redis".to_string(), "database".to_string()],
        ..ScheduleMetadata::default()
    };
    h.metadata.save("probe", Some(&healthy)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 5)).await.unwrap();
    assert_eq!(dispatched, vec!["probe"]);
}

#[tokio::test]
async fn singleflight_skips_while_lock_is_held() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "t.sync_accounts")).await.unwrap();

    let held = h
        .locks
        .acquire("sync_accounts", "all", 60)
        .await
        .unwrap()
        .unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert!(dispatched.is_empty());
    assert_eq!(drain(&h.queue, "default").await, 0);

    // Skipped and advanced normally: the next boundary fires once the
    // lock is gone.
    held.release().await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 30, 0)).await.unwrap();
    assert!(dispatched.is_empty());
    let dispatched = h.scheduler.tick_once(at(12, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["probe"]);
}

#[tokio::test]
async fn stale_dependency_skips_the_fire_without_deferring() {
    let mut h = harness();
    h.registry.put(&hourly_entry("child", "t.child_task")).await.unwrap();
    h.registry
        .put(&hourly_entry("parent-sched", "t.parent_task"))
        .await
        .unwrap();
    let meta = ScheduleMetadata {
        dependencies: vec!["parent-sched".to_string()],
        ..ScheduleMetadata::default()
    };
    h.metadata.save("child", Some(&meta)).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    // Parent has never succeeded: child is skipped (parent itself fires).
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["parent-sched"]);

    // Record a fresh parent success; the child's next boundary fires.
    {
        let store = h.jobruns.lock().await;
        let id = store
            .insert_running("parent_task", &BTreeMap::new(), at(11, 50, 0))
            .unwrap();
        store.finish_ok(id, None, at(11, 55, 0)).unwrap();
    }
    let dispatched = h.scheduler.tick_once(at(12, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["child", "parent-sched"]);
}

#[tokio::test]
async fn dependency_outside_recency_window_is_stale() {
    let mut h = harness();
    h.registry.put(&hourly_entry("child", "t.child_task")).await.unwrap();
    let meta = ScheduleMetadata {
        dependencies: vec!["parent-sched".to_string()],
        ..ScheduleMetadata::default()
    };
    h.metadata.save("child", Some(&meta)).await.unwrap();

    // Parent succeeded three hours ago; the child's hourly period makes
    // that stale. The dependency schedule itself no longer exists, so
    // its name doubles as the task name.
    {
        let store = h.jobruns.lock().await;
        let id = store
            .insert_running("parent-sched", &BTreeMap::new(), at(8, 0, 0))
            .unwrap();
        store.finish_ok(id, None, at(8, 0, 30)).unwrap();
    }

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert!(dispatched.is_empty());
}

#[tokio::test]
async fn unplannable_entries_are_skipped_not_fatal() {
    let mut h = harness();
    let mut broken = hourly_entry("broken", "t.broken");
    broken.cron = "not a cron".to_string();
    h.registry.put(&broken).await.unwrap();
    h.registry.put(&hourly_entry("good", "t.good")).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    let dispatched = h.scheduler.tick_once(at(11, 0, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["good"]);
}

#[tokio::test]
async fn missed_fires_are_not_replayed() {
    let mut h = harness();
    h.registry.put(&hourly_entry("probe", "monitor.health")).await.unwrap();

    h.scheduler.tick_once(at(10, 30, 0)).await.unwrap();
    // The loop was down across 11:00, 12:00, and 13:00; on resume only
    // one dispatch happens and the next fire is the next boundary.
    let dispatched = h.scheduler.tick_once(at(13, 30, 0)).await.unwrap();
    assert_eq!(dispatched, vec!["probe"]);
    assert_eq!(drain(&h.queue, "default").await, 1);

    let dispatched = h.scheduler.tick_once(at(13, 45, 0)).await.unwrap();
    assert!(dispatched.is_empty());
}
