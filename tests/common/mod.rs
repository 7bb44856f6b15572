//! Shared fixtures for integration tests.
//!
//! Every test runs against the in-memory store with a fixed clock, wired through
//! the same bootstrap path the dispatch binary uses.

#![allow(dead_code)]

pub mod builders;
pub mod strategies;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cropcycle_core::config::CropCycleConfig;
use cropcycle_core::models::TaskName;
use cropcycle_core::services::{RecordingNotifier, RecordingSeedInventory};
use cropcycle_core::{CropCycleCore, FixedClock, InMemoryStore, ScheduledTask};
use std::sync::Arc;

/// Midnight UTC on a fixed planting day
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
}

pub fn days(n: f64) -> Duration {
    Duration::seconds((n * 86_400.0).round() as i64)
}

pub fn hours(n: f64) -> Duration {
    Duration::seconds((n * 3_600.0).round() as i64)
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: RecordingNotifier,
    pub inventory: RecordingSeedInventory,
    pub core: CropCycleCore<InMemoryStore>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, CropCycleConfig::default())
    }

    pub fn with_config(now: DateTime<Utc>, config: CropCycleConfig) -> Self {
        let store = Arc::new(InMemoryStore::with_default_stages());
        let clock = Arc::new(FixedClock::new(now));
        let notifier = RecordingNotifier::new();
        let inventory = RecordingSeedInventory::new();
        let core = CropCycleCore::from_parts(
            store.clone(),
            &config,
            clock.clone(),
            Arc::new(notifier.clone()),
            Arc::new(inventory.clone()),
        );
        Self {
            store,
            clock,
            notifier,
            inventory,
            core,
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    /// Active tasks of one kind, oldest first
    pub async fn active_tasks_named(&self, name: TaskName) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .store
            .active_tasks()
            .await
            .into_iter()
            .filter(|task| task.task_name == name)
            .collect();
        tasks.sort_by_key(|task| task.due_at);
        tasks
    }
}
