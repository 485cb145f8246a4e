use chrono::{DateTime, Utc};
use clokwerk::{Scheduler, TimeUnits};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::catalog::Catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { added: usize, described: usize },
    /// Another cycle was already running.
    Skipped,
    /// The cycle panicked. It still counts as finished.
    Aborted,
}

/// Runs ingest-then-describe cycles at a fixed interval, never two at once.
#[derive(Clone)]
pub struct PhotoScheduler {
    catalog: Catalog,
    interval: Duration,
    cycle_lock: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    last_completed: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl PhotoScheduler {
    pub fn new(catalog: Catalog, interval: Duration) -> Self {
        Self {
            catalog,
            interval,
            cycle_lock: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            last_completed: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub fn status(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.last_completed.lock().ok().and_then(|t| *t)
    }

    /// Starts the timer thread. Cycles run on the given runtime.
    pub fn start(&self, runtime: Handle) -> JoinHandle<()> {
        let mut scheduler = Scheduler::new();
        let interval_secs = self.interval.as_secs().clamp(1, u32::MAX as u64) as u32;

        let this = self.clone();
        scheduler.every(interval_secs.seconds()).run(move || {
            runtime.block_on(async {
                this.run_cycle().await;
            });
        });

        let handle = thread::spawn(move || loop {
            scheduler.run_pending();
            thread::sleep(Duration::from_secs(1));
        });

        info!("Photo scheduler started - cycle every {}s", interval_secs);
        handle
    }

    /// Runs one cycle now unless one is already in progress.
    pub async fn run_cycle(&self) -> CycleOutcome {
        // Try to acquire lock - if another cycle is running, skip this one
        let _lock = match self.cycle_lock.try_lock() {
            Ok(lock) => lock,
            Err(_) => {
                warn!("Skipping cycle - another cycle is already in progress");
                return CycleOutcome::Skipped;
            }
        };

        self.running.store(true, Ordering::SeqCst);
        info!("Starting ingest and description cycle");

        // Run in its own task so a panic ends the cycle instead of the scheduler
        let catalog = self.catalog.clone();
        let result = tokio::spawn(async move { Self::cycle(&catalog).await }).await;

        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last_completed.lock() {
            *last = Some(Utc::now());
        }

        match result {
            Ok((added, described)) => {
                info!(
                    "Cycle completed: {} entries added, {} described",
                    added, described
                );
                CycleOutcome::Completed { added, described }
            }
            Err(e) => {
                error!("Cycle aborted: {}", e);
                CycleOutcome::Aborted
            }
        }
    }

    async fn cycle(catalog: &Catalog) -> (usize, usize) {
        let mut added = 0;

        match catalog.list_locations().await {
            Ok(locations) => {
                for location in &locations {
                    match catalog.ingest(location).await {
                        Ok(count) => added += count,
                        Err(e) => error!("Ingest of {} failed: {}", location.directory, e),
                    }
                }
            }
            Err(e) => error!("Failed to list locations: {}", e),
        }

        let described = match catalog.describe_pending().await {
            Ok(count) => count,
            Err(e) => {
                error!("Description pass failed: {}", e);
                0
            }
        };

        (added, described)
    }
}
