//! Scheduler thread for periodic resynchronization of the mirror.
//!
//! The loop sleeps for one interval, refreshes, collects garbage and repeats.
//! A failed refresh waits the same interval before the next attempt.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::daemon::shutdown::Shutdown;
use crate::mirror::{MirrorStore, RefreshOutcome};

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick after a successful refresh.
    Idle,
    Refreshing,
    /// Waiting for the next tick after a failed refresh.
    Backoff,
}

/// Background scheduler that keeps the mirror up to date.
pub struct Scheduler {
    store: Arc<MirrorStore>,
    interval: Duration,
    shutdown: Shutdown,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(store: Arc<MirrorStore>, interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            store,
            interval,
            shutdown,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the scheduler loop until shutdown.
    pub fn run(mut self) {
        log::info!(
            "Scheduler thread started (interval {})",
            humantime::format_duration(self.interval)
        );

        // A tick already in progress runs to completion; the wait below
        // returns immediately once shutdown has been requested.
        while !self.shutdown.wait_timeout(self.interval) {
            self.tick();
        }

        log::info!("Scheduler shutting down");
    }

    /// One refresh followed by garbage collection.
    pub fn tick(&mut self) -> SchedulerState {
        self.state = SchedulerState::Refreshing;
        log::debug!("Resynchronizing mirror");

        self.state = match self.store.resynchronize() {
            RefreshOutcome::Updated(snapshot) => {
                log::info!(
                    "Mirror updated to {} (generation {})",
                    snapshot.revision(),
                    snapshot.generation()
                );
                SchedulerState::Idle
            }
            RefreshOutcome::NoChange => {
                log::debug!("Mirror already at {}", self.store.current_revision());
                SchedulerState::Idle
            }
            RefreshOutcome::Failed(e) => {
                log::warn!(
                    "Refresh failed ({}), still serving {}; retrying in {}: {}",
                    e.kind,
                    self.store.current_revision(),
                    humantime::format_duration(self.interval),
                    e.message
                );
                SchedulerState::Backoff
            }
        };

        self.store.collect_garbage();
        self.state
    }
}

/// Handle for managing the scheduler thread.
pub struct SchedulerHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Shutdown,
}

impl SchedulerHandle {
    /// Spawn the scheduler thread.
    pub fn spawn(
        store: Arc<MirrorStore>,
        interval: Duration,
        shutdown: Shutdown,
    ) -> io::Result<Self> {
        let scheduler = Scheduler::new(store, interval, shutdown.clone());

        let thread = thread::Builder::new()
            .name("gitserve-scheduler".to_string())
            .spawn(move || scheduler.run())?;

        Ok(Self {
            thread: Some(thread),
            shutdown,
        })
    }

    /// Signal shutdown and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
