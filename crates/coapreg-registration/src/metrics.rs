//! Registration counters.
//!
//! Every event is recorded twice: in local atomics, for `stats()`
//! snapshots and tests, and through the `metrics` facade for whichever
//! recorder the process installs.

use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::TaskOutcome;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationStats {
    pub announcements: u64,
    pub scheduled: u64,
    pub rejected: u64,
    pub no_backend: u64,
    pub already_registered: u64,
    pub forwarded: u64,
    pub failed: u64,
}

impl RegistrationStats {
    /// Tasks that reached a terminal state.
    pub fn completed(&self) -> u64 {
        self.no_backend + self.already_registered + self.forwarded + self.failed
    }
}

#[derive(Debug)]
pub struct RegistrationMetrics {
    announcements: AtomicU64,
    scheduled: AtomicU64,
    rejected: AtomicU64,
    no_backend: AtomicU64,
    already_registered: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

impl RegistrationMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "registration_announcements_total",
            "Valid announcements received"
        );
        describe_counter!(
            "registration_queue_rejected_total",
            "Announcements dropped because the work queue was full or closed"
        );
        describe_counter!(
            "registration_outcomes_total",
            "Registration tasks by terminal state"
        );

        Self {
            announcements: AtomicU64::new(0),
            scheduled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            no_backend: AtomicU64::new(0),
            already_registered: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn record_announcement(&self) {
        self.announcements.fetch_add(1, Ordering::Relaxed);
        counter!("registration_announcements_total").increment(1);
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("registration_queue_rejected_total").increment(1);
    }

    pub fn record_outcome(&self, outcome: &TaskOutcome) {
        let slot = match outcome {
            TaskOutcome::NoBackend => &self.no_backend,
            TaskOutcome::AlreadyRegistered => &self.already_registered,
            TaskOutcome::Forwarded => &self.forwarded,
            TaskOutcome::Failed(_) => &self.failed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!("registration_outcomes_total", "outcome" => outcome.label()).increment(1);
    }

    pub fn snapshot(&self) -> RegistrationStats {
        RegistrationStats {
            announcements: self.announcements.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            no_backend: self.no_backend.load(Ordering::Relaxed),
            already_registered: self.already_registered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RegistrationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
