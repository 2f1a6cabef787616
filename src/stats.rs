use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tracker::CycleReport;

/// Process-wide counters, shared by the fetcher, the tracker and `/stats`.
#[derive(Debug, Default)]
pub struct Stats {
    site_requests: AtomicU64,
    transport_errors: AtomicU64,
    rate_limited: AtomicU64,
    notifications_sent: AtomicU64,
    cycles_run: AtomicU64,
    cycles_failed: AtomicU64,
    last_cycle: Mutex<Option<CycleReport>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub site_requests: u64,
    pub transport_errors: u64,
    pub rate_limited: u64,
    pub notifications_sent: u64,
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub last_cycle: Option<CycleReport>,
}

impl Stats {
    pub fn record_request(&self) {
        self.site_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
    }

    pub fn record_cycle_failure(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            site_requests: self.site_requests.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            last_cycle: self
                .last_cycle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}
