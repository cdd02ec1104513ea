//! Counters surfaced over `/api/v3/metrics` and emitted as telemetry
//! events on an interval (spec §6 "Writable/Telemetry/..."). Every
//! field here is one `Writable/Telemetry/Metrics/<name>` the
//! configuration tree can individually enable or disable; this crate
//! always tracks them and lets the publication layer decide what to
//! send.

use serde_derive::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub events_sent: AtomicU64,
    pub readings_sent: AtomicU64,
    pub command_failures: AtomicU64,
    pub devices_down: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_sent: u64,
    pub readings_sent: u64,
    pub command_failures: u64,
    pub devices_down: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            readings_sent: self.readings_sent.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            devices_down: self.devices_down.load(Ordering::Relaxed),
        }
    }
}
