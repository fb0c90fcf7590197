use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Things the relay counts so operators can watch drop rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    Authenticated,
    Rejected,
    Persisted,
    PersistFailed,
    InvalidPayload,
    UnauthenticatedSend,
    Pushed,
    Offline,
    DroppedFull,
    DroppedClosed,
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    authenticated: AtomicU64,
    rejected: AtomicU64,
    persisted: AtomicU64,
    persist_failed: AtomicU64,
    invalid_payloads: AtomicU64,
    unauthenticated_sends: AtomicU64,
    pushed: AtomicU64,
    offline: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub authenticated: u64,
    pub rejected: u64,
    pub persisted: u64,
    pub persist_failed: u64,
    pub invalid_payloads: u64,
    pub unauthenticated_sends: u64,
    pub pushed: u64,
    pub offline: u64,
    pub dropped_full: u64,
    pub dropped_closed: u64,
}

impl RelayMetrics {
    pub fn record(&self, event: RelayEvent) {
        let counter = match event {
            RelayEvent::Authenticated => &self.authenticated,
            RelayEvent::Rejected => &self.rejected,
            RelayEvent::Persisted => &self.persisted,
            RelayEvent::PersistFailed => &self.persist_failed,
            RelayEvent::InvalidPayload => &self.invalid_payloads,
            RelayEvent::UnauthenticatedSend => &self.unauthenticated_sends,
            RelayEvent::Pushed => &self.pushed,
            RelayEvent::Offline => &self.offline,
            RelayEvent::DroppedFull => &self.dropped_full,
            RelayEvent::DroppedClosed => &self.dropped_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            authenticated: read(&self.authenticated),
            rejected: read(&self.rejected),
            persisted: read(&self.persisted),
            persist_failed: read(&self.persist_failed),
            invalid_payloads: read(&self.invalid_payloads),
            unauthenticated_sends: read(&self.unauthenticated_sends),
            pushed: read(&self.pushed),
            offline: read(&self.offline),
            dropped_full: read(&self.dropped_full),
            dropped_closed: read(&self.dropped_closed),
        }
    }
}
