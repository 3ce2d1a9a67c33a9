//! Process-wide ledger counters.
//! Cheap atomics so transaction and trigger paths can record activity without locking.
use std::sync::atomic::{AtomicU64, Ordering};

static TX_COMMITTED: AtomicU64 = AtomicU64::new(0);
static TX_CONFLICT_RETRIES: AtomicU64 = AtomicU64::new(0);
static TX_CONFLICTS_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static BATCHES_APPLIED: AtomicU64 = AtomicU64::new(0);
static EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);
static TRIGGERS_FAILED: AtomicU64 = AtomicU64::new(0);

pub fn inc_tx_committed() {
    TX_COMMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_conflict_retries() {
    TX_CONFLICT_RETRIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_conflicts_exhausted() {
    TX_CONFLICTS_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_batches_applied() {
    BATCHES_APPLIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_emitted() {
    EVENTS_EMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_triggers_failed() {
    TRIGGERS_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub tx_committed: u64,
    pub tx_conflict_retries: u64,
    pub tx_conflicts_exhausted: u64,
    pub batches_applied: u64,
    pub events_emitted: u64,
    pub triggers_failed: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        tx_committed: TX_COMMITTED.load(Ordering::Relaxed),
        tx_conflict_retries: TX_CONFLICT_RETRIES.load(Ordering::Relaxed),
        tx_conflicts_exhausted: TX_CONFLICTS_EXHAUSTED.load(Ordering::Relaxed),
        batches_applied: BATCHES_APPLIED.load(Ordering::Relaxed),
        events_emitted: EVENTS_EMITTED.load(Ordering::Relaxed),
        triggers_failed: TRIGGERS_FAILED.load(Ordering::Relaxed),
    }
}
