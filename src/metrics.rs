//! Process-wide counters for serial traffic and the monitor loop.
//! Counters only ever increase; `snapshot()` gives a consistent-enough view for
//! status output.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static AT_EXCHANGES: AtomicU64 = AtomicU64::new(0);
static AT_FAILURES: AtomicU64 = AtomicU64::new(0);
static PORT_PROBES: AtomicU64 = AtomicU64::new(0);
static PORT_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static POLL_CYCLES: AtomicU64 = AtomicU64::new(0);
static POLL_FAILURES: AtomicU64 = AtomicU64::new(0);
static HISTORY_DROPS: AtomicU64 = AtomicU64::new(0);

pub fn inc_at_exchanges() {
    AT_EXCHANGES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_at_failures() {
    AT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_port_probes() {
    PORT_PROBES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_port_cache_hits() {
    PORT_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_poll_cycles() {
    POLL_CYCLES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_poll_failures() {
    POLL_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_history_drops() {
    HISTORY_DROPS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub at_exchanges: u64,
    pub at_failures: u64,
    pub port_probes: u64,
    pub port_cache_hits: u64,
    pub poll_cycles: u64,
    pub poll_failures: u64,
    pub history_drops: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        at_exchanges: AT_EXCHANGES.load(Ordering::Relaxed),
        at_failures: AT_FAILURES.load(Ordering::Relaxed),
        port_probes: PORT_PROBES.load(Ordering::Relaxed),
        port_cache_hits: PORT_CACHE_HITS.load(Ordering::Relaxed),
        poll_cycles: POLL_CYCLES.load(Ordering::Relaxed),
        poll_failures: POLL_FAILURES.load(Ordering::Relaxed),
        history_drops: HISTORY_DROPS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Other tests bump the same statics concurrently, so only lower bounds hold.
    #[test]
    fn counters_are_monotonic() {
        let before = snapshot();
        inc_at_exchanges();
        inc_at_failures();
        inc_port_probes();
        inc_port_cache_hits();
        inc_poll_cycles();
        inc_poll_failures();
        inc_history_drops();
        let after = snapshot();
        assert!(after.at_exchanges > before.at_exchanges);
        assert!(after.at_failures > before.at_failures);
        assert!(after.port_probes > before.port_probes);
        assert!(after.port_cache_hits > before.port_cache_hits);
        assert!(after.poll_cycles > before.poll_cycles);
        assert!(after.poll_failures > before.poll_failures);
        assert!(after.history_drops > before.history_drops);
    }
}
