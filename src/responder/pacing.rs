//! Per-(record, interface) multicast pacing.
//!
//! RFC 6762 section 6.2: a given record must not be multicast on a
//! given interface more than once per second, except when defending a
//! name against a probe, where the floor drops to 250 ms.  The
//! check-and-update is a single operation under one lock, so two
//! concurrent senders cannot both pass for the same key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// the tokio clock, so tests driving virtual time pace correctly; on a
// running system it is the monotonic clock
use tokio::time::Instant;

use crate::protocol::wire_types::ResourceRecord;

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] pacing tracker mutex poisoned, cannot recover from this - aborting";

/// The ordinary per-record multicast floor.
pub(crate) const MULTICAST_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// The floor when defending a claimed name against a prober.
pub(crate) const PROBE_DEFENSE_MIN_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PacingKey {
    /// The record identity: lowercased name, type, masked class,
    /// canonical rdata.
    record: Vec<u8>,
    /// The interface the multicast goes out on.
    iface: String,
}

impl PacingKey {
    fn new(record: &ResourceRecord, iface: &str) -> Self {
        Self {
            record: record.key(),
            iface: iface.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PacingTracker {
    last_multicast: Mutex<HashMap<PacingKey, Instant>>,
}

impl PacingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Would a multicast of `record` on `iface` be allowed now?
    pub fn can_multicast(&self, record: &ResourceRecord, iface: &str, now: Instant) -> bool {
        self.check(record, iface, MULTICAST_MIN_INTERVAL, now)
    }

    /// Like `can_multicast` with the 250 ms conflict-defense floor.
    pub fn can_multicast_probe_defense(
        &self,
        record: &ResourceRecord,
        iface: &str,
        now: Instant,
    ) -> bool {
        self.check(record, iface, PROBE_DEFENSE_MIN_INTERVAL, now)
    }

    fn check(
        &self,
        record: &ResourceRecord,
        iface: &str,
        interval: Duration,
        now: Instant,
    ) -> bool {
        let last = self.last_multicast.lock().expect(LOCK_POISON_MESSAGE);
        match last.get(&PacingKey::new(record, iface)) {
            None => true,
            Some(at) => now.duration_since(*at) >= interval,
        }
    }

    /// Note that `record` was just multicast on `iface`.
    pub fn record_multicast(&self, record: &ResourceRecord, iface: &str, now: Instant) {
        self.last_multicast
            .lock()
            .expect(LOCK_POISON_MESSAGE)
            .insert(PacingKey::new(record, iface), now);
    }

    /// Check and, if allowed, claim the send in one step.  Returns
    /// whether the caller may multicast.
    pub fn try_claim(
        &self,
        record: &ResourceRecord,
        iface: &str,
        interval: Duration,
        now: Instant,
    ) -> bool {
        let mut last = self.last_multicast.lock().expect(LOCK_POISON_MESSAGE);
        let key = PacingKey::new(record, iface);
        let allowed = match last.get(&key) {
            None => true,
            Some(at) => now.duration_since(*at) >= interval,
        };
        if allowed {
            last.insert(key, now);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_types::test_util::*;
    use std::net::Ipv4Addr;

    fn record() -> ResourceRecord {
        a_record("printer.local.", Ipv4Addr::new(192, 168, 1, 50))
    }

    #[test]
    fn first_multicast_is_always_allowed() {
        let tracker = PacingTracker::new();
        assert!(tracker.can_multicast(&record(), "eth0", Instant::now()));
    }

    #[test]
    fn a_second_multicast_waits_a_full_second() {
        let tracker = PacingTracker::new();
        let start = Instant::now();

        tracker.record_multicast(&record(), "eth0", start);

        assert!(!tracker.can_multicast(&record(), "eth0", start + Duration::from_millis(500)));
        assert!(tracker.can_multicast(&record(), "eth0", start + Duration::from_secs(1)));
    }

    #[test]
    fn probe_defense_only_waits_250ms() {
        let tracker = PacingTracker::new();
        let start = Instant::now();

        tracker.record_multicast(&record(), "eth0", start);

        let at = start + Duration::from_millis(250);
        assert!(!tracker.can_multicast(&record(), "eth0", at));
        assert!(tracker.can_multicast_probe_defense(&record(), "eth0", at));
    }

    #[test]
    fn interfaces_are_paced_independently() {
        let tracker = PacingTracker::new();
        let start = Instant::now();

        tracker.record_multicast(&record(), "eth0", start);

        assert!(tracker.can_multicast(&record(), "eth1", start));
    }

    #[test]
    fn records_differing_only_in_case_share_a_key() {
        let tracker = PacingTracker::new();
        let start = Instant::now();

        tracker.record_multicast(&a_record("Printer.local.", Ipv4Addr::new(10, 0, 0, 1)), "eth0", start);

        assert!(!tracker.can_multicast(
            &a_record("printer.LOCAL.", Ipv4Addr::new(10, 0, 0, 1)),
            "eth0",
            start
        ));
    }

    #[test]
    fn try_claim_admits_exactly_one_of_two_racers() {
        let tracker = PacingTracker::new();
        let now = Instant::now();

        let first = tracker.try_claim(&record(), "eth0", MULTICAST_MIN_INTERVAL, now);
        let second = tracker.try_claim(&record(), "eth0", MULTICAST_MIN_INTERVAL, now);

        assert!(first);
        assert!(!second);
    }
}
