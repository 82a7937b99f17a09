//! The ingress guard: every received datagram passes through here
//! before any parsing happens.
//!
//! Checks run in a fixed order: size cap, source-scope check (the
//! packet must come from the local link), then the per-source rate
//! limiter.  A dropped packet never reaches the parser.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use priority_queue::PriorityQueue;
use tokio::time::Instant;

use crate::config::Config;
use crate::interfaces::NetInterface;
use crate::protocol::wire_types::MAX_DATAGRAM_SIZE;

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] rate limiter lock poisoned, cannot recover from this - aborting";

/// The sliding window the per-source query count is measured over.
const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub rate_limit_enabled: bool,
    /// Packets per second per source before cooldown.
    pub threshold: u32,
    /// How long a source that crossed the threshold is ignored.
    pub cooldown: Duration,
    /// Sources tracked at once; 10% are evicted (oldest first) when
    /// full.
    pub max_tracked: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            threshold: 100,
            cooldown: Duration::from_secs(60),
            max_tracked: 10_000,
        }
    }
}

impl From<&Config> for GuardConfig {
    fn from(config: &Config) -> Self {
        Self {
            rate_limit_enabled: config.rate_limit_enabled,
            threshold: config.rate_limit_threshold,
            cooldown: config.rate_limit_cooldown,
            ..Self::default()
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DropReason {
    /// Larger than 9000 octets.
    Oversized,
    /// Source address is neither link-local nor on the receiving
    /// interface's subnet.
    OutOfScope,
    /// This packet pushed the source over the threshold.
    RateLimited,
    /// The source is in cooldown.
    Cooldown,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Verdict {
    Accept,
    Drop(DropReason),
}

#[derive(Debug)]
struct RateLimitEntry {
    window_start: Instant,
    count: u32,
    cooldown_expiry: Option<Instant>,
    last_seen: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            cooldown_expiry: None,
            last_seen: now,
        }
    }
}

/// Counts of guard decisions, for operator visibility.
#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    accepted: AtomicU64,
    dropped_oversized: AtomicU64,
    dropped_out_of_scope: AtomicU64,
    dropped_rate_limited: AtomicU64,
    dropped_cooldown: AtomicU64,
}

/// A point-in-time copy of the guard's counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct IngressStats {
    pub received: u64,
    pub accepted: u64,
    pub dropped_oversized: u64,
    pub dropped_out_of_scope: u64,
    pub dropped_rate_limited: u64,
    pub dropped_cooldown: u64,
}

pub struct IngressGuard {
    config: GuardConfig,
    limiter: RwLock<HashMap<Ipv4Addr, RateLimitEntry>>,
    counters: Counters,
}

impl IngressGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            limiter: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Decide whether a datagram of `len` octets from `source`,
    /// received on `iface`, may be parsed.
    pub fn admit(
        &self,
        len: usize,
        source: SocketAddr,
        iface: &NetInterface,
        now: Instant,
    ) -> Verdict {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if len > MAX_DATAGRAM_SIZE {
            self.counters
                .dropped_oversized
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%source, %len, "dropped oversized datagram");
            return Verdict::Drop(DropReason::Oversized);
        }

        let SocketAddr::V4(source_v4) = source else {
            self.counters
                .dropped_out_of_scope
                .fetch_add(1, Ordering::Relaxed);
            return Verdict::Drop(DropReason::OutOfScope);
        };
        let ip = *source_v4.ip();

        if !(ip.is_link_local() || iface.network_contains(ip)) {
            self.counters
                .dropped_out_of_scope
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%source, iface = %iface.id(), "dropped out-of-scope datagram");
            return Verdict::Drop(DropReason::OutOfScope);
        }

        if !self.config.rate_limit_enabled {
            self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            return Verdict::Accept;
        }

        // fast path for sources in cooldown: a read lock suffices and
        // this is the dominant case while a source is misbehaving
        {
            let limiter = self.limiter.read().expect(LOCK_POISON_MESSAGE);
            if let Some(entry) = limiter.get(&ip) {
                if entry.cooldown_expiry.is_some_and(|expiry| expiry > now) {
                    self.counters
                        .dropped_cooldown
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(%ip, "dropped datagram from source in cooldown");
                    return Verdict::Drop(DropReason::Cooldown);
                }
            }
        }

        let mut limiter = self.limiter.write().expect(LOCK_POISON_MESSAGE);

        if !limiter.contains_key(&ip) && limiter.len() >= self.config.max_tracked {
            evict_oldest(&mut limiter);
        }

        let entry = limiter.entry(ip).or_insert_with(|| RateLimitEntry::new(now));
        entry.last_seen = now;

        // re-check under the write lock; another thread may have just
        // put this source in cooldown
        if entry.cooldown_expiry.is_some_and(|expiry| expiry > now) {
            self.counters
                .dropped_cooldown
                .fetch_add(1, Ordering::Relaxed);
            return Verdict::Drop(DropReason::Cooldown);
        }
        if entry.cooldown_expiry.take().is_some() {
            // cooldown just expired, start fresh
            entry.window_start = now;
            entry.count = 0;
        }

        if now.duration_since(entry.window_start) >= RATE_WINDOW {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count + 1 > self.config.threshold {
            entry.cooldown_expiry = Some(now + self.config.cooldown);
            self.counters
                .dropped_rate_limited
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                %ip,
                threshold = %self.config.threshold,
                cooldown_seconds = %self.config.cooldown.as_secs(),
                "source exceeded the query rate limit, placed in cooldown"
            );
            return Verdict::Drop(DropReason::RateLimited);
        }

        entry.count += 1;
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Verdict::Accept
    }

    /// Drop expired cooldowns and long-idle entries.  The responder
    /// runs this every five minutes.
    pub fn sweep_expired(&self, now: Instant) {
        let mut limiter = self.limiter.write().expect(LOCK_POISON_MESSAGE);
        limiter.retain(|_, entry| {
            let cooling = entry.cooldown_expiry.is_some_and(|expiry| expiry > now);
            let idle = now.duration_since(entry.last_seen) > RATE_WINDOW;
            cooling || !idle
        });
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            received: self.counters.received.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped_oversized: self.counters.dropped_oversized.load(Ordering::Relaxed),
            dropped_out_of_scope: self.counters.dropped_out_of_scope.load(Ordering::Relaxed),
            dropped_rate_limited: self.counters.dropped_rate_limited.load(Ordering::Relaxed),
            dropped_cooldown: self.counters.dropped_cooldown.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn tracked_sources(&self) -> usize {
        self.limiter.read().expect(LOCK_POISON_MESSAGE).len()
    }
}

/// Evict the oldest 10% of tracked sources by last-seen time.
fn evict_oldest(limiter: &mut HashMap<Ipv4Addr, RateLimitEntry>) {
    let mut queue = PriorityQueue::new();
    for (ip, entry) in limiter.iter() {
        queue.push(*ip, Reverse(entry.last_seen));
    }

    let to_evict = std::cmp::max(1, limiter.len() / 10);
    for _ in 0..to_evict {
        if let Some((ip, _)) = queue.pop() {
            limiter.remove(&ip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface() -> NetInterface {
        NetInterface::new(
            "eth0",
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    fn source(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::from((ip, 5353))
    }

    fn guard() -> IngressGuard {
        IngressGuard::new(GuardConfig::default())
    }

    #[test]
    fn oversized_datagrams_are_dropped() {
        let g = guard();
        let now = Instant::now();

        assert_eq!(
            Verdict::Accept,
            g.admit(MAX_DATAGRAM_SIZE, source([192, 168, 1, 42]), &iface(), now)
        );
        assert_eq!(
            Verdict::Drop(DropReason::Oversized),
            g.admit(MAX_DATAGRAM_SIZE + 1, source([192, 168, 1, 42]), &iface(), now)
        );
    }

    #[test]
    fn scope_check_accepts_subnet_and_link_local_only() {
        let g = guard();
        let now = Instant::now();

        assert_eq!(
            Verdict::Drop(DropReason::OutOfScope),
            g.admit(100, source([8, 8, 8, 8]), &iface(), now)
        );
        assert_eq!(
            Verdict::Accept,
            g.admit(100, source([192, 168, 1, 42]), &iface(), now)
        );
        // link-local is in scope regardless of the interface subnet
        assert_eq!(
            Verdict::Accept,
            g.admit(100, source([169, 254, 3, 7]), &iface(), now)
        );
    }

    #[test]
    fn threshold_crossing_starts_a_cooldown() {
        let g = guard();
        let start = Instant::now();
        let from = source([192, 168, 1, 42]);

        // 150 packets inside half a second: 100 accepted, the 101st
        // trips the limiter, the rest land in cooldown
        for i in 0..150u32 {
            let now = start + Duration::from_millis(u64::from(i) * 3);
            let verdict = g.admit(100, from, &iface(), now);
            match i {
                0..=99 => assert_eq!(Verdict::Accept, verdict, "packet {i}"),
                100 => assert_eq!(Verdict::Drop(DropReason::RateLimited), verdict),
                _ => assert_eq!(Verdict::Drop(DropReason::Cooldown), verdict, "packet {i}"),
            }
        }

        // a different source is unaffected
        assert_eq!(
            Verdict::Accept,
            g.admit(100, source([192, 168, 1, 43]), &iface(), start)
        );

        let stats = g.stats();
        assert_eq!(101, stats.accepted);
        assert_eq!(1, stats.dropped_rate_limited);
        assert_eq!(49, stats.dropped_cooldown);
    }

    #[test]
    fn cooldown_expires() {
        let g = guard();
        let start = Instant::now();
        let from = source([192, 168, 1, 42]);

        for _ in 0..=100 {
            g.admit(100, from, &iface(), start);
        }
        assert_eq!(
            Verdict::Drop(DropReason::Cooldown),
            g.admit(100, from, &iface(), start + Duration::from_secs(59))
        );
        assert_eq!(
            Verdict::Accept,
            g.admit(100, from, &iface(), start + Duration::from_secs(61))
        );
    }

    #[test]
    fn window_resets_after_a_second() {
        let g = guard();
        let start = Instant::now();
        let from = source([192, 168, 1, 42]);

        for _ in 0..100 {
            assert_eq!(Verdict::Accept, g.admit(100, from, &iface(), start));
        }
        // next second, the budget is fresh
        let later = start + Duration::from_millis(1100);
        assert_eq!(Verdict::Accept, g.admit(100, from, &iface(), later));
    }

    #[test]
    fn disabling_the_limiter_keeps_scope_and_size_checks() {
        let g = IngressGuard::new(GuardConfig {
            rate_limit_enabled: false,
            ..GuardConfig::default()
        });
        let now = Instant::now();
        let from = source([192, 168, 1, 42]);

        for _ in 0..500 {
            assert_eq!(Verdict::Accept, g.admit(100, from, &iface(), now));
        }
        assert_eq!(
            Verdict::Drop(DropReason::OutOfScope),
            g.admit(100, source([8, 8, 8, 8]), &iface(), now)
        );
        assert_eq!(
            Verdict::Drop(DropReason::Oversized),
            g.admit(MAX_DATAGRAM_SIZE + 1, from, &iface(), now)
        );
    }

    #[test]
    fn tracked_sources_are_bounded() {
        let g = IngressGuard::new(GuardConfig {
            max_tracked: 100,
            ..GuardConfig::default()
        });
        let start = Instant::now();

        for i in 0..200u32 {
            let ip = [192, 168, 1, u8::try_from(i % 250).unwrap()];
            let now = start + Duration::from_millis(u64::from(i));
            g.admit(100, source(ip), &iface(), now);
        }

        assert!(g.tracked_sources() <= 100);
    }

    #[test]
    fn sweep_clears_idle_entries_but_keeps_active_cooldowns() {
        let g = guard();
        let start = Instant::now();

        // put one source in cooldown, touch another lightly
        for _ in 0..=100 {
            g.admit(100, source([192, 168, 1, 42]), &iface(), start);
        }
        g.admit(100, source([192, 168, 1, 43]), &iface(), start);
        assert_eq!(2, g.tracked_sources());

        g.sweep_expired(start + Duration::from_secs(30));
        // .42 is still cooling down, .43 is idle and gone
        assert_eq!(1, g.tracked_sources());

        g.sweep_expired(start + Duration::from_secs(120));
        assert_eq!(0, g.tracked_sources());
    }
}
