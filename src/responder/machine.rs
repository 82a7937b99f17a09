//! The per-service lifecycle driver: probe, resolve conflicts,
//! announce, respond, say goodbye.
//!
//! Each registered service gets one driver task.  The receive path
//! feeds it conflict events; the public API feeds it TXT updates and
//! unregistration.  Everything the driver waits on also races the
//! responder's shutdown token.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::errors::Error;
use crate::protocol::wire_types::{Message, QueryType, Question, ResourceRecord};
use crate::responder::pacing::MULTICAST_MIN_INTERVAL;
use crate::responder::records;
use crate::responder::registry::{DriverEvent, RegisteredService};
use crate::responder::ResponderShared;
use crate::service::ServiceState;

/// Spacing between probe queries (RFC 6762 section 8.1).
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// How many unanswered probes claim the name.
pub(crate) const PROBE_COUNT: u32 = 3;

/// Probing that has not concluded after this long is abandoned.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Spacing between the unsolicited announcements (section 8.3).
pub(crate) const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) const ANNOUNCE_COUNT: u32 = 2;

/// The outcome of a simultaneous-probe tie-break, from our side.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TieBreak {
    /// Our records compare lower; the other claimant must yield.
    Win,
    /// Their records compare lower, or ours are a strict prefix of
    /// theirs; we must rename.
    Lose,
    /// Identical record sets: both claimants are advertising the
    /// same data, so there is no conflict at all.
    Tie,
}

/// Order two records for the tie-break: class (sans cache-flush),
/// then type, then canonical rdata (uncompressed, embedded names
/// lowercased).
pub(crate) fn record_cmp(a: &ResourceRecord, b: &ResourceRecord) -> Ordering {
    u16::from(a.rclass)
        .cmp(&u16::from(b.rclass))
        .then_with(|| {
            u16::from(a.rtype_with_data.rtype()).cmp(&u16::from(b.rtype_with_data.rtype()))
        })
        .then_with(|| {
            a.rtype_with_data
                .canonical_rdata()
                .cmp(&b.rtype_with_data.canonical_rdata())
        })
}

/// Compare our claimed records for a name against a competing probe's
/// authority records for the same name.  Both sets are sorted into
/// canonical order first; the first differing record decides, lower
/// value winning.  A strict prefix loses to its extension.
pub(crate) fn tie_break(ours: &[ResourceRecord], theirs: &[ResourceRecord]) -> TieBreak {
    let mut ours_sorted = ours.to_vec();
    let mut theirs_sorted = theirs.to_vec();
    ours_sorted.sort_by(record_cmp);
    theirs_sorted.sort_by(record_cmp);

    for (a, b) in ours_sorted.iter().zip(theirs_sorted.iter()) {
        match record_cmp(a, b) {
            Ordering::Less => return TieBreak::Win,
            Ordering::Greater => return TieBreak::Lose,
            Ordering::Equal => {}
        }
    }

    match ours_sorted.len().cmp(&theirs_sorted.len()) {
        Ordering::Less => TieBreak::Lose,
        Ordering::Greater => TieBreak::Win,
        Ordering::Equal => TieBreak::Tie,
    }
}

/// Check an accepted query's authority section against every service
/// we are currently probing, notifying the losing drivers.
pub(crate) fn scan_probe_conflicts(shared: &ResponderShared, query: &Message) {
    if query.authority.is_empty() {
        return;
    }

    for question in &query.questions {
        let claims = shared.registry.probing_claims(&question.name);
        if claims.is_empty() {
            continue;
        }

        let theirs: Vec<ResourceRecord> = query
            .authority
            .iter()
            .filter(|rr| rr.name == question.name)
            .cloned()
            .collect();
        if theirs.is_empty() {
            continue;
        }

        for claim in claims {
            let ours: Vec<ResourceRecord> =
                records::build_record_set(&claim.service, &claim.names)
                    .into_iter()
                    .filter(|rr| rr.name == question.name)
                    .collect();
            if ours.is_empty() {
                continue;
            }

            match tie_break(&ours, &theirs) {
                TieBreak::Lose => {
                    tracing::info!(
                        instance = %claim.instance_name,
                        name = %question.name,
                        "lost probe tie-break"
                    );
                    let _ = claim.events.send(DriverEvent::ConflictLost);
                }
                TieBreak::Win => {
                    tracing::debug!(
                        instance = %claim.instance_name,
                        name = %question.name,
                        "won probe tie-break, ignoring competing probe"
                    );
                }
                TieBreak::Tie => {
                    tracing::trace!(
                        instance = %claim.instance_name,
                        "competing probe carries identical records, no conflict"
                    );
                }
            }
        }
    }
}

enum Waited {
    Elapsed,
    ConflictLost,
    Unregister,
    Shutdown,
}

async fn wait_until(
    shared: &ResponderShared,
    events: &mut mpsc::UnboundedReceiver<DriverEvent>,
    deadline: tokio::time::Instant,
) -> Waited {
    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => return Waited::Shutdown,
            () = tokio::time::sleep_until(deadline) => return Waited::Elapsed,
            event = events.recv() => match event {
                None | Some(DriverEvent::Unregister) => return Waited::Unregister,
                Some(DriverEvent::ConflictLost) => return Waited::ConflictLost,
                // TXT updates are only accepted while responding; a
                // stray one here is stale
                Some(DriverEvent::TxtUpdated) => {}
            }
        }
    }
}

enum ConflictOutcome {
    Renamed,
    Fatal,
}

fn handle_conflict(
    shared: &ResponderShared,
    base_name: &str,
    key: &mut String,
    conflicts: &mut u32,
) -> ConflictOutcome {
    *conflicts += 1;

    if *conflicts >= 2 {
        tracing::warn!(instance = %key, "second name conflict, withdrawing registration");
        shared.registry.set_state(key, ServiceState::Conflicted);
        let _ = shared.error_tx.send(Error::Conflict {
            instance_name: key.clone(),
        });
        shared.registry.remove(key);
        return ConflictOutcome::Fatal;
    }

    let renamed = format!("{base_name} ({})", *conflicts + 1);
    tracing::info!(instance = %key, %renamed, "name conflict, renaming and reprobing");

    match shared.registry.rename(key, &renamed) {
        Ok(()) => {
            *key = renamed;
            ConflictOutcome::Renamed
        }
        Err(error) => {
            tracing::warn!(instance = %key, %error, "rename failed, withdrawing registration");
            let _ = shared.error_tx.send(Error::Conflict {
                instance_name: key.clone(),
            });
            ConflictOutcome::Fatal
        }
    }
}

/// After a rename, conflict signals already queued refer to the old
/// name and must not count against the new one.  Unregistration is
/// the only event that survives the drain.
fn drain_stale_events(events: &mut mpsc::UnboundedReceiver<DriverEvent>) -> bool {
    loop {
        match events.try_recv() {
            Ok(DriverEvent::ConflictLost | DriverEvent::TxtUpdated) => {}
            Ok(DriverEvent::Unregister) => return true,
            Err(_) => return false,
        }
    }
}

pub(crate) async fn drive_service(
    shared: Arc<ResponderShared>,
    initial_key: String,
    mut events: mpsc::UnboundedReceiver<DriverEvent>,
) {
    let base_name = initial_key.clone();
    let mut key = initial_key;
    let mut conflicts = 0u32;

    'lifecycle: loop {
        shared.registry.set_state(&key, ServiceState::Probing);
        let probe_deadline = tokio::time::Instant::now() + PROBE_TIMEOUT;

        // random start delay spreads simultaneous registrants out
        // (RFC 6762 section 8.1)
        let jitter = Duration::from_millis(rand::Rng::gen_range(&mut rand::thread_rng(), 0..=250));
        match wait_until(&shared, &mut events, tokio::time::Instant::now() + jitter).await {
            Waited::Elapsed => {}
            Waited::ConflictLost => match handle_conflict(&shared, &base_name, &mut key, &mut conflicts) {
                ConflictOutcome::Renamed => {
                    if drain_stale_events(&mut events) {
                        withdraw_unannounced(&shared, &key);
                        return;
                    }
                    continue 'lifecycle;
                }
                ConflictOutcome::Fatal => return,
            },
            Waited::Unregister => {
                withdraw_unannounced(&shared, &key);
                return;
            }
            Waited::Shutdown => return,
        }

        let mut probes_sent = 0;
        while probes_sent < PROBE_COUNT {
            if tokio::time::Instant::now() >= probe_deadline {
                tracing::warn!(instance = %key, "probing did not conclude in time, withdrawing");
                shared.registry.set_state(&key, ServiceState::Conflicted);
                let _ = shared.error_tx.send(Error::Timeout { op: "probing" });
                shared.registry.remove(&key);
                return;
            }

            send_probe(&shared, &key).await;
            shared.registry.bump_probe_count(&key);
            probes_sent += 1;

            let next = std::cmp::min(
                tokio::time::Instant::now() + PROBE_INTERVAL,
                probe_deadline,
            );
            match wait_until(&shared, &mut events, next).await {
                Waited::Elapsed => {}
                Waited::ConflictLost => {
                    match handle_conflict(&shared, &base_name, &mut key, &mut conflicts) {
                        ConflictOutcome::Renamed => {
                            if drain_stale_events(&mut events) {
                                withdraw_unannounced(&shared, &key);
                                return;
                            }
                            continue 'lifecycle;
                        }
                        ConflictOutcome::Fatal => return,
                    }
                }
                Waited::Unregister => {
                    withdraw_unannounced(&shared, &key);
                    return;
                }
                Waited::Shutdown => return,
            }
        }

        // three unanswered probes: the name is ours
        shared.registry.set_state(&key, ServiceState::Announcing);
        for round in 0..ANNOUNCE_COUNT {
            let Some(rs) = shared.registry.get_registered(&key) else {
                return;
            };
            let record_set = records::build_record_set(&rs.service, &rs.names);
            multicast_paced(&shared, &record_set).await;
            shared.registry.bump_announce_count(&key);

            if round + 1 < ANNOUNCE_COUNT {
                let next = tokio::time::Instant::now() + ANNOUNCE_INTERVAL;
                match wait_until(&shared, &mut events, next).await {
                    Waited::Elapsed | Waited::ConflictLost => {}
                    Waited::Unregister => {
                        depart(&shared, &key).await;
                        return;
                    }
                    Waited::Shutdown => return,
                }
            }
        }

        shared.registry.set_state(&key, ServiceState::Responding);
        tracing::info!(instance = %key, "service announced and responding");

        loop {
            tokio::select! {
                () = shared.shutdown.cancelled() => return,
                event = events.recv() => match event {
                    None => return,
                    Some(DriverEvent::ConflictLost) => {
                        // established names are defended on the
                        // receive path, not renamed
                        tracing::debug!(instance = %key, "conflict signal while established, ignoring");
                    }
                    Some(DriverEvent::TxtUpdated) => {
                        shared.registry.set_state(&key, ServiceState::Announcing);
                        for round in 0..ANNOUNCE_COUNT {
                            let Some(rs) = shared.registry.get_registered(&key) else {
                                return;
                            };
                            let txt = records::txt_record(&rs.service, &rs.names);
                            multicast_paced(&shared, std::slice::from_ref(&txt)).await;
                            shared.registry.bump_announce_count(&key);

                            if round + 1 < ANNOUNCE_COUNT {
                                let next = tokio::time::Instant::now() + ANNOUNCE_INTERVAL;
                                match wait_until(&shared, &mut events, next).await {
                                    Waited::Elapsed | Waited::ConflictLost => {}
                                    Waited::Unregister => {
                                        depart(&shared, &key).await;
                                        return;
                                    }
                                    Waited::Shutdown => return,
                                }
                            }
                        }
                        shared.registry.set_state(&key, ServiceState::Responding);
                    }
                    Some(DriverEvent::Unregister) => {
                        depart(&shared, &key).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Unregistration before anything reached the wire: no goodbye owed.
fn withdraw_unannounced(shared: &ResponderShared, key: &str) {
    shared.registry.set_state(key, ServiceState::Goodbye);
    shared.registry.remove(key);
    tracing::info!(instance = %key, "registration withdrawn before announcing");
}

/// Goodbye and removal for an announced service.
pub(crate) async fn depart(shared: &ResponderShared, key: &str) {
    shared.registry.set_state(key, ServiceState::Goodbye);
    if let Some(rs) = shared.registry.get_registered(key) {
        send_goodbye(shared, &rs).await;
    }
    shared.registry.remove(key);
    tracing::info!(instance = %key, "service departed");
}

/// Multicast the record set once with TTL zero (RFC 6762 section
/// 10.1).
pub(crate) async fn send_goodbye(shared: &ResponderShared, rs: &RegisteredService) {
    let record_set = records::goodbye_record_set(&rs.service, &rs.names);
    multicast_paced(shared, &record_set).await;
}

/// Build and multicast a probe for everything `key` is claiming: one
/// ANY question per claimed name, the proposed records in the
/// authority section (RFC 6762 section 8.1).
async fn send_probe(shared: &ResponderShared, key: &str) {
    let Some(rs) = shared.registry.get_registered(key) else {
        return;
    };

    let mut authority = records::build_record_set(&rs.service, &rs.names);
    for rr in &mut authority {
        // the cache-flush bit stays out of the authority section
        rr.cache_flush = false;
    }
    authority.sort_by(record_cmp);

    let questions = vec![
        Question::new(rs.names.instance.clone(), QueryType::Wildcard),
        Question::new(rs.names.hostname.clone(), QueryType::Wildcard),
    ];
    let mut message = Message::query(questions);
    message.authority = authority;

    match message.to_octets() {
        Ok(octets) => {
            for transport in &shared.transports {
                if let Err(error) = transport.send(&octets).await {
                    tracing::warn!(iface = %transport.interface().id(), %error, "probe send failed");
                }
            }
        }
        Err(error) => {
            let _ = shared.error_tx.send(error.into());
        }
    }
}

/// Multicast `record_set` on every interface, honouring the
/// per-record pacing floor.  Records inside their 1-second window are
/// retried once after the window passes, so mandated multicasts
/// (announcements, goodbyes) are delayed rather than lost.
pub(crate) async fn multicast_paced(shared: &ResponderShared, record_set: &[ResourceRecord]) {
    for transport in &shared.transports {
        let iface = transport.interface().id();
        let mut pending: Vec<ResourceRecord> = record_set.to_vec();

        for attempt in 0..2 {
            let now = Instant::now();
            let (ready, blocked): (Vec<ResourceRecord>, Vec<ResourceRecord>) =
                pending.into_iter().partition(|rr| {
                    shared.pacing.try_claim(rr, &iface, MULTICAST_MIN_INTERVAL, now)
                });

            if !ready.is_empty() {
                let mut message = Message::response();
                message.answers = ready;
                match message.to_octets() {
                    Ok(octets) => {
                        if let Err(error) = transport.send(&octets).await {
                            tracing::warn!(iface = %iface, %error, "multicast send failed");
                        }
                    }
                    Err(error) => {
                        let _ = shared.error_tx.send(error.into());
                    }
                }
            }

            pending = blocked;
            if pending.is_empty() {
                break;
            }
            if attempt == 0 {
                tokio::time::sleep(MULTICAST_MIN_INTERVAL).await;
            }
        }

        if !pending.is_empty() {
            tracing::debug!(iface = %iface, count = pending.len(), "records paced out of a multicast");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_types::test_util::*;
    use std::net::Ipv4Addr;

    #[test]
    fn identical_record_sets_tie() {
        let ours = vec![a_record("host.local.", Ipv4Addr::new(192, 168, 1, 10))];
        let theirs = vec![a_record("host.local.", Ipv4Addr::new(192, 168, 1, 10))];

        assert_eq!(TieBreak::Tie, tie_break(&ours, &theirs));
    }

    #[test]
    fn lower_rdata_wins() {
        let ours = vec![a_record("host.local.", Ipv4Addr::new(192, 168, 1, 10))];
        let theirs = vec![a_record("host.local.", Ipv4Addr::new(192, 168, 1, 20))];

        assert_eq!(TieBreak::Win, tie_break(&ours, &theirs));
        assert_eq!(TieBreak::Lose, tie_break(&theirs, &ours));
    }

    #[test]
    fn type_orders_before_rdata() {
        // A (type 1) sorts before TXT (type 16) regardless of rdata
        let ours = vec![a_record("host.local.", Ipv4Addr::new(255, 255, 255, 255))];
        let theirs = vec![txt_record("host.local.", vec![0])];

        assert_eq!(TieBreak::Win, tie_break(&ours, &theirs));
    }

    #[test]
    fn a_strict_prefix_loses() {
        let srv = srv_record("printer._http._tcp.local.", 80, "host.local.");
        let txt = txt_record("printer._http._tcp.local.", vec![0]);

        let ours = vec![srv.clone()];
        let theirs = vec![srv, txt];

        assert_eq!(TieBreak::Lose, tie_break(&ours, &theirs));
        assert_eq!(TieBreak::Win, tie_break(&theirs, &ours));
    }

    #[test]
    fn comparison_is_order_insensitive() {
        let srv = srv_record("printer._http._tcp.local.", 80, "host.local.");
        let txt = txt_record("printer._http._tcp.local.", vec![0]);

        let ours = vec![txt.clone(), srv.clone()];
        let theirs = vec![srv, txt];

        assert_eq!(TieBreak::Tie, tie_break(&ours, &theirs));
    }

    #[test]
    fn embedded_names_compare_case_insensitively() {
        let ours = vec![srv_record("p._http._tcp.local.", 80, "Host.local.")];
        let theirs = vec![srv_record("p._http._tcp.local.", 80, "host.LOCAL.")];

        assert_eq!(TieBreak::Tie, tie_break(&ours, &theirs));
    }
}
