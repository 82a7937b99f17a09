//! The in-memory registry of services this responder has claimed or
//! is claiming.
//!
//! Readers (answer construction) take the lock shared; writers
//! (register/unregister/state transitions/TXT updates) take it
//! exclusively.  The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::errors::Error;
use crate::protocol::wire_types::DomainName;
use crate::service::{Service, ServiceNames, ServiceState};

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] registry lock poisoned, cannot recover from this - aborting";

/// What the receive path or the public API tells a driver task.
#[derive(Debug)]
pub(crate) enum DriverEvent {
    /// A probe tie-break was lost for the name being claimed.
    ConflictLost,
    /// The TXT data changed; re-announce it.
    TxtUpdated,
    /// The service is being withdrawn; say goodbye and exit.
    Unregister,
}

pub(crate) struct ServiceEntry {
    pub service: Service,
    pub names: ServiceNames,
    pub state: ServiceState,
    pub created_at: Instant,
    pub probe_count: u32,
    pub announce_count: u32,
    pub events: mpsc::UnboundedSender<DriverEvent>,
    pub status_tx: watch::Sender<(String, ServiceState)>,
}

/// A read-side copy of one registered service, enough to build
/// answers from.
#[derive(Debug, Clone)]
pub(crate) struct RegisteredService {
    pub service: Service,
    pub names: ServiceNames,
    pub state: ServiceState,
}

/// Operator-facing view of one registration's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDiagnostics {
    pub state: ServiceState,
    /// Time since `register` was called.
    pub age: Duration,
    pub probe_count: u32,
    pub announce_count: u32,
}

/// A probing service that might be contested by an incoming probe.
pub(crate) struct ProbingClaim {
    pub instance_name: String,
    pub service: Service,
    pub names: ServiceNames,
    pub events: mpsc::UnboundedSender<DriverEvent>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<String, ServiceEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// If the instance name is already registered.
    pub fn insert(&self, entry: ServiceEntry) -> Result<(), Error> {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);
        let key = entry.service.instance_name.clone();
        if entries.contains_key(&key) {
            return Err(Error::validation(
                "instance_name",
                format!("'{key}' is already registered"),
            ));
        }
        entries.insert(key, entry);
        Ok(())
    }

    pub fn remove(&self, instance_name: &str) -> Option<ServiceEntry> {
        self.entries
            .write()
            .expect(LOCK_POISON_MESSAGE)
            .remove(instance_name)
    }

    pub fn get_service(&self, instance_name: &str) -> Option<Service> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .get(instance_name)
            .map(|entry| entry.service.clone())
    }

    pub fn get_registered(&self, instance_name: &str) -> Option<RegisteredService> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .get(instance_name)
            .map(|entry| RegisteredService {
                service: entry.service.clone(),
                names: entry.names.clone(),
                state: entry.state,
            })
    }

    pub fn diagnostics(&self, instance_name: &str) -> Option<ServiceDiagnostics> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .get(instance_name)
            .map(|entry| ServiceDiagnostics {
                state: entry.state,
                age: entry.created_at.elapsed(),
                probe_count: entry.probe_count,
                announce_count: entry.announce_count,
            })
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .keys()
            .cloned()
            .collect()
    }

    /// Services that are past probing and may appear in answers.
    pub fn answerable(&self) -> Vec<RegisteredService> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .values()
            .filter(|entry| {
                matches!(
                    entry.state,
                    ServiceState::Announcing | ServiceState::Responding
                )
            })
            .map(|entry| RegisteredService {
                service: entry.service.clone(),
                names: entry.names.clone(),
                state: entry.state,
            })
            .collect()
    }

    /// Established services whose instance name or hostname is `name`
    /// (for defending against a competing prober).
    pub fn defended(&self, name: &DomainName) -> Vec<RegisteredService> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .values()
            .filter(|entry| {
                entry.state == ServiceState::Responding
                    && (entry.names.instance == *name || entry.names.hostname == *name)
            })
            .map(|entry| RegisteredService {
                service: entry.service.clone(),
                names: entry.names.clone(),
                state: entry.state,
            })
            .collect()
    }

    /// Probing services claiming `name` (their instance name or
    /// hostname), for conflict scanning.
    pub fn probing_claims(&self, name: &DomainName) -> Vec<ProbingClaim> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .values()
            .filter(|entry| {
                entry.state == ServiceState::Probing
                    && (entry.names.instance == *name || entry.names.hostname == *name)
            })
            .map(|entry| ProbingClaim {
                instance_name: entry.service.instance_name.clone(),
                service: entry.service.clone(),
                names: entry.names.clone(),
                events: entry.events.clone(),
            })
            .collect()
    }

    /// Update a service's lifecycle state, notifying any watchers.
    pub fn set_state(&self, instance_name: &str, state: ServiceState) {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);
        if let Some(entry) = entries.get_mut(instance_name) {
            entry.state = state;
            let _ = entry.status_tx.send((instance_name.to_string(), state));
            tracing::info!(instance = %instance_name, %state, "service state change");
        }
    }

    pub fn bump_probe_count(&self, instance_name: &str) {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);
        if let Some(entry) = entries.get_mut(instance_name) {
            entry.probe_count += 1;
        }
    }

    pub fn bump_announce_count(&self, instance_name: &str) {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);
        if let Some(entry) = entries.get_mut(instance_name) {
            entry.announce_count += 1;
        }
    }

    /// Replace the TXT data; only legal in the `Responding` state.
    ///
    /// # Errors
    ///
    /// If the service is unknown or not currently responding.
    pub fn update_txt(
        &self,
        instance_name: &str,
        txt: crate::service::TxtData,
    ) -> Result<mpsc::UnboundedSender<DriverEvent>, Error> {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);
        let Some(entry) = entries.get_mut(instance_name) else {
            return Err(Error::validation(
                "instance_name",
                format!("'{instance_name}' is not registered"),
            ));
        };
        if entry.state != ServiceState::Responding {
            return Err(Error::validation(
                "instance_name",
                format!(
                    "'{instance_name}' is {}, TXT updates require responding",
                    entry.state
                ),
            ));
        }
        entry.service.txt = txt;
        Ok(entry.events.clone())
    }

    /// Move an entry to a new instance name after a lost tie-break.
    ///
    /// # Errors
    ///
    /// If the new name fails validation or is already taken.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        let mut entries = self.entries.write().expect(LOCK_POISON_MESSAGE);

        if entries.contains_key(to) {
            return Err(Error::validation(
                "instance_name",
                format!("'{to}' is already registered"),
            ));
        }

        let Some(mut entry) = entries.remove(from) else {
            return Err(Error::validation(
                "instance_name",
                format!("'{from}' is not registered"),
            ));
        };

        entry.service.instance_name = to.to_string();
        match entry.service.validated_names() {
            Ok(names) => {
                entry.names = names;
                entries.insert(to.to_string(), entry);
                Ok(())
            }
            Err(error) => {
                // the renamed form does not fit in a label; the caller
                // surfaces this as a conflict failure
                let _ = entry
                    .status_tx
                    .send((to.to_string(), ServiceState::Conflicted));
                Err(error)
            }
        }
    }

    pub fn events_for(&self, instance_name: &str) -> Option<mpsc::UnboundedSender<DriverEvent>> {
        self.entries
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .get(instance_name)
            .map(|entry| entry.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_util::service;

    fn entry(instance: &str) -> (ServiceEntry, watch::Receiver<(String, ServiceState)>) {
        let svc = service(instance, "_http._tcp.local.", "host.local.", [192, 168, 1, 50]);
        let names = svc.validated_names().unwrap();
        let (events, _rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel((instance.to_string(), ServiceState::Probing));
        (
            ServiceEntry {
                service: svc,
                names,
                state: ServiceState::Probing,
                created_at: Instant::now(),
                probe_count: 0,
                announce_count: 0,
                events,
                status_tx,
            },
            status_rx,
        )
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = Registry::new();
        let (first, _watch1) = entry("printer");
        let (second, _watch2) = entry("printer");

        assert!(registry.insert(first).is_ok());
        assert!(registry.insert(second).is_err());
    }

    #[test]
    fn probing_services_do_not_answer() {
        let registry = Registry::new();
        let (e, _watch) = entry("printer");
        registry.insert(e).unwrap();

        assert!(registry.answerable().is_empty());

        registry.set_state("printer", ServiceState::Responding);
        assert_eq!(1, registry.answerable().len());
    }

    #[test]
    fn state_changes_reach_watchers() {
        let registry = Registry::new();
        let (e, status_rx) = entry("printer");
        registry.insert(e).unwrap();

        registry.set_state("printer", ServiceState::Announcing);
        assert_eq!(
            ("printer".to_string(), ServiceState::Announcing),
            status_rx.borrow().clone()
        );
    }

    #[test]
    fn txt_updates_require_responding() {
        let registry = Registry::new();
        let (e, _watch) = entry("printer");
        registry.insert(e).unwrap();

        assert!(registry
            .update_txt("printer", crate::service::TxtData::new())
            .is_err());

        registry.set_state("printer", ServiceState::Responding);
        assert!(registry
            .update_txt("printer", crate::service::TxtData::new())
            .is_ok());
    }

    #[test]
    fn rename_moves_the_entry() {
        let registry = Registry::new();
        let (e, _watch) = entry("printer");
        registry.insert(e).unwrap();

        registry.rename("printer", "printer (2)").unwrap();

        assert!(registry.get_service("printer").is_none());
        let renamed = registry.get_service("printer (2)").unwrap();
        assert_eq!("printer (2)", renamed.instance_name);
        assert_eq!(
            "printer (2)._http._tcp.local.",
            registry
                .get_registered("printer (2)")
                .unwrap()
                .names
                .instance
                .to_dotted_string()
        );
    }

    #[test]
    fn probing_claims_match_instance_and_hostname() {
        let registry = Registry::new();
        let (e, _watch) = entry("printer");
        registry.insert(e).unwrap();

        let instance =
            DomainName::from_dotted_string("printer._http._tcp.local.").unwrap();
        let host = DomainName::from_dotted_string("host.local.").unwrap();
        let other = DomainName::from_dotted_string("other._http._tcp.local.").unwrap();

        assert_eq!(1, registry.probing_claims(&instance).len());
        assert_eq!(1, registry.probing_claims(&host).len());
        assert!(registry.probing_claims(&other).is_empty());

        // once responding, probes against the name are defense cases,
        // not conflicts
        registry.set_state("printer", ServiceState::Responding);
        assert!(registry.probing_claims(&instance).is_empty());
        assert_eq!(1, registry.defended(&instance).len());
    }
}
