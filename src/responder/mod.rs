//! The responder: claims service names on the local link and answers
//! queries for them.
//!
//! One receive loop runs per transport; each registered service gets
//! a driver task walking probe, announce, respond, goodbye.  The
//! registry is the single source of truth for what is claimed, the
//! pacing tracker gates every outbound multicast, and the ingress
//! guard screens every inbound datagram before parsing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::Error;
use crate::ingress::{GuardConfig, IngressGuard, IngressStats, Verdict};
use crate::interfaces;
use crate::net_util::{MulticastUdpTransport, Transport};
use crate::protocol::wire_types::{DomainName, Message, Opcode, ResourceRecord};
use crate::service::{Service, ServiceState, TxtData};

mod answers;
mod machine;
mod pacing;
mod records;
mod registry;

use pacing::{PacingTracker, MULTICAST_MIN_INTERVAL, PROBE_DEFENSE_MIN_INTERVAL};
use registry::{DriverEvent, Registry, ServiceEntry};

pub use registry::ServiceDiagnostics;

/// How often expired rate-limit cooldowns are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long a failed receive backs off before the loop retries.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct ResponderShared {
    pub transports: Vec<Arc<dyn Transport>>,
    pub registry: Registry,
    pub pacing: PacingTracker,
    pub guard: IngressGuard,
    pub shutdown: CancellationToken,
    pub error_tx: mpsc::UnboundedSender<Error>,
}

/// An mDNS responder bound to one or more interfaces.
///
/// Must be created and used within a tokio runtime.
pub struct Responder {
    shared: Arc<ResponderShared>,
    errors: tokio::sync::Mutex<mpsc::UnboundedReceiver<Error>>,
}

impl Responder {
    /// Bind the configured interfaces and start the receive loops.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, no interface passes
    /// selection, or a socket cannot be set up.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
        for iface in interfaces::select(&config)? {
            transports.push(Arc::new(MulticastUdpTransport::new(iface)?));
        }
        Ok(Self::from_transports(&config, transports))
    }

    /// Like `new`, but over caller-supplied transports.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or no transport is given.
    #[cfg(any(feature = "test-util", test))]
    pub fn with_transports(
        config: Config,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Result<Self, Error> {
        config.validate()?;
        if transports.is_empty() {
            return Err(Error::validation("interfaces", "no transports given"));
        }
        Ok(Self::from_transports(&config, transports))
    }

    fn from_transports(config: &Config, transports: Vec<Arc<dyn Transport>>) -> Self {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ResponderShared {
            transports,
            registry: Registry::new(),
            pacing: PacingTracker::new(),
            guard: IngressGuard::new(GuardConfig::from(config)),
            shutdown: CancellationToken::new(),
            error_tx,
        });

        for transport in &shared.transports {
            tokio::spawn(receive_loop(Arc::clone(&shared), Arc::clone(transport)));
        }
        tokio::spawn(sweep_loop(Arc::clone(&shared)));

        Self {
            shared,
            errors: tokio::sync::Mutex::new(error_rx),
        }
    }

    /// Start claiming `service` on the link.  Probing and announcing
    /// proceed in the background; the returned handle watches the
    /// lifecycle.
    ///
    /// # Errors
    ///
    /// If the service fails validation or the instance name is
    /// already registered.
    pub fn register(&self, service: Service) -> Result<Registration, Error> {
        let names = service.validated_names()?;
        let instance_name = service.instance_name.clone();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) =
            watch::channel((instance_name.clone(), ServiceState::Probing));

        self.shared.registry.insert(ServiceEntry {
            service,
            names,
            state: ServiceState::Probing,
            created_at: Instant::now(),
            probe_count: 0,
            announce_count: 0,
            events: events_tx,
            status_tx,
        })?;

        tokio::spawn(machine::drive_service(
            Arc::clone(&self.shared),
            instance_name.clone(),
            events_rx,
        ));

        tracing::info!(instance = %instance_name, "registration started");
        Ok(Registration { status_rx })
    }

    /// Withdraw a service: one goodbye multicast, then removal.
    ///
    /// # Errors
    ///
    /// If the instance name is not registered.
    pub fn unregister(&self, instance_name: &str) -> Result<(), Error> {
        match self.shared.registry.events_for(instance_name) {
            Some(events) => {
                let _ = events.send(DriverEvent::Unregister);
                Ok(())
            }
            None => Err(Error::validation(
                "instance_name",
                format!("'{instance_name}' is not registered"),
            )),
        }
    }

    /// Replace a responding service's TXT data and re-announce it.
    ///
    /// # Errors
    ///
    /// If the TXT data is invalid, the service is unknown, or it is
    /// not currently in the `Responding` state.
    pub fn update_txt(&self, instance_name: &str, txt: TxtData) -> Result<(), Error> {
        txt.validate()?;
        let events = self.shared.registry.update_txt(instance_name, txt)?;
        let _ = events.send(DriverEvent::TxtUpdated);
        Ok(())
    }

    /// The registered service under this instance name, if any.
    pub fn get(&self, instance_name: &str) -> Option<Service> {
        self.shared.registry.get_service(instance_name)
    }

    /// Lifecycle progress for a registered service: state, age, and
    /// how many probes and announcements have gone out.
    pub fn diagnostics(&self, instance_name: &str) -> Option<ServiceDiagnostics> {
        self.shared.registry.diagnostics(instance_name)
    }

    /// Counters from the ingress guard.
    pub fn ingress_stats(&self) -> IngressStats {
        self.shared.guard.stats()
    }

    /// The next asynchronous failure (lost conflicts, probe
    /// timeouts, encode failures) surfaced by the background tasks.
    pub async fn next_error(&self) -> Option<Error> {
        self.errors.lock().await.recv().await
    }

    /// Like `next_error`, but never waits.
    pub fn try_next_error(&self) -> Option<Error> {
        self.errors.try_lock().ok()?.try_recv().ok()
    }

    /// Shut down: cancel every task, send best-effort goodbyes for
    /// everything still registered, and close the transports.
    ///
    /// # Errors
    ///
    /// The first transport close failure, if any.
    pub async fn close(self) -> Result<(), Error> {
        tracing::info!("closing responder");
        self.shared.shutdown.cancel();

        for name in self.shared.registry.instance_names() {
            if let Some(rs) = self.shared.registry.get_registered(&name) {
                if matches!(
                    rs.state,
                    ServiceState::Announcing | ServiceState::Responding
                ) {
                    self.shared.registry.set_state(&name, ServiceState::Goodbye);
                    machine::send_goodbye(&self.shared, &rs).await;
                }
            }
            self.shared.registry.remove(&name);
        }

        let mut result = Ok(());
        for transport in &self.shared.transports {
            if let Err(error) = transport.close().await {
                if result.is_ok() {
                    result = Err(error);
                } else {
                    tracing::warn!(%error, "transport close failed");
                }
            }
        }
        result
    }
}

/// A handle onto one registration's lifecycle.
#[derive(Debug)]
pub struct Registration {
    status_rx: watch::Receiver<(String, ServiceState)>,
}

impl Registration {
    /// The current instance name, which changes if a conflict forces
    /// a rename.
    pub fn instance_name(&self) -> String {
        self.status_rx.borrow().0.clone()
    }

    pub fn state(&self) -> ServiceState {
        self.status_rx.borrow().1
    }

    /// Wait until the service reaches `Responding`.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` if the registration was withdrawn instead,
    /// `Error::Validation` if it was unregistered while waiting.
    pub async fn wait_until_responding(&mut self) -> Result<(), Error> {
        loop {
            let (name, state) = self.status_rx.borrow().clone();
            match state {
                ServiceState::Responding => return Ok(()),
                ServiceState::Conflicted => {
                    return Err(Error::Conflict {
                        instance_name: name,
                    })
                }
                ServiceState::Goodbye => {
                    return Err(Error::validation(
                        "instance_name",
                        format!("'{name}' was unregistered"),
                    ))
                }
                ServiceState::Probing | ServiceState::Announcing => {}
            }

            if self.status_rx.changed().await.is_err() {
                return Err(Error::Conflict {
                    instance_name: name,
                });
            }
        }
    }
}

async fn receive_loop(shared: Arc<ResponderShared>, transport: Arc<dyn Transport>) {
    let cancel = shared.shutdown.clone();
    let iface = transport.interface().id();
    tracing::debug!(%iface, "responder receive loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match transport.receive(&cancel).await {
            Err(error) if error.is_cancelled() => break,
            Err(error) => {
                tracing::warn!(%iface, %error, "receive failed, backing off");
                tokio::time::sleep(RECEIVE_BACKOFF).await;
            }
            Ok((octets, source)) => {
                let verdict = shared.guard.admit(
                    octets.len(),
                    source,
                    transport.interface(),
                    Instant::now(),
                );
                if !matches!(verdict, Verdict::Accept) {
                    continue;
                }

                let message = match Message::from_octets(&octets) {
                    Ok(message) => message,
                    Err(error) => {
                        tracing::debug!(%source, %error, "dropping malformed packet");
                        continue;
                    }
                };

                if message.header.is_response {
                    // passive cache coherence is a later revision;
                    // responses are only relevant to queriers
                    tracing::trace!(%source, "ignoring response message");
                    continue;
                }
                if message.header.opcode != Opcode::Standard {
                    tracing::trace!(%source, "ignoring non-standard opcode");
                    continue;
                }
                if message.header.is_truncated {
                    tracing::debug!(%source, "processing truncated query best-effort");
                }

                handle_query(&shared, &transport, &message).await;
            }
        }
    }

    tracing::debug!(%iface, "responder receive loop stopped");
}

async fn handle_query(
    shared: &Arc<ResponderShared>,
    transport: &Arc<dyn Transport>,
    query: &Message,
) {
    machine::scan_probe_conflicts(shared, query);

    // names we hold in `Responding` that this query is probing for:
    // those answers go out under the 250 ms conflict-defense floor
    let contested: Vec<DomainName> = if query.authority.is_empty() {
        Vec::new()
    } else {
        query
            .questions
            .iter()
            .filter(|q| {
                query.authority.iter().any(|rr| rr.name == q.name)
                    && !shared.registry.defended(&q.name).is_empty()
            })
            .map(|q| q.name.clone())
            .collect()
    };

    let services = shared.registry.answerable();
    if services.is_empty() {
        return;
    }

    let set = answers::build_answers(&services, query);
    if set.is_empty() {
        return;
    }

    let iface = transport.interface().id();
    let now = Instant::now();
    let mut claim = |rr: &ResourceRecord| {
        let interval = if contested.contains(&rr.name) {
            PROBE_DEFENSE_MIN_INTERVAL
        } else {
            MULTICAST_MIN_INTERVAL
        };
        shared.pacing.try_claim(rr, &iface, interval, now)
    };

    let answers_out: Vec<ResourceRecord> = set.answers.into_iter().filter(&mut claim).collect();
    if answers_out.is_empty() {
        // everything was suppressed or inside its pacing window
        return;
    }
    let additional_out: Vec<ResourceRecord> =
        set.additionals.into_iter().filter(&mut claim).collect();

    let mut response = Message::response();
    response.answers = answers_out;
    response.additional = additional_out;

    match response.to_octets() {
        Ok(octets) => {
            if let Err(error) = transport.send(&octets).await {
                tracing::warn!(%iface, %error, "response send failed");
            }
        }
        Err(error) => {
            let _ = shared.error_tx.send(error.into());
        }
    }
}

/// Sweep the rate limiter's expired cooldowns every five minutes.
async fn sweep_loop(shared: Arc<ResponderShared>) {
    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            () = tokio::time::sleep(SWEEP_INTERVAL) => {
                shared.guard.sweep_expired(Instant::now());
            }
        }
    }
}
