//! The querier: one-shot multicast questions, answers collected
//! until a deadline.
//!
//! One receive loop runs per transport, broadcasting every accepted
//! response message to however many `query` calls are in flight.
//! Each call owns its own accumulator and deduplication set; the
//! transports are the only shared state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::Error;
use crate::ingress::{GuardConfig, IngressGuard, IngressStats, Verdict};
use crate::interfaces;
use crate::net_util::{MulticastUdpTransport, Transport};
use crate::protocol::wire_types::{
    DomainName, Message, QueryType, Question, RecordType, ResourceRecord,
};

/// In-flight response messages buffered per collector before old ones
/// are dropped.
const BROADCAST_CAPACITY: usize = 64;

/// How long a failed receive backs off before the loop retries.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

struct QuerierShared {
    transports: Vec<Arc<dyn Transport>>,
    guard: IngressGuard,
    shutdown: CancellationToken,
    answers_tx: broadcast::Sender<Arc<Message>>,
}

/// A one-shot mDNS querier bound to one or more interfaces.
///
/// Must be created and used within a tokio runtime.  `query` may be
/// called concurrently from any number of tasks.
pub struct Querier {
    shared: Arc<QuerierShared>,
}

impl Querier {
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
        let (answers_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let shared = Arc::new(QuerierShared {
            transports,
            guard: IngressGuard::new(GuardConfig::from(config)),
            shutdown: CancellationToken::new(),
            answers_tx,
        });

        for transport in &shared.transports {
            tokio::spawn(receive_loop(Arc::clone(&shared), Arc::clone(transport)));
        }

        Self { shared }
    }

    /// Multicast one question and gather matching answers until
    /// `window` elapses.  The deadline closing the window is the
    /// normal end of a one-shot query, so this returns `Ok` with
    /// whatever was heard, possibly nothing.
    ///
    /// # Errors
    ///
    /// If the name or record type is invalid, or every send fails.
    pub async fn query(
        &self,
        name: &str,
        rtype: RecordType,
        window: Duration,
    ) -> Result<Vec<ResourceRecord>, Error> {
        let never = CancellationToken::new();
        self.query_inner(name, rtype, window, &never).await
    }

    /// Like `query`, but also stops on `cancel`.  Cancellation
    /// returns `Error::Cancelled` carrying the records collected so
    /// far.
    ///
    /// # Errors
    ///
    /// As `query`, plus `Error::Cancelled` on cancellation.
    pub async fn query_cancellable(
        &self,
        name: &str,
        rtype: RecordType,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceRecord>, Error> {
        self.query_inner(name, rtype, window, cancel).await
    }

    async fn query_inner(
        &self,
        name: &str,
        rtype: RecordType,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceRecord>, Error> {
        let question = validate_question(name, rtype)?;

        // subscribe before sending so no response can slip between
        let mut rx = self.shared.answers_tx.subscribe();

        let octets = Message::query(vec![question.clone()]).to_octets()?;
        let mut sent = 0;
        let mut first_error = None;
        for transport in &self.shared.transports {
            match transport.send(&octets).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    tracing::warn!(iface = %transport.interface().id(), %error, "query send failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        if sent == 0 {
            return Err(
                first_error.unwrap_or_else(|| Error::validation("interfaces", "no transports"))
            );
        }

        let deadline = tokio::time::Instant::now() + window;
        let mut found: Vec<ResourceRecord> = Vec::new();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return Ok(found),
                () = cancel.cancelled() => return Err(Error::Cancelled { partial: found }),
                () = self.shared.shutdown.cancelled() => {
                    return Err(Error::Cancelled { partial: found })
                }
                result = rx.recv() => match result {
                    Ok(message) => {
                        for rr in &message.answers {
                            if rr.matches(&question) && seen.insert(rr.key()) {
                                found.push(rr.clone());
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(%skipped, "query collector lagged behind the receive loop");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(found),
                }
            }
        }
    }

    /// Counters from the ingress guard.
    pub fn ingress_stats(&self) -> IngressStats {
        self.shared.guard.stats()
    }

    /// Stop the receive loops and close the transports.
    ///
    /// # Errors
    ///
    /// The first transport close failure, if any.
    pub async fn close(self) -> Result<(), Error> {
        self.shared.shutdown.cancel();

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

fn validate_question(name: &str, rtype: RecordType) -> Result<Question, Error> {
    if !matches!(
        rtype,
        RecordType::A | RecordType::PTR | RecordType::SRV | RecordType::TXT
    ) {
        return Err(Error::validation(
            "record_type",
            format!("{rtype} is not queryable; use A, PTR, SRV, or TXT"),
        ));
    }

    let Some(qname) = DomainName::from_dotted_string(name) else {
        return Err(Error::validation(
            "name",
            format!("'{name}' is not a valid DNS name"),
        ));
    };
    if !qname.is_local() {
        return Err(Error::validation(
            "name",
            format!("'{name}' is not under .local."),
        ));
    }

    Ok(Question::new(qname, QueryType::Record(rtype)))
}

async fn receive_loop(shared: Arc<QuerierShared>, transport: Arc<dyn Transport>) {
    let cancel = shared.shutdown.clone();
    let iface = transport.interface().id();
    tracing::debug!(%iface, "querier receive loop started");

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

                if !message.header.is_response {
                    continue;
                }
                if message.header.is_truncated {
                    tracing::debug!(%source, "processing truncated response best-effort");
                }

                // no receivers just means no query is in flight
                let _ = shared.answers_tx.send(Arc::new(message));
            }
        }
    }

    tracing::debug!(%iface, "querier receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_record_types_are_rejected() {
        assert!(matches!(
            validate_question("printer.local.", RecordType::from(28)),
            Err(Error::Validation { field: "record_type", .. })
        ));
    }

    #[test]
    fn names_must_be_under_local() {
        for bad in ["printer.example.", "local.", "printer", ""] {
            assert!(
                validate_question(bad, RecordType::A).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(validate_question("printer.local.", RecordType::A).is_ok());
        assert!(validate_question("_http._tcp.local.", RecordType::PTR).is_ok());
        assert!(validate_question("_services._dns-sd._udp.local.", RecordType::PTR).is_ok());
    }
}
