//! An in-memory stand-in for the multicast link, for tests.
//!
//! A `MockHub` is one shared link: every packet sent by any endpoint
//! is delivered to every endpoint on the hub (the real socket has
//! multicast loopback enabled, so senders hear themselves there too).
//! `inject` plays the role of an arbitrary host on the network.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::interfaces::NetInterface;
use crate::net_util::Transport;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] mock hub mutex poisoned, cannot recover from this - aborting";

type Datagram = (Bytes, SocketAddr);

struct Endpoint {
    id: usize,
    tx: mpsc::UnboundedSender<Datagram>,
}

#[derive(Clone, Default)]
pub struct MockHub {
    endpoints: Arc<Mutex<Vec<Endpoint>>>,
    next_id: Arc<AtomicUsize>,
}

impl MockHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the link.  `source` is the address
    /// other endpoints see its packets coming from.
    pub fn endpoint(&self, iface: NetInterface, source: SocketAddr) -> Arc<MockTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.endpoints
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .push(Endpoint { id, tx });

        Arc::new(MockTransport {
            id,
            iface,
            source,
            hub: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver a packet from an arbitrary (possibly off-link) source.
    pub fn inject(&self, packet: &[u8], source: SocketAddr) {
        self.deliver(packet, source);
    }

    fn deliver(&self, packet: &[u8], source: SocketAddr) {
        let packet = Bytes::copy_from_slice(packet);
        let endpoints = self.endpoints.lock().expect(MUTEX_POISON_MESSAGE);
        for endpoint in endpoints.iter() {
            // a closed endpoint's receiver is gone; that's fine
            let _ = endpoint.tx.send((packet.clone(), source));
        }
    }

    fn detach(&self, id: usize) {
        self.endpoints
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .retain(|endpoint| endpoint.id != id);
    }
}

pub struct MockTransport {
    id: usize,
    iface: NetInterface,
    source: SocketAddr,
    hub: MockHub,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("iface", &self.iface.id())
            .field("source", &self.source)
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn interface(&self) -> &NetInterface {
        &self.iface
    }

    async fn send(&self, packet: &[u8]) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::network(
                "send",
                std::io::Error::new(std::io::ErrorKind::NotConnected, "transport closed"),
            ));
        }
        self.hub.deliver(packet, self.source);
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<(Bytes, SocketAddr), Error> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            () = cancel.cancelled() => Err(Error::cancelled()),
            datagram = rx.recv() => datagram.ok_or_else(|| {
                Error::network(
                    "recv",
                    std::io::Error::new(std::io::ErrorKind::NotConnected, "hub gone"),
                )
            }),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.detach(self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn iface(name: &str, last_octet: u8) -> NetInterface {
        NetInterface::new(
            name,
            Ipv4Addr::new(192, 168, 1, last_octet),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    fn source(last_octet: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last_octet], 5353))
    }

    #[tokio::test]
    async fn packets_reach_every_endpoint_including_the_sender() {
        let hub = MockHub::new();
        let a = hub.endpoint(iface("eth0", 10), source(10));
        let b = hub.endpoint(iface("eth0", 20), source(20));

        a.send(b"hello").await.unwrap();

        let cancel = CancellationToken::new();
        let (packet, peer) = b.receive(&cancel).await.unwrap();
        assert_eq!(b"hello".as_ref(), &packet[..]);
        assert_eq!(source(10), peer);

        let (packet, _) = a.receive(&cancel).await.unwrap();
        assert_eq!(b"hello".as_ref(), &packet[..]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_receive() {
        let hub = MockHub::new();
        let a = hub.endpoint(iface("eth0", 10), source(10));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = a.receive(&cancel).await.unwrap_err();
        assert!(error.is_cancelled());
    }

    #[tokio::test]
    async fn injected_packets_carry_their_source() {
        let hub = MockHub::new();
        let a = hub.endpoint(iface("eth0", 10), source(10));

        hub.inject(b"spoof", SocketAddr::from(([8, 8, 8, 8], 5353)));

        let cancel = CancellationToken::new();
        let (_, peer) = a.receive(&cancel).await.unwrap();
        assert_eq!(SocketAddr::from(([8, 8, 8, 8], 5353)), peer);
    }
}
