//! The multicast UDP transport: one endpoint per selected interface,
//! shared by whoever needs to send, driven by at most one receive
//! loop.
//!
//! The `Transport` trait is the seam the responder and querier are
//! written against; `MulticastUdpTransport` is the real thing, and
//! the `mock` module provides an in-memory double for tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::interfaces::NetInterface;
use crate::protocol::wire_types::{MDNS_GROUP, MDNS_PORT};

pub mod pool;
mod sockopt;

#[cfg(any(feature = "test-util", test))]
pub mod mock;

pub use pool::BufferPool;

/// One bound multicast endpoint.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// The interface this endpoint is bound to.
    fn interface(&self) -> &NetInterface;

    /// Multicast a packet to the group.
    async fn send(&self, packet: &[u8]) -> Result<(), Error>;

    /// Wait for the next datagram, or for cancellation.  The returned
    /// octets are owned: they outlive the transport's internal receive
    /// buffer.
    async fn receive(&self, cancel: &CancellationToken) -> Result<(Bytes, SocketAddr), Error>;

    /// Leave the group and shut the endpoint down.  Errors are
    /// surfaced, never swallowed.
    async fn close(&self) -> Result<(), Error>;
}

/// The IPv4 multicast transport: a socket bound to 0.0.0.0:5353 and
/// joined to 224.0.0.251 on one interface.
#[derive(Debug)]
pub struct MulticastUdpTransport {
    iface: NetInterface,
    socket: UdpSocket,
    pool: BufferPool,
    closed: AtomicBool,
}

impl MulticastUdpTransport {
    /// Bind the mDNS endpoint on `iface`.  Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// If socket creation, configuration, or binding fails.
    pub fn new(iface: NetInterface) -> Result<Self, Error> {
        let socket = sockopt::bind_multicast(&iface)?;
        let socket =
            UdpSocket::from_std(socket).map_err(|e| Error::network("register socket", e))?;

        tracing::debug!(iface = %iface.id(), "mDNS endpoint bound");

        Ok(Self {
            iface,
            socket,
            pool: BufferPool::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self, op: &'static str) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::network(
                op,
                std::io::Error::new(std::io::ErrorKind::NotConnected, "transport closed"),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MulticastUdpTransport {
    fn interface(&self) -> &NetInterface {
        &self.iface
    }

    async fn send(&self, packet: &[u8]) -> Result<(), Error> {
        self.check_open("send")?;
        self.socket
            .send_to(packet, (MDNS_GROUP, MDNS_PORT))
            .await
            .map_err(|e| Error::network("send", e))?;
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<(Bytes, SocketAddr), Error> {
        self.check_open("recv")?;

        // the pooled buffer is released on every path out of here,
        // including cancellation, because dropping it is the release
        let mut buffer = self.pool.acquire();

        tokio::select! {
            () = cancel.cancelled() => Err(Error::cancelled()),
            result = self.socket.recv_from(&mut buffer[..]) => {
                let (len, peer) = result.map_err(|e| Error::network("recv", e))?;
                Ok((Bytes::copy_from_slice(&buffer[..len]), peer))
            }
        }
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.socket
            .leave_multicast_v4(MDNS_GROUP, self.iface.addr)
            .map_err(|e| Error::network("leave multicast group", e))
    }
}
