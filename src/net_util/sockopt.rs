//! Platform socket-option configuration for the multicast endpoint.
//!
//! Option ordering matters: reuse options must be applied to the raw
//! socket *before* `bind`, which is why this goes through `socket2`
//! rather than any fused create-and-bind convenience API (those are
//! also known to accept all UDP on the port regardless of group).

use std::net::{Ipv4Addr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};

use crate::errors::Error;
use crate::interfaces::NetInterface;
use crate::protocol::wire_types::{MDNS_GROUP, MDNS_PORT};

/// Create, configure, and bind the mDNS socket for one interface:
/// reuse options, bind to 0.0.0.0:5353, join 224.0.0.251 on the
/// interface, multicast TTL 255 (RFC 6762 section 11), loopback on,
/// outgoing multicast interface pinned.
pub(crate) fn bind_multicast(iface: &NetInterface) -> Result<std::net::UdpSocket, Error> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::network("create socket", e))?;

    platform::set_reuse_options(&socket)?;

    socket
        .set_nonblocking(true)
        .map_err(|e| Error::network("set nonblocking", e))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
    socket
        .bind(&bind_addr.into())
        .map_err(|e| Error::network("bind", e))?;

    socket
        .join_multicast_v4(&MDNS_GROUP, &iface.addr)
        .map_err(|e| Error::network("join multicast group", e))?;
    socket
        .set_multicast_ttl_v4(255)
        .map_err(|e| Error::network("set multicast TTL", e))?;
    socket
        .set_multicast_loop_v4(true)
        .map_err(|e| Error::network("set multicast loopback", e))?;
    socket
        .set_multicast_if_v4(&iface.addr)
        .map_err(|e| Error::network("set multicast interface", e))?;

    Ok(socket.into())
}

#[cfg(unix)]
mod platform {
    use socket2::Socket;

    use crate::errors::Error;

    /// `SO_REUSEADDR` plus `SO_REUSEPORT`, so this endpoint can share
    /// port 5353 with a system mDNS daemon.  Old kernels without
    /// `SO_REUSEPORT` get the address option alone.
    pub(super) fn set_reuse_options(socket: &Socket) -> Result<(), Error> {
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::network("set SO_REUSEADDR", e))?;

        if let Err(error) = socket.set_reuse_port(true) {
            tracing::debug!(?error, "SO_REUSEPORT unavailable, continuing without it");
        }

        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use socket2::Socket;

    use crate::errors::Error;

    /// Windows has no `SO_REUSEPORT`; `SO_REUSEADDR` alone lets
    /// multicast receivers share the port (with the platform's
    /// hijack semantics, which are acceptable for a multicast
    /// listener).
    pub(super) fn set_reuse_options(socket: &Socket) -> Result<(), Error> {
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::network("set SO_REUSEADDR", e))
    }
}
