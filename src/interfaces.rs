//! Local interface enumeration and selection.
//!
//! mDNS is link-local, so the choice of interfaces is the choice of
//! links: the default filter keeps active IPv4 interfaces and drops
//! loopback, VPN-ish tunnels (which would leak link-local traffic off
//! the link), and container bridges.  Callers can instead give an
//! explicit interface list or a predicate; an explicit list wins.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::config::Config;
use crate::errors::Error;

/// One IPv4 address on one interface: the unit a transport binds to
/// and the scope an ingress check runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl NetInterface {
    pub fn new(name: impl Into<String>, addr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            addr,
            netmask,
        }
    }

    /// Identifier used in pacing keys and logs.  Two transports on the
    /// same interface name but different addresses are distinct links.
    pub fn id(&self) -> String {
        format!("{}/{}", self.name, self.addr)
    }

    /// Whether `ip` is inside this interface's subnet.
    pub fn network_contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        (u32::from(ip) & mask) == (u32::from(self.addr) & mask)
    }
}

const VPN_NAME_PREFIXES: &[&str] = &["utun", "tun", "ppp", "wg", "tailscale", "wireguard"];
const CONTAINER_NAME_PREFIXES: &[&str] = &["veth", "br-"];
const CONTAINER_NAMES: &[&str] = &["docker0"];

/// Why the default filter would exclude an interface, if it would.
fn default_exclusion(iface: &NetInterface) -> Option<&'static str> {
    if iface.addr.is_loopback() {
        return Some("loopback");
    }
    if VPN_NAME_PREFIXES
        .iter()
        .any(|prefix| iface.name.starts_with(prefix))
    {
        return Some("VPN tunnel");
    }
    if CONTAINER_NAMES.contains(&iface.name.as_str())
        || CONTAINER_NAME_PREFIXES
            .iter()
            .any(|prefix| iface.name.starts_with(prefix))
    {
        return Some("container network");
    }
    None
}

/// All IPv4 addresses on all interfaces, one `NetInterface` each.
///
/// # Errors
///
/// If the OS interface enumeration fails.
pub fn enumerate() -> Result<Vec<NetInterface>, Error> {
    let mut out = Vec::new();
    for iface in if_addrs::get_if_addrs().map_err(|e| Error::network("enumerate interfaces", e))? {
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            out.push(NetInterface::new(iface.name, v4.ip, v4.netmask));
        }
    }
    Ok(out)
}

/// The interfaces a default-configured endpoint binds to.
///
/// # Errors
///
/// If enumeration fails or nothing passes the filter.
pub fn default_interfaces() -> Result<Vec<NetInterface>, Error> {
    select_from(enumerate()?, &Config::default())
}

/// Apply `config`'s interface selection to the enumerated candidates.
pub(crate) fn select(config: &Config) -> Result<Vec<NetInterface>, Error> {
    select_from(enumerate()?, config)
}

pub(crate) fn select_from(
    candidates: Vec<NetInterface>,
    config: &Config,
) -> Result<Vec<NetInterface>, Error> {
    let mut selected = Vec::new();
    let mut decisions = Vec::with_capacity(candidates.len());

    for iface in candidates {
        let verdict = if let Some(names) = &config.interfaces {
            if names.iter().any(|n| *n == iface.name) {
                None
            } else {
                Some("not in the explicit interface list")
            }
        } else if let Some(filter) = &config.interface_filter {
            if filter(&iface) {
                None
            } else {
                Some("rejected by the interface filter")
            }
        } else {
            default_exclusion(&iface)
        };

        match verdict {
            None => selected.push(iface),
            Some(reason) => decisions.push((iface, reason)),
        }
    }

    if selected.is_empty() {
        let mut msg = String::from("no usable interface");
        for (iface, reason) in &decisions {
            let _ = write!(msg, "; {} ({}): {}", iface.name, iface.addr, reason);
        }
        return Err(Error::validation("interfaces", msg));
    }

    Ok(selected)
}
