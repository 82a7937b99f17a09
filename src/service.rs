//! The unit of registration: a named service instance, its host, and
//! its TXT metadata, validated before anything touches the wire.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::protocol::wire_types::{DomainName, LABEL_MAX_LEN};

/// `_name._tcp.local.` or `_name._udp.local.` (RFC 6763 section 7).
static SERVICE_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^_[a-zA-Z0-9-]+\._(tcp|udp)\.local\.$").expect("service type regex is valid")
});

/// A service to advertise on the local link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Human-readable instance name: UTF-8, spaces allowed, at most
    /// 63 octets, no control characters (RFC 6763 section 4.1.1).
    pub instance_name: String,

    /// e.g. `_http._tcp.local.`
    pub service_type: String,

    /// The host carrying the service, e.g. `printer1.local.`
    pub hostname: String,

    pub port: u16,

    pub txt: TxtData,

    /// The host's IPv4 address, advertised as the A record.
    pub ipv4: Ipv4Addr,
}

/// The DNS names a validated service occupies.
#[derive(Debug, Clone)]
pub(crate) struct ServiceNames {
    /// `_http._tcp.local.`
    pub type_name: DomainName,
    /// `My Printer._http._tcp.local.`
    pub instance: DomainName,
    /// `printer1.local.`
    pub hostname: DomainName,
}

impl Service {
    /// Check every registration invariant and return the parsed DNS
    /// names.
    ///
    /// # Errors
    ///
    /// `Error::Validation` naming the offending field.
    pub(crate) fn validated_names(&self) -> Result<ServiceNames, Error> {
        if self.instance_name.is_empty() {
            return Err(Error::validation("instance_name", "must not be empty"));
        }
        if self.instance_name.len() > LABEL_MAX_LEN {
            return Err(Error::validation(
                "instance_name",
                format!(
                    "'{}' is {} octets, the limit is {LABEL_MAX_LEN}",
                    self.instance_name,
                    self.instance_name.len()
                ),
            ));
        }
        if self.instance_name.chars().any(char::is_control) {
            return Err(Error::validation(
                "instance_name",
                "must not contain control characters",
            ));
        }

        if !SERVICE_TYPE_RE.is_match(&self.service_type) {
            return Err(Error::validation(
                "service_type",
                format!("'{}' is not of the form _name._tcp.local.", self.service_type),
            ));
        }
        let type_name = DomainName::from_dotted_string(&self.service_type)
            .ok_or_else(|| Error::validation("service_type", "not a valid DNS name"))?;

        let hostname = validate_hostname(&self.hostname)?;

        if self.port == 0 {
            return Err(Error::validation("port", "must be non-zero"));
        }

        self.txt.validate()?;

        let instance = type_name
            .prepend_label(self.instance_name.as_bytes())
            .ok_or_else(|| Error::validation("instance_name", "not encodable as a DNS label"))?;

        Ok(ServiceNames {
            type_name,
            instance,
            hostname,
        })
    }

    /// Validate without needing the names.
    ///
    /// # Errors
    ///
    /// `Error::Validation` naming the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        self.validated_names().map(|_| ())
    }
}

fn validate_hostname(hostname: &str) -> Result<DomainName, Error> {
    let name = DomainName::from_dotted_string(hostname)
        .ok_or_else(|| Error::validation("hostname", format!("'{hostname}' is not a DNS name")))?;

    let local = DomainName::from_dotted_string("local.")
        .ok_or_else(|| Error::validation("hostname", "internal name parse failure"))?;
    if name == local || !name.ends_with(&local) {
        return Err(Error::validation(
            "hostname",
            format!("'{hostname}' must be a name under .local."),
        ));
    }

    for label in &name.labels {
        if label.is_empty() {
            continue;
        }
        if !label
            .iter()
            .all(|&o| o.is_ascii_alphanumeric() || o == b'-')
        {
            return Err(Error::validation(
                "hostname",
                format!("'{hostname}' labels must be letters, digits, and hyphens"),
            ));
        }
    }

    Ok(name)
}

/// Ordered `key=value` TXT metadata.  Keys are unique; inserting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtData {
    entries: Vec<(String, String)>,
}

impl TxtData {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// If any pair fails validation.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, Error>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut txt = Self::new();
        for (key, value) in pairs {
            txt.insert(key.into(), value.into())?;
        }
        Ok(txt)
    }

    /// # Errors
    ///
    /// If the key is empty or contains `=`, or `key=value` exceeds
    /// 255 octets.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let key = key.into();
        let value = value.into();

        validate_pair(&key, &value)?;

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        for (key, value) in &self.entries {
            validate_pair(key, value)?;
        }
        Ok(())
    }

    /// The TXT rdata: length-prefixed `key=value` strings, or the
    /// mandatory single empty string when there are no entries (RFC
    /// 6763 section 6.1).
    pub(crate) fn to_rdata(&self) -> Vec<u8> {
        if self.entries.is_empty() {
            return vec![0];
        }

        let mut octets = Vec::new();
        for (key, value) in &self.entries {
            let len = key.len() + 1 + value.len();
            #[allow(clippy::cast_possible_truncation)]
            octets.push(len as u8);
            octets.extend_from_slice(key.as_bytes());
            octets.push(b'=');
            octets.extend_from_slice(value.as_bytes());
        }
        octets
    }
}

fn validate_pair(key: &str, value: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::validation("txt", "keys must not be empty"));
    }
    if key.contains('=') {
        return Err(Error::validation(
            "txt",
            format!("key '{key}' must not contain '='"),
        ));
    }
    if !key.bytes().all(|o| (0x20..0x7f).contains(&o)) {
        return Err(Error::validation(
            "txt",
            format!("key '{key}' must be printable ASCII"),
        ));
    }
    let pair_len = key.len() + 1 + value.len();
    if pair_len > 255 {
        return Err(Error::validation(
            "txt",
            format!("'{key}=...' is {pair_len} octets, the limit is 255"),
        ));
    }
    Ok(())
}

/// Where a registration is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Querying the link to check the name is free (RFC 6762
    /// section 8.1).
    Probing,
    /// Name claimed; broadcasting unsolicited announcements
    /// (section 8.3).
    Announcing,
    /// Steady state: answering queries.
    Responding,
    /// Lost the name and is being withdrawn.
    Conflicted,
    /// Being unregistered; the TTL=0 goodbye is going out.
    Goodbye,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Probing => write!(f, "probing"),
            ServiceState::Announcing => write!(f, "announcing"),
            ServiceState::Responding => write!(f, "responding"),
            ServiceState::Conflicted => write!(f, "conflicted"),
            ServiceState::Goodbye => write!(f, "goodbye"),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn service(instance: &str, service_type: &str, host: &str, ip: [u8; 4]) -> Service {
        Service {
            instance_name: instance.to_string(),
            service_type: service_type.to_string(),
            hostname: host.to_string(),
            port: 8080,
            txt: TxtData::new(),
            ipv4: Ipv4Addr::from(ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn a_plain_service_validates() {
        let svc = service("printer1", "_http._tcp.local.", "printer1.local.", [192, 168, 1, 50]);
        assert!(svc.validate().is_ok());
    }

    #[test]
    fn instance_names_may_be_utf8_with_spaces() {
        let svc = service(
            "Caf\u{e9} du Coin Printer",
            "_ipp._tcp.local.",
            "cafe.local.",
            [192, 168, 1, 50],
        );
        assert!(svc.validate().is_ok());
    }

    #[test]
    fn instance_name_length_boundary() {
        let at_limit = "x".repeat(63);
        let over = "x".repeat(64);

        let svc = service(&at_limit, "_http._tcp.local.", "h.local.", [10, 0, 0, 1]);
        assert!(svc.validate().is_ok());

        let svc = service(&over, "_http._tcp.local.", "h.local.", [10, 0, 0, 1]);
        assert!(matches!(
            svc.validate(),
            Err(Error::Validation { field: "instance_name", .. })
        ));
    }

    #[test]
    fn control_characters_are_rejected() {
        let svc = service("bad\x07name", "_http._tcp.local.", "h.local.", [10, 0, 0, 1]);
        assert!(svc.validate().is_err());
    }

    #[test]
    fn service_type_shape_is_enforced() {
        for bad in [
            "http._tcp.local.",
            "_http._sctp.local.",
            "_http._tcp.local",
            "_http._tcp.example.",
            "_http.tcp.local.",
            "_ht tp._tcp.local.",
        ] {
            let svc = service("printer", bad, "h.local.", [10, 0, 0, 1]);
            assert!(svc.validate().is_err(), "{bad} should be rejected");
        }

        let svc = service("printer", "_ssh._udp.local.", "h.local.", [10, 0, 0, 1]);
        assert!(svc.validate().is_ok());
    }

    #[test]
    fn hostnames_must_live_under_local() {
        for bad in ["printer1.example.", "local.", "printer_1.local.", "printer1"] {
            let svc = service("printer", "_http._tcp.local.", bad, [10, 0, 0, 1]);
            assert!(svc.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn zero_ports_are_rejected() {
        let mut svc = service("printer", "_http._tcp.local.", "h.local.", [10, 0, 0, 1]);
        svc.port = 0;
        assert!(matches!(
            svc.validate(),
            Err(Error::Validation { field: "port", .. })
        ));
    }

    #[test]
    fn validated_names_compose() {
        let svc = service("My Printer", "_http._tcp.local.", "printer1.local.", [10, 0, 0, 1]);
        let names = svc.validated_names().unwrap();

        assert_eq!("My Printer._http._tcp.local.", names.instance.to_dotted_string());
        assert_eq!("_http._tcp.local.", names.type_name.to_dotted_string());
        assert_eq!("printer1.local.", names.hostname.to_dotted_string());
    }

    #[test]
    fn empty_txt_encodes_as_a_single_zero_octet() {
        assert_eq!(vec![0], TxtData::new().to_rdata());
    }

    #[test]
    fn txt_rdata_is_length_prefixed_pairs() {
        let txt = TxtData::from_pairs([("path", "/"), ("ver", "2")]).unwrap();
        assert_eq!(b"\x06path=/\x05ver=2".to_vec(), txt.to_rdata());
    }

    #[test]
    fn txt_keys_are_unique_and_ordered() {
        let mut txt = TxtData::from_pairs([("a", "1"), ("b", "2")]).unwrap();
        txt.insert("a", "3").unwrap();

        assert_eq!(2, txt.len());
        assert_eq!(Some("3"), txt.get("a"));
        assert_eq!(
            vec![("a", "3"), ("b", "2")],
            txt.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn oversized_txt_pairs_are_rejected() {
        let mut txt = TxtData::new();
        assert!(txt.insert("k", "v".repeat(253)).is_ok());
        assert!(txt.insert("k2", "v".repeat(253)).is_err());
    }

    #[test]
    fn txt_keys_reject_equals_and_empties() {
        let mut txt = TxtData::new();
        assert!(txt.insert("", "x").is_err());
        assert!(txt.insert("a=b", "x").is_err());
    }

    #[test]
    fn services_serialise_to_json_and_back() {
        let svc = Service {
            txt: TxtData::from_pairs([("path", "/")]).unwrap(),
            ..service("printer1", "_http._tcp.local.", "printer1.local.", [192, 168, 1, 50])
        };

        let json = serde_json::to_string(&svc).unwrap();
        let back: Service = serde_json::from_str(&json).unwrap();
        assert_eq!(svc, back);
    }
}
