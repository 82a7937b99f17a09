use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// The well-known mDNS UDP port.
///
/// See section 5.1 of RFC 6762.
pub const MDNS_PORT: u16 = 5353;

/// The IPv4 link-local multicast group all mDNS traffic uses.
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// Multicast datagrams larger than this are dropped before parsing.
/// 9000 octets covers an Ethernet jumbo frame, the largest payload RFC
/// 6762 (section 17) contemplates.
pub const MAX_DATAGRAM_SIZE: usize = 9000;

/// TTL for shared and instance-specific service records (PTR, SRV,
/// TXT).  See section 10 of RFC 6762.
pub const SERVICE_RECORD_TTL: u32 = 120;

/// TTL for host address records.  See section 10 of RFC 6762.
pub const HOSTNAME_RECORD_TTL: u32 = 4500;

/// The meta-query name used to enumerate advertised service types.
/// See section 9 of RFC 6763.
pub const META_QUERY_NAME: &str = "_services._dns-sd._udp.local.";

/// Top bit of the record class field: in a response this is the
/// cache-flush bit, in a question it is the unicast-response bit.  See
/// sections 10.2 and 5.4 of RFC 6762.
pub const CLASS_FLAG_MASK: u16 = 0b1000_0000_0000_0000;

/// The low 15 bits of the class field, the class proper.
pub const CLASS_VALUE_MASK: u16 = !CLASS_FLAG_MASK;

pub const LABEL_MAX_LEN: usize = 63;
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Upper bound on compression-pointer jumps while decoding a single
/// name.  Combined with the visited-offset check this makes decoding
/// of hostile inputs terminate.
pub const POINTER_JUMP_LIMIT: usize = 128;

pub const HEADER_MASK_QR: u8 = 0b1000_0000;
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub const HEADER_OFFSET_OPCODE: u8 = 3;
pub const HEADER_MASK_AA: u8 = 0b0000_0100;
pub const HEADER_MASK_TC: u8 = 0b0000_0010;
pub const HEADER_MASK_RD: u8 = 0b0000_0001;
pub const HEADER_MASK_RA: u8 = 0b1000_0000;
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;
pub const HEADER_OFFSET_RCODE: u8 = 0;

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the responder
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs proposed by a probe
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035 and section 18 of RFC 6762.  In mDNS
/// the answer section of a query doubles as the known-answer list
/// (section 7.1), and the authority section of a query carries the
/// records a prober intends to claim (section 8.2).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// A one-shot multicast query.  Multicast queries SHOULD use ID 0
    /// (RFC 6762 section 18.1), and this library always does.
    pub fn query(questions: Vec<Question>) -> Self {
        Self {
            header: Header::for_query(),
            questions,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// An authoritative multicast response.  Responses carry ID 0 and
    /// AA=1 (RFC 6762 sections 18.1 and 18.4).
    pub fn response() -> Self {
        Self {
            header: Header::for_response(),
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.  mDNS gives most of these fields
/// fixed values (RFC 6762 section 18): ID is 0 in multicast messages,
/// RD/RA/RCODE are 0, and AA is 1 in every response.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    /// Query identifier.  Multicast queries and responses use 0.
    pub id: u16,

    /// Whether this message is a query (false) or a response (true).
    pub is_response: bool,

    /// Kind of query.  Anything other than a standard query is
    /// silently ignored on receipt (RFC 6762 section 18.3).
    pub opcode: Opcode,

    /// Authoritative Answer.  mDNS responders only ever send records
    /// they are authoritative for, so this is 1 on every response.
    pub is_authoritative: bool,

    /// TrunCation.  Accepted on receipt (the message is processed
    /// best-effort); never set by this library.
    pub is_truncated: bool,

    /// Recursion Desired.  Meaningless in mDNS, 0 on send.
    pub recursion_desired: bool,

    /// Recursion Available.  Meaningless in mDNS, 0 on send.
    pub recursion_available: bool,

    /// Response code.  Messages received with a non-zero RCODE are
    /// rejected at parse time (RFC 6762 section 18.11).
    pub rcode: Rcode,
}

impl Header {
    pub fn for_query() -> Self {
        Self {
            id: 0,
            is_response: false,
            opcode: Opcode::Standard,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: false,
            recursion_available: false,
            rcode: Rcode::NoError,
        }
    }

    pub fn for_response() -> Self {
        Self {
            is_response: true,
            is_authoritative: true,
            ..Self::for_query()
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Header {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        // non-zero RCODEs are rejected at parse time, so a round-trippable
        // header always carries NoError
        Ok(Self {
            id: u.arbitrary()?,
            is_response: u.arbitrary()?,
            opcode: u.arbitrary()?,
            is_authoritative: u.arbitrary()?,
            is_truncated: u.arbitrary()?,
            recursion_desired: u.arbitrary()?,
            recursion_available: u.arbitrary()?,
            rcode: Rcode::NoError,
        })
    }
}

/// A `Header` as it appears on the network.  This type is used for
/// serialisation and deserialisation only: including the count fields
/// in the normal `Header` type would require ensuring those values
/// are correct.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    /// The header that will be persisted to / is taken from the
    /// `Message`.
    pub header: Header,

    /// Number of entries in the question section.
    pub qdcount: u16,

    /// Number of resource records in the answer section.
    pub ancount: u16,

    /// Number of resource records in the authority section.
    pub nscount: u16,

    /// Number of resource records in the additional section.
    pub arcount: u16,
}

/// A single question.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |UR|                  QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.2 of RFC 1035.  The top bit of the class field is
/// the mDNS unicast-response bit (RFC 6762 section 5.4): it is decoded
/// and re-encoded faithfully, but this library always responds via
/// multicast.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,

    pub qtype: QueryType,

    pub qclass: QueryClass,

    /// The unicast-response bit from the class field.
    pub unicast_response: bool,
}

impl Question {
    pub fn new(name: DomainName, qtype: QueryType) -> Self {
        Self {
            name,
            qtype,
            qclass: QueryClass::Record(RecordClass::IN),
            unicast_response: false,
        }
    }
}

/// A single resource record.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                      NAME                     /
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |CF|                  CLASS                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.3 of RFC 1035.  The top bit of the class field is
/// the mDNS cache-flush bit (RFC 6762 section 10.2), modelled here as
/// a separate flag so the class proper stays a 15-bit value.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    pub name: DomainName,

    /// A combination of the RTYPE and RDATA fields.
    pub rtype_with_data: RecordTypeWithData,

    /// The cache-flush bit: set on records that are the complete set
    /// for their (name, type), clearing stale cached copies on other
    /// hosts.  Never set on shared record sets (PTR), in questions, or
    /// in the known-answer and authority sections.
    pub cache_flush: bool,

    pub rclass: RecordClass,

    /// Time to live, in seconds.
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn matches(&self, question: &Question) -> bool {
        self.name == question.name
            && self.rtype_with_data.matches(&question.qtype)
            && self.rclass.matches(&question.qclass)
    }

    /// A byte string identifying this record for deduplication,
    /// pacing, and known-answer comparison: the lowercased name, the
    /// type, the class (sans cache-flush bit), and the canonical
    /// rdata.  Two records with equal keys are the same record, TTL
    /// aside.
    pub fn key(&self) -> Vec<u8> {
        let rdata = self.rtype_with_data.canonical_rdata();
        let mut key =
            Vec::with_capacity(self.name.octets.len() + 4 + rdata.len());
        for octet in &self.name.octets {
            key.push(octet.to_ascii_lowercase());
        }
        key.extend_from_slice(&u16::from(self.rtype_with_data.rtype()).to_be_bytes());
        key.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        key.extend_from_slice(&rdata);
        key
    }
}

/// A record type with its associated, deserialised, data.  Only the
/// types DNS-SD traffics in are interpreted; anything else is carried
/// as opaque octets.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordTypeWithData {
    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                    ADDRESS                    |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `ADDRESS` is a 32 bit Internet address.
    A { address: Ipv4Addr },

    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                   PTRDNAME                    /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `PTRDNAME` is a domain name.  DNS-SD uses PTR records to
    /// point from a service type to its instances (RFC 6763 section
    /// 4.1).
    PTR { ptrdname: DomainName },

    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                   TXT-DATA                    /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `TXT-DATA` is one or more length-prefixed character
    /// strings.  DNS-SD requires at least one string; an empty record
    /// is a single zero octet (RFC 6763 section 6.1).  The octets are
    /// not interpreted at this layer.
    TXT { octets: Vec<u8> },

    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                   PRIORITY                    |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                    WEIGHT                     |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                     PORT                      |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                    TARGET                     /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// See RFC 2782.  The target SHOULD NOT be compressed on the wire
    /// (RFC 6762 section 18.14).
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },

    /// Any other record, carried opaquely.
    Unknown {
        tag: RecordTypeUnknown,
        octets: Vec<u8>,
    },
}

impl RecordTypeWithData {
    pub fn matches(&self, qtype: &QueryType) -> bool {
        self.rtype().matches(qtype)
    }

    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::PTR { .. } => RecordType::PTR,
            RecordTypeWithData::TXT { .. } => RecordType::TXT,
            RecordTypeWithData::SRV { .. } => RecordType::SRV,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    /// The rdata in the canonical form used for record comparison
    /// (RFC 6762 section 8.2.1): uncompressed, with embedded names
    /// lowercased.
    pub fn canonical_rdata(&self) -> Vec<u8> {
        match self {
            RecordTypeWithData::A { address } => address.octets().to_vec(),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.lowercased_octets(),
            RecordTypeWithData::TXT { octets } => octets.clone(),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                let target = target.lowercased_octets();
                let mut octets = Vec::with_capacity(6 + target.len());
                octets.extend_from_slice(&priority.to_be_bytes());
                octets.extend_from_slice(&weight.to_be_bytes());
                octets.extend_from_slice(&port.to_be_bytes());
                octets.extend_from_slice(&target);
                octets
            }
            RecordTypeWithData::Unknown { octets, .. } => octets.clone(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordTypeWithData {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let len = u.int_in_range(0..=128)?;
        let octets = Vec::from(u.bytes(len)?);

        let rtype_with_data = match u.arbitrary::<RecordType>()? {
            RecordType::A => RecordTypeWithData::A {
                address: u.arbitrary()?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: u.arbitrary()?,
            },
            RecordType::TXT => RecordTypeWithData::TXT { octets },
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: u.arbitrary()?,
                weight: u.arbitrary()?,
                port: u.arbitrary()?,
                target: u.arbitrary()?,
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown { tag, octets },
        };
        Ok(rtype_with_data)
    }
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Opcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A domain name is a sequence of labels, where each label is a
/// length octet followed by that number of octets.
///
/// Unlike unicast DNS, labels are not restricted to ASCII letters,
/// digits, and hyphens: a DNS-SD service-instance label is arbitrary
/// UTF-8 (spaces and all, RFC 6763 section 4.1.3), so labels are kept
/// as opaque octets with the case they arrived in.  Comparison and
/// hashing are ASCII-case-insensitive, as mDNS name matching requires
/// (RFC 6762 section 16).
///
/// A label must be 63 octets or shorter.  A name must be 255 octets
/// or shorter in total, including both length and label octets.
#[derive(Clone)]
pub struct DomainName {
    /// The uncompressed wire form: length-prefixed labels, terminated
    /// by the root's zero octet, original case preserved.
    pub octets: Vec<u8>,
    pub labels: Vec<Vec<u8>>,
}

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            octets: vec![0],
            labels: vec![vec![]],
        }
    }

    pub fn is_root(&self) -> bool {
        self.octets.len() == 1 && self.labels.len() == 1
    }

    /// Case-insensitive suffix check: `a.b.local.` ends with
    /// `b.local.` and with `.`, but not with `a.b.`.
    pub fn ends_with(&self, suffix: &DomainName) -> bool {
        if suffix.labels.len() > self.labels.len() {
            return false;
        }
        let skip = self.labels.len() - suffix.labels.len();
        self.labels[skip..]
            .iter()
            .zip(&suffix.labels)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Whether this is a name under the `.local.` mDNS domain, with
    /// at least one label of its own.
    pub fn is_local(&self) -> bool {
        self.labels.len() >= 3 && self.labels[self.labels.len() - 2].eq_ignore_ascii_case(b"local")
    }

    /// The wire octets with ASCII letters lowercased, the form names
    /// take in record keys and tie-break comparisons.
    pub fn lowercased_octets(&self) -> Vec<u8> {
        self.octets.iter().map(u8::to_ascii_lowercase).collect()
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.octets.len());
        for label in &self.labels {
            if label.is_empty() {
                break;
            }
            out.push_str(&String::from_utf8_lossy(label));
            out.push('.');
        }
        out
    }

    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root_domain());
        }

        let chunks = s.split('.').collect::<Vec<_>>();
        let mut labels = Vec::with_capacity(chunks.len());

        for (i, label) in chunks.iter().enumerate() {
            if label.is_empty() && i != chunks.len() - 1 {
                return None;
            }

            labels.push(label.as_bytes().into());
        }

        Self::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<Vec<u8>>) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut blank_label = false;

        for label in &labels {
            if blank_label {
                return None;
            }

            blank_label = label.is_empty();

            match u8::try_from(label.len()) {
                Ok(n) if usize::from(n) <= LABEL_MAX_LEN => {
                    octets.push(n);
                    for &octet in label {
                        if octet < 0x20 || octet == 0x7f {
                            return None;
                        }
                        octets.push(octet);
                    }
                }
                _ => return None,
            }
        }

        if blank_label && octets.len() <= DOMAINNAME_MAX_LEN {
            Some(Self { octets, labels })
        } else {
            None
        }
    }

    /// Prefix this name with one more label, e.g. turning
    /// `_http._tcp.local.` into `Living Room._http._tcp.local.`.
    pub fn prepend_label(&self, label: &[u8]) -> Option<Self> {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label.to_vec());
        labels.extend(self.labels.iter().cloned());
        Self::from_labels(labels)
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.octets.eq_ignore_ascii_case(&other.octets)
    }
}

impl Eq for DomainName {}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.octets.len());
        for octet in &self.octets {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(0..=6)?;
        let mut octets = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..num_labels {
            let label_len = u.int_in_range::<u8>(1..=20)?;
            let mut label = Vec::new();
            octets.push(label_len);
            let bs = u.bytes(label_len.into())?;
            for b in bs {
                let octet = if *b < 0x20 || *b == 0x7f { b'x' } else { *b };
                label.push(octet);
                octets.push(octet);
            }
            labels.push(label);
        }
        octets.push(0);
        labels.push(Vec::new());
        Ok(Self { octets, labels })
    }
}

/// Query types are a superset of record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryType {
    Record(RecordType),
    /// Type 255, `ANY`.  Probes query with this so a single question
    /// covers every record being claimed (RFC 6762 section 8.1).
    Wildcard,
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryType::Wildcard,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Wildcard => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        // the class field only has 15 usable bits; the top bit is
        // carried separately as the unicast-response / cache-flush flag
        Ok(Self::from(u.arbitrary::<u16>()? & CLASS_VALUE_MASK))
    }
}

/// Record types are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    PTR,
    TXT,
    SRV,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid `RecordType`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordTypeUnknown(u16);

impl RecordType {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordType::Unknown(_))
    }

    pub fn matches(&self, qtype: &QueryType) -> bool {
        match qtype {
            QueryType::Wildcard => true,
            QueryType::Record(rtype) => rtype == self,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "{n}"),
        }
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            12 => RecordType::PTR,
            16 => RecordType::TXT,
            33 => RecordType::SRV,
            _ => RecordType::Unknown(RecordTypeUnknown(value)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::PTR => 12,
            RecordType::TXT => 16,
            RecordType::SRV => 33,
            RecordType::Unknown(RecordTypeUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// Record classes are used by resource records and by queries.  mDNS
/// only uses IN, but unknown classes are decoded and carried.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordClass {
    IN,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordClassUnknown(u16);

impl RecordClass {
    pub fn matches(&self, qclass: &QueryClass) -> bool {
        match qclass {
            QueryClass::Wildcard => true,
            QueryClass::Record(rclass) => rclass == self,
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            _ => RecordClass::Unknown(RecordClassUnknown(value)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::Unknown(RecordClassUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()? & CLASS_VALUE_MASK))
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn question(name: &str, qtype: QueryType) -> Question {
        Question::new(domain(name), qtype)
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A { address },
            cache_flush: true,
            rclass: RecordClass::IN,
            ttl: HOSTNAME_RECORD_TTL,
        }
    }

    pub fn ptr_record(name: &str, ptrdname: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::PTR {
                ptrdname: domain(ptrdname),
            },
            cache_flush: false,
            rclass: RecordClass::IN,
            ttl: SERVICE_RECORD_TTL,
        }
    }

    pub fn srv_record(name: &str, port: u16, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::SRV {
                priority: 0,
                weight: 0,
                port,
                target: domain(target),
            },
            cache_flush: true,
            rclass: RecordClass::IN,
            ttl: SERVICE_RECORD_TTL,
        }
    }

    pub fn txt_record(name: &str, octets: Vec<u8>) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::TXT { octets },
            cache_flush: true,
            rclass: RecordClass::IN,
            ttl: SERVICE_RECORD_TTL,
        }
    }
}
