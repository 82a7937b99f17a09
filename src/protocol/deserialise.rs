//! Deserialisation of DNS messages from the network.  See the
//! `wire_types` module for details of the format.
//!
//! Parsing never panics, whatever the input: every failure is an
//! `Error` carrying the offset it was detected at.  Compression
//! pointers are chased with a visited-offset set and a jump budget so
//! hostile messages cannot loop the decoder.

use std::net::Ipv4Addr;

use crate::protocol::wire_types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed, or carries a non-zero
    /// response code (such messages must be silently ignored, RFC
    /// 6762 section 18.11).
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;

        if wire_header.header.rcode != Rcode::NoError {
            return Err(Error::ResponseCodeNotZero {
                rcode: wire_header.header.rcode,
            });
        }

        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort)?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort)?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let at = buffer.position;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort { at })?;
        let raw_class = buffer.next_u16().ok_or(Error::QuestionTooShort { at })?;

        Ok(Self {
            name,
            qtype,
            qclass: QueryClass::from(raw_class & CLASS_VALUE_MASK),
            unicast_response: raw_class & CLASS_FLAG_MASK != 0,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let at = buffer.position;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort { at })?;
        let raw_class = buffer
            .next_u16()
            .ok_or(Error::ResourceRecordTooShort { at })?;
        let ttl = buffer
            .next_u32()
            .ok_or(Error::ResourceRecordTooShort { at })?;
        let rdlength = buffer
            .next_u16()
            .ok_or(Error::ResourceRecordTooShort { at })?;

        let rdata_start = buffer.position;

        if buffer.remaining() < usize::from(rdlength) {
            return Err(Error::ResourceRecordTooShort { at: rdata_start });
        }

        let mut raw_rdata = || {
            if let Some(octets) = buffer.take(rdlength as usize) {
                Ok(octets.to_vec())
            } else {
                Err(Error::ResourceRecordTooShort { at: rdata_start })
            }
        };

        // for records which include domain names, deserialise them to
        // expand pointers.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer
                        .next_u32()
                        .ok_or(Error::ResourceRecordTooShort { at: rdata_start })?,
                ),
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: raw_rdata()?,
            },
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer
                    .next_u16()
                    .ok_or(Error::ResourceRecordTooShort { at: rdata_start })?,
                weight: buffer
                    .next_u16()
                    .ok_or(Error::ResourceRecordTooShort { at: rdata_start })?,
                port: buffer
                    .next_u16()
                    .ok_or(Error::ResourceRecordTooShort { at: rdata_start })?,
                target: DomainName::deserialise(buffer)?,
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: raw_rdata()?,
            },
        };

        let rdata_stop = buffer.position;

        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                cache_flush: raw_class & CLASS_FLAG_MASK != 0,
                rclass: RecordClass::from(raw_class & CLASS_VALUE_MASK),
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid { at: rdata_start })
        }
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut chase = PointerChase::default();
        Self::deserialise_inner(buffer, &mut chase)
    }

    fn deserialise_inner(
        buffer: &mut ConsumableBuffer,
        chase: &mut PointerChase,
    ) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);

        loop {
            let at = buffer.position;
            let size = buffer.next_u8().ok_or(Error::NameTooShort { at })?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Vec::new());
                    break;
                }

                if let Some(os) = buffer.take(size as usize) {
                    octets.extend_from_slice(os);
                    labels.push(os.to_vec());
                } else {
                    return Err(Error::NameTooShort { at });
                }

                if octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(Error::NameTooLong { at });
                }
            } else if size >= 0b1100_0000 {
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::NameTooShort { at })?;
                let target = usize::from(u16::from_be_bytes([hi, lo]));

                chase.jump(at, target, buffer.len())?;

                let mut rest = Self::deserialise_inner(&mut buffer.at_offset(target), chase)?;
                if octets.len() + rest.octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(Error::NameTooLong { at });
                }
                octets.append(&mut rest.octets);
                labels.append(&mut rest.labels);
                break;
            } else {
                return Err(Error::LabelInvalid { at });
            }
        }

        Ok(DomainName { octets, labels })
    }
}

/// Bookkeeping for a single name's pointer chase: every pointer target
/// may be visited at most once, and no more than `POINTER_JUMP_LIMIT`
/// jumps are followed in total.
#[derive(Default)]
struct PointerChase {
    visited: Vec<usize>,
}

impl PointerChase {
    fn jump(&mut self, at: usize, target: usize, buffer_len: usize) -> Result<(), Error> {
        if target >= buffer_len {
            Err(Error::PointerOutOfRange { at, target })
        } else if self.visited.contains(&target) {
            Err(Error::PointerLoop { at, target })
        } else if self.visited.len() >= POINTER_JUMP_LIMIT {
            Err(Error::TooManyPointers { at })
        } else {
            self.visited.push(target);
            Ok(())
        }
    }
}

/// Errors encountered when parsing a datagram.  The `at` fields give
/// the offset into the datagram where the problem was detected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort,

    /// The header carries a non-zero RCODE; mDNS receivers must
    /// silently ignore such messages.
    ResponseCodeNotZero { rcode: Rcode },

    /// A question ends with an incomplete field.
    QuestionTooShort { at: usize },

    /// A resource record ends with an incomplete field, or its
    /// rdlength overruns the message.
    ResourceRecordTooShort { at: usize },

    /// A resource record's rdata did not occupy exactly rdlength
    /// octets.
    ResourceRecordInvalid { at: usize },

    /// A name is incomplete.
    NameTooShort { at: usize },

    /// A name is over 255 octets in size.
    NameTooLong { at: usize },

    /// A label length octet is in the reserved 64..192 range.
    LabelInvalid { at: usize },

    /// A compression pointer points outside the message.
    PointerOutOfRange { at: usize, target: usize },

    /// A compression pointer revisits an already-visited offset.
    PointerLoop { at: usize, target: usize },

    /// A name needed more than `POINTER_JUMP_LIMIT` pointer jumps.
    TooManyPointers { at: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted => write!(f, "datagram too short to be a DNS message"),
            Error::HeaderTooShort => write!(f, "header too short"),
            Error::ResponseCodeNotZero { rcode } => {
                write!(f, "non-zero response code {rcode}")
            }
            Error::QuestionTooShort { at } => write!(f, "question too short (offset {at})"),
            Error::ResourceRecordTooShort { at } => {
                write!(f, "resource record too short (offset {at})")
            }
            Error::ResourceRecordInvalid { at } => {
                write!(f, "resource record malformed (offset {at})")
            }
            Error::NameTooShort { at } => write!(f, "name too short (offset {at})"),
            Error::NameTooLong { at } => write!(f, "name over 255 octets (offset {at})"),
            Error::LabelInvalid { at } => write!(f, "invalid label length (offset {at})"),
            Error::PointerOutOfRange { at, target } => {
                write!(f, "pointer at offset {at} to {target} is outside the message")
            }
            Error::PointerLoop { at, target } => {
                write!(f, "pointer at offset {at} revisits offset {target}")
            }
            Error::TooManyPointers { at } => {
                write!(f, "too many compression pointers (offset {at})")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self { octets, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.octets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.octets.len().saturating_sub(self.position)
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_types::test_util::*;

    #[test]
    fn parses_a_simple_query() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, // ID
            0, 0, // flags
            0, 1, // QDCOUNT
            0, 0, 0, 0, 0, 0, // other counts
            7, b'p', b'r', b'i', b'n', b't', b'e', b'r',
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, // QTYPE A
            0, 1, // QCLASS IN
        ];

        let message = Message::from_octets(&octets).unwrap();
        assert!(!message.header.is_response);
        assert_eq!(1, message.questions.len());
        assert_eq!(domain("printer.local."), message.questions[0].name);
        assert_eq!(QueryType::Record(RecordType::A), message.questions[0].qtype);
        assert!(!message.questions[0].unicast_response);
    }

    #[test]
    fn decodes_the_unicast_response_bit() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 12, // QTYPE PTR
            0b1000_0000, 1, // QU bit + IN
        ];

        let message = Message::from_octets(&octets).unwrap();
        assert!(message.questions[0].unicast_response);
        assert_eq!(
            QueryClass::Record(RecordClass::IN),
            message.questions[0].qclass
        );
    }

    #[test]
    fn decodes_the_cache_flush_bit() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0b1000_0100, 0, 0, 0, 0, 1, 0, 0, 0, 0,
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, // TYPE A
            0b1000_0000, 1, // cache-flush + IN
            0, 0, 17, 148, // TTL 4500
            0, 4, // RDLENGTH
            192, 168, 1, 50,
        ];

        let message = Message::from_octets(&octets).unwrap();
        let rr = &message.answers[0];
        assert!(rr.cache_flush);
        assert_eq!(RecordClass::IN, rr.rclass);
        assert_eq!(4500, rr.ttl);
    }

    #[test]
    fn expands_compression_pointers() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0,
            // question 1: "local."
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, 0, 1,
            // question 2: "printer." + pointer to "local."
            7, b'p', b'r', b'i', b'n', b't', b'e', b'r',
            0b1100_0000, 12,
            0, 1, 0, 1,
        ];

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(domain("printer.local."), message.questions[1].name);
    }

    #[test]
    fn rejects_a_pointer_loop() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
            0b1100_0000, 12, // points at itself
            0, 1, 0, 1,
        ];

        assert_eq!(
            Err(Error::PointerLoop { at: 12, target: 12 }),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn rejects_a_two_step_pointer_loop() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
            0b1100_0000, 14, // 12: jump to 14
            0b1100_0000, 12, // 14: jump back to 12
            0, 1, 0, 1,
        ];

        assert!(matches!(
            Message::from_octets(&octets),
            Err(Error::PointerLoop { .. })
        ));
    }

    #[test]
    fn rejects_a_pointer_outside_the_message() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
            0b1100_0011, 0xe8, // offset 1000
            0, 1, 0, 1,
        ];

        assert_eq!(
            Err(Error::PointerOutOfRange { at: 12, target: 1000 }),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn rejects_a_reserved_label_length() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
            0b1000_0001, b'x', 0,
            0, 1, 0, 1,
        ];

        assert_eq!(
            Err(Error::LabelInvalid { at: 12 }),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn rejects_nonzero_rcode() {
        let octets = vec![0, 0, 0, 0b0000_0011, 0, 0, 0, 0, 0, 0, 0, 0];

        assert_eq!(
            Err(Error::ResponseCodeNotZero {
                rcode: Rcode::NameError
            }),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn accepts_a_truncated_flag() {
        let octets = vec![0, 0, 0b0000_0010, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let message = Message::from_octets(&octets).unwrap();
        assert!(message.header.is_truncated);
    }

    #[test]
    fn rejects_a_truncated_header() {
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[0]));
        assert_eq!(
            Err(Error::HeaderTooShort),
            Message::from_octets(&[0, 0, 0, 0, 0, 1])
        );
    }

    #[test]
    fn rejects_counts_longer_than_the_message() {
        let octets = vec![0, 0, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0];

        assert!(matches!(
            Message::from_octets(&octets),
            Err(Error::NameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_rdata_overrunning_the_message() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0b1000_0100, 0, 0, 0, 0, 1, 0, 0, 0, 0,
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, 0, 1,
            0, 0, 0, 120,
            0, 200, // RDLENGTH far beyond the end
            192, 168, 1, 50,
        ];

        assert!(matches!(
            Message::from_octets(&octets),
            Err(Error::ResourceRecordTooShort { .. })
        ));
    }

    #[test]
    fn rejects_rdlength_mismatching_parsed_rdata() {
        #[rustfmt::skip]
        let octets = vec![
            0, 0, 0b1000_0100, 0, 0, 0, 0, 1, 0, 0, 0, 0,
            5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, 0, 1,
            0, 0, 0, 120,
            0, 6, // RDLENGTH 6, but an A record consumes 4
            192, 168, 1, 50, 0, 0,
        ];

        assert!(matches!(
            Message::from_octets(&octets),
            Err(Error::ResourceRecordInvalid { .. })
        ));
    }

    #[test]
    fn service_instance_labels_are_opaque() {
        // a label with a space and UTF-8, as DNS-SD instance names are
        let mut octets = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        let instance = "Caf\u{e9} Printer".as_bytes();
        octets.push(instance.len() as u8);
        octets.extend_from_slice(instance);
        octets.extend_from_slice(&[5, b'_', b'h', b't', b't', b'p', 0]);
        octets.extend_from_slice(&[0, 33, 0, 1]);

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(
            instance.to_vec(),
            message.questions[0].name.labels[0]
        );
    }
}
