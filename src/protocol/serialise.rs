//! Serialisation of DNS messages to the wire format.  See the
//! `wire_types` module for details of the format.

use std::collections::HashMap;

use crate::protocol::wire_types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn to_octets(self) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let qdcount = usize_to_u16(self.questions.len())?;
        let ancount = usize_to_u16(self.answers.len())?;
        let nscount = usize_to_u16(self.authority.len())?;
        let arcount = usize_to_u16(self.additional.len())?;

        self.header.serialise(buffer);
        buffer.write_u16(qdcount);
        buffer.write_u16(ancount);
        buffer.write_u16(nscount);
        buffer.write_u16(arcount);

        for question in self.questions {
            question.serialise(buffer);
        }
        for rr in self.answers {
            rr.serialise(buffer)?;
        }
        for rr in self.authority {
            rr.serialise(buffer)?;
        }
        for rr in self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        // octet 1
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 2
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        let flag = if self.unicast_response {
            CLASS_FLAG_MASK
        } else {
            0
        };

        self.name.serialise(buffer);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(flag | (CLASS_VALUE_MASK & u16::from(self.qclass)));
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let flag = if self.cache_flush { CLASS_FLAG_MASK } else { 0 };

        self.name.serialise(buffer);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(flag | (CLASS_VALUE_MASK & u16::from(self.rclass)));
        buffer.write_u32(self.ttl);

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        match self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.serialise(buffer),
            RecordTypeWithData::TXT { octets } => buffer.write_octets(&octets),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(priority);
                buffer.write_u16(weight);
                buffer.write_u16(port);
                // SRV targets SHOULD NOT be compressed on the wire
                // (RFC 6762 section 18.14)
                target.serialise_uncompressed(buffer);
            }
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(&octets),
        }

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl DomainName {
    /// Write the name, using a compression pointer if some
    /// already-written name shares a suffix (RFC 1035 section 4.1.4).
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.write_labels(buffer, true);
    }

    /// Write the name in full, never emitting a pointer.  The suffixes
    /// are still remembered, so later names may point into this one.
    pub fn serialise_uncompressed(&self, buffer: &mut WritableBuffer) {
        self.write_labels(buffer, false);
    }

    fn write_labels(&self, buffer: &mut WritableBuffer, compress: bool) {
        let mut suffix_start = 0;

        for label in &self.labels {
            if label.is_empty() {
                break;
            }

            let suffix = &self.octets[suffix_start..];
            if compress {
                if let Some(&offset) = buffer.name_offsets.get(suffix) {
                    buffer.write_u16(POINTER_TAG_MASK | offset);
                    return;
                }
            }

            // pointers only have 14 bits of offset, so suffixes
            // further into the message than that cannot be targets;
            // the first occurrence of a suffix stays the target
            if buffer.index() <= usize::from(POINTER_OFFSET_MASK) {
                #[allow(clippy::cast_possible_truncation)]
                let index = buffer.index() as u16;
                buffer
                    .name_offsets
                    .entry(suffix.to_vec())
                    .or_insert(index);
            }

            #[allow(clippy::cast_possible_truncation)]
            buffer.write_u8(label.len() as u8);
            buffer.write_octets(label);
            suffix_start += 1 + label.len();
        }

        buffer.write_u8(0);
    }
}

/// Tag bits marking a two-octet compression pointer.
pub const POINTER_TAG_MASK: u16 = 0b1100_0000_0000_0000;

/// The offset bits of a compression pointer.
pub const POINTER_OFFSET_MASK: u16 = !POINTER_TAG_MASK;

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which can be written to, for serialisation purposes.  It
/// remembers the offset of every name suffix it has written, which is
/// the extra state name compression needs.
pub struct WritableBuffer {
    pub octets: Vec<u8>,
    name_offsets: HashMap<Vec<u8>, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
            name_offsets: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}
