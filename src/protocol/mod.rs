//! DNS wire format, with the mDNS and DNS-SD specializations this
//! library needs: the cache-flush and unicast-response class bits,
//! opaque UTF-8 service-instance labels, name compression on encode,
//! and loop-proof pointer chasing on decode.
//!
//! The encoding is defined in RFC 1035 section 4; the mDNS deltas are
//! in RFC 6762 section 18 and the DNS-SD naming conventions in RFC
//! 6763.

pub mod deserialise;
pub mod serialise;
pub mod wire_types;
