//! The error taxonomy for the public API.  Each variant tags a
//! failure class; OS errors are wrapped with the operation that hit
//! them rather than swallowed, including on close paths.

use std::fmt;
use std::io;

use crate::protocol::deserialise;
use crate::protocol::serialise;
use crate::protocol::wire_types::ResourceRecord;

#[derive(Debug)]
pub enum Error {
    /// A socket operation failed.  `op` names the operation
    /// (create/bind/join/send/recv/close) and `source` is the OS
    /// error.
    Network {
        op: &'static str,
        source: io::Error,
    },

    /// Invalid input to the public API: a malformed name, an
    /// unsupported record type, an empty interface selection, a
    /// non-positive rate limit.
    Validation {
        field: &'static str,
        msg: String,
    },

    /// A received datagram could not be parsed.  These are logged and
    /// dropped on the receive path; the variant exists for callers
    /// who parse octets themselves.
    WireFormat(deserialise::Error),

    /// A message could not be encoded.
    Encoding(serialise::Error),

    /// The registration lost its probe tie-break twice (or never
    /// concluded) and has been withdrawn.
    Conflict {
        instance_name: String,
    },

    /// An operation that needed a conclusion reached its deadline
    /// without one.  Distinct from explicit cancellation.
    Timeout {
        op: &'static str,
    },

    /// The caller cancelled the operation.  For a query this carries
    /// whatever had been collected before the cancellation landed.
    Cancelled {
        partial: Vec<ResourceRecord>,
    },
}

impl Error {
    pub(crate) fn network(op: &'static str, source: io::Error) -> Self {
        Error::Network { op, source }
    }

    pub(crate) fn validation(field: &'static str, msg: impl Into<String>) -> Self {
        Error::Validation {
            field,
            msg: msg.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Error::Cancelled {
            partial: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Network { op, source } => write!(f, "network error during {op}: {source}"),
            Error::Validation { field, msg } => write!(f, "invalid {field}: {msg}"),
            Error::WireFormat(error) => write!(f, "malformed message: {error}"),
            Error::Encoding(error) => write!(f, "could not encode message: {error}"),
            Error::Conflict { instance_name } => {
                write!(f, "name conflict registering '{instance_name}'")
            }
            Error::Timeout { op } => write!(f, "{op} timed out"),
            Error::Cancelled { partial } => {
                write!(f, "cancelled ({} records collected)", partial.len())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network { source, .. } => Some(source),
            Error::WireFormat(error) => Some(error),
            Error::Encoding(error) => Some(error),
            _ => None,
        }
    }
}

impl From<deserialise::Error> for Error {
    fn from(error: deserialise::Error) -> Self {
        Error::WireFormat(error)
    }
}

impl From<serialise::Error> for Error {
    fn from(error: serialise::Error) -> Self {
        Error::Encoding(error)
    }
}
