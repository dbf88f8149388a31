//! Error types for snare-dns.

use std::net::SocketAddr;
use std::path::PathBuf;

use hickory_proto::rr::RecordType;
use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Failed to parse address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Zone description could not be parsed.
    #[error(transparent)]
    ZoneParse(#[from] ZoneParseError),

    /// Zone file does not exist.
    #[error("zone file {0:?} does not exist")]
    MissingZoneFile(PathBuf),

    /// Bad-address pool file is missing or unusable.
    #[error("bad-address pool {path:?}: {reason}")]
    BadAddressPool {
        /// Pool file path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Classification store could not be read or written.
    #[error("classification store {path:?}: {reason}")]
    ClassificationStore {
        /// Store file path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Upstream resolver returned something unusable.
    #[error("upstream {addr}: {reason}")]
    Upstream {
        /// Upstream resolver address.
        addr: SocketAddr,
        /// What went wrong.
        reason: String,
    },

    /// Upstream resolver did not answer in time.
    #[error("upstream {0} timed out")]
    UpstreamTimeout(SocketAddr),

    /// Synthetic answer could not be built.
    #[error("injection failed: {0}")]
    Injection(String),
}

/// A zone line that could not be turned into a record.
#[derive(Debug, Error)]
#[error("error processing zone line {line_number} ({cause}): {line:?}")]
pub struct ZoneParseError {
    /// 1-based number of the physical line the logical record starts on.
    pub line_number: usize,
    /// The logical line, continuations joined.
    pub line: String,
    /// Underlying cause.
    #[source]
    pub cause: RecordError,
}

/// Reasons a single record definition is rejected.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Line does not split into name, type and arguments.
    #[error("expected `<name> <type> <args>`")]
    MissingFields,

    /// Record type name is not known.
    #[error("unknown record type {0:?}")]
    UnknownType(String),

    /// Argument tail starts with `[` but is not a JSON array.
    #[error("malformed argument list: {0}")]
    MalformedArguments(#[from] serde_json::Error),

    /// Wrong number of arguments for the record type.
    #[error("{rtype} takes {expected} argument(s), got {got}")]
    Arity {
        /// Record type.
        rtype: RecordType,
        /// Accepted argument counts.
        expected: &'static str,
        /// Supplied argument count.
        got: usize,
    },

    /// An argument has the wrong shape or value.
    #[error("invalid argument {index} for {rtype}: {reason}")]
    InvalidArgument {
        /// Record type.
        rtype: RecordType,
        /// 0-based argument position.
        index: usize,
        /// What went wrong.
        reason: String,
    },

    /// Owner or target name is not a valid domain name.
    #[error("invalid name: {0}")]
    InvalidName(#[from] hickory_proto::ProtoError),
}
