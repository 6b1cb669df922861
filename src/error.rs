//! Error types for the collector.
//!
//! A single crate-level [`Error`] covers every failure mode of the pipeline.
//! Conversion problems carry a [`ConvertErrorKind`] describing why a raw PDU
//! value could not be coerced to its configured syntax.

/// Result type alias using the collector's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a raw SNMP value could not be converted to its configured syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertErrorKind {
    /// The PDU value is not numeric but the syntax requires a number.
    NonNumeric { pdu_type: String },
    /// A negative integer was supplied for an unsigned syntax.
    Negative { value: i64 },
    /// A Counter64 value does not fit in a signed 64-bit integer.
    OverflowsI64 { value: u64 },
}

impl std::fmt::Display for ConvertErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonNumeric { pdu_type } => {
                write!(f, "cannot convert {pdu_type} value to a number")
            }
            Self::Negative { value } => {
                write!(f, "negative value {value} cannot be converted to unsigned")
            }
            Self::OverflowsI64 { value } => {
                write!(f, "value {value} overflows a signed 64-bit integer")
            }
        }
    }
}

/// The main error type for all collector operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or unloadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An SNMP request against a device failed.
    #[error("snmp request to {hostname} ({object}) failed: {source}")]
    Snmp {
        hostname: String,
        object: String,
        #[source]
        source: Box<async_snmp::Error>,
    },

    /// Dialing a new SNMP session failed.
    #[error("snmp connect {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: Box<async_snmp::Error>,
    },

    /// The connection pool has been shut down.
    #[error("connection pool closed")]
    PoolClosed,

    /// Waiting for a per-device concurrency slot exceeded the deadline.
    #[error("timed out acquiring connection slot for {hostname}")]
    PoolTimeout { hostname: String },

    /// An object definition has no attributes to poll.
    #[error("object definition {object:?} has no attributes")]
    NoAttributes { object: String },

    /// A raw PDU value could not be coerced to its configured syntax.
    #[error("oid {oid} (attr {attribute}, syntax {syntax}): {kind}")]
    Conversion {
        oid: String,
        attribute: String,
        syntax: String,
        kind: ConvertErrorKind,
    },

    /// The trap listener could not bind or receive.
    #[error("trap listener {addr}: {source}")]
    TrapListener {
        addr: String,
        #[source]
        source: Box<async_snmp::Error>,
    },

    /// A component that has been stopped cannot be started again.
    #[error("{component} has been stopped")]
    Stopped { component: &'static str },

    /// A component was started twice.
    #[error("{component} is already running")]
    AlreadyRunning { component: &'static str },

    /// Output serialization failed.
    #[error("format: {0}")]
    Format(#[from] serde_json::Error),

    /// Transport or file-system I/O failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
