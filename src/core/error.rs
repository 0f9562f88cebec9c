use std::net::IpAddr;
use thiserror::Error;

use crate::core::framing::ExchangeKind;

/// Crate-level error for configuration, rule files and the CLI
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rule file or remote payload could not be interpreted
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Synchronization with the kernel failed
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Which end of a rule a range belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Endpoint {
    #[strum(serialize = "source")]
    Source,
    #[strum(serialize = "destination")]
    Destination,
}

/// Start or end of a port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Bound {
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "end")]
    End,
}

/// A rule failed local validation. Never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{endpoint} address range start {start} is greater than end {end}")]
    AddressOrder {
        endpoint: Endpoint,
        start: IpAddr,
        end: IpAddr,
    },

    #[error("{endpoint} address range mixes IPv4 and IPv6 ({start} - {end})")]
    AddressFamilyMismatch {
        endpoint: Endpoint,
        start: IpAddr,
        end: IpAddr,
    },

    #[error("{endpoint} port range {bound} {port} is outside 0-65535")]
    PortOutOfRange {
        endpoint: Endpoint,
        bound: Bound,
        port: u32,
    },

    #[error("{endpoint} port range start {start} is greater than end {end}")]
    PortOrder {
        endpoint: Endpoint,
        start: u32,
        end: u32,
    },

    #[error("rule #{index} (id {id}): {source}")]
    InvalidRule {
        index: usize,
        id: u32,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("rule id {id} is used more than once")]
    DuplicateId { id: u32 },

    #[error("too many rules: {count} (max {max})")]
    TooManyRules { count: usize, max: usize },
}

impl ValidationError {
    /// Wire field the violated constraint belongs to
    pub fn field(&self) -> &'static str {
        match self {
            Self::AddressOrder { endpoint, .. } | Self::AddressFamilyMismatch { endpoint, .. } => {
                match endpoint {
                    Endpoint::Source => "source_address_start",
                    Endpoint::Destination => "destination_address_start",
                }
            }
            Self::PortOutOfRange {
                endpoint, bound, ..
            } => match (endpoint, bound) {
                (Endpoint::Source, Bound::Start) => "source_port_start",
                (Endpoint::Source, Bound::End) => "source_port_end",
                (Endpoint::Destination, Bound::Start) => "destination_port_start",
                (Endpoint::Destination, Bound::End) => "destination_port_end",
            },
            Self::PortOrder { endpoint, .. } => match endpoint {
                Endpoint::Source => "source_port_start",
                Endpoint::Destination => "destination_port_start",
            },
            Self::InvalidRule { source, .. } => source.field(),
            Self::DuplicateId { .. } => "id",
            Self::TooManyRules { .. } => "rules",
        }
    }
}

/// Channel-level failure. Always surfaced, never retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Socket construction failed at startup; the channel stays degraded
    #[error("netlink socket not initialized: {0}")]
    NotInitialized(String),

    #[error("no response from kernel within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Reply datagram did not fit in the receive buffer
    #[error("kernel response of {actual} bytes exceeds the {limit}-byte receive buffer")]
    ResponseTooLarge { limit: usize, actual: usize },

    #[error("socket {op} failed: {message}")]
    IoFailure {
        op: &'static str,
        errno: Option<i32>,
        message: String,
    },
}

/// Malformed or unexpected envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("{kind} response truncated: expected at least {expected} bytes, got {actual}")]
    TruncatedResponse {
        kind: ExchangeKind,
        expected: usize,
        actual: usize,
    },

    #[error("unexpected status code {0:#010x}")]
    UnexpectedStatus(u32),
}

/// Payload is not valid JSON, not the expected shape, or carries an unknown tag
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload is not a JSON array of objects (item #{index} is {found})")]
    UnexpectedShape { index: usize, found: &'static str },

    #[error("rule #{index}: missing field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("rule #{index}: field '{field}' {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("rule #{index}: unknown {field} tag '{value}'")]
    UnknownTag {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Failure of a fetch, or of the local pre-flight of an apply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("rules rejected locally: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to encode rules: {0}")]
    Encoding(PayloadError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("kernel returned an invalid configuration: {0}")]
    InvalidRemoteConfig(PayloadError),

    #[error("sync worker has stopped")]
    WorkerStopped,
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

impl TransportError {
    /// Translates the failure into an operator-facing message with suggestions.
    pub fn hint(&self) -> ErrorTranslation {
        use nix::errno::Errno;

        match self {
            Self::Timeout { timeout_ms } => ErrorTranslation::new(format!(
                "Kernel module did not answer within {timeout_ms} ms"
            ))
            .with_suggestion("Check that the filter module is loaded: lsmod")
            .with_suggestion("Raise receive_timeout_ms in config.json if the kernel is busy"),
            Self::ResponseTooLarge { actual, .. } => ErrorTranslation::new(format!(
                "Kernel response of {actual} bytes did not fit in the receive buffer"
            ))
            .with_suggestion("Raise receive_buffer_bytes in config.json"),
            Self::NotInitialized(msg) | Self::IoFailure { message: msg, .. } => {
                let errno = match self {
                    Self::IoFailure { errno, .. } => errno.map(Errno::from_raw),
                    _ => None,
                };
                let lower = msg.to_lowercase();

                if errno == Some(Errno::EPROTONOSUPPORT) || lower.contains("protocol not supported")
                {
                    return ErrorTranslation::new(
                        "Netlink family is not registered by any kernel module",
                    )
                    .with_suggestion("Load the filter module: sudo modprobe <module>")
                    .with_suggestion("Verify netlink_family in config.json matches the module");
                }

                if matches!(errno, Some(Errno::EPERM | Errno::EACCES))
                    || lower.contains("operation not permitted")
                    || lower.contains("permission denied")
                {
                    return ErrorTranslation::new("Insufficient permissions for the netlink socket")
                        .with_suggestion("Run as root or grant CAP_NET_ADMIN")
                        .with_suggestion("Binding to a multicast group usually requires root");
                }

                if errno == Some(Errno::ECONNREFUSED) || lower.contains("connection refused") {
                    return ErrorTranslation::new("Kernel module is not listening on this family")
                        .with_suggestion("Reload the filter module and retry");
                }

                ErrorTranslation::new(format!("Netlink communication error: {msg}"))
                    .with_suggestion("Check the log file for details")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
