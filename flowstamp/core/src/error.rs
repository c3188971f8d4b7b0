//! Structured error types for the event log
//!
//! Every failure in the recording path is reported through these values;
//! none of them is allowed to abort the calling pipeline.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("event log capacity of {capacity} records exhausted")]
    CapacityExhausted { capacity: usize },

    #[error("no record at index {index} (log holds {count})")]
    NotFound { index: usize, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    #[error("no flow marker before end of payload")]
    MarkerNotFound,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: needed {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),

    #[error("unsupported transport protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("TCP control segment without payload (flags {flags:#04x})")]
    ControlSegment { flags: u8 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadoutError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("expected keyword '{expected}' at field {position}, found '{found}'")]
    Keyword {
        position: usize,
        expected: &'static str,
        found: String,
    },

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },
}
