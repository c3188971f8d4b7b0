//! Shared constants for flowstamp
//!
//! These constants fix the log geometry, the calibration parameters and the
//! layout of the in-band flow records written by instrumented producers.

// ============================================================================
// Log Storage
// ============================================================================

/// Number of event records the log can hold before it saturates
pub const LOG_CAPACITY: usize = 500_000;

// ============================================================================
// Calibration
// ============================================================================

/// Number of initial record calls used to sample timestamp overhead
pub const CALIBRATION_SAMPLES: usize = 100;

/// Percentage of samples discarded from each tail of the sorted sample list
pub const TRIM_PERCENT: u8 = 5;

/// Microseconds per second, used when normalizing timestamps
pub const MICROS_PER_SEC: i64 = 1_000_000;

// ============================================================================
// In-band Flow Records
// ============================================================================

/// Width of one word in the in-band marker and flow records
pub const WORD_SIZE: usize = 4;

/// Minimum width of the all-ones marker preceding flow records
pub const MARKER_WIDTH: usize = 8;

/// Value of every word in the marker
pub const MARKER_WORD: u32 = 0xffff_ffff;

/// Distance between the starts of consecutive flow records
pub const RECORD_STRIDE: usize = 16;

/// Bytes of a flow record that carry data: worker id then sequence
pub const RECORD_PAYLOAD: usize = 8;

// ============================================================================
// Protocol Numbers (from linux/in.h)
// ============================================================================

/// TCP protocol number
pub const IPPROTO_TCP: u8 = 6;

/// UDP protocol number
pub const IPPROTO_UDP: u8 = 17;

/// Length of a UDP header
pub const UDP_HEADER_LEN: usize = 8;

/// Minimum length of an IPv4 or TCP header
pub const MIN_HEADER_LEN: usize = 20;

// ============================================================================
// TCP Flags (byte 13 of the TCP header)
// ============================================================================

pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_ACK: u8 = 0x10;

// ============================================================================
// Diagnostic Counter Indices
// ============================================================================

/// Number of records written to the log
pub const STAT_RECORDED: usize = 0;

/// Number of record calls rejected because the log was full
pub const STAT_CAPACITY_EXHAUSTED: usize = 1;

/// Number of payloads dropped because no marker was found
pub const STAT_MALFORMED_PAYLOADS: usize = 2;

/// Number of TCP control segments skipped before scanning
pub const STAT_CONTROL_SEGMENTS: usize = 3;

/// Number of packets whose headers could not be parsed
pub const STAT_UNPARSED_PACKETS: usize = 4;

/// Number of times storage was allocated by the recording path
pub const STAT_IMPLICIT_INITS: usize = 5;

/// Total number of diagnostic counters
pub const MAX_STATS: usize = 6;
