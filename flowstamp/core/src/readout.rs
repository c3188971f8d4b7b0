//! Human-readable record export
//!
//! Each record renders as one line with a fixed field order:
//!
//! ```text
//! 0    id 5  seq 17       thread 3        ts 1700000000.000042 x2
//! ```
//!
//! slot index, probe id, sequence, worker id, seconds, microseconds and
//! repeat count. Downstream scripts parse these lines by field position, so
//! the layout must not change.

use crate::clock::Clock;
use crate::error::ReadoutError;
use crate::tracer::Tracer;
use flowstamp_common::{EventRecord, Timeval};
use std::fmt;
use std::io::{self, Write};

/// Display adapter rendering a record in the fixed line format
#[derive(Clone, Copy, Debug)]
pub struct TextLine<'a>(pub &'a EventRecord);

impl fmt::Display for TextLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        write!(
            f,
            "{:<4} id {:<2} seq {:<8} thread {:<8} ts {}.{:06} x{}",
            record.slot_index,
            record.probe_id,
            record.sequence,
            record.worker_id,
            record.timestamp.secs,
            record.timestamp.micros,
            record.repeat_count
        )
    }
}

const FIELD_COUNT: usize = 10;
const KEYWORDS: [(usize, &str); 4] = [(1, "id"), (3, "seq"), (5, "thread"), (7, "ts")];

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ReadoutError> {
    value.parse().map_err(|_| ReadoutError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

/// Parse one rendered line back into a record
pub fn parse_line(line: &str) -> Result<EventRecord, ReadoutError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(ReadoutError::FieldCount {
            expected: FIELD_COUNT,
            found: fields.len(),
        });
    }

    for (position, expected) in KEYWORDS {
        if fields[position] != expected {
            return Err(ReadoutError::Keyword {
                position,
                expected,
                found: fields[position].to_string(),
            });
        }
    }

    let (secs, micros) = fields[8]
        .split_once('.')
        .ok_or_else(|| ReadoutError::InvalidValue {
            field: "timestamp",
            value: fields[8].to_string(),
        })?;
    let micros: u32 = parse_field("microseconds", micros)?;
    if micros >= 1_000_000 {
        return Err(ReadoutError::InvalidValue {
            field: "microseconds",
            value: micros.to_string(),
        });
    }

    let repeat = fields[9]
        .strip_prefix('x')
        .ok_or_else(|| ReadoutError::InvalidValue {
            field: "repeat_count",
            value: fields[9].to_string(),
        })?;

    Ok(EventRecord {
        slot_index: parse_field("slot_index", fields[0])?,
        probe_id: parse_field("probe_id", fields[2])?,
        sequence: parse_field("sequence", fields[4])?,
        worker_id: parse_field("worker_id", fields[6])?,
        timestamp: Timeval {
            secs: parse_field("seconds", secs)?,
            micros,
        },
        repeat_count: parse_field("repeat_count", repeat)?,
    })
}

/// Exclusive read-out session over a tracer's log
///
/// Holding the session borrows the tracer mutably, so no recording happens
/// while records are read. [`Readout::finish`] clears the log afterwards.
pub struct Readout<'a, C: Clock> {
    tracer: &'a mut Tracer<C>,
}

impl<'a, C: Clock> Readout<'a, C> {
    pub fn new(tracer: &'a mut Tracer<C>) -> Self {
        Self { tracer }
    }

    pub fn len(&self) -> usize {
        self.tracer.record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<EventRecord> {
        self.tracer.get_record(index).ok()
    }

    pub fn records(&self) -> impl Iterator<Item = EventRecord> + '_ {
        self.tracer.records()
    }

    /// Write every record as one text line, returning the number written
    pub fn write_text<W: Write>(&self, mut out: W) -> io::Result<usize> {
        let mut written = 0;
        for record in self.records() {
            writeln!(out, "{}", TextLine(&record))?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    /// End the session and clear the log
    pub fn finish(self) {
        self.tracer.reset();
    }
}
