//! Flow segment scanning
//!
//! Producers tag a payload with an all-ones marker followed by fixed-stride
//! flow records:
//!
//! ```text
//! | ff ff ff ff ff ff ff ff (..ff) | worker | sequence | pad (8) | worker | sequence | pad | ...
//!   marker, 8 bytes minimum           one record = 16 bytes
//! ```
//!
//! The scanner finds the marker, walks the records and collapses runs of
//! identical `(sequence, worker)` pairs into one event with a repeat count.
//! Every read goes through `slice::get`, so a short or corrupt payload can
//! end a scan early but never read past its end.

use crate::error::ScanError;
use flowstamp_common::constants::{MARKER_WIDTH, RECORD_PAYLOAD, RECORD_STRIDE, WORD_SIZE};

/// One decoded flow record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FlowTag {
    pub sequence: u32,
    pub worker_id: u32,
}

/// Whether a full marker starts at `at`
#[inline(always)]
fn marker_at(payload: &[u8], at: usize) -> bool {
    at.checked_add(MARKER_WIDTH)
        .and_then(|end| payload.get(at..end))
        .is_some_and(|window| window.iter().all(|&byte| byte == 0xff))
}

/// Offset of the first flow record, or `None` if no marker is present
///
/// The marker is searched at word-aligned offsets. A marker longer than the
/// minimum is then followed byte by byte so the records start right after
/// its last all-ones byte.
pub fn locate_records(payload: &[u8]) -> Option<usize> {
    let mut cursor = (0..payload.len())
        .step_by(WORD_SIZE)
        .find(|&at| marker_at(payload, at))?;

    while marker_at(payload, cursor + 1) {
        cursor += 1;
    }

    Some(cursor + MARKER_WIDTH)
}

/// Iterator over the flow records in `bytes`
///
/// Stops once fewer than 8 bytes remain; a trailing record without its
/// padding still counts.
#[derive(Clone, Debug)]
pub struct FlowRecords<'a> {
    chunks: std::slice::Chunks<'a, u8>,
}

/// Walk the fixed-stride records at the start of `bytes`
pub fn records(bytes: &[u8]) -> FlowRecords<'_> {
    FlowRecords {
        chunks: bytes.chunks(RECORD_STRIDE),
    }
}

impl Iterator for FlowRecords<'_> {
    type Item = FlowTag;

    fn next(&mut self) -> Option<FlowTag> {
        let data = self.chunks.next()?.first_chunk::<RECORD_PAYLOAD>()?;
        let [w0, w1, w2, w3, s0, s1, s2, s3] = *data;
        Some(FlowTag {
            worker_id: u32::from_ne_bytes([w0, w1, w2, w3]),
            sequence: u32::from_ne_bytes([s0, s1, s2, s3]),
        })
    }
}

/// Coalescing adapter: yields each run of equal tags with its length
#[derive(Clone, Debug)]
pub struct Runs<I> {
    tags: I,
    pending: Option<(FlowTag, u32)>,
}

/// Collapse consecutive equal tags into `(tag, count)` runs
pub fn coalesce<I: Iterator<Item = FlowTag>>(tags: I) -> Runs<I> {
    Runs { tags, pending: None }
}

impl<I: Iterator<Item = FlowTag>> Iterator for Runs<I> {
    type Item = (FlowTag, u32);

    fn next(&mut self) -> Option<(FlowTag, u32)> {
        loop {
            let Some(tag) = self.tags.next() else {
                return self.pending.take();
            };
            match &mut self.pending {
                Some((current, count)) if *current == tag => *count = count.saturating_add(1),
                pending => {
                    if let Some(done) = pending.replace((tag, 1)) {
                        return Some(done);
                    }
                }
            }
        }
    }
}

/// Scan a payload for flow records
///
/// Returns the coalesced runs in wire order. A payload without a marker
/// fails with `MarkerNotFound`; a marker with no full record behind it
/// yields no runs.
pub fn scan(payload: &[u8]) -> Result<Runs<FlowRecords<'_>>, ScanError> {
    let start = locate_records(payload).ok_or(ScanError::MarkerNotFound)?;
    let body = payload.get(start..).unwrap_or_default();
    Ok(coalesce(records(body)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build `marker_len` bytes of 0xff followed by one 16-byte record per tag
    pub(crate) fn tagged_payload(prefix: &[u8], marker_len: usize, tags: &[(u32, u32)]) -> Vec<u8> {
        let mut buf = prefix.to_vec();
        buf.extend(std::iter::repeat(0xff).take(marker_len));
        for &(sequence, worker_id) in tags {
            buf.extend_from_slice(&worker_id.to_ne_bytes());
            buf.extend_from_slice(&sequence.to_ne_bytes());
            buf.extend_from_slice(&[0u8; 8]);
        }
        buf
    }

    fn runs(payload: &[u8]) -> Vec<(u32, u32, u32)> {
        scan(payload)
            .unwrap()
            .map(|(tag, count)| (tag.sequence, tag.worker_id, count))
            .collect()
    }

    #[test]
    fn test_coalesces_consecutive_pairs() {
        let payload = tagged_payload(&[], 8, &[(5, 1), (5, 1), (5, 1), (6, 1), (6, 1)]);
        assert_eq!(runs(&payload), vec![(5, 1, 3), (6, 1, 2)]);
    }

    #[test]
    fn test_non_adjacent_pairs_are_separate_runs() {
        let payload = tagged_payload(&[], 8, &[(5, 1), (5, 2), (5, 1)]);
        assert_eq!(runs(&payload), vec![(5, 1, 1), (5, 2, 1), (5, 1, 1)]);
    }

    #[test]
    fn test_missing_marker() {
        let payload = vec![0u8; 64];
        assert_eq!(scan(&payload).err(), Some(ScanError::MarkerNotFound));
        assert_eq!(scan(&[]).err(), Some(ScanError::MarkerNotFound));
    }

    #[test]
    fn test_truncated_marker_at_end() {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(&[0xff; 7]);
        assert_eq!(scan(&payload).err(), Some(ScanError::MarkerNotFound));
    }

    #[test]
    fn test_marker_only_yields_nothing() {
        let payload = tagged_payload(&[], 8, &[]);
        assert_eq!(runs(&payload), vec![]);

        // Fewer than 8 bytes after the marker is not a record either
        let mut payload = tagged_payload(&[], 8, &[]);
        payload.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0]);
        assert_eq!(runs(&payload), vec![]);
    }

    #[test]
    fn test_marker_after_aligned_prefix() {
        let payload = tagged_payload(&[0xab; 12], 8, &[(9, 4)]);
        assert_eq!(locate_records(&payload), Some(20));
        assert_eq!(runs(&payload), vec![(9, 4, 1)]);
    }

    #[test]
    fn test_long_marker_is_absorbed() {
        let payload = tagged_payload(&[], 13, &[(9, 4), (9, 4)]);
        assert_eq!(locate_records(&payload), Some(13));
        assert_eq!(runs(&payload), vec![(9, 4, 2)]);
    }

    #[test]
    fn test_unaligned_short_marker_is_not_found() {
        // An 8-byte marker at offset 2 never covers a word-aligned 8-byte window
        let payload = tagged_payload(&[0u8; 2], 8, &[(1, 1)]);
        assert_eq!(locate_records(&payload), None);
    }

    #[test]
    fn test_trailing_record_without_padding() {
        let mut payload = tagged_payload(&[], 8, &[(1, 1)]);
        payload.extend_from_slice(&2u32.to_ne_bytes());
        payload.extend_from_slice(&1u32.to_ne_bytes());
        assert_eq!(runs(&payload), vec![(1, 1, 1), (1, 2, 1)]);
    }

    #[test]
    fn test_zero_pair_counts_as_a_run() {
        let payload = tagged_payload(&[], 8, &[(0, 0), (0, 0)]);
        assert_eq!(runs(&payload), vec![(0, 0, 2)]);
    }
}
