//! Capture file loading
//!
//! A capture is a flat sequence of frames, each one a probe-point
//! notification recorded from an instrumented pipeline:
//!
//! ```text
//! | probe_id: u16 BE | kind: u8 | len: u32 BE | body[len] |
//! ```
//!
//! - kind 0: raw payload, scanned for flow records
//! - kind 1: IPv4 packet, narrowed to its transport payload then scanned
//! - kind 2: direct values, body is `sequence, worker_id, repeat_count`
//!   as three u32 BE

use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use flowstamp_core::{Clock, ProbePoint, Tracer};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 7;

const KIND_PAYLOAD: u8 = 0;
const KIND_PACKET: u8 = 1;
const KIND_DIRECT: u8 = 2;
const DIRECT_BODY_LEN: usize = 12;

/// What a frame carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Bytes handed to the scanner as-is
    Payload(Bytes),
    /// IPv4 packet starting at the IP header
    Packet(Bytes),
    /// Values known to the probe without scanning
    Direct {
        sequence: u32,
        worker_id: u32,
        repeat_count: u32,
    },
}

fn put_body(buf: &mut BytesMut, kind: u8, body: &[u8]) {
    buf.put_u8(kind);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
}

/// One recorded probe-point notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub probe: ProbePoint,
    pub body: FrameBody,
}

impl Frame {
    /// Append the wire form of this frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.probe.as_raw());
        match &self.body {
            FrameBody::Payload(bytes) => put_body(buf, KIND_PAYLOAD, bytes),
            FrameBody::Packet(bytes) => put_body(buf, KIND_PACKET, bytes),
            FrameBody::Direct {
                sequence,
                worker_id,
                repeat_count,
            } => {
                buf.put_u8(KIND_DIRECT);
                buf.put_u32(DIRECT_BODY_LEN as u32);
                buf.put_u32(*sequence);
                buf.put_u32(*worker_id);
                buf.put_u32(*repeat_count);
            }
        }
    }

    /// Feed this frame into a tracer, returning the number of events recorded
    pub fn replay<C: Clock>(&self, tracer: &Tracer<C>) -> usize {
        match &self.body {
            FrameBody::Payload(bytes) => tracer.notify(self.probe, bytes),
            FrameBody::Packet(bytes) => tracer.notify_packet(self.probe, bytes),
            FrameBody::Direct {
                sequence,
                worker_id,
                repeat_count,
            } => tracer
                .record(self.probe, *sequence, *worker_id, *repeat_count)
                .map_or(0, |_| 1),
        }
    }
}

/// Decode every frame in `data`
pub fn decode_frames(mut data: Bytes) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while data.has_remaining() {
        if data.remaining() < FRAME_HEADER_LEN {
            bail!(
                "truncated frame header at offset {} ({} bytes left)",
                offset,
                data.remaining()
            );
        }

        let raw_probe = data.get_u16();
        let kind = data.get_u8();
        let len = data.get_u32() as usize;
        if data.remaining() < len {
            bail!(
                "frame at offset {} declares {} body bytes, only {} left",
                offset,
                len,
                data.remaining()
            );
        }

        let probe = ProbePoint::from_raw(raw_probe)
            .with_context(|| format!("unknown probe id {} at offset {}", raw_probe, offset))?;
        let mut body = data.split_to(len);

        let body = match kind {
            KIND_PAYLOAD => FrameBody::Payload(body),
            KIND_PACKET => FrameBody::Packet(body),
            KIND_DIRECT => {
                if len != DIRECT_BODY_LEN {
                    bail!("direct frame at offset {} has {} body bytes, expected {}", offset, len, DIRECT_BODY_LEN);
                }
                FrameBody::Direct {
                    sequence: body.get_u32(),
                    worker_id: body.get_u32(),
                    repeat_count: body.get_u32(),
                }
            }
            other => bail!("unknown frame kind {} at offset {}", other, offset),
        };

        frames.push(Frame { probe, body });
        offset += FRAME_HEADER_LEN + len;
    }

    Ok(frames)
}

/// Encode frames into one capture buffer
pub fn encode_frames(frames: &[Frame]) -> Bytes {
    let mut buf = BytesMut::new();
    for frame in frames {
        frame.encode(&mut buf);
    }
    buf.freeze()
}

/// A capture file loaded into memory
#[derive(Debug, Clone)]
pub struct Capture {
    pub path: PathBuf,
    pub frames: Vec<Frame>,
}

impl Capture {
    /// Read and decode a capture file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Loading capture from: {:?}", path);

        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read capture file: {:?}", path))?;
        let frames = decode_frames(Bytes::from(data))
            .with_context(|| format!("Malformed capture file: {:?}", path))?;

        debug!("  {} frames in {:?}", frames.len(), path);
        Ok(Self { path, frames })
    }

    /// Write frames to a capture file
    pub async fn save(path: impl AsRef<Path>, frames: &[Frame]) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, encode_frames(frames))
            .await
            .with_context(|| format!("Failed to write capture file: {:?}", path))
    }
}

/// Build a payload carrying an 8-byte marker and one 16-byte record per
/// `(sequence, worker_id)` pair, the layout instrumented producers write
pub fn tagged_payload(tags: &[(u32, u32)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + tags.len() * 16);
    buf.put_u64(u64::MAX);
    for &(sequence, worker_id) in tags {
        buf.put_slice(&worker_id.to_ne_bytes());
        buf.put_slice(&sequence.to_ne_bytes());
        buf.put_bytes(0, 8);
    }
    buf.freeze()
}

/// Wrap a payload in minimal IPv4 and UDP headers
///
/// Checksums and addresses are left zero; only the fields read when
/// narrowing a packet to its payload are filled in. Fails when the
/// datagram would not fit the 16-bit IPv4 total length.
pub fn udp_packet(payload: &[u8]) -> Result<Bytes> {
    let udp_len = 8 + payload.len();
    let total_len = 20 + udp_len;
    let Ok(total_len_field) = u16::try_from(total_len) else {
        bail!(
            "payload of {} bytes does not fit an IPv4 datagram (max {} payload bytes)",
            payload.len(),
            usize::from(u16::MAX) - 28
        );
    };
    let mut buf = BytesMut::with_capacity(total_len);

    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16(total_len_field);
    buf.put_bytes(0, 4);
    buf.put_u8(64); // ttl
    buf.put_u8(17); // udp
    buf.put_bytes(0, 10);

    buf.put_bytes(0, 4);
    // fits: udp_len < total_len
    buf.put_u16(udp_len as u16);
    buf.put_u16(0);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Shape of a synthetic capture
#[derive(Debug, Clone, Copy)]
pub struct SynthOptions {
    pub probe: ProbePoint,
    /// Number of distinct worker ids
    pub workers: u32,
    /// Packets written per worker
    pub packets: u32,
    /// Distinct flow records per packet
    pub records_per_packet: u32,
    /// Consecutive copies of each record
    pub repeat: u32,
    /// Wrap payloads in IPv4/UDP headers
    pub udp: bool,
}

/// Build the frames of a synthetic capture
///
/// Packet `p` of every worker carries sequences
/// `p * records_per_packet .. (p + 1) * records_per_packet`, each repeated
/// `repeat` times. Sizes that overflow the sequence space or a frame body
/// are rejected up front.
pub fn synth_frames(options: &SynthOptions) -> Result<Vec<Frame>> {
    let frame_count = options
        .workers
        .checked_mul(options.packets)
        .context("workers x packets overflows the frame count")?;
    let last_sequence = options
        .packets
        .checked_mul(options.records_per_packet)
        .context("packets x records per packet overflows the sequence space")?;
    let records = options
        .records_per_packet
        .checked_mul(options.repeat)
        .context("records per packet x repeat overflows the record count")?;
    let payload_len = u64::from(records) * 16 + 8;
    if payload_len > u64::from(u32::MAX) {
        bail!("packet payload of {} bytes exceeds the frame body limit", payload_len);
    }
    debug!(
        "Synthesizing {} frames, {} sequences per worker, {} payload bytes each",
        frame_count, last_sequence, payload_len
    );

    let mut frames = Vec::new();
    for packet in 0..options.packets {
        let first = packet * options.records_per_packet;
        for worker in 0..options.workers {
            let tags: Vec<(u32, u32)> = (first..first + options.records_per_packet)
                .flat_map(|sequence| {
                    std::iter::repeat((sequence, worker)).take(options.repeat as usize)
                })
                .collect();

            let payload = tagged_payload(&tags);
            let body = if options.udp {
                FrameBody::Packet(udp_packet(&payload)?)
            } else {
                FrameBody::Payload(payload)
            };
            frames.push(Frame {
                probe: options.probe,
                body,
            });
        }
    }

    Ok(frames)
}
