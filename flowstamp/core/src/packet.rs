//! Payload narrowing for transport segments
//!
//! Probe points that see whole packets hand them here to find the bytes the
//! scanner should look at. Only the header fields needed to locate the
//! payload are read: IPv4 header length, total length and protocol, the
//! TCP data offset and flags. TCP segments that only carry handshake or
//! teardown state (SYN, FIN, RST, or a bare ACK) are rejected before any
//! scanning happens.

use crate::error::PacketError;
use flowstamp_common::constants::*;

/// Transport protocol carrying the payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Map an IPv4 protocol number to a transport
    pub fn from_protocol(protocol: u8) -> Result<Self, PacketError> {
        match protocol {
            IPPROTO_TCP => Ok(Transport::Tcp),
            IPPROTO_UDP => Ok(Transport::Udp),
            other => Err(PacketError::UnsupportedProtocol(other)),
        }
    }
}

/// Application payload of one transport segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment<'a> {
    pub transport: Transport,
    pub payload: &'a [u8],
}

#[inline(always)]
fn byte_at(bytes: &[u8], at: usize) -> Result<u8, PacketError> {
    bytes.get(at).copied().ok_or(PacketError::Truncated {
        needed: at + 1,
        available: bytes.len(),
    })
}

#[inline(always)]
fn tail_from(bytes: &[u8], at: usize) -> Result<&[u8], PacketError> {
    bytes.get(at..).ok_or(PacketError::Truncated {
        needed: at,
        available: bytes.len(),
    })
}

impl<'a> Segment<'a> {
    /// Narrow an IPv4 packet (starting at the IP header) to its payload
    pub fn from_ipv4(packet: &'a [u8]) -> Result<Self, PacketError> {
        let version_ihl = byte_at(packet, 0)?;
        let version = version_ihl >> 4;
        if version != 4 {
            return Err(PacketError::NotIpv4(version));
        }

        let header_len = usize::from(version_ihl & 0x0f) * 4;
        if header_len < MIN_HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: MIN_HEADER_LEN,
                available: header_len,
            });
        }

        // Link-layer padding may follow the datagram
        let total_len = usize::from(u16::from_be_bytes([byte_at(packet, 2)?, byte_at(packet, 3)?]));
        let packet = packet.get(..total_len).unwrap_or(packet);

        let transport = Transport::from_protocol(byte_at(packet, 9)?)?;
        Self::from_transport(transport, tail_from(packet, header_len)?)
    }

    /// Narrow a transport segment (starting at the TCP or UDP header)
    pub fn from_transport(transport: Transport, segment: &'a [u8]) -> Result<Self, PacketError> {
        let payload = match transport {
            Transport::Udp => tail_from(segment, UDP_HEADER_LEN)?,
            Transport::Tcp => {
                let data_offset = usize::from(byte_at(segment, 12)? >> 4) * 4;
                let flags = byte_at(segment, 13)?;
                let payload = tail_from(segment, data_offset.max(MIN_HEADER_LEN))?;

                let control = flags & (TCP_FLAG_SYN | TCP_FLAG_FIN | TCP_FLAG_RST) != 0;
                let bare_ack = flags & TCP_FLAG_ACK != 0 && payload.is_empty();
                if control || bare_ack {
                    return Err(PacketError::ControlSegment { flags });
                }
                payload
            }
        };

        Ok(Self { transport, payload })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tcp_segment(flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut segment = vec![0u8; 20];
        segment[12] = 5 << 4;
        segment[13] = flags;
        segment.extend_from_slice(payload);
        segment
    }

    pub(crate) fn ipv4_packet(protocol: u8, transport: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        let total = (20 + transport.len()) as u16;
        packet[2..4].copy_from_slice(&total.to_be_bytes());
        packet[9] = protocol;
        packet.extend_from_slice(transport);
        packet
    }

    #[test]
    fn test_udp_payload() {
        let mut datagram = vec![0u8; 8];
        datagram.extend_from_slice(b"data");
        let packet = ipv4_packet(IPPROTO_UDP, &datagram);

        let segment = Segment::from_ipv4(&packet).unwrap();
        assert_eq!(segment.transport, Transport::Udp);
        assert_eq!(segment.payload, b"data");
    }

    #[test]
    fn test_tcp_payload_with_options() {
        let mut segment = vec![0u8; 24];
        segment[12] = 6 << 4;
        segment[13] = TCP_FLAG_ACK;
        segment.extend_from_slice(b"xyz");

        let parsed = Segment::from_transport(Transport::Tcp, &segment).unwrap();
        assert_eq!(parsed.payload, b"xyz");
    }

    #[test]
    fn test_tcp_control_segments_rejected() {
        for flags in [TCP_FLAG_SYN, TCP_FLAG_FIN, TCP_FLAG_RST, TCP_FLAG_SYN | TCP_FLAG_ACK] {
            let segment = tcp_segment(flags, b"payload");
            assert_eq!(
                Segment::from_transport(Transport::Tcp, &segment),
                Err(PacketError::ControlSegment { flags })
            );
        }

        let bare_ack = tcp_segment(TCP_FLAG_ACK, &[]);
        assert!(matches!(
            Segment::from_transport(Transport::Tcp, &bare_ack),
            Err(PacketError::ControlSegment { .. })
        ));
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let mut packet = ipv4_packet(IPPROTO_TCP, &tcp_segment(TCP_FLAG_ACK, b"ab"));
        packet.extend_from_slice(&[0u8; 6]);

        let segment = Segment::from_ipv4(&packet).unwrap();
        assert_eq!(segment.payload, b"ab");
    }

    #[test]
    fn test_rejects_non_ipv4_and_unknown_protocol() {
        let mut packet = ipv4_packet(IPPROTO_UDP, &[0u8; 8]);
        packet[0] = 0x60;
        assert_eq!(Segment::from_ipv4(&packet), Err(PacketError::NotIpv4(6)));

        let packet = ipv4_packet(1, &[0u8; 8]);
        assert_eq!(Segment::from_ipv4(&packet), Err(PacketError::UnsupportedProtocol(1)));
    }

    #[test]
    fn test_truncated_headers() {
        assert!(matches!(Segment::from_ipv4(&[]), Err(PacketError::Truncated { .. })));
        assert!(matches!(
            Segment::from_transport(Transport::Tcp, &[0u8; 10]),
            Err(PacketError::Truncated { .. })
        ));
        assert!(matches!(
            Segment::from_transport(Transport::Udp, &[0u8; 4]),
            Err(PacketError::Truncated { .. })
        ));
    }
}
