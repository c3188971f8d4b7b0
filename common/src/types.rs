//! Shared data structures for the event log
//!
//! These structures are repr(C) so the log can be dumped or mapped with a
//! stable layout by external read-out tooling.

use crate::constants::MICROS_PER_SEC;

/// Instrumentation point inside the packet-processing pipeline
///
/// The discriminants are the wire ids stored in [`EventRecord::probe_id`].
/// Send-side points sit below 10 or carry a protocol-specific variant in
/// the teens; receive-side points follow the same scheme.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbePoint {
    /// Application data handed to the socket layer
    SocketSend = 1,
    /// Socket layer handing data to the transport
    SocketToTransport = 2,
    /// TCP handing a segment to IP
    TcpToIp = 3,
    /// UDP handing a datagram to IP
    UdpToIp = 13,
    /// IP handing a packet to the network layer
    IpToNet = 4,
    /// Packet leaving through the network device
    NetSend = 5,
    /// Packet arriving at the network device
    NetReceive = 6,
    /// Network layer handing a packet to IP
    NetToIp = 7,
    /// IP handing a segment to TCP
    IpToTcp = 8,
    /// IP handing a datagram to UDP
    IpToUdp = 18,
    /// TCP queueing data on the socket
    TcpToSocket = 9,
    /// UDP queueing data on the socket
    UdpToSocket = 19,
    /// Application reading data from the socket
    SocketReceive = 10,
}

impl ProbePoint {
    /// Every probe point, in pipeline order (send path then receive path)
    pub const ALL: [ProbePoint; 13] = [
        ProbePoint::SocketSend,
        ProbePoint::SocketToTransport,
        ProbePoint::TcpToIp,
        ProbePoint::UdpToIp,
        ProbePoint::IpToNet,
        ProbePoint::NetSend,
        ProbePoint::NetReceive,
        ProbePoint::NetToIp,
        ProbePoint::IpToTcp,
        ProbePoint::IpToUdp,
        ProbePoint::TcpToSocket,
        ProbePoint::UdpToSocket,
        ProbePoint::SocketReceive,
    ];

    /// Look up a probe point by its wire id
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|probe| probe.as_raw() == raw)
    }

    /// Wire id of this probe point
    #[inline(always)]
    pub const fn as_raw(self) -> u16 {
        self as u16
    }

    /// Stable snake_case name used in exports
    pub const fn name(self) -> &'static str {
        match self {
            ProbePoint::SocketSend => "sock_send",
            ProbePoint::SocketToTransport => "sock_trans",
            ProbePoint::TcpToIp => "tcp_ip",
            ProbePoint::UdpToIp => "udp_ip",
            ProbePoint::IpToNet => "ip_net",
            ProbePoint::NetSend => "net_send",
            ProbePoint::NetReceive => "net_recv",
            ProbePoint::NetToIp => "net_ip",
            ProbePoint::IpToTcp => "ip_tcp",
            ProbePoint::IpToUdp => "ip_udp",
            ProbePoint::TcpToSocket => "tcp_sock",
            ProbePoint::UdpToSocket => "udp_sock",
            ProbePoint::SocketReceive => "sock_recv",
        }
    }
}

/// Wall-clock time with microsecond resolution
///
/// Always normalized: `micros` is below one million and the sign lives in
/// `secs`, so arithmetic never yields a negative microsecond component.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeval {
    /// Whole seconds since the Unix epoch
    pub secs: i64,
    /// Microseconds within the second (0..1_000_000)
    pub micros: u32,
}

impl Timeval {
    /// Build a normalized timeval, carrying excess or negative microseconds
    /// into the seconds component
    pub const fn new(secs: i64, micros: i64) -> Self {
        let secs = secs.saturating_add(micros.div_euclid(MICROS_PER_SEC));
        Self {
            secs,
            micros: micros.rem_euclid(MICROS_PER_SEC) as u32,
        }
    }

    /// Build a timeval from a total microsecond count
    pub const fn from_micros(total: i64) -> Self {
        Self::new(0, total)
    }

    /// Total microseconds represented by this timeval
    pub const fn as_micros(&self) -> i64 {
        self.secs
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(self.micros as i64)
    }

    /// Signed microseconds elapsed since `earlier`, correct across
    /// second boundaries
    pub const fn micros_since(&self, earlier: &Timeval) -> i64 {
        self.as_micros().saturating_sub(earlier.as_micros())
    }

    /// Subtract a microsecond offset, borrowing from `secs` when the
    /// microsecond component would underflow
    pub const fn saturating_sub_micros(self, micros: i64) -> Self {
        Self::from_micros(self.as_micros().saturating_sub(micros))
    }
}

/// One logged occurrence at a probe point
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventRecord {
    /// Position in the log, assigned at write time
    pub slot_index: u64,
    /// Calibrated time the event was recorded
    pub timestamp: Timeval,
    /// Flow-level sequence number (0 when none was found)
    pub sequence: u32,
    /// Producing thread or worker
    pub worker_id: u32,
    /// Number of consecutive wire records collapsed into this event
    pub repeat_count: u32,
    /// Wire id of the probe point (see [`ProbePoint`])
    pub probe_id: u16,
}

impl EventRecord {
    /// Probe point of this record, if the id is a known one
    pub fn probe(&self) -> Option<ProbePoint> {
        ProbePoint::from_raw(self.probe_id)
    }
}

// Compile-time layout checks
const _: () = {
    assert!(core::mem::size_of::<Timeval>() % core::mem::align_of::<Timeval>() == 0);
    assert!(core::mem::size_of::<EventRecord>() % core::mem::align_of::<EventRecord>() == 0);
    assert!(core::mem::size_of::<EventRecord>() == 40);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_round_trip() {
        for probe in ProbePoint::ALL {
            assert_eq!(ProbePoint::from_raw(probe.as_raw()), Some(probe));
        }
        assert_eq!(ProbePoint::from_raw(0), None);
        assert_eq!(ProbePoint::from_raw(11), None);
    }

    #[test]
    fn test_timeval_normalizes() {
        let tv = Timeval::new(10, 2_500_000);
        assert_eq!(tv, Timeval { secs: 12, micros: 500_000 });

        let tv = Timeval::new(10, -1);
        assert_eq!(tv, Timeval { secs: 9, micros: 999_999 });
    }

    #[test]
    fn test_micros_since_across_second_boundary() {
        let start = Timeval { secs: 100, micros: 999_998 };
        let end = Timeval { secs: 101, micros: 3 };
        assert_eq!(end.micros_since(&start), 5);
        assert_eq!(start.micros_since(&end), -5);
    }

    #[test]
    fn test_sub_micros_borrows_from_secs() {
        let tv = Timeval { secs: 7, micros: 2 };
        assert_eq!(tv.saturating_sub_micros(5), Timeval { secs: 6, micros: 999_997 });
        assert_eq!(tv.saturating_sub_micros(0), tv);
    }
}
