use std::net::Ipv4Addr;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

/// TCP control bits as they appear in the header, FIN in the lowest bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    #[inline]
    pub fn contains(self, bit: u8) -> bool { self.0 & bit != 0 }

    pub fn fin(self) -> bool { self.contains(Self::FIN) }
    pub fn syn(self) -> bool { self.contains(Self::SYN) }
    pub fn rst(self) -> bool { self.contains(Self::RST) }
    pub fn psh(self) -> bool { self.contains(Self::PSH) }
    pub fn ack(self) -> bool { self.contains(Self::ACK) }
    pub fn urg(self) -> bool { self.contains(Self::URG) }
    pub fn ece(self) -> bool { self.contains(Self::ECE) }
    pub fn cwr(self) -> bool { self.contains(Self::CWR) }
}

/// A network+transport layer view of one captured packet, as handed over by the
/// capture side. Lengths are in bytes, `timestamp` in microseconds since epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub timestamp: u64,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// IPv4 total length (header + transport header + payload).
    pub packet_len: u32,
    pub ip_header_len: u32,
    pub transport_header_len: u32,
    pub tcp_flags: TcpFlags,
    /// Switch/interface the packet was received from.
    pub device_id: String,
}

impl PacketRecord {
    #[inline]
    pub fn header_len(&self) -> u32 {
        self.ip_header_len + self.transport_header_len
    }

    #[inline]
    pub fn payload_len(&self) -> u32 {
        self.packet_len.saturating_sub(self.header_len())
    }

    pub fn is_tcp(&self) -> bool { self.protocol == IP_PROTO_TCP }
}
