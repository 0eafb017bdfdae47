use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use std::net::Ipv4Addr;

use crate::error::{FlowGuardError, Result};
use super::packet::{PacketRecord, TcpFlags, IP_PROTO_TCP};

/// Where a raw frame starts: at the Ethernet header or directly at IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind { Ethernet, Ip }

/// Decodes a raw frame into a [`PacketRecord`].
///
/// Returns `Ok(None)` for traffic the detector ignores (anything that is not
/// IPv4/TCP) and an error for frames whose headers don't hold together; callers
/// drop those without touching flow state.
pub fn parse_frame(kind: FrameKind, data: &[u8], timestamp: u64, device_id: &str) -> Result<Option<PacketRecord>> {
    let parsed = match kind {
        FrameKind::Ethernet => PacketHeaders::from_ethernet_slice(data),
        FrameKind::Ip => PacketHeaders::from_ip_slice(data),
    }
    .map_err(|e| FlowGuardError::Parse(format!("Failed to parse packet: {e}")))?;

    let ipv4 = match &parsed.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => ipv4,
        _ => return Ok(None),
    };

    let tcp = match &parsed.transport {
        Some(TransportHeader::Tcp(tcp)) => tcp,
        // An IPv4 header claiming TCP without a decodable TCP header is malformed
        None if ipv4.protocol.0 == IP_PROTO_TCP => {
            return Err(FlowGuardError::Parse("TCP header missing".into()));
        }
        _ => return Ok(None),
    };

    let ip_header_len = ipv4.header_len() as u32;
    let tcp_header_len = tcp.data_offset() as u32 * 4;
    let packet_len = ipv4.total_len as u32;
    if packet_len < ip_header_len + tcp_header_len {
        return Err(FlowGuardError::Parse(format!(
            "IPv4 total length {packet_len} shorter than headers ({ip_header_len} + {tcp_header_len})"
        )));
    }

    let mut flags = 0u8;
    for (set, bit) in [
        (tcp.fin, TcpFlags::FIN),
        (tcp.syn, TcpFlags::SYN),
        (tcp.rst, TcpFlags::RST),
        (tcp.psh, TcpFlags::PSH),
        (tcp.ack, TcpFlags::ACK),
        (tcp.urg, TcpFlags::URG),
        (tcp.ece, TcpFlags::ECE),
        (tcp.cwr, TcpFlags::CWR),
    ] {
        if set { flags |= bit; }
    }

    Ok(Some(PacketRecord {
        timestamp,
        src_ip: Ipv4Addr::from(ipv4.source),
        dst_ip: Ipv4Addr::from(ipv4.destination),
        src_port: tcp.source_port,
        dst_port: tcp.destination_port,
        protocol: IP_PROTO_TCP,
        packet_len,
        ip_header_len,
        transport_header_len: tcp_header_len,
        tcp_flags: TcpFlags(flags),
        device_id: device_id.to_string(),
    }))
}
