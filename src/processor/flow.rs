use log::debug;
use std::net::Ipv4Addr;

use crate::capture::{PacketRecord, IP_PROTO_TCP, IP_PROTO_UDP};
use super::stats::{Snapshot, StatAccumulator};
use super::tcp_state::TcpState;

pub const FLOW_TIMEOUT_US: u64 = 600_000_000; // 600 seconds
pub const IDLE_THRESHOLD_US: u64 = 1_000_000; // 1 second

/// Directional 5-tuple. `reverse()` gives the key of the opposite direction.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16, protocol: u8) -> Self {
        Self { src_ip, src_port, dst_ip, dst_port, protocol }
    }

    pub fn from_packet(pkt: &PacketRecord) -> Self {
        Self::new(pkt.src_ip, pkt.src_port, pkt.dst_ip, pkt.dst_port, pkt.protocol)
    }

    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection { Forward, Backward }

/// Result of folding a packet into a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    Success,
    /// Both TCP sides reached `Closed`.
    Closed,
    /// The packet arrived after the flow timed out; it was not applied.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTimeouts {
    pub flow_timeout_us: u64,
    pub idle_threshold_us: u64,
}

impl Default for FlowTimeouts {
    fn default() -> Self {
        Self { flow_timeout_us: FLOW_TIMEOUT_US, idle_threshold_us: IDLE_THRESHOLD_US }
    }
}

/// The 21 exported flow features, in export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    TotalFwdPackets,
    TotalFwdVolume,
    TotalBwdPackets,
    TotalBwdVolume,
    FwdPacketLen,
    BwdPacketLen,
    FwdIat,
    BwdIat,
    Duration,
    Active,
    Idle,
    SubflowFwdPackets,
    SubflowFwdBytes,
    SubflowBwdPackets,
    SubflowBwdBytes,
    FwdPshCount,
    BwdPshCount,
    FwdUrgCount,
    BwdUrgCount,
    TotalFwdHeaderLen,
    TotalBwdHeaderLen,
}

pub const NUM_FEATURES: usize = 21;

/// Width of the flattened vector: one slot per value feature, four per distribution.
pub const FEATURE_VECTOR_LEN: usize = 39;

pub const FEATURE_NAMES: [&str; FEATURE_VECTOR_LEN] = [
    "total_fpackets", "total_fvolume", "total_bpackets", "total_bvolume",
    "min_fpktl", "mean_fpktl", "max_fpktl", "std_fpktl",
    "min_bpktl", "mean_bpktl", "max_bpktl", "std_bpktl",
    "min_fiat", "mean_fiat", "max_fiat", "std_fiat",
    "min_biat", "mean_biat", "max_biat", "std_biat",
    "duration",
    "min_active", "mean_active", "max_active", "std_active",
    "min_idle", "mean_idle", "max_idle", "std_idle",
    "sflow_fpackets", "sflow_fbytes", "sflow_bpackets", "sflow_bbytes",
    "fpsh_cnt", "bpsh_cnt", "furg_cnt", "burg_cnt",
    "total_fhlen", "total_bhlen",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Value(f64),
    Distribution(Snapshot),
}

/// Exported, immutable view of a finished flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowFeatures {
    pub key: FlowKey,
    pub device_id: String,
    pub first_time: u64,
    pub last_time: u64,
    pub values: [FeatureValue; NUM_FEATURES],
}

impl FlowFeatures {
    pub fn get(&self, feature: Feature) -> FeatureValue {
        self.values[feature as usize]
    }

    /// Flattens to the numeric vector the tree models are trained on.
    pub fn to_vector(&self) -> [f64; FEATURE_VECTOR_LEN] {
        let mut out = [0f64; FEATURE_VECTOR_LEN];
        let mut i = 0;
        for v in &self.values {
            match v {
                FeatureValue::Value(x) => {
                    out[i] = finite(*x);
                    i += 1;
                }
                FeatureValue::Distribution(s) => {
                    out[i] = finite(s.min);
                    out[i + 1] = finite(s.mean);
                    out[i + 2] = finite(s.max);
                    out[i + 3] = finite(s.std);
                    i += 4;
                }
            }
        }
        out
    }
}

#[inline]
fn finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,
    pub device_id: String,
    timeouts: FlowTimeouts,

    // Flow state
    pub valid: bool,
    pub bidirectional: bool,
    has_data: bool,
    pub client_state: TcpState,
    pub server_state: TcpState,
    pub direction: FlowDirection,

    // Timestamps
    pub first_time: u64,
    pub last_seen: u64,
    pub fwd_last: Option<u64>,
    pub bwd_last: Option<u64>,
    active_start: u64,

    // Volume counters
    pub total_fwd_packets: u64,
    pub total_fwd_bytes: u64,
    pub total_bwd_packets: u64,
    pub total_bwd_bytes: u64,
    pub fwd_header_len: u64,
    pub bwd_header_len: u64,

    // Distributions
    pub fwd_packet_len: StatAccumulator,
    pub bwd_packet_len: StatAccumulator,
    pub fwd_iat: StatAccumulator,
    pub bwd_iat: StatAccumulator,
    pub active: StatAccumulator,
    pub idle: StatAccumulator,

    // Flag counts
    pub fwd_psh_flags: u64,
    pub bwd_psh_flags: u64,
    pub fwd_urg_flags: u64,
    pub bwd_urg_flags: u64,
}

impl FlowRecord {
    /// Starts a flow from its first packet, which defines the forward direction.
    pub fn new(pkt: &PacketRecord, timeouts: FlowTimeouts) -> Self {
        let now = pkt.timestamp;
        let mut s = Self {
            key: FlowKey::from_packet(pkt),
            device_id: pkt.device_id.clone(),
            timeouts,
            valid: false,
            bidirectional: false,
            has_data: false,
            client_state: TcpState::Start,
            server_state: TcpState::Start,
            direction: FlowDirection::Forward,
            first_time: now,
            last_seen: now,
            fwd_last: Some(now),
            bwd_last: None,
            active_start: now,
            total_fwd_packets: 1,
            total_fwd_bytes: pkt.packet_len as u64,
            total_bwd_packets: 0,
            total_bwd_bytes: 0,
            fwd_header_len: pkt.header_len() as u64,
            bwd_header_len: 0,
            fwd_packet_len: StatAccumulator::new(),
            bwd_packet_len: StatAccumulator::new(),
            fwd_iat: StatAccumulator::new(),
            bwd_iat: StatAccumulator::new(),
            active: StatAccumulator::new(),
            idle: StatAccumulator::new(),
            fwd_psh_flags: 0,
            bwd_psh_flags: 0,
            fwd_urg_flags: 0,
            bwd_urg_flags: 0,
        };
        s.fwd_packet_len.add(pkt.packet_len as u64);
        s.count_tcp_flags(pkt, FlowDirection::Forward);
        s.update_status(pkt);
        s
    }

    /// Helper the table uses to expire idle flows.
    #[inline]
    pub fn last_seen_micros(&self) -> u64 {
        self.last_seen
    }

    fn get_flow_direction(&self, pkt: &PacketRecord) -> FlowDirection {
        if pkt.src_ip == self.key.src_ip && pkt.src_port == self.key.src_port {
            FlowDirection::Forward
        } else {
            FlowDirection::Backward
        }
    }

    pub fn add(&mut self, pkt: &PacketRecord) -> AddStatus {
        let now = pkt.timestamp;
        let last = self.last_seen;
        if now < last {
            debug!("Flow {:?}: ignoring reordered packet, {} < {}", self.key, now, last);
            return AddStatus::Success;
        }
        let diff = now - last;
        if diff > self.timeouts.flow_timeout_us {
            return AddStatus::Idle;
        }

        self.direction = self.get_flow_direction(pkt);

        if diff > self.timeouts.idle_threshold_us {
            // Close the running active period and credit the gap as idle time
            self.idle.add(diff);
            self.active.add(last - self.active_start);
            self.fwd_last = None;
            self.bwd_last = None;
            self.active_start = now;
        }

        let length = pkt.packet_len as u64;
        let hlen = pkt.header_len() as u64;
        match self.direction {
            FlowDirection::Forward => {
                self.fwd_packet_len.add(length);
                self.total_fwd_bytes += length;
                self.total_fwd_packets += 1;
                self.fwd_header_len += hlen;
                if let Some(t) = self.fwd_last {
                    self.fwd_iat.add(now - t);
                }
                self.fwd_last = Some(now);
            }
            FlowDirection::Backward => {
                self.bidirectional = true;
                self.bwd_packet_len.add(length);
                self.total_bwd_bytes += length;
                self.total_bwd_packets += 1;
                self.bwd_header_len += hlen;
                if let Some(t) = self.bwd_last {
                    self.bwd_iat.add(now - t);
                }
                self.bwd_last = Some(now);
            }
        }
        self.count_tcp_flags(pkt, self.direction);
        self.update_status(pkt);
        self.last_seen = now;

        if self.is_closed() { AddStatus::Closed } else { AddStatus::Success }
    }

    fn count_tcp_flags(&mut self, pkt: &PacketRecord, direction: FlowDirection) {
        if self.key.protocol != IP_PROTO_TCP {
            return;
        }
        let flags = pkt.tcp_flags;
        match direction {
            FlowDirection::Forward => {
                if flags.psh() { self.fwd_psh_flags += 1; }
                if flags.urg() { self.fwd_urg_flags += 1; }
            }
            FlowDirection::Backward => {
                if flags.psh() { self.bwd_psh_flags += 1; }
                if flags.urg() { self.bwd_urg_flags += 1; }
            }
        }
    }

    /// Updates validity and, for TCP, both sides' connection state.
    fn update_status(&mut self, pkt: &PacketRecord) {
        match self.key.protocol {
            IP_PROTO_UDP => {
                if self.valid {
                    return;
                }
                if pkt.payload_len() > 0 {
                    self.has_data = true;
                }
                if self.has_data && self.bidirectional {
                    self.valid = true;
                }
            }
            IP_PROTO_TCP => {
                // Validity is judged on the state before this packet's flags apply
                if !self.valid && self.client_state == TcpState::Established && pkt.payload_len() > 0 {
                    self.valid = true;
                }
                if pkt.payload_len() > 0 {
                    self.has_data = true;
                }
                self.client_state = self.client_state.next(pkt.tcp_flags, FlowDirection::Forward, self.direction);
                self.server_state = self.server_state.next(pkt.tcp_flags, FlowDirection::Backward, self.direction);
            }
            _ => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.key.protocol == IP_PROTO_TCP
            && self.client_state == TcpState::Closed
            && self.server_state == TcpState::Closed
    }

    pub fn check_idle(&self, now: u64) -> bool {
        now.saturating_sub(self.last_seen) > self.timeouts.flow_timeout_us
    }

    /// Final feature snapshot. `None` unless the flow looked like real traffic.
    ///
    /// The running active period is folded into a copy, so exporting twice
    /// without new packets gives the same result.
    pub fn export(&self) -> Option<FlowFeatures> {
        if !self.valid {
            return None;
        }

        let mut active = self.active.clone();
        active.add(self.last_seen - self.active_start);

        let active_time = active.sum();
        let per_active = |total: u64| {
            if active_time > 0 { total as f64 / active_time as f64 } else { 0.0 }
        };
        let duration = self.last_seen.saturating_sub(self.first_time);

        use FeatureValue::{Distribution as D, Value as V};
        let values = [
            V(self.total_fwd_packets as f64),
            V(self.total_fwd_bytes as f64),
            V(self.total_bwd_packets as f64),
            V(self.total_bwd_bytes as f64),
            D(self.fwd_packet_len.snapshot()),
            D(self.bwd_packet_len.snapshot()),
            D(self.fwd_iat.snapshot()),
            D(self.bwd_iat.snapshot()),
            V(duration as f64),
            D(active.snapshot()),
            D(self.idle.snapshot()),
            V(per_active(self.total_fwd_packets)),
            V(per_active(self.total_fwd_bytes)),
            V(per_active(self.total_bwd_packets)),
            V(per_active(self.total_bwd_bytes)),
            V(self.fwd_psh_flags as f64),
            V(self.bwd_psh_flags as f64),
            V(self.fwd_urg_flags as f64),
            V(self.bwd_urg_flags as f64),
            V(self.fwd_header_len as f64),
            V(self.bwd_header_len as f64),
        ];

        Some(FlowFeatures {
            key: self.key,
            device_id: self.device_id.clone(),
            first_time: self.first_time,
            last_time: self.last_seen,
            values,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::TcpFlags;

    pub const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    pub const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    pub fn tcp_packet(ts: u64, from_client: bool, flags: u8, payload: u32) -> PacketRecord {
        let (src_ip, src_port, dst_ip, dst_port) = if from_client {
            (CLIENT, 40000, SERVER, 80)
        } else {
            (SERVER, 80, CLIENT, 40000)
        };
        PacketRecord {
            timestamp: ts,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol: IP_PROTO_TCP,
            packet_len: 40 + payload,
            ip_header_len: 20,
            transport_header_len: 20,
            tcp_flags: TcpFlags(flags),
            device_id: "of:0000000000000001".into(),
        }
    }

    const SYN: u8 = TcpFlags::SYN;
    const SYN_ACK: u8 = TcpFlags::SYN | TcpFlags::ACK;
    const ACK: u8 = TcpFlags::ACK;
    const PSH_ACK: u8 = TcpFlags::PSH | TcpFlags::ACK;
    const FIN_ACK: u8 = TcpFlags::FIN | TcpFlags::ACK;

    fn handshake() -> FlowRecord {
        let mut flow = FlowRecord::new(&tcp_packet(0, true, SYN, 0), FlowTimeouts::default());
        assert_eq!(flow.add(&tcp_packet(100_000, false, SYN_ACK, 0)), AddStatus::Success);
        assert_eq!(flow.add(&tcp_packet(200_000, true, ACK, 0)), AddStatus::Success);
        flow
    }

    fn value(f: &FlowFeatures, feature: Feature) -> f64 {
        match f.get(feature) {
            FeatureValue::Value(v) => v,
            FeatureValue::Distribution(_) => panic!("{feature:?} is a distribution"),
        }
    }

    fn dist(f: &FlowFeatures, feature: Feature) -> Snapshot {
        match f.get(feature) {
            FeatureValue::Distribution(s) => s,
            FeatureValue::Value(_) => panic!("{feature:?} is a value"),
        }
    }

    #[test]
    fn test_reverse_key_round_trip() {
        let key = FlowKey::from_packet(&tcp_packet(0, true, SYN, 0));
        assert_eq!(key.reverse(), FlowKey::from_packet(&tcp_packet(0, false, SYN_ACK, 0)));
        assert_eq!(key.reverse().reverse(), key);
    }

    #[test]
    fn test_first_packet_folded_into_features() {
        let flow = FlowRecord::new(&tcp_packet(5, true, SYN, 0), FlowTimeouts::default());
        assert_eq!(flow.total_fwd_packets, 1);
        assert_eq!(flow.total_fwd_bytes, 40);
        assert_eq!(flow.fwd_header_len, 40);
        assert_eq!(flow.fwd_packet_len.count(), 1);
        assert_eq!(flow.first_time, 5);
        assert_eq!(flow.fwd_last, Some(5));
        assert_eq!(flow.bwd_last, None);
        assert_eq!(flow.client_state, TcpState::SynSent);
        assert_eq!(flow.server_state, TcpState::Start);
    }

    #[test]
    fn test_syn_only_flow_never_valid_nor_closed() {
        let mut flow = FlowRecord::new(&tcp_packet(0, true, SYN, 0), FlowTimeouts::default());
        for i in 1..5 {
            assert_eq!(flow.add(&tcp_packet(i * 1_000, true, SYN, 0)), AddStatus::Success);
        }
        assert!(!flow.valid);
        assert!(!flow.is_closed());
        assert!(flow.export().is_none());
    }

    #[test]
    fn test_full_conversation_closes() {
        let mut flow = handshake();
        assert_eq!(flow.add(&tcp_packet(300_000, true, PSH_ACK, 120)), AddStatus::Success);
        assert!(flow.valid);
        assert_eq!(flow.add(&tcp_packet(400_000, false, PSH_ACK, 900)), AddStatus::Success);
        assert_eq!(flow.add(&tcp_packet(500_000, true, FIN_ACK, 0)), AddStatus::Success);
        assert_eq!(flow.add(&tcp_packet(600_000, false, FIN_ACK, 0)), AddStatus::Success);
        assert_eq!(flow.add(&tcp_packet(700_000, true, ACK, 0)), AddStatus::Closed);
        assert!(flow.is_closed());

        let f = flow.export().unwrap();
        assert_eq!(value(&f, Feature::TotalFwdPackets), 5.0);
        assert_eq!(value(&f, Feature::TotalBwdPackets), 3.0);
        assert_eq!(value(&f, Feature::TotalFwdVolume), (5 * 40 + 120) as f64);
        assert_eq!(value(&f, Feature::TotalBwdVolume), (3 * 40 + 900) as f64);
        assert_eq!(value(&f, Feature::Duration), 700_000.0);
        assert_eq!(value(&f, Feature::FwdPshCount), 1.0);
        assert_eq!(value(&f, Feature::BwdPshCount), 1.0);
        assert_eq!(value(&f, Feature::TotalFwdHeaderLen), 200.0);
        assert_eq!(value(&f, Feature::TotalBwdHeaderLen), 120.0);

        let fpktl = dist(&f, Feature::FwdPacketLen);
        assert_eq!(fpktl.min, 40.0);
        assert_eq!(fpktl.max, 160.0);

        // Forward packets at 0, 200k, 300k, 500k, 700k
        let fiat = dist(&f, Feature::FwdIat);
        assert_eq!(fiat.min, 100_000.0);
        assert_eq!(fiat.max, 200_000.0);
        assert_eq!(fiat.mean, 175_000.0);
    }

    #[test]
    fn test_rst_closes_flow() {
        let mut flow = handshake();
        assert_eq!(flow.add(&tcp_packet(250_000, false, TcpFlags::RST, 0)), AddStatus::Closed);
    }

    #[test]
    fn test_idle_gap_splits_active_and_idle() {
        let mut flow = handshake();
        // 3 s of silence, then more traffic
        assert_eq!(flow.add(&tcp_packet(3_200_000, true, PSH_ACK, 100)), AddStatus::Success);
        assert_eq!(flow.add(&tcp_packet(3_300_000, false, ACK, 0)), AddStatus::Success);

        let f = flow.export().unwrap();
        let active = dist(&f, Feature::Active);
        assert_eq!(active.min, 100_000.0);
        assert_eq!(active.max, 200_000.0);
        assert_eq!(active.mean, 150_000.0);

        let idle = dist(&f, Feature::Idle);
        assert_eq!(idle.min, 3_000_000.0);
        assert_eq!(idle.max, 3_000_000.0);
        assert_eq!(idle.std, 0.0);

        // Inter-arrival times restart after the idle period
        assert_eq!(flow.fwd_iat.count(), 1);
        assert_eq!(flow.bwd_iat.count(), 0);

        // 3 forward packets over 300 ms of activity
        assert!((value(&f, Feature::SubflowFwdPackets) - 3.0 / 300_000.0).abs() < 1e-15);
    }

    #[test]
    fn test_reordered_packet_leaves_state_unchanged() {
        let mut flow = handshake();
        let before = flow.clone();
        assert_eq!(flow.add(&tcp_packet(150_000, false, ACK, 10)), AddStatus::Success);
        assert_eq!(flow.total_bwd_packets, before.total_bwd_packets);
        assert_eq!(flow.bwd_iat, before.bwd_iat);
        assert_eq!(flow.last_seen, before.last_seen);
    }

    #[test]
    fn test_packet_past_timeout_reports_idle() {
        let mut flow = handshake();
        let late = 200_000 + FLOW_TIMEOUT_US + 1;
        assert_eq!(flow.add(&tcp_packet(late, true, ACK, 0)), AddStatus::Idle);
        assert_eq!(flow.total_fwd_packets, 2);
        assert!(flow.check_idle(late));
        assert!(!flow.check_idle(200_000 + FLOW_TIMEOUT_US));
    }

    #[test]
    fn test_export_is_idempotent() {
        let mut flow = handshake();
        flow.add(&tcp_packet(300_000, true, PSH_ACK, 64));
        let a = flow.export().unwrap();
        let b = flow.export().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_vector(), b.to_vector());
    }

    #[test]
    fn test_single_instant_flow_has_zero_subflow_rates() {
        let mut flow = FlowRecord::new(&tcp_packet(0, true, SYN, 0), FlowTimeouts::default());
        flow.add(&tcp_packet(0, false, SYN_ACK, 0));
        flow.add(&tcp_packet(0, true, ACK, 0));
        flow.add(&tcp_packet(0, true, PSH_ACK, 10));
        let f = flow.export().unwrap();
        assert_eq!(value(&f, Feature::SubflowFwdPackets), 0.0);
        assert_eq!(value(&f, Feature::SubflowBwdBytes), 0.0);
        assert!(f.to_vector().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_udp_valid_once_bidirectional_with_payload() {
        let mut first = tcp_packet(0, true, 0, 12);
        first.protocol = IP_PROTO_UDP;
        first.transport_header_len = 8;
        let mut flow = FlowRecord::new(&first, FlowTimeouts::default());
        assert!(!flow.valid);

        let mut reply = tcp_packet(10, false, 0, 30);
        reply.protocol = IP_PROTO_UDP;
        reply.transport_header_len = 8;
        assert_eq!(flow.add(&reply), AddStatus::Success);
        assert!(flow.valid);
        assert!(!flow.is_closed());
    }

    #[test]
    fn test_vector_layout() {
        let mut flow = handshake();
        flow.add(&tcp_packet(300_000, true, PSH_ACK, 60));
        let v = flow.export().unwrap().to_vector();
        assert_eq!(v[0], 3.0); // total_fpackets
        assert_eq!(v[2], 1.0); // total_bpackets
        assert_eq!(FEATURE_NAMES[20], "duration");
        assert_eq!(v[20], 300_000.0);
        assert_eq!(FEATURE_NAMES[4], "min_fpktl");
        assert_eq!(v[4], 40.0);
        assert_eq!(v[6], 100.0); // max_fpktl
    }
}
