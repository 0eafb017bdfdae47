//! Per-victim attack aggregation and the block decision.
//!
//! Attack-classified flows are queued under the victim they targeted
//! (destination address and port), so several attackers hitting one service
//! aggregate together. Each sweep prunes entries older than the observation
//! window from the front of every queue; a queue that still holds more than
//! `threshold` entries is drained and every attacker in it that is neither
//! blocked nor already waiting on a rule is yielded once.

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use crate::classifier::FlowClass;
use crate::config::DetectorConfig;
use crate::processor::FlowFeatures;
use super::rules::RuleHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VictimKey {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Identifies one attacker against one victim service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttackerKey {
    pub attacker: Ipv4Addr,
    pub victim: Ipv4Addr,
    pub victim_port: u16,
}

impl AttackerKey {
    pub fn victim_key(&self) -> VictimKey {
        VictimKey { ip: self.victim, port: self.victim_port }
    }
}

/// What the aggregator keeps of an attack flow after it left the flow table.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackRecord {
    pub attacker: AttackerKey,
    pub device_id: String,
    pub class: FlowClass,
    pub last_time: u64,
}

impl AttackRecord {
    // The flow's initiator is taken as the attacker
    pub fn from_features(features: &FlowFeatures, class: FlowClass) -> Self {
        Self {
            attacker: AttackerKey {
                attacker: features.key.src_ip,
                victim: features.key.dst_ip,
                victim_port: features.key.dst_port,
            },
            device_id: features.device_id.clone(),
            class,
            last_time: features.last_time,
        }
    }

    pub fn victim_key(&self) -> VictimKey {
        self.attacker.victim_key()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCandidate {
    pub attacker: AttackerKey,
    pub device_id: String,
}

#[derive(Debug, Clone)]
struct BlockEntry {
    handle: RuleHandle,
    installed_at: u64,
}

pub struct AttackAggregator {
    window_us: u64,
    threshold: usize,
    block_lifetime_us: u64,
    queues: HashMap<VictimKey, VecDeque<AttackRecord>>,
    blocked: HashMap<AttackerKey, BlockEntry>,
    pending: HashSet<AttackerKey>,
}

impl AttackAggregator {
    pub fn new(window_us: u64, threshold: usize, block_lifetime_us: u64) -> Self {
        Self {
            window_us,
            threshold,
            block_lifetime_us,
            queues: HashMap::new(),
            blocked: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.attack_window_us(), config.attack_threshold, config.block_lifetime_us())
    }

    pub fn record_attack(&mut self, record: AttackRecord) {
        let a = record.attacker;
        warn!(
            "Detected {} attack, Key(srcip: {}, dstip: {}, dstport: {})",
            record.class, a.attacker, a.victim, a.victim_port
        );
        self.queues.entry(record.victim_key()).or_default().push_back(record);
    }

    /// Prunes stale attacks and returns the attackers that should be blocked now.
    /// Every returned attacker is marked pending until its outcome is recorded.
    pub fn sweep_and_decide(&mut self, now: u64) -> Vec<BlockCandidate> {
        let mut candidates = Vec::new();
        let window = self.window_us;
        let threshold = self.threshold;
        let blocked = &self.blocked;
        let pending = &mut self.pending;

        for (victim, queue) in self.queues.iter_mut() {
            // Queues are in arrival order, so stale entries sit at the front
            while queue.front().is_some_and(|r| r.last_time.saturating_add(window) < now) {
                queue.pop_front();
            }

            if queue.len() <= threshold {
                continue;
            }

            info!("Host {}:{} under attack ({} flows)", victim.ip, victim.port, queue.len());
            for record in queue.drain(..) {
                if blocked.contains_key(&record.attacker) || pending.contains(&record.attacker) {
                    continue;
                }
                pending.insert(record.attacker);
                candidates.push(BlockCandidate { attacker: record.attacker, device_id: record.device_id });
            }
        }

        self.queues.retain(|_, q| !q.is_empty());
        candidates
    }

    pub fn record_blocked(&mut self, attacker: AttackerKey, handle: RuleHandle, now: u64) {
        self.pending.remove(&attacker);
        debug!("Attacker {} blocked by rule {}", attacker.attacker, handle.rule_id);
        self.blocked.insert(attacker, BlockEntry { handle, installed_at: now });
    }

    // Clears the pending mark so the attacker can be yielded again
    pub fn record_failed(&mut self, attacker: &AttackerKey) {
        self.pending.remove(attacker);
    }

    pub fn is_blocked(&self, attacker: &AttackerKey) -> bool {
        self.blocked.contains_key(attacker)
    }

    pub fn is_pending(&self, attacker: &AttackerKey) -> bool {
        self.pending.contains(attacker)
    }

    /// Forgets blocks older than the block lifetime and returns their handles
    /// so the rules can be removed.
    pub fn expire_blocks(&mut self, now: u64) -> Vec<(AttackerKey, RuleHandle)> {
        let lifetime = self.block_lifetime_us;
        let expired: Vec<AttackerKey> = self.blocked
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.installed_at) >= lifetime)
            .map(|(k, _)| *k)
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.blocked.remove(&k).map(|e| (k, e.handle)))
            .collect()
    }

    pub fn queued_attacks(&self, victim: &VictimKey) -> usize {
        self.queues.get(victim).map_or(0, |q| q.len())
    }

    pub fn victim_count(&self) -> usize {
        self.queues.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }
}
