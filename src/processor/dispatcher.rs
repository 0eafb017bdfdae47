use log::{debug, error, info, warn};

use crate::capture::{parse_frame, FrameKind, PacketRecord};
use crate::classifier::{disposition, Disposition, FlowClass, FlowClassifier};
use crate::config::DetectorConfig;
use crate::mitigation::{AttackAggregator, AttackRecord, BlockRequest, RuleCommand, RuleOutcome};
use crate::types::EngineStats;
use super::flow::{AddStatus, FlowRecord};
use super::table::{FlowId, FlowTable};

// Single sequential packet path: flow table, classifier and aggregator.
// Returned commands go to the rule worker, outcomes come back through on_rule_outcome
pub struct Dispatcher {
    config: DetectorConfig,
    table: FlowTable,
    classifier: Box<dyn FlowClassifier>,
    aggregator: AttackAggregator,
    stats: EngineStats,
    last_sweep: u64,
}

impl Dispatcher {
    pub fn new(config: DetectorConfig, classifier: Box<dyn FlowClassifier>) -> Self {
        if !classifier.is_loaded() {
            warn!("Classifier has no model loaded; every flow will classify as {}", FlowClass::Error);
        }
        Self {
            table: FlowTable::new(config.flow_timeouts()),
            aggregator: AttackAggregator::from_config(&config),
            classifier,
            config,
            stats: EngineStats::default(),
            last_sweep: 0,
        }
    }

    // Frames that don't parse are dropped
    pub fn process_frame(&mut self, kind: FrameKind, data: &[u8], timestamp: u64, device_id: &str) -> Vec<RuleCommand> {
        match parse_frame(kind, data, timestamp, device_id) {
            Ok(Some(pkt)) => self.process(&pkt),
            Ok(None) => {
                self.stats.packets_ignored += 1;
                Vec::new()
            }
            Err(e) => {
                debug!("Dropping frame: {e}");
                self.stats.packets_ignored += 1;
                Vec::new()
            }
        }
    }

    pub fn process(&mut self, pkt: &PacketRecord) -> Vec<RuleCommand> {
        if !pkt.is_tcp() {
            self.stats.packets_ignored += 1;
            return Vec::new();
        }
        self.stats.packets_seen += 1;

        let mut commands = Vec::new();
        let now = pkt.timestamp;

        let (mut id, created) = self.table.lookup_or_create(pkt);
        let mut status = if created {
            self.stats.flows_created += 1;
            self.status_of_new(id)
        } else {
            match self.table.get_mut(id) {
                Some(flow) => flow.add(pkt),
                None => AddStatus::Success,
            }
        };

        if status == AddStatus::Idle {
            if let Some(flow) = self.table.evict(id) {
                self.stats.flows_idle_evicted += 1;
                debug!("Flow {id} timed out, restarting: {:?}", flow.key);
            }
            let (new_id, _) = self.table.lookup_or_create(pkt);
            self.stats.flows_created += 1;
            debug!("Flow {new_id} replaces timed out flow {id}");
            id = new_id;
            status = self.status_of_new(id);
        }

        if status == AddStatus::Closed {
            if let Some(flow) = self.table.evict_closed(id) {
                self.stats.flows_closed += 1;
                debug!("Flow {id} closed: {:?}", flow.key);
                if self.finish_flow(&flow) {
                    commands.extend(self.decide(now));
                }
            }
        }

        self.stats.active_flows = self.table.len() as u64;
        commands
    }

    // Tick-driven maintenance; the packet path never scans the whole table
    pub fn sweep(&mut self, now: u64) -> Vec<RuleCommand> {
        // Idle scan at most once per sweep interval
        if now.saturating_sub(self.last_sweep) >= self.config.sweep_interval_us {
            self.sweep_idle(now);
        }
        let mut commands = self.decide(now);

        for (attacker, handle) in self.aggregator.expire_blocks(now) {
            info!(
                "Block on {} -> {}:{} expired, removing rule {}",
                attacker.attacker, attacker.victim, attacker.victim_port, handle.rule_id
            );
            self.stats.blocks_expired += 1;
            commands.push(RuleCommand::Remove(handle));
        }

        self.stats.active_flows = self.table.len() as u64;
        commands
    }

    pub fn on_rule_outcome(&mut self, outcome: RuleOutcome, now: u64) {
        match outcome {
            RuleOutcome::Installed { attacker, handle } => {
                self.stats.blocks_installed += 1;
                self.aggregator.record_blocked(attacker, handle, now);
            }
            RuleOutcome::Failed { attacker, reason } => {
                self.stats.blocks_failed += 1;
                debug!("Block of {} failed: {reason}", attacker.attacker);
                self.aggregator.record_failed(&attacker);
            }
            RuleOutcome::Removed(handle) => {
                debug!("Rule {} removed", handle.rule_id);
            }
            RuleOutcome::RemoveFailed { handle, reason } => {
                warn!("Rule {} on {} may still be installed: {reason}", handle.rule_id, handle.device_id);
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    pub fn aggregator(&self) -> &AttackAggregator {
        &self.aggregator
    }

    // The creating packet is already folded in, so a lone RST closes the flow at birth
    fn status_of_new(&self, id: FlowId) -> AddStatus {
        match self.table.get(id) {
            Some(flow) if flow.is_closed() => AddStatus::Closed,
            _ => AddStatus::Success,
        }
    }

    // True when the flow was recorded as an attack
    fn finish_flow(&mut self, flow: &FlowRecord) -> bool {
        let Some(features) = flow.export() else {
            debug!("Flow {:?} never carried data, not classified", flow.key);
            return false;
        };
        let class = self.classifier.classify(&features);
        self.stats.flows_classified += 1;

        let k = &features.key;
        match class {
            FlowClass::Normal => info!(
                "Detected normal flow, Key(srcip: {}, srcport: {}, dstip: {}, dstport: {})",
                k.src_ip, k.src_port, k.dst_ip, k.dst_port
            ),
            FlowClass::Error => error!(
                "Error predicting flow, Key(srcip: {}, srcport: {}, dstip: {}, dstport: {})",
                k.src_ip, k.src_port, k.dst_ip, k.dst_port
            ),
            _ => {}
        }

        match disposition(class) {
            Disposition::Ignore => false,
            Disposition::RecordAttack => {
                self.aggregator.record_attack(AttackRecord::from_features(&features, class));
                self.stats.attacks_recorded += 1;
                true
            }
        }
    }

    fn decide(&mut self, now: u64) -> Vec<RuleCommand> {
        self.aggregator
            .sweep_and_decide(now)
            .into_iter()
            .map(|candidate| {
                let a = candidate.attacker;
                info!(
                    "Requesting block, Key(srcip: {}, dstip: {}, dstport: {}) on {}",
                    a.attacker, a.victim, a.victim_port, candidate.device_id
                );
                self.stats.blocks_requested += 1;
                RuleCommand::Install(BlockRequest::new(&candidate, &self.config))
            })
            .collect()
    }

    fn sweep_idle(&mut self, now: u64) {
        self.last_sweep = now;
        let expired = self.table.sweep_idle(now);
        self.stats.flows_idle_evicted += expired.len() as u64;
    }
}
