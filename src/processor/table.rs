use log::debug;
use std::collections::HashMap;

use crate::capture::PacketRecord;
use super::flow::{FlowKey, FlowRecord, FlowTimeouts};

pub type FlowId = u64;

// Table counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub inserts: u64,
    pub lookups: u64,
    pub hits: u64,
    pub closed: u64,
    pub expired: u64,
}

/// Owns every live [`FlowRecord`].
///
/// Each record is reachable through both of its directional keys; the two index
/// entries always point at the same id and are inserted and removed together.
pub struct FlowTable {
    index: HashMap<FlowKey, FlowId>,
    flows: HashMap<FlowId, FlowRecord>,
    timeouts: FlowTimeouts,
    next_id: FlowId,
    pub stats: TableStats,
}

impl FlowTable {
    pub fn new(timeouts: FlowTimeouts) -> Self {
        Self {
            index: HashMap::new(),
            flows: HashMap::new(),
            timeouts,
            next_id: 1,
            stats: TableStats::default(),
        }
    }

    /// Finds the flow a packet belongs to, from either direction, or starts a new one.
    /// Returns the flow id and whether it was just created.
    pub fn lookup_or_create(&mut self, pkt: &PacketRecord) -> (FlowId, bool) {
        self.stats.lookups += 1;
        let forward = FlowKey::from_packet(pkt);
        let backward = forward.reverse();

        let existing = self.index.get(&forward).or_else(|| self.index.get(&backward)).copied();
        if let Some(id) = existing {
            self.stats.hits += 1;
            return (id, false);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.flows.insert(id, FlowRecord::new(pkt, self.timeouts));
        self.index.insert(forward, id);
        self.index.insert(backward, id);
        self.stats.inserts += 1;
        debug!("Added new flow {id}: {forward:?}");
        (id, true)
    }

    pub fn get(&self, id: FlowId) -> Option<&FlowRecord> {
        self.flows.get(&id)
    }

    pub fn get_mut(&mut self, id: FlowId) -> Option<&mut FlowRecord> {
        self.flows.get_mut(&id)
    }

    pub fn find(&self, key: &FlowKey) -> Option<FlowId> {
        self.index.get(key).copied()
    }

    /// Removes a flow together with both of its directional entries.
    pub fn evict(&mut self, id: FlowId) -> Option<FlowRecord> {
        let flow = self.flows.remove(&id)?;
        self.unindex(&flow.key, id);
        Some(flow)
    }

    // Evicts a flow observed closed
    pub fn evict_closed(&mut self, id: FlowId) -> Option<FlowRecord> {
        let flow = self.evict(id)?;
        self.stats.closed += 1;
        Some(flow)
    }

    /// Drops every flow idle past the flow timeout and hands them back.
    pub fn sweep_idle(&mut self, now: u64) -> Vec<FlowRecord> {
        let expired_ids: Vec<FlowId> = self.flows
            .iter()
            .filter(|(_, flow)| flow.check_idle(now))
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(flow) = self.evict(id) {
                self.stats.expired += 1;
                expired.push(flow);
            }
        }
        if !expired.is_empty() {
            debug!("Evicted {} idle flows", expired.len());
        }
        expired
    }

    fn unindex(&mut self, key: &FlowKey, id: FlowId) {
        for k in [*key, key.reverse()] {
            if self.index.get(&k) == Some(&id) {
                self.index.remove(&k);
            }
        }
    }

    // Number of live flows (not directional entries)
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}
