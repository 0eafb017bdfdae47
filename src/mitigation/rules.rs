use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::thread::{self, JoinHandle};

use crate::capture::IP_PROTO_TCP;
use crate::config::DetectorConfig;
use super::aggregator::{AttackerKey, BlockCandidate};

/// One match field of a block rule. Addresses always match as /32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCriterion {
    IpProto(u8),
    TcpDst(u16),
    Ipv4Dst(Ipv4Addr),
    Ipv4Src(Ipv4Addr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub attacker: AttackerKey,
    pub device_id: String,
    pub priority: u32,
    pub timeout_secs: u64,
    pub permanent: bool,
}

impl BlockRequest {
    pub fn new(candidate: &BlockCandidate, config: &DetectorConfig) -> Self {
        Self {
            attacker: candidate.attacker,
            device_id: candidate.device_id.clone(),
            priority: config.rule_priority,
            timeout_secs: config.block_lifetime_secs,
            permanent: false,
        }
    }

    // Drops TCP from the attacker to the victim's port
    pub fn criteria(&self) -> [MatchCriterion; 4] {
        [
            MatchCriterion::IpProto(IP_PROTO_TCP),
            MatchCriterion::TcpDst(self.attacker.victim_port),
            MatchCriterion::Ipv4Dst(self.attacker.victim),
            MatchCriterion::Ipv4Src(self.attacker.attacker),
        ]
    }
}

/// Opaque reference to an installed rule, as returned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleHandle {
    pub device_id: String,
    pub rule_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCommand {
    Install(BlockRequest),
    Remove(RuleHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Installed { attacker: AttackerKey, handle: RuleHandle },
    Failed { attacker: AttackerKey, reason: String },
    Removed(RuleHandle),
    RemoveFailed { handle: RuleHandle, reason: String },
}

/// Talks to whatever installs forwarding rules. Calls may block; they run on
/// the rule worker thread, never on the packet path.
pub trait RuleInstaller: Send {
    fn install(&mut self, request: &BlockRequest) -> Result<RuleHandle>;

    fn remove(&mut self, handle: &RuleHandle) -> Result<()>;
}

pub struct RuleWorkerHandles {
    pub tx: Sender<RuleCommand>,
    pub rx: Receiver<RuleOutcome>,
    pub thread: JoinHandle<()>,
}

/// Runs `installer` on its own thread until every command sender is dropped.
pub fn spawn_rule_worker(mut installer: Box<dyn RuleInstaller>) -> RuleWorkerHandles {
    let (tx_in, rx_in) = unbounded::<RuleCommand>();
    let (tx_out, rx_out) = unbounded::<RuleOutcome>();

    let thread = thread::spawn(move || {
        info!("Rule worker ready");
        while let Ok(cmd) = rx_in.recv() {
            let outcome = execute(installer.as_mut(), cmd);
            if tx_out.send(outcome).is_err() {
                break;
            }
        }
        info!("Rule worker exiting (channel closed)");
    });

    RuleWorkerHandles { tx: tx_in, rx: rx_out, thread }
}

fn execute(installer: &mut dyn RuleInstaller, cmd: RuleCommand) -> RuleOutcome {
    match cmd {
        RuleCommand::Install(request) => {
            let a = request.attacker;
            match installer.install(&request) {
                Ok(handle) => {
                    info!(
                        "Added flow rule {} to block attack, Key(srcip: {}, dstip: {}, dstport: {})",
                        handle.rule_id, a.attacker, a.victim, a.victim_port
                    );
                    RuleOutcome::Installed { attacker: a, handle }
                }
                Err(e) => {
                    warn!(
                        "Failed to add flow rule, Key(srcip: {}, dstip: {}, dstport: {}): {e:#}",
                        a.attacker, a.victim, a.victim_port
                    );
                    RuleOutcome::Failed { attacker: a, reason: format!("{e:#}") }
                }
            }
        }
        RuleCommand::Remove(handle) => match installer.remove(&handle) {
            Ok(()) => {
                info!("Removed expired flow rule {} on {}", handle.rule_id, handle.device_id);
                RuleOutcome::Removed(handle)
            }
            Err(e) => {
                warn!("Failed to remove flow rule {}: {e:#}", handle.rule_id);
                RuleOutcome::RemoveFailed { handle, reason: format!("{e:#}") }
            }
        },
    }
}
