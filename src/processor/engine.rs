use crossbeam_channel::{select, tick, unbounded, Receiver, SendError, Sender};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::capture::PacketRecord;
use crate::classifier::FlowClassifier;
use crate::config::DetectorConfig;
use crate::error::{FlowGuardError, Result};
use crate::mitigation::{spawn_rule_worker, RuleCommand, RuleInstaller, RuleOutcome};
use crate::types::EngineStats;
use super::dispatcher::Dispatcher;

#[inline]
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// Dispatcher on one thread fed by the packet channel, rule installer on another
pub struct DetectorEngine {
    running: Arc<AtomicBool>,
    packet_tx: Sender<PacketRecord>,
    packet_rx: Receiver<PacketRecord>,
    stats: Arc<Mutex<EngineStats>>,
    processing_thread: Option<JoinHandle<()>>,
    rule_thread: Option<JoinHandle<()>>,
}

impl Default for DetectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorEngine {
    pub fn new() -> Self {
        let (packet_tx, packet_rx) = unbounded();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            packet_tx,
            packet_rx,
            stats: Arc::new(Mutex::new(EngineStats::default())),
            processing_thread: None,
            rule_thread: None,
        }
    }

    pub fn get_sender(&self) -> Sender<PacketRecord> {
        self.packet_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn initialize(
        &mut self,
        config: DetectorConfig,
        classifier: Box<dyn FlowClassifier>,
        installer: Box<dyn RuleInstaller>,
    ) -> Result<()> {
        if self.running.load(Ordering::Relaxed) {
            return Err(FlowGuardError::AlreadyRunning);
        }
        config.validate()?;
        self.running.store(true, Ordering::Relaxed);

        let rules = spawn_rule_worker(installer);
        let processing = {
            let running = self.running.clone();
            let packet_rx = self.packet_rx.clone();
            let stats = self.stats.clone();
            let dispatcher = Dispatcher::new(config.clone(), classifier);
            let tick_interval = config.tick_interval();
            thread::spawn(move || {
                processing_loop(running, dispatcher, packet_rx, rules.tx, rules.rx, stats, tick_interval)
            })
        };

        self.processing_thread = Some(processing);
        self.rule_thread = Some(rules.thread);
        info!("Detector engine started");
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(FlowGuardError::NotRunning);
        }
        self.running.store(false, Ordering::Relaxed);

        // The loop drops the command sender on exit, which lets the rule worker drain and stop
        if let Some(h) = self.processing_thread.take() { let _ = h.join(); }
        if let Some(h) = self.rule_thread.take() { let _ = h.join(); }
        info!("Detector engine stopped");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Drop for DetectorEngine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}

// A dead rule worker fails the install, so the attacker becomes eligible again
fn forward_commands(dispatcher: &mut Dispatcher, rule_tx: &Sender<RuleCommand>, commands: Vec<RuleCommand>) {
    for cmd in commands {
        if let Err(SendError(cmd)) = rule_tx.send(cmd) {
            warn!("Rule worker is gone, dropping rule command");
            if let RuleCommand::Install(req) = cmd {
                let outcome = RuleOutcome::Failed { attacker: req.attacker, reason: "rule worker stopped".into() };
                dispatcher.on_rule_outcome(outcome, now_micros());
            }
        }
    }
}

fn processing_loop(
    running: Arc<AtomicBool>,
    mut dispatcher: Dispatcher,
    packet_rx: Receiver<PacketRecord>,
    rule_tx: Sender<RuleCommand>,
    outcome_rx: Receiver<RuleOutcome>,
    stats: Arc<Mutex<EngineStats>>,
    tick_interval: Duration,
) {
    let start_time = now_micros();
    let sweep_tick = tick(tick_interval);

    loop {
        if !running.load(Ordering::Relaxed) { break; }

        select! {
            // We get the packets from the packet source
            recv(packet_rx) -> msg => {
                if let Ok(pkt) = msg {
                    let commands = dispatcher.process(&pkt);
                    forward_commands(&mut dispatcher, &rule_tx, commands);
                }
            },

            // Results coming back from the rule worker
            recv(outcome_rx) -> msg => {
                if let Ok(outcome) = msg {
                    dispatcher.on_rule_outcome(outcome, now_micros());
                }
            },

            // Idle flows, block decisions, expired blocks, then publish counters
            recv(sweep_tick) -> _ => {
                let now = now_micros();
                let commands = dispatcher.sweep(now);
                forward_commands(&mut dispatcher, &rule_tx, commands);

                let mut snapshot = dispatcher.stats();
                snapshot.uptime_seconds = now.saturating_sub(start_time) / 1_000_000;
                if let Ok(mut s) = stats.lock() {
                    *s = snapshot;
                }
            },
        }
    }
}
