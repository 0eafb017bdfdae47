pub mod aggregator;
pub mod onos;
pub mod rules;

pub use aggregator::{AttackAggregator, AttackRecord, AttackerKey, BlockCandidate, VictimKey};
pub use onos::OnosRuleInstaller;
pub use rules::{
    spawn_rule_worker, BlockRequest, MatchCriterion, RuleCommand, RuleHandle, RuleInstaller,
    RuleOutcome, RuleWorkerHandles,
};
