pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod mitigation;
pub mod processor;
pub mod types;

use anyhow::Context;
use std::path::Path;

use classifier::RandomForestClassifier;
use config::DetectorConfig;
use mitigation::OnosRuleInstaller;
use processor::DetectorEngine;

pub use error::{FlowGuardError, Result};

/// Wires a running engine from files: an optional JSON config, the forest
/// model and the controller's REST root. Packets go to `engine.get_sender()`.
///
/// A model that fails to load is logged and the engine runs unloaded, which
/// classifies every flow as ERROR and never blocks.
pub fn start_detector(
    config_path: Option<&Path>,
    model_path: &Path,
    controller_url: &str,
) -> anyhow::Result<DetectorEngine> {
    let config = match config_path {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DetectorConfig::default(),
    };

    let mut classifier = RandomForestClassifier::new();
    if let Err(e) = classifier.load_file(model_path) {
        log::error!("Running without a model ({}): {e}", model_path.display());
    }

    let installer = OnosRuleInstaller::new(controller_url, config.rule_request_timeout());

    let mut engine = DetectorEngine::new();
    engine
        .initialize(config, Box::new(classifier), Box::new(installer))
        .context("Failed to start detector engine")?;
    Ok(engine)
}
