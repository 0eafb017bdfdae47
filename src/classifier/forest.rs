use log::{debug, error, info};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::processor::FlowFeatures;
use super::labels::FlowClass;
use super::model::Forest;

/// Labels a finished flow. Implementations must not panic and report
/// `FlowClass::Error` when they cannot decide.
pub trait FlowClassifier: Send {
    fn classify(&self, features: &FlowFeatures) -> FlowClass;

    fn is_loaded(&self) -> bool;
}

/// Majority label across votes; ties go to the lowest label.
pub fn majority_vote(labels: &[i32]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut best: Option<(i32, usize)> = None;
    for (label, count) in counts {
        match best {
            Some((_, c)) if c >= count => {}
            _ => best = Some((label, count)),
        }
    }
    best.map(|(label, _)| label)
}

/// In-process random forest over the flattened flow feature vector.
#[derive(Debug, Default)]
pub struct RandomForestClassifier {
    forest: Option<Forest>,
}

impl RandomForestClassifier {
    pub fn new() -> Self {
        Self { forest: None }
    }

    pub fn with_forest(forest: Forest) -> Result<Self> {
        let mut classifier = Self::new();
        classifier.load(forest)?;
        Ok(classifier)
    }

    /// Installs a forest. A malformed one leaves the classifier unloaded.
    pub fn load(&mut self, forest: Forest) -> Result<()> {
        self.forest = None;
        match forest.validate() {
            Ok(()) => {
                info!("Random forest loaded with {} trees", forest.trees.len());
                self.forest = Some(forest);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load random forest: {e}");
                Err(e)
            }
        }
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        self.forest = None;
        let forest = Forest::from_json(json).map_err(|e| {
            error!("Couldn't decode random forest: {e}");
            e
        })?;
        self.load(forest)
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.forest = None;
        let json = fs::read_to_string(path.as_ref()).map_err(|e| {
            error!("Couldn't read model {}: {e}", path.as_ref().display());
            e
        })?;
        self.load_json(&json)
    }

    pub fn tree_count(&self) -> usize {
        self.forest.as_ref().map_or(0, |f| f.trees.len())
    }

    pub fn classify_vector(&self, features: &[f64]) -> FlowClass {
        let Some(forest) = &self.forest else {
            return FlowClass::Error;
        };
        let votes: Vec<i32> = forest.trees.iter().filter_map(|t| t.evaluate(features)).collect();
        match majority_vote(&votes) {
            Some(label) => FlowClass::from_code(label),
            None => FlowClass::Error,
        }
    }
}

impl FlowClassifier for RandomForestClassifier {
    fn classify(&self, features: &FlowFeatures) -> FlowClass {
        let class = self.classify_vector(&features.to_vector());
        debug!("Flow {:?} classified as {class}", features.key);
        class
    }

    fn is_loaded(&self) -> bool {
        self.forest.is_some()
    }
}
