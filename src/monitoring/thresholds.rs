//! Warning/critical boundaries per metric

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::messages::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// Severity of a value, checking critical first.
    ///
    /// A value equal to a boundary meets it. Values below `warning` yield `None`.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value >= self.critical {
            Some(Severity::Critical)
        } else if value >= self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

/// Threshold set keyed by metric name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thresholds(BTreeMap<String, Threshold>);

impl Thresholds {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, metric: &str) -> Option<&Threshold> {
        self.0.get(metric)
    }

    pub fn insert(&mut self, metric: impl Into<String>, threshold: Threshold) {
        self.0.insert(metric.into(), threshold);
    }

    /// Per-metric override; metrics missing from `partial` keep their thresholds
    pub fn merge(&mut self, partial: Thresholds) {
        self.0.extend(partial.0);
    }

    pub fn classify(&self, metric: &str, value: f64) -> Option<Severity> {
        self.get(metric)?.classify(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Threshold)> {
        self.0.iter()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("cpu".to_string(), Threshold::new(70.0, 90.0)),
            ("memory".to_string(), Threshold::new(80.0, 95.0)),
            ("disk".to_string(), Threshold::new(85.0, 95.0)),
        ]))
    }
}

impl FromIterator<(String, Threshold)> for Thresholds {
    fn from_iter<T: IntoIterator<Item = (String, Threshold)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
