//! Bounded per-metric history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric data point with timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Ring buffer of the most recent points of one metric, oldest first
#[derive(Debug, Clone)]
pub struct HistoricalSeries {
    points: VecDeque<MetricPoint>,
    capacity: usize,
}

impl HistoricalSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest one when full
    pub fn push(&mut self, point: MetricPoint) {
        if self.capacity == 0 {
            return;
        }

        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_vec(&self) -> Vec<MetricPoint> {
        self.points.iter().copied().collect()
    }
}
