//! Metric data
//!
//! Metrics carry no trace correlation, so routing is decided per resource,
//! service or metric name by the metrics adapter rather than per data point.

use serde::{Deserialize, Serialize};

use super::{Batch, KeyValue};

/// A batch of metrics
pub type Metrics = Batch<Metric>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberDataPoint {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(default)]
    pub time_unix_nano: u64,
    pub value: NumberValue,
}

impl NumberDataPoint {
    pub fn new(value: NumberValue) -> Self {
        Self {
            attributes: Vec::new(),
            time_unix_nano: 0,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramDataPoint {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(default)]
    pub time_unix_nano: u64,
    pub count: u64,
    pub sum: f64,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricData {
    Gauge { data_points: Vec<NumberDataPoint> },
    Sum { data_points: Vec<NumberDataPoint>, is_monotonic: bool },
    Histogram { data_points: Vec<HistogramDataPoint> },
}

impl MetricData {
    pub fn data_point_count(&self) -> usize {
        match self {
            Self::Gauge { data_points } => data_points.len(),
            Self::Sum { data_points, .. } => data_points.len(),
            Self::Histogram { data_points } => data_points.len(),
        }
    }
}

/// One named metric stream and its data points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    pub data: MetricData,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, data_points: Vec<NumberDataPoint>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Gauge { data_points },
        }
    }

    pub fn sum(name: impl Into<String>, data_points: Vec<NumberDataPoint>, is_monotonic: bool) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Sum {
                data_points,
                is_monotonic,
            },
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}
