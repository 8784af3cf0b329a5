use crate::model::HistoryRecord;
use serde::{Deserialize, Serialize};

/// Observed span of one metric across a run's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub first: f64,
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl MetricRange {
    /// True when every value of `self` is strictly below every value of `next`.
    pub fn strictly_before(&self, next: &MetricRange) -> bool {
        self.max < next.min
    }
}

/// Values of `metric` in history order, skipping rows where it is absent.
pub fn metric_values(records: &[HistoryRecord], metric: &str) -> Vec<f64> {
    records.iter().filter_map(|r| r.metric(metric)).collect()
}

/// Compute the range of `metric`, or `None` when no row carries it.
pub fn compute_range(records: &[HistoryRecord], metric: &str) -> Option<MetricRange> {
    let values = metric_values(records, metric);
    let first = *values.first()?;
    let last = *values.last()?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(MetricRange {
        first,
        last,
        min,
        max,
        count: values.len(),
    })
}

/// Non-decreasing check used on merged histories.
pub fn is_non_decreasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}
