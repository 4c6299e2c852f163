//! # Statistics for Cost-Based Selection
//!
//! The planner queries statistics through the narrow [`StatsProvider`]
//! interface: table cardinality, per-column distinct counts, and an optional
//! equi-depth histogram. Providers may block, but must honor the session
//! cancellation signal, and must be safe for concurrent readers since a
//! single provider is typically shared across sessions.
//!
//! Missing statistics are soft: the coster substitutes
//! [`DEFAULT_TABLE_CARDINALITY`] and default selectivities and planning
//! continues.

use crate::catalog::TableRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback cardinality when a table has no statistics.
pub const DEFAULT_TABLE_CARDINALITY: f64 = 1000.0;

/// Selectivity of a predicate we cannot estimate.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range predicate without histogram support.
pub const DEFAULT_RANGE_SELECTIVITY: f64 = 0.33;

/// Statistics provider interface. `row_count` and `distinct_values` return
/// `None` when the statistic is unknown.
pub trait StatsProvider: Send + Sync {
    fn row_count(&self, table: &TableRef) -> Option<f64>;
    fn distinct_values(&self, table: &TableRef, column: &str) -> Option<f64>;
    fn histogram(&self, _table: &TableRef, _column: &str) -> Option<Histogram> {
        None
    }
}

/// Equi-depth histogram. Each bucket holds roughly the same number of rows,
/// which tightens range selectivity compared to the uniform assumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Lower bound of the bucket range (inclusive).
    pub lower: f64,
    /// Upper bound of the bucket range (inclusive).
    pub upper: f64,
    /// Estimated number of rows in this bucket.
    pub count: f64,
    /// Estimated number of distinct values in this bucket.
    pub distinct: f64,
}

impl Histogram {
    /// Estimated fraction of rows strictly or inclusively below `bound`.
    /// Buckets are assumed uniform internally.
    pub fn fraction_below(&self, bound: f64) -> f64 {
        let total: f64 = self.buckets.iter().map(|b| b.count).sum();
        if total <= 0.0 {
            return DEFAULT_RANGE_SELECTIVITY;
        }
        let mut below = 0.0;
        for b in &self.buckets {
            if b.upper <= bound {
                below += b.count;
            } else if b.lower < bound {
                let span = (b.upper - b.lower).max(f64::EPSILON);
                below += b.count * ((bound - b.lower) / span);
            }
        }
        (below / total).clamp(0.0, 1.0)
    }
}

/// In-memory statistics provider for testing and development.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    rows: HashMap<String, f64>,
    ndv: HashMap<String, f64>,
    histograms: HashMap<String, Histogram>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_row_count(&mut self, table: &TableRef, rows: f64) {
        self.rows.insert(table_key(table), rows);
    }

    pub fn set_distinct_values(&mut self, table: &TableRef, column: &str, ndv: f64) {
        self.ndv
            .insert(col_key(table, column), ndv);
    }

    pub fn set_histogram(&mut self, table: &TableRef, column: &str, hist: Histogram) {
        self.histograms.insert(col_key(table, column), hist);
    }
}

impl StatsProvider for MemoryStats {
    fn row_count(&self, table: &TableRef) -> Option<f64> {
        self.rows.get(&table_key(table)).copied()
    }

    fn distinct_values(&self, table: &TableRef, column: &str) -> Option<f64> {
        self.ndv.get(&col_key(table, column)).copied()
    }

    fn histogram(&self, table: &TableRef, column: &str) -> Option<Histogram> {
        self.histograms.get(&col_key(table, column)).cloned()
    }
}

fn col_key(table: &TableRef, column: &str) -> String {
    format!("{}.{}", table_key(table), column.to_lowercase())
}

fn table_key(table: &TableRef) -> String {
    format!("{}.{}", table.schema.to_lowercase(), table.name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stats_roundtrip() {
        let t = TableRef::new("db", "xy");
        let mut stats = MemoryStats::new();
        stats.set_row_count(&t, 1000.0);
        stats.set_distinct_values(&t, "y", 4.0);

        assert_eq!(stats.row_count(&t), Some(1000.0));
        assert_eq!(stats.distinct_values(&t, "Y"), Some(4.0));
        assert_eq!(stats.distinct_values(&t, "x"), None);
        assert!(stats.histogram(&t, "y").is_none());
    }

    #[test]
    fn test_histogram_fraction_below() {
        let hist = Histogram {
            buckets: vec![
                HistogramBucket {
                    lower: 0.0,
                    upper: 10.0,
                    count: 100.0,
                    distinct: 10.0,
                },
                HistogramBucket {
                    lower: 10.0,
                    upper: 20.0,
                    count: 100.0,
                    distinct: 10.0,
                },
            ],
        };
        assert_eq!(hist.fraction_below(20.0), 1.0);
        assert_eq!(hist.fraction_below(10.0), 0.5);
        // Halfway through the second bucket, assuming uniform spread.
        assert!((hist.fraction_below(15.0) - 0.75).abs() < 1e-9);
        assert_eq!(hist.fraction_below(-5.0), 0.0);
    }
}
