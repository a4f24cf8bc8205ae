//! Adaptive per-function cost statistics.
//!
//! Each function accumulates exponentially-weighted estimates of its
//! invocation cost and data volumes. The resolver reads them to break
//! candidate ties; the scheduler writes one observation per completed
//! node, so updates must be per-entry and lock-free at the map level.

use crate::catalog::descriptor::FunctionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Tunables for the cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModelConfig {
    /// EWMA weight of a new observation. Higher values chase recent
    /// invocations; lower values smooth over noisy timings.
    pub decay: f64,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self { decay: 0.1 }
    }
}

/// Exponentially-weighted cost estimate for one function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Estimated wall-clock cost of one invocation, in milliseconds.
    pub invocation_cost: f64,
    /// Estimated input data volume per invocation, in items.
    pub data_input_cost: f64,
    /// Estimated output data volume per invocation, in items.
    pub data_output_cost: f64,
    /// Number of observations folded into the estimate.
    pub samples: u64,
}

impl CostRecord {
    fn first(invocation_ms: f64, input_items: f64, output_items: f64) -> Self {
        Self {
            invocation_cost: invocation_ms,
            data_input_cost: input_items,
            data_output_cost: output_items,
            samples: 1,
        }
    }

    fn observe(&mut self, decay: f64, invocation_ms: f64, input_items: f64, output_items: f64) {
        let keep = 1.0 - decay;
        self.invocation_cost = decay * invocation_ms + keep * self.invocation_cost;
        self.data_input_cost = decay * input_items + keep * self.data_input_cost;
        self.data_output_cost = decay * output_items + keep * self.data_output_cost;
        self.samples += 1;
    }

    /// Blended score used for resolver tie-breaks and scheduler ordering
    /// hints. Lower is cheaper.
    pub fn score(&self) -> f64 {
        self.invocation_cost + 0.1 * (self.data_input_cost + self.data_output_cost)
    }
}

/// Serializable snapshot of all cost records, for seeding and flushing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub taken_at: DateTime<Utc>,
    pub records: BTreeMap<String, CostRecord>,
}

/// Concurrent per-function cost statistics.
///
/// Records persist across graph rebuilds and outlive individual graphs.
/// Updates touch a single map entry; there is no global lock.
pub struct CostModel {
    records: DashMap<FunctionId, CostRecord>,
    config: CostModelConfig,
}

/// Neutral score for functions with no observations yet.
const DEFAULT_SCORE: f64 = 1.0;

impl CostModel {
    pub fn new(config: CostModelConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    /// Fold one real invocation into the estimate for `function`.
    pub fn update(
        &self,
        function: &FunctionId,
        invocation_ms: f64,
        input_items: usize,
        output_items: usize,
    ) {
        let input_items = input_items as f64;
        let output_items = output_items as f64;
        match self.records.get_mut(function) {
            Some(mut record) => {
                record.observe(self.config.decay, invocation_ms, input_items, output_items)
            }
            None => {
                self.records.insert(
                    function.clone(),
                    CostRecord::first(invocation_ms, input_items, output_items),
                );
            }
        }
    }

    /// Estimated cost score for `function`. Unseen functions get a
    /// neutral default so resolution never fails on missing statistics.
    pub fn estimate(&self, function: &FunctionId) -> f64 {
        self.records
            .get(function)
            .map(|r| r.score())
            .unwrap_or(DEFAULT_SCORE)
    }

    pub fn record(&self, function: &FunctionId) -> Option<CostRecord> {
        self.records.get(function).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot current statistics for persistence.
    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            taken_at: Utc::now(),
            records: self
                .records
                .iter()
                .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
                .collect(),
        }
    }

    /// Seed statistics from a previously persisted snapshot. Existing
    /// entries are left untouched so live observations win over stale
    /// persisted ones.
    pub fn seed(&self, snapshot: &CostSnapshot) {
        for (id, record) in &snapshot.records {
            self.records
                .entry(FunctionId::new(id.clone()))
                .or_insert(*record);
        }
    }

    /// Flush current statistics as JSON.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(writer, &self.snapshot())
    }

    /// Seed statistics from persisted JSON.
    pub fn load_from<R: Read>(&self, reader: R) -> Result<(), serde_json::Error> {
        let snapshot: CostSnapshot = serde_json::from_reader(reader)?;
        self.seed(&snapshot);
        Ok(())
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(CostModelConfig::default())
    }
}

impl fmt::Display for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Cost Model ({} functions) ===", self.records.len())?;
        let mut rows: Vec<(String, CostRecord)> = self
            .records
            .iter()
            .map(|e| (e.key().as_str().to_string(), *e.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, record) in rows {
            writeln!(
                f,
                "  {:<30} {:>10.3} ms  in {:>8.1}  out {:>8.1}  ({} samples)",
                id,
                record.invocation_cost,
                record.data_input_cost,
                record.data_output_cost,
                record.samples
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_observation_seeds_directly() {
        let model = CostModel::default();
        let id = FunctionId::new("PvFn");
        model.update(&id, 12.0, 3, 1);

        let record = model.record(&id).unwrap();
        assert_relative_eq!(record.invocation_cost, 12.0);
        assert_relative_eq!(record.data_input_cost, 3.0);
        assert_eq!(record.samples, 1);
    }

    #[test]
    fn test_ewma_weights_new_samples() {
        let model = CostModel::new(CostModelConfig { decay: 0.5 });
        let id = FunctionId::new("PvFn");
        model.update(&id, 10.0, 1, 1);
        model.update(&id, 20.0, 1, 1);

        let record = model.record(&id).unwrap();
        assert_relative_eq!(record.invocation_cost, 15.0);
        assert_eq!(record.samples, 2);
    }

    #[test]
    fn test_unseen_function_gets_neutral_estimate() {
        let model = CostModel::default();
        assert_relative_eq!(model.estimate(&FunctionId::new("Nope")), DEFAULT_SCORE);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let model = CostModel::default();
        model.update(&FunctionId::new("A"), 5.0, 2, 2);
        model.update(&FunctionId::new("B"), 7.0, 1, 1);

        let mut buffer = Vec::new();
        model.save_to(&mut buffer).unwrap();

        let restored = CostModel::default();
        restored.load_from(buffer.as_slice()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_relative_eq!(
            restored.record(&FunctionId::new("A")).unwrap().invocation_cost,
            5.0
        );
    }

    #[test]
    fn test_seed_does_not_clobber_live_entries() {
        let model = CostModel::default();
        let id = FunctionId::new("A");
        model.update(&id, 100.0, 1, 1);

        let mut records = BTreeMap::new();
        records.insert(
            "A".to_string(),
            CostRecord::first(1.0, 1.0, 1.0),
        );
        model.seed(&CostSnapshot {
            taken_at: Utc::now(),
            records,
        });

        assert_relative_eq!(model.record(&id).unwrap().invocation_cost, 100.0);
    }

    #[test]
    fn test_persistence_to_file() {
        let model = CostModel::default();
        model.update(&FunctionId::new("CurveFn"), 3.0, 10, 50);

        let file = tempfile::NamedTempFile::new().unwrap();
        model.save_to(file.reopen().unwrap()).unwrap();

        let restored = CostModel::default();
        restored.load_from(file.reopen().unwrap()).unwrap();
        assert_eq!(restored.len(), 1);
    }
}
