//! Wire types for the per-factor priority breakdown.
//!
//! These travel between the controller's factors endpoint and the
//! reporting CLI, which multiplies the normalized factors by the weights
//! for its default display.

use serde::{Deserialize, Serialize};

use fairq_core::BackendKind;

/// The configured factor weights, snapshotted at report time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub age: u32,
    pub fairshare: u32,
    pub job_size: u32,
    pub partition: u32,
    pub qos: u32,
}

/// Normalized factor values for one job, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityFactors {
    pub age: f64,
    pub fairshare: f64,
    pub job_size: f64,
    pub partition: f64,
    pub qos: f64,
}

impl PriorityFactors {
    /// Weighted sum of all five factors.
    pub fn weighted_total(&self, weights: &FactorWeights) -> f64 {
        self.age * f64::from(weights.age)
            + self.fairshare * f64::from(weights.fairshare)
            + self.job_size * f64::from(weights.job_size)
            + self.partition * f64::from(weights.partition)
            + self.qos * f64::from(weights.qos)
    }
}

/// Per-job entry of the factors report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFactorsEntry {
    pub job_id: u32,
    pub user_id: u32,
    /// The job's current stored priority.
    pub priority: u32,
    /// Biased nice value the stored priority was adjusted by.
    pub nice: u32,
    pub factors: PriorityFactors,
}

/// The full factors report: backend, weights, and one entry per pending
/// job that matched the request filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorsReport {
    pub backend: BackendKind,
    pub weights: FactorWeights,
    pub entries: Vec<JobFactorsEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_total_sums_all_factors() {
        let factors = PriorityFactors {
            age: 0.2,
            fairshare: 0.8,
            job_size: 1.0,
            partition: 0.5,
            qos: 0.25,
        };
        let weights = FactorWeights {
            age: 1000,
            fairshare: 10_000,
            job_size: 100,
            partition: 10,
            qos: 4,
        };
        assert_eq!(factors.weighted_total(&weights), 200.0 + 8000.0 + 100.0 + 5.0 + 1.0);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = FactorsReport {
            backend: BackendKind::Multifactor,
            weights: FactorWeights {
                age: 1,
                ..Default::default()
            },
            entries: vec![JobFactorsEntry {
                job_id: 7,
                user_id: 500,
                priority: 8200,
                nice: fairq_core::NICE_OFFSET,
                factors: PriorityFactors::default(),
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: FactorsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entries.len(), 1);
        assert_eq!(back.entries[0].job_id, 7);
        assert_eq!(back.weights.age, 1);
    }
}
