//! `fairq prio` — render the factors report.

use fairq_core::BackendKind;
use fairq_engine::{FactorWeights, FactorsReport, JobFactorsEntry};

use crate::client;

const FACTOR_NAMES: [&str; 5] = ["AGE", "FAIRSHARE", "JOBSIZE", "PARTITION", "QOS"];

pub async fn run(
    host: &str,
    jobs: Option<&str>,
    users: Option<&str>,
    normalized: bool,
    long: bool,
) -> anyhow::Result<()> {
    let report = client::fetch_factors(host, jobs, users).await?;

    if report.backend != BackendKind::Multifactor {
        eprintln!(
            "fairq prio: controller runs the {:?} backend, no factor breakdown available",
            report.backend
        );
        std::process::exit(1);
    }

    print!("{}", render(&report, normalized, long));
    Ok(())
}

/// Columns shown: zero-weight factors are hidden unless `long` is set.
fn visible_factors(weights: &FactorWeights, long: bool) -> Vec<usize> {
    let values = weight_values(weights);
    (0..FACTOR_NAMES.len())
        .filter(|&i| long || values[i] > 0)
        .collect()
}

fn weight_values(weights: &FactorWeights) -> [u32; 5] {
    [
        weights.age,
        weights.fairshare,
        weights.job_size,
        weights.partition,
        weights.qos,
    ]
}

fn factor_values(entry: &JobFactorsEntry) -> [f64; 5] {
    [
        entry.factors.age,
        entry.factors.fairshare,
        entry.factors.job_size,
        entry.factors.partition,
        entry.factors.qos,
    ]
}

fn render(report: &FactorsReport, normalized: bool, long: bool) -> String {
    let visible = visible_factors(&report.weights, long);
    let weights = weight_values(&report.weights);

    let mut out = String::new();
    out.push_str(&format!("{:>10} {:>8} {:>10}", "JOBID", "USER", "PRIORITY"));
    for &i in &visible {
        out.push_str(&format!(" {:>10}", FACTOR_NAMES[i]));
    }
    out.push('\n');

    for entry in &report.entries {
        out.push_str(&format!(
            "{:>10} {:>8} {:>10}",
            entry.job_id, entry.user_id, entry.priority
        ));
        let factors = factor_values(entry);
        for &i in &visible {
            if normalized {
                out.push_str(&format!(" {:>10.7}", factors[i]));
            } else {
                let weighted = factors[i] * f64::from(weights[i]);
                out.push_str(&format!(" {:>10}", weighted.round() as u64));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairq_engine::PriorityFactors;

    fn report() -> FactorsReport {
        FactorsReport {
            backend: BackendKind::Multifactor,
            weights: FactorWeights {
                age: 1000,
                fairshare: 10_000,
                job_size: 0,
                partition: 0,
                qos: 0,
            },
            entries: vec![JobFactorsEntry {
                job_id: 42,
                user_id: 500,
                priority: 8200,
                nice: fairq_core::NICE_OFFSET,
                factors: PriorityFactors {
                    age: 0.2,
                    fairshare: 0.8,
                    job_size: 0.0,
                    partition: 0.0,
                    qos: 0.0,
                },
            }],
        }
    }

    #[test]
    fn default_view_hides_zero_weight_columns() {
        let rendered = render(&report(), false, false);
        assert!(rendered.contains("AGE"));
        assert!(rendered.contains("FAIRSHARE"));
        assert!(!rendered.contains("JOBSIZE"));
        assert!(!rendered.contains("PARTITION"));
    }

    #[test]
    fn long_view_shows_every_column() {
        let rendered = render(&report(), false, true);
        for name in FACTOR_NAMES {
            assert!(rendered.contains(name), "missing column {name}");
        }
    }

    #[test]
    fn default_view_shows_weighted_components() {
        let rendered = render(&report(), false, false);
        // age 0.2 * 1000 and fairshare 0.8 * 10000.
        assert!(rendered.contains("200"));
        assert!(rendered.contains("8000"));
        assert!(rendered.contains("8200")); // PRIORITY column
    }

    #[test]
    fn normalized_view_shows_raw_factors() {
        let rendered = render(&report(), true, false);
        assert!(rendered.contains("0.2000000"));
        assert!(rendered.contains("0.8000000"));
    }
}
