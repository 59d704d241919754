//! Phenotype scoring

use super::{PhenotypeMapping, PhenotypeMatchResult, Threshold};
use crate::types::SignalsSummary;
use std::cmp::Ordering;
use tracing::debug;

/// Matches at or below this score are discarded
pub const MATCH_SCORE_FLOOR: f64 = 0.5;

/// Scores one phenotype against a summary
pub trait ScoringStrategy: Send + Sync {
    /// Score in [0, 1] plus descriptions of the thresholds that contributed
    fn score(&self, phenotype: &PhenotypeMapping, summary: &SignalsSummary) -> (f64, Vec<String>);
}

/// Binary per-threshold scoring: `matched / declared × confidence`.
///
/// Unset summary fields count as neither match nor mismatch, and values just
/// outside a window earn no credit.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardThresholdScoring;

impl ScoringStrategy for HardThresholdScoring {
    fn score(&self, phenotype: &PhenotypeMapping, summary: &SignalsSummary) -> (f64, Vec<String>) {
        if phenotype.thresholds.is_empty() {
            return (0.0, Vec::new());
        }

        let matched: Vec<String> = phenotype
            .thresholds
            .iter()
            .filter_map(|t| {
                let value = t.metric.read(summary)?;
                t.contains(value).then(|| describe(t, value))
            })
            .collect();

        let score =
            matched.len() as f64 / phenotype.thresholds.len() as f64 * phenotype.confidence_score;
        (score, matched)
    }
}

fn describe(threshold: &Threshold, value: f64) -> String {
    let metric = serde_json::to_value(threshold.metric)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    match (threshold.min, threshold.max) {
        (Some(min), Some(max)) => format!("{} {:.2} in [{}, {}]", metric, value, min, max),
        (Some(min), None) => format!("{} {:.2} >= {}", metric, value, min),
        (None, Some(max)) => format!("{} {:.2} <= {}", metric, value, max),
        (None, None) => format!("{} {:.2}", metric, value),
    }
}

/// Matches a summary against a phenotype library
pub struct PhenotypeMatcher {
    library: &'static [PhenotypeMapping],
    strategy: Box<dyn ScoringStrategy>,
}

impl Default for PhenotypeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhenotypeMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhenotypeMatcher")
            .field("phenotypes", &self.library.len())
            .finish()
    }
}

impl PhenotypeMatcher {
    /// Matcher over the built-in library with hard-threshold scoring
    pub fn new() -> Self {
        Self::with_strategy(Box::new(HardThresholdScoring))
    }

    pub fn with_strategy(strategy: Box<dyn ScoringStrategy>) -> Self {
        Self {
            library: super::phenotypes(),
            strategy,
        }
    }

    /// Score every phenotype; keep those above the floor, best first.
    ///
    /// Pure: identical summaries yield identical results.
    pub fn match_phenotypes(&self, summary: &SignalsSummary) -> Vec<PhenotypeMatchResult> {
        let mut results: Vec<PhenotypeMatchResult> = self
            .library
            .iter()
            .filter_map(|phenotype| {
                let (match_score, matched_patterns) = self.strategy.score(phenotype, summary);
                (match_score > MATCH_SCORE_FLOOR).then_some(PhenotypeMatchResult {
                    phenotype,
                    match_score: match_score.clamp(0.0, 1.0),
                    matched_patterns,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(Ordering::Equal)
        });

        debug!(
            matched = results.len(),
            top = results.first().map(|r| r.phenotype.id).unwrap_or("none"),
            "Matched phenotypes"
        );

        results
    }
}
