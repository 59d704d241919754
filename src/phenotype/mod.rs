//! Phenotype matching module
//!
//! A phenotype is a named pattern of summary thresholds that implies a probable
//! behavior and a set of recommended intervention levers. The library is static;
//! match results are recomputed on every call.
//!
//! Pipeline: SignalsSummary → ScoringStrategy (per phenotype) → filter > 0.5 → sort

pub mod catalog;
pub mod matcher;

pub use catalog::{phenotype, phenotypes, PHENOTYPES};
pub use matcher::{HardThresholdScoring, PhenotypeMatcher, ScoringStrategy, MATCH_SCORE_FLOOR};

use crate::types::{RiskLevel, SignalsSummary};
use serde::{Deserialize, Serialize};

/// Summary field a phenotype threshold reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMetric {
    FastingGlucose,
    PostprandialPeak,
    PostprandialMean,
    TimeInRange,
    TimeBelowRange,
    TimeAboveRange,
    VariabilityCv,
    NightHypoglycemiaCount,
    HrvMean,
    StepsMean,
    SleepDuration,
    DeepSleepRatio,
    SystolicBp,
    DiastolicBp,
    Weight,
    FatPercent,
}

impl SummaryMetric {
    /// Read the corresponding summary field, `None` when unset
    pub fn read(&self, summary: &SignalsSummary) -> Option<f64> {
        match self {
            SummaryMetric::FastingGlucose => summary.fasting_glucose_mean,
            SummaryMetric::PostprandialPeak => summary.postprandial_peak,
            SummaryMetric::PostprandialMean => summary.postprandial_mean,
            SummaryMetric::TimeInRange => summary.time_in_range,
            SummaryMetric::TimeBelowRange => summary.time_below_range,
            SummaryMetric::TimeAboveRange => summary.time_above_range,
            SummaryMetric::VariabilityCv => summary.variability_cv,
            SummaryMetric::NightHypoglycemiaCount => {
                summary.night_hypoglycemia_count.map(f64::from)
            }
            SummaryMetric::HrvMean => summary.hrv_mean,
            SummaryMetric::StepsMean => summary.steps_mean,
            SummaryMetric::SleepDuration => summary.sleep_duration_mean,
            SummaryMetric::DeepSleepRatio => summary.deep_sleep_ratio_mean,
            SummaryMetric::SystolicBp => summary.systolic_mean,
            SummaryMetric::DiastolicBp => summary.diastolic_mean,
            SummaryMetric::Weight => summary.weight_mean,
            SummaryMetric::FatPercent => summary.fat_percent_mean,
        }
    }
}

/// Inclusive window on one summary metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: SummaryMetric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Threshold {
    pub const fn at_least(metric: SummaryMetric, min: f64) -> Self {
        Self {
            metric,
            min: Some(min),
            max: None,
        }
    }

    pub const fn at_most(metric: SummaryMetric, max: f64) -> Self {
        Self {
            metric,
            min: None,
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Static phenotype definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhenotypeMapping {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub thresholds: &'static [Threshold],
    /// Lever ids recommended for this phenotype
    pub recommended_levers: &'static [&'static str],
    /// Conversation topics suggested when this phenotype matches
    pub topics: &'static [&'static str],
    pub risk_level: RiskLevel,
    /// Upper bound of the match score
    pub confidence_score: f64,
}

/// Scored match of one phenotype against a summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhenotypeMatchResult {
    pub phenotype: &'static PhenotypeMapping,
    /// In [0, 1]
    pub match_score: f64,
    /// Human-readable description of every threshold that matched
    pub matched_patterns: Vec<String>,
}
