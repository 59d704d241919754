//! Core types for the Synheart Coach pipeline
//!
//! This module defines the data structures that flow through the early stages of
//! the pipeline: raw device input, canonical signal records, and the aggregated
//! trajectory that every downstream stage reads.

use crate::error::CoachError;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Device family that produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Continuous glucose monitor
    Cgm,
    /// Blood-pressure cuff
    Bp,
    /// Heart-rate-variability band
    Hrv,
    /// Smart scale
    Scale,
    /// Activity watch
    Watch,
}

impl DeviceType {
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Cgm,
        DeviceType::Bp,
        DeviceType::Hrv,
        DeviceType::Scale,
        DeviceType::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Cgm => "cgm",
            DeviceType::Bp => "bp",
            DeviceType::Hrv => "hrv",
            DeviceType::Scale => "scale",
            DeviceType::Watch => "watch",
        }
    }
}

impl FromStr for DeviceType {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoachError::UnsupportedDevice(s.to_string()))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Glucose,
    SystolicBp,
    DiastolicBp,
    Rmssd,
    Sdnn,
    FatPercent,
    Weight,
    Steps,
    HeartRate,
    SleepDuration,
    DeepSleepRatio,
}

impl MetricType {
    pub const ALL: [MetricType; 11] = [
        MetricType::Glucose,
        MetricType::SystolicBp,
        MetricType::DiastolicBp,
        MetricType::Rmssd,
        MetricType::Sdnn,
        MetricType::FatPercent,
        MetricType::Weight,
        MetricType::Steps,
        MetricType::HeartRate,
        MetricType::SleepDuration,
        MetricType::DeepSleepRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Glucose => "glucose",
            MetricType::SystolicBp => "systolic_bp",
            MetricType::DiastolicBp => "diastolic_bp",
            MetricType::Rmssd => "rmssd",
            MetricType::Sdnn => "sdnn",
            MetricType::FatPercent => "fat_percent",
            MetricType::Weight => "weight",
            MetricType::Steps => "steps",
            MetricType::HeartRate => "heart_rate",
            MetricType::SleepDuration => "sleep_duration",
            MetricType::DeepSleepRatio => "deep_sleep_ratio",
        }
    }

    /// Canonical unit a normalized record is expressed in
    pub fn default_unit(&self) -> &'static str {
        match self {
            MetricType::Glucose => "mmol/L",
            MetricType::SystolicBp | MetricType::DiastolicBp => "mmHg",
            MetricType::Rmssd | MetricType::Sdnn => "ms",
            MetricType::FatPercent => "%",
            MetricType::Weight => "kg",
            MetricType::Steps => "steps",
            MetricType::HeartRate => "bpm",
            MetricType::SleepDuration => "h",
            MetricType::DeepSleepRatio => "ratio",
        }
    }
}

impl FromStr for MetricType {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoachError::UnknownMetric(s.to_string()))
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data quality classification for a canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    #[default]
    Valid,
    /// Parseable but outside the device's valid range
    Noise,
    Missing,
    /// Sensor warm-up or calibration window
    Calibrating,
}

/// Reading value as supplied by a device: numeric or textual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    /// Any other JSON shape; rejected during normalization
    Other(serde_json::Value),
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// Reading timestamp as supplied by a device: text or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    EpochMillis(i64),
    /// Any other JSON shape; treated as unparsable
    Other(serde_json::Value),
}

impl From<&str> for RawTimestamp {
    fn from(v: &str) -> Self {
        RawTimestamp::Text(v.to_string())
    }
}

/// Situational context attached to a reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fasting: Option<bool>,
    /// Minutes elapsed since the start of the last meal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_meal_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_state: Option<String>,
    /// Self-reported mood (0-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<f64>,
    /// Self-reported stress (0-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_score: Option<f64>,
    /// Sensor is warming up or calibrating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrating: Option<bool>,
}

/// Raw device reading as submitted by a caller
///
/// Every field is optional so that incomplete payloads can be reported
/// per record instead of failing deserialization of a whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSignalInput {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub value: Option<RawValue>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub context: Option<SignalContext>,
    #[serde(default)]
    pub raw_data: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
}

impl RawSignalInput {
    /// Convenience constructor for a complete numeric reading
    pub fn reading(
        user_id: &str,
        device_type: DeviceType,
        metric: MetricType,
        value: f64,
        timestamp: &str,
    ) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            device_type: Some(device_type.as_str().to_string()),
            metric: Some(metric.as_str().to_string()),
            value: Some(RawValue::Number(value)),
            timestamp: Some(RawTimestamp::Text(timestamp.to_string())),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: SignalContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Canonical, validated signal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_id: String,
    pub user_id: String,
    pub device_type: DeviceType,
    pub metric: MetricType,
    /// Always finite
    pub value: f64,
    pub unit: String,
    /// Reading time in the device's local offset
    pub timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub context: SignalContext,
    pub quality_flag: QualityFlag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
}

/// Transtheoretical-model behavior-change stage
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorStage {
    Precontemplation,
    #[default]
    Contemplation,
    Preparation,
    Action,
    Maintenance,
}

impl BehaviorStage {
    pub const ALL: [BehaviorStage; 5] = [
        BehaviorStage::Precontemplation,
        BehaviorStage::Contemplation,
        BehaviorStage::Preparation,
        BehaviorStage::Action,
        BehaviorStage::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorStage::Precontemplation => "precontemplation",
            BehaviorStage::Contemplation => "contemplation",
            BehaviorStage::Preparation => "preparation",
            BehaviorStage::Action => "action",
            BehaviorStage::Maintenance => "maintenance",
        }
    }

    /// Display name shown to coaches
    pub fn display_name(&self) -> &'static str {
        match self {
            BehaviorStage::Precontemplation => "前意向期",
            BehaviorStage::Contemplation => "意向期",
            BehaviorStage::Preparation => "准备期",
            BehaviorStage::Action => "行动期",
            BehaviorStage::Maintenance => "维持期",
        }
    }
}

impl fmt::Display for BehaviorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk severity of a phenotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Direction of a metric across the supplied reading order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Statistics derived from the signals in a trajectory window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalsSummary {
    /// Number of glucose readings in the window
    pub glucose_readings: usize,
    /// Mean glucose (mmol/L)
    pub glucose_mean: Option<f64>,
    /// Population standard deviation of glucose (mmol/L)
    pub glucose_std: Option<f64>,
    /// Mean of fasting-context glucose (mmol/L)
    pub fasting_glucose_mean: Option<f64>,
    /// Mean glucose within 120 minutes after a meal (mmol/L)
    pub postprandial_mean: Option<f64>,
    /// Peak glucose within 120 minutes after a meal (mmol/L)
    pub postprandial_peak: Option<f64>,
    /// % of readings in 3.9-10.0 mmol/L
    pub time_in_range: Option<f64>,
    /// % of readings below 3.9 mmol/L
    pub time_below_range: Option<f64>,
    /// % of readings above 10.0 mmol/L
    pub time_above_range: Option<f64>,
    /// Coefficient of variation, std / mean × 100
    pub variability_cv: Option<f64>,
    /// Readings below 3.9 mmol/L between 00:00 and 06:00 local time
    pub night_hypoglycemia_count: Option<u32>,
    /// Mean RMSSD (ms)
    pub hrv_mean: Option<f64>,
    pub hrv_trend: Option<Trend>,
    /// Mean SDNN (ms)
    pub sdnn_mean: Option<f64>,
    pub steps_mean: Option<f64>,
    pub steps_trend: Option<Trend>,
    /// Mean nightly sleep (hours)
    pub sleep_duration_mean: Option<f64>,
    pub deep_sleep_ratio_mean: Option<f64>,
    pub systolic_mean: Option<f64>,
    pub diastolic_mean: Option<f64>,
    pub heart_rate_mean: Option<f64>,
    pub weight_mean: Option<f64>,
    pub fat_percent_mean: Option<f64>,
}

/// Kind of annotated behavior event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorEventType {
    Meal,
    Exercise,
    Sleep,
    Hypoglycemia,
    Hyperglycemia,
}

/// Event annotated from signal context or glucose excursions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub event_type: BehaviorEventType,
    pub timestamp: DateTime<FixedOffset>,
    pub description: String,
    /// Signal the event was annotated from
    pub signal_id: String,
}

/// Recorded change of behavior stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from_stage: BehaviorStage,
    pub to_stage: BehaviorStage,
    pub transitioned_at: DateTime<Utc>,
    pub reason: String,
}

/// Intervention plan that was activated for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionApplied {
    pub plan_id: String,
    pub playbook_id: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Where a trajectory's current stage came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSource {
    /// Placeholder inferred from summary thresholds
    #[default]
    Inferred,
    /// Set by a behavior stage assessment
    Assessed,
}

/// Time-windowed trajectory for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub trajectory_id: String,
    pub user_id: String,
    pub window_start: Option<DateTime<FixedOffset>>,
    pub window_end: Option<DateTime<FixedOffset>>,
    pub time_window_days: u32,
    /// Number of signals inside the window
    pub signal_count: usize,
    pub summary: SignalsSummary,
    /// Ordered by timestamp
    pub events: Vec<BehaviorEvent>,
    pub stage_transitions: Vec<StageTransition>,
    pub interventions_applied: Vec<InterventionApplied>,
    pub risk_flags: BTreeSet<String>,
    pub insights: Vec<String>,
    pub current_stage: BehaviorStage,
    #[serde(default)]
    pub stage_source: StageSource,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_and_metric_parsing() {
        assert_eq!("CGM".parse::<DeviceType>().unwrap(), DeviceType::Cgm);
        assert_eq!(
            "deep_sleep_ratio".parse::<MetricType>().unwrap(),
            MetricType::DeepSleepRatio
        );
        assert!(matches!(
            "toaster".parse::<DeviceType>(),
            Err(CoachError::UnsupportedDevice(_))
        ));
        assert!(matches!(
            "mood".parse::<MetricType>(),
            Err(CoachError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_raw_input_deserializes_partial_payloads() {
        let raw: RawSignalInput =
            serde_json::from_str(r#"{"device_type": "cgm", "value": "6.1"}"#).unwrap();
        assert!(raw.user_id.is_none());
        assert_eq!(raw.value, Some(RawValue::Text("6.1".to_string())));

        let raw: RawSignalInput =
            serde_json::from_str(r#"{"value": 7, "timestamp": 1705300000000}"#).unwrap();
        assert_eq!(raw.value, Some(RawValue::Number(7.0)));
        assert_eq!(raw.timestamp, Some(RawTimestamp::EpochMillis(1_705_300_000_000)));
    }

    #[test]
    fn test_stage_ordering() {
        assert!(BehaviorStage::Precontemplation < BehaviorStage::Maintenance);
        assert_eq!(
            serde_json::to_string(&BehaviorStage::Precontemplation).unwrap(),
            "\"precontemplation\""
        );
    }
}
