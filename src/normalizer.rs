//! Signal normalization
//!
//! This module validates raw device readings and converts them into canonical
//! [`SignalRecord`]s.
//! - Required fields and numeric coercion are checked per record
//! - Per-device configuration decides supported metrics and valid ranges
//! - Out-of-range values are kept but flagged as noise
//! - Timestamps and units are normalized

use crate::error::CoachError;
use crate::stats;
use crate::types::{
    DeviceType, MetricType, QualityFlag, RawSignalInput, RawTimestamp, RawValue, SignalRecord,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// mg/dL per mmol/L for glucose
const GLUCOSE_MGDL_PER_MMOL: f64 = 18.0;

/// Kilograms per pound
const KG_PER_LB: f64 = 0.453_592;

/// Longest meal offset accepted in a reading's context (one day)
const MAX_POST_MEAL_MINUTES: f64 = 1440.0;

/// Static configuration for one device family
#[derive(Debug, Clone, Serialize)]
pub struct DeviceConfig {
    pub device_type: DeviceType,
    pub supported_metrics: &'static [MetricType],
    /// Nominal sampling interval in seconds, `None` for on-demand devices
    pub sampling_interval_secs: Option<u32>,
}

/// Inclusive valid range for a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricRange {
    pub min_valid: f64,
    pub max_valid: f64,
}

impl MetricRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_valid && value <= self.max_valid
    }
}

static DEVICE_CONFIGS: [DeviceConfig; 5] = [
    DeviceConfig {
        device_type: DeviceType::Cgm,
        supported_metrics: &[MetricType::Glucose],
        sampling_interval_secs: Some(300),
    },
    DeviceConfig {
        device_type: DeviceType::Bp,
        supported_metrics: &[
            MetricType::SystolicBp,
            MetricType::DiastolicBp,
            MetricType::HeartRate,
        ],
        sampling_interval_secs: None,
    },
    DeviceConfig {
        device_type: DeviceType::Hrv,
        supported_metrics: &[MetricType::Rmssd, MetricType::Sdnn, MetricType::HeartRate],
        sampling_interval_secs: Some(300),
    },
    DeviceConfig {
        device_type: DeviceType::Scale,
        supported_metrics: &[MetricType::Weight, MetricType::FatPercent],
        sampling_interval_secs: Some(86_400),
    },
    DeviceConfig {
        device_type: DeviceType::Watch,
        supported_metrics: &[
            MetricType::Steps,
            MetricType::HeartRate,
            MetricType::SleepDuration,
            MetricType::DeepSleepRatio,
            MetricType::Rmssd,
        ],
        sampling_interval_secs: Some(60),
    },
];

/// Look up the configuration of a device family
pub fn device_config(device_type: DeviceType) -> &'static DeviceConfig {
    match device_type {
        DeviceType::Cgm => &DEVICE_CONFIGS[0],
        DeviceType::Bp => &DEVICE_CONFIGS[1],
        DeviceType::Hrv => &DEVICE_CONFIGS[2],
        DeviceType::Scale => &DEVICE_CONFIGS[3],
        DeviceType::Watch => &DEVICE_CONFIGS[4],
    }
}

/// Hard validation bounds for a metric, in its canonical unit
pub fn valid_range(metric: MetricType) -> MetricRange {
    let (min_valid, max_valid) = match metric {
        MetricType::Glucose => (2.0, 25.0),
        MetricType::SystolicBp => (60.0, 250.0),
        MetricType::DiastolicBp => (40.0, 150.0),
        MetricType::Rmssd => (5.0, 200.0),
        MetricType::Sdnn => (10.0, 250.0),
        MetricType::Weight => (20.0, 300.0),
        MetricType::FatPercent => (3.0, 60.0),
        MetricType::Steps => (0.0, 100_000.0),
        MetricType::SleepDuration => (0.0, 24.0),
        MetricType::HeartRate => (30.0, 220.0),
        MetricType::DeepSleepRatio => (0.0, 1.0),
    };
    MetricRange {
        min_valid,
        max_valid,
    }
}

/// Outcome of normalizing one raw reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<SignalRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl NormalizeResult {
    pub(crate) fn failure(error: CoachError) -> Self {
        Self {
            success: false,
            record: None,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }
}

/// Error for one item of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub index: usize,
    pub error: String,
}

/// Summary statistics over the successfully normalized values of a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Inputs in the batch
    pub count: usize,
    /// Inputs normalized successfully
    pub valid_count: usize,
    /// Successful records flagged as noise
    pub noise_count: usize,
    pub error_count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std: Option<f64>,
}

/// Outcome of normalizing a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNormalizeResult {
    /// One result per input, in input order
    pub results: Vec<NormalizeResult>,
    pub errors: Vec<BatchItemError>,
    pub statistics: BatchStatistics,
}

impl BatchNormalizeResult {
    /// Successfully normalized records, in input order
    pub fn records(&self) -> Vec<SignalRecord> {
        self.results
            .iter()
            .filter_map(|r| r.record.clone())
            .collect()
    }
}

/// Normalizer for converting raw device readings into canonical records
pub struct SignalNormalizer;

impl SignalNormalizer {
    /// Normalize a single raw reading. Never panics; failures are reported in the result.
    pub fn normalize(raw: &RawSignalInput) -> NormalizeResult {
        match Self::try_normalize(raw) {
            Ok((record, warnings)) => {
                debug!(
                    signal_id = %record.signal_id,
                    metric = %record.metric,
                    quality = ?record.quality_flag,
                    "Normalized signal"
                );
                NormalizeResult {
                    success: true,
                    record: Some(record),
                    error: None,
                    warnings,
                }
            }
            Err(e) => {
                debug!(error = %e, "Rejected signal");
                NormalizeResult::failure(e)
            }
        }
    }

    /// Normalize a batch, collecting per-index errors without aborting
    pub fn normalize_batch(raws: &[RawSignalInput]) -> BatchNormalizeResult {
        let results: Vec<NormalizeResult> = raws.iter().map(Self::normalize).collect();

        let errors: Vec<BatchItemError> = results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| {
                r.error.as_ref().map(|error| BatchItemError {
                    index,
                    error: error.clone(),
                })
            })
            .collect();

        let values: Vec<f64> = results
            .iter()
            .filter_map(|r| r.record.as_ref().map(|rec| rec.value))
            .collect();
        let noise_count = results
            .iter()
            .filter_map(|r| r.record.as_ref())
            .filter(|rec| rec.quality_flag == QualityFlag::Noise)
            .count();

        let statistics = BatchStatistics {
            count: raws.len(),
            valid_count: values.len(),
            noise_count,
            error_count: errors.len(),
            mean: stats::mean(&values),
            min: stats::min(&values),
            max: stats::max(&values),
            std: stats::population_std(&values),
        };

        BatchNormalizeResult {
            results,
            errors,
            statistics,
        }
    }

    fn try_normalize(raw: &RawSignalInput) -> Result<(SignalRecord, Vec<String>), CoachError> {
        let user_id = required_text(raw.user_id.as_deref(), "user_id")?;
        let device_raw = required_text(raw.device_type.as_deref(), "device_type")?;
        let metric_raw = required_text(raw.metric.as_deref(), "metric")?;
        let value = raw
            .value
            .as_ref()
            .ok_or_else(|| CoachError::MissingField("value".to_string()))?;

        let device_type: DeviceType = device_raw.parse()?;
        let metric: MetricType = metric_raw.parse()?;
        let mut value = coerce_value(value)?;

        let mut warnings = Vec::new();

        let config = device_config(device_type);
        if !config.supported_metrics.contains(&metric) {
            warnings.push(format!(
                "Metric {} is not supported by device type {}",
                metric, device_type
            ));
        }

        let unit = match raw.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(unit) => match convert_unit(metric, unit, value) {
                Some(converted) => {
                    warnings.push(format!(
                        "Converted {} from {} to {}",
                        metric,
                        unit,
                        metric.default_unit()
                    ));
                    value = converted;
                    metric.default_unit().to_string()
                }
                None => unit.to_string(),
            },
            None => metric.default_unit().to_string(),
        };

        let mut context = raw.context.clone().unwrap_or_default();
        if let Some(minutes) = context.post_meal_minutes {
            if !(0.0..=MAX_POST_MEAL_MINUTES).contains(&minutes) {
                warn!(user_id = %user_id, minutes, "Dropping out-of-range post_meal_minutes");
                warnings.push(format!(
                    "post_meal_minutes {} is outside [0, {}], ignored",
                    minutes, MAX_POST_MEAL_MINUTES
                ));
                context.post_meal_minutes = None;
            }
        }

        let range = valid_range(metric);
        let mut quality_flag = QualityFlag::Valid;
        if !range.contains(value) {
            warnings.push(format!(
                "Value {} for {} is outside valid range [{}, {}]",
                value, metric, range.min_valid, range.max_valid
            ));
            quality_flag = QualityFlag::Noise;
        }
        if context.calibrating == Some(true) {
            quality_flag = QualityFlag::Calibrating;
        }

        let timestamp = match raw.timestamp.as_ref().and_then(parse_timestamp) {
            Some(ts) => ts,
            None => {
                warn!(user_id = %user_id, "Unparsable or missing timestamp, using current time");
                warnings.push("Timestamp missing or unparsable, using current time".to_string());
                Utc::now().into()
            }
        };

        let record = SignalRecord {
            signal_id: format!("sig_{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            device_type,
            metric,
            value,
            unit,
            timestamp,
            context,
            quality_flag,
            source: raw.source.clone(),
            raw_data: raw.raw_data.clone(),
        };

        Ok((record, warnings))
    }
}

fn required_text<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, CoachError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoachError::MissingField(field.to_string()))
}

/// Coerce a raw value into a finite number
fn coerce_value(value: &RawValue) -> Result<f64, CoachError> {
    let number = match value {
        RawValue::Number(n) => *n,
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoachError::InvalidValue(format!("'{}' is not numeric", s)))?,
        RawValue::Other(other) => {
            return Err(CoachError::InvalidValue(format!("{} is not numeric", other)))
        }
    };

    if number.is_finite() {
        Ok(number)
    } else {
        Err(CoachError::InvalidValue(format!("{} is not finite", number)))
    }
}

/// Convert a value from a known alternate unit into the metric's canonical unit.
/// Returns `None` when no conversion applies.
fn convert_unit(metric: MetricType, unit: &str, value: f64) -> Option<f64> {
    let unit = unit.to_ascii_lowercase();
    match (metric, unit.as_str()) {
        (MetricType::Glucose, "mg/dl") => Some(value / GLUCOSE_MGDL_PER_MMOL),
        (MetricType::Weight, "lb" | "lbs") => Some(value * KG_PER_LB),
        (MetricType::SleepDuration, "min" | "minutes") => Some(value / 60.0),
        _ => None,
    }
}

/// Parse the supported timestamp encodings, keeping the original offset
fn parse_timestamp(raw: &RawTimestamp) -> Option<DateTime<FixedOffset>> {
    match raw {
        RawTimestamp::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single().map(Into::into),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Some(ts);
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(Utc.from_utc_datetime(&naive).into());
                }
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive).into())
        }
        RawTimestamp::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalContext;
    use chrono::Timelike;

    fn glucose(value: f64) -> RawSignalInput {
        RawSignalInput::reading(
            "user-1",
            DeviceType::Cgm,
            MetricType::Glucose,
            value,
            "2024-01-15T08:00:00+08:00",
        )
    }

    #[test]
    fn test_missing_required_fields_fail_without_panicking() {
        let complete = glucose(6.0);

        let mut missing_user = complete.clone();
        missing_user.user_id = None;
        let mut missing_device = complete.clone();
        missing_device.device_type = None;
        let mut missing_metric = complete.clone();
        missing_metric.metric = None;
        let mut missing_value = complete.clone();
        missing_value.value = None;
        let mut blank_user = complete;
        blank_user.user_id = Some("   ".to_string());

        for (raw, field) in [
            (missing_user, "user_id"),
            (missing_device, "device_type"),
            (missing_metric, "metric"),
            (missing_value, "value"),
            (blank_user, "user_id"),
        ] {
            let result = SignalNormalizer::normalize(&raw);
            assert!(!result.success);
            assert!(result.record.is_none());
            assert!(result.error.unwrap().contains(field));
        }
    }

    #[test]
    fn test_non_numeric_value_rejected() {
        let mut raw = glucose(0.0);
        raw.value = Some(RawValue::from("high"));
        let result = SignalNormalizer::normalize(&raw);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not numeric"));

        raw.value = Some(RawValue::from("NaN"));
        assert!(!SignalNormalizer::normalize(&raw).success);
    }

    #[test]
    fn test_textual_value_coerced() {
        let mut raw = glucose(0.0);
        raw.value = Some(RawValue::from(" 6.4 "));
        let result = SignalNormalizer::normalize(&raw);
        assert!(result.success);
        let record = result.record.unwrap();
        assert!((record.value - 6.4).abs() < 1e-9);
        assert_eq!(record.unit, "mmol/L");
        assert_eq!(record.quality_flag, QualityFlag::Valid);
        assert!(record.signal_id.starts_with("sig_"));
    }

    #[test]
    fn test_out_of_range_marked_noise() {
        let result = SignalNormalizer::normalize(&glucose(30.0));
        assert!(result.success);
        assert_eq!(result.record.unwrap().quality_flag, QualityFlag::Noise);
        assert!(result.warnings.iter().any(|w| w.contains("outside valid range")));
    }

    #[test]
    fn test_unsupported_metric_for_device_warns() {
        let raw = RawSignalInput::reading(
            "user-1",
            DeviceType::Scale,
            MetricType::Steps,
            4000.0,
            "2024-01-15T08:00:00Z",
        );
        let result = SignalNormalizer::normalize(&raw);
        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.contains("not supported")));
    }

    #[test]
    fn test_unknown_device_and_metric_are_errors() {
        let mut raw = glucose(6.0);
        raw.device_type = Some("fridge".to_string());
        assert!(SignalNormalizer::normalize(&raw)
            .error
            .unwrap()
            .contains("Unsupported device"));

        let mut raw = glucose(6.0);
        raw.metric = Some("ketones".to_string());
        assert!(SignalNormalizer::normalize(&raw)
            .error
            .unwrap()
            .contains("Unknown metric"));
    }

    #[test]
    fn test_unit_conversion() {
        let mut raw = glucose(180.0);
        raw.unit = Some("mg/dL".to_string());
        let result = SignalNormalizer::normalize(&raw);
        let record = result.record.unwrap();
        assert!((record.value - 10.0).abs() < 1e-9);
        assert_eq!(record.unit, "mmol/L");
        assert_eq!(record.quality_flag, QualityFlag::Valid);
        assert!(result.warnings.iter().any(|w| w.contains("Converted")));
    }

    #[test]
    fn test_timestamp_keeps_offset_and_falls_back() {
        let record = SignalNormalizer::normalize(&glucose(6.0)).record.unwrap();
        assert_eq!(record.timestamp.hour(), 8);
        assert_eq!(record.timestamp.offset().local_minus_utc(), 8 * 3600);

        let mut raw = glucose(6.0);
        raw.timestamp = Some(RawTimestamp::from("yesterday-ish"));
        let result = SignalNormalizer::normalize(&raw);
        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.contains("Timestamp")));

        let mut raw = glucose(6.0);
        raw.timestamp = Some(RawTimestamp::EpochMillis(0));
        let record = SignalNormalizer::normalize(&raw).record.unwrap();
        assert_eq!(record.timestamp.timestamp(), 0);

        let mut raw = glucose(6.0);
        raw.timestamp = Some(RawTimestamp::from("2024-01-15 03:30:00"));
        let record = SignalNormalizer::normalize(&raw).record.unwrap();
        assert_eq!(record.timestamp.hour(), 3);
    }

    #[test]
    fn test_calibrating_context() {
        let raw = glucose(6.0).with_context(SignalContext {
            calibrating: Some(true),
            ..Default::default()
        });
        let record = SignalNormalizer::normalize(&raw).record.unwrap();
        assert_eq!(record.quality_flag, QualityFlag::Calibrating);
    }

    #[test]
    fn test_out_of_range_meal_offset_is_dropped() {
        let raw = glucose(8.0).with_context(SignalContext {
            post_meal_minutes: Some(1e12),
            ..Default::default()
        });
        let result = SignalNormalizer::normalize(&raw);
        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.contains("post_meal_minutes")));
        assert_eq!(result.record.unwrap().context.post_meal_minutes, None);

        let raw = glucose(8.0).with_context(SignalContext {
            post_meal_minutes: Some(120.0),
            ..Default::default()
        });
        let record = SignalNormalizer::normalize(&raw).record.unwrap();
        assert_eq!(record.context.post_meal_minutes, Some(120.0));
    }

    #[test]
    fn test_non_scalar_value_fails_only_its_record() {
        let batch: Vec<RawSignalInput> = serde_json::from_str(
            r#"[
                {"user_id": "u1", "device_type": "cgm", "metric": "glucose", "value": 6.2,
                 "timestamp": "2024-01-15T08:00:00Z"},
                {"user_id": "u1", "device_type": "cgm", "metric": "glucose", "value": true,
                 "timestamp": "2024-01-15T08:05:00Z"},
                {"user_id": "u1", "device_type": "cgm", "metric": "glucose", "value": 6.8,
                 "timestamp": {"at": "noon"}}
            ]"#,
        )
        .unwrap();

        let result = SignalNormalizer::normalize_batch(&batch);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);
        assert!(result.errors[0].error.contains("not numeric"));
        assert!(result.results[2].success);
        assert!(result.results[2]
            .warnings
            .iter()
            .any(|w| w.contains("Timestamp")));
    }

    #[test]
    fn test_batch_collects_errors_and_statistics() {
        let mut broken = glucose(6.0);
        broken.metric = None;
        let batch = vec![glucose(5.0), broken, glucose(7.0), glucose(40.0)];

        let result = SignalNormalizer::normalize_batch(&batch);
        assert_eq!(result.results.len(), 4);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);

        let stats = &result.statistics;
        assert_eq!(stats.count, 4);
        assert_eq!(stats.valid_count, 3);
        assert_eq!(stats.noise_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.min, Some(5.0));
        assert_eq!(stats.max, Some(40.0));
        assert!((stats.mean.unwrap() - 52.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.records().len(), 3);
    }
}
