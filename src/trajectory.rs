//! Trajectory aggregation
//!
//! This module folds canonical signal records, plus the user's prior trajectory,
//! into a time-windowed [`TrajectoryRecord`]:
//! - Glucose statistics (TIR/TBR/TAR, variability, postprandial, nocturnal lows)
//! - HRV and step trends
//! - Annotated behavior events
//! - Threshold-derived risk flags and insights
//!
//! Every build appends a new trajectory to the user's history; earlier
//! trajectories are never modified. Stored trajectories are as-built snapshots:
//! stage assessments and applied plans land on the session's copy only.

use crate::stats;
use crate::types::{
    BehaviorEvent, BehaviorEventType, BehaviorStage, MetricType, SignalRecord, SignalsSummary,
    StageSource, StageTransition, TrajectoryRecord, Trend,
};
use chrono::{Duration, Timelike, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Lower bound of the glucose target range (mmol/L)
pub const GLUCOSE_RANGE_LOW: f64 = 3.9;

/// Upper bound of the glucose target range (mmol/L)
pub const GLUCOSE_RANGE_HIGH: f64 = 10.0;

/// Glucose above which a reading is annotated as a hyperglycemia event (mmol/L)
const HYPERGLYCEMIA_EVENT_THRESHOLD: f64 = 13.9;

/// Readings at most this long after a meal count as postprandial
const POSTPRANDIAL_WINDOW_MINUTES: f64 = 120.0;

/// Local hour (exclusive) that ends the nocturnal window
const NIGHT_END_HOUR: u32 = 6;

/// Relative half-over-half change that counts as a trend
const TREND_THRESHOLD: f64 = 0.10;

pub const RISK_NIGHT_HYPOGLYCEMIA: &str = "night_hypoglycemia";
pub const RISK_HIGH_GLUCOSE_VARIABILITY: &str = "high_glucose_variability";
pub const RISK_FREQUENT_HYPOGLYCEMIA: &str = "frequent_hypoglycemia";
pub const RISK_HIGH_POSTPRANDIAL_SPIKE: &str = "high_postprandial_spike";
pub const RISK_ELEVATED_BLOOD_PRESSURE: &str = "elevated_blood_pressure";
pub const RISK_LOW_HRV: &str = "low_hrv";
pub const RISK_INSUFFICIENT_SLEEP: &str = "insufficient_sleep";

/// Activity states that don't count as exercise
const RESTING_ACTIVITY_STATES: [&str; 4] = ["rest", "resting", "sedentary", "idle"];

/// Options for a trajectory build
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryOptions {
    /// Days before the newest reading that are included
    pub time_window_days: u32,
}

impl Default for TrajectoryOptions {
    fn default() -> Self {
        Self {
            time_window_days: crate::config::DEFAULT_TRAJECTORY_WINDOW_DAYS,
        }
    }
}

/// Aggregator that owns the per-user trajectory history
#[derive(Debug, Default)]
pub struct TrajectoryAggregator {
    history: DashMap<String, Vec<TrajectoryRecord>>,
}

impl TrajectoryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trajectory from `signals` and append it to the user's history.
    ///
    /// `prior` supplies carried-over state (stage, transitions, applied
    /// interventions); when absent the latest stored trajectory is used.
    pub fn build_trajectory(
        &self,
        user_id: &str,
        signals: &[SignalRecord],
        prior: Option<&TrajectoryRecord>,
        options: &TrajectoryOptions,
    ) -> TrajectoryRecord {
        let stored_prior;
        let prior = match prior {
            Some(p) => Some(p),
            None => {
                stored_prior = self.latest_trajectory(user_id);
                stored_prior.as_ref()
            }
        };

        let windowed = window_signals(signals, options.time_window_days);
        let summary = summarize(&windowed);
        let risk_flags = derive_risk_flags(&summary);
        let insights = derive_insights(&summary);
        let events = annotate_events(&windowed);

        let now = Utc::now();
        let mut stage_transitions = prior
            .map(|p| p.stage_transitions.clone())
            .unwrap_or_default();
        let interventions_applied = prior
            .map(|p| p.interventions_applied.clone())
            .unwrap_or_default();

        let (current_stage, stage_source) = match prior {
            Some(p) if p.stage_source == StageSource::Assessed => {
                (p.current_stage, StageSource::Assessed)
            }
            _ => {
                let inferred = infer_placeholder_stage(&summary);
                if let Some(p) = prior {
                    if p.current_stage != inferred {
                        stage_transitions.push(StageTransition {
                            from_stage: p.current_stage,
                            to_stage: inferred,
                            transitioned_at: now,
                            reason: "trajectory_update".to_string(),
                        });
                    }
                }
                (inferred, StageSource::Inferred)
            }
        };

        let trajectory = TrajectoryRecord {
            trajectory_id: format!("traj_{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            window_start: windowed.iter().map(|s| s.timestamp).min(),
            window_end: windowed.iter().map(|s| s.timestamp).max(),
            time_window_days: options.time_window_days,
            signal_count: windowed.len(),
            summary,
            events,
            stage_transitions,
            interventions_applied,
            risk_flags,
            insights,
            current_stage,
            stage_source,
            created_at: now,
        };

        debug!(
            user_id = %user_id,
            signals = trajectory.signal_count,
            risk_flags = trajectory.risk_flags.len(),
            stage = %trajectory.current_stage,
            "Built trajectory"
        );

        self.history
            .entry(user_id.to_string())
            .or_default()
            .push(trajectory.clone());

        trajectory
    }

    /// Most recently built trajectory for the user
    pub fn latest_trajectory(&self, user_id: &str) -> Option<TrajectoryRecord> {
        self.history
            .get(user_id)
            .and_then(|h| h.value().last().cloned())
    }

    /// All trajectories for the user, oldest first
    pub fn history(&self, user_id: &str) -> Vec<TrajectoryRecord> {
        self.history
            .get(user_id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn trajectory_count(&self, user_id: &str) -> usize {
        self.history.get(user_id).map(|h| h.len()).unwrap_or(0)
    }

    /// Drop the user's history; returns how many trajectories were removed
    pub fn remove_user(&self, user_id: &str) -> usize {
        self.history
            .remove(user_id)
            .map(|(_, h)| h.len())
            .unwrap_or(0)
    }
}

/// Keep only signals within `days` of the newest reading
pub fn window_signals(signals: &[SignalRecord], days: u32) -> Vec<SignalRecord> {
    let Some(newest) = signals.iter().map(|s| s.timestamp).max() else {
        return Vec::new();
    };
    // A window reaching past the representable range keeps everything
    let cutoff = Duration::try_days(i64::from(days)).and_then(|d| newest.checked_sub_signed(d));
    signals
        .iter()
        .filter(|s| cutoff.map_or(true, |cutoff| s.timestamp >= cutoff))
        .cloned()
        .collect()
}

/// Compute the summary statistics for a set of signals
pub fn summarize(signals: &[SignalRecord]) -> SignalsSummary {
    let values_of = |metric: MetricType| -> Vec<f64> {
        signals
            .iter()
            .filter(|s| s.metric == metric)
            .map(|s| s.value)
            .collect()
    };

    let glucose: Vec<&SignalRecord> = signals
        .iter()
        .filter(|s| s.metric == MetricType::Glucose)
        .collect();
    let glucose_values: Vec<f64> = glucose.iter().map(|s| s.value).collect();

    let fasting: Vec<f64> = glucose
        .iter()
        .filter(|s| s.context.fasting == Some(true))
        .map(|s| s.value)
        .collect();
    let postprandial: Vec<f64> = glucose
        .iter()
        .filter(|s| {
            s.context
                .post_meal_minutes
                .is_some_and(|m| (0.0..=POSTPRANDIAL_WINDOW_MINUTES).contains(&m))
        })
        .map(|s| s.value)
        .collect();

    let glucose_mean = stats::mean(&glucose_values);
    let glucose_std = stats::population_std(&glucose_values);
    let variability_cv = match (glucose_mean, glucose_std) {
        (Some(mean), Some(std)) if mean > 0.0 => Some(std / mean * 100.0),
        _ => None,
    };
    let night_hypoglycemia_count = if glucose.is_empty() {
        None
    } else {
        Some(
            glucose
                .iter()
                .filter(|s| s.value < GLUCOSE_RANGE_LOW && s.timestamp.hour() < NIGHT_END_HOUR)
                .count() as u32,
        )
    };

    let hrv = values_of(MetricType::Rmssd);
    let steps = values_of(MetricType::Steps);

    SignalsSummary {
        glucose_readings: glucose_values.len(),
        glucose_mean,
        glucose_std,
        fasting_glucose_mean: stats::mean(&fasting),
        postprandial_mean: stats::mean(&postprandial),
        postprandial_peak: stats::max(&postprandial),
        time_in_range: stats::percent_where(&glucose_values, |v| {
            (GLUCOSE_RANGE_LOW..=GLUCOSE_RANGE_HIGH).contains(&v)
        }),
        time_below_range: stats::percent_where(&glucose_values, |v| v < GLUCOSE_RANGE_LOW),
        time_above_range: stats::percent_where(&glucose_values, |v| v > GLUCOSE_RANGE_HIGH),
        variability_cv,
        night_hypoglycemia_count,
        hrv_mean: stats::mean(&hrv),
        hrv_trend: detect_trend(&hrv),
        sdnn_mean: stats::mean(&values_of(MetricType::Sdnn)),
        steps_mean: stats::mean(&steps),
        steps_trend: detect_trend(&steps),
        sleep_duration_mean: stats::mean(&values_of(MetricType::SleepDuration)),
        deep_sleep_ratio_mean: stats::mean(&values_of(MetricType::DeepSleepRatio)),
        systolic_mean: stats::mean(&values_of(MetricType::SystolicBp)),
        diastolic_mean: stats::mean(&values_of(MetricType::DiastolicBp)),
        heart_rate_mean: stats::mean(&values_of(MetricType::HeartRate)),
        weight_mean: stats::mean(&values_of(MetricType::Weight)),
        fat_percent_mean: stats::mean(&values_of(MetricType::FatPercent)),
    }
}

/// Compare the mean of the second half of `values` against the first half.
///
/// Order-sensitive: the halves follow the order values were supplied in.
pub fn detect_trend(values: &[f64]) -> Option<Trend> {
    if values.is_empty() {
        return None;
    }
    if values.len() < 2 {
        return Some(Trend::Stable);
    }

    let (first, second) = values.split_at(values.len() / 2);
    let first_mean = stats::mean(first)?;
    let second_mean = stats::mean(second)?;

    let trend = if second_mean > first_mean * (1.0 + TREND_THRESHOLD) {
        Trend::Up
    } else if second_mean < first_mean * (1.0 - TREND_THRESHOLD) {
        Trend::Down
    } else {
        Trend::Stable
    };
    Some(trend)
}

/// Risk flags derived purely from summary thresholds
pub fn derive_risk_flags(summary: &SignalsSummary) -> BTreeSet<String> {
    let checks = [
        (
            RISK_NIGHT_HYPOGLYCEMIA,
            summary.night_hypoglycemia_count.is_some_and(|c| c > 0),
        ),
        (
            RISK_HIGH_GLUCOSE_VARIABILITY,
            summary.variability_cv.is_some_and(|cv| cv > 36.0),
        ),
        (
            RISK_FREQUENT_HYPOGLYCEMIA,
            summary.time_below_range.is_some_and(|tbr| tbr > 4.0),
        ),
        (
            RISK_HIGH_POSTPRANDIAL_SPIKE,
            summary.postprandial_peak.is_some_and(|peak| peak > 14.0),
        ),
        (
            RISK_ELEVATED_BLOOD_PRESSURE,
            summary.systolic_mean.is_some_and(|s| s >= 140.0)
                || summary.diastolic_mean.is_some_and(|d| d >= 90.0),
        ),
        (RISK_LOW_HRV, summary.hrv_mean.is_some_and(|h| h < 20.0)),
        (
            RISK_INSUFFICIENT_SLEEP,
            summary.sleep_duration_mean.is_some_and(|s| s < 6.0),
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, triggered)| *triggered)
        .map(|(flag, _)| flag.to_string())
        .collect()
}

/// Human-readable observations for coaches
pub fn derive_insights(summary: &SignalsSummary) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(tir) = summary.time_in_range {
        let insight = if tir >= 70.0 {
            format!("血糖达标时间 {:.0}%，控制良好", tir)
        } else if tir >= 50.0 {
            format!("血糖达标时间 {:.0}%，仍有提升空间", tir)
        } else {
            format!("血糖达标时间仅 {:.0}%，需要重点关注", tir)
        };
        insights.push(insight);
    }

    match summary.hrv_trend {
        Some(Trend::Up) => insights.push("心率变异性呈上升趋势，恢复状态改善".to_string()),
        Some(Trend::Down) => insights.push("心率变异性呈下降趋势，注意压力与休息".to_string()),
        Some(Trend::Stable) => insights.push("心率变异性保持稳定".to_string()),
        None => {}
    }

    if summary.steps_trend == Some(Trend::Down) {
        insights.push("近期步数下降，活动量减少".to_string());
    }

    insights
}

/// Coarse stage guess used until a real stage assessment runs
pub fn infer_placeholder_stage(summary: &SignalsSummary) -> BehaviorStage {
    if summary.time_in_range.is_some_and(|tir| tir >= 70.0) {
        BehaviorStage::Maintenance
    } else if summary.steps_mean.is_some_and(|s| s >= 8000.0) {
        BehaviorStage::Action
    } else if summary.variability_cv.is_some_and(|cv| cv < 30.0) {
        BehaviorStage::Preparation
    } else {
        BehaviorStage::Contemplation
    }
}

/// Annotate behavior events from signal context and glucose excursions
fn annotate_events(signals: &[SignalRecord]) -> Vec<BehaviorEvent> {
    let mut events = Vec::new();
    let mut seen_meals = HashSet::new();

    for signal in signals {
        let meal_start = signal.context.post_meal_minutes.and_then(|minutes| {
            Duration::try_minutes(minutes.round() as i64)
                .and_then(|offset| signal.timestamp.checked_sub_signed(offset))
        });
        if let Some(meal_start) = meal_start {
            if seen_meals.insert(meal_start.timestamp()) {
                events.push(BehaviorEvent {
                    event_type: BehaviorEventType::Meal,
                    timestamp: meal_start,
                    description: "进餐".to_string(),
                    signal_id: signal.signal_id.clone(),
                });
            }
        }

        if let Some(state) = signal.context.activity_state.as_deref() {
            let state = state.trim().to_ascii_lowercase();
            if !state.is_empty() && !RESTING_ACTIVITY_STATES.contains(&state.as_str()) {
                events.push(BehaviorEvent {
                    event_type: BehaviorEventType::Exercise,
                    timestamp: signal.timestamp,
                    description: format!("运动：{}", state),
                    signal_id: signal.signal_id.clone(),
                });
            }
        }

        if signal.metric == MetricType::SleepDuration {
            events.push(BehaviorEvent {
                event_type: BehaviorEventType::Sleep,
                timestamp: signal.timestamp,
                description: format!("睡眠 {:.1} 小时", signal.value),
                signal_id: signal.signal_id.clone(),
            });
        }

        if signal.metric == MetricType::Glucose {
            if signal.value < GLUCOSE_RANGE_LOW {
                events.push(BehaviorEvent {
                    event_type: BehaviorEventType::Hypoglycemia,
                    timestamp: signal.timestamp,
                    description: format!("低血糖 {:.1} mmol/L", signal.value),
                    signal_id: signal.signal_id.clone(),
                });
            } else if signal.value > HYPERGLYCEMIA_EVENT_THRESHOLD {
                events.push(BehaviorEvent {
                    event_type: BehaviorEventType::Hyperglycemia,
                    timestamp: signal.timestamp,
                    description: format!("高血糖 {:.1} mmol/L", signal.value),
                    signal_id: signal.signal_id.clone(),
                });
            }
        }
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceType, QualityFlag, SignalContext};
    use chrono::{DateTime, FixedOffset};

    fn record(metric: MetricType, value: f64, timestamp: &str) -> SignalRecord {
        SignalRecord {
            signal_id: format!("sig-{}-{}", metric, timestamp),
            user_id: "user-1".to_string(),
            device_type: DeviceType::Cgm,
            metric,
            value,
            unit: metric.default_unit().to_string(),
            timestamp: DateTime::<FixedOffset>::parse_from_rfc3339(timestamp).unwrap(),
            context: SignalContext::default(),
            quality_flag: QualityFlag::Valid,
            source: None,
            raw_data: None,
        }
    }

    fn glucose_series(values: &[f64]) -> Vec<SignalRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                record(
                    MetricType::Glucose,
                    *v,
                    &format!("2024-01-15T{:02}:30:00+00:00", 8 + i),
                )
            })
            .collect()
    }

    #[test]
    fn test_time_in_range_exact() {
        // 3.9 and 10.0 are inclusive
        let signals = glucose_series(&[3.8, 3.9, 6.0, 10.0, 10.1, 12.0, 5.5, 7.0]);
        let summary = summarize(&signals);
        assert_eq!(summary.glucose_readings, 8);
        assert!((summary.time_in_range.unwrap() - 5.0 / 8.0 * 100.0).abs() < 1e-9);
        assert!((summary.time_below_range.unwrap() - 12.5).abs() < 1e-9);
        assert!((summary.time_above_range.unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_variability_cv_fixtures() {
        let summary = summarize(&glucose_series(&[5.0, 6.0, 7.0, 8.0, 9.0]));
        assert!((summary.glucose_mean.unwrap() - 7.0).abs() < 1e-9);
        assert!((summary.glucose_std.unwrap() - 1.414_213_56).abs() < 1e-6);
        assert!((summary.variability_cv.unwrap() - 20.203_05).abs() < 1e-4);

        let summary = summarize(&glucose_series(&[4.0, 8.0]));
        // mean 6, std 2
        assert!((summary.variability_cv.unwrap() - 100.0 / 3.0).abs() < 1e-9);

        let summary = summarize(&glucose_series(&[6.0, 6.0, 6.0]));
        assert_eq!(summary.variability_cv, Some(0.0));
    }

    #[test]
    fn test_postprandial_and_fasting_split() {
        let mut fasting = record(MetricType::Glucose, 6.5, "2024-01-15T07:00:00+00:00");
        fasting.context.fasting = Some(true);
        let mut after_meal = record(MetricType::Glucose, 11.5, "2024-01-15T09:30:00+00:00");
        after_meal.context.post_meal_minutes = Some(90.0);
        let mut late = record(MetricType::Glucose, 13.0, "2024-01-15T11:30:00+00:00");
        late.context.post_meal_minutes = Some(180.0);

        let summary = summarize(&[fasting, after_meal, late]);
        assert_eq!(summary.fasting_glucose_mean, Some(6.5));
        assert_eq!(summary.postprandial_peak, Some(11.5));
        assert_eq!(summary.postprandial_mean, Some(11.5));
    }

    #[test]
    fn test_night_hypoglycemia_uses_local_hour() {
        let signals = vec![
            record(MetricType::Glucose, 3.5, "2024-01-15T02:00:00+08:00"),
            record(MetricType::Glucose, 3.6, "2024-01-15T05:59:00+08:00"),
            record(MetricType::Glucose, 3.4, "2024-01-15T06:00:00+08:00"),
            record(MetricType::Glucose, 5.0, "2024-01-15T03:00:00+08:00"),
        ];
        let summary = summarize(&signals);
        assert_eq!(summary.night_hypoglycemia_count, Some(2));

        let flags = derive_risk_flags(&summary);
        assert!(flags.contains(RISK_NIGHT_HYPOGLYCEMIA));
        assert!(flags.contains(RISK_FREQUENT_HYPOGLYCEMIA));
    }

    #[test]
    fn test_trend_detection_is_order_sensitive() {
        assert_eq!(detect_trend(&[40.0, 40.0, 50.0, 50.0]), Some(Trend::Up));
        assert_eq!(detect_trend(&[50.0, 50.0, 40.0, 40.0]), Some(Trend::Down));
        assert_eq!(detect_trend(&[40.0, 42.0, 41.0, 43.0]), Some(Trend::Stable));
        assert_eq!(detect_trend(&[40.0]), Some(Trend::Stable));
        assert_eq!(detect_trend(&[]), None);
    }

    #[test]
    fn test_missing_metrics_stay_unset() {
        let summary = summarize(&[record(MetricType::Steps, 9000.0, "2024-01-15T20:00:00Z")]);
        assert_eq!(summary.glucose_readings, 0);
        assert!(summary.time_in_range.is_none());
        assert!(summary.night_hypoglycemia_count.is_none());
        assert_eq!(summary.steps_mean, Some(9000.0));
        assert!(derive_risk_flags(&summary).is_empty());
    }

    #[test]
    fn test_insights_and_placeholder_stage() {
        let summary = SignalsSummary {
            time_in_range: Some(72.0),
            hrv_trend: Some(Trend::Down),
            ..Default::default()
        };
        let insights = derive_insights(&summary);
        assert!(insights[0].contains("控制良好"));
        assert!(insights[1].contains("下降"));
        assert_eq!(infer_placeholder_stage(&summary), BehaviorStage::Maintenance);

        let summary = SignalsSummary {
            time_in_range: Some(40.0),
            steps_mean: Some(8500.0),
            ..Default::default()
        };
        assert!(derive_insights(&summary)[0].contains("重点关注"));
        assert_eq!(infer_placeholder_stage(&summary), BehaviorStage::Action);

        let summary = SignalsSummary {
            time_in_range: Some(55.0),
            variability_cv: Some(25.0),
            ..Default::default()
        };
        assert!(derive_insights(&summary)[0].contains("提升空间"));
        assert_eq!(infer_placeholder_stage(&summary), BehaviorStage::Preparation);

        assert_eq!(
            infer_placeholder_stage(&SignalsSummary::default()),
            BehaviorStage::Contemplation
        );
    }

    #[test]
    fn test_window_excludes_old_signals() {
        let signals = vec![
            record(MetricType::Glucose, 20.0, "2024-01-01T08:00:00Z"),
            record(MetricType::Glucose, 6.0, "2024-01-14T08:00:00Z"),
            record(MetricType::Glucose, 7.0, "2024-01-15T08:00:00Z"),
        ];
        let windowed = window_signals(&signals, 7);
        assert_eq!(windowed.len(), 2);

        // Unrepresentable cutoff applies no window
        assert_eq!(window_signals(&signals, u32::MAX).len(), 3);
    }

    #[test]
    fn test_unrepresentable_meal_start_is_skipped() {
        let mut far = record(MetricType::Glucose, 8.0, "2024-01-15T12:30:00+00:00");
        far.context.post_meal_minutes = Some(1e12);
        let mut near = record(MetricType::Glucose, 8.0, "2024-01-15T12:45:00+00:00");
        near.context.post_meal_minutes = Some(45.0);

        let events = annotate_events(&[far, near]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BehaviorEventType::Meal);
        assert_eq!(events[0].timestamp.to_rfc3339(), "2024-01-15T12:00:00+00:00");
    }

    #[test]
    fn test_build_appends_history_and_carries_prior_state() {
        let aggregator = TrajectoryAggregator::new();
        let options = TrajectoryOptions::default();

        let first = aggregator.build_trajectory(
            "user-1",
            &glucose_series(&[12.0, 13.0, 4.5, 11.0]),
            None,
            &options,
        );
        assert_eq!(first.current_stage, BehaviorStage::Contemplation);
        assert!(first.stage_transitions.is_empty());

        let second = aggregator.build_trajectory(
            "user-1",
            &glucose_series(&[6.0, 6.5, 7.0, 6.2]),
            None,
            &options,
        );
        assert_eq!(second.current_stage, BehaviorStage::Maintenance);
        assert_eq!(second.stage_transitions.len(), 1);
        assert_eq!(
            second.stage_transitions[0].from_stage,
            BehaviorStage::Contemplation
        );

        assert_eq!(aggregator.trajectory_count("user-1"), 2);
        let history = aggregator.history("user-1");
        assert_eq!(history[0], first);
        assert_eq!(
            aggregator.latest_trajectory("user-1").unwrap().trajectory_id,
            second.trajectory_id
        );
        assert!(aggregator.latest_trajectory("nobody").is_none());

        assert_eq!(aggregator.remove_user("user-1"), 2);
        assert_eq!(aggregator.trajectory_count("user-1"), 0);
        assert_eq!(aggregator.remove_user("user-1"), 0);

        // A fresh build after removal has no prior to fold in
        let rebuilt = aggregator.build_trajectory(
            "user-1",
            &glucose_series(&[12.0, 13.0, 4.5, 11.0]),
            None,
            &options,
        );
        assert!(rebuilt.stage_transitions.is_empty());
    }

    #[test]
    fn test_assessed_stage_survives_rebuild() {
        let aggregator = TrajectoryAggregator::new();
        let mut prior = aggregator.build_trajectory(
            "user-1",
            &glucose_series(&[6.0]),
            None,
            &TrajectoryOptions::default(),
        );
        prior.current_stage = BehaviorStage::Action;
        prior.stage_source = StageSource::Assessed;

        let next = aggregator.build_trajectory(
            "user-1",
            &glucose_series(&[6.0, 6.1]),
            Some(&prior),
            &TrajectoryOptions::default(),
        );
        assert_eq!(next.current_stage, BehaviorStage::Action);
        assert_eq!(next.stage_source, StageSource::Assessed);
    }

    #[test]
    fn test_events_annotated_and_sorted() {
        let mut meal_a = record(MetricType::Glucose, 9.0, "2024-01-15T12:30:00+00:00");
        meal_a.context.post_meal_minutes = Some(30.0);
        let mut meal_b = record(MetricType::Glucose, 15.0, "2024-01-15T13:00:00+00:00");
        meal_b.context.post_meal_minutes = Some(60.0);
        let low = record(MetricType::Glucose, 3.2, "2024-01-15T03:00:00+00:00");

        let events = annotate_events(&[meal_a, meal_b, low]);
        let kinds: Vec<BehaviorEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                BehaviorEventType::Hypoglycemia,
                BehaviorEventType::Meal,
                BehaviorEventType::Hyperglycemia,
            ]
        );
    }
}
