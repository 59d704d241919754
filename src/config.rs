//! Runtime configuration
//!
//! Sensible defaults with environment variable overrides. Values that fail to
//! parse fall back to the default and are reported through `tracing`.

use crate::logging::{LogFormat, LoggingConfig};
use std::env;
use std::str::FromStr;
use tracing::warn;

/// Default trajectory window in days
pub const DEFAULT_TRAJECTORY_WINDOW_DAYS: u32 = 7;

/// Longest accepted trajectory window (about ten years)
pub const MAX_TRAJECTORY_WINDOW_DAYS: u32 = 3650;

/// Default idle age after which a session is eligible for cleanup
pub const DEFAULT_SESSION_MAX_AGE_HOURS: i64 = 24;

/// Pipeline configuration shared by the orchestrator and its stages
#[derive(Debug, Clone)]
pub struct CoachConfig {
    /// Trajectory aggregation window (days before the newest reading)
    pub trajectory_window_days: u32,
    /// Session idle age used by `cleanup_sessions` callers that don't pass one
    pub session_max_age_hours: i64,
    /// Number of phenotype matches turned into recommendations
    pub max_recommendations: usize,
    /// Content items and commercial resources attached per recommendation
    pub related_items_limit: usize,
    /// Upper bound on the immediate action list
    pub immediate_actions_cap: usize,
    pub logging: LoggingConfig,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            trajectory_window_days: DEFAULT_TRAJECTORY_WINDOW_DAYS,
            session_max_age_hours: DEFAULT_SESSION_MAX_AGE_HOURS,
            max_recommendations: 3,
            related_items_limit: 3,
            immediate_actions_cap: 5,
            logging: LoggingConfig::default(),
        }
    }
}

impl CoachConfig {
    /// Load configuration from `COACH_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.trajectory_window_days =
            env_or("COACH_TRAJECTORY_WINDOW_DAYS", config.trajectory_window_days);
        config.session_max_age_hours =
            env_or("COACH_SESSION_MAX_AGE_HOURS", config.session_max_age_hours);
        config.max_recommendations =
            env_or("COACH_MAX_RECOMMENDATIONS", config.max_recommendations);
        config.related_items_limit =
            env_or("COACH_RELATED_ITEMS_LIMIT", config.related_items_limit);
        config.immediate_actions_cap =
            env_or("COACH_IMMEDIATE_ACTIONS_CAP", config.immediate_actions_cap);

        if let Ok(level) = env::var("COACH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = env::var("COACH_LOG_FORMAT") {
            config.logging.format = LogFormat::from_str_or_default(&format);
        }

        config.trajectory_window_days = checked_window_days(config.trajectory_window_days);
        if config.session_max_age_hours < 0 {
            warn!(
                value = config.session_max_age_hours,
                "COACH_SESSION_MAX_AGE_HOURS must not be negative, using default"
            );
            config.session_max_age_hours = DEFAULT_SESSION_MAX_AGE_HOURS;
        }

        config
    }

    /// Override the trajectory window; out-of-range values keep the default
    pub fn with_trajectory_window_days(mut self, days: u32) -> Self {
        self.trajectory_window_days = checked_window_days(days);
        self
    }
}

fn checked_window_days(days: u32) -> u32 {
    if (1..=MAX_TRAJECTORY_WINDOW_DAYS).contains(&days) {
        days
    } else {
        warn!(
            days,
            max = MAX_TRAJECTORY_WINDOW_DAYS,
            "Trajectory window out of range, using default"
        );
        DEFAULT_TRAJECTORY_WINDOW_DAYS
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, "Invalid configuration value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
