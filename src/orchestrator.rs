//! Pipeline orchestration
//!
//! This module provides the session-scoped public API of Synheart Coach.
//! It runs the full pipeline from raw device readings to intervention plans:
//! normalization → trajectory aggregation → phenotype matching →
//! stage assessment → intervention planning.
//!
//! Every operation that changes a user's state runs inside the session store's
//! per-user critical section.

use crate::config::CoachConfig;
use crate::error::{CoachError, Result};
use crate::intervention::{
    planner, ContentCatalog, DailyTask, Frequency, InterventionPlan, InterventionPlanSummary,
    InterventionPlanner, PlanProgress, PlanStatus, PlaybookCatalog, ResourceCatalog,
    StaticContentCatalog, StaticResourceCatalog,
};
use crate::normalizer::{BatchItemError, NormalizeResult, SignalNormalizer};
use crate::phenotype::{PhenotypeMatchResult, PhenotypeMatcher};
use crate::session::{
    BehaviorLock, FeedbackKind, FeedbackRecord, InMemorySessionStore, SessionStore, UserSession,
};
use crate::stage::{stage_profile, StageIndicators};
use crate::trajectory::{self, TrajectoryAggregator, TrajectoryOptions};
use crate::types::{
    BehaviorStage, InterventionApplied, RawSignalInput, RiskLevel, SignalsSummary, StageSource,
    StageTransition, TrajectoryRecord,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on conversation topics
const MAX_CONVERSATION_TOPICS: usize = 4;

/// Stage-level topics placed ahead of phenotype topics
const STAGE_TOPICS: usize = 2;

/// Phenotypes shown on the dashboard
const DASHBOARD_PHENOTYPES: usize = 3;

/// Outcome of a `process_signals` call
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSignalsResult {
    pub success: bool,
    pub message: String,
    /// One entry per submitted signal, in submission order
    pub signal_results: Vec<NormalizeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<TrajectoryRecord>,
    pub phenotypes: Vec<PhenotypeMatchResult>,
    pub errors: Vec<BatchItemError>,
}

/// Outcome of a `process_feedback` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackOutcome {
    pub accepted: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_progress: Option<PlanProgress>,
    /// Behavior locks whose streak changed
    pub locks_updated: usize,
}

impl FeedbackOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            plan_progress: None,
            locks_updated: 0,
        }
    }

    fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
            plan_progress: None,
            locks_updated: 0,
        }
    }
}

/// Compact phenotype entry for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhenotypeBrief {
    pub id: &'static str,
    pub name: &'static str,
    pub match_score: f64,
    pub risk_level: RiskLevel,
}

/// Active plan overview for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOverview {
    pub plan_id: String,
    pub name: String,
    pub status: PlanStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub progress: PlanProgress,
    pub today_tasks: Vec<DailyTask>,
}

/// Read-only projection of a user's session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub user_id: String,
    pub has_session: bool,
    pub current_stage: BehaviorStage,
    pub stage_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SignalsSummary>,
    pub risk_flags: Vec<String>,
    pub insights: Vec<String>,
    pub top_phenotypes: Vec<PhenotypeBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanOverview>,
    pub behavior_locks: Vec<BehaviorLock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Context handed to a conversational coach
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationContext {
    pub user_id: String,
    pub current_stage: BehaviorStage,
    pub stage_name: String,
    pub current_focus: String,
    /// At most four, stage topics first
    pub suggested_topics: Vec<String>,
    pub phenotypes: Vec<String>,
    pub risk_flags: Vec<String>,
    pub recent_insights: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adherence_rate: Option<f64>,
}

/// Session-scoped façade over the coaching pipeline
pub struct Orchestrator<S: SessionStore = InMemorySessionStore> {
    config: CoachConfig,
    aggregator: TrajectoryAggregator,
    matcher: Arc<PhenotypeMatcher>,
    planner: InterventionPlanner,
    playbooks: PlaybookCatalog,
    contents: Arc<dyn ContentCatalog>,
    resources: Arc<dyn ResourceCatalog>,
    sessions: S,
    initialized: AtomicBool,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Orchestrator with default configuration and built-in catalogs
    pub fn new() -> Self {
        Self::from_config(CoachConfig::default())
    }

    pub fn from_config(config: CoachConfig) -> Self {
        Self::with_components(
            config,
            InMemorySessionStore::new(),
            Arc::new(StaticContentCatalog::new()),
            Arc::new(StaticResourceCatalog::new()),
        )
    }
}

impl<S: SessionStore> Orchestrator<S> {
    /// Assemble an orchestrator from explicit collaborators
    pub fn with_components(
        config: CoachConfig,
        sessions: S,
        contents: Arc<dyn ContentCatalog>,
        resources: Arc<dyn ResourceCatalog>,
    ) -> Self {
        let matcher = Arc::new(PhenotypeMatcher::new());
        let playbooks = PlaybookCatalog::builtin();
        let planner = InterventionPlanner::new(
            &config,
            Arc::clone(&matcher),
            playbooks,
            Arc::clone(&contents),
            Arc::clone(&resources),
        );
        Self {
            config,
            aggregator: TrajectoryAggregator::new(),
            matcher,
            planner,
            playbooks,
            contents,
            resources,
            sessions,
            initialized: AtomicBool::new(false),
        }
    }

    /// Validate catalogs and mark the orchestrator ready. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.playbooks.validate()?;
        self.contents.validate()?;
        self.resources.validate()?;
        self.initialized.store(true, Ordering::Release);
        info!(
            playbooks = self.playbooks.playbooks().len(),
            levers = self.playbooks.levers().len(),
            contents = self.contents.len(),
            resources = self.resources.len(),
            "Coach orchestrator initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoachError::NotInitialized)
        }
    }

    /// Snapshot of the user's session, creating it if needed
    pub fn get_or_create_session(&self, user_id: &str) -> Result<UserSession> {
        self.ensure_initialized()?;
        Ok(self.sessions.upsert(user_id, Utc::now(), |s| s.clone()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current trajectory on the user's session
    pub fn latest_trajectory(&self, user_id: &str) -> Result<Option<TrajectoryRecord>> {
        self.ensure_initialized()?;
        Ok(self
            .sessions
            .get(user_id)
            .and_then(|s| s.current_trajectory))
    }

    /// Every trajectory built for the user, oldest first
    pub fn trajectory_history(&self, user_id: &str) -> Result<Vec<TrajectoryRecord>> {
        self.ensure_initialized()?;
        Ok(self.aggregator.history(user_id))
    }

    /// Ingest raw readings for a user.
    ///
    /// # Arguments
    /// * `user_id` - Session owner; fills in readings that omit `user_id`
    /// * `signals` - Raw readings in any supported device format
    ///
    /// # Returns
    /// Per-signal results plus the rebuilt trajectory and phenotype matches.
    /// `success` is false only when no reading normalized.
    ///
    /// Readings are kept in arrival order, so HRV and step trends follow the
    /// order they were submitted in.
    pub fn process_signals(
        &self,
        user_id: &str,
        signals: &[RawSignalInput],
    ) -> Result<ProcessSignalsResult> {
        self.ensure_initialized()?;

        let inputs: Vec<RawSignalInput> = signals
            .iter()
            .cloned()
            .map(|mut raw| {
                raw.user_id.get_or_insert_with(|| user_id.to_string());
                raw
            })
            .collect();
        let batch = SignalNormalizer::normalize_batch(&inputs);

        let mut signal_results = batch.results;
        let mut errors = batch.errors;
        let mut accepted = Vec::new();
        for (index, result) in signal_results.iter_mut().enumerate() {
            let Some(record) = result.record.as_ref() else {
                continue;
            };
            if record.user_id != user_id {
                let error = CoachError::InvalidValue(format!(
                    "signal belongs to user {}, not {}",
                    record.user_id, user_id
                ));
                warn!(user_id = %user_id, index, "Rejected signal for another user");
                errors.push(BatchItemError {
                    index,
                    error: error.to_string(),
                });
                *result = NormalizeResult::failure(error);
                continue;
            }
            accepted.push(record.clone());
        }
        errors.sort_by_key(|e| e.index);

        let now = Utc::now();
        let options = TrajectoryOptions {
            time_window_days: self.config.trajectory_window_days,
        };

        if accepted.is_empty() {
            self.sessions.upsert(user_id, now, |_| ());
            warn!(user_id = %user_id, submitted = signals.len(), "No signals normalized");
            return Ok(ProcessSignalsResult {
                success: false,
                message: format!("None of {} signals could be normalized", signals.len()),
                signal_results,
                trajectory: None,
                phenotypes: Vec::new(),
                errors,
            });
        }

        let accepted_count = accepted.len();
        let (trajectory, phenotypes) = self.sessions.upsert(user_id, now, |session| {
            session.signals.extend(accepted);
            session.signals =
                trajectory::window_signals(&session.signals, options.time_window_days);

            let trajectory = self.aggregator.build_trajectory(
                user_id,
                &session.signals,
                session.current_trajectory.as_ref(),
                &options,
            );
            let phenotypes = self.matcher.match_phenotypes(&trajectory.summary);

            session.current_trajectory = Some(trajectory.clone());
            session.phenotypes = phenotypes.clone();
            (trajectory, phenotypes)
        });

        info!(
            user_id = %user_id,
            accepted = accepted_count,
            rejected = errors.len(),
            phenotypes = phenotypes.len(),
            "Processed signals"
        );

        Ok(ProcessSignalsResult {
            success: true,
            message: format!(
                "Processed {} of {} signals",
                accepted_count,
                signals.len()
            ),
            signal_results,
            trajectory: Some(trajectory),
            phenotypes,
            errors,
        })
    }

    /// Assess the user's stage and generate recommendations.
    ///
    /// Returns `None` when the user has no trajectory yet. The assessed stage
    /// replaces the trajectory's placeholder stage.
    pub fn generate_intervention(
        &self,
        user_id: &str,
        indicators: Option<&StageIndicators>,
    ) -> Result<Option<InterventionPlanSummary>> {
        self.ensure_initialized()?;
        let now = Utc::now();

        let summary = self.sessions.update(user_id, now, |session| {
            let trajectory = session.current_trajectory.as_mut()?;
            let indicators = indicators
                .copied()
                .unwrap_or_else(|| planner::indicators_from_trajectory(trajectory));
            let summary = self.planner.generate_plan(user_id, trajectory, Some(&indicators));

            let assessed = summary.stage_assessment.current_stage;
            if trajectory.current_stage != assessed {
                trajectory.stage_transitions.push(StageTransition {
                    from_stage: trajectory.current_stage,
                    to_stage: assessed,
                    transitioned_at: now,
                    reason: "stage_assessment".to_string(),
                });
                debug!(
                    user_id = %user_id,
                    from = %trajectory.current_stage,
                    to = %assessed,
                    "Stage changed"
                );
            }
            trajectory.current_stage = assessed;
            trajectory.stage_source = StageSource::Assessed;

            session.stage_assessment = Some(summary.stage_assessment.clone());
            session.stage_indicators = Some(indicators);
            Some(summary)
        });

        Ok(summary.flatten())
    }

    /// Build an execution plan from the top recommendation and make it the
    /// user's active plan.
    ///
    /// Returns `None` when the user has no trajectory or the top
    /// recommendation has no playbook for the current stage.
    pub fn activate_intervention_plan(
        &self,
        user_id: &str,
        start_date: Option<NaiveDate>,
    ) -> Result<Option<InterventionPlan>> {
        self.ensure_initialized()?;
        let now = Utc::now();
        let start_date = start_date.unwrap_or_else(|| now.date_naive());

        let outcome = self.sessions.update(user_id, now, |session| {
            let Some(trajectory) = session.current_trajectory.as_mut() else {
                return Ok(None);
            };
            let summary =
                self.planner
                    .generate_plan(user_id, trajectory, session.stage_indicators.as_ref());

            let plan = match self.planner.create_execution_plan(&summary, start_date, now) {
                Ok(plan) => plan,
                Err(CoachError::PlanNotFound(_)) => {
                    info!(user_id = %user_id, "No playbook available for activation");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            trajectory.interventions_applied.push(InterventionApplied {
                plan_id: plan.plan_id.clone(),
                playbook_id: plan.playbook_id.clone(),
                name: plan.name.clone(),
                applied_at: now,
            });
            if let Some(previous) = session.current_plan.as_mut() {
                if previous.status == PlanStatus::Active {
                    previous.status = PlanStatus::Abandoned;
                }
            }
            session.current_plan = Some(plan.clone());
            Ok(Some(plan))
        });

        outcome.unwrap_or(Ok(None))
    }

    /// Route user feedback.
    ///
    /// Task feedback also moves the streak of every active behavior lock:
    /// completion extends all of them, a skip resets all of them. Locks are
    /// not tied to individual tasks.
    pub fn process_feedback(
        &self,
        user_id: &str,
        feedback: FeedbackKind,
    ) -> Result<FeedbackOutcome> {
        self.ensure_initialized()?;
        let now = Utc::now();

        let outcome = self.sessions.update(user_id, now, |session| {
            let outcome = match &feedback {
                FeedbackKind::TaskCompleted { task_id } => match session.current_plan.as_mut() {
                    None => FeedbackOutcome::rejected("No active plan"),
                    Some(plan) => match self.playbooks.complete_task(plan, task_id, now) {
                        Ok(progress) => FeedbackOutcome {
                            plan_progress: Some(progress),
                            locks_updated: session.nudge_locks(true, now),
                            ..FeedbackOutcome::accepted("Task completed")
                        },
                        Err(e) => FeedbackOutcome::rejected(e.to_string()),
                    },
                },
                FeedbackKind::TaskSkipped { task_id, reason } => {
                    match session.current_plan.as_mut() {
                        None => FeedbackOutcome::rejected("No active plan"),
                        Some(plan) => {
                            match self.playbooks.skip_task(plan, task_id, reason.as_deref()) {
                                Ok(progress) => FeedbackOutcome {
                                    plan_progress: Some(progress),
                                    locks_updated: session.nudge_locks(false, now),
                                    ..FeedbackOutcome::accepted("Task skipped")
                                },
                                Err(e) => FeedbackOutcome::rejected(e.to_string()),
                            }
                        }
                    }
                }
                FeedbackKind::ContentViewed { content_id } => {
                    if self.contents.content(content_id).is_some() {
                        FeedbackOutcome::accepted("Content view recorded")
                    } else {
                        FeedbackOutcome::rejected(format!("Unknown content: {}", content_id))
                    }
                }
                FeedbackKind::ResourceClicked { resource_id } => {
                    if self.resources.resource(resource_id).is_some() {
                        FeedbackOutcome::accepted("Resource click recorded")
                    } else {
                        FeedbackOutcome::rejected(format!("Unknown resource: {}", resource_id))
                    }
                }
                FeedbackKind::Rating { score, .. } => {
                    if (1..=5).contains(score) {
                        FeedbackOutcome::accepted("Rating recorded")
                    } else {
                        FeedbackOutcome::rejected(format!("Rating must be 1-5, got {}", score))
                    }
                }
            };

            session.feedback.push(FeedbackRecord {
                feedback: feedback.clone(),
                accepted: outcome.accepted,
                received_at: now,
            });
            outcome
        });

        let outcome = outcome.unwrap_or_else(|| FeedbackOutcome::rejected("No session for user"));
        debug!(
            user_id = %user_id,
            accepted = outcome.accepted,
            locks_updated = outcome.locks_updated,
            "Processed feedback"
        );
        Ok(outcome)
    }

    /// Start tracking a habit for the user
    pub fn create_behavior_lock(
        &self,
        user_id: &str,
        habit: &str,
        trigger: &str,
        frequency: Frequency,
    ) -> Result<BehaviorLock> {
        self.ensure_initialized()?;
        if habit.trim().is_empty() {
            return Err(CoachError::MissingField("habit".to_string()));
        }

        let now = Utc::now();
        let lock = BehaviorLock::new(habit.trim(), trigger.trim(), frequency, now);
        self.sessions
            .upsert(user_id, now, |session| session.behavior_locks.push(lock.clone()));

        info!(user_id = %user_id, lock_id = %lock.lock_id, "Created behavior lock");
        Ok(lock)
    }

    /// Dashboard projection; defaults when the user has no session
    pub fn get_dashboard(&self, user_id: &str) -> Result<Dashboard> {
        self.ensure_initialized()?;

        let Some(session) = self.sessions.get(user_id) else {
            let stage = BehaviorStage::default();
            return Ok(Dashboard {
                user_id: user_id.to_string(),
                has_session: false,
                current_stage: stage,
                stage_name: stage.display_name().to_string(),
                stage_score: None,
                summary: None,
                risk_flags: Vec::new(),
                insights: Vec::new(),
                top_phenotypes: Vec::new(),
                plan: None,
                behavior_locks: Vec::new(),
                last_activity: None,
            });
        };

        let stage = session_stage(&session);
        let today = Utc::now().date_naive();
        let plan = session.current_plan.as_ref().map(|plan| PlanOverview {
            plan_id: plan.plan_id.clone(),
            name: plan.name.clone(),
            status: plan.status,
            start_date: plan.start_date,
            end_date: plan.end_date,
            progress: plan.progress,
            today_tasks: self
                .playbooks
                .today_tasks(plan, today)
                .into_iter()
                .cloned()
                .collect(),
        });
        let trajectory = session.current_trajectory.as_ref();

        Ok(Dashboard {
            user_id: user_id.to_string(),
            has_session: true,
            current_stage: stage,
            stage_name: stage.display_name().to_string(),
            stage_score: session.stage_assessment.as_ref().map(|a| a.stage_score),
            summary: trajectory.map(|t| t.summary.clone()),
            risk_flags: trajectory
                .map(|t| t.risk_flags.iter().cloned().collect())
                .unwrap_or_default(),
            insights: trajectory.map(|t| t.insights.clone()).unwrap_or_default(),
            top_phenotypes: session
                .phenotypes
                .iter()
                .take(DASHBOARD_PHENOTYPES)
                .map(|m| PhenotypeBrief {
                    id: m.phenotype.id,
                    name: m.phenotype.name,
                    match_score: m.match_score,
                    risk_level: m.phenotype.risk_level,
                })
                .collect(),
            plan,
            behavior_locks: session.behavior_locks.clone(),
            last_activity: Some(session.last_activity),
        })
    }

    /// Conversation context; defaults when the user has no session
    pub fn get_conversation_context(&self, user_id: &str) -> Result<ConversationContext> {
        self.ensure_initialized()?;

        let session = self.sessions.get(user_id);
        let stage = session.as_ref().map(session_stage).unwrap_or_default();
        let profile = stage_profile(stage);

        let mut topics: Vec<String> = profile
            .topics
            .iter()
            .take(STAGE_TOPICS)
            .map(|t| t.to_string())
            .collect();
        if let Some(session) = &session {
            for topic in session.phenotypes.iter().flat_map(|m| m.phenotype.topics) {
                if topics.len() >= MAX_CONVERSATION_TOPICS {
                    break;
                }
                if !topics.iter().any(|t| t == topic) {
                    topics.push(topic.to_string());
                }
            }
        }
        topics.truncate(MAX_CONVERSATION_TOPICS);

        let trajectory = session.as_ref().and_then(|s| s.current_trajectory.as_ref());
        let plan = session.as_ref().and_then(|s| s.current_plan.as_ref());

        Ok(ConversationContext {
            user_id: user_id.to_string(),
            current_stage: stage,
            stage_name: stage.display_name().to_string(),
            current_focus: profile.focus.to_string(),
            suggested_topics: topics,
            phenotypes: session
                .as_ref()
                .map(|s| {
                    s.phenotypes
                        .iter()
                        .map(|m| m.phenotype.name.to_string())
                        .collect()
                })
                .unwrap_or_default(),
            risk_flags: trajectory
                .map(|t| t.risk_flags.iter().cloned().collect())
                .unwrap_or_default(),
            recent_insights: trajectory.map(|t| t.insights.clone()).unwrap_or_default(),
            active_plan: plan.map(|p| p.name.clone()),
            adherence_rate: plan.map(|p| p.progress.adherence_rate),
        })
    }

    /// Remove sessions idle for longer than `max_age_hours`, together with
    /// their trajectory history; returns how many sessions were removed.
    ///
    /// A negative age is rejected. An age reaching past the earliest
    /// representable time removes nothing.
    pub fn cleanup_sessions(&self, max_age_hours: i64) -> Result<usize> {
        self.ensure_initialized()?;
        if max_age_hours < 0 {
            return Err(CoachError::InvalidValue(format!(
                "max_age_hours must not be negative, got {}",
                max_age_hours
            )));
        }

        let cutoff =
            Duration::try_hours(max_age_hours).and_then(|age| Utc::now().checked_sub_signed(age));
        let removed = match cutoff {
            Some(cutoff) => self.sessions.remove_idle(cutoff),
            None => Vec::new(),
        };
        let trajectories: usize = removed
            .iter()
            .map(|user_id| self.aggregator.remove_user(user_id))
            .sum();

        info!(
            removed = removed.len(),
            trajectories,
            remaining = self.sessions.len(),
            max_age_hours,
            "Cleaned up sessions"
        );
        Ok(removed.len())
    }
}

/// Assessed stage when available, else the trajectory's stage
fn session_stage(session: &UserSession) -> BehaviorStage {
    session
        .stage_assessment
        .as_ref()
        .map(|a| a.current_stage)
        .or_else(|| session.current_trajectory.as_ref().map(|t| t.current_stage))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::catalog::POSTPRANDIAL_HYPERGLYCEMIA;
    use crate::types::{DeviceType, MetricType, SignalContext};
    use pretty_assertions::assert_eq;

    fn orchestrator() -> Orchestrator {
        let orchestrator = Orchestrator::new();
        orchestrator.initialize().unwrap();
        orchestrator
    }

    fn glucose(
        user_id: &str,
        value: f64,
        timestamp: &str,
        context: SignalContext,
    ) -> RawSignalInput {
        RawSignalInput::reading(user_id, DeviceType::Cgm, MetricType::Glucose, value, timestamp)
            .with_context(context)
    }

    fn ingest_meal_scenario(orchestrator: &Orchestrator, user_id: &str) -> ProcessSignalsResult {
        let fasting = glucose(
            user_id,
            6.5,
            "2024-01-15T07:00:00+08:00",
            SignalContext {
                fasting: Some(true),
                ..Default::default()
            },
        );
        orchestrator.process_signals(user_id, &[fasting]).unwrap();

        let after_meal = glucose(
            user_id,
            11.5,
            "2024-01-15T09:30:00+08:00",
            SignalContext {
                post_meal_minutes: Some(90.0),
                ..Default::default()
            },
        );
        orchestrator.process_signals(user_id, &[after_meal]).unwrap()
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let orchestrator = Orchestrator::new();
        assert!(matches!(
            orchestrator.process_signals("u", &[]),
            Err(CoachError::NotInitialized)
        ));
        assert!(matches!(
            orchestrator.get_dashboard("u"),
            Err(CoachError::NotInitialized)
        ));
        assert!(matches!(
            orchestrator.cleanup_sessions(24),
            Err(CoachError::NotInitialized)
        ));

        orchestrator.initialize().unwrap();
        orchestrator.initialize().unwrap();
        assert!(orchestrator.is_initialized());
    }

    #[test]
    fn test_end_to_end_meal_scenario() {
        let orchestrator = orchestrator();
        let result = ingest_meal_scenario(&orchestrator, "e2e-test-user");

        assert!(result.success);
        let trajectory = result.trajectory.unwrap();
        assert_eq!(trajectory.summary.postprandial_peak, Some(11.5));
        assert_eq!(trajectory.summary.fasting_glucose_mean, Some(6.5));
        assert_eq!(trajectory.signal_count, 2);
        assert!(result
            .phenotypes
            .iter()
            .any(|m| m.phenotype.name == "餐后高血糖型" && m.match_score > 0.5));

        assert_eq!(orchestrator.trajectory_history("e2e-test-user").unwrap().len(), 2);
        assert_eq!(orchestrator.session_count(), 1);
    }

    #[test]
    fn test_partial_batch_and_total_failure() {
        let orchestrator = orchestrator();
        let good = glucose("u1", 6.0, "2024-01-15T08:00:00Z", SignalContext::default());
        let missing_value = RawSignalInput {
            value: None,
            ..good.clone()
        };
        let other_user = glucose("u2", 6.0, "2024-01-15T08:00:00Z", SignalContext::default());

        let result = orchestrator
            .process_signals("u1", &[missing_value.clone(), good, other_user])
            .unwrap();
        assert!(result.success);
        assert_eq!(result.signal_results.len(), 3);
        assert!(!result.signal_results[0].success);
        assert!(result.signal_results[1].success);
        assert!(!result.signal_results[2].success);
        let indexes: Vec<usize> = result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 2]);

        let result = orchestrator.process_signals("u3", &[missing_value]).unwrap();
        assert!(!result.success);
        assert!(result.trajectory.is_none());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_missing_user_id_filled_from_call() {
        let orchestrator = orchestrator();
        let raw = RawSignalInput {
            user_id: None,
            ..glucose("ignored", 6.0, "2024-01-15T08:00:00Z", SignalContext::default())
        };
        let result = orchestrator.process_signals("u1", &[raw]).unwrap();
        assert!(result.success);
        assert_eq!(result.signal_results[0].record.as_ref().unwrap().user_id, "u1");
    }

    #[test]
    fn test_generate_intervention_overrides_stage() {
        let orchestrator = orchestrator();
        assert!(orchestrator.generate_intervention("nobody", None).unwrap().is_none());

        ingest_meal_scenario(&orchestrator, "u1");
        let indicators = StageIndicators {
            awareness: 80.0,
            motivation: 80.0,
            self_efficacy: 80.0,
            action_frequency: 8.0,
            days_maintained: 90.0,
        };
        let summary = orchestrator
            .generate_intervention("u1", Some(&indicators))
            .unwrap()
            .unwrap();
        assert_eq!(summary.stage_assessment.current_stage, BehaviorStage::Action);
        assert_eq!(summary.recommendations[0].phenotype_id, POSTPRANDIAL_HYPERGLYCEMIA);

        let trajectory = orchestrator.latest_trajectory("u1").unwrap().unwrap();
        assert_eq!(trajectory.current_stage, BehaviorStage::Action);
        assert_eq!(trajectory.stage_source, StageSource::Assessed);
        assert_eq!(
            trajectory.stage_transitions.last().unwrap().to_stage,
            BehaviorStage::Action
        );

        // assessed stage survives further ingestion
        let more = glucose("u1", 7.0, "2024-01-15T12:00:00+08:00", SignalContext::default());
        let result = orchestrator.process_signals("u1", &[more]).unwrap();
        assert_eq!(result.trajectory.unwrap().current_stage, BehaviorStage::Action);
    }

    #[test]
    fn test_activate_plan_records_intervention() {
        let orchestrator = orchestrator();
        assert!(orchestrator.activate_intervention_plan("nobody", None).unwrap().is_none());

        ingest_meal_scenario(&orchestrator, "u1");
        let plan = orchestrator
            .activate_intervention_plan("u1", None)
            .unwrap()
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Active);

        let trajectory = orchestrator.latest_trajectory("u1").unwrap().unwrap();
        assert_eq!(trajectory.interventions_applied.len(), 1);
        assert_eq!(trajectory.interventions_applied[0].plan_id, plan.plan_id);

        let dashboard = orchestrator.get_dashboard("u1").unwrap();
        let overview = dashboard.plan.unwrap();
        assert_eq!(overview.plan_id, plan.plan_id);
        assert!(!overview.today_tasks.is_empty());
    }

    #[test]
    fn test_feedback_moves_every_lock() {
        let orchestrator = orchestrator();
        ingest_meal_scenario(&orchestrator, "u1");
        let plan = orchestrator
            .activate_intervention_plan("u1", None)
            .unwrap()
            .unwrap();
        orchestrator
            .create_behavior_lock("u1", "餐后散步", "午餐后", Frequency::Daily)
            .unwrap();
        orchestrator
            .create_behavior_lock("u1", "睡前远离屏幕", "22:00", Frequency::Daily)
            .unwrap();

        // A single task completion extends both locks, even the unrelated one
        let outcome = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::TaskCompleted {
                    task_id: plan.tasks[0].task_id.clone(),
                },
            )
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.locks_updated, 2);
        assert_eq!(outcome.plan_progress.unwrap().completed_tasks, 1);
        let locks = orchestrator.get_dashboard("u1").unwrap().behavior_locks;
        assert!(locks.iter().all(|l| l.streak_days == 1));

        // Rejected feedback leaves locks alone
        let outcome = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::TaskCompleted {
                    task_id: "missing".to_string(),
                },
            )
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.locks_updated, 0);

        // A skip resets all of them
        let outcome = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::TaskSkipped {
                    task_id: plan.tasks[1].task_id.clone(),
                    reason: None,
                },
            )
            .unwrap();
        assert_eq!(outcome.locks_updated, 2);
        let locks = orchestrator.get_dashboard("u1").unwrap().behavior_locks;
        assert!(locks.iter().all(|l| l.streak_days == 0));
    }

    #[test]
    fn test_catalog_feedback_and_ratings() {
        let orchestrator = orchestrator();
        let none = orchestrator
            .process_feedback("nobody", FeedbackKind::Rating { score: 5, comment: None })
            .unwrap();
        assert!(!none.accepted);

        orchestrator.get_or_create_session("u1").unwrap();
        let viewed = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::ContentViewed {
                    content_id: "c_meal_order".to_string(),
                },
            )
            .unwrap();
        assert!(viewed.accepted);
        let clicked = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::ResourceClicked {
                    resource_id: "r_unknown".to_string(),
                },
            )
            .unwrap();
        assert!(!clicked.accepted);
        let rating = orchestrator
            .process_feedback("u1", FeedbackKind::Rating { score: 9, comment: None })
            .unwrap();
        assert!(!rating.accepted);
        let task = orchestrator
            .process_feedback(
                "u1",
                FeedbackKind::TaskCompleted {
                    task_id: "t".to_string(),
                },
            )
            .unwrap();
        assert_eq!(task.message, "No active plan");

        let session = orchestrator.get_or_create_session("u1").unwrap();
        assert_eq!(session.feedback.len(), 4);
    }

    #[test]
    fn test_behavior_lock_requires_habit() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.create_behavior_lock("u1", "  ", "t", Frequency::Daily),
            Err(CoachError::MissingField(_))
        ));
    }

    #[test]
    fn test_dashboard_and_context_defaults() {
        let orchestrator = orchestrator();
        let dashboard = orchestrator.get_dashboard("nobody").unwrap();
        assert!(!dashboard.has_session);
        assert_eq!(dashboard.current_stage, BehaviorStage::Contemplation);
        assert!(dashboard.plan.is_none());

        let context = orchestrator.get_conversation_context("nobody").unwrap();
        assert_eq!(context.current_focus, "增强动机");
        assert_eq!(context.suggested_topics.len(), 2);
        assert_eq!(orchestrator.session_count(), 0);
    }

    #[test]
    fn test_conversation_topics_blend_and_cap() {
        let orchestrator = orchestrator();
        let reading = |device: DeviceType, metric: MetricType, value: f64, timestamp: &str| {
            RawSignalInput::reading("u1", device, metric, value, timestamp)
        };
        let signals = vec![
            reading(DeviceType::Watch, MetricType::Steps, 3000.0, "2024-01-15T20:00:00Z"),
            reading(DeviceType::Hrv, MetricType::Rmssd, 22.0, "2024-01-15T21:00:00Z"),
            reading(DeviceType::Watch, MetricType::SleepDuration, 5.0, "2024-01-15T22:00:00Z"),
        ];
        let result = orchestrator.process_signals("u1", &signals).unwrap();
        assert!(result.phenotypes.len() >= 2);

        let context = orchestrator.get_conversation_context("u1").unwrap();
        assert_eq!(context.suggested_topics.len(), 4);
        let stage_topics = stage_profile(context.current_stage).topics;
        assert_eq!(context.suggested_topics[0], stage_topics[0]);
        assert_eq!(context.suggested_topics[1], stage_topics[1]);
        assert!(context.risk_flags.contains(&"insufficient_sleep".to_string()));
    }

    #[test]
    fn test_cleanup_sessions_sweep() {
        let orchestrator = orchestrator();
        let now = Utc::now();
        orchestrator
            .sessions()
            .upsert("stale", now - Duration::hours(48), |_| ());
        orchestrator
            .sessions()
            .upsert("fresh", now - Duration::hours(2), |_| ());

        assert_eq!(orchestrator.cleanup_sessions(24).unwrap(), 1);
        assert_eq!(orchestrator.session_count(), 1);
        assert!(orchestrator.get_dashboard("fresh").unwrap().has_session);
        assert!(!orchestrator.get_dashboard("stale").unwrap().has_session);
        assert_eq!(orchestrator.cleanup_sessions(24).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_rejects_negative_and_tolerates_huge_ages() {
        let orchestrator = orchestrator();
        orchestrator.get_or_create_session("u1").unwrap();

        assert!(matches!(
            orchestrator.cleanup_sessions(-1),
            Err(CoachError::InvalidValue(_))
        ));
        assert_eq!(orchestrator.cleanup_sessions(i64::MAX / 1000).unwrap(), 0);
        assert_eq!(orchestrator.cleanup_sessions(i64::MAX).unwrap(), 0);
        assert_eq!(orchestrator.session_count(), 1);
    }

    #[test]
    fn test_cleanup_drops_trajectory_history() {
        let orchestrator = orchestrator();
        ingest_meal_scenario(&orchestrator, "u1");
        orchestrator.generate_intervention("u1", None).unwrap();
        orchestrator.activate_intervention_plan("u1", None).unwrap();
        assert_eq!(orchestrator.trajectory_history("u1").unwrap().len(), 2);

        orchestrator
            .sessions()
            .upsert("u1", Utc::now() - Duration::hours(48), |_| ());
        assert_eq!(orchestrator.cleanup_sessions(24).unwrap(), 1);
        assert!(orchestrator.trajectory_history("u1").unwrap().is_empty());

        let trajectory = ingest_meal_scenario(&orchestrator, "u1").trajectory.unwrap();
        assert_eq!(orchestrator.trajectory_history("u1").unwrap().len(), 2);
        assert_eq!(trajectory.stage_source, StageSource::Inferred);
        assert!(trajectory.interventions_applied.is_empty());

        // Same as a user who never had a session
        let fresh = ingest_meal_scenario(&orchestrator, "u2").trajectory.unwrap();
        assert_eq!(trajectory.current_stage, fresh.current_stage);
        assert_eq!(
            trajectory.stage_transitions.len(),
            fresh.stage_transitions.len()
        );
    }

    #[test]
    fn test_trends_follow_arrival_order() {
        let orchestrator = orchestrator();
        let hrv = |value: f64, timestamp: &str| {
            RawSignalInput::reading("u1", DeviceType::Hrv, MetricType::Rmssd, value, timestamp)
        };
        // Newest readings submitted first; chronologically HRV is rising
        let signals = vec![
            hrv(60.0, "2024-01-15T08:00:00Z"),
            hrv(60.0, "2024-01-14T08:00:00Z"),
            hrv(40.0, "2024-01-13T08:00:00Z"),
            hrv(40.0, "2024-01-12T08:00:00Z"),
        ];
        let result = orchestrator.process_signals("u1", &signals).unwrap();
        assert_eq!(
            result.trajectory.unwrap().summary.hrv_trend,
            Some(crate::types::Trend::Down)
        );
    }
}
