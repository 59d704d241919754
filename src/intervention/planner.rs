//! Recommendation and execution-plan generation

use super::{
    ContentCatalog, InterventionPlan, InterventionPlanSummary, PlaybookCatalog, Priority,
    Recommendation, ResourceCatalog,
};
use crate::config::CoachConfig;
use crate::error::{CoachError, Result};
use crate::phenotype::{PhenotypeMatchResult, PhenotypeMatcher};
use crate::stage::{stage_profile, BehaviorStageAssessor, StageAssessment, StageIndicators};
use crate::trajectory;
use crate::types::{BehaviorStage, RiskLevel, TrajectoryRecord};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info};

const STAGE_LEVEL_ACTIONS: usize = 2;

/// Builds intervention summaries from trajectories
pub struct InterventionPlanner {
    assessor: BehaviorStageAssessor,
    matcher: Arc<PhenotypeMatcher>,
    playbooks: PlaybookCatalog,
    contents: Arc<dyn ContentCatalog>,
    resources: Arc<dyn ResourceCatalog>,
    max_recommendations: usize,
    related_items_limit: usize,
    immediate_actions_cap: usize,
}

impl std::fmt::Debug for InterventionPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterventionPlanner")
            .field("max_recommendations", &self.max_recommendations)
            .field("related_items_limit", &self.related_items_limit)
            .field("immediate_actions_cap", &self.immediate_actions_cap)
            .finish()
    }
}

impl InterventionPlanner {
    pub fn new(
        config: &CoachConfig,
        matcher: Arc<PhenotypeMatcher>,
        playbooks: PlaybookCatalog,
        contents: Arc<dyn ContentCatalog>,
        resources: Arc<dyn ResourceCatalog>,
    ) -> Self {
        Self {
            assessor: BehaviorStageAssessor::new(),
            matcher,
            playbooks,
            contents,
            resources,
            max_recommendations: config.max_recommendations,
            related_items_limit: config.related_items_limit,
            immediate_actions_cap: config.immediate_actions_cap,
        }
    }

    pub fn playbooks(&self) -> &PlaybookCatalog {
        &self.playbooks
    }

    /// Generate prioritized recommendations for a trajectory.
    ///
    /// Without `indicators`, the stage is assessed from proxies derived from
    /// the trajectory itself.
    pub fn generate_plan(
        &self,
        user_id: &str,
        trajectory: &TrajectoryRecord,
        indicators: Option<&StageIndicators>,
    ) -> InterventionPlanSummary {
        let indicators = indicators
            .copied()
            .unwrap_or_else(|| indicators_from_trajectory(trajectory));
        let stage_assessment = self.assessor.assess_stage(user_id, &indicators);
        let stage = stage_assessment.current_stage;

        let matches = self.matcher.match_phenotypes(&trajectory.summary);
        let mut recommendations: Vec<Recommendation> = matches
            .iter()
            .take(self.max_recommendations)
            .map(|m| self.recommend(m, stage))
            .collect();
        // stable: ties keep match order
        recommendations.sort_by_key(|r| r.priority);

        let summary = InterventionPlanSummary {
            user_id: user_id.to_string(),
            overall_strategy: overall_strategy(&stage_assessment, &recommendations),
            immediate_actions: self.immediate_actions(&stage_assessment, &recommendations),
            cautions: cautions(trajectory, &recommendations),
            stage_assessment,
            recommendations,
            generated_at: Utc::now(),
        };

        info!(
            user_id = %user_id,
            stage = %stage,
            recommendations = summary.recommendations.len(),
            immediate_actions = summary.immediate_actions.len(),
            "Generated intervention summary"
        );

        summary
    }

    /// Instantiate the first playbook of the top recommendation.
    ///
    /// Fails with `PlanNotFound` when there is no recommendation or the top
    /// one has no playbook for the assessed stage.
    pub fn create_execution_plan(
        &self,
        summary: &InterventionPlanSummary,
        start_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<InterventionPlan> {
        let playbook = summary
            .recommendations
            .first()
            .and_then(|r| r.playbooks.first().copied())
            .ok_or_else(|| CoachError::PlanNotFound(summary.user_id.clone()))?;

        debug!(
            user_id = %summary.user_id,
            playbook = playbook.id,
            "Creating execution plan"
        );

        self.playbooks
            .create_plan(playbook, &summary.user_id, start_date, now)
    }

    fn recommend(&self, m: &PhenotypeMatchResult, stage: BehaviorStage) -> Recommendation {
        let ids = [m.phenotype.id];
        Recommendation {
            phenotype_id: m.phenotype.id,
            phenotype_name: m.phenotype.name,
            match_score: m.match_score,
            risk_level: m.phenotype.risk_level,
            priority: Priority::for_match(m.phenotype.risk_level, m.match_score),
            playbooks: self.playbooks.match_playbooks(m.phenotype.id, stage),
            contents: self
                .contents
                .recommend_contents(stage, &ids, self.related_items_limit),
            resources: self
                .resources
                .recommend_by_phenotypes(&ids, self.related_items_limit),
        }
    }

    fn immediate_actions(
        &self,
        assessment: &StageAssessment,
        recommendations: &[Recommendation],
    ) -> Vec<String> {
        let profile = stage_profile(assessment.current_stage);
        let stage_actions = profile
            .strategies
            .iter()
            .take(STAGE_LEVEL_ACTIONS)
            .map(|s| s.to_string());

        let lever_actions = recommendations
            .iter()
            .filter(|r| r.priority == Priority::Immediate)
            .filter_map(|r| {
                let phenotype = crate::phenotype::phenotype(r.phenotype_id)?;
                let lever = phenotype
                    .recommended_levers
                    .iter()
                    .find_map(|id| self.playbooks.lever(id))?;
                Some(format!("{}：{}", lever.name, lever.description))
            });

        stage_actions
            .chain(lever_actions)
            .take(self.immediate_actions_cap)
            .collect()
    }
}

/// Stage indicator proxies for a trajectory without self-report data
pub fn indicators_from_trajectory(trajectory: &TrajectoryRecord) -> StageIndicators {
    let applied = trajectory.interventions_applied.len() as f64;
    StageIndicators {
        awareness: (30.0 + 10.0 * trajectory.insights.len() as f64).min(100.0),
        motivation: (50.0 + 10.0 * applied).min(100.0),
        self_efficacy: trajectory.summary.time_in_range.unwrap_or(50.0),
        action_frequency: applied,
        days_maintained: if trajectory.stage_transitions.is_empty() {
            0.0
        } else {
            30.0
        },
    }
}

fn overall_strategy(assessment: &StageAssessment, recommendations: &[Recommendation]) -> String {
    let stage = assessment.current_stage;
    let profile = stage_profile(stage);
    let mut strategy = format!(
        "用户处于{}，当前重点是{}。",
        stage.display_name(),
        profile.focus
    );

    if recommendations.is_empty() {
        strategy.push_str("暂未识别到明显的风险模式，建议保持现有习惯并持续监测。");
        return strategy;
    }

    let names: Vec<&str> = recommendations.iter().map(|r| r.phenotype_name).collect();
    strategy.push_str(&format!("主要关注{}。", names.join("、")));
    if recommendations
        .iter()
        .any(|r| r.priority == Priority::Immediate)
    {
        strategy.push_str("存在需要优先处理的高风险问题，建议尽快干预。");
    } else {
        strategy.push_str(&format!("建议{}。", profile.strategies.first().unwrap_or(&"循序渐进")));
    }
    strategy
}

fn cautions(trajectory: &TrajectoryRecord, recommendations: &[Recommendation]) -> Vec<String> {
    let mut cautions: Vec<String> = trajectory
        .risk_flags
        .iter()
        .filter_map(|flag| risk_flag_caution(flag).map(str::to_string))
        .collect();

    for r in recommendations {
        if matches!(r.risk_level, RiskLevel::High | RiskLevel::Critical) {
            let caution = format!("{}风险较高，请密切关注相关指标", r.phenotype_name);
            if !cautions.contains(&caution) {
                cautions.push(caution);
            }
        }
    }
    cautions
}

fn risk_flag_caution(flag: &str) -> Option<&'static str> {
    let caution = match flag {
        trajectory::RISK_NIGHT_HYPOGLYCEMIA => "存在夜间低血糖，调整方案前请咨询医生",
        trajectory::RISK_HIGH_GLUCOSE_VARIABILITY => "血糖波动较大，避免剧烈改变饮食结构",
        trajectory::RISK_FREQUENT_HYPOGLYCEMIA => "低血糖较频繁，运动前后注意监测血糖",
        trajectory::RISK_HIGH_POSTPRANDIAL_SPIKE => "餐后血糖峰值过高，注意控制单餐碳水",
        trajectory::RISK_ELEVATED_BLOOD_PRESSURE => "血压偏高，避免高强度运动",
        trajectory::RISK_LOW_HRV => "心率变异性偏低，注意休息和恢复",
        trajectory::RISK_INSUFFICIENT_SLEEP => "睡眠不足，避免夜间高强度活动",
        _ => return None,
    };
    Some(caution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervention::{StaticContentCatalog, StaticResourceCatalog};
    use crate::phenotype::catalog::*;
    use crate::types::{SignalsSummary, StageSource, StageTransition};

    fn planner() -> InterventionPlanner {
        InterventionPlanner::new(
            &CoachConfig::default(),
            Arc::new(PhenotypeMatcher::new()),
            PlaybookCatalog::builtin(),
            Arc::new(StaticContentCatalog::new()),
            Arc::new(StaticResourceCatalog::new()),
        )
    }

    fn trajectory(summary: SignalsSummary) -> TrajectoryRecord {
        TrajectoryRecord {
            trajectory_id: "traj".to_string(),
            user_id: "user-1".to_string(),
            window_start: None,
            window_end: None,
            time_window_days: 7,
            signal_count: 0,
            risk_flags: trajectory::derive_risk_flags(&summary),
            insights: trajectory::derive_insights(&summary),
            summary,
            events: Vec::new(),
            stage_transitions: Vec::new(),
            interventions_applied: Vec::new(),
            current_stage: BehaviorStage::Contemplation,
            stage_source: StageSource::Inferred,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fallback_indicators() {
        let mut traj = trajectory(SignalsSummary {
            time_in_range: Some(62.0),
            ..Default::default()
        });
        let indicators = indicators_from_trajectory(&traj);
        assert_eq!(indicators.awareness, 40.0);
        assert_eq!(indicators.motivation, 50.0);
        assert_eq!(indicators.self_efficacy, 62.0);
        assert_eq!(indicators.days_maintained, 0.0);

        traj.stage_transitions.push(StageTransition {
            from_stage: BehaviorStage::Contemplation,
            to_stage: BehaviorStage::Preparation,
            transitioned_at: Utc::now(),
            reason: "test".to_string(),
        });
        traj.summary.time_in_range = None;
        let indicators = indicators_from_trajectory(&traj);
        assert_eq!(indicators.days_maintained, 30.0);
        assert_eq!(indicators.self_efficacy, 50.0);
    }

    #[test]
    fn test_recommendations_sorted_by_priority_class() {
        // sedentary (medium, 0.8), stress (medium, 0.75), nocturnal (critical, 0.9)
        let traj = trajectory(SignalsSummary {
            steps_mean: Some(3000.0),
            hrv_mean: Some(25.0),
            night_hypoglycemia_count: Some(1),
            time_below_range: Some(5.0),
            ..Default::default()
        });
        let summary = planner().generate_plan("user-1", &traj, None);
        let ids: Vec<&str> = summary
            .recommendations
            .iter()
            .map(|r| r.phenotype_id)
            .collect();
        assert_eq!(ids, vec![NOCTURNAL_HYPOGLYCEMIA, SEDENTARY, STRESS_IMBALANCE]);
        assert_eq!(summary.recommendations[0].priority, Priority::Immediate);

        // 2 stage-level actions plus 1 lever for the immediate recommendation
        assert_eq!(summary.immediate_actions.len(), 3);
        assert!(summary.immediate_actions[2].starts_with("调整睡前加餐"));
        assert!(summary
            .cautions
            .iter()
            .any(|c| c.contains("夜间低血糖型")));
        assert!(summary.overall_strategy.contains("优先处理"));
    }

    #[test]
    fn test_immediate_actions_capped() {
        let config = CoachConfig {
            immediate_actions_cap: 2,
            ..Default::default()
        };
        let planner = InterventionPlanner::new(
            &config,
            Arc::new(PhenotypeMatcher::new()),
            PlaybookCatalog::builtin(),
            Arc::new(StaticContentCatalog::new()),
            Arc::new(StaticResourceCatalog::new()),
        );
        let traj = trajectory(SignalsSummary {
            systolic_mean: Some(150.0),
            diastolic_mean: Some(95.0),
            ..Default::default()
        });
        let summary = planner.generate_plan("user-1", &traj, None);
        assert_eq!(summary.recommendations[0].phenotype_id, ELEVATED_BLOOD_PRESSURE);
        assert_eq!(summary.immediate_actions.len(), 2);
    }

    #[test]
    fn test_explicit_indicators_drive_stage() {
        let traj = trajectory(SignalsSummary {
            postprandial_peak: Some(12.0),
            ..Default::default()
        });
        let indicators = StageIndicators {
            awareness: 70.0,
            motivation: 70.0,
            self_efficacy: 70.0,
            action_frequency: 6.0,
            days_maintained: 0.0,
        };
        let summary = planner().generate_plan("user-1", &traj, Some(&indicators));
        assert_eq!(summary.stage_assessment.current_stage, BehaviorStage::Preparation);
        let rec = &summary.recommendations[0];
        assert_eq!(rec.priority, Priority::ShortTerm);
        assert_eq!(rec.playbooks[0].id, "pb_postprandial_control");
        assert!(rec.contents.len() <= 3);
        assert!(!rec.resources.is_empty());
    }

    #[test]
    fn test_execution_plan_from_top_recommendation() {
        let traj = trajectory(SignalsSummary {
            postprandial_peak: Some(12.0),
            time_in_range: Some(55.0),
            ..Default::default()
        });
        let planner = planner();
        let summary = planner.generate_plan("user-1", &traj, None);
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let plan = planner
            .create_execution_plan(&summary, start, Utc::now())
            .unwrap();
        assert_eq!(plan.playbook_id, summary.recommendations[0].playbooks[0].id);
        assert_eq!(plan.start_date, start);
        assert_eq!(plan.user_id, "user-1");

        // Lower recommendations are not consulted when the top one has no playbook
        let mut summary = summary;
        let mut bare = summary.recommendations[0].clone();
        bare.playbooks.clear();
        summary.recommendations.insert(0, bare);
        assert!(matches!(
            planner.create_execution_plan(&summary, start, Utc::now()),
            Err(CoachError::PlanNotFound(_))
        ));
    }

    #[test]
    fn test_no_matches_yields_no_plan() {
        let traj = trajectory(SignalsSummary::default());
        let planner = planner();
        let summary = planner.generate_plan("user-1", &traj, None);
        assert!(summary.recommendations.is_empty());
        assert!(summary.cautions.is_empty());
        assert!(summary.overall_strategy.contains("暂未识别"));
        assert_eq!(summary.immediate_actions.len(), 2);
        assert!(matches!(
            planner.create_execution_plan(&summary, Utc::now().date_naive(), Utc::now()),
            Err(CoachError::PlanNotFound(_))
        ));
    }
}
