//! Behavior stage assessment (Transtheoretical Model)
//!
//! Five ordered stages, precontemplation through maintenance. A stage can be
//! reached from any other stage, including regressions.
//!
//! The assessment turns self-report and activity indicators into five
//! dimension scores, a weighted stage score, and a banded stage, then estimates
//! the chance of advancing and the risk of regressing.

use crate::types::BehaviorStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Weights of the stage score
const WEIGHT_AWARENESS: f64 = 0.15;
const WEIGHT_MOTIVATION: f64 = 0.20;
const WEIGHT_SELF_EFFICACY: f64 = 0.20;
const WEIGHT_ACTION_TAKING: f64 = 0.25;
const WEIGHT_MAINTENANCE: f64 = 0.20;

/// Days of maintained behavior that saturate the maintenance dimension
const MAINTENANCE_SATURATION_DAYS: f64 = 180.0;

/// Dimensions below this get a gap-filling suggestion
const GAP_THRESHOLD: f64 = 50.0;
const MAX_GAP_SUGGESTIONS: usize = 3;
const STAGE_STRATEGIES_IN_ACTIONS: usize = 2;

/// Raw inputs of a stage assessment
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageIndicators {
    /// Problem awareness (0-100)
    pub awareness: f64,
    /// Motivation to change (0-100)
    pub motivation: f64,
    /// Confidence in the ability to change (0-100)
    pub self_efficacy: f64,
    /// Count of concrete actions taken recently
    pub action_frequency: f64,
    /// Days the new behavior has been sustained
    pub days_maintained: f64,
}

impl StageIndicators {
    /// Clamp every input to its domain
    pub fn clamped(&self) -> Self {
        let pct = |v: f64| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };
        let count = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        Self {
            awareness: pct(self.awareness),
            motivation: pct(self.motivation),
            self_efficacy: pct(self.self_efficacy),
            action_frequency: count(self.action_frequency),
            days_maintained: count(self.days_maintained),
        }
    }
}

/// Per-dimension scores (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionScores {
    pub awareness: f64,
    pub motivation: f64,
    pub self_efficacy: f64,
    pub action_taking: f64,
    pub maintenance: f64,
}

impl DimensionScores {
    pub fn from_indicators(indicators: &StageIndicators) -> Self {
        let i = indicators.clamped();
        Self {
            awareness: i.awareness,
            motivation: i.motivation,
            self_efficacy: i.self_efficacy,
            action_taking: (i.action_frequency * 10.0).min(100.0),
            maintenance: (i.days_maintained / MAINTENANCE_SATURATION_DAYS * 100.0).min(100.0),
        }
    }

    pub fn stage_score(&self) -> f64 {
        WEIGHT_AWARENESS * self.awareness
            + WEIGHT_MOTIVATION * self.motivation
            + WEIGHT_SELF_EFFICACY * self.self_efficacy
            + WEIGHT_ACTION_TAKING * self.action_taking
            + WEIGHT_MAINTENANCE * self.maintenance
    }
}

/// Result of one assessment; recomputed on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAssessment {
    pub user_id: String,
    pub current_stage: BehaviorStage,
    /// Weighted score (0-100)
    pub stage_score: f64,
    pub dimension_scores: DimensionScores,
    /// Probability of advancing to the next stage (0-1)
    pub advancement_probability: f64,
    /// Risk of falling back to an earlier stage (0-1)
    pub regression_risk: f64,
    pub recommended_actions: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

/// Static description of a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProfile {
    pub stage: BehaviorStage,
    pub name: &'static str,
    pub description: &'static str,
    pub characteristics: &'static [&'static str],
    /// Coaching strategies, most important first
    pub strategies: &'static [&'static str],
    pub typical_duration: &'static str,
    /// "Current focus" label for conversations
    pub focus: &'static str,
    pub topics: &'static [&'static str],
}

static STAGE_PROFILES: [StageProfile; 5] = [
    StageProfile {
        stage: BehaviorStage::Precontemplation,
        name: "前意向期",
        description: "尚未意识到需要改变，或对改变缺乏兴趣",
        characteristics: &["回避谈论健康问题", "低估风险", "对改变缺乏信心"],
        strategies: &["提供个性化的健康数据反馈", "引发对现状的思考", "建立信任关系"],
        typical_duration: "不定",
        focus: "提升认知",
        topics: &["健康数据解读", "血糖与生活方式"],
    },
    StageProfile {
        stage: BehaviorStage::Contemplation,
        name: "意向期",
        description: "意识到问题并考虑改变，但仍在犹豫",
        characteristics: &["权衡改变的利弊", "知道需要改变但尚未行动", "容易拖延"],
        strategies: &["讨论改变的好处与障碍", "强化改变动机", "设定小而具体的目标"],
        typical_duration: "约6个月",
        focus: "增强动机",
        topics: &["改变的好处", "克服障碍"],
    },
    StageProfile {
        stage: BehaviorStage::Preparation,
        name: "准备期",
        description: "计划在近期采取行动，已经开始小的尝试",
        characteristics: &["制定了初步计划", "开始小范围尝试", "寻求支持和资源"],
        strategies: &["制定具体可行的行动计划", "识别并准备应对障碍", "寻找社会支持"],
        typical_duration: "约1个月",
        focus: "制定计划",
        topics: &["行动计划", "目标设定"],
    },
    StageProfile {
        stage: BehaviorStage::Action,
        name: "行动期",
        description: "正在积极改变行为，需要持续的支持",
        characteristics: &["行为发生明显改变", "投入较多时间和精力", "面临较高的复发风险"],
        strategies: &["及时肯定进步", "强化自我监测", "预防和应对复发"],
        typical_duration: "约6个月",
        focus: "坚持行动",
        topics: &["进展回顾", "应对挑战"],
    },
    StageProfile {
        stage: BehaviorStage::Maintenance,
        name: "维持期",
        description: "新行为已经持续六个月以上，重点是巩固和防止复发",
        characteristics: &["行为趋于稳定", "自信心增强", "复发诱惑减少"],
        strategies: &["巩固习惯并融入日常", "设定新的长期目标", "识别高风险情境"],
        typical_duration: "长期",
        focus: "巩固习惯",
        topics: &["长期目标", "预防复发"],
    },
];

/// Static profile of a stage
pub fn stage_profile(stage: BehaviorStage) -> &'static StageProfile {
    // STAGE_PROFILES is laid out in BehaviorStage order
    &STAGE_PROFILES[stage as usize]
}

pub fn stage_profiles() -> &'static [StageProfile] {
    &STAGE_PROFILES
}

/// Band a stage score; lower bounds are inclusive
pub fn stage_for_score(score: f64) -> BehaviorStage {
    if score < 20.0 {
        BehaviorStage::Precontemplation
    } else if score < 40.0 {
        BehaviorStage::Contemplation
    } else if score < 60.0 {
        BehaviorStage::Preparation
    } else if score < 80.0 {
        BehaviorStage::Action
    } else {
        BehaviorStage::Maintenance
    }
}

/// Probability of advancing, from the dimensions that matter at this stage
pub fn advancement_probability(stage: BehaviorStage, d: &DimensionScores) -> f64 {
    let weighted = match stage {
        BehaviorStage::Precontemplation => 0.5 * d.awareness + 0.5 * d.motivation,
        BehaviorStage::Contemplation => {
            0.4 * d.motivation + 0.3 * d.awareness + 0.3 * d.self_efficacy
        }
        BehaviorStage::Preparation => {
            0.4 * d.self_efficacy + 0.4 * d.action_taking + 0.2 * d.motivation
        }
        BehaviorStage::Action => {
            0.4 * d.action_taking + 0.4 * d.maintenance + 0.2 * d.self_efficacy
        }
        BehaviorStage::Maintenance => 0.6 * d.maintenance + 0.4 * d.self_efficacy,
    };
    (weighted / 100.0).clamp(0.0, 1.0)
}

/// Risk of regressing from the current stage
pub fn regression_risk(stage: BehaviorStage, d: &DimensionScores) -> f64 {
    let mut penalty: f64 = 0.0;
    if d.motivation < 40.0 {
        penalty += 25.0;
    }
    if d.self_efficacy < 40.0 {
        penalty += 25.0;
    }
    if d.action_taking < 30.0 {
        penalty += 20.0;
    }
    if d.maintenance < 30.0 {
        penalty += 15.0;
    }

    let multiplier = match stage {
        BehaviorStage::Precontemplation => 0.0,
        BehaviorStage::Contemplation => 0.6,
        BehaviorStage::Preparation => 0.9,
        BehaviorStage::Action => 1.2,
        BehaviorStage::Maintenance => 0.6,
    };
    (penalty * multiplier / 100.0).min(1.0)
}

fn gap_suggestions(d: &DimensionScores) -> Vec<String> {
    let gaps = [
        (d.awareness, "通过数据回顾加深对自身健康状况的了解"),
        (d.motivation, "明确改变对自己最重要的理由"),
        (d.self_efficacy, "从容易完成的小目标开始积累成功经验"),
        (d.action_taking, "每周安排固定的行动时间"),
        (d.maintenance, "记录每日完成情况，形成连续打卡"),
    ];
    gaps.into_iter()
        .filter(|(score, _)| *score < GAP_THRESHOLD)
        .take(MAX_GAP_SUGGESTIONS)
        .map(|(_, suggestion)| suggestion.to_string())
        .collect()
}

/// Stateless stage assessor
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorStageAssessor;

impl BehaviorStageAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess_stage(&self, user_id: &str, indicators: &StageIndicators) -> StageAssessment {
        let dimension_scores = DimensionScores::from_indicators(indicators);
        let stage_score = dimension_scores.stage_score();
        let current_stage = stage_for_score(stage_score);

        let mut recommended_actions: Vec<String> = stage_profile(current_stage)
            .strategies
            .iter()
            .take(STAGE_STRATEGIES_IN_ACTIONS)
            .map(|s| s.to_string())
            .collect();
        recommended_actions.extend(gap_suggestions(&dimension_scores));

        let assessment = StageAssessment {
            user_id: user_id.to_string(),
            current_stage,
            stage_score,
            advancement_probability: advancement_probability(current_stage, &dimension_scores),
            regression_risk: regression_risk(current_stage, &dimension_scores),
            dimension_scores,
            recommended_actions,
            assessed_at: Utc::now(),
        };

        debug!(
            user_id = %user_id,
            stage = %assessment.current_stage,
            score = assessment.stage_score,
            "Assessed behavior stage"
        );

        assessment
    }
}
