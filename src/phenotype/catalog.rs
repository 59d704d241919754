//! Static phenotype library

use super::{PhenotypeMapping, SummaryMetric, Threshold};
use crate::types::RiskLevel;

pub const POSTPRANDIAL_HYPERGLYCEMIA: &str = "postprandial_hyperglycemia";
pub const DAWN_PHENOMENON: &str = "dawn_phenomenon";
pub const GLYCEMIC_VOLATILITY: &str = "glycemic_volatility";
pub const NOCTURNAL_HYPOGLYCEMIA: &str = "nocturnal_hypoglycemia";
pub const SEDENTARY: &str = "sedentary";
pub const STRESS_IMBALANCE: &str = "stress_imbalance";
pub const SLEEP_DEFICIT: &str = "sleep_deficit";
pub const ELEVATED_BLOOD_PRESSURE: &str = "elevated_blood_pressure";
pub const STABLE_CONTROL: &str = "stable_control";

pub static PHENOTYPES: [PhenotypeMapping; 9] = [
    PhenotypeMapping {
        id: POSTPRANDIAL_HYPERGLYCEMIA,
        name: "餐后高血糖型",
        category: "glucose",
        description: "餐后两小时内血糖峰值偏高，多与进餐结构和餐后活动不足有关",
        thresholds: &[Threshold::at_least(SummaryMetric::PostprandialPeak, 10.0)],
        recommended_levers: &["meal_sequence", "post_meal_walk", "carb_portion"],
        topics: &["进餐顺序", "餐后散步"],
        risk_level: RiskLevel::Medium,
        confidence_score: 0.85,
    },
    PhenotypeMapping {
        id: DAWN_PHENOMENON,
        name: "黎明现象型",
        category: "glucose",
        description: "空腹血糖持续偏高，常见于晚餐过晚或夜间激素波动",
        thresholds: &[Threshold::at_least(SummaryMetric::FastingGlucose, 7.0)],
        recommended_levers: &["early_dinner", "bedtime_glucose_check"],
        topics: &["晚餐时间", "空腹血糖"],
        risk_level: RiskLevel::Medium,
        confidence_score: 0.8,
    },
    PhenotypeMapping {
        id: GLYCEMIC_VOLATILITY,
        name: "血糖波动型",
        category: "glucose",
        description: "血糖变异系数高且达标时间不足，饮食和作息规律性较差",
        thresholds: &[
            Threshold::at_least(SummaryMetric::VariabilityCv, 36.0),
            Threshold::at_most(SummaryMetric::TimeInRange, 70.0),
        ],
        recommended_levers: &["regular_meals", "glucose_monitoring", "carb_portion"],
        topics: &["规律进餐", "血糖监测"],
        risk_level: RiskLevel::High,
        confidence_score: 0.85,
    },
    PhenotypeMapping {
        id: NOCTURNAL_HYPOGLYCEMIA,
        name: "夜间低血糖型",
        category: "glucose",
        description: "夜间出现低血糖且低于目标范围时间偏多，需要优先处理",
        thresholds: &[
            Threshold::at_least(SummaryMetric::NightHypoglycemiaCount, 1.0),
            Threshold::at_least(SummaryMetric::TimeBelowRange, 4.0),
        ],
        recommended_levers: &["evening_snack_adjust", "bedtime_glucose_check"],
        topics: &["低血糖预防", "睡前加餐"],
        risk_level: RiskLevel::Critical,
        confidence_score: 0.9,
    },
    PhenotypeMapping {
        id: SEDENTARY,
        name: "久坐少动型",
        category: "activity",
        description: "日均步数偏低，久坐时间长",
        thresholds: &[Threshold::at_most(SummaryMetric::StepsMean, 5000.0)],
        recommended_levers: &["active_breaks", "daily_steps"],
        topics: &["日常活动", "久坐提醒"],
        risk_level: RiskLevel::Medium,
        confidence_score: 0.8,
    },
    PhenotypeMapping {
        id: STRESS_IMBALANCE,
        name: "压力失衡型",
        category: "stress",
        description: "心率变异性偏低，自主神经恢复不足",
        thresholds: &[Threshold::at_most(SummaryMetric::HrvMean, 30.0)],
        recommended_levers: &["breathing_practice", "stress_journal"],
        topics: &["压力管理", "呼吸练习"],
        risk_level: RiskLevel::Medium,
        confidence_score: 0.75,
    },
    PhenotypeMapping {
        id: SLEEP_DEFICIT,
        name: "睡眠不足型",
        category: "sleep",
        description: "睡眠时长不足且深睡比例偏低",
        thresholds: &[
            Threshold::at_most(SummaryMetric::SleepDuration, 6.0),
            Threshold::at_most(SummaryMetric::DeepSleepRatio, 0.15),
        ],
        recommended_levers: &["sleep_schedule", "screen_curfew"],
        topics: &["睡眠习惯", "睡前准备"],
        risk_level: RiskLevel::Medium,
        confidence_score: 0.75,
    },
    PhenotypeMapping {
        id: ELEVATED_BLOOD_PRESSURE,
        name: "血压偏高型",
        category: "cardiovascular",
        description: "收缩压与舒张压均值均高于目标",
        thresholds: &[
            Threshold::at_least(SummaryMetric::SystolicBp, 140.0),
            Threshold::at_least(SummaryMetric::DiastolicBp, 90.0),
        ],
        recommended_levers: &["low_sodium_diet", "bp_monitoring", "daily_steps"],
        topics: &["限盐饮食", "血压监测"],
        risk_level: RiskLevel::High,
        confidence_score: 0.85,
    },
    PhenotypeMapping {
        id: STABLE_CONTROL,
        name: "稳定控制型",
        category: "glucose",
        description: "血糖达标时间充足且波动小，处于良好控制状态",
        thresholds: &[
            Threshold::at_least(SummaryMetric::TimeInRange, 70.0),
            Threshold::at_most(SummaryMetric::VariabilityCv, 36.0),
        ],
        recommended_levers: &["habit_maintenance", "glucose_monitoring"],
        topics: &["保持成果", "长期目标"],
        risk_level: RiskLevel::Low,
        confidence_score: 0.9,
    },
];

/// Look up a phenotype by id
pub fn phenotype(id: &str) -> Option<&'static PhenotypeMapping> {
    PHENOTYPES.iter().find(|p| p.id == id)
}

/// Every phenotype in library order
pub fn phenotypes() -> &'static [PhenotypeMapping] {
    &PHENOTYPES
}
