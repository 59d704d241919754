//! Lever and playbook catalog
//!
//! The catalog is static. Plan commands operate on a plan the caller owns
//! (the user's session), so the catalog itself holds no mutable state.

use super::{
    DailyTask, Frequency, InterventionPlan, Lever, PlanProgress, PlanStatus, Playbook, TaskStatus,
};
use crate::error::{CoachError, Result};
use crate::phenotype::catalog::*;
use crate::phenotype::{phenotype, phenotypes};
use crate::types::BehaviorStage;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use BehaviorStage::{Action, Contemplation, Maintenance, Precontemplation, Preparation};

static LEVERS: [Lever; 19] = [
    Lever {
        id: "health_education",
        name: "了解血糖知识",
        category: "education",
        description: "阅读一篇关于血糖与生活方式关系的科普内容",
        duration_days: 1,
        frequency: Frequency::Once,
    },
    Lever {
        id: "meal_sequence",
        name: "先菜后饭",
        category: "nutrition",
        description: "按蔬菜、蛋白质、主食的顺序进餐",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "post_meal_walk",
        name: "餐后散步",
        category: "activity",
        description: "餐后30分钟内步行10-15分钟",
        duration_days: 21,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "carb_portion",
        name: "控制主食份量",
        category: "nutrition",
        description: "每餐主食控制在一拳大小",
        duration_days: 28,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "early_dinner",
        name: "提前晚餐",
        category: "nutrition",
        description: "晚餐在19点前完成，睡前3小时不再进食",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "bedtime_glucose_check",
        name: "睡前血糖检查",
        category: "monitoring",
        description: "睡前查看血糖读数并记录",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "evening_snack_adjust",
        name: "调整睡前加餐",
        category: "nutrition",
        description: "睡前血糖偏低时补充少量慢吸收碳水",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "regular_meals",
        name: "定时定量进餐",
        category: "nutrition",
        description: "三餐时间固定，每餐间隔4-6小时",
        duration_days: 21,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "glucose_monitoring",
        name: "血糖周回顾",
        category: "monitoring",
        description: "每周回顾一次血糖曲线和达标时间",
        duration_days: 28,
        frequency: Frequency::Weekly,
    },
    Lever {
        id: "active_breaks",
        name: "久坐打断",
        category: "activity",
        description: "每坐满1小时起身活动3分钟",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "daily_steps",
        name: "每日步数目标",
        category: "activity",
        description: "每日步行达到7000步",
        duration_days: 28,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "breathing_practice",
        name: "呼吸放松练习",
        category: "stress",
        description: "每天进行5分钟腹式呼吸",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "stress_journal",
        name: "压力日记",
        category: "stress",
        description: "每周记录压力来源和应对方式",
        duration_days: 28,
        frequency: Frequency::Weekly,
    },
    Lever {
        id: "sleep_schedule",
        name: "固定作息",
        category: "sleep",
        description: "每天同一时间上床和起床",
        duration_days: 21,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "screen_curfew",
        name: "睡前远离屏幕",
        category: "sleep",
        description: "睡前1小时停止使用手机和电脑",
        duration_days: 14,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "low_sodium_diet",
        name: "限盐饮食",
        category: "nutrition",
        description: "每日食盐摄入不超过5克",
        duration_days: 28,
        frequency: Frequency::Daily,
    },
    Lever {
        id: "bp_monitoring",
        name: "血压周监测",
        category: "monitoring",
        description: "每周固定时间测量并记录血压",
        duration_days: 28,
        frequency: Frequency::Weekly,
    },
    Lever {
        id: "progress_review",
        name: "阶段进展回顾",
        category: "education",
        description: "与教练一起回顾过去两周的变化",
        duration_days: 28,
        frequency: Frequency::Biweekly,
    },
    Lever {
        id: "habit_maintenance",
        name: "习惯巩固检查",
        category: "education",
        description: "每月检查已形成的健康习惯是否保持",
        duration_days: 90,
        frequency: Frequency::Monthly,
    },
];

static PLAYBOOKS: [Playbook; 10] = [
    Playbook {
        id: "pb_glucose_awareness",
        name: "血糖认知启动",
        description: "帮助尚未准备改变的用户理解自己的血糖数据",
        target_phenotypes: &[
            POSTPRANDIAL_HYPERGLYCEMIA,
            DAWN_PHENOMENON,
            GLYCEMIC_VOLATILITY,
            NOCTURNAL_HYPOGLYCEMIA,
        ],
        target_stages: &[Precontemplation, Contemplation],
        levers: &["health_education", "glucose_monitoring"],
    },
    Playbook {
        id: "pb_postprandial_control",
        name: "餐后血糖管理",
        description: "通过进餐顺序、份量和餐后活动降低餐后血糖峰值",
        target_phenotypes: &[POSTPRANDIAL_HYPERGLYCEMIA, GLYCEMIC_VOLATILITY],
        target_stages: &[Contemplation, Preparation, Action],
        levers: &["meal_sequence", "post_meal_walk", "carb_portion", "progress_review"],
    },
    Playbook {
        id: "pb_dawn_management",
        name: "空腹血糖改善",
        description: "调整晚餐时间与睡前监测以改善空腹血糖",
        target_phenotypes: &[DAWN_PHENOMENON],
        target_stages: &[Contemplation, Preparation, Action, Maintenance],
        levers: &["early_dinner", "bedtime_glucose_check"],
    },
    Playbook {
        id: "pb_hypoglycemia_safety",
        name: "夜间低血糖防护",
        description: "识别并预防夜间低血糖",
        target_phenotypes: &[NOCTURNAL_HYPOGLYCEMIA],
        target_stages: &[Precontemplation, Contemplation, Preparation, Action, Maintenance],
        levers: &["bedtime_glucose_check", "evening_snack_adjust", "glucose_monitoring"],
    },
    Playbook {
        id: "pb_glucose_stability",
        name: "血糖平稳计划",
        description: "通过规律进餐和定期回顾减少血糖波动",
        target_phenotypes: &[GLYCEMIC_VOLATILITY],
        target_stages: &[Preparation, Action, Maintenance],
        levers: &["regular_meals", "carb_portion", "glucose_monitoring"],
    },
    Playbook {
        id: "pb_active_living",
        name: "活力生活",
        description: "减少久坐并逐步提高日常活动量",
        target_phenotypes: &[SEDENTARY],
        target_stages: &[Contemplation, Preparation, Action, Maintenance],
        levers: &["active_breaks", "daily_steps"],
    },
    Playbook {
        id: "pb_stress_recovery",
        name: "压力恢复",
        description: "通过呼吸练习和压力记录改善自主神经平衡",
        target_phenotypes: &[STRESS_IMBALANCE, SLEEP_DEFICIT],
        target_stages: &[Contemplation, Preparation, Action, Maintenance],
        levers: &["breathing_practice", "stress_journal"],
    },
    Playbook {
        id: "pb_sleep_hygiene",
        name: "睡眠改善",
        description: "建立规律作息和睡前习惯",
        target_phenotypes: &[SLEEP_DEFICIT],
        target_stages: &[Preparation, Action, Maintenance],
        levers: &["sleep_schedule", "screen_curfew"],
    },
    Playbook {
        id: "pb_blood_pressure",
        name: "血压管理",
        description: "限盐、监测与活动相结合的血压管理",
        target_phenotypes: &[ELEVATED_BLOOD_PRESSURE],
        target_stages: &[Contemplation, Preparation, Action, Maintenance],
        levers: &["low_sodium_diet", "bp_monitoring", "daily_steps"],
    },
    Playbook {
        id: "pb_maintain_gains",
        name: "成果巩固",
        description: "巩固已取得的控制成果，预防复发",
        target_phenotypes: &[STABLE_CONTROL, POSTPRANDIAL_HYPERGLYCEMIA],
        target_stages: &[Action, Maintenance],
        levers: &["habit_maintenance", "glucose_monitoring", "progress_review"],
    },
];

/// Read-only lever and playbook catalog
#[derive(Debug, Clone, Copy)]
pub struct PlaybookCatalog {
    levers: &'static [Lever],
    playbooks: &'static [Playbook],
}

impl Default for PlaybookCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlaybookCatalog {
    pub fn builtin() -> Self {
        Self::new(&LEVERS, &PLAYBOOKS)
    }

    pub fn new(levers: &'static [Lever], playbooks: &'static [Playbook]) -> Self {
        Self { levers, playbooks }
    }

    pub fn levers(&self) -> &'static [Lever] {
        self.levers
    }

    pub fn playbooks(&self) -> &'static [Playbook] {
        self.playbooks
    }

    pub fn lever(&self, id: &str) -> Option<&'static Lever> {
        self.levers.iter().find(|l| l.id == id)
    }

    pub fn playbook(&self, id: &str) -> Option<&'static Playbook> {
        self.playbooks.iter().find(|p| p.id == id)
    }

    /// Check that every reference in the catalog resolves
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for lever in self.levers {
            if !seen.insert(lever.id) {
                problems.push(format!("duplicate lever {}", lever.id));
            }
            if lever.duration_days == 0 {
                problems.push(format!("lever {} has zero duration", lever.id));
            }
        }

        let mut seen = HashSet::new();
        for playbook in self.playbooks {
            if !seen.insert(playbook.id) {
                problems.push(format!("duplicate playbook {}", playbook.id));
            }
            if playbook.levers.is_empty() {
                problems.push(format!("playbook {} has no levers", playbook.id));
            }
            for lever_id in playbook.levers {
                if self.lever(lever_id).is_none() {
                    problems.push(format!(
                        "playbook {} references unknown lever {}",
                        playbook.id, lever_id
                    ));
                }
            }
            for phenotype_id in playbook.target_phenotypes {
                if phenotype(phenotype_id).is_none() {
                    problems.push(format!(
                        "playbook {} targets unknown phenotype {}",
                        playbook.id, phenotype_id
                    ));
                }
            }
        }

        for p in phenotypes() {
            for lever_id in p.recommended_levers {
                if self.lever(lever_id).is_none() {
                    problems.push(format!(
                        "phenotype {} recommends unknown lever {}",
                        p.id, lever_id
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoachError::CatalogError(problems.join("; ")))
        }
    }

    /// Playbooks targeting the phenotype at the given stage, in catalog order
    pub fn match_playbooks(
        &self,
        phenotype_id: &str,
        stage: BehaviorStage,
    ) -> Vec<&'static Playbook> {
        self.playbooks
            .iter()
            .filter(|p| {
                p.target_phenotypes.contains(&phenotype_id) && p.target_stages.contains(&stage)
            })
            .collect()
    }

    /// Unroll a playbook into a dated plan.
    ///
    /// Levers run concurrently from `start_date`; each contributes tasks on
    /// the days its frequency selects within its duration.
    pub fn create_plan(
        &self,
        playbook: &Playbook,
        user_id: &str,
        start_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<InterventionPlan> {
        let levers = playbook
            .levers
            .iter()
            .map(|id| {
                self.lever(id)
                    .ok_or_else(|| CoachError::CatalogError(format!("unknown lever {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;

        let longest = levers.iter().map(|l| l.duration_days).max().unwrap_or(1).max(1);
        let plan_id = format!("plan_{}", Uuid::new_v4());

        let mut scheduled: Vec<(u32, usize, &'static Lever)> = Vec::new();
        for (order, lever) in levers.iter().copied().enumerate() {
            for day in 0..lever.duration_days {
                if lever.frequency.occurs_on(day) {
                    scheduled.push((day, order, lever));
                }
            }
        }
        scheduled.sort_by_key(|(day, order, _)| (*day, *order));

        let tasks: Vec<DailyTask> = scheduled
            .into_iter()
            .enumerate()
            .map(|(index, (day, _, lever))| DailyTask {
                task_id: format!("{}_t{}", plan_id, index),
                lever_id: lever.id.to_string(),
                title: lever.name.to_string(),
                description: lever.description.to_string(),
                scheduled_date: start_date + Duration::days(i64::from(day)),
                status: TaskStatus::Pending,
                completed_at: None,
                skip_reason: None,
            })
            .collect();

        let plan = InterventionPlan {
            plan_id,
            user_id: user_id.to_string(),
            playbook_id: playbook.id.to_string(),
            name: playbook.name.to_string(),
            start_date,
            end_date: start_date + Duration::days(i64::from(longest) - 1),
            progress: PlanProgress::from_tasks(&tasks),
            tasks,
            status: PlanStatus::Active,
            created_at: now,
        };

        info!(
            user_id = %user_id,
            plan_id = %plan.plan_id,
            playbook = playbook.id,
            tasks = plan.tasks.len(),
            "Created intervention plan"
        );

        Ok(plan)
    }

    /// Mark a task completed and recompute progress
    pub fn complete_task(
        &self,
        plan: &mut InterventionPlan,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PlanProgress> {
        update_task(plan, task_id, |task| {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            task.skip_reason = None;
        })
    }

    /// Mark a task skipped and recompute progress
    pub fn skip_task(
        &self,
        plan: &mut InterventionPlan,
        task_id: &str,
        reason: Option<&str>,
    ) -> Result<PlanProgress> {
        update_task(plan, task_id, |task| {
            task.status = TaskStatus::Skipped;
            task.completed_at = None;
            task.skip_reason = reason.map(str::to_string);
        })
    }

    /// Tasks scheduled on `date`
    pub fn today_tasks<'a>(
        &self,
        plan: &'a InterventionPlan,
        date: NaiveDate,
    ) -> Vec<&'a DailyTask> {
        plan.tasks.iter().filter(|t| t.scheduled_date == date).collect()
    }
}

fn update_task(
    plan: &mut InterventionPlan,
    task_id: &str,
    apply: impl FnOnce(&mut DailyTask),
) -> Result<PlanProgress> {
    if matches!(plan.status, PlanStatus::Paused | PlanStatus::Abandoned) {
        return Err(CoachError::InvalidValue(format!(
            "plan {} is not active",
            plan.plan_id
        )));
    }

    let task = plan
        .tasks
        .iter_mut()
        .find(|t| t.task_id == task_id)
        .ok_or_else(|| CoachError::TaskNotFound(task_id.to_string()))?;
    apply(task);

    plan.progress = PlanProgress::from_tasks(&plan.tasks);
    if plan.progress.is_finished() {
        plan.status = PlanStatus::Completed;
    }

    debug!(
        plan_id = %plan.plan_id,
        task_id = %task_id,
        adherence = plan.progress.adherence_rate,
        "Updated plan task"
    );

    Ok(plan.progress)
}
