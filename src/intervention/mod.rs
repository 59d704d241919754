//! Intervention planning module
//!
//! Turns a trajectory, its phenotype matches and a stage assessment into
//! prioritized recommendations, and unrolls a playbook into a calendar of
//! daily tasks.
//!
//! - `playbook`: static lever/playbook catalog and plan commands
//! - `catalog`: read-only content and commercial resource catalogs
//! - `planner`: recommendation and execution-plan generation

pub mod catalog;
pub mod playbook;
pub mod planner;

pub use catalog::{ContentCatalog, ResourceCatalog, StaticContentCatalog, StaticResourceCatalog};
pub use playbook::PlaybookCatalog;
pub use planner::InterventionPlanner;

use crate::stage::StageAssessment;
use crate::types::{BehaviorStage, RiskLevel};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How often a lever produces a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Once,
}

impl Frequency {
    /// Whether a task is scheduled `day_offset` days after plan start
    pub fn occurs_on(&self, day_offset: u32) -> bool {
        match self {
            Frequency::Daily => true,
            Frequency::Weekly => day_offset % 7 == 0,
            Frequency::Biweekly => day_offset % 14 == 0,
            Frequency::Monthly => day_offset % 30 == 0,
            Frequency::Once => day_offset == 0,
        }
    }
}

/// Single intervention action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lever {
    pub id: &'static str,
    pub name: &'static str,
    /// nutrition, activity, monitoring, sleep, stress, education
    pub category: &'static str,
    pub description: &'static str,
    pub duration_days: u32,
    pub frequency: Frequency,
}

/// Ordered set of levers targeting phenotypes at given stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playbook {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub target_phenotypes: &'static [&'static str],
    pub target_stages: &'static [BehaviorStage],
    /// Lever ids, in order
    pub levers: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Abandoned,
}

/// Calendar-dated task unrolled from a lever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTask {
    pub task_id: String,
    pub lever_id: String,
    pub title: String,
    pub description: String,
    pub scheduled_date: NaiveDate,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanProgress {
    pub completed_tasks: usize,
    pub skipped_tasks: usize,
    pub total_tasks: usize,
    /// completed / total
    pub adherence_rate: f64,
}

impl PlanProgress {
    pub fn from_tasks(tasks: &[DailyTask]) -> Self {
        let completed_tasks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let skipped_tasks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Skipped)
            .count();
        let total_tasks = tasks.len();
        let adherence_rate = if total_tasks == 0 {
            0.0
        } else {
            completed_tasks as f64 / total_tasks as f64
        };
        Self {
            completed_tasks,
            skipped_tasks,
            total_tasks,
            adherence_rate,
        }
    }

    /// Every task has been completed or skipped
    pub fn is_finished(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks + self.skipped_tasks == self.total_tasks
    }
}

/// Per-user instance of a playbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPlan {
    pub plan_id: String,
    pub user_id: String,
    pub playbook_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Ordered by scheduled date, then lever order
    pub tasks: Vec<DailyTask>,
    pub progress: PlanProgress,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

/// Urgency class of a recommendation, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    ShortTerm,
    LongTerm,
}

impl Priority {
    pub fn for_match(risk_level: RiskLevel, match_score: f64) -> Self {
        match risk_level {
            RiskLevel::High | RiskLevel::Critical => Priority::Immediate,
            RiskLevel::Medium => Priority::ShortTerm,
            RiskLevel::Low if match_score > 0.8 => Priority::ShortTerm,
            RiskLevel::Low => Priority::LongTerm,
        }
    }
}

/// Educational content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    pub title: String,
    /// article, video, audio, course
    pub content_type: String,
    pub stages: Vec<BehaviorStage>,
    pub phenotype_ids: Vec<String>,
}

/// Commercial resource (product or service)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommercialResource {
    pub resource_id: String,
    pub name: String,
    /// device, food, service, program
    pub resource_type: String,
    pub description: String,
    pub phenotype_ids: Vec<String>,
}

/// Recommendation for one matched phenotype
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub phenotype_id: &'static str,
    pub phenotype_name: &'static str,
    pub match_score: f64,
    pub risk_level: RiskLevel,
    pub priority: Priority,
    pub playbooks: Vec<&'static Playbook>,
    pub contents: Vec<ContentItem>,
    pub resources: Vec<CommercialResource>,
}

/// Output of intervention generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionPlanSummary {
    pub user_id: String,
    pub stage_assessment: StageAssessment,
    /// Ordered by priority class; ties keep match order
    pub recommendations: Vec<Recommendation>,
    pub overall_strategy: String,
    pub immediate_actions: Vec<String>,
    pub cautions: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_schedule() {
        let days = |f: Frequency| (0..30).filter(|d| f.occurs_on(*d)).collect::<Vec<u32>>();
        assert_eq!(days(Frequency::Daily).len(), 30);
        assert_eq!(days(Frequency::Weekly), vec![0, 7, 14, 21, 28]);
        assert_eq!(days(Frequency::Biweekly), vec![0, 14, 28]);
        assert_eq!(days(Frequency::Monthly), vec![0]);
        assert_eq!(days(Frequency::Once), vec![0]);
    }

    #[test]
    fn test_priority_classes() {
        assert_eq!(Priority::for_match(RiskLevel::Critical, 0.6), Priority::Immediate);
        assert_eq!(Priority::for_match(RiskLevel::High, 0.6), Priority::Immediate);
        assert_eq!(Priority::for_match(RiskLevel::Medium, 0.6), Priority::ShortTerm);
        assert_eq!(Priority::for_match(RiskLevel::Low, 0.9), Priority::ShortTerm);
        assert_eq!(Priority::for_match(RiskLevel::Low, 0.8), Priority::LongTerm);
        assert!(Priority::Immediate < Priority::LongTerm);
    }

    #[test]
    fn test_progress_adherence() {
        let task = |status| DailyTask {
            task_id: "t".to_string(),
            lever_id: "l".to_string(),
            title: String::new(),
            description: String::new(),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            status,
            completed_at: None,
            skip_reason: None,
        };
        let tasks = vec![
            task(TaskStatus::Completed),
            task(TaskStatus::Skipped),
            task(TaskStatus::Pending),
            task(TaskStatus::Completed),
        ];
        let progress = PlanProgress::from_tasks(&tasks);
        assert_eq!(progress.completed_tasks, 2);
        assert_eq!(progress.adherence_rate, 0.5);
        assert!(!progress.is_finished());
        assert_eq!(PlanProgress::from_tasks(&[]).adherence_rate, 0.0);
    }
}
