//! Read-only content and commercial resource catalogs
//!
//! The planner consults these through traits so deployments can back them
//! with their own stores; the static implementations ship a small built-in set.

use super::{CommercialResource, ContentItem};
use crate::error::{CoachError, Result};
use crate::phenotype::catalog::*;
use crate::phenotype::phenotype;
use crate::types::BehaviorStage;
use std::collections::HashSet;

use BehaviorStage::{Action, Contemplation, Maintenance, Precontemplation, Preparation};

/// Educational content lookup
pub trait ContentCatalog: Send + Sync {
    /// Items for the stage, preferring those tagged with one of the phenotypes
    fn recommend_contents(
        &self,
        stage: BehaviorStage,
        phenotype_ids: &[&str],
        limit: usize,
    ) -> Vec<ContentItem>;

    fn content(&self, content_id: &str) -> Option<ContentItem>;

    fn len(&self) -> usize;

    /// Check catalog integrity
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Commercial resource lookup
pub trait ResourceCatalog: Send + Sync {
    /// Resources tagged with any of the phenotypes, in catalog order
    fn recommend_by_phenotypes(&self, phenotype_ids: &[&str], limit: usize)
        -> Vec<CommercialResource>;

    fn resource(&self, resource_id: &str) -> Option<CommercialResource>;

    fn len(&self) -> usize;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type ContentRow = (
    &'static str,
    &'static str,
    &'static str,
    &'static [BehaviorStage],
    &'static [&'static str],
);

const CONTENT_ROWS: &[ContentRow] = &[
    (
        "c_glucose_basics",
        "读懂你的血糖曲线",
        "article",
        &[Precontemplation, Contemplation],
        &[POSTPRANDIAL_HYPERGLYCEMIA, GLYCEMIC_VOLATILITY, DAWN_PHENOMENON],
    ),
    (
        "c_meal_order",
        "进餐顺序如何影响餐后血糖",
        "video",
        &[Contemplation, Preparation, Action],
        &[POSTPRANDIAL_HYPERGLYCEMIA],
    ),
    (
        "c_post_meal_walk",
        "餐后十分钟步行指南",
        "article",
        &[Preparation, Action],
        &[POSTPRANDIAL_HYPERGLYCEMIA, SEDENTARY],
    ),
    (
        "c_dawn_phenomenon",
        "为什么早上血糖会偏高",
        "article",
        &[Precontemplation, Contemplation, Preparation],
        &[DAWN_PHENOMENON],
    ),
    (
        "c_hypo_safety",
        "夜间低血糖的识别与应对",
        "course",
        &[Precontemplation, Contemplation, Preparation, Action, Maintenance],
        &[NOCTURNAL_HYPOGLYCEMIA],
    ),
    (
        "c_move_more",
        "办公室里的微运动",
        "video",
        &[Contemplation, Preparation, Action],
        &[SEDENTARY],
    ),
    (
        "c_breathing",
        "五分钟呼吸放松",
        "audio",
        &[Preparation, Action, Maintenance],
        &[STRESS_IMBALANCE],
    ),
    (
        "c_sleep_hygiene",
        "睡个好觉的七个习惯",
        "article",
        &[Contemplation, Preparation, Action],
        &[SLEEP_DEFICIT],
    ),
    (
        "c_low_salt",
        "低盐饮食实用技巧",
        "article",
        &[Contemplation, Preparation, Action, Maintenance],
        &[ELEVATED_BLOOD_PRESSURE],
    ),
    (
        "c_relapse_prevention",
        "如何防止好习惯半途而废",
        "course",
        &[Action, Maintenance],
        &[STABLE_CONTROL],
    ),
    (
        "c_change_benefits",
        "改变带来的好处",
        "article",
        &[Precontemplation, Contemplation],
        &[],
    ),
];

type ResourceRow = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static [&'static str],
);

const RESOURCE_ROWS: &[ResourceRow] = &[
    (
        "r_cgm_sensor",
        "动态血糖监测套装",
        "device",
        "14天连续血糖监测",
        &[POSTPRANDIAL_HYPERGLYCEMIA, GLYCEMIC_VOLATILITY, NOCTURNAL_HYPOGLYCEMIA, DAWN_PHENOMENON],
    ),
    (
        "r_low_gi_meals",
        "低升糖指数餐包",
        "food",
        "营养师搭配的低GI午餐",
        &[POSTPRANDIAL_HYPERGLYCEMIA, GLYCEMIC_VOLATILITY],
    ),
    (
        "r_night_snack",
        "睡前缓释加餐",
        "food",
        "慢吸收碳水小食",
        &[NOCTURNAL_HYPOGLYCEMIA],
    ),
    (
        "r_walking_program",
        "21天步行训练营",
        "program",
        "线上打卡步行课程",
        &[SEDENTARY, POSTPRANDIAL_HYPERGLYCEMIA],
    ),
    (
        "r_bp_monitor",
        "家用电子血压计",
        "device",
        "上臂式自动血压计",
        &[ELEVATED_BLOOD_PRESSURE],
    ),
    (
        "r_sleep_coaching",
        "睡眠改善咨询",
        "service",
        "一对一睡眠教练",
        &[SLEEP_DEFICIT, STRESS_IMBALANCE],
    ),
    (
        "r_mindfulness",
        "正念减压课程",
        "program",
        "八周正念练习",
        &[STRESS_IMBALANCE],
    ),
    (
        "r_annual_review",
        "年度代谢评估",
        "service",
        "全面代谢指标复查",
        &[STABLE_CONTROL],
    ),
];

fn to_strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn check_phenotype_tags(owner: &str, tags: &[String], problems: &mut Vec<String>) {
    for tag in tags {
        if phenotype(tag).is_none() {
            problems.push(format!("{} tagged with unknown phenotype {}", owner, tag));
        }
    }
}

/// Built-in content catalog
#[derive(Debug, Clone)]
pub struct StaticContentCatalog {
    items: Vec<ContentItem>,
}

impl Default for StaticContentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContentCatalog {
    pub fn new() -> Self {
        let items = CONTENT_ROWS
            .iter()
            .map(|(id, title, kind, stages, phenotypes)| ContentItem {
                content_id: id.to_string(),
                title: title.to_string(),
                content_type: kind.to_string(),
                stages: stages.to_vec(),
                phenotype_ids: to_strings(phenotypes),
            })
            .collect();
        Self { items }
    }

    pub fn from_items(items: Vec<ContentItem>) -> Self {
        Self { items }
    }
}

impl ContentCatalog for StaticContentCatalog {
    fn recommend_contents(
        &self,
        stage: BehaviorStage,
        phenotype_ids: &[&str],
        limit: usize,
    ) -> Vec<ContentItem> {
        let for_stage = || self.items.iter().filter(|c| c.stages.contains(&stage));
        let tagged = |c: &&ContentItem| {
            c.phenotype_ids
                .iter()
                .any(|id| phenotype_ids.contains(&id.as_str()))
        };

        // Phenotype-tagged items first, then general items for the stage
        for_stage()
            .filter(tagged)
            .chain(for_stage().filter(|c| c.phenotype_ids.is_empty()))
            .take(limit)
            .cloned()
            .collect()
    }

    fn content(&self, content_id: &str) -> Option<ContentItem> {
        self.items.iter().find(|c| c.content_id == content_id).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.content_id.as_str()) {
                problems.push(format!("duplicate content {}", item.content_id));
            }
            check_phenotype_tags(&item.content_id, &item.phenotype_ids, &mut problems);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoachError::CatalogError(problems.join("; ")))
        }
    }
}

/// Built-in commercial resource catalog
#[derive(Debug, Clone)]
pub struct StaticResourceCatalog {
    resources: Vec<CommercialResource>,
}

impl Default for StaticResourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticResourceCatalog {
    pub fn new() -> Self {
        let resources = RESOURCE_ROWS
            .iter()
            .map(|(id, name, kind, description, phenotypes)| CommercialResource {
                resource_id: id.to_string(),
                name: name.to_string(),
                resource_type: kind.to_string(),
                description: description.to_string(),
                phenotype_ids: to_strings(phenotypes),
            })
            .collect();
        Self { resources }
    }

    pub fn from_resources(resources: Vec<CommercialResource>) -> Self {
        Self { resources }
    }
}

impl ResourceCatalog for StaticResourceCatalog {
    fn recommend_by_phenotypes(
        &self,
        phenotype_ids: &[&str],
        limit: usize,
    ) -> Vec<CommercialResource> {
        self.resources
            .iter()
            .filter(|r| {
                r.phenotype_ids
                    .iter()
                    .any(|id| phenotype_ids.contains(&id.as_str()))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn resource(&self, resource_id: &str) -> Option<CommercialResource> {
        self.resources
            .iter()
            .find(|r| r.resource_id == resource_id)
            .cloned()
    }

    fn len(&self) -> usize {
        self.resources.len()
    }

    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.resource_id.as_str()) {
                problems.push(format!("duplicate resource {}", resource.resource_id));
            }
            check_phenotype_tags(&resource.resource_id, &resource.phenotype_ids, &mut problems);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoachError::CatalogError(problems.join("; ")))
        }
    }
}
