//! Synheart Coach - Behavior-change coaching engine for metabolic health
//!
//! Coach turns raw readings from consumer health devices into personalized
//! intervention plans through a deterministic pipeline: signal normalization →
//! trajectory aggregation → phenotype matching → behavior stage assessment →
//! intervention planning.
//!
//! ## Modules
//!
//! - **Signals**: Normalize CGM, blood pressure, HRV, scale and watch readings
//! - **Trajectory**: Windowed summaries, risk flags and behavior events per user
//! - **Phenotypes**: Rule-based metabolic phenotype matching
//! - **Stages**: Transtheoretical-model stage assessment
//! - **Interventions**: Playbooks, recommendations and executable daily plans
//! - **Orchestrator**: Session-scoped API tying the pipeline together

pub mod config;
pub mod error;
pub mod intervention;
pub mod logging;
pub mod normalizer;
pub mod orchestrator;
pub mod phenotype;
pub mod session;
pub mod stage;
pub mod stats;
pub mod trajectory;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::CoachConfig;
pub use error::{CoachError, Result};
pub use normalizer::SignalNormalizer;
pub use orchestrator::{
    ConversationContext, Dashboard, FeedbackOutcome, Orchestrator, ProcessSignalsResult,
};
pub use session::{FeedbackKind, InMemorySessionStore, SessionStore, UserSession};
pub use stage::{BehaviorStageAssessor, StageAssessment, StageIndicators};
pub use trajectory::TrajectoryAggregator;

// Pipeline stage exports
pub use intervention::{
    InterventionPlan, InterventionPlanSummary, InterventionPlanner, PlaybookCatalog,
};
pub use phenotype::{PhenotypeMatchResult, PhenotypeMatcher, ScoringStrategy};

/// Coach version reported by the CLI and FFI
pub const COACH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on exported reports
pub const PRODUCER_NAME: &str = "synheart-coach";
