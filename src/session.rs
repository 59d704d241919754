//! Per-user session state and storage
//!
//! A session holds everything the pipeline knows about one user: the signal
//! buffer, the latest trajectory and phenotype matches, the stage assessment,
//! the active plan and the tracked behavior locks.
//!
//! Stores run every mutation of one user's session under exclusive access to
//! that session, so concurrent calls for the same user are serialized while
//! different users proceed independently.

use crate::intervention::{Frequency, InterventionPlan};
use crate::phenotype::PhenotypeMatchResult;
use crate::stage::{StageAssessment, StageIndicators};
use crate::types::{SignalRecord, TrajectoryRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Streak length (days) at which a habit counts as stable
const STABLE_STREAK_DAYS: u32 = 21;

/// Streak length (days) at which a habit counts as automatic
const AUTOMATIC_STREAK_DAYS: u32 = 66;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrength {
    #[default]
    Forming,
    Stable,
    Automatic,
}

impl LockStrength {
    pub fn from_streak(streak_days: u32) -> Self {
        if streak_days >= AUTOMATIC_STREAK_DAYS {
            LockStrength::Automatic
        } else if streak_days >= STABLE_STREAK_DAYS {
            LockStrength::Stable
        } else {
            LockStrength::Forming
        }
    }
}

/// Tracked recurring habit with a streak counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorLock {
    pub lock_id: String,
    pub habit: String,
    /// Cue that anchors the habit, e.g. "after lunch"
    pub trigger: String,
    pub frequency: Frequency,
    pub streak_days: u32,
    pub longest_streak: u32,
    pub strength: LockStrength,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BehaviorLock {
    pub fn new(habit: &str, trigger: &str, frequency: Frequency, now: DateTime<Utc>) -> Self {
        Self {
            lock_id: format!("lock_{}", Uuid::new_v4()),
            habit: habit.to_string(),
            trigger: trigger.to_string(),
            frequency,
            streak_days: 0,
            longest_streak: 0,
            strength: LockStrength::Forming,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn extend_streak(&mut self, now: DateTime<Utc>) {
        self.streak_days += 1;
        self.longest_streak = self.longest_streak.max(self.streak_days);
        self.strength = LockStrength::from_streak(self.streak_days);
        self.updated_at = now;
    }

    pub fn reset_streak(&mut self, now: DateTime<Utc>) {
        self.streak_days = 0;
        self.strength = LockStrength::Forming;
        self.updated_at = now;
    }
}

/// User feedback routed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackKind {
    TaskCompleted {
        task_id: String,
    },
    TaskSkipped {
        task_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    ContentViewed {
        content_id: String,
    },
    ResourceClicked {
        resource_id: String,
    },
    Rating {
        /// 1-5
        score: u8,
        #[serde(default)]
        comment: Option<String>,
    },
}

/// Feedback as recorded on the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback: FeedbackKind,
    pub accepted: bool,
    pub received_at: DateTime<Utc>,
}

/// Live state for one user
#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    /// Windowed buffer of accepted signals, oldest first
    pub signals: Vec<SignalRecord>,
    pub current_trajectory: Option<TrajectoryRecord>,
    pub current_plan: Option<InterventionPlan>,
    pub phenotypes: Vec<PhenotypeMatchResult>,
    pub stage_assessment: Option<StageAssessment>,
    /// Indicators behind `stage_assessment`
    pub stage_indicators: Option<StageIndicators>,
    pub behavior_locks: Vec<BehaviorLock>,
    pub feedback: Vec<FeedbackRecord>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Incremented on every mutation
    pub version: u64,
}

impl UserSession {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: format!("sess_{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            signals: Vec::new(),
            current_trajectory: None,
            current_plan: None,
            phenotypes: Vec::new(),
            stage_assessment: None,
            stage_indicators: None,
            behavior_locks: Vec::new(),
            feedback: Vec::new(),
            started_at: now,
            last_activity: now,
            version: 0,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.version += 1;
    }

    /// Move every active lock's streak: up on completion, back to zero
    /// otherwise. Returns the number of locks touched.
    pub fn nudge_locks(&mut self, completed: bool, now: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for lock in self.behavior_locks.iter_mut().filter(|l| l.active) {
            if completed {
                lock.extend_streak(now);
            } else {
                lock.reset_streak(now);
            }
            touched += 1;
        }
        touched
    }
}

/// Storage for user sessions.
///
/// Implementations must give each closure exclusive access to the session for
/// its whole duration.
pub trait SessionStore: Send + Sync {
    /// Snapshot of the user's session
    fn get(&self, user_id: &str) -> Option<UserSession>;

    /// Run `f` on the user's session, creating it first if needed
    fn upsert<R>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UserSession) -> R,
    ) -> R;

    /// Run `f` on the user's session only if it exists
    fn update<R>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UserSession) -> R,
    ) -> Option<R>;

    /// Remove sessions idle since before `cutoff`; returns the removed user ids
    fn remove_idle(&self, cutoff: DateTime<Utc>) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, UserSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, user_id: &str) -> Option<UserSession> {
        self.sessions.get(user_id).map(|s| s.value().clone())
    }

    fn upsert<R>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UserSession) -> R,
    ) -> R {
        let mut session = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user_id = %user_id, "Creating session");
                UserSession::new(user_id, now)
            });
        let result = f(session.value_mut());
        session.touch(now);
        result
    }

    fn update<R>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UserSession) -> R,
    ) -> Option<R> {
        let mut session = self.sessions.get_mut(user_id)?;
        let result = f(session.value_mut());
        session.touch(now);
        Some(result)
    }

    fn remove_idle(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut removed = Vec::new();
        self.sessions.retain(|user_id, session| {
            let keep = session.last_activity >= cutoff;
            if !keep {
                debug!(user_id = %user_id, "Removing idle session");
                removed.push(user_id.clone());
            }
            keep
        });
        removed
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_strength_bands() {
        assert_eq!(LockStrength::from_streak(0), LockStrength::Forming);
        assert_eq!(LockStrength::from_streak(20), LockStrength::Forming);
        assert_eq!(LockStrength::from_streak(21), LockStrength::Stable);
        assert_eq!(LockStrength::from_streak(65), LockStrength::Stable);
        assert_eq!(LockStrength::from_streak(66), LockStrength::Automatic);
    }

    #[test]
    fn test_streak_extend_and_reset() {
        let now = Utc::now();
        let mut lock = BehaviorLock::new("walk", "after lunch", Frequency::Daily, now);
        for _ in 0..21 {
            lock.extend_streak(now);
        }
        assert_eq!(lock.strength, LockStrength::Stable);
        lock.reset_streak(now);
        assert_eq!(lock.streak_days, 0);
        assert_eq!(lock.longest_streak, 21);
        assert_eq!(lock.strength, LockStrength::Forming);
    }

    #[test]
    fn test_feedback_wire_format() {
        let feedback: FeedbackKind =
            serde_json::from_str(r#"{"type": "task_skipped", "task_id": "t1"}"#).unwrap();
        assert_eq!(
            feedback,
            FeedbackKind::TaskSkipped {
                task_id: "t1".to_string(),
                reason: None
            }
        );
        let json = serde_json::to_value(FeedbackKind::Rating {
            score: 5,
            comment: None,
        })
        .unwrap();
        assert_eq!(json["type"], "rating");
    }

    #[test]
    fn test_upsert_creates_and_versions() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        assert!(store.get("u1").is_none());
        assert!(store.update("u1", now, |_| ()).is_none());

        let id = store.upsert("u1", now, |s| s.session_id.clone());
        store.upsert("u1", now, |_| ());
        let session = store.get("u1").unwrap();
        assert_eq!(session.session_id, id);
        assert_eq!(session.version, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_idle() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store.upsert("stale", now - Duration::hours(30), |_| ());
        store.upsert("fresh", now - Duration::hours(1), |_| ());

        let removed = store.remove_idle(now - Duration::hours(24));
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(store.get("stale").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(InMemorySessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..50 {
                        store.upsert("shared", Utc::now(), |s| {
                            let now = Utc::now();
                            s.behavior_locks
                                .push(BehaviorLock::new("h", "t", Frequency::Daily, now));
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = store.get("shared").unwrap();
        assert_eq!(session.behavior_locks.len(), 400);
        assert_eq!(session.version, 400);
    }
}
