use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::generator::TemplateRegistry;
use crate::types::{AttemptRecord, GeneratedProblem, ProblemTemplate, ProgressSnapshot, SkillProgress};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator. The engine itself does no I/O; every read and
/// write a service call needs goes through this trait.
#[async_trait]
pub trait PracticeStore: Send + Sync {
    async fn load_templates(&self, sub_strand: &str, level: u8) -> Result<Vec<ProblemTemplate>, StoreError>;

    /// Every template of a sub-strand regardless of level; used when widening the filter.
    async fn load_sub_strand_templates(&self, sub_strand: &str) -> Result<Vec<ProblemTemplate>, StoreError>;

    async fn load_skill_progress(&self, learner_id: &str) -> Result<Vec<SkillProgress>, StoreError>;

    async fn persist_skill_progress(
        &self,
        learner_id: &str,
        skills: &[SkillProgress],
    ) -> Result<(), StoreError>;

    /// An unknown learner gets an empty snapshot rather than an error.
    async fn load_progress_snapshot(&self, learner_id: &str) -> Result<ProgressSnapshot, StoreError>;

    async fn persist_progress_snapshot(
        &self,
        learner_id: &str,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StoreError>;

    async fn persist_generated_problem(&self, problem: &GeneratedProblem) -> Result<Uuid, StoreError>;

    async fn load_generated_problem(&self, problem_id: Uuid) -> Result<GeneratedProblem, StoreError>;

    async fn record_attempt(&self, learner_id: &str, attempt: &AttemptRecord) -> Result<(), StoreError>;

    /// Oldest first.
    async fn load_attempt_history(&self, learner_id: &str) -> Result<Vec<AttemptRecord>, StoreError>;
}

/// In-process store backed by the template registry and lock-guarded maps.
pub struct MemoryStore {
    templates: Arc<TemplateRegistry>,
    skills: RwLock<HashMap<String, HashMap<String, SkillProgress>>>,
    snapshots: RwLock<HashMap<String, ProgressSnapshot>>,
    problems: RwLock<HashMap<Uuid, GeneratedProblem>>,
    attempts: RwLock<HashMap<String, Vec<AttemptRecord>>>,
}

impl MemoryStore {
    pub fn new(templates: Arc<TemplateRegistry>) -> Self {
        Self {
            templates,
            skills: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            problems: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
        }
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn problem_count(&self) -> usize {
        self.problems.read().len()
    }
}

#[async_trait]
impl PracticeStore for MemoryStore {
    async fn load_templates(&self, sub_strand: &str, level: u8) -> Result<Vec<ProblemTemplate>, StoreError> {
        Ok(self.templates.for_sub_strand(sub_strand, level))
    }

    async fn load_sub_strand_templates(&self, sub_strand: &str) -> Result<Vec<ProblemTemplate>, StoreError> {
        Ok(self.templates.for_sub_strand_any_level(sub_strand))
    }

    async fn load_skill_progress(&self, learner_id: &str) -> Result<Vec<SkillProgress>, StoreError> {
        let skills = self.skills.read();
        let mut list: Vec<SkillProgress> = skills
            .get(learner_id)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        Ok(list)
    }

    async fn persist_skill_progress(
        &self,
        learner_id: &str,
        skills: &[SkillProgress],
    ) -> Result<(), StoreError> {
        let mut all = self.skills.write();
        let by_id = all.entry(learner_id.to_string()).or_default();
        for skill in skills {
            by_id.insert(skill.skill_id.clone(), skill.clone());
        }
        Ok(())
    }

    async fn load_progress_snapshot(&self, learner_id: &str) -> Result<ProgressSnapshot, StoreError> {
        Ok(self
            .snapshots
            .read()
            .get(learner_id)
            .cloned()
            .unwrap_or_else(|| ProgressSnapshot::new(learner_id)))
    }

    async fn persist_progress_snapshot(
        &self,
        learner_id: &str,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StoreError> {
        if !snapshot.learner_id.is_empty() && snapshot.learner_id != learner_id {
            return Err(StoreError::Backend(format!(
                "snapshot of {} written under {learner_id}",
                snapshot.learner_id
            )));
        }
        self.snapshots
            .write()
            .insert(learner_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn persist_generated_problem(&self, problem: &GeneratedProblem) -> Result<Uuid, StoreError> {
        self.problems.write().insert(problem.id, problem.clone());
        Ok(problem.id)
    }

    async fn load_generated_problem(&self, problem_id: Uuid) -> Result<GeneratedProblem, StoreError> {
        self.problems
            .read()
            .get(&problem_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "problem",
                id: problem_id.to_string(),
            })
    }

    async fn record_attempt(&self, learner_id: &str, attempt: &AttemptRecord) -> Result<(), StoreError> {
        self.attempts
            .write()
            .entry(learner_id.to_string())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn load_attempt_history(&self, learner_id: &str) -> Result<Vec<AttemptRecord>, StoreError> {
        Ok(self.attempts.read().get(learner_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubStrandProgress;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(TemplateRegistry::bundled().unwrap()))
    }

    #[tokio::test]
    async fn test_unknown_learner_gets_empty_snapshot() {
        let snapshot = store().load_progress_snapshot("nobody").await.unwrap();
        assert_eq!(snapshot.learner_id, "nobody");
        assert!(snapshot.sub_strands.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_owner_check() {
        let store = store();
        let mut snapshot = ProgressSnapshot::new("l1");
        snapshot.upsert(SubStrandProgress::new("fractions", 3));
        store.persist_progress_snapshot("l1", &snapshot).await.unwrap();
        assert_eq!(store.load_progress_snapshot("l1").await.unwrap(), snapshot);

        let err = store.persist_progress_snapshot("l2", &snapshot).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_missing_problem_is_not_found() {
        let err = store().load_generated_problem(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "problem", .. }));
    }

    #[tokio::test]
    async fn test_skill_progress_upserts() {
        let store = store();
        store
            .persist_skill_progress("l1", &[SkillProgress::new("b"), SkillProgress::new("a")])
            .await
            .unwrap();
        let mut updated = SkillProgress::new("a");
        updated.total_attempts = 4;
        store.persist_skill_progress("l1", &[updated]).await.unwrap();

        let skills = store.load_skill_progress("l1").await.unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].skill_id, "a");
        assert_eq!(skills[0].total_attempts, 4);
    }

    #[tokio::test]
    async fn test_templates_filtered_by_level() {
        let store = store();
        let level_one = store.load_templates("addition", 1).await.unwrap();
        assert!(!level_one.is_empty());
        assert!(level_one.iter().all(|t| t.sub_strand == "addition" && t.difficulty == 1));
    }
}
