use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::difficulty::DifficultyPolicy;
use crate::generator::{GenerationError, GeneratorRegistry, Materializer};
use crate::reconciler::{MergeOutcome, ProgressReconciler, ReconcileError};
use crate::selector::{SelectionError, TemplateSelector};
use crate::store::{PracticeStore, StoreError};
use crate::types::{
    clamp_level, AttemptRecord, GeneratedProblem, ProblemTemplate, ProgressSnapshot, SkillProgress,
    SubStrandProgress, MAX_LEVEL, MIN_LEVEL,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("no templates available for sub-strand {0}")]
    NoTemplates(String),
    #[error("answer {0} is not a finite number")]
    InvalidAnswer(f64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub is_correct: bool,
    pub correct_answer: f64,
    pub answer_text: String,
    pub explanation: Vec<String>,
    pub updated_snapshot: ProgressSnapshot,
    pub recommended_level: u8,
    pub next_template_id: Option<String>,
}

/// One async mutex per learner so read-merge-write of a snapshot is a single step.
/// Entries are dropped once no task holds or awaits them.
#[derive(Default)]
struct LearnerLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct LearnerGuard<'a> {
    locks: &'a LearnerLocks,
    learner_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LearnerLocks {
    async fn acquire(&self, learner_id: &str) -> LearnerGuard<'_> {
        let lock = {
            let mut locks = self.inner.lock();
            Arc::clone(locks.entry(learner_id.to_string()).or_default())
        };
        LearnerGuard {
            locks: self,
            learner_id: learner_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for LearnerGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.inner.lock();
        // Waiters clone the Arc under this map lock, so a count of one means idle.
        if locks
            .get(&self.learner_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.learner_id);
        }
    }
}

pub struct PracticeService {
    store: Arc<dyn PracticeStore>,
    materializer: Arc<Materializer>,
    selector: TemplateSelector,
    difficulty: DifficultyPolicy,
    reconciler: ProgressReconciler,
    generators: Option<Arc<GeneratorRegistry>>,
    locks: LearnerLocks,
    rng: parking_lot::Mutex<ChaCha8Rng>,
}

impl PracticeService {
    pub fn new(store: Arc<dyn PracticeStore>) -> Self {
        Self {
            store,
            materializer: Arc::new(Materializer::default()),
            selector: TemplateSelector::default(),
            difficulty: DifficultyPolicy::default(),
            reconciler: ProgressReconciler::default(),
            generators: None,
            locks: LearnerLocks::default(),
            rng: parking_lot::Mutex::new(ChaCha8Rng::from_rng(&mut rand::rng())),
        }
    }

    pub fn with_materializer(mut self, materializer: Arc<Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_selector(mut self, selector: TemplateSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_difficulty(mut self, difficulty: DifficultyPolicy) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ProgressReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_generators(mut self, generators: Arc<GeneratorRegistry>) -> Self {
        self.generators = Some(generators);
        self
    }

    /// Makes every random draw of this service reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &Arc<dyn PracticeStore> {
        &self.store
    }

    fn child_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.rng.lock().random())
    }

    /// Templates at `level`, or at the nearest populated level when it has none.
    async fn candidates_for(&self, sub_strand: &str, level: u8) -> Result<Vec<ProblemTemplate>, ServiceError> {
        let exact = self.store.load_templates(sub_strand, level).await?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let all = self.store.load_sub_strand_templates(sub_strand).await?;
        for distance in 1..=(MAX_LEVEL - MIN_LEVEL) {
            let widened: Vec<ProblemTemplate> = all
                .iter()
                .filter(|t| t.difficulty.abs_diff(level) == distance)
                .cloned()
                .collect();
            if !widened.is_empty() {
                tracing::info!(
                    sub_strand = %sub_strand,
                    level,
                    distance,
                    candidates = widened.len(),
                    "widened template filter"
                );
                return Ok(widened);
            }
        }
        Ok(Vec::new())
    }

    pub async fn generate_problem(
        &self,
        learner_id: &str,
        sub_strand: &str,
        preferred_difficulty: Option<u8>,
    ) -> Result<GeneratedProblem, ServiceError> {
        let snapshot = self.store.load_progress_snapshot(learner_id).await?;
        let level = preferred_difficulty
            .map(|level| clamp_level(level as i32))
            .or_else(|| snapshot.get(sub_strand).map(|p| p.level))
            .unwrap_or(MIN_LEVEL);

        let candidates = self.candidates_for(sub_strand, level).await?;
        if candidates.is_empty() {
            return Err(ServiceError::NoTemplates(sub_strand.to_string()));
        }
        let skills = self.store.load_skill_progress(learner_id).await?;
        let history = self.store.load_attempt_history(learner_id).await?;

        let problem = {
            let mut rng = self.child_rng();
            let ordered = self
                .selector
                .order_candidates(&candidates, &skills, &history, Utc::now(), &mut rng)?;
            self.materializer.materialize_first(&ordered, &mut rng)?
        };
        self.store.persist_generated_problem(&problem).await?;

        tracing::debug!(
            learner_id = %learner_id,
            template_id = %problem.template_id,
            problem_id = %problem.id,
            level,
            "problem generated"
        );
        Ok(problem)
    }

    pub async fn submit_answer(
        &self,
        learner_id: &str,
        problem_id: Uuid,
        answer: f64,
        time_spent_seconds: f64,
    ) -> Result<SubmissionOutcome, ServiceError> {
        if !answer.is_finite() {
            return Err(ServiceError::InvalidAnswer(answer));
        }
        let problem = self.store.load_generated_problem(problem_id).await?;
        let is_correct = problem.check_answer(answer);
        let now = Utc::now();

        let (updated_snapshot, recommended_level) = {
            let _guard = self.locks.acquire(learner_id).await;

            // Persisted as-is; the updated entry already dominates the stored one.
            let mut local = self.store.load_progress_snapshot(learner_id).await?;
            let history = self.store.load_attempt_history(learner_id).await?;
            let mut recent: Vec<bool> = history
                .iter()
                .filter(|r| r.sub_strand == problem.sub_strand)
                .map(|r| r.correct)
                .collect();
            recent.push(is_correct);

            if local.learner_id.is_empty() {
                local.learner_id = learner_id.to_string();
            }
            let mut entry = local
                .get(&problem.sub_strand)
                .cloned()
                .unwrap_or_else(|| SubStrandProgress::new(problem.sub_strand.clone(), problem.difficulty));
            let recommended_level =
                self.difficulty
                    .record_outcome(&mut entry, is_correct, &problem.kind, &recent, now);
            local.upsert(entry);

            let mut skills = self.store.load_skill_progress(learner_id).await?;
            for skill_id in &problem.skills {
                let index = match skills.iter().position(|s| &s.skill_id == skill_id) {
                    Some(index) => index,
                    None => {
                        skills.push(SkillProgress::new(skill_id.clone()));
                        skills.len() - 1
                    }
                };
                self.difficulty.update_skill(&mut skills[index], is_correct, now);
            }
            let stale = self.difficulty.flag_stale_skills(&mut skills, now);
            if stale > 0 {
                tracing::info!(learner_id = %learner_id, stale, "skills flagged for review");
            }

            self.store.persist_skill_progress(learner_id, &skills).await?;
            self.store
                .persist_progress_snapshot(learner_id, &local)
                .await?;
            self.store
                .record_attempt(
                    learner_id,
                    &AttemptRecord {
                        problem_id,
                        template_id: problem.template_id.clone(),
                        sub_strand: problem.sub_strand.clone(),
                        skills: problem.skills.clone(),
                        correct: is_correct,
                        time_spent_seconds,
                        answered_at: now,
                    },
                )
                .await?;

            (local, recommended_level)
        };

        tracing::info!(
            learner_id = %learner_id,
            problem_id = %problem_id,
            template_id = %problem.template_id,
            is_correct,
            level = recommended_level,
            "answer recorded"
        );

        let next_template_id = match self.recommend_next_template(learner_id, &problem.sub_strand).await {
            Ok(next) => next.map(|t| t.id),
            Err(err) => {
                tracing::warn!(learner_id = %learner_id, error = %err, "next template lookup failed");
                None
            }
        };

        Ok(SubmissionOutcome {
            is_correct,
            correct_answer: problem.answer,
            answer_text: problem.answer_text,
            explanation: problem.explanation,
            updated_snapshot,
            recommended_level,
            next_template_id,
        })
    }

    pub async fn recommend_next_template(
        &self,
        learner_id: &str,
        sub_strand: &str,
    ) -> Result<Option<ProblemTemplate>, ServiceError> {
        let snapshot = self.store.load_progress_snapshot(learner_id).await?;
        let level = snapshot.get(sub_strand).map(|p| p.level).unwrap_or(MIN_LEVEL);
        let candidates = self.candidates_for(sub_strand, level).await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let skills = self.store.load_skill_progress(learner_id).await?;
        let history = self.store.load_attempt_history(learner_id).await?;

        let mut rng = self.child_rng();
        let selection = self
            .selector
            .select_next(&candidates, &skills, &history, Utc::now(), &mut rng)?;
        Ok(Some(selection.template.clone()))
    }

    /// Folds a client-held snapshot into the stored one under the learner lock.
    pub async fn sync_snapshot(
        &self,
        learner_id: &str,
        client: &ProgressSnapshot,
    ) -> Result<MergeOutcome, ServiceError> {
        let _guard = self.locks.acquire(learner_id).await;
        let stored = self.store.load_progress_snapshot(learner_id).await?;
        let outcome = self.reconciler.merge(&stored, client)?;
        self.store
            .persist_progress_snapshot(learner_id, &outcome.snapshot)
            .await?;
        tracing::info!(
            learner_id = %learner_id,
            sub_strands = outcome.snapshot.sub_strands.len(),
            anomalies = outcome.anomalies.len(),
            "snapshot synced"
        );
        Ok(outcome)
    }

    pub async fn generate_for_topic(
        &self,
        learner_id: &str,
        topic: &str,
        difficulty: u8,
    ) -> Result<GeneratedProblem, ServiceError> {
        let generators = self
            .generators
            .as_ref()
            .ok_or_else(|| GenerationError::UnknownGenerator(topic.to_string()))?;
        let history = self.store.load_attempt_history(learner_id).await?;
        let problem = {
            let mut rng = self.child_rng();
            generators.generate(topic, clamp_level(difficulty as i32), &history, &mut rng)?
        };
        self.store.persist_generated_problem(&problem).await?;
        Ok(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holders(locks: &LearnerLocks, learner_id: &str) -> usize {
        locks.inner.lock().get(learner_id).map_or(0, Arc::strong_count)
    }

    #[tokio::test]
    async fn test_learner_locks_are_released() {
        let locks = LearnerLocks::default();
        {
            let _first = locks.acquire("amina").await;
            let _other = locks.acquire("baraka").await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiting_learner_keeps_entry() {
        let locks = Arc::new(LearnerLocks::default());
        let held = locks.acquire("chloe").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("chloe").await;
            })
        };
        // map entry, the held guard and the queued waiter
        while holders(&locks, "chloe") < 3 {
            tokio::task::yield_now().await;
        }
        drop(held);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
