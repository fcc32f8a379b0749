use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ProgressSnapshot, SubStrandProgress};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("cannot merge progress of learner {left} with learner {right}")]
    LearnerMismatch { left: String, right: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Each field merged on its own: counters, lastAttempted by max, mistakes by union.
    #[default]
    FieldwiseMax,
    /// Counters and level come together from the record with more attempts.
    LargerAttemptsBasis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClampPolicy {
    #[default]
    Flag,
    /// Also clamps correctAnswers to questionsAttempted after merging.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicy {
    pub strategy: MergeStrategy,
    pub clamp: ClampPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySide {
    Left,
    Right,
    Merged,
}

/// A sub-strand record with more correct answers than attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAnomaly {
    pub sub_strand: String,
    pub side: AnomalySide,
    pub questions_attempted: u32,
    pub correct_answers: u32,
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub snapshot: ProgressSnapshot,
    pub anomalies: Vec<MergeAnomaly>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReconciler {
    policy: MergePolicy,
}

impl ProgressReconciler {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn merge(
        &self,
        left: &ProgressSnapshot,
        right: &ProgressSnapshot,
    ) -> Result<MergeOutcome, ReconcileError> {
        let learner_id = match (left.learner_id.as_str(), right.learner_id.as_str()) {
            (l, r) if l == r || r.is_empty() => l.to_string(),
            ("", r) => r.to_string(),
            (l, r) => {
                return Err(ReconcileError::LearnerMismatch {
                    left: l.to_string(),
                    right: r.to_string(),
                })
            }
        };

        let mut anomalies = Vec::new();
        anomalies.extend(inconsistent(left, AnomalySide::Left));
        anomalies.extend(inconsistent(right, AnomalySide::Right));

        let keys: BTreeSet<&String> = left.sub_strands.keys().chain(right.sub_strands.keys()).collect();
        let mut snapshot = ProgressSnapshot::new(learner_id);
        for key in keys {
            let merged = match (left.sub_strands.get(key), right.sub_strands.get(key)) {
                (Some(a), Some(b)) => merge_entry(a, b, self.policy.strategy),
                (Some(only), None) | (None, Some(only)) => only.clone(),
                (None, None) => continue,
            };
            snapshot.sub_strands.insert(key.clone(), merged);
        }

        for progress in snapshot.sub_strands.values_mut() {
            if progress.is_consistent() {
                continue;
            }
            let clamped = self.policy.clamp == ClampPolicy::Clamp;
            anomalies.push(MergeAnomaly {
                sub_strand: progress.sub_strand.clone(),
                side: AnomalySide::Merged,
                questions_attempted: progress.questions_attempted,
                correct_answers: progress.correct_answers,
                clamped,
            });
            if clamped {
                progress.correct_answers = progress.correct_answers.min(progress.questions_attempted);
            }
        }

        for anomaly in &anomalies {
            tracing::warn!(
                learner_id = %snapshot.learner_id,
                sub_strand = %anomaly.sub_strand,
                side = ?anomaly.side,
                attempted = anomaly.questions_attempted,
                correct = anomaly.correct_answers,
                clamped = anomaly.clamped,
                "progress record has more correct answers than attempts"
            );
        }

        Ok(MergeOutcome { snapshot, anomalies })
    }
}

/// Free-standing merge with the default policy; anomalies are logged and dropped.
pub fn merge(
    left: &ProgressSnapshot,
    right: &ProgressSnapshot,
) -> Result<ProgressSnapshot, ReconcileError> {
    ProgressReconciler::default()
        .merge(left, right)
        .map(|outcome| outcome.snapshot)
}

fn inconsistent(snapshot: &ProgressSnapshot, side: AnomalySide) -> impl Iterator<Item = MergeAnomaly> + '_ {
    snapshot
        .sub_strands
        .values()
        .filter(|p| !p.is_consistent())
        .map(move |p| MergeAnomaly {
            sub_strand: p.sub_strand.clone(),
            side,
            questions_attempted: p.questions_attempted,
            correct_answers: p.correct_answers,
            clamped: false,
        })
}

fn merge_entry(a: &SubStrandProgress, b: &SubStrandProgress, strategy: MergeStrategy) -> SubStrandProgress {
    let last_attempted = a.last_attempted.max(b.last_attempted);
    let mistakes = a.mistakes.union(&b.mistakes).cloned().collect();

    match strategy {
        MergeStrategy::FieldwiseMax => {
            // Level follows the more recent record; equal timestamps fall back to the higher level.
            let level = (a.last_attempted, a.level).max((b.last_attempted, b.level)).1;
            SubStrandProgress {
                sub_strand: a.sub_strand.clone(),
                level,
                questions_attempted: a.questions_attempted.max(b.questions_attempted),
                correct_answers: a.correct_answers.max(b.correct_answers),
                last_attempted,
                mistakes,
            }
        }
        MergeStrategy::LargerAttemptsBasis => {
            // Ranked only on fields the basis keeps unchanged.
            let rank = |p: &SubStrandProgress| (p.questions_attempted, p.correct_answers, p.level);
            let basis = if rank(b) > rank(a) { b } else { a };
            SubStrandProgress {
                sub_strand: basis.sub_strand.clone(),
                level: basis.level,
                questions_attempted: basis.questions_attempted,
                correct_answers: basis.correct_answers,
                last_attempted,
                mistakes,
            }
        }
    }
}
