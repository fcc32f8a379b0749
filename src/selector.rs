use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{AttemptRecord, ProblemTemplate, SkillProgress, MAX_LEVEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no candidate templates to choose from")]
    EmptyCandidateSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorWeights {
    pub coverage: f64,
    pub recency: f64,
    pub recency_cap_days: f64,
    pub success_band: f64,
    pub target_success_rate: f64,
    pub default_success_rate: f64,
    pub alignment: f64,
    pub mastery_threshold: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            coverage: 10.0,
            recency: 5.0,
            recency_cap_days: 7.0,
            success_band: 10.0,
            target_success_rate: 0.75,
            default_success_rate: 0.5,
            alignment: 15.0,
            mastery_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub coverage: f64,
    pub recency: f64,
    pub success_band: f64,
    pub alignment: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate<'a> {
    pub template: &'a ProblemTemplate,
    pub needed_skills: usize,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionReason {
    Scored { score: f64 },
    /// Every candidate's skills are mastered; picked uniformly at random.
    Exploration,
}

#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub template: &'a ProblemTemplate,
    pub reason: SelectionReason,
}

/// Needed-skill view of the learner: unknown skills count as needed with proficiency 0.
struct SkillView<'a> {
    by_id: HashMap<&'a str, &'a SkillProgress>,
    threshold: f64,
}

impl<'a> SkillView<'a> {
    fn new(skills: &'a [SkillProgress], threshold: f64) -> Self {
        Self {
            by_id: skills.iter().map(|s| (s.skill_id.as_str(), s)).collect(),
            threshold,
        }
    }

    /// Proficiency of `skill_id` when it is still needed.
    fn needed(&self, skill_id: &str) -> Option<f64> {
        match self.by_id.get(skill_id) {
            None => Some(0.0),
            Some(p) if p.needs_review || p.proficiency < self.threshold => Some(p.proficiency),
            Some(_) => None,
        }
    }
}

#[derive(Default)]
struct TemplateHistory {
    last_practiced: Option<DateTime<Utc>>,
    attempts: u32,
    correct: u32,
}

fn summarize_history(history: &[AttemptRecord]) -> HashMap<&str, TemplateHistory> {
    let mut summary: HashMap<&str, TemplateHistory> = HashMap::new();
    for record in history {
        let entry = summary.entry(record.template_id.as_str()).or_default();
        entry.attempts += 1;
        if record.correct {
            entry.correct += 1;
        }
        entry.last_practiced = entry.last_practiced.max(Some(record.answered_at));
    }
    summary
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSelector {
    weights: SelectorWeights,
}

impl TemplateSelector {
    pub fn new(weights: SelectorWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SelectorWeights {
        &self.weights
    }

    /// Every candidate with its score breakdown, best first. Ties keep input order.
    pub fn rank_candidates<'a>(
        &self,
        candidates: &'a [ProblemTemplate],
        skills: &[SkillProgress],
        history: &[AttemptRecord],
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate<'a>> {
        let w = &self.weights;
        let view = SkillView::new(skills, w.mastery_threshold);
        let past = summarize_history(history);

        let needed_per_candidate: Vec<Vec<f64>> = candidates
            .iter()
            .map(|t| t.skills.iter().filter_map(|s| view.needed(s)).collect())
            .collect();
        let all_needed: Vec<f64> = needed_per_candidate.iter().flatten().copied().collect();
        let global_mean = mean(&all_needed).unwrap_or(0.0);

        let mut ranked: Vec<RankedCandidate<'a>> = candidates
            .iter()
            .zip(&needed_per_candidate)
            .map(|(template, needed)| {
                let seen = past.get(template.id.as_str());

                let coverage = w.coverage * needed.len() as f64;

                let days = seen
                    .and_then(|h| h.last_practiced)
                    .map(|at| (now - at).num_seconds().max(0) as f64 / 86_400.0)
                    .unwrap_or(w.recency_cap_days);
                let recency = w.recency * days.min(w.recency_cap_days);

                let observed = seen
                    .filter(|h| h.attempts > 0)
                    .map(|h| h.correct as f64 / h.attempts as f64)
                    .unwrap_or(w.default_success_rate);
                let success_band =
                    w.success_band * (1.0 - (w.target_success_rate - observed).abs());

                let proficiency = mean(needed).unwrap_or(global_mean);
                let target = template.difficulty as f64 / MAX_LEVEL as f64;
                let alignment = w.alignment * (1.0 - (proficiency - target).abs());

                RankedCandidate {
                    template,
                    needed_skills: needed.len(),
                    score: ScoreBreakdown {
                        coverage,
                        recency,
                        success_band,
                        alignment,
                        total: coverage + recency + success_band + alignment,
                    },
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
        ranked
    }

    pub fn select_next<'a, R: Rng>(
        &self,
        candidates: &'a [ProblemTemplate],
        skills: &[SkillProgress],
        history: &[AttemptRecord],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Selection<'a>, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::EmptyCandidateSet);
        }
        let ranked = self.rank_candidates(candidates, skills, history, now);
        if ranked.iter().all(|c| c.needed_skills == 0) {
            let index = rng.random_range(0..candidates.len());
            return Ok(Selection {
                template: &candidates[index],
                reason: SelectionReason::Exploration,
            });
        }
        let best = &ranked[0];
        Ok(Selection {
            template: best.template,
            reason: SelectionReason::Scored {
                score: best.score.total,
            },
        })
    }

    /// Candidates in the order a caller should try them: ranked when any skill
    /// is needed, uniformly shuffled otherwise.
    pub fn order_candidates<'a, R: Rng>(
        &self,
        candidates: &'a [ProblemTemplate],
        skills: &[SkillProgress],
        history: &[AttemptRecord],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<&'a ProblemTemplate>, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::EmptyCandidateSet);
        }
        let ranked = self.rank_candidates(candidates, skills, history, now);
        if ranked.iter().all(|c| c.needed_skills == 0) {
            let mut order: Vec<&ProblemTemplate> = candidates.iter().collect();
            order.shuffle(rng);
            return Ok(order);
        }
        Ok(ranked.into_iter().map(|c| c.template).collect())
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn template(id: &str, difficulty: u8, skills: &[&str]) -> ProblemTemplate {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": "addition",
            "structure": "{a}+{b}",
            "variables": {},
            "answerFormula": "1",
            "difficulty": difficulty,
            "strand": "numbers",
            "subStrand": "addition",
            "skills": skills,
        }))
        .unwrap()
    }

    fn skill(id: &str, proficiency: f64) -> SkillProgress {
        SkillProgress {
            proficiency,
            ..SkillProgress::new(id)
        }
    }

    fn attempt(template_id: &str, correct: bool, at: DateTime<Utc>) -> AttemptRecord {
        AttemptRecord {
            problem_id: Uuid::nil(),
            template_id: template_id.to_string(),
            sub_strand: "addition".to_string(),
            skills: Vec::new(),
            correct,
            time_spent_seconds: 10.0,
            answered_at: at,
        }
    }

    #[test]
    fn test_empty_candidates() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = TemplateSelector::default()
            .select_next(&[], &[], &[], Utc::now(), &mut rng)
            .unwrap_err();
        assert_eq!(err, SelectionError::EmptyCandidateSet);
    }

    #[test]
    fn test_coverage_dominates() {
        let candidates = vec![
            template("mastered", 2, &["carry"]),
            template("weak", 2, &["regroup"]),
        ];
        let skills = vec![skill("carry", 0.95), skill("regroup", 0.3)];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let selection = TemplateSelector::default()
            .select_next(&candidates, &skills, &[], Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.template.id, "weak");
        assert!(matches!(selection.reason, SelectionReason::Scored { .. }));
    }

    #[test]
    fn test_score_components() {
        let now = Utc::now();
        let candidates = vec![template("t1", 3, &["s1", "s2"])];
        let skills = vec![skill("s1", 0.4), skill("s2", 0.6)];
        let history = vec![
            attempt("t1", true, now - Duration::days(2)),
            attempt("t1", false, now - Duration::days(3)),
        ];
        let ranked = TemplateSelector::default().rank_candidates(&candidates, &skills, &history, now);
        let score = ranked[0].score;
        assert_eq!(score.coverage, 20.0);
        assert!((score.recency - 10.0).abs() < 1e-9);
        assert!((score.success_band - 7.5).abs() < 1e-9);
        assert!((score.alignment - 15.0 * (1.0 - (0.5f64 - 0.6).abs())).abs() < 1e-9);
    }

    #[test]
    fn test_never_practiced_gets_recency_cap() {
        let now = Utc::now();
        let candidates = vec![template("recent", 2, &["s"]), template("stale", 2, &["s"])];
        let history = vec![attempt("recent", true, now - Duration::hours(1))];
        let ranked = TemplateSelector::default().rank_candidates(&candidates, &[], &history, now);
        assert_eq!(ranked[0].template.id, "stale");
        assert_eq!(ranked[0].score.recency, 35.0);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let candidates = vec![
            template("first", 2, &["s"]),
            template("second", 2, &["s"]),
            template("third", 2, &["s"]),
        ];
        let selector = TemplateSelector::default();
        let now = Utc::now();
        for seed in 0..10 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let selection = selector.select_next(&candidates, &[], &[], now, &mut rng).unwrap();
            assert_eq!(selection.template.id, "first");
        }
    }

    #[test]
    fn test_needs_review_keeps_skill_needed() {
        let candidates = vec![template("t1", 4, &["s"])];
        let mut flagged = skill("s", 0.9);
        flagged.needs_review = true;
        let ranked = TemplateSelector::default().rank_candidates(&candidates, &[flagged], &[], Utc::now());
        assert_eq!(ranked[0].needed_skills, 1);
    }

    #[test]
    fn test_mastered_pool_explores() {
        let candidates = vec![template("a", 1, &["s"]), template("b", 2, &["s"])];
        let skills = vec![skill("s", 0.9)];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let selection = TemplateSelector::default()
            .select_next(&candidates, &skills, &[], Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.reason, SelectionReason::Exploration);

        let order = TemplateSelector::default()
            .order_candidates(&candidates, &skills, &[], Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(order.len(), 2);
    }
}
