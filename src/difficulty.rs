use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{clamp_level, SkillProgress, SubStrandProgress, MAX_LEVEL};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyPolicy {
    pub promote_above: f64,
    pub demote_below: f64,
    pub default_success_rate: f64,
    pub window_size: usize,
    pub window_threshold: f64,
    pub topic_max_step: u8,
    pub mastery_threshold: f64,
    pub review_threshold: f64,
    pub review_min_attempts: u32,
    pub confidence_prior: f64,
    pub stale_after_days: i64,
}

impl Default for DifficultyPolicy {
    fn default() -> Self {
        Self {
            promote_above: 0.8,
            demote_below: 0.6,
            default_success_rate: 0.5,
            window_size: 5,
            window_threshold: 0.8,
            topic_max_step: 2,
            mastery_threshold: 0.8,
            review_threshold: 0.6,
            review_min_attempts: 3,
            confidence_prior: 2.0,
            stale_after_days: 14,
        }
    }
}

impl DifficultyPolicy {
    /// Proportional step from `base_level`. `recent_outcomes` runs oldest to newest.
    pub fn recommend(&self, base_level: u8, success_rate: Option<f64>, recent_outcomes: &[bool]) -> u8 {
        let base = clamp_level(base_level as i32) as i32;
        let rate = success_rate.unwrap_or(self.default_success_rate);

        let mut level = if rate > self.promote_above {
            base + 1
        } else if rate < self.demote_below {
            base - 1
        } else {
            base
        };
        if self.window_is_strong(recent_outcomes) {
            level += 1;
        }
        clamp_level(level)
    }

    /// Same policy, but never more than `topic_max_step` above the base.
    pub fn recommend_for_topic(
        &self,
        base_level: u8,
        success_rate: Option<f64>,
        recent_outcomes: &[bool],
    ) -> u8 {
        let cap = base_level.saturating_add(self.topic_max_step).min(MAX_LEVEL);
        self.recommend(base_level, success_rate, recent_outcomes).min(cap)
    }

    fn window_is_strong(&self, recent_outcomes: &[bool]) -> bool {
        if self.window_size == 0 || recent_outcomes.len() < self.window_size {
            return false;
        }
        let window = &recent_outcomes[recent_outcomes.len() - self.window_size..];
        let correct = window.iter().filter(|&&c| c).count();
        correct as f64 / self.window_size as f64 >= self.window_threshold
    }

    /// Applies one answer to a sub-strand and returns the re-recommended level.
    /// The rate comes from the updated counters; `recent_outcomes` only feeds the
    /// window bonus and must already include this answer.
    pub fn record_outcome(
        &self,
        progress: &mut SubStrandProgress,
        correct: bool,
        mistake_tag: &str,
        recent_outcomes: &[bool],
        now: DateTime<Utc>,
    ) -> u8 {
        progress.questions_attempted = progress.questions_attempted.saturating_add(1);
        if correct {
            progress.correct_answers = progress.correct_answers.saturating_add(1);
        } else {
            progress.mistakes.insert(mistake_tag.to_string());
        }
        progress.last_attempted = progress.last_attempted.max(Some(now));

        let previous = progress.level;
        progress.level = self.recommend(progress.level, progress.success_rate(), recent_outcomes);
        if progress.level != previous {
            tracing::debug!(
                sub_strand = %progress.sub_strand,
                from = previous,
                to = progress.level,
                "sub-strand level changed"
            );
        }
        progress.level
    }

    pub fn update_skill(&self, skill: &mut SkillProgress, correct: bool, now: DateTime<Utc>) {
        let was_mastered = skill.proficiency >= self.mastery_threshold;
        let previous = skill.total_attempts as f64;
        skill.total_attempts = skill.total_attempts.saturating_add(1);
        let attempts = skill.total_attempts as f64;

        let hit = if correct { 1.0 } else { 0.0 };
        skill.success_rate = ((skill.success_rate * previous + hit) / attempts).clamp(0.0, 1.0);
        skill.proficiency =
            (skill.success_rate * attempts / (attempts + self.confidence_prior)).clamp(0.0, 1.0);
        skill.last_practiced = Some(now);

        if !correct && was_mastered {
            skill.needs_review = true;
        } else if skill.proficiency >= self.mastery_threshold {
            skill.needs_review = false;
        } else if skill.total_attempts >= self.review_min_attempts
            && skill.proficiency < self.review_threshold
        {
            skill.needs_review = true;
        }
    }

    /// Flags skills not practiced within the stale window. Returns how many changed.
    pub fn flag_stale_skills(&self, skills: &mut [SkillProgress], now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.stale_after_days);
        let mut flagged = 0;
        for skill in skills.iter_mut() {
            let stale = skill.last_practiced.is_some_and(|at| at <= cutoff);
            if stale && !skill.needs_review {
                skill.needs_review = true;
                flagged += 1;
            }
        }
        flagged
    }
}

pub fn recommend(base_level: u8, success_rate: Option<f64>, recent_outcomes: &[bool]) -> u8 {
    DifficultyPolicy::default().recommend(base_level, success_rate, recent_outcomes)
}
