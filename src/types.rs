use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 5;

/// Absolute tolerance used when comparing a learner's answer with the computed one.
pub const ANSWER_TOLERANCE: f64 = 0.005;

pub fn clamp_level(level: i32) -> u8 {
    level.clamp(MIN_LEVEL as i32, MAX_LEVEL as i32) as u8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    #[default]
    Plain,
    Currency,
}

impl ValueFormat {
    pub fn render(&self, value: f64) -> String {
        match self {
            Self::Currency => format!("{value:.2}"),
            Self::Plain => format_number(value),
        }
    }
}

/// Integral values render without a fractional part, everything else keeps at most two decimals.
pub fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        return format!("{}", value.round() as i64);
    }
    let raw = format!("{value:.2}");
    raw.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn default_step() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableConstraint {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<f64>,
    #[serde(default)]
    pub format: ValueFormat,
}

impl VariableConstraint {
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: default_step(),
            exclude: Vec::new(),
            format: ValueFormat::Plain,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn excluding(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.exclude.extend(values);
        self
    }

    pub fn currency(mut self) -> Self {
        self.format = ValueFormat::Currency;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_result: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_result: Option<f64>,
    #[serde(default)]
    pub whole_number: bool,
    /// Boolean expression over the variable bindings and `answer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpec {
    pub theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// When set, the themed price is bound under this name before the formula runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_variable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemTemplate {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub structure: String,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConstraint>,
    pub answer_formula: String,
    #[serde(default)]
    pub answer_format: ValueFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSpec>,
    pub difficulty: u8,
    pub strand: String,
    pub sub_strand: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub explanation: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProblem {
    pub id: Uuid,
    pub template_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub variables: BTreeMap<String, f64>,
    pub answer: f64,
    pub answer_text: String,
    pub explanation: Vec<String>,
    pub difficulty: u8,
    pub strand: String,
    pub sub_strand: String,
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl GeneratedProblem {
    pub fn check_answer(&self, value: f64) -> bool {
        value.is_finite() && (value - self.answer).abs() <= ANSWER_TOLERANCE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillProgress {
    pub skill_id: String,
    pub proficiency: f64,
    pub last_practiced: Option<DateTime<Utc>>,
    pub total_attempts: u32,
    pub success_rate: f64,
    pub needs_review: bool,
}

impl SkillProgress {
    pub fn new(skill_id: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            proficiency: 0.0,
            last_practiced: None,
            total_attempts: 0,
            success_rate: 0.0,
            needs_review: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubStrandProgress {
    pub sub_strand: String,
    pub level: u8,
    pub questions_attempted: u32,
    pub correct_answers: u32,
    pub last_attempted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mistakes: BTreeSet<String>,
}

impl SubStrandProgress {
    pub fn new(sub_strand: impl Into<String>, level: u8) -> Self {
        Self {
            sub_strand: sub_strand.into(),
            level: clamp_level(level as i32),
            questions_attempted: 0,
            correct_answers: 0,
            last_attempted: None,
            mistakes: BTreeSet::new(),
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.questions_attempted == 0 {
            return None;
        }
        Some(self.correct_answers as f64 / self.questions_attempted as f64)
    }

    pub fn is_consistent(&self) -> bool {
        self.correct_answers <= self.questions_attempted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAggregates {
    pub sub_strand_count: usize,
    pub total_attempted: u64,
    pub total_correct: u64,
    pub accuracy: Option<f64>,
    pub mean_level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub learner_id: String,
    #[serde(default)]
    pub sub_strands: BTreeMap<String, SubStrandProgress>,
}

impl ProgressSnapshot {
    pub fn new(learner_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            sub_strands: BTreeMap::new(),
        }
    }

    pub fn get(&self, sub_strand: &str) -> Option<&SubStrandProgress> {
        self.sub_strands.get(sub_strand)
    }

    pub fn upsert(&mut self, progress: SubStrandProgress) {
        self.sub_strands.insert(progress.sub_strand.clone(), progress);
    }

    pub fn aggregates(&self) -> SnapshotAggregates {
        let count = self.sub_strands.len();
        let total_attempted: u64 = self
            .sub_strands
            .values()
            .map(|p| p.questions_attempted as u64)
            .sum();
        let total_correct: u64 = self
            .sub_strands
            .values()
            .map(|p| p.correct_answers as u64)
            .sum();
        let level_sum: f64 = self.sub_strands.values().map(|p| p.level as f64).sum();

        SnapshotAggregates {
            sub_strand_count: count,
            total_attempted,
            total_correct,
            accuracy: (total_attempted > 0).then(|| total_correct as f64 / total_attempted as f64),
            mean_level: (count > 0).then(|| level_sum / count as f64),
        }
    }
}

/// One answered problem, as kept by the persistence layer for scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub problem_id: Uuid,
    pub template_id: String,
    pub sub_strand: String,
    pub skills: Vec<String>,
    pub correct: bool,
    pub time_spent_seconds: f64,
    pub answered_at: DateTime<Utc>,
}
