//! Property-Based Tests for difficulty recommendation and template selection
//!
//! Tests the following invariants:
//! - recommend stays within [1, 5] and is monotone in the success rate
//! - Skill proficiency stays within [0, 1] under any answer sequence
//! - The selector is deterministic for identical inputs
//! - With every skill mastered the selector explores uniformly

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use math_practice_engine::difficulty::{recommend, DifficultyPolicy};
use math_practice_engine::selector::{SelectionReason, TemplateSelector};
use math_practice_engine::types::{AttemptRecord, ProblemTemplate, SkillProgress};
use uuid::Uuid;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_level() -> impl Strategy<Value = u8> {
    1u8..=5
}

fn arb_rate() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_outcomes() -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), 0..12)
}

fn template(id: &str, difficulty: u8, skills: &[&str]) -> ProblemTemplate {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "type": "fractions",
        "structure": "{a}",
        "variables": { "a": { "min": 1, "max": 9 } },
        "answerFormula": "a",
        "difficulty": difficulty,
        "strand": "number",
        "subStrand": "fractions",
        "skills": skills,
    }))
    .unwrap()
}

fn arb_skill(id: &'static str) -> impl Strategy<Value = SkillProgress> {
    (arb_rate(), any::<bool>()).prop_map(move |(proficiency, needs_review)| SkillProgress {
        proficiency,
        needs_review,
        ..SkillProgress::new(id)
    })
}

fn arb_history() -> impl Strategy<Value = Vec<AttemptRecord>> {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    proptest::collection::vec((0usize..4, any::<bool>(), 0i64..240), 0..15).prop_map(move |rows| {
        rows.into_iter()
            .map(|(t, correct, hours)| AttemptRecord {
                problem_id: Uuid::nil(),
                template_id: format!("t{t}"),
                sub_strand: "fractions".to_string(),
                skills: Vec::new(),
                correct,
                time_spent_seconds: 30.0,
                answered_at: base + Duration::hours(hours),
            })
            .collect()
    })
}

fn pool() -> Vec<ProblemTemplate> {
    vec![
        template("t0", 1, &["unit-fractions"]),
        template("t1", 2, &["unit-fractions", "fraction-addition"]),
        template("t2", 3, &["fraction-addition"]),
        template("t3", 4, &["mixed-numbers"]),
    ]
}

// ============================================================================
// Difficulty
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_recommend_in_range(level in arb_level(), rate in proptest::option::of(arb_rate()), outcomes in arb_outcomes()) {
        let recommended = recommend(level, rate, &outcomes);
        prop_assert!((1..=5).contains(&recommended));
        prop_assert!(recommended.abs_diff(level) <= 2);
    }

    #[test]
    fn prop_recommend_is_monotone(level in arb_level(), outcomes in arb_outcomes()) {
        let high = recommend(level, Some(0.9), &outcomes);
        let mid = recommend(level, Some(0.5), &outcomes);
        let low = recommend(level, Some(0.3), &outcomes);
        prop_assert!(high >= mid);
        prop_assert!(mid >= low);
    }

    #[test]
    fn prop_recommend_monotone_in_rate(level in arb_level(), a in arb_rate(), b in arb_rate(), outcomes in arb_outcomes()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(recommend(level, Some(hi), &outcomes) >= recommend(level, Some(lo), &outcomes));
    }

    #[test]
    fn prop_topic_variant_caps_at_two_steps(level in arb_level(), rate in arb_rate(), outcomes in arb_outcomes()) {
        let policy = DifficultyPolicy::default();
        let recommended = policy.recommend_for_topic(level, Some(rate), &outcomes);
        prop_assert!(recommended <= (level + 2).min(5));
        prop_assert!(recommended <= policy.recommend(level, Some(rate), &outcomes));
    }

    #[test]
    fn prop_proficiency_stays_in_unit_interval(answers in proptest::collection::vec(any::<bool>(), 1..60)) {
        let policy = DifficultyPolicy::default();
        let mut skill = SkillProgress::new("fraction-addition");
        let now = Utc::now();
        for correct in &answers {
            policy.update_skill(&mut skill, *correct, now);
            prop_assert!((0.0..=1.0).contains(&skill.proficiency));
            prop_assert!((0.0..=1.0).contains(&skill.success_rate));
            prop_assert!(skill.proficiency <= skill.success_rate + 1e-12);
        }
        prop_assert_eq!(skill.total_attempts as usize, answers.len());
        let hits = answers.iter().filter(|c| **c).count() as f64;
        prop_assert!((skill.success_rate - hits / answers.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn prop_selector_is_deterministic(
        skills in (arb_skill("unit-fractions"), arb_skill("fraction-addition"), arb_skill("mixed-numbers")),
        history in arb_history(),
        seed in any::<u64>(),
    ) {
        let skills = vec![skills.0, skills.1, skills.2];
        let candidates = pool();
        let now = Utc.with_ymd_and_hms(2024, 5, 12, 9, 0, 0).unwrap();
        let selector = TemplateSelector::default();

        let first = selector
            .select_next(&candidates, &skills, &history, now, &mut ChaCha8Rng::seed_from_u64(seed))
            .unwrap();
        for _ in 0..3 {
            let again = selector
                .select_next(&candidates, &skills, &history, now, &mut ChaCha8Rng::seed_from_u64(seed))
                .unwrap();
            prop_assert_eq!(&again.template.id, &first.template.id);
            prop_assert_eq!(again.reason, first.reason);
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_promotion_scenario() {
    assert_eq!(recommend(3, Some(0.85), &[]), 4);
}

#[test]
fn test_mastered_pool_is_explored_uniformly() {
    let candidates = pool();
    let skills: Vec<SkillProgress> = ["unit-fractions", "fraction-addition", "mixed-numbers"]
        .iter()
        .map(|id| SkillProgress {
            proficiency: 0.9,
            ..SkillProgress::new(*id)
        })
        .collect();
    let selector = TemplateSelector::default();
    let now = Utc::now();

    let trials = 4000;
    let mut counts = [0usize; 4];
    for seed in 0..trials {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let selection = selector
            .select_next(&candidates, &skills, &[], now, &mut rng)
            .unwrap();
        assert_eq!(selection.reason, SelectionReason::Exploration);
        let index = candidates
            .iter()
            .position(|t| t.id == selection.template.id)
            .unwrap();
        counts[index] += 1;
    }

    // expected 1000 each; allow roughly five standard deviations
    for count in counts {
        assert!((860..=1140).contains(&count), "counts {counts:?}");
    }
}

#[test]
fn test_weak_skill_template_is_preferred() {
    let candidates = pool();
    let skills = vec![
        SkillProgress { proficiency: 0.95, ..SkillProgress::new("unit-fractions") },
        SkillProgress { proficiency: 0.95, ..SkillProgress::new("fraction-addition") },
        SkillProgress { proficiency: 0.2, ..SkillProgress::new("mixed-numbers") },
    ];
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let selection = TemplateSelector::default()
        .select_next(&candidates, &skills, &[], Utc::now(), &mut rng)
        .unwrap();
    assert_eq!(selection.template.id, "t3");
}
