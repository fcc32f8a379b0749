use std::sync::Arc;

use math_practice_engine::config::EngineConfig;
use math_practice_engine::logging::{init_tracing, LogSettings};
use math_practice_engine::{
    GeneratorRegistry, Materializer, MemoryStore, PracticeService, TemplateRegistry,
    TemplateSelector,
};

const LEARNER_ID: &str = "local-learner";

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = EngineConfig::from_env();
    let _log_guard = init_tracing(&LogSettings::from(&config));

    let registry = match &config.template_bank {
        Some(path) => TemplateRegistry::load(path),
        None => TemplateRegistry::bundled(),
    };
    let registry = match registry {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            tracing::error!(error = %err, "template bank could not be loaded");
            std::process::exit(1);
        }
    };
    tracing::info!(
        templates = registry.len(),
        sub_strands = ?registry.sub_strands(),
        "template bank ready"
    );

    let materializer = Arc::new(Materializer::new(config.materializer_config()));
    let generators = GeneratorRegistry::from_templates(
        Arc::clone(&registry),
        Arc::clone(&materializer),
        TemplateSelector::default(),
    );
    let store = Arc::new(MemoryStore::new(Arc::clone(&registry)));
    let mut service = PracticeService::new(store)
        .with_materializer(materializer)
        .with_generators(Arc::new(generators));
    if let Some(seed) = config.seed {
        service = service.with_seed(seed);
    }

    for round in 0..config.problem_count {
        let problem = match service
            .generate_problem(LEARNER_ID, &config.sub_strand, None)
            .await
        {
            Ok(problem) => problem,
            Err(err) => {
                tracing::error!(error = %err, sub_strand = %config.sub_strand, "generation failed");
                break;
            }
        };
        match serde_json::to_string(&problem) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(error = %err, "problem could not be serialized"),
        }

        // Alternate right and wrong answers so the level moves both ways.
        let answer = if round % 2 == 0 { problem.answer } else { problem.answer + 1.0 };
        match service.submit_answer(LEARNER_ID, problem.id, answer, 30.0).await {
            Ok(outcome) => tracing::info!(
                correct = outcome.is_correct,
                level = outcome.recommended_level,
                next = ?outcome.next_template_id,
                "answer submitted"
            ),
            Err(err) => tracing::warn!(error = %err, "answer submission failed"),
        }
    }

    match service.store().load_progress_snapshot(LEARNER_ID).await {
        Ok(snapshot) => match serde_json::to_string(&snapshot.aggregates()) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(error = %err, "aggregates could not be serialized"),
        },
        Err(err) => tracing::warn!(error = %err, "final snapshot unavailable"),
    }
}
