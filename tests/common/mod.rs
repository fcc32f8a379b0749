#![allow(dead_code)]

use std::sync::Arc;

use math_practice_engine::{
    GeneratorRegistry, Materializer, MemoryStore, PracticeService, TemplateRegistry,
    TemplateSelector,
};

pub fn bundled_registry() -> Arc<TemplateRegistry> {
    Arc::new(TemplateRegistry::bundled().expect("bundled template bank is valid"))
}

pub fn create_test_service(seed: u64) -> (Arc<PracticeService>, Arc<MemoryStore>) {
    let registry = bundled_registry();
    let materializer = Arc::new(Materializer::default());
    let generators = GeneratorRegistry::from_templates(
        Arc::clone(&registry),
        Arc::clone(&materializer),
        TemplateSelector::default(),
    );
    let store = Arc::new(MemoryStore::new(registry));
    let service = PracticeService::new(store.clone())
        .with_materializer(materializer)
        .with_generators(Arc::new(generators))
        .with_seed(seed);
    (Arc::new(service), store)
}
