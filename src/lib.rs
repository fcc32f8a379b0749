pub mod config;
pub mod context;
pub mod difficulty;
pub mod generator;
pub mod logging;
pub mod reconciler;
pub mod selector;
pub mod service;
pub mod store;
pub mod types;

pub use difficulty::{recommend, DifficultyPolicy};
pub use generator::{
    GenerationError, GeneratorRegistry, Materializer, MaterializerConfig, ProblemGenerator,
    TemplateRegistry,
};
pub use reconciler::{merge, MergeOutcome, MergePolicy, ProgressReconciler};
pub use selector::{SelectionError, SelectorWeights, TemplateSelector};
pub use service::{PracticeService, ServiceError, SubmissionOutcome};
pub use store::{MemoryStore, PracticeStore, StoreError};
pub use types::{
    GeneratedProblem, ProblemTemplate, ProgressSnapshot, SkillProgress, SubStrandProgress,
};
