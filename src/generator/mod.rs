pub mod formula;
pub mod materializer;
pub mod registry;
pub mod sampler;

pub use formula::{evaluate, validate, CompiledRules, ExpressionError, Formula, RuleViolation};
pub use materializer::{Materializer, MaterializerConfig};
pub use registry::{
    GeneratorRegistry, ProblemGenerator, RegistryError, TemplateGenerator, TemplateRegistry,
};
pub use sampler::{ConstraintSampler, SampleError};

use crate::context::ThemeError;
use crate::selector::SelectionError;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("template {template_id} produced no valid problem in {attempts} attempts")]
    UnsatisfiableTemplate { template_id: String, attempts: u32 },
    #[error("template {template_id}: {source}")]
    DegenerateConstraint {
        template_id: String,
        source: SampleError,
    },
    #[error(transparent)]
    UnknownTheme(#[from] ThemeError),
    #[error("template {template_id} is malformed: {source}")]
    MalformedTemplate {
        template_id: String,
        source: ExpressionError,
    },
    #[error("no generator registered for topic {0}")]
    UnknownGenerator(String),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl GenerationError {
    /// Failures tied to one template; the caller can move on to another candidate.
    pub fn is_template_specific(&self) -> bool {
        matches!(
            self,
            Self::UnsatisfiableTemplate { .. }
                | Self::DegenerateConstraint { .. }
                | Self::MalformedTemplate { .. }
                | Self::UnknownTheme(_)
        )
    }
}
