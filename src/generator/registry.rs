use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::{Rng, RngCore};
use serde::Deserialize;

use crate::context;
use crate::generator::formula::Formula;
use crate::generator::materializer::{placeholders, Materializer};
use crate::generator::sampler::lattice_size;
use crate::generator::GenerationError;
use crate::selector::TemplateSelector;
use crate::types::{AttemptRecord, GeneratedProblem, ProblemTemplate, MAX_LEVEL, MIN_LEVEL};

pub const BUNDLED_BANK: &str = include_str!("../../data/templates.json");

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read template bank {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse template bank: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate template id {0}")]
    Duplicate(String),
    #[error("template {id} is invalid: {reason}")]
    Invalid { id: String, reason: String },
    #[error("registry was not loaded from a file and cannot be refreshed")]
    NoSource,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BankFile {
    List(Vec<ProblemTemplate>),
    Wrapped { templates: Vec<ProblemTemplate> },
}

impl BankFile {
    fn into_templates(self) -> Vec<ProblemTemplate> {
        match self {
            Self::List(templates) | Self::Wrapped { templates } => templates,
        }
    }
}

struct TemplateIndex {
    templates: Vec<ProblemTemplate>,
    by_id: HashMap<String, usize>,
    loaded_at: DateTime<Utc>,
}

impl TemplateIndex {
    fn build(templates: Vec<ProblemTemplate>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(templates.len());
        for (index, template) in templates.iter().enumerate() {
            validate_template(template)?;
            if by_id.insert(template.id.clone(), index).is_some() {
                return Err(RegistryError::Duplicate(template.id.clone()));
            }
        }
        Ok(Self {
            templates,
            by_id,
            loaded_at: Utc::now(),
        })
    }
}

/// Read-only template index shared by reference. Built explicitly and swapped
/// atomically on refresh; readers keep the snapshot they started with.
pub struct TemplateRegistry {
    index: RwLock<Arc<TemplateIndex>>,
    source: Option<PathBuf>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self {
            index: RwLock::new(Arc::new(TemplateIndex {
                templates: Vec::new(),
                by_id: HashMap::new(),
                loaded_at: Utc::now(),
            })),
            source: None,
        }
    }
}

impl TemplateRegistry {
    pub fn from_templates(templates: Vec<ProblemTemplate>) -> Result<Self, RegistryError> {
        Ok(Self {
            index: RwLock::new(Arc::new(TemplateIndex::build(templates)?)),
            source: None,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        Self::from_templates(parse_bank(raw)?)
    }

    pub fn bundled() -> Result<Self, RegistryError> {
        Self::from_json_str(BUNDLED_BANK)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let templates = read_bank(path)?;
        let registry = Self {
            index: RwLock::new(Arc::new(TemplateIndex::build(templates)?)),
            source: Some(path.to_path_buf()),
        };
        tracing::info!(path = %path.display(), templates = registry.len(), "template bank loaded");
        Ok(registry)
    }

    /// Validates the new set first; on failure the current index stays in place.
    pub fn replace(&self, templates: Vec<ProblemTemplate>) -> Result<usize, RegistryError> {
        let index = TemplateIndex::build(templates)?;
        let count = index.templates.len();
        *self.index.write() = Arc::new(index);
        Ok(count)
    }

    pub fn refresh(&self) -> Result<usize, RegistryError> {
        let path = self.source.as_ref().ok_or(RegistryError::NoSource)?;
        let count = self.replace(read_bank(path)?)?;
        tracing::info!(path = %path.display(), templates = count, "template bank refreshed");
        Ok(count)
    }

    fn snapshot(&self) -> Arc<TemplateIndex> {
        Arc::clone(&self.index.read())
    }

    pub fn len(&self) -> usize {
        self.snapshot().templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.snapshot().loaded_at
    }

    pub fn get(&self, id: &str) -> Option<ProblemTemplate> {
        let index = self.snapshot();
        index.by_id.get(id).map(|&i| index.templates[i].clone())
    }

    pub fn all(&self) -> Vec<ProblemTemplate> {
        self.snapshot().templates.clone()
    }

    pub fn for_sub_strand(&self, sub_strand: &str, level: u8) -> Vec<ProblemTemplate> {
        self.filter(|t| t.sub_strand == sub_strand && t.difficulty == level)
    }

    pub fn for_sub_strand_any_level(&self, sub_strand: &str) -> Vec<ProblemTemplate> {
        self.filter(|t| t.sub_strand == sub_strand)
    }

    /// Templates of `kind` at the difficulty closest to the requested one.
    pub fn for_kind_nearest(&self, kind: &str, difficulty: u8) -> Vec<ProblemTemplate> {
        let of_kind = self.filter(|t| t.kind == kind);
        let Some(best) = of_kind
            .iter()
            .map(|t| t.difficulty.abs_diff(difficulty))
            .min()
        else {
            return Vec::new();
        };
        of_kind
            .into_iter()
            .filter(|t| t.difficulty.abs_diff(difficulty) == best)
            .collect()
    }

    pub fn kinds(&self) -> BTreeSet<String> {
        self.snapshot().templates.iter().map(|t| t.kind.clone()).collect()
    }

    pub fn sub_strands(&self) -> BTreeSet<String> {
        self.snapshot()
            .templates
            .iter()
            .map(|t| t.sub_strand.clone())
            .collect()
    }

    fn filter(&self, keep: impl Fn(&ProblemTemplate) -> bool) -> Vec<ProblemTemplate> {
        self.snapshot()
            .templates
            .iter()
            .filter(|t| keep(t))
            .cloned()
            .collect()
    }
}

fn parse_bank(raw: &str) -> Result<Vec<ProblemTemplate>, RegistryError> {
    Ok(serde_json::from_str::<BankFile>(raw)?.into_templates())
}

fn read_bank(path: &Path) -> Result<Vec<ProblemTemplate>, RegistryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_bank(&raw)
}

pub fn validate_template(template: &ProblemTemplate) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::Invalid {
        id: template.id.clone(),
        reason,
    };

    if template.id.trim().is_empty() {
        return Err(invalid("empty id".to_string()));
    }
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&template.difficulty) {
        return Err(invalid(format!("difficulty {} outside 1-5", template.difficulty)));
    }
    for (name, constraint) in &template.variables {
        if lattice_size(constraint).is_none() {
            return Err(invalid(format!("variable {name} has an invalid constraint")));
        }
    }

    let mut known: BTreeSet<String> = template.variables.keys().cloned().collect();
    if let Some(spec) = &template.context {
        let data = context::theme(&spec.theme).map_err(|e| invalid(e.to_string()))?;
        if let Some(sub) = &spec.subcategory {
            let exists = data.nouns.iter().any(|g| g.subcategory.eq_ignore_ascii_case(sub))
                || data.prices.iter().any(|b| b.subcategory.eq_ignore_ascii_case(sub));
            if !exists {
                return Err(invalid(format!("theme {} has no subcategory {sub}", data.name)));
            }
        }
        if let Some(price_variable) = &spec.price_variable {
            known.insert(price_variable.clone());
        }
    }

    let formula = Formula::parse(&template.answer_formula)
        .map_err(|e| invalid(format!("answer formula: {e}")))?;
    if let Some(missing) = formula.identifiers().into_iter().find(|id| !known.contains(id)) {
        return Err(invalid(format!("answer formula references unknown variable {missing}")));
    }

    known.insert("answer".to_string());
    if let Some(predicate) = template.validation.as_ref().and_then(|v| v.predicate.as_deref()) {
        let predicate = Formula::parse(predicate).map_err(|e| invalid(format!("predicate: {e}")))?;
        if let Some(missing) = predicate.identifiers().into_iter().find(|id| !known.contains(id)) {
            return Err(invalid(format!("predicate references unknown variable {missing}")));
        }
    }

    let texts = std::iter::once(&template.structure).chain(template.explanation.iter());
    for text in texts {
        for key in placeholders(text) {
            if let Some(expression) = key.strip_prefix('=') {
                let inline = Formula::parse(expression)
                    .map_err(|e| invalid(format!("inline expression {{{key}}}: {e}")))?;
                if let Some(missing) = inline.identifiers().into_iter().find(|id| !known.contains(id)) {
                    return Err(invalid(format!(
                        "inline expression {{{key}}} references unknown variable {missing}"
                    )));
                }
            }
        }
    }

    Ok(())
}

/// One topic's problem source. New topics register an implementation instead
/// of extending a dispatch conditional.
pub trait ProblemGenerator: Send + Sync {
    fn topic(&self) -> &str;

    fn generate(
        &self,
        difficulty: u8,
        history: &[AttemptRecord],
        rng: &mut dyn RngCore,
    ) -> Result<GeneratedProblem, GenerationError>;
}

/// Serves a topic from the template bank: nearest-difficulty templates, ranked
/// by the selector, first one that materializes wins.
pub struct TemplateGenerator {
    topic: String,
    templates: Arc<TemplateRegistry>,
    materializer: Arc<Materializer>,
    selector: TemplateSelector,
}

impl TemplateGenerator {
    pub fn new(
        topic: impl Into<String>,
        templates: Arc<TemplateRegistry>,
        materializer: Arc<Materializer>,
        selector: TemplateSelector,
    ) -> Self {
        Self {
            topic: topic.into(),
            templates,
            materializer,
            selector,
        }
    }
}

impl ProblemGenerator for TemplateGenerator {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn generate(
        &self,
        difficulty: u8,
        history: &[AttemptRecord],
        rng: &mut dyn RngCore,
    ) -> Result<GeneratedProblem, GenerationError> {
        let mut rng = rng;
        let candidates = self.templates.for_kind_nearest(&self.topic, difficulty);
        let ordered =
            self.selector
                .order_candidates(&candidates, &[], history, Utc::now(), &mut rng)?;
        self.materializer.materialize_first(&ordered, &mut rng)
    }
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn ProblemGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `TemplateGenerator` per template type tag in the bank.
    pub fn from_templates(
        templates: Arc<TemplateRegistry>,
        materializer: Arc<Materializer>,
        selector: TemplateSelector,
    ) -> Self {
        let mut registry = Self::new();
        for kind in templates.kinds() {
            registry.register(Arc::new(TemplateGenerator::new(
                kind,
                Arc::clone(&templates),
                Arc::clone(&materializer),
                selector.clone(),
            )));
        }
        registry
    }

    /// Replaces any generator previously registered for the same topic.
    pub fn register(&mut self, generator: Arc<dyn ProblemGenerator>) {
        let topic = generator.topic().to_string();
        if self.generators.insert(topic.clone(), generator).is_some() {
            tracing::debug!(topic = %topic, "generator replaced");
        }
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn ProblemGenerator>> {
        self.generators.get(topic).cloned()
    }

    pub fn topics(&self) -> BTreeSet<String> {
        self.generators.keys().cloned().collect()
    }

    pub fn generate<R: Rng>(
        &self,
        topic: &str,
        difficulty: u8,
        history: &[AttemptRecord],
        rng: &mut R,
    ) -> Result<GeneratedProblem, GenerationError> {
        let generator = self
            .generators
            .get(topic)
            .ok_or_else(|| GenerationError::UnknownGenerator(topic.to_string()))?;
        generator.generate(difficulty, history, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::io::Write;

    fn template_json(id: &str, kind: &str, difficulty: u8) -> String {
        format!(
            r#"{{"id": "{id}", "type": "{kind}", "structure": "{{a}} + {{b}}",
                "variables": {{"a": {{"min": 1, "max": 9}}, "b": {{"min": 1, "max": 9}}}},
                "answerFormula": "a + b", "difficulty": {difficulty},
                "strand": "numbers", "subStrand": "{kind}", "skills": ["{kind}-skill"]}}"#
        )
    }

    #[test]
    fn test_bundled_bank_is_valid() {
        let registry = TemplateRegistry::bundled().unwrap();
        assert!(registry.len() >= 10);
        assert!(registry.kinds().contains("addition"));
        assert!(!registry.for_sub_strand("addition", 1).is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = format!("[{}, {}]", template_json("t1", "addition", 1), template_json("t1", "addition", 2));
        assert!(matches!(
            TemplateRegistry::from_json_str(&raw),
            Err(RegistryError::Duplicate(id)) if id == "t1"
        ));
    }

    #[test]
    fn test_unknown_formula_variable_rejected() {
        let raw = format!("[{}]", template_json("t1", "addition", 1)).replace("a + b\"", "a + c\"");
        let err = TemplateRegistry::from_json_str(&raw).err().unwrap();
        assert!(err.to_string().contains("unknown variable c"));
    }

    #[test]
    fn test_unknown_inline_variable_rejected() {
        let with_explanation = |line: &str| {
            format!("[{}]", template_json("t1", "addition", 1)).replace(
                r#""answerFormula""#,
                &format!(r#""explanation": ["{line}"], "answerFormula""#),
            )
        };

        let raw = with_explanation("{a} + {b} = {=a + bb}");
        let err = TemplateRegistry::from_json_str(&raw).err().unwrap();
        assert!(err.to_string().contains("unknown variable bb"), "{err}");

        let raw = with_explanation("{a} + {b} = {=answer - a + b}");
        assert_eq!(TemplateRegistry::from_json_str(&raw).unwrap().len(), 1);
    }

    #[test]
    fn test_deeply_nested_formula_rejected() {
        let nested = format!("{}a + b{}", "(".repeat(5_000), ")".repeat(5_000));
        let raw = format!("[{}]", template_json("t1", "addition", 1))
            .replace("\"a + b\"", &format!("\"{nested}\""));
        let err = TemplateRegistry::from_json_str(&raw).err().unwrap();
        assert!(err.to_string().contains("nests deeper"), "{err}");
    }

    #[test]
    fn test_wrapped_bank_and_nearest_kind() {
        let raw = format!(
            r#"{{"templates": [{}, {}, {}]}}"#,
            template_json("easy", "addition", 1),
            template_json("hard", "addition", 4),
            template_json("sub", "subtraction", 2)
        );
        let registry = TemplateRegistry::from_json_str(&raw).unwrap();
        let nearest: Vec<_> = registry
            .for_kind_nearest("addition", 2)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(nearest, vec!["easy"]);
        assert!(registry.for_kind_nearest("division", 2).is_empty());
        assert_eq!(registry.get("sub").unwrap().kind, "subtraction");
    }

    #[test]
    fn test_failed_replace_keeps_old_index() {
        let registry = TemplateRegistry::from_json_str(&format!("[{}]", template_json("a1", "addition", 1))).unwrap();
        let mut bad: ProblemTemplate = serde_json::from_str(&template_json("b1", "addition", 9)).unwrap();
        bad.difficulty = 9;
        assert!(registry.replace(vec![bad]).is_err());
        assert!(registry.get("a1").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_and_refresh_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[{}]", template_json("first", "addition", 1)).unwrap();
        file.flush().unwrap();

        let registry = TemplateRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 1);

        std::fs::write(
            file.path(),
            format!("[{}, {}]", template_json("first", "addition", 1), template_json("second", "addition", 2)),
        )
        .unwrap();
        assert_eq!(registry.refresh().unwrap(), 2);
        assert!(registry.get("second").is_some());

        assert!(matches!(
            TemplateRegistry::default().refresh(),
            Err(RegistryError::NoSource)
        ));
    }

    #[test]
    fn test_generator_registry_dispatch() {
        let templates = Arc::new(TemplateRegistry::bundled().unwrap());
        let registry = GeneratorRegistry::from_templates(
            Arc::clone(&templates),
            Arc::new(Materializer::default()),
            TemplateSelector::default(),
        );
        assert_eq!(registry.topics(), templates.kinds());

        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let problem = registry.generate("addition", 1, &[], &mut rng).unwrap();
        assert_eq!(problem.kind, "addition");

        assert!(matches!(
            registry.generate("calculus", 1, &[], &mut rng),
            Err(GenerationError::UnknownGenerator(_))
        ));
    }

    struct FixedGenerator;

    impl ProblemGenerator for FixedGenerator {
        fn topic(&self) -> &str {
            "fixed"
        }

        fn generate(
            &self,
            difficulty: u8,
            _history: &[AttemptRecord],
            _rng: &mut dyn RngCore,
        ) -> Result<GeneratedProblem, GenerationError> {
            let template: ProblemTemplate = serde_json::from_str(&template_json("fixed-1", "fixed", difficulty)).unwrap();
            Materializer::default().materialize(&template, Some(0))
        }
    }

    #[test]
    fn test_custom_generator_registration() {
        let mut registry = GeneratorRegistry::new();
        registry.register(Arc::new(FixedGenerator));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let problem = registry.generate("fixed", 3, &[], &mut rng).unwrap();
        assert_eq!(problem.template_id, "fixed-1");
        assert_eq!(problem.difficulty, 3);
    }
}
