use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Builder;

use crate::context::{self, ThemeError};
use crate::generator::formula::{CompiledRules, ExpressionError, Formula};
use crate::generator::sampler::{ConstraintSampler, DEFAULT_MAX_RETRIES};
use crate::generator::GenerationError;
use crate::selector::SelectionError;
use crate::types::{format_number, GeneratedProblem, ProblemTemplate, ValueFormat};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializerConfig {
    pub max_attempts: u32,
    pub max_sample_retries: u32,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_sample_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Materializer {
    config: MaterializerConfig,
    sampler: ConstraintSampler,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(MaterializerConfig::default())
    }
}

impl Materializer {
    pub fn new(config: MaterializerConfig) -> Self {
        let sampler = ConstraintSampler::new(config.max_sample_retries);
        Self {
            config: MaterializerConfig {
                max_attempts: config.max_attempts.max(1),
                ..config
            },
            sampler,
        }
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    pub fn materialize(
        &self,
        template: &ProblemTemplate,
        seed: Option<u64>,
    ) -> Result<GeneratedProblem, GenerationError> {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        self.materialize_with(template, &mut rng)
    }

    pub fn materialize_with<R: Rng>(
        &self,
        template: &ProblemTemplate,
        rng: &mut R,
    ) -> Result<GeneratedProblem, GenerationError> {
        let malformed = |source: ExpressionError| GenerationError::MalformedTemplate {
            template_id: template.id.clone(),
            source,
        };
        let formula = Formula::parse(&template.answer_formula).map_err(malformed)?;
        let rules = template
            .validation
            .as_ref()
            .map(CompiledRules::compile)
            .transpose()
            .map_err(malformed)?;
        let slots = ContextSlots::scan(template);

        for attempt in 1..=self.config.max_attempts {
            let mut variables = self.sampler.sample(&template.variables, rng).map_err(|source| {
                GenerationError::DegenerateConstraint {
                    template_id: template.id.clone(),
                    source,
                }
            })?;

            let themed = draw_context(template, &slots, rng)?;
            if let (Some(name), Some(price)) = (
                template.context.as_ref().and_then(|c| c.price_variable.as_ref()),
                themed.price,
            ) {
                variables.insert(name.clone(), price);
            }

            let answer = match formula.evaluate(&variables) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(template_id = %template.id, attempt, error = %err, "sample rejected by formula");
                    continue;
                }
            };

            if let Some(rules) = &rules {
                if let Err(violation) = rules.check(answer, &variables) {
                    tracing::debug!(template_id = %template.id, attempt, reason = %violation, "sample rejected by validation");
                    continue;
                }
            }

            let renderer = Renderer {
                template,
                variables: &variables,
                answer,
                context: &themed.values,
            };
            let rendered = renderer.render(&template.structure).and_then(|text| {
                template
                    .explanation
                    .iter()
                    .map(|line| renderer.render(line))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|explanation| (text, explanation))
            });
            let (text, explanation) = match rendered {
                Ok(parts) => parts,
                Err(err) => {
                    tracing::debug!(template_id = %template.id, attempt, error = %err, "sample rejected while rendering");
                    continue;
                }
            };

            return Ok(GeneratedProblem {
                id: Builder::from_random_bytes(rng.random()).into_uuid(),
                template_id: template.id.clone(),
                kind: template.kind.clone(),
                text,
                answer_text: template.answer_format.render(answer),
                variables,
                answer,
                explanation,
                difficulty: template.difficulty,
                strand: template.strand.clone(),
                sub_strand: template.sub_strand.clone(),
                skills: template.skills.clone(),
                context: themed.values,
            });
        }

        tracing::warn!(
            template_id = %template.id,
            attempts = self.config.max_attempts,
            "template exhausted its sampling attempts"
        );
        Err(GenerationError::UnsatisfiableTemplate {
            template_id: template.id.clone(),
            attempts: self.config.max_attempts,
        })
    }

    /// Materializes the first candidate that succeeds, moving past
    /// template-specific failures. Other errors abort immediately.
    pub fn materialize_first<R: Rng>(
        &self,
        candidates: &[&ProblemTemplate],
        rng: &mut R,
    ) -> Result<GeneratedProblem, GenerationError> {
        let mut last_error = None;
        for template in candidates {
            match self.materialize_with(template, rng) {
                Ok(problem) => return Ok(problem),
                Err(err) if err.is_template_specific() => {
                    tracing::warn!(template_id = %template.id, error = %err, "falling back to next candidate");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(GenerationError::Selection(SelectionError::EmptyCandidateSet)))
    }
}

/// Theme placeholders a template asks for across its structure and explanation lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ContextSlots {
    items: usize,
    names: usize,
    verb: bool,
    location: bool,
    price: bool,
}

impl ContextSlots {
    fn scan(template: &ProblemTemplate) -> Self {
        let mut slots = Self::default();
        let texts = std::iter::once(template.structure.as_str())
            .chain(template.explanation.iter().map(String::as_str));
        for text in texts {
            for key in placeholders(text) {
                match key {
                    "item" | "noun" => slots.items = slots.items.max(1),
                    "name" => slots.names = slots.names.max(1),
                    "verb" => slots.verb = true,
                    "location" => slots.location = true,
                    "price" => slots.price = true,
                    _ => {
                        if let Some(n) = indexed(key, "item") {
                            slots.items = slots.items.max(n);
                        } else if let Some(n) = indexed(key, "name") {
                            slots.names = slots.names.max(n);
                        }
                    }
                }
            }
        }
        slots
    }
}

fn indexed(key: &str, prefix: &str) -> Option<usize> {
    key.strip_prefix(prefix)?.parse::<usize>().ok().filter(|n| *n > 0)
}

struct ThemedContext {
    values: BTreeMap<String, String>,
    price: Option<f64>,
}

fn draw_context<R: Rng>(
    template: &ProblemTemplate,
    slots: &ContextSlots,
    rng: &mut R,
) -> Result<ThemedContext, ThemeError> {
    let mut values = BTreeMap::new();
    let mut price = None;

    if slots.names > 0 {
        let drawn = context::names(slots.names, rng);
        for (index, name) in drawn.iter().enumerate() {
            values.insert(format!("name{}", index + 1), name.clone());
        }
        if let Some(first) = drawn.into_iter().next() {
            values.insert("name".to_string(), first);
        }
    }

    let Some(spec) = template.context.as_ref() else {
        return Ok(ThemedContext { values, price });
    };
    let data = context::theme(&spec.theme)?;
    let subcategory = spec.subcategory.as_deref();

    if slots.items > 0 {
        let noun_group = subcategory.filter(|sub| {
            data.nouns.iter().any(|g| g.subcategory.eq_ignore_ascii_case(sub))
        });
        let drawn = context::items_in(data.name, noun_group, slots.items, rng)?;
        for (index, item) in drawn.iter().enumerate() {
            values.insert(format!("item{}", index + 1), item.clone());
        }
        if let Some(first) = drawn.into_iter().next() {
            values.insert("noun".to_string(), first.clone());
            values.insert("item".to_string(), first);
        }
    }
    if slots.verb {
        values.insert("verb".to_string(), context::verb(data.name, rng)?);
    }
    if slots.location {
        values.insert("location".to_string(), context::location(data.name, rng)?);
    }
    if slots.price || spec.price_variable.is_some() {
        let band = subcategory.filter(|sub| {
            data.prices.iter().any(|b| b.subcategory.eq_ignore_ascii_case(sub))
        });
        let value = context::price(data.name, band, rng)?;
        values.insert("price".to_string(), ValueFormat::Currency.render(value));
        price = Some(value);
    }

    Ok(ThemedContext { values, price })
}

struct Renderer<'a> {
    template: &'a ProblemTemplate,
    variables: &'a BTreeMap<String, f64>,
    answer: f64,
    context: &'a BTreeMap<String, String>,
}

impl Renderer<'_> {
    fn render(&self, text: &str) -> Result<String, ExpressionError> {
        substitute(text, |key| self.resolve(key))
    }

    fn resolve(&self, key: &str) -> Result<Option<String>, ExpressionError> {
        if let Some(expression) = key.strip_prefix('=') {
            let mut scope = self.variables.clone();
            scope.insert("answer".to_string(), self.answer);
            let value = Formula::parse(expression)?.evaluate(&scope)?;
            return Ok(Some(format_number(value)));
        }
        if key == "answer" {
            return Ok(Some(self.template.answer_format.render(self.answer)));
        }
        if let Some(value) = self.variables.get(key) {
            return Ok(Some(self.format_of(key).render(*value)));
        }
        Ok(self.context.get(key).cloned())
    }

    fn format_of(&self, variable: &str) -> ValueFormat {
        let is_price = self
            .template
            .context
            .as_ref()
            .and_then(|c| c.price_variable.as_deref())
            == Some(variable);
        if is_price {
            return ValueFormat::Currency;
        }
        self.template
            .variables
            .get(variable)
            .map(|c| c.format)
            .unwrap_or_default()
    }
}

/// Keys of every `{...}` placeholder in `text`, trimmed.
pub fn placeholders(text: &str) -> Vec<&str> {
    let mut keys = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        keys.push(after[..close].trim());
        rest = &after[close + 1..];
    }
    keys
}

/// Replaces placeholders the resolver knows about; unknown ones stay verbatim.
pub fn substitute<F>(text: &str, mut resolve: F) -> Result<String, ExpressionError>
where
    F: FnMut(&str) -> Result<Option<String>, ExpressionError>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        match resolve(after[..close].trim())? {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(&after[..close]);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
