use std::path::PathBuf;
use std::str::FromStr;

use crate::generator::materializer::DEFAULT_MAX_ATTEMPTS;
use crate::generator::sampler::DEFAULT_MAX_RETRIES;
use crate::generator::MaterializerConfig;

pub const DEFAULT_SUB_STRAND: &str = "addition";
pub const DEFAULT_PROBLEM_COUNT: usize = 5;
pub const DEFAULT_LOG_DIR: &str = "./logs";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub log_level: String,
    /// Set when `ENABLE_FILE_LOGS` is on; `LOG_DIR` overrides the location.
    pub log_dir: Option<PathBuf>,
    pub max_attempts: u32,
    pub sample_retries: u32,
    /// External template bank; the bundled bank is used when unset.
    pub template_bank: Option<PathBuf>,
    pub sub_strand: String,
    pub problem_count: usize,
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sample_retries: DEFAULT_MAX_RETRIES,
            template_bank: None,
            sub_strand: DEFAULT_SUB_STRAND.to_string(),
            problem_count: DEFAULT_PROBLEM_COUNT,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset values take the default;
    /// unparsable or out-of-range values are logged and take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let file_logs = lookup("ENABLE_FILE_LOGS").is_some_and(|v| v == "true" || v == "1");
        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_dir: file_logs.then(|| {
                lookup("LOG_DIR")
                    .filter(|v| !v.trim().is_empty())
                    .map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from)
            }),
            max_attempts: positive(&lookup, "PRACTICE_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            sample_retries: positive(&lookup, "PRACTICE_SAMPLE_RETRIES")
                .unwrap_or(defaults.sample_retries),
            template_bank: lookup("PRACTICE_TEMPLATE_BANK")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sub_strand: lookup("PRACTICE_SUB_STRAND")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.sub_strand),
            problem_count: parsed(&lookup, "PRACTICE_COUNT").unwrap_or(defaults.problem_count),
            seed: parsed(&lookup, "PRACTICE_SEED"),
        }
    }

    pub fn materializer_config(&self) -> MaterializerConfig {
        MaterializerConfig {
            max_attempts: self.max_attempts,
            max_sample_retries: self.sample_retries,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "unparsable setting, using default");
            None
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    let value = parsed::<u32>(lookup, key)?;
    if value == 0 {
        tracing::warn!(key, value, "setting must be positive, using default");
        return None;
    }
    Some(value)
}
