//! Themed vocabulary and price lookups for word problems.
//!
//! Every lookup is a pure function of the static theme data and the caller's
//! random source, so a seeded RNG reproduces the same wording.

pub mod data;

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use self::data::{PriceBand, ThemeData, NAMES, THEMES};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThemeError {
    #[error("unknown theme: {0}")]
    UnknownTheme(String),
    #[error("theme {theme} has no subcategory {subcategory}")]
    UnknownSubcategory { theme: String, subcategory: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl From<&PriceBand> for PriceRange {
    fn from(band: &PriceBand) -> Self {
        Self {
            min: band.min,
            max: band.max,
            step: band.step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeTemplate {
    pub name: String,
    pub currency: bool,
    pub nouns: Vec<String>,
    pub verbs: Vec<String>,
    pub locations: Vec<String>,
    pub prices: BTreeMap<String, PriceRange>,
}

pub fn theme(name: &str) -> Result<&'static ThemeData, ThemeError> {
    let wanted = name.trim();
    THEMES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ThemeError::UnknownTheme(name.to_string()))
}

pub fn theme_names() -> impl Iterator<Item = &'static str> {
    THEMES.iter().map(|t| t.name)
}

pub fn is_currency_theme(name: &str) -> Result<bool, ThemeError> {
    theme(name).map(|t| t.currency)
}

/// Up to `count` distinct nouns drawn from every subcategory of the theme.
pub fn items<R: Rng>(name: &str, count: usize, rng: &mut R) -> Result<Vec<String>, ThemeError> {
    items_in(name, None, count, rng)
}

/// Uniform draw without replacement; returns everything available when the pool is short.
pub fn items_in<R: Rng>(
    name: &str,
    subcategory: Option<&str>,
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>, ThemeError> {
    let data = theme(name)?;
    let mut pool: Vec<&'static str> = Vec::new();
    match subcategory {
        Some(sub) => {
            let group = data
                .nouns
                .iter()
                .find(|g| g.subcategory.eq_ignore_ascii_case(sub))
                .ok_or_else(|| ThemeError::UnknownSubcategory {
                    theme: data.name.to_string(),
                    subcategory: sub.to_string(),
                })?;
            pool.extend(group.nouns.iter().copied());
        }
        None => {
            for group in data.nouns {
                for noun in group.nouns {
                    if !pool.contains(noun) {
                        pool.push(noun);
                    }
                }
            }
        }
    }
    Ok(draw_distinct(&mut pool, count, rng))
}

pub fn price<R: Rng>(name: &str, subcategory: Option<&str>, rng: &mut R) -> Result<f64, ThemeError> {
    let data = theme(name)?;
    let band = match subcategory {
        Some(sub) => data
            .prices
            .iter()
            .find(|b| b.subcategory.eq_ignore_ascii_case(sub))
            .ok_or_else(|| ThemeError::UnknownSubcategory {
                theme: data.name.to_string(),
                subcategory: sub.to_string(),
            })?,
        None if data.prices.is_empty() => {
            return Err(ThemeError::UnknownSubcategory {
                theme: data.name.to_string(),
                subcategory: "prices".to_string(),
            })
        }
        None => &data.prices[rng.random_range(0..data.prices.len())],
    };

    let steps = ((band.max - band.min) / band.step).floor() as u64;
    let k = rng.random_range(0..=steps);
    let value = band.min + k as f64 * band.step;
    Ok((value * 100.0).round() / 100.0)
}

pub fn template(name: &str) -> Result<ThemeTemplate, ThemeError> {
    let data = theme(name)?;
    let mut nouns = Vec::new();
    for group in data.nouns {
        for noun in group.nouns {
            if !nouns.iter().any(|n: &String| n == noun) {
                nouns.push(noun.to_string());
            }
        }
    }

    Ok(ThemeTemplate {
        name: data.name.to_string(),
        currency: data.currency,
        nouns,
        verbs: data.verbs.iter().map(|v| v.to_string()).collect(),
        locations: data.locations.iter().map(|l| l.to_string()).collect(),
        prices: data
            .prices
            .iter()
            .map(|band| (band.subcategory.to_string(), PriceRange::from(band)))
            .collect(),
    })
}

pub fn verb<R: Rng>(name: &str, rng: &mut R) -> Result<String, ThemeError> {
    let data = theme(name)?;
    Ok(pick(data.verbs, rng))
}

pub fn location<R: Rng>(name: &str, rng: &mut R) -> Result<String, ThemeError> {
    let data = theme(name)?;
    Ok(pick(data.locations, rng))
}

pub fn names<R: Rng>(count: usize, rng: &mut R) -> Vec<String> {
    let mut pool: Vec<&'static str> = NAMES.to_vec();
    draw_distinct(&mut pool, count, rng)
}

fn pick<R: Rng>(pool: &[&'static str], rng: &mut R) -> String {
    if pool.is_empty() {
        return String::new();
    }
    pool[rng.random_range(0..pool.len())].to_string()
}

fn draw_distinct<R: Rng>(pool: &mut [&'static str], count: usize, rng: &mut R) -> Vec<String> {
    let amount = count.min(pool.len());
    let (chosen, _) = pool.partial_shuffle(rng, amount);
    chosen.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn test_unknown_theme() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            items("space", 2, &mut rng),
            Err(ThemeError::UnknownTheme("space".to_string()))
        );
        assert!(matches!(template("space"), Err(ThemeError::UnknownTheme(_))));
        assert!(matches!(price("space", None, &mut rng), Err(ThemeError::UnknownTheme(_))));
    }

    #[test]
    fn test_items_are_distinct() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let drawn = items("market", 4, &mut rng).unwrap();
            assert_eq!(drawn.len(), 4);
            let unique: HashSet<_> = drawn.iter().collect();
            assert_eq!(unique.len(), 4);
        }
    }

    #[test]
    fn test_items_short_pool_returns_all() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let drawn = items_in("transport", Some("tickets"), 10, &mut rng).unwrap();
        assert_eq!(drawn.len(), 3);
    }

    #[test]
    fn test_unknown_subcategory() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let err = price("shopping", Some("jewellery"), &mut rng).unwrap_err();
        assert!(matches!(err, ThemeError::UnknownSubcategory { .. }));
    }

    #[test]
    fn test_price_within_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let value = price("shopping", Some("stationery"), &mut rng).unwrap();
            assert!((5.0..=60.0).contains(&value));
            assert!(((value * 2.0) - (value * 2.0).round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_items() {
        let a = items("farm", 3, &mut ChaCha8Rng::seed_from_u64(99)).unwrap();
        let b = items("farm", 3, &mut ChaCha8Rng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_template_lookup_is_case_insensitive() {
        let t = template("Shopping").unwrap();
        assert!(t.currency);
        assert!(t.nouns.contains(&"pencil".to_string()));
        assert!(t.prices.contains_key("toys"));
        assert!(!is_currency_theme("farm").unwrap());
    }
}
