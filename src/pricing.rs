//! # Pricing Module
//!
//! Maps model identifiers to per-token rates and turns a usage block into
//! [`UsageMetrics`].
//!
//! ## Resolution order
//!
//! 1. Exact catalogue match on the raw identifier
//! 2. Case-folded identifier, exact match, then family substring
//!    (`opus`, `sonnet`, `haiku`); the most recently dated variant of the
//!    family supplies the rate
//! 3. Anything else gets the default family rate and a one-time warning
//!
//! ## Cost
//!
//! `(new_input + cache_creation) * input + cache_read * input * 0.1 + output * output_rate`.
//! Costs are never rounded here.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::warn;

use crate::models::{RawUsage, UsageMetrics};

/// Cache reads are billed at a tenth of the full input rate.
pub const CACHE_READ_MULTIPLIER: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricingRate {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl PricingRate {
    /// Build from catalogue values quoted in USD per million tokens.
    pub fn per_million(input: f64, output: f64) -> Self {
        PricingRate {
            input_per_token: input / 1_000_000.0,
            output_per_token: output / 1_000_000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Opus,
    Sonnet,
    Haiku,
}

impl Family {
    /// Catalogue order, also the tie-break order for ambiguous matches.
    pub const ALL: [Family; 3] = [Family::Opus, Family::Sonnet, Family::Haiku];

    pub fn pattern(self) -> &'static str {
        match self {
            Family::Opus => "opus",
            Family::Sonnet => "sonnet",
            Family::Haiku => "haiku",
        }
    }
}

/// Family used when nothing matches.
pub const DEFAULT_FAMILY: Family = Family::Sonnet;

#[derive(Clone, Debug)]
pub struct CatalogueEntry {
    pub model: &'static str,
    pub family: Family,
    /// Release date, `YYYYMMDD`
    pub released: u32,
    pub rate: PricingRate,
}

static CATALOGUE: Lazy<Vec<CatalogueEntry>> = Lazy::new(|| {
    let e = |model, family, released, input, output| CatalogueEntry {
        model,
        family,
        released,
        rate: PricingRate::per_million(input, output),
    };
    vec![
        e("claude-3-opus-20240229", Family::Opus, 20240229, 15.0, 75.0),
        e("claude-opus-4-20250514", Family::Opus, 20250514, 15.0, 75.0),
        e("claude-opus-4-1-20250805", Family::Opus, 20250805, 15.0, 75.0),
        e("claude-3-5-sonnet-20240620", Family::Sonnet, 20240620, 3.0, 15.0),
        e("claude-3-5-sonnet-20241022", Family::Sonnet, 20241022, 3.0, 15.0),
        e("claude-3-7-sonnet-20250219", Family::Sonnet, 20250219, 3.0, 15.0),
        e("claude-sonnet-4-20250514", Family::Sonnet, 20250514, 3.0, 15.0),
        e("claude-sonnet-4-5-20250929", Family::Sonnet, 20250929, 3.0, 15.0),
        e("claude-3-haiku-20240307", Family::Haiku, 20240307, 0.25, 1.25),
        e("claude-3-5-haiku-20241022", Family::Haiku, 20241022, 0.8, 4.0),
        e("claude-haiku-4-5-20251001", Family::Haiku, 20251001, 1.0, 5.0),
    ]
});

/// Newest catalogue entry of a family.
pub fn latest_in_family(family: Family) -> Option<&'static CatalogueEntry> {
    CATALOGUE
        .iter()
        .filter(|e| e.family == family)
        .max_by_key(|e| e.released)
}

/// How a rate was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateSource {
    Exact,
    Family(Family),
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    pub rate: PricingRate,
    pub source: RateSource,
}

/// Rate lookup plus per-record metric computation.
///
/// Holds the set of model strings already warned about so each unknown or
/// ambiguous model is logged once per resolver.
#[derive(Debug, Default)]
pub struct PricingResolver {
    warned: Mutex<HashSet<String>>,
}

impl PricingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, model: &str) -> PricingRate {
        self.resolve_detailed(model).rate
    }

    pub fn resolve_detailed(&self, model: &str) -> Resolution {
        if let Some(entry) = CATALOGUE.iter().find(|e| e.model == model) {
            return Resolution {
                rate: entry.rate,
                source: RateSource::Exact,
            };
        }

        let m = model.to_lowercase();
        if let Some(entry) = CATALOGUE.iter().find(|e| e.model == m) {
            return Resolution {
                rate: entry.rate,
                source: RateSource::Exact,
            };
        }

        let matched: Vec<Family> = Family::ALL
            .into_iter()
            .filter(|f| m.contains(f.pattern()))
            .collect();

        let family = match matched.as_slice() {
            [] => None,
            [only] => Some(*only),
            many => {
                // Newest catalogued variant wins; max_by_key keeps the last max,
                // so iterate in reverse to let catalogue order break ties.
                let pick = many
                    .iter()
                    .rev()
                    .copied()
                    .max_by_key(|f| latest_in_family(*f).map(|e| e.released).unwrap_or(0));
                if let Some(f) = pick {
                    self.warn_once(model, || {
                        warn!(
                            model = model,
                            families = ?many,
                            chosen = ?f,
                            "Ambiguous model family, using most recently catalogued"
                        )
                    });
                }
                pick
            }
        };

        if let Some(f) = family {
            if let Some(entry) = latest_in_family(f) {
                return Resolution {
                    rate: entry.rate,
                    source: RateSource::Family(f),
                };
            }
        }

        self.warn_once(model, || {
            warn!(
                model = model,
                default = ?DEFAULT_FAMILY,
                "Unknown model, using default pricing"
            )
        });
        Resolution {
            rate: default_rate(),
            source: RateSource::Default,
        }
    }

    /// Metrics for one usage block. A missing model gets the default rate
    /// without a warning; missing counters are zero.
    pub fn compute(&self, usage: &RawUsage, model: Option<&str>) -> UsageMetrics {
        let rate = match model {
            Some(m) => self.resolve(m),
            None => default_rate(),
        };
        metrics_with_rate(usage, rate)
    }

    fn warn_once(&self, model: &str, emit: impl FnOnce()) {
        let first = match self.warned.lock() {
            Ok(mut set) => set.insert(model.to_string()),
            Err(_) => true,
        };
        if first {
            emit();
        }
    }
}

pub fn default_rate() -> PricingRate {
    latest_in_family(DEFAULT_FAMILY)
        .map(|e| e.rate)
        .unwrap_or_else(|| PricingRate::per_million(3.0, 15.0))
}

pub fn metrics_with_rate(usage: &RawUsage, rate: PricingRate) -> UsageMetrics {
    let new_input = usage.input_tokens.unwrap_or(0);
    let output = usage.output_tokens.unwrap_or(0);
    let cache_creation = usage.cache_creation_input_tokens.unwrap_or(0);
    let cache_read = usage.cache_read_input_tokens.unwrap_or(0);

    let cost = (new_input as f64 + cache_creation as f64) * rate.input_per_token
        + cache_read as f64 * rate.input_per_token * CACHE_READ_MULTIPLIER
        + output as f64 * rate.output_per_token;

    UsageMetrics {
        new_input_tokens: new_input,
        cache_creation_tokens: cache_creation,
        cache_read_tokens: cache_read,
        output_tokens: output,
        total_tokens: new_input
            .saturating_add(cache_creation)
            .saturating_add(cache_read)
            .saturating_add(output),
        cost,
    }
}
