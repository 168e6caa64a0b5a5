//! Loader for the awards dataset a new game's categories are cloned from.

use std::path::Path;

use anyhow::{bail, Context};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::ledger::MAX_ODDS;

const MORE_INFO_MARKER: &str = "(more info)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCategory {
    pub name: String,
    pub nominees: Vec<CatalogNominee>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogNominee {
    pub name: String,
    pub odds: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub categories: Vec<CatalogCategory>,
}

// Shape of the scraped predictions file.
#[derive(Deserialize)]
struct RawCategory {
    category: String,
    predictions: Vec<RawNominee>,
}

#[derive(Deserialize)]
struct RawNominee {
    name: Option<String>,
    actor: Option<String>,
    movie: Option<String>,
    #[serde(default)]
    odds: Option<String>,
}

impl RawNominee {
    fn display_name(&self) -> Option<String> {
        [&self.actor, &self.movie, &self.name]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }
}

impl Catalog {
    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        let raw: Vec<RawCategory> = serde_json::from_str(contents).context("malformed catalog")?;

        let mut categories = Vec::with_capacity(raw.len());
        for category in raw {
            let name = clean_category_name(&category.category);
            if name.is_empty() {
                bail!("catalog category without a name");
            }
            let nominees = category
                .predictions
                .iter()
                .map(|nominee| {
                    let name = nominee
                        .display_name()
                        .with_context(|| format!("nominee without a name in {name}"))?;
                    Ok(CatalogNominee {
                        name,
                        odds: fractional_to_decimal(nominee.odds.as_deref().unwrap_or_default()),
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            categories.push(CatalogCategory { name, nominees });
        }

        if categories.is_empty() {
            bail!("catalog contains no categories");
        }
        Ok(Self { categories })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog from {}", path.display()))?;
        Self::from_json(&contents)
    }
}

fn clean_category_name(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().rfind(MORE_INFO_MARKER) {
        Some(idx) => trimmed[..idx].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Convert bookmaker odds such as `"5/2"` into a total-return multiplier
/// (`3.50`). Anything unparseable falls back to even money.
pub fn fractional_to_decimal(odds: &str) -> Decimal {
    let fallback = Decimal::TWO;
    let Some((numerator, denominator)) = odds.trim().split_once('/') else {
        return fallback;
    };
    let (Ok(numerator), Ok(denominator)) = (
        numerator.trim().parse::<Decimal>(),
        denominator.trim().parse::<Decimal>(),
    ) else {
        return fallback;
    };
    if numerator <= Decimal::ZERO || denominator <= Decimal::ZERO {
        return fallback;
    }
    numerator
        .checked_div(denominator)
        .and_then(|ratio| ratio.checked_add(Decimal::ONE))
        .map(|odds| odds.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .filter(|odds| *odds <= Decimal::from(MAX_ODDS))
        .unwrap_or(fallback)
}
