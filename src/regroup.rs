//! Recipient regrouping by continent or income level.

use crate::aggregator::aggregate_excluding;
use crate::error::{OdaError, Result};
use crate::models::{parse_code_map, Column, FlowTable};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

pub const AFRICA: &str = "Africa";
pub const OTHER_REGIONS: &str = "Other regions";
pub const OTHER_CONTINENT: &str = "Other";
pub const LOW_INCOME: &str = "Low income";
pub const OTHER_INCOME: &str = "Other income levels";
pub const NOT_CLASSIFIED: &str = "Not classified by income level";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Continent,
    IncomeLevel,
}

/// Maps a recipient code to a category label.
pub trait CodeLookup {
    fn lookup(&self, code: i64, category: Category) -> Option<String>;
}

/// In-memory lookup, usually loaded from a `code,continent,income_level` CSV file.
#[derive(Debug, Clone, Default)]
pub struct MapLookup {
    continents: HashMap<i64, String>,
    income_levels: HashMap<i64, String>,
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    code: i64,
    continent: Option<String>,
    income_level: Option<String>,
}

impl MapLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut lookup = Self::new();
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        for row in csv_reader.deserialize() {
            let row: LookupRow = row?;
            if let Some(continent) = row.continent.filter(|c| !c.is_empty()) {
                lookup.continents.insert(row.code, continent);
            }
            if let Some(income) = row.income_level.filter(|i| !i.is_empty()) {
                lookup.income_levels.insert(row.code, income);
            }
        }
        debug!(
            "loaded {} continent and {} income level codes",
            lookup.continents.len(),
            lookup.income_levels.len()
        );
        Ok(lookup)
    }
}

#[cfg(test)]
impl MapLookup {
    pub fn with_continent(mut self, code: i64, continent: &str) -> Self {
        self.continents.insert(code, continent.to_string());
        self
    }

    pub fn with_income_level(mut self, code: i64, income_level: &str) -> Self {
        self.income_levels.insert(code, income_level.to_string());
        self
    }
}

impl CodeLookup for MapLookup {
    fn lookup(&self, code: i64, category: Category) -> Option<String> {
        match category {
            Category::Continent => self.continents.get(&code).cloned(),
            Category::IncomeLevel => self.income_levels.get(&code).cloned(),
        }
    }
}

/// Continent labels for regional and administrative codes the standard lookup does not cover.
/// These take precedence over the lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionOverrides {
    continents: BTreeMap<i64, String>,
}

impl RegionOverrides {
    pub fn new(continents: BTreeMap<i64, String>) -> Self {
        Self { continents }
    }

    pub fn from_config(raw: &BTreeMap<String, String>) -> Self {
        Self::new(parse_code_map(raw))
    }

    pub fn get(&self, code: i64) -> Option<&str> {
        self.continents.get(&code).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Africa / Other regions
    ContinentBinary,
    /// Africa, Europe, America, Asia, Oceania, Other
    ContinentMulti,
    /// Low income / Other income levels
    IncomeBinary,
    IncomeCategorical,
}

impl Scheme {
    /// The lookup category the scheme labels by. Two schemes of the same
    /// category share labels and cannot be pivoted together.
    pub fn category(&self) -> Category {
        match self {
            Scheme::ContinentBinary | Scheme::ContinentMulti => Category::Continent,
            Scheme::IncomeBinary | Scheme::IncomeCategorical => Category::IncomeLevel,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scheme::ContinentBinary => "continent_binary",
            Scheme::ContinentMulti => "continent_multi",
            Scheme::IncomeBinary => "income_binary",
            Scheme::IncomeCategorical => "income_categorical",
        }
    }
}

impl FromStr for Scheme {
    type Err = OdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "continent_binary" => Ok(Scheme::ContinentBinary),
            "continent_multi" => Ok(Scheme::ContinentMulti),
            "income_binary" => Ok(Scheme::IncomeBinary),
            "income_categorical" => Ok(Scheme::IncomeCategorical),
            other => Err(OdaError::InvalidConfig(format!("unknown recipient scheme: {}", other))),
        }
    }
}

/// Labels given to recipients a scheme cannot place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientLabels {
    /// `continent_binary`: anything outside Africa.
    pub other_regions: String,
    /// `continent_multi`: no continent known.
    pub other_continent: String,
    /// `income_binary`: anything not low income.
    pub other_income: String,
    /// `income_categorical`: no income level known.
    pub not_classified: String,
}

impl Default for RecipientLabels {
    fn default() -> Self {
        Self {
            other_regions: OTHER_REGIONS.to_string(),
            other_continent: OTHER_CONTINENT.to_string(),
            other_income: OTHER_INCOME.to_string(),
            not_classified: NOT_CLASSIFIED.to_string(),
        }
    }
}

/// Category label for one recipient code. Misses fall back to the matching entry of `fallback`.
pub fn recipient_label(
    scheme: Scheme,
    code: Option<i64>,
    lookup: &dyn CodeLookup,
    overrides: &RegionOverrides,
    fallback: &RecipientLabels,
) -> String {
    let continent = || {
        code.and_then(|c| {
            overrides
                .get(c)
                .map(str::to_string)
                .or_else(|| lookup.lookup(c, Category::Continent))
        })
    };
    let income = || code.and_then(|c| lookup.lookup(c, Category::IncomeLevel));

    match scheme {
        Scheme::ContinentBinary => match continent() {
            Some(c) if c == AFRICA => AFRICA.to_string(),
            _ => fallback.other_regions.clone(),
        },
        Scheme::ContinentMulti => continent().unwrap_or_else(|| fallback.other_continent.clone()),
        Scheme::IncomeBinary => match income() {
            Some(i) if i == LOW_INCOME => LOW_INCOME.to_string(),
            _ => fallback.other_income.clone(),
        },
        Scheme::IncomeCategorical => income().unwrap_or_else(|| fallback.not_classified.clone()),
    }
}

/// Replace recipient codes by category labels and re-aggregate.
///
/// The result is grouped by `recipient` plus every other schema column; the
/// recipient code column is consumed.
pub fn regroup(
    table: &FlowTable,
    scheme: Scheme,
    lookup: &dyn CodeLookup,
    overrides: &RegionOverrides,
    fallback: &RecipientLabels,
) -> FlowTable {
    let mut labelled = table.clone();
    for record in &mut labelled.records {
        record.recipient = Some(recipient_label(
            scheme,
            record.recipient_code,
            lookup,
            overrides,
            fallback,
        ));
    }
    labelled.columns.insert(Column::Recipient);

    let grouped = aggregate_excluding(&labelled, &[Column::RecipientCode]);
    debug!(
        "regrouped {} records into {} rows by {}",
        table.len(),
        grouped.len(),
        scheme.name()
    );
    grouped
}
