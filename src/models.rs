use crate::classifier::{CovidRules, KeywordRemap};
use crate::error::{OdaError, Result};
use crate::regroup::{RecipientLabels, Scheme};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub start_year: i64,
    pub end_year: i64,
    pub prices: Prices,
    pub currency: String,
    pub base_year: Option<i64>,
    pub donors: Vec<i64>,
    pub export_by_donor: bool,
    pub include_covid_response_sectors: bool,
    pub reports: Vec<String>,
    pub recipient_schemes: Vec<String>,
    /// Blank cells in exported summaries become 0 instead of staying empty.
    pub fill_missing_with_zero: bool,
    /// Donor whose flagged COVID-19 records the `covid_audit` report lists.
    pub audit_donor: i64,
    /// What excluding COVID-19 from imputed multilateral data does with keyword-only matches.
    pub keyword_remap: KeywordRemap,
    // Data source configuration
    pub data_source_mode: DataSourceMode,
    pub data_directory: Option<String>,
    pub base_url: Option<String>,
    pub output_directory: Option<String>,
    pub code_lookup_file: Option<String>,
    pub covid: CovidRules,
    pub recipient_labels: RecipientLabels,
    pub region_overrides: BTreeMap<String, String>,
    pub donor_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "internet")]
    Internet,
    #[serde(rename = "both")]
    Both,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_year: 2015,
            end_year: 2023,
            prices: Prices::Constant,
            currency: "USD".to_string(),
            base_year: Some(2023),
            donors: vec![
                302, // US
                918, // EU Institutions
                7,   // Netherlands
                6,   // Italy
                4,   // France
                5,   // Germany
                301, // Canada
                12,  // UK
            ],
            export_by_donor: false,
            include_covid_response_sectors: false,
            reports: vec![
                "totals".to_string(),
                "donors".to_string(),
                "recipients".to_string(),
            ],
            recipient_schemes: vec!["continent_binary".to_string(), "income_binary".to_string()],
            fill_missing_with_zero: false,
            audit_donor: 918,
            keyword_remap: KeywordRemap::Purpose,
            data_source_mode: DataSourceMode::Local,
            data_directory: Some("raw_data".to_string()),
            base_url: None,
            output_directory: Some("output".to_string()),
            code_lookup_file: Some("raw_data/recipient_codes.csv".to_string()),
            covid: CovidRules::default(),
            recipient_labels: RecipientLabels::default(),
            region_overrides: default_region_overrides(),
            donor_names: default_donor_names(),
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OdaError::InvalidConfig(e.to_string()))?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_year > self.end_year {
            return Err(OdaError::InvalidYearRange {
                start: self.start_year,
                end: self.end_year,
            });
        }
        self.schemes()?;
        Ok(())
    }

    /// Parsed `recipient_schemes`. At most one continent and one income scheme
    /// may be listed, since schemes of the same kind produce the same labels.
    pub fn schemes(&self) -> Result<Vec<Scheme>> {
        let schemes = self
            .recipient_schemes
            .iter()
            .map(|s| s.parse::<Scheme>())
            .collect::<Result<Vec<_>>>()?;
        for (i, scheme) in schemes.iter().enumerate() {
            if let Some(other) = schemes[..i].iter().find(|s| s.category() == scheme.category()) {
                return Err(OdaError::InvalidConfig(format!(
                    "recipient schemes {} and {} overlap; list at most one of each kind",
                    other.name(),
                    scheme.name()
                )));
            }
        }
        Ok(schemes)
    }

    /// Donor code to display name, skipping entries whose key is not a number.
    pub fn donor_name_table(&self) -> BTreeMap<i64, String> {
        parse_code_map(&self.donor_names)
    }
}

/// Turns a TOML string-keyed table into a code map. TOML keys are always
/// strings, so codes are parsed here; entries with non-numeric keys are dropped.
pub fn parse_code_map(raw: &BTreeMap<String, String>) -> BTreeMap<i64, String> {
    raw.iter()
        .filter_map(|(code, label)| {
            code.trim()
                .parse::<i64>()
                .ok()
                .map(|code| (code, label.clone()))
        })
        .collect()
}

fn default_region_overrides() -> BTreeMap<String, String> {
    let entries: [(&[i64], &str); 5] = [
        (&[189, 289, 298, 270, 1027, 1028, 1029, 1030], "Africa"),
        (&[89], "Europe"),
        (&[389, 489, 498, 1031, 1032], "America"),
        (&[589, 619, 679, 689, 789, 798], "Asia"),
        (&[889, 1033, 1034, 1035], "Oceania"),
    ];
    entries
        .iter()
        .flat_map(|(codes, continent)| {
            codes
                .iter()
                .map(move |code| (code.to_string(), continent.to_string()))
        })
        .collect()
}

fn default_donor_names() -> BTreeMap<String, String> {
    [
        (1, "Austria"),
        (2, "Belgium"),
        (3, "Denmark"),
        (4, "France"),
        (5, "Germany"),
        (6, "Italy"),
        (7, "Netherlands"),
        (8, "Norway"),
        (9, "Portugal"),
        (10, "Sweden"),
        (11, "Switzerland"),
        (12, "United Kingdom"),
        (18, "Finland"),
        (20, "Iceland"),
        (21, "Ireland"),
        (22, "Luxembourg"),
        (40, "Greece"),
        (50, "Spain"),
        (61, "Slovenia"),
        (68, "Czechia"),
        (69, "Slovak Republic"),
        (75, "Hungary"),
        (76, "Poland"),
        (301, "Canada"),
        (302, "United States"),
        (701, "Japan"),
        (742, "Korea"),
        (801, "Australia"),
        (820, "New Zealand"),
        (918, "EU Institutions"),
    ]
    .iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Prices {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "constant")]
    Constant,
}

impl Prices {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prices::Current => "current",
            Prices::Constant => "constant",
        }
    }
}

impl FromStr for Prices {
    type Err = OdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(Prices::Current),
            "constant" => Ok(Prices::Constant),
            other => Err(OdaError::InvalidConfig(format!("unknown price basis: {}", other))),
        }
    }
}

impl fmt::Display for Prices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns a flow table can carry. Declaration order is the export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Year,
    Indicator,
    DonorCode,
    DonorName,
    RecipientCode,
    Recipient,
    ProjectTitle,
    PurposeCode,
    Keywords,
    Prices,
    CovidKeyword,
    CovidPurpose,
    CovidTrustFund,
}

impl Column {
    pub const ALL: [Column; 13] = [
        Column::Year,
        Column::Indicator,
        Column::DonorCode,
        Column::DonorName,
        Column::RecipientCode,
        Column::Recipient,
        Column::ProjectTitle,
        Column::PurposeCode,
        Column::Keywords,
        Column::Prices,
        Column::CovidKeyword,
        Column::CovidPurpose,
        Column::CovidTrustFund,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Year => "year",
            Column::Indicator => "indicator",
            Column::DonorCode => "donor_code",
            Column::DonorName => "donor_name",
            Column::RecipientCode => "recipient_code",
            Column::Recipient => "recipient",
            Column::ProjectTitle => "project_title",
            Column::PurposeCode => "purpose_code",
            Column::Keywords => "keywords",
            Column::Prices => "prices",
            Column::CovidKeyword => "covid_keyword",
            Column::CovidPurpose => "covid_purpose",
            Column::CovidTrustFund => "covid_trust_fund",
        }
    }
}

/// A single cell of a grouping key. `Null` sorts after every other value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(v) => f.write_str(v),
            KeyValue::Bool(v) => write!(f, "{}", v),
            KeyValue::Null => Ok(()),
        }
    }
}

impl From<Option<i64>> for KeyValue {
    fn from(value: Option<i64>) -> Self {
        value.map(KeyValue::Int).unwrap_or(KeyValue::Null)
    }
}

impl From<Option<&String>> for KeyValue {
    fn from(value: Option<&String>) -> Self {
        value
            .map(|s| KeyValue::Text(s.clone()))
            .unwrap_or(KeyValue::Null)
    }
}

impl From<Option<bool>> for KeyValue {
    fn from(value: Option<bool>) -> Self {
        value.map(KeyValue::Bool).unwrap_or(KeyValue::Null)
    }
}

impl KeyValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            KeyValue::Text(v) => Some(v.clone()),
            KeyValue::Int(v) => Some(v.to_string()),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            KeyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// One row of an aid-flow table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowRecord {
    pub year: Option<i64>,
    pub indicator: Option<String>,
    pub donor_code: Option<i64>,
    pub donor_name: Option<String>,
    pub recipient_code: Option<i64>,
    pub recipient: Option<String>,
    pub project_title: Option<String>,
    pub purpose_code: Option<i64>,
    pub keywords: Option<String>,
    pub prices: Option<Prices>,
    pub covid_keyword: Option<bool>,
    pub covid_purpose: Option<bool>,
    pub covid_trust_fund: Option<bool>,
    pub value: f64,
}

impl FlowRecord {
    pub fn get(&self, column: Column) -> KeyValue {
        match column {
            Column::Year => self.year.into(),
            Column::Indicator => self.indicator.as_ref().into(),
            Column::DonorCode => self.donor_code.into(),
            Column::DonorName => self.donor_name.as_ref().into(),
            Column::RecipientCode => self.recipient_code.into(),
            Column::Recipient => self.recipient.as_ref().into(),
            Column::ProjectTitle => self.project_title.as_ref().into(),
            Column::PurposeCode => self.purpose_code.into(),
            Column::Keywords => self.keywords.as_ref().into(),
            Column::Prices => self
                .prices
                .map(|p| KeyValue::Text(p.as_str().to_string()))
                .unwrap_or(KeyValue::Null),
            Column::CovidKeyword => self.covid_keyword.into(),
            Column::CovidPurpose => self.covid_purpose.into(),
            Column::CovidTrustFund => self.covid_trust_fund.into(),
        }
    }

    pub fn set(&mut self, column: Column, value: &KeyValue) {
        match column {
            Column::Year => self.year = value.as_int(),
            Column::Indicator => self.indicator = value.as_text(),
            Column::DonorCode => self.donor_code = value.as_int(),
            Column::DonorName => self.donor_name = value.as_text(),
            Column::RecipientCode => self.recipient_code = value.as_int(),
            Column::Recipient => self.recipient = value.as_text(),
            Column::ProjectTitle => self.project_title = value.as_text(),
            Column::PurposeCode => self.purpose_code = value.as_int(),
            Column::Keywords => self.keywords = value.as_text(),
            Column::Prices => {
                self.prices = value.as_text().and_then(|s| s.parse::<Prices>().ok())
            }
            Column::CovidKeyword => self.covid_keyword = value.as_bool(),
            Column::CovidPurpose => self.covid_purpose = value.as_bool(),
            Column::CovidTrustFund => self.covid_trust_fund = value.as_bool(),
        }
    }
}

/// Ordered records plus the set of columns present in their schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowTable {
    pub columns: BTreeSet<Column>,
    pub records: Vec<FlowRecord>,
}

impl FlowTable {
    pub fn new(columns: impl IntoIterator<Item = Column>, records: Vec<FlowRecord>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn total_value(&self) -> f64 {
        self.records.iter().map(|r| r.value).sum()
    }

    /// Sets `column` to `value` on every record and adds it to the schema.
    pub fn assign(mut self, column: Column, value: &KeyValue) -> Self {
        for record in &mut self.records {
            record.set(column, value);
        }
        self.columns.insert(column);
        self
    }

    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&FlowRecord) -> bool,
    {
        Self {
            columns: self.columns,
            records: self.records.into_iter().filter(|r| predicate(r)).collect(),
        }
    }
}
