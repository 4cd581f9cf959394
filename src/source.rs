use crate::error::{OdaError, Result};
use crate::models::{Column, FlowRecord, FlowTable, Prices};
use log::{debug, info};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    BilateralDisbursement,
    ImputedMultilateralDisbursement,
}

impl Indicator {
    /// Name of the indicator in the statistics source, also the data file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Indicator::BilateralDisbursement => "crs_bilateral_flow_disbursement_gross",
            Indicator::ImputedMultilateralDisbursement => "imputed_multi_flow_disbursement_gross",
        }
    }

    /// Label written to the `indicator` column of health queries.
    pub fn label(&self) -> &'static str {
        match self {
            Indicator::BilateralDisbursement => "bilateral_health_oda",
            Indicator::ImputedMultilateralDisbursement => "imputed_multilateral_health_oda",
        }
    }

    /// Extra years fetched before the requested start year.
    /// Imputed shares are computed over a trailing window, so earlier years are needed.
    pub fn lookback_years(&self) -> i64 {
        match self {
            Indicator::BilateralDisbursement => 0,
            Indicator::ImputedMultilateralDisbursement => 2,
        }
    }
}

impl FromStr for Indicator {
    type Err = OdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "crs_bilateral_flow_disbursement_gross" | "bilateral" => {
                Ok(Indicator::BilateralDisbursement)
            }
            "imputed_multi_flow_disbursement_gross" | "imputed_multilateral" => {
                Ok(Indicator::ImputedMultilateralDisbursement)
            }
            other => Err(OdaError::InvalidConfig(format!("unknown indicator: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowQuery {
    pub indicator: Indicator,
    pub start_year: i64,
    pub end_year: i64,
    pub prices: Prices,
    pub currency: String,
    pub base_year: Option<i64>,
}

impl FlowQuery {
    pub fn contains_year(&self, year: i64) -> bool {
        year >= self.start_year && year <= self.end_year
    }
}

/// Something that answers flow queries with a table of records.
pub trait FlowSource {
    fn fetch(&self, query: &FlowQuery) -> Result<FlowTable>;
}

/// Reads `<data_dir>/<indicator>.csv`.
///
/// Recognised columns: `year`, `donor_code`, `recipient_code`, `purpose_code`,
/// `project_title`, `keywords`, `prices`, `value`, plus `currency` and
/// `base_year` which only filter rows. Other columns are ignored.
pub struct CsvFlowSource {
    data_dir: PathBuf,
}

impl CsvFlowSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, indicator: Indicator) -> PathBuf {
        self.data_dir.join(format!("{}.csv", indicator.name()))
    }

    pub fn read<R: std::io::Read>(reader: R, query: &FlowQuery) -> Result<FlowTable> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: HashMap<String, usize> = csv_reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_lowercase(), i))
            .collect();

        let year_idx = *headers.get("year").ok_or_else(|| OdaError::InvalidRecord {
            row: 0,
            message: "missing year column".to_string(),
        })?;
        let value_idx = *headers.get("value").ok_or_else(|| OdaError::InvalidRecord {
            row: 0,
            message: "missing value column".to_string(),
        })?;

        let mut columns = vec![Column::Year, Column::Prices];
        let mut optional = |name: &str, column: Column| {
            let idx = headers.get(name).copied();
            if idx.is_some() {
                columns.push(column);
            }
            idx
        };
        let donor_idx = optional("donor_code", Column::DonorCode);
        let recipient_idx = optional("recipient_code", Column::RecipientCode);
        let purpose_idx = optional("purpose_code", Column::PurposeCode);
        let title_idx = optional("project_title", Column::ProjectTitle);
        let keywords_idx = optional("keywords", Column::Keywords);
        let prices_idx = headers.get("prices").copied();
        let currency_idx = headers.get("currency").copied();
        let base_year_idx = headers.get("base_year").copied();

        let mut records = Vec::new();
        for (i, row) in csv_reader.records().enumerate() {
            let row = row?;
            let line = i + 2;
            let field = |idx: Option<usize>| {
                idx.and_then(|idx| row.get(idx))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            let year = parse_code(field(Some(year_idx)), line, "year")?
                .ok_or_else(|| OdaError::InvalidRecord {
                    row: line,
                    message: "empty year".to_string(),
                })?;
            if !query.contains_year(year) {
                continue;
            }
            if let Some(prices) = field(prices_idx) {
                if prices.parse::<Prices>().ok() != Some(query.prices) {
                    continue;
                }
            }
            if let Some(currency) = field(currency_idx) {
                if !currency.eq_ignore_ascii_case(&query.currency) {
                    continue;
                }
            }
            if let (Some(base_year), Some(wanted)) = (field(base_year_idx), query.base_year) {
                if parse_code(Some(base_year), line, "base_year")? != Some(wanted) {
                    continue;
                }
            }

            let value = match field(Some(value_idx)) {
                Some(raw) => raw.parse::<f64>().map_err(|_| OdaError::InvalidRecord {
                    row: line,
                    message: format!("value '{}' is not a number", raw),
                })?,
                None => 0.0,
            };

            records.push(FlowRecord {
                year: Some(year),
                donor_code: parse_code(field(donor_idx), line, "donor_code")?,
                recipient_code: parse_code(field(recipient_idx), line, "recipient_code")?,
                purpose_code: parse_code(field(purpose_idx), line, "purpose_code")?,
                project_title: field(title_idx),
                keywords: field(keywords_idx),
                prices: Some(query.prices),
                value,
                ..FlowRecord::default()
            });
        }

        Ok(FlowTable::new(columns, records))
    }
}

impl FlowSource for CsvFlowSource {
    fn fetch(&self, query: &FlowQuery) -> Result<FlowTable> {
        let path = self.path_for(query.indicator);
        if !path.exists() {
            return Err(OdaError::MissingData {
                indicator: query.indicator.name().to_string(),
                path: path.display().to_string(),
            });
        }

        let file = fs::File::open(&path)?;
        let table = Self::read(file, query)?;
        debug!(
            "read {} records from {} for {}..={}",
            table.len(),
            path.display(),
            query.start_year,
            query.end_year
        );
        Ok(table)
    }
}

/// Codes sometimes arrive as floats ("302.0"); integral floats are accepted.
fn parse_code(raw: Option<String>, row: usize, column: &str) -> Result<Option<i64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(code) = raw.parse::<i64>() {
        return Ok(Some(code));
    }
    match raw.parse::<f64>() {
        Ok(code) if code.fract() == 0.0 => Ok(Some(code as i64)),
        _ => Err(OdaError::InvalidRecord {
            row,
            message: format!("{} '{}' is not an integer code", column, raw),
        }),
    }
}

/// Fetches indicator files over HTTP into the data directory.
pub struct Downloader {
    client: reqwest::Client,
    base_url: String,
}

impl Downloader {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, indicator: Indicator) -> String {
        format!("{}/{}.csv", self.base_url, indicator.name())
    }

    pub async fn download(&self, indicator: Indicator, data_dir: &Path) -> Result<PathBuf> {
        let url = self.url_for(indicator);
        println!("🌐 Fetching data from: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;

        let content = response.text().await?;

        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{}.csv", indicator.name()));
        fs::write(&path, content)?;
        info!("saved {} to {}", url, path.display());
        Ok(path)
    }
}
