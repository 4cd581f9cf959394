use crate::aggregator::{aggregate, concat, pivot, pivot_covid_variants, WideTable};
use crate::classifier::{classify, CovidMatcher, CovidPolicy, KeywordRemap};
use crate::error::{OdaError, Result};
use crate::models::{Column, Config, FlowTable, KeyValue, Prices};
use crate::regroup::{regroup, CodeLookup, RecipientLabels, RegionOverrides, Scheme};
use crate::sectors::{filter_sectors, HealthSectors};
use crate::source::{FlowQuery, FlowSource, Indicator};
use log::{debug, info};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const WITH_COVID: &str = "Health ODA (including COVID-19)";
pub const WITHOUT_COVID: &str = "Health ODA";

/// Columns the raw health query is first summed by.
pub const DEFAULT_GROUPER: [Column; 8] = [
    Column::Year,
    Column::Indicator,
    Column::DonorCode,
    Column::RecipientCode,
    Column::ProjectTitle,
    Column::PurposeCode,
    Column::Keywords,
    Column::Prices,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Totals,
    Donors,
    Recipients,
    /// Flagged COVID-19 records of one donor, kept at record level.
    CovidAudit,
}

impl Report {
    pub fn name(&self) -> &'static str {
        match self {
            Report::Totals => "totals",
            Report::Donors => "donors",
            Report::Recipients => "recipients",
            Report::CovidAudit => "covid_audit",
        }
    }
}

impl FromStr for Report {
    type Err = OdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "totals" => Ok(Report::Totals),
            "donors" => Ok(Report::Donors),
            "recipients" => Ok(Report::Recipients),
            "covid_audit" => Ok(Report::CovidAudit),
            other => Err(OdaError::UnknownReport(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthParams {
    pub start_year: i64,
    pub end_year: i64,
    pub prices: Prices,
    pub currency: String,
    pub base_year: Option<i64>,
    pub keyword_remap: KeywordRemap,
}

impl HealthParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_year: config.start_year,
            end_year: config.end_year,
            prices: config.prices,
            currency: config.currency.clone(),
            base_year: config.base_year,
            keyword_remap: config.keyword_remap,
        }
    }
}

pub struct HealthAnalyzer<'a, S: FlowSource> {
    pub source: &'a S,
    pub matcher: CovidMatcher,
    pub sectors: HealthSectors,
    pub params: HealthParams,
}

impl<'a, S: FlowSource> HealthAnalyzer<'a, S> {
    pub fn new(source: &'a S, matcher: CovidMatcher, sectors: HealthSectors, params: HealthParams) -> Self {
        Self {
            source,
            matcher,
            sectors,
            params,
        }
    }

    /// Classification strategy used when an indicator is fetched with or without COVID flows.
    ///
    /// Bilateral flows drop COVID records outright. Imputed multilateral flows
    /// remap them to the neutral code, which moves them out of the health sectors.
    pub fn exclusion_policy(&self, indicator: Indicator, exclude_covid: bool) -> CovidPolicy {
        match (exclude_covid, indicator) {
            (false, _) => CovidPolicy::Keep,
            (true, Indicator::BilateralDisbursement) => CovidPolicy::Exclude,
            (true, Indicator::ImputedMultilateralDisbursement) => {
                CovidPolicy::Remap(self.params.keyword_remap)
            }
        }
    }

    /// Health ODA for one indicator, summed by year, indicator, donor and prices
    /// (and recipient when `by_recipient` is set).
    pub fn health_oda(
        &self,
        indicator: Indicator,
        exclude_covid: bool,
        by_recipient: bool,
    ) -> Result<FlowTable> {
        let query = self.query(indicator, indicator.lookback_years());

        // Step 1: Fetch and classify
        let raw = self.source.fetch(&query)?;
        let policy = self.exclusion_policy(indicator, exclude_covid);
        let classified = classify(&raw, policy, &self.matcher);

        // Step 2: Keep health sectors and collapse to the default grouper
        let health = filter_sectors(classified, &self.sectors);
        let grouped = aggregate(&health, &DEFAULT_GROUPER);

        // Step 3: Drop lookback years and label the indicator
        let start_year = self.params.start_year;
        let labelled = grouped
            .filter(|r| r.year.map(|y| y >= start_year).unwrap_or(true))
            .assign(Column::Indicator, &KeyValue::Text(indicator.label().to_string()));

        let mut keys = vec![Column::Year, Column::Indicator, Column::DonorCode, Column::Prices];
        if by_recipient {
            keys.push(Column::RecipientCode);
        }
        let result = aggregate(&labelled, &keys);

        debug!(
            "{} ({:?}): {} raw records, {} health records, {} rows",
            indicator.name(),
            policy,
            raw.len(),
            health.len(),
            result.len()
        );
        Ok(result)
    }

    /// Bilateral health ODA by year, with and without COVID-19 flows.
    pub fn totals_by_year(&self) -> Result<WideTable> {
        let (with_covid, without_covid) =
            self.covid_variants(Indicator::BilateralDisbursement, false, &[Column::Year])?;
        pivot_covid_variants(&with_covid, &without_covid, &[Column::Year])
    }

    /// Bilateral plus imputed multilateral health ODA for the given donors.
    ///
    /// Columns: year, donor name, then one column per variant.
    pub fn donor_totals(&self, donors: &[i64], donor_names: &BTreeMap<i64, String>) -> Result<WideTable> {
        let keys = [Column::Year, Column::DonorCode, Column::Prices];

        // Step 1: Both indicators, both variants, restricted to the donors
        let mut parts = Vec::new();
        for indicator in [
            Indicator::BilateralDisbursement,
            Indicator::ImputedMultilateralDisbursement,
        ] {
            let (with_covid, without_covid) = self.covid_variants(indicator, false, &keys)?;
            parts.push(with_covid);
            parts.push(without_covid);
        }
        let combined = concat(&parts)
            .filter(|r| r.donor_code.map(|d| donors.contains(&d)).unwrap_or(false));

        // Step 2: Sum bilateral and multilateral together
        let mut summed = aggregate(
            &combined,
            &[Column::Year, Column::DonorCode, Column::Prices, Column::Indicator],
        );

        // Step 3: Attach names and reshape
        for record in &mut summed.records {
            record.donor_name = record
                .donor_code
                .and_then(|code| donor_names.get(&code).cloned());
        }
        summed.columns.insert(Column::DonorName);

        let wide = pivot(
            &summed,
            &[Column::Year, Column::DonorCode, Column::DonorName, Column::Prices],
        )?;
        Ok(wide.select(&[Column::Year, Column::DonorName]))
    }

    /// Bilateral health ODA by recipient group, one block of rows per scheme.
    ///
    /// Fails with [`OdaError::DuplicatePivotEntry`] when two schemes produce the same label.
    pub fn recipient_groupings(
        &self,
        schemes: &[Scheme],
        lookup: &dyn CodeLookup,
        overrides: &RegionOverrides,
        fallback: &RecipientLabels,
    ) -> Result<WideTable> {
        let (with_covid, without_covid) = self.covid_variants(
            Indicator::BilateralDisbursement,
            true,
            &[Column::Year, Column::RecipientCode],
        )?;
        let data = concat(&[with_covid, without_covid]);

        let grouped: Vec<FlowTable> = schemes
            .iter()
            .map(|scheme| regroup(&data, *scheme, lookup, overrides, fallback))
            .collect();

        pivot(&concat(&grouped), &[Column::Year, Column::Recipient])
    }

    /// Bilateral health records of `donor` that match any COVID-19 predicate,
    /// with the three flag columns attached. Records are not aggregated.
    pub fn covid_audit(&self, donor: i64) -> Result<FlowTable> {
        let raw = self.source.fetch(&self.query(Indicator::BilateralDisbursement, 0))?;

        let flagged = classify(&raw, CovidPolicy::Flag, &self.matcher)
            .filter(|r| r.donor_code == Some(donor));
        let covid = filter_sectors(flagged, &self.sectors).filter(|r| {
            [r.covid_keyword, r.covid_purpose, r.covid_trust_fund]
                .iter()
                .any(|flag| *flag == Some(true))
        });

        info!(
            "{} COVID-19 health records for donor {} out of {} fetched",
            covid.len(),
            donor,
            raw.len()
        );
        Ok(covid)
    }

    fn query(&self, indicator: Indicator, lookback_years: i64) -> FlowQuery {
        FlowQuery {
            indicator,
            start_year: self.params.start_year - lookback_years,
            end_year: self.params.end_year,
            prices: self.params.prices,
            currency: self.params.currency.clone(),
            base_year: self.params.base_year,
        }
    }

    /// Both variants of one indicator, summed by `keys` and labelled for pivoting.
    fn covid_variants(
        &self,
        indicator: Indicator,
        by_recipient: bool,
        keys: &[Column],
    ) -> Result<(FlowTable, FlowTable)> {
        let with_covid = aggregate(&self.health_oda(indicator, false, by_recipient)?, keys)
            .assign(Column::Indicator, &KeyValue::Text(WITH_COVID.to_string()));
        let without_covid = aggregate(&self.health_oda(indicator, true, by_recipient)?, keys)
            .assign(Column::Indicator, &KeyValue::Text(WITHOUT_COVID.to_string()));
        Ok((with_covid, without_covid))
    }
}
