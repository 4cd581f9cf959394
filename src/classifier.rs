use crate::error::{OdaError, Result};
use crate::models::{Column, FlowRecord, FlowTable};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Rule values used to recognise COVID-19 flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovidRules {
    pub keyword_terms: Vec<String>,
    pub purpose_code: i64,
    pub trust_fund_donor: i64,
    /// Code written over matched purpose/donor codes by the remap policy.
    pub neutral_code: i64,
}

impl Default for CovidRules {
    fn default() -> Self {
        Self {
            keyword_terms: vec!["covid".to_string(), "c19".to_string()],
            purpose_code: 12264,
            trust_fund_donor: 1047,
            neutral_code: 160,
        }
    }
}

/// What the remap policy does with records that only match on keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeywordRemap {
    /// Keyword matches are informational; only purpose and donor codes are rewritten.
    #[serde(rename = "ignore")]
    Ignore,
    /// Keyword matches also get their purpose code rewritten.
    #[serde(rename = "purpose")]
    Purpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovidPolicy {
    Keep,
    Exclude,
    Remap(KeywordRemap),
    Flag,
}

/// Which of the three predicates a record satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CovidMatch {
    pub keyword: bool,
    pub purpose: bool,
    pub trust_fund: bool,
}

impl CovidMatch {
    pub fn any(&self) -> bool {
        self.keyword || self.purpose || self.trust_fund
    }
}

/// Compiled form of [`CovidRules`].
#[derive(Debug, Clone)]
pub struct CovidMatcher {
    rules: CovidRules,
    keywords: Option<Regex>,
}

impl CovidMatcher {
    pub fn new(rules: &CovidRules) -> Result<Self> {
        let terms: Vec<String> = rules
            .keyword_terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| regex::escape(t.trim()))
            .collect();

        let keywords = if terms.is_empty() {
            None
        } else {
            let pattern = RegexBuilder::new(&terms.join("|"))
                .case_insensitive(true)
                .build()
                .map_err(|e| OdaError::InvalidConfig(format!("covid keyword terms: {}", e)))?;
            Some(pattern)
        };

        Ok(Self {
            rules: rules.clone(),
            keywords,
        })
    }

    pub fn rules(&self) -> &CovidRules {
        &self.rules
    }

    pub fn matches(&self, record: &FlowRecord) -> CovidMatch {
        let keyword = match (&self.keywords, &record.keywords) {
            (Some(pattern), Some(text)) => pattern.is_match(text),
            _ => false,
        };
        CovidMatch {
            keyword,
            purpose: record.purpose_code == Some(self.rules.purpose_code),
            trust_fund: record.donor_code == Some(self.rules.trust_fund_donor),
        }
    }

    pub fn is_covid(&self, record: &FlowRecord) -> bool {
        self.matches(record).any()
    }
}

/// Applies `policy` to every record. Order is preserved; the input is untouched.
pub fn classify(table: &FlowTable, policy: CovidPolicy, matcher: &CovidMatcher) -> FlowTable {
    match policy {
        CovidPolicy::Keep => table.clone(),
        CovidPolicy::Exclude => FlowTable {
            columns: table.columns.clone(),
            records: table
                .records
                .iter()
                .filter(|r| !matcher.is_covid(r))
                .cloned()
                .collect(),
        },
        CovidPolicy::Remap(keyword_remap) => {
            let neutral = matcher.rules().neutral_code;
            let records = table
                .records
                .iter()
                .map(|record| {
                    let found = matcher.matches(record);
                    let mut record = record.clone();
                    if found.purpose || (found.keyword && keyword_remap == KeywordRemap::Purpose) {
                        record.purpose_code = Some(neutral);
                    }
                    if found.trust_fund {
                        record.donor_code = Some(neutral);
                    }
                    record
                })
                .collect();
            FlowTable {
                columns: table.columns.clone(),
                records,
            }
        }
        CovidPolicy::Flag => {
            let records = table
                .records
                .iter()
                .map(|record| {
                    let found = matcher.matches(record);
                    let mut record = record.clone();
                    record.covid_keyword = Some(found.keyword);
                    record.covid_purpose = Some(found.purpose);
                    record.covid_trust_fund = Some(found.trust_fund);
                    record
                })
                .collect();
            let mut columns = table.columns.clone();
            columns.extend([Column::CovidKeyword, Column::CovidPurpose, Column::CovidTrustFund]);
            FlowTable { columns, records }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(donor: i64, purpose: i64, keywords: Option<&str>, value: f64) -> FlowRecord {
        FlowRecord {
            year: Some(2020),
            donor_code: Some(donor),
            purpose_code: Some(purpose),
            keywords: keywords.map(str::to_string),
            value,
            ..FlowRecord::default()
        }
    }

    fn table(records: Vec<FlowRecord>) -> FlowTable {
        FlowTable::new(
            [Column::Year, Column::DonorCode, Column::PurposeCode, Column::Keywords],
            records,
        )
    }

    fn matcher() -> CovidMatcher {
        CovidMatcher::new(&CovidRules::default()).unwrap()
    }

    fn mixed_table() -> FlowTable {
        table(vec![
            record(1, 12264, None, 100.0),
            record(1, 11110, None, 50.0),
            record(1047, 12220, None, 30.0),
            record(2, 12220, Some("Vaccines; COVID-19 response"), 20.0),
            record(3, 12230, Some("C19 testing"), 10.0),
            record(3, 12230, Some("malaria"), 5.0),
        ])
    }

    #[test]
    fn test_predicates_are_independent() {
        let m = matcher();
        let both = record(1047, 12264, Some("covid"), 1.0);
        assert_eq!(
            m.matches(&both),
            CovidMatch {
                keyword: true,
                purpose: true,
                trust_fund: true
            }
        );
        assert!(!m.is_covid(&record(5, 12220, None, 1.0)));
        assert!(!m.is_covid(&record(5, 12220, Some("Covenant"), 1.0)));
    }

    #[test]
    fn test_exclude_partitions_records() {
        let m = matcher();
        let input = mixed_table();
        let kept = classify(&input, CovidPolicy::Exclude, &m);
        let matching = input.records.iter().filter(|r| m.is_covid(r)).count();

        assert!(kept.records.iter().all(|r| !m.is_covid(r)));
        assert_eq!(kept.len() + matching, input.len());
        assert_eq!(kept.len(), 2);
        // order preserved
        assert_eq!(kept.records[0].purpose_code, Some(11110));
        assert_eq!(kept.records[1].keywords.as_deref(), Some("malaria"));
    }

    #[test]
    fn test_exclude_may_return_empty() {
        let input = table(vec![record(1047, 12264, None, 1.0)]);
        assert!(classify(&input, CovidPolicy::Exclude, &matcher()).is_empty());
    }

    #[test]
    fn test_remap_rewrites_purpose_and_donor_independently() {
        let input = table(vec![
            record(1, 12264, None, 100.0),
            record(1047, 12264, None, 10.0),
            record(1047, 12220, None, 5.0),
        ]);
        let out = classify(&input, CovidPolicy::Remap(KeywordRemap::Ignore), &matcher());

        assert_eq!(out.records[0].purpose_code, Some(160));
        assert_eq!(out.records[0].donor_code, Some(1));
        assert_eq!(out.records[1].purpose_code, Some(160));
        assert_eq!(out.records[1].donor_code, Some(160));
        assert_eq!(out.records[2].purpose_code, Some(12220));
        assert_eq!(out.records[2].donor_code, Some(160));
        assert_eq!(out.total_value(), input.total_value());
    }

    #[test]
    fn test_remap_keyword_variant() {
        let input = table(vec![record(2, 12220, Some("covid vaccines"), 20.0)]);

        let ignored = classify(&input, CovidPolicy::Remap(KeywordRemap::Ignore), &matcher());
        assert_eq!(ignored.records[0].purpose_code, Some(12220));

        let remapped = classify(&input, CovidPolicy::Remap(KeywordRemap::Purpose), &matcher());
        assert_eq!(remapped.records[0].purpose_code, Some(160));
    }

    #[test]
    fn test_flag_preserves_records() {
        let input = mixed_table();
        let out = classify(&input, CovidPolicy::Flag, &matcher());

        assert_eq!(out.len(), input.len());
        assert!(out.has_column(Column::CovidKeyword));
        for (before, after) in input.records.iter().zip(&out.records) {
            let mut stripped = after.clone();
            stripped.covid_keyword = None;
            stripped.covid_purpose = None;
            stripped.covid_trust_fund = None;
            assert_eq!(&stripped, before);
        }
        assert_eq!(out.records[0].covid_purpose, Some(true));
        assert_eq!(out.records[2].covid_trust_fund, Some(true));
        assert_eq!(out.records[4].covid_keyword, Some(true));
        assert_eq!(out.records[5].covid_keyword, Some(false));
    }

    #[test]
    fn test_exclude_and_remap_then_aggregate_by_year() {
        use crate::aggregator::aggregate;

        let input = table(vec![record(1, 12264, None, 100.0), record(1, 11110, None, 50.0)]);

        let excluded = classify(&input, CovidPolicy::Exclude, &matcher());
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded.records[0].purpose_code, Some(11110));
        let by_year = aggregate(&excluded, &[Column::Year]);
        assert_eq!(by_year.len(), 1);
        assert_eq!((by_year.records[0].year, by_year.records[0].value), (Some(2020), 50.0));

        let remapped = classify(&input, CovidPolicy::Remap(KeywordRemap::Ignore), &matcher());
        assert_eq!(remapped.records[0].purpose_code, Some(160));
        assert_eq!(remapped.records[0].donor_code, Some(1));
        let by_year = aggregate(&remapped, &[Column::Year]);
        assert_eq!((by_year.records[0].year, by_year.records[0].value), (Some(2020), 150.0));
    }

    #[test]
    fn test_keep_is_identity() {
        let input = mixed_table();
        assert_eq!(classify(&input, CovidPolicy::Keep, &matcher()), input);
    }

    #[test]
    fn test_custom_rules() {
        let rules = CovidRules {
            keyword_terms: vec!["pandemic".to_string()],
            purpose_code: 99999,
            trust_fund_donor: 42,
            neutral_code: 0,
        };
        let m = CovidMatcher::new(&rules).unwrap();
        assert!(m.is_covid(&record(1, 1, Some("PANDEMIC preparedness"), 1.0)));
        assert!(!m.is_covid(&record(1, 12264, Some("covid"), 1.0)));
    }

    #[test]
    fn test_no_keyword_terms_never_matches_keywords() {
        let rules = CovidRules {
            keyword_terms: Vec::new(),
            ..CovidRules::default()
        };
        let m = CovidMatcher::new(&rules).unwrap();
        assert!(!m.matches(&record(1, 1, Some("covid"), 1.0)).keyword);
    }
}
