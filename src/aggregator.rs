//! Group-and-sum aggregation and indicator pivoting.
//!
//! Aggregation always sums `value`; null key values form their own group.
//! Output rows come out in sorted key order with nulls last.

use crate::error::{OdaError, Result};
use crate::models::{Column, FlowRecord, FlowTable, KeyValue};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// Sum `value` per distinct tuple of `keys`. Keys missing from the table schema are ignored.
pub fn aggregate(table: &FlowTable, keys: &[Column]) -> FlowTable {
    let mut used: Vec<Column> = Vec::new();
    for key in keys {
        if table.has_column(*key) && !used.contains(key) {
            used.push(*key);
        }
    }

    let mut groups: BTreeMap<Vec<KeyValue>, f64> = BTreeMap::new();
    for record in &table.records {
        let key: Vec<KeyValue> = used.iter().map(|c| record.get(*c)).collect();
        *groups.entry(key).or_insert(0.0) += record.value;
    }

    let records = groups
        .into_iter()
        .map(|(key, value)| {
            let mut record = FlowRecord {
                value,
                ..FlowRecord::default()
            };
            for (column, cell) in used.iter().zip(&key) {
                record.set(*column, cell);
            }
            record
        })
        .collect();

    FlowTable::new(used, records)
}

/// Group by every schema column except `excluded`.
pub fn aggregate_excluding(table: &FlowTable, excluded: &[Column]) -> FlowTable {
    let keys: Vec<Column> = table
        .columns
        .iter()
        .copied()
        .filter(|c| !excluded.contains(c))
        .collect();
    aggregate(table, &keys)
}

/// Stack tables on top of each other; the schema is the union of the inputs.
pub fn concat(tables: &[FlowTable]) -> FlowTable {
    let mut result = FlowTable::default();
    for table in tables {
        result.columns.extend(table.columns.iter().copied());
        result.records.extend(table.records.iter().cloned());
    }
    result
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub keys: Vec<KeyValue>,
    /// One cell per indicator, `None` where the indicator had no data.
    pub cells: Vec<Option<f64>>,
}

/// Pivoted table: index columns followed by one value column per indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub index: Vec<Column>,
    pub indicators: Vec<String>,
    pub rows: Vec<WideRow>,
}

impl WideTable {
    pub fn header(&self) -> Vec<String> {
        self.index
            .iter()
            .map(|c| c.name().to_string())
            .chain(self.indicators.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn indicator_total(&self, indicator: &str) -> f64 {
        match self.indicators.iter().position(|i| i == indicator) {
            Some(position) => self.rows.iter().filter_map(|row| row.cells[position]).sum(),
            None => 0.0,
        }
    }

    pub fn fill_missing(mut self, fill: f64) -> Self {
        for row in &mut self.rows {
            for cell in &mut row.cells {
                cell.get_or_insert(fill);
            }
        }
        self
    }

    /// Keep only the listed index columns, in the given order. Unknown columns are skipped.
    pub fn select(self, columns: &[Column]) -> Self {
        let positions: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.index.iter().position(|i| i == c))
            .collect();
        let index = positions.iter().map(|&p| self.index[p]).collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| WideRow {
                keys: positions.iter().map(|&p| row.keys[p].clone()).collect(),
                cells: row.cells,
            })
            .collect();
        Self {
            index,
            indicators: self.indicators,
            rows,
        }
    }

    /// Split rows by the value of one index column, in sorted key order.
    pub fn partition_by(&self, column: Column) -> Vec<(KeyValue, WideTable)> {
        let Some(position) = self.index.iter().position(|c| *c == column) else {
            return vec![(KeyValue::Null, self.clone())];
        };

        let mut parts: BTreeMap<KeyValue, Vec<WideRow>> = BTreeMap::new();
        for row in &self.rows {
            parts
                .entry(row.keys[position].clone())
                .or_default()
                .push(row.clone());
        }

        parts
            .into_iter()
            .map(|(key, rows)| {
                (
                    key,
                    WideTable {
                        index: self.index.clone(),
                        indicators: self.indicators.clone(),
                        rows,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
impl WideTable {
    pub fn cell(&self, keys: &[KeyValue], indicator: &str) -> Option<f64> {
        let position = self.indicators.iter().position(|i| i == indicator)?;
        self.rows
            .iter()
            .find(|row| row.keys == keys)
            .and_then(|row| row.cells[position])
    }
}

/// Turn `indicator` values into columns keyed by `index`, with `value` as the cell.
///
/// Indicator columns are sorted. A repeated (index, indicator) pair is an error:
/// the input must already be aggregated by `index` and `indicator`.
pub fn pivot(table: &FlowTable, index: &[Column]) -> Result<WideTable> {
    let mut indicators: BTreeSet<String> = BTreeSet::new();
    let mut grid: BTreeMap<Vec<KeyValue>, BTreeMap<String, f64>> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in &table.records {
        let Some(indicator) = &record.indicator else {
            skipped += 1;
            continue;
        };
        let keys: Vec<KeyValue> = index.iter().map(|c| record.get(*c)).collect();
        indicators.insert(indicator.clone());
        let cells = grid.entry(keys).or_default();
        if cells.contains_key(indicator) {
            let keys: Vec<String> = index.iter().map(|c| record.get(*c).to_string()).collect();
            return Err(OdaError::DuplicatePivotEntry {
                keys: keys.join(", "),
                indicator: indicator.clone(),
            });
        }
        cells.insert(indicator.clone(), record.value);
    }

    if skipped > 0 {
        warn!("pivot skipped {} records without an indicator label", skipped);
    }

    let indicators: Vec<String> = indicators.into_iter().collect();
    let rows = grid
        .into_iter()
        .map(|(keys, values)| WideRow {
            keys,
            cells: indicators.iter().map(|i| values.get(i).copied()).collect(),
        })
        .collect();

    Ok(WideTable {
        index: index.to_vec(),
        indicators,
        rows,
    })
}

/// Union the two labelled variants and pivot them side by side.
pub fn pivot_covid_variants(
    with_covid: &FlowTable,
    without_covid: &FlowTable,
    index: &[Column],
) -> Result<WideTable> {
    pivot(&concat(&[with_covid.clone(), without_covid.clone()]), index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prices;

    fn flow(year: i64, donor: Option<i64>, purpose: i64, value: f64) -> FlowRecord {
        FlowRecord {
            year: Some(year),
            donor_code: donor,
            purpose_code: Some(purpose),
            prices: Some(Prices::Current),
            value,
            ..FlowRecord::default()
        }
    }

    fn sample() -> FlowTable {
        FlowTable::new(
            [Column::Year, Column::DonorCode, Column::PurposeCode, Column::Prices],
            vec![
                flow(2021, Some(4), 12220, 10.0),
                flow(2020, Some(4), 12220, 5.0),
                flow(2020, None, 12230, 2.5),
                flow(2020, Some(5), 12230, 7.0),
                flow(2021, Some(4), 12230, 1.0),
                flow(2020, None, 12220, 0.5),
            ],
        )
    }

    fn labelled(year: i64, indicator: &str, value: f64) -> FlowRecord {
        FlowRecord {
            year: Some(year),
            indicator: Some(indicator.to_string()),
            value,
            ..FlowRecord::default()
        }
    }

    #[test]
    fn test_aggregate_by_year() {
        let out = aggregate(&sample(), &[Column::Year]);
        assert_eq!(out.columns.iter().copied().collect::<Vec<_>>(), vec![Column::Year]);
        assert_eq!(out.len(), 2);
        assert_eq!(out.records[0].year, Some(2020));
        assert_eq!(out.records[0].value, 15.0);
        assert_eq!(out.records[1].year, Some(2021));
        assert_eq!(out.records[1].value, 11.0);
        assert_eq!(out.records[0].donor_code, None);
    }

    #[test]
    fn test_aggregate_keeps_null_keys_as_own_group() {
        let out = aggregate(&sample(), &[Column::DonorCode]);
        assert_eq!(out.len(), 3);
        let last = out.records.last().unwrap();
        assert_eq!(last.donor_code, None);
        assert_eq!(last.value, 3.0);
    }

    #[test]
    fn test_aggregate_ignores_unknown_keys() {
        let out = aggregate(&sample(), &[Column::Year, Column::Recipient, Column::Keywords]);
        assert_eq!(out, aggregate(&sample(), &[Column::Year]));
    }

    #[test]
    fn test_aggregate_conserves_total() {
        let input = sample();
        for keys in [
            vec![],
            vec![Column::Year],
            vec![Column::DonorCode, Column::PurposeCode],
            vec![Column::Year, Column::DonorCode, Column::PurposeCode, Column::Prices],
        ] {
            let out = aggregate(&input, &keys);
            assert!((out.total_value() - input.total_value()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let keys = [Column::Year, Column::DonorCode, Column::Prices];
        let once = aggregate(&sample(), &keys);
        let twice = aggregate(&once, &keys);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_aggregate_excluding() {
        let out = aggregate_excluding(&sample(), &[Column::PurposeCode, Column::DonorCode]);
        assert_eq!(out, aggregate(&sample(), &[Column::Year, Column::Prices]));
        assert_eq!(out.records[0].prices, Some(Prices::Current));
    }

    #[test]
    fn test_concat_unions_schema() {
        let a = FlowTable::new([Column::Year], vec![labelled(2020, "a", 1.0)]);
        let b = FlowTable::new([Column::Recipient], vec![FlowRecord::default()]);
        let out = concat(&[a, b]);
        assert_eq!(out.len(), 2);
        assert!(out.has_column(Column::Year));
        assert!(out.has_column(Column::Recipient));
    }

    #[test]
    fn test_pivot_variants_missing_cells() {
        let with = FlowTable::new(
            [Column::Year, Column::Indicator],
            vec![
                labelled(2020, "Health ODA (including COVID-19)", 150.0),
                labelled(2021, "Health ODA (including COVID-19)", 90.0),
            ],
        );
        let without = FlowTable::new(
            [Column::Year, Column::Indicator],
            vec![labelled(2020, "Health ODA", 50.0)],
        );

        let wide = pivot_covid_variants(&with, &without, &[Column::Year]).unwrap();
        assert_eq!(
            wide.header(),
            vec!["year", "Health ODA", "Health ODA (including COVID-19)"]
        );
        assert_eq!(wide.rows.len(), 2);
        assert_eq!(wide.cell(&[KeyValue::Int(2020)], "Health ODA"), Some(50.0));
        assert_eq!(wide.cell(&[KeyValue::Int(2021)], "Health ODA"), None);
        assert_eq!(
            wide.cell(&[KeyValue::Int(2021)], "Health ODA (including COVID-19)"),
            Some(90.0)
        );

        let filled = wide.fill_missing(0.0);
        assert_eq!(filled.cell(&[KeyValue::Int(2021)], "Health ODA"), Some(0.0));
    }

    #[test]
    fn test_pivot_empty_inputs() {
        let empty = FlowTable::new([Column::Year, Column::Indicator], Vec::new());
        let wide = pivot_covid_variants(&empty, &empty, &[Column::Year, Column::Recipient]).unwrap();
        assert!(wide.is_empty());
        assert!(wide.indicators.is_empty());
        assert_eq!(wide.header(), vec!["year", "recipient"]);
    }

    #[test]
    fn test_pivot_rejects_duplicate_pairs() {
        let table = FlowTable::new(
            [Column::Year, Column::Indicator],
            vec![labelled(2020, "x", 1.0), labelled(2020, "x", 2.0)],
        );
        let err = pivot(&table, &[Column::Year]).unwrap_err();
        assert!(matches!(
            err,
            OdaError::DuplicatePivotEntry { ref keys, ref indicator } if keys == "2020" && indicator == "x"
        ));

        // aggregating first makes the pairs unique
        let summed = aggregate(&table, &[Column::Year, Column::Indicator]);
        let wide = pivot(&summed, &[Column::Year]).unwrap();
        assert_eq!(wide.cell(&[KeyValue::Int(2020)], "x"), Some(3.0));
    }

    #[test]
    fn test_select_and_partition() {
        let mut a = labelled(2020, "x", 1.0);
        a.donor_code = Some(4);
        a.donor_name = Some("France".to_string());
        let mut b = labelled(2020, "x", 2.0);
        b.donor_code = Some(5);
        b.donor_name = Some("Germany".to_string());
        let table = FlowTable::new(
            [Column::Year, Column::DonorCode, Column::DonorName, Column::Indicator],
            vec![a, b],
        );

        let wide = pivot(&table, &[Column::Year, Column::DonorCode, Column::DonorName])
            .unwrap()
            .select(&[Column::Year, Column::DonorName]);
        assert_eq!(wide.header(), vec!["year", "donor_name", "x"]);

        let parts = wide.partition_by(Column::DonorName);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, KeyValue::Text("France".to_string()));
        assert_eq!(parts[1].1.indicator_total("x"), 2.0);
    }
}
