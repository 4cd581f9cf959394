use crate::models::FlowTable;
use std::collections::BTreeSet;

pub const HEALTH_GENERAL: [i64; 4] = [12110, 12181, 12182, 12191];
pub const HEALTH_BASIC: [i64; 9] = [12220, 12230, 12240, 12250, 12261, 12262, 12263, 12264, 12281];
pub const HEALTH_NCDS: [i64; 6] = [12310, 12320, 12330, 12340, 12350, 12382];
pub const POPULATION_RH: [i64; 5] = [13010, 13020, 13030, 13040, 13081];

/// Purpose codes tracked for COVID-19 response flows, health sectors included.
pub const COVID_RESPONSE: [i64; 202] = [
    11110, 11120, 11130, 11182, 11220, 11230, 11231, 11232, 11240, 11250, 11260, 11320, 11330,
    11420, 11430, 12110, 12181, 12182, 12191, 12220, 12230, 12240, 12250, 12261, 12262, 12263,
    12264, 12281, 12310, 12330, 12340, 12350, 12382, 13010, 13020, 13030, 13040, 13081, 14010,
    14015, 14020, 14021, 14022, 14030, 14031, 14032, 14040, 14050, 14081, 15110, 15111, 15112,
    15113, 15114, 15125, 15130, 15142, 15150, 15151, 15152, 15153, 15160, 15170, 15180, 15190,
    15210, 15220, 15230, 15240, 15250, 15261, 16010, 16020, 16030, 16040, 16050, 16061, 16062,
    16063, 16064, 16070, 16080, 21010, 21020, 21030, 21040, 21050, 21061, 21081, 22010, 22020,
    22030, 22040, 23110, 23181, 23182, 23183, 23210, 23220, 23230, 23231, 23240, 23260, 23270,
    23330, 23410, 23630, 23631, 23640, 23642, 24010, 24020, 24030, 24040, 24050, 24081, 25010,
    25020, 25030, 25040, 31110, 31120, 31130, 31140, 31150, 31161, 31162, 31163, 31164, 31165,
    31166, 31181, 31182, 31191, 31192, 31193, 31194, 31195, 31210, 31220, 31261, 31281, 31282,
    31291, 31310, 31320, 31381, 31382, 32110, 32120, 32130, 32140, 32161, 32162, 32163, 32168,
    32169, 32182, 32210, 32220, 32262, 32264, 32265, 32310, 33110, 33120, 33130, 33140, 33150,
    33181, 33210, 41010, 41020, 41030, 41040, 41081, 41082, 43010, 43030, 43040, 43050, 43060,
    43071, 43072, 43073, 43081, 43082, 51010, 52010, 53040, 60010, 60030, 60040, 72010, 72040,
    72050, 73010, 74020, 91010, 93010, 99810, 99820,
];

/// Set of purpose codes a flow must carry to be kept.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSectors {
    codes: BTreeSet<i64>,
}

impl Default for HealthSectors {
    fn default() -> Self {
        Self::new(false)
    }
}

impl HealthSectors {
    pub fn new(include_covid_response: bool) -> Self {
        let mut codes: BTreeSet<i64> = HEALTH_GENERAL
            .iter()
            .chain(&HEALTH_BASIC)
            .chain(&HEALTH_NCDS)
            .chain(&POPULATION_RH)
            .copied()
            .collect();
        if include_covid_response {
            codes.extend(COVID_RESPONSE);
        }
        Self { codes }
    }

    pub fn contains(&self, purpose_code: i64) -> bool {
        self.codes.contains(&purpose_code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// Keep records whose purpose code is in `sectors`; records without a purpose code are dropped.
pub fn filter_sectors(table: FlowTable, sectors: &HealthSectors) -> FlowTable {
    table.filter(|r| r.purpose_code.map(|p| sectors.contains(p)).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, FlowRecord};

    fn purpose(code: Option<i64>) -> FlowRecord {
        FlowRecord {
            purpose_code: code,
            value: 1.0,
            ..FlowRecord::default()
        }
    }

    #[test]
    fn test_default_sectors_are_health_only() {
        let sectors = HealthSectors::default();
        assert_eq!(sectors.len(), 24);
        assert!(sectors.contains(12264));
        assert!(sectors.contains(13081));
        assert!(!sectors.contains(11110));
        assert!(!sectors.contains(160));
    }

    #[test]
    fn test_covid_response_widens_set() {
        let sectors = HealthSectors::new(true);
        assert!(sectors.contains(11110));
        assert!(sectors.contains(99820));
        assert!(sectors.contains(12320));
    }

    #[test]
    fn test_filter_drops_non_health_and_null() {
        let table = FlowTable::new(
            [Column::PurposeCode],
            vec![purpose(Some(12220)), purpose(Some(160)), purpose(None), purpose(Some(13010))],
        );
        let out = filter_sectors(table, &HealthSectors::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out.records[1].purpose_code, Some(13010));
    }
}
