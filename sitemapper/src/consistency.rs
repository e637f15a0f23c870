//! Load-time checks of the soft invariants of the source tables. Violations are returned as
//! warnings; none of them stops a render.

use itertools::Itertools;
use log::warn;

use crate::{
    error::{ConsistencyWarning, SitemapperResult, YieldScope},
    source::{tables as TABLE, FacilityTable, TestingTotalsTable},
};

/// Facility codes are expected to be unique within the roster.
pub fn check_facilities(facilities: &FacilityTable) -> SitemapperResult<Vec<ConsistencyWarning>> {
    let warnings = facilities
        .records()?
        .into_iter()
        .counts_by(|record| record.code)
        .into_iter()
        .filter(|(_, rows)| *rows > 1)
        .sorted()
        .map(|(code, rows)| ConsistencyWarning::DuplicateFacilityCode { code, rows })
        .collect_vec();
    for warning in &warnings {
        warn!("{warning}");
    }
    Ok(warnings)
}

/// Each county should appear once and report no more positives than tests.
pub fn check_testing_totals(
    testing_totals: &TestingTotalsTable,
) -> SitemapperResult<Vec<ConsistencyWarning>> {
    let records = testing_totals.records()?;
    let mut warnings = records
        .iter()
        .filter_map(|record| match (record.tested, record.positive) {
            (tested, Some(positive)) if positive > tested.unwrap_or_default() => {
                Some(ConsistencyWarning::PositiveExceedsTested {
                    scope: YieldScope::County,
                    name: record.county.clone(),
                    tested: tested.unwrap_or_default(),
                    positive,
                })
            }
            _ => None,
        })
        .collect_vec();
    warnings.extend(
        records
            .iter()
            .counts_by(|record| record.county.as_str())
            .into_iter()
            .filter(|(_, rows)| *rows > 1)
            .sorted()
            .map(|(county, rows)| ConsistencyWarning::RepeatedCounty {
                table: TABLE::TESTING_TOTALS.to_string(),
                county: county.to_string(),
                rows,
            }),
    );
    for warning in &warnings {
        warn!("{warning}");
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FacilityRecord, TestingTotalsRecord};

    fn totals(rows: &[(&str, i64, i64)]) -> TestingTotalsTable {
        let records = rows
            .iter()
            .map(|&(county, tested, positive)| TestingTotalsRecord {
                county: county.into(),
                tested: Some(tested),
                positive: Some(positive),
            })
            .collect_vec();
        TestingTotalsTable::from_records(&records).unwrap()
    }

    #[test]
    fn positive_above_tested_is_flagged_for_that_county_only() {
        let warnings = check_testing_totals(&totals(&[("X", 20, 5), ("Y", 10, 12)])).unwrap();
        assert_eq!(
            warnings,
            vec![ConsistencyWarning::PositiveExceedsTested {
                scope: YieldScope::County,
                name: "Y".into(),
                tested: 10,
                positive: 12,
            }]
        );
    }

    #[test]
    fn repeated_counties_are_reported() {
        let warnings = check_testing_totals(&totals(&[("X", 20, 5), ("X", 4, 1)])).unwrap();
        assert_eq!(
            warnings,
            vec![ConsistencyWarning::RepeatedCounty {
                table: TABLE::TESTING_TOTALS.into(),
                county: "X".into(),
                rows: 2,
            }]
        );
    }

    #[test]
    fn duplicate_facility_codes_are_reported() {
        let facility = |code: &str| FacilityRecord {
            code: code.into(),
            region: "North".into(),
            county: "X".into(),
            ..Default::default()
        };
        let table =
            FacilityTable::from_records(&[facility("A"), facility("B"), facility("A")], 2023)
                .unwrap();
        assert_eq!(
            check_facilities(&table).unwrap(),
            vec![ConsistencyWarning::DuplicateFacilityCode {
                code: "A".into(),
                rows: 2,
            }]
        );
    }
}
