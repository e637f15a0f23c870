//! The aggregation pipeline: group-by sums, counts, the county/testing join and the scalar
//! metrics shown on the dashboard cards.
//!
//! Every function here clones the source frame into a lazy plan, so the loaded tables are never
//! modified and repeated calls on the same input return identical views.

use itertools::{izip, Itertools};
use log::{debug, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConsistencyWarning, SitemapperError, SitemapperResult, YieldScope},
    period::{Indicator, Quarter},
    source::{EntryPointTable, FacilityTable, TestingTotalsTable},
    COL,
};

const REPORTED_SUFFIX: &str = "_reported";

/// How rows of a grouped view are ordered for display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOrder {
    /// Order of first occurrence of each key in the source table.
    #[default]
    FirstSeen,
    /// Ascending by the named value column; ties keep first-seen order.
    Ascending(String),
    /// Descending by the named value column; ties keep first-seen order.
    Descending(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub key: String,
    pub values: Vec<i64>,
}

/// A grouped view: one row per key with one summed value per column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateView {
    pub key: String,
    pub columns: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateView {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[i64]> {
        self.rows
            .iter()
            .find(|row| row.key == key)
            .map(|row| row.values.as_slice())
    }

    pub fn value(&self, key: &str, column: &str) -> Option<i64> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.get(key).map(|values| values[idx])
    }

    pub fn keys(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.key.as_str()).collect()
    }

    /// Column-wise totals across every row.
    pub fn totals(&self) -> Vec<i64> {
        (0..self.columns.len())
            .map(|idx| self.rows.iter().map(|row| row.values[idx]).sum())
            .collect()
    }

    fn sorted(mut self, order: &DisplayOrder) -> SitemapperResult<Self> {
        let (column, descending) = match order {
            DisplayOrder::FirstSeen => return Ok(self),
            DisplayOrder::Ascending(column) => (column, false),
            DisplayOrder::Descending(column) => (column, true),
        };
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| SitemapperError::Schema {
                table: format!("{} view", self.key),
                missing: vec![column.clone()],
            })?;
        // `sort_by` is stable, so ties keep first-seen order
        self.rows.sort_by(|a, b| {
            let ordering = a.values[idx].cmp(&b.values[idx]);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Ok(self)
    }
}

fn text_values(df: &DataFrame, name: &str) -> SitemapperResult<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn int_values(df: &DataFrame, name: &str) -> SitemapperResult<Vec<Option<i64>>> {
    let series = df.column(name)?.cast(&DataType::Int64)?;
    let values = series.i64()?.into_iter().collect();
    Ok(values)
}

/// Convert a grouped frame into a view. Null sums cannot occur, as summing a group of nulls
/// gives zero.
fn to_view(df: &DataFrame, key: &str, columns: &[String]) -> SitemapperResult<AggregateView> {
    let keys = text_values(df, key)?;
    let values = columns
        .iter()
        .map(|column| int_values(df, column))
        .collect::<SitemapperResult<Vec<_>>>()?;
    let rows = keys
        .into_iter()
        .enumerate()
        .map(|(idx, key)| AggregateRow {
            key: key.unwrap_or_default(),
            values: values
                .iter()
                .map(|column| column[idx].unwrap_or_default())
                .collect(),
        })
        .collect();
    Ok(AggregateView {
        key: key.to_string(),
        columns: columns.to_vec(),
        rows,
    })
}

/// Group `df` by `key`, summing each of `columns`. Groups come out in first-seen order.
fn sum_by(
    df: &DataFrame,
    key: &str,
    columns: &[String],
    order: &DisplayOrder,
) -> SitemapperResult<AggregateView> {
    let missing = columns
        .iter()
        .filter(|column| df.column(column).is_err())
        .cloned()
        .collect_vec();
    if !missing.is_empty() {
        return Err(SitemapperError::Schema {
            table: format!("{key} view"),
            missing,
        });
    }
    let grouped = df
        .clone()
        .lazy()
        .group_by_stable([col(key)])
        .agg(columns.iter().map(|c| col(c).sum()).collect_vec())
        .collect()?;
    debug!("Grouped by '{key}' with shape: {:?}", grouped.shape());
    to_view(&grouped, key, columns)?.sorted(order)
}

/// Sum the requested metric columns of every facility per region.
pub fn aggregate_by_region(
    facilities: &FacilityTable,
    columns: &[String],
    order: &DisplayOrder,
) -> SitemapperResult<AggregateView> {
    sum_by(facilities.frame(), COL::REGION, columns, order)
}

/// New-on-treatment totals for each quarter of the fiscal year, per region.
pub fn regional_new_on_treatment(facilities: &FacilityTable) -> SitemapperResult<AggregateView> {
    aggregate_by_region(
        facilities,
        &facilities.metric_columns(Indicator::TxNew),
        &DisplayOrder::FirstSeen,
    )
}

/// Current-on-treatment totals at the end of `quarter`, largest region first.
pub fn regional_current_on_treatment(
    facilities: &FacilityTable,
    quarter: Quarter,
) -> SitemapperResult<AggregateView> {
    let column = facilities.metric_column(Indicator::TxCurr, quarter);
    aggregate_by_region(
        facilities,
        &[column.clone()],
        &DisplayOrder::Descending(column),
    )
}

/// Number of facilities per county. Counties without facilities do not appear.
pub fn count_by_county(
    facilities: &FacilityTable,
    order: &DisplayOrder,
) -> SitemapperResult<AggregateView> {
    let counts = facilities
        .frame()
        .clone()
        .lazy()
        .group_by_stable([col(COL::COUNTY)])
        .agg([len().cast(DataType::Int64).alias(COL::SITE_COUNT)])
        .collect()?;
    to_view(&counts, COL::COUNTY, &[COL::SITE_COUNT.to_string()])?.sorted(order)
}

/// Facility counts per county, smallest first.
pub fn sites_per_county(facilities: &FacilityTable) -> SitemapperResult<AggregateView> {
    count_by_county(
        facilities,
        &DisplayOrder::Ascending(COL::SITE_COUNT.to_string()),
    )
}

/// Tests per entry point, repeated labels summed.
pub fn sum_by_entry_point(
    entry_points: &EntryPointTable,
    order: &DisplayOrder,
) -> SitemapperResult<AggregateView> {
    sum_by(
        entry_points.frame(),
        COL::ENTRY_POINT,
        &[COL::TESTED.to_string()],
        order,
    )
}

fn reported(column: &str) -> String {
    format!("{column}{REPORTED_SUFFIX}")
}

/// Aggregations for `column` that keep track of whether any value in the group was present, so
/// that a group with nothing reported can be told apart from a confirmed zero.
fn sum_with_reported(column: &str) -> [Expr; 2] {
    [
        col(column).sum(),
        col(column).count().cast(DataType::Int64).alias(&reported(column)),
    ]
}

/// Pair each summed value with its reported-count column, `None` where nothing was reported.
fn reported_values(df: &DataFrame, column: &str) -> SitemapperResult<Vec<Option<i64>>> {
    let sums = int_values(df, column)?;
    let counts = int_values(df, &reported(column))?;
    Ok(sums
        .into_iter()
        .zip(counts)
        .map(|(sum, count)| match count {
            Some(n) if n > 0 => sum,
            _ => None,
        })
        .collect())
}

/// Four-quarter new-on-treatment total per county, in first-seen order. The total is null for a
/// county where no facility reported any new-on-treatment value.
#[derive(Clone, Debug)]
pub struct CountyNewOnTreatment(DataFrame);

impl CountyNewOnTreatment {
    pub fn frame(&self) -> &DataFrame {
        &self.0
    }
}

pub fn new_on_treatment_by_county(
    facilities: &FacilityTable,
) -> SitemapperResult<CountyNewOnTreatment> {
    let quarters = facilities.metric_columns(Indicator::TxNew);
    let total = quarters
        .iter()
        .fold(lit(0i64).cast(DataType::Int64), |acc, column| {
            acc + col(column).sum()
        });
    let reported_count = quarters
        .iter()
        .fold(lit(0i64).cast(DataType::Int64), |acc, column| {
            acc + col(column).count().cast(DataType::Int64)
        });
    let frame = facilities
        .frame()
        .clone()
        .lazy()
        .group_by_stable([col(COL::COUNTY)])
        .agg([total.alias(COL::TX_NEW), reported_count.alias(&reported(COL::TX_NEW))])
        .with_column(
            when(col(&reported(COL::TX_NEW)).eq(lit(0i64)))
                .then(lit(NULL).cast(DataType::Int64))
                .otherwise(col(COL::TX_NEW))
                .alias(COL::TX_NEW),
        )
        .select([col(COL::COUNTY), col(COL::TX_NEW)])
        .collect()?;
    Ok(CountyNewOnTreatment(frame))
}

/// County to region lookup, one row per county.
#[derive(Clone, Debug)]
pub struct CountyRegionMap(DataFrame);

impl CountyRegionMap {
    /// Each county maps to the region of its first facility.
    pub fn from_facilities(facilities: &FacilityTable) -> SitemapperResult<Self> {
        let frame = facilities
            .frame()
            .clone()
            .lazy()
            .group_by_stable([col(COL::COUNTY)])
            .agg([col(COL::REGION).first()])
            .collect()?;
        Ok(Self(frame))
    }

    /// Build from explicit `(county, region)` pairs; a repeated county keeps its first region.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> SitemapperResult<Self> {
        let (counties, regions): (Vec<&str>, Vec<&str>) =
            pairs.into_iter().unique_by(|(county, _)| *county).unzip();
        Ok(Self(DataFrame::new(vec![
            Series::new(COL::COUNTY, counties),
            Series::new(COL::REGION, regions),
        ])?))
    }
}

/// Testing yield of one county after the outer join. Fields from the side of the join a county
/// is absent from are `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyYield {
    pub county: String,
    pub region: Option<String>,
    pub tx_new: Option<i64>,
    pub tested: Option<i64>,
    pub positive: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionYield {
    pub region: String,
    pub tx_new: Option<i64>,
    pub tested: Option<i64>,
    pub positive: Option<i64>,
}

impl RegionYield {
    /// Share of tests that were positive, when both counts are known and tests were done.
    pub fn positivity(&self) -> Option<f64> {
        match (self.tested, self.positive) {
            (Some(tested), Some(positive)) if tested > 0 => Some(positive as f64 / tested as f64),
            _ => None,
        }
    }

    pub fn is_consistent(&self) -> bool {
        positive_within_tested(self.tested, self.positive)
    }
}

fn positive_within_tested(tested: Option<i64>, positive: Option<i64>) -> bool {
    match (tested, positive) {
        (Some(tested), Some(positive)) => positive <= tested,
        (None, Some(positive)) => positive == 0,
        _ => true,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyTestingYield {
    /// One row per distinct county on either side of the join, sorted by county.
    pub counties: Vec<CountyYield>,
    /// Per-region rollup of counties with a known region, sorted by region.
    pub regions: Vec<RegionYield>,
}

impl CountyTestingYield {
    pub fn county(&self, county: &str) -> Option<&CountyYield> {
        self.counties.iter().find(|row| row.county == county)
    }

    pub fn region(&self, region: &str) -> Option<&RegionYield> {
        self.regions.iter().find(|row| row.region == region)
    }
}

/// Outer join of new-on-treatment totals with testing totals on county, then rolled up by region.
///
/// Returns the view together with the consistency warnings raised by the join: regions whose
/// positive count exceeds tested, and testing counties with no supported facility.
pub fn join_yield(
    new_by_county: &CountyNewOnTreatment,
    testing_totals: &TestingTotalsTable,
    county_regions: &CountyRegionMap,
) -> SitemapperResult<(CountyTestingYield, Vec<ConsistencyWarning>)> {
    // Repeated counties on the testing side are summed first, so the join yields a single row
    // per county
    let testing = testing_totals
        .frame()
        .clone()
        .lazy()
        .group_by_stable([col(COL::COUNTY)])
        .agg(
            [sum_with_reported(COL::TESTED), sum_with_reported(COL::POSITIVE)]
                .concat(),
        )
        .with_columns([
            when(col(&reported(COL::TESTED)).eq(lit(0i64)))
                .then(lit(NULL).cast(DataType::Int64))
                .otherwise(col(COL::TESTED))
                .alias(COL::TESTED),
            when(col(&reported(COL::POSITIVE)).eq(lit(0i64)))
                .then(lit(NULL).cast(DataType::Int64))
                .otherwise(col(COL::POSITIVE))
                .alias(COL::POSITIVE),
        ])
        .select([col(COL::COUNTY), col(COL::TESTED), col(COL::POSITIVE)]);

    let joined = new_by_county
        .frame()
        .clone()
        .lazy()
        .join(
            testing,
            [col(COL::COUNTY)],
            [col(COL::COUNTY)],
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .join(
            county_regions.0.clone().lazy(),
            [col(COL::COUNTY)],
            [col(COL::COUNTY)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?
        .sort([COL::COUNTY], SortMultipleOptions::default())?;
    debug!("Joined testing yield with shape: {:?}", joined.shape());

    let counties = izip!(
        text_values(&joined, COL::COUNTY)?,
        text_values(&joined, COL::REGION)?,
        int_values(&joined, COL::TX_NEW)?,
        int_values(&joined, COL::TESTED)?,
        int_values(&joined, COL::POSITIVE)?,
    )
    .map(|(county, region, tx_new, tested, positive)| CountyYield {
        county: county.unwrap_or_default(),
        region,
        tx_new,
        tested,
        positive,
    })
    .collect_vec();

    let by_region = joined
        .lazy()
        .filter(col(COL::REGION).is_not_null())
        .group_by([col(COL::REGION)])
        .agg(
            [
                sum_with_reported(COL::TX_NEW),
                sum_with_reported(COL::TESTED),
                sum_with_reported(COL::POSITIVE),
            ]
            .concat(),
        )
        .collect()?
        .sort([COL::REGION], SortMultipleOptions::default())?;

    let regions = izip!(
        text_values(&by_region, COL::REGION)?,
        reported_values(&by_region, COL::TX_NEW)?,
        reported_values(&by_region, COL::TESTED)?,
        reported_values(&by_region, COL::POSITIVE)?,
    )
    .map(|(region, tx_new, tested, positive)| RegionYield {
        region: region.unwrap_or_default(),
        tx_new,
        tested,
        positive,
    })
    .collect_vec();

    let mut warnings = counties
        .iter()
        .filter(|row| row.region.is_none())
        .map(|row| ConsistencyWarning::UnmatchedCounty {
            county: row.county.clone(),
        })
        .collect_vec();
    warnings.extend(regions.iter().filter(|row| !row.is_consistent()).map(|row| {
        ConsistencyWarning::PositiveExceedsTested {
            scope: YieldScope::Region,
            name: row.region.clone(),
            tested: row.tested.unwrap_or_default(),
            positive: row.positive.unwrap_or_default(),
        }
    }));
    for warning in &warnings {
        warn!("{warning}");
    }

    Ok((CountyTestingYield { counties, regions }, warnings))
}

/// The figures shown on the dashboard's metric cards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarMetrics {
    pub fiscal_year: u16,
    pub quarter: Quarter,
    pub site_count: usize,
    pub county_count: usize,
    /// Current on treatment at the end of the reporting quarter.
    pub current_on_treatment: i64,
    /// Current on treatment at the end of the previous quarter.
    pub previous_on_treatment: Option<i64>,
    /// New on treatment summed over the four quarters of the fiscal year.
    pub new_on_treatment: i64,
    /// Per-facility change in current on treatment, reporting quarter minus previous quarter.
    pub net_new: Option<i64>,
    /// The same change one quarter earlier.
    pub previous_net_new: Option<i64>,
    /// Total new on treatment in the reporting quarter minus the previous quarter's total.
    pub new_growth: Option<i64>,
    /// The same change one quarter earlier.
    pub previous_new_growth: Option<i64>,
}

/// Sum of a metric column, `None` when the column has no value at all.
fn column_total(frame: &DataFrame, column: &str) -> SitemapperResult<Option<i64>> {
    let series = frame.column(column)?;
    if series.null_count() == series.len() {
        return Ok(None);
    }
    let total = frame
        .clone()
        .lazy()
        .select([col(column).sum()])
        .collect()?;
    Ok(int_values(&total, column)?.first().copied().flatten())
}

/// Summed per-facility difference `later - earlier`. Facilities missing either value are left
/// out; the delta is undefined when either column has no value at all.
fn facility_delta(frame: &DataFrame, later: &str, earlier: &str) -> SitemapperResult<Option<i64>> {
    for column in [later, earlier] {
        let series = frame.column(column)?;
        if series.null_count() == series.len() {
            debug!("No values in '{column}', delta {later} - {earlier} is undefined");
            return Ok(None);
        }
    }
    let delta = frame
        .clone()
        .lazy()
        .select([(col(later) - col(earlier)).sum().alias("delta")])
        .collect()?;
    Ok(int_values(&delta, "delta")?.first().copied().flatten())
}

/// Difference of the column totals `later - earlier`, undefined when either column has no value.
fn total_delta(frame: &DataFrame, later: &str, earlier: &str) -> SitemapperResult<Option<i64>> {
    Ok(column_total(frame, later)?
        .zip(column_total(frame, earlier)?)
        .map(|(later, earlier)| later - earlier))
}

/// Quarter pair ending at `later`, if it has a previous quarter.
fn quarter_pair(later: Option<Quarter>) -> Option<(Quarter, Quarter)> {
    later.and_then(|q| q.previous().map(|p| (q, p)))
}

/// Change in current on treatment, summed per facility.
fn net_new(facilities: &FacilityTable, later: Option<Quarter>) -> SitemapperResult<Option<i64>> {
    let Some((later, earlier)) = quarter_pair(later) else {
        return Ok(None);
    };
    facility_delta(
        facilities.frame(),
        &facilities.metric_column(Indicator::TxCurr, later),
        &facilities.metric_column(Indicator::TxCurr, earlier),
    )
}

/// Change in new on treatment between quarter totals.
fn new_growth(facilities: &FacilityTable, later: Option<Quarter>) -> SitemapperResult<Option<i64>> {
    let Some((later, earlier)) = quarter_pair(later) else {
        return Ok(None);
    };
    total_delta(
        facilities.frame(),
        &facilities.metric_column(Indicator::TxNew, later),
        &facilities.metric_column(Indicator::TxNew, earlier),
    )
}

/// Scalar metrics for the reporting `quarter`.
pub fn scalar_metrics(
    facilities: &FacilityTable,
    quarter: Quarter,
) -> SitemapperResult<ScalarMetrics> {
    let frame = facilities.frame();
    let current_on_treatment =
        column_total(frame, &facilities.metric_column(Indicator::TxCurr, quarter))?
            .unwrap_or_default();
    let previous_on_treatment = match quarter.previous() {
        Some(previous) => column_total(
            frame,
            &facilities.metric_column(Indicator::TxCurr, previous),
        )?,
        None => None,
    };
    let new_on_treatment = facilities
        .metric_columns(Indicator::TxNew)
        .iter()
        .map(|column| column_total(frame, column))
        .collect::<SitemapperResult<Vec<_>>>()?
        .into_iter()
        .flatten()
        .sum();
    let county_count = count_by_county(facilities, &DisplayOrder::FirstSeen)?.len();

    Ok(ScalarMetrics {
        fiscal_year: facilities.fiscal_year(),
        quarter,
        site_count: facilities.height(),
        county_count,
        current_on_treatment,
        previous_on_treatment,
        new_on_treatment,
        net_new: net_new(facilities, Some(quarter))?,
        previous_net_new: net_new(facilities, quarter.previous())?,
        new_growth: new_growth(facilities, Some(quarter))?,
        previous_new_growth: new_growth(facilities, quarter.previous())?,
    })
}
