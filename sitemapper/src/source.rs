//! Loading and validation of the three source exports.
//!
//! Every CSV is read with all columns as text and then parsed column by column, so that a bad
//! cell can be reported with its row and column instead of surfacing as a generic cast failure.
//! Missing numeric cells stay null in the typed frames: they add nothing to sums but are never
//! turned into an explicit zero.

use std::path::Path;

use itertools::Itertools;
use log::{debug, info};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SitemapperError, SitemapperResult},
    period::{latest_fiscal_year, Indicator, MetricColumn, Quarter},
    COL,
};

/// Names the source tables go by in errors and warnings.
pub mod tables {
    pub const FACILITIES: &str = "facilities";
    pub const TESTING_TOTALS: &str = "testing_totals";
    pub const ENTRY_POINTS: &str = "entry_points";
}
use tables as TABLE;

/// Cell contents treated as missing in addition to an empty cell.
const MISSING_MARKERS: [&str; 4] = ["NA", "NaN", "nan", "null"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    /// Text that must be present on every row.
    Key,
    Text,
    /// Non-negative integer count.
    Count,
    Coordinate,
}

struct ColumnSpec {
    name: String,
    kind: ColumnKind,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Read a CSV export with every column as text.
pub fn read_csv(path: &Path, table: &str) -> SitemapperResult<DataFrame> {
    if !path.is_file() {
        return Err(SitemapperError::SourceNotFound {
            table: table.to_string(),
            path: path.display().to_string(),
        });
    }
    info!("Loading '{table}' from {}", path.display());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    debug!("Read '{table}' with shape: {:?}", df.shape());
    Ok(df)
}

fn non_missing(cell: &str) -> Option<&str> {
    let cell = cell.trim();
    (!cell.is_empty() && !MISSING_MARKERS.contains(&cell)).then_some(cell)
}

fn data_format_error(table: &str, idx: usize, column: &str, value: &str) -> SitemapperError {
    SitemapperError::DataFormat {
        table: table.to_string(),
        row: idx + 1,
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Accepts integers and integral floats such as `12.0`, which spreadsheet exports produce for
/// numeric columns containing blanks.
fn parse_count(raw: &str) -> Option<i64> {
    let value = raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })?;
    (value >= 0).then_some(value)
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_cells<T>(
    table: &str,
    column: &str,
    values: &StringChunked,
    parse: impl Fn(&str) -> Option<T>,
) -> SitemapperResult<Vec<Option<T>>> {
    values
        .into_iter()
        .enumerate()
        .map(|(idx, cell)| match cell.and_then(non_missing) {
            None => Ok(None),
            Some(raw) => parse(raw)
                .map(Some)
                .ok_or_else(|| data_format_error(table, idx, column, raw)),
        })
        .collect()
}

fn parse_column(raw: &DataFrame, table: &str, spec: &ColumnSpec) -> SitemapperResult<Series> {
    let text = raw.column(&spec.name)?.cast(&DataType::String)?;
    let values = text.str()?;
    let name = spec.name.as_str();
    let series = match spec.kind {
        ColumnKind::Key | ColumnKind::Text => {
            let parsed = parse_cells(table, name, values, |v| Some(v.to_string()))?;
            if spec.kind == ColumnKind::Key {
                if let Some(idx) = parsed.iter().position(Option::is_none) {
                    return Err(data_format_error(table, idx, name, ""));
                }
            }
            Series::new(name, parsed)
        }
        ColumnKind::Count => Series::new(name, parse_cells(table, name, values, parse_count)?),
        ColumnKind::Coordinate => {
            Series::new(name, parse_cells(table, name, values, parse_coordinate)?)
        }
    };
    Ok(series)
}

/// Checks that every column in `columns` is present, then parses them into a typed frame that
/// holds exactly those columns, in that order.
fn validate(raw: &DataFrame, table: &str, columns: &[ColumnSpec]) -> SitemapperResult<DataFrame> {
    let missing = columns
        .iter()
        .filter(|spec| raw.column(&spec.name).is_err())
        .map(|spec| spec.name.clone())
        .collect_vec();
    if !missing.is_empty() {
        return Err(SitemapperError::Schema {
            table: table.to_string(),
            missing,
        });
    }
    let series = columns
        .iter()
        .map(|spec| parse_column(raw, table, spec))
        .collect::<SitemapperResult<Vec<_>>>()?;
    Ok(DataFrame::new(series)?)
}

fn text_column(frame: &DataFrame, name: &str) -> SitemapperResult<Vec<Option<String>>> {
    Ok(frame
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn count_column(frame: &DataFrame, name: &str) -> SitemapperResult<Vec<Option<i64>>> {
    Ok(frame.column(name)?.i64()?.into_iter().collect())
}

fn coordinate_column(frame: &DataFrame, name: &str) -> SitemapperResult<Vec<Option<f64>>> {
    Ok(frame.column(name)?.f64()?.into_iter().collect())
}

/// One value per fiscal quarter, `None` where the facility did not report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterValues(pub [Option<i64>; 4]);

impl QuarterValues {
    pub fn get(&self, quarter: Quarter) -> Option<i64> {
        self.0[quarter.index()]
    }
}

impl From<[i64; 4]> for QuarterValues {
    fn from(values: [i64; 4]) -> Self {
        Self(values.map(Some))
    }
}

/// A supported health facility and its quarterly treatment figures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub code: String,
    pub name: Option<String>,
    pub region: String,
    pub county: String,
    pub sub_county: Option<String>,
    pub owner: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tx_new: QuarterValues,
    pub tx_curr: QuarterValues,
}

/// The facility roster for one fiscal year.
#[derive(Clone, Debug)]
pub struct FacilityTable {
    frame: DataFrame,
    fiscal_year: u16,
}

impl FacilityTable {
    pub fn load(path: impl AsRef<Path>, fiscal_year: Option<u16>) -> SitemapperResult<Self> {
        let raw = read_csv(path.as_ref(), TABLE::FACILITIES)?;
        Self::from_frame(&raw, fiscal_year)
    }

    /// Validate a raw frame. Without an explicit `fiscal_year` the latest year named by a
    /// quarterly metric column is used.
    pub fn from_frame(raw: &DataFrame, fiscal_year: Option<u16>) -> SitemapperResult<Self> {
        let fiscal_year = match fiscal_year {
            Some(year) => year,
            None => latest_fiscal_year(raw.get_column_names()).ok_or_else(|| {
                SitemapperError::Schema {
                    table: TABLE::FACILITIES.to_string(),
                    missing: vec!["txnew<year>Q1..Q4".into(), "<year>Q1..Q4".into()],
                }
            })?,
        };
        debug!("Using fiscal year {fiscal_year} for '{}'", TABLE::FACILITIES);

        let mut columns = vec![
            ColumnSpec::new(COL::FACILITY_CODE, ColumnKind::Key),
            ColumnSpec::new(COL::FACILITY_NAME, ColumnKind::Text),
            ColumnSpec::new(COL::REGION, ColumnKind::Key),
            ColumnSpec::new(COL::COUNTY, ColumnKind::Key),
            ColumnSpec::new(COL::SUB_COUNTY, ColumnKind::Text),
            ColumnSpec::new(COL::OWNER, ColumnKind::Text),
            ColumnSpec::new(COL::LATITUDE, ColumnKind::Coordinate),
            ColumnSpec::new(COL::LONGITUDE, ColumnKind::Coordinate),
        ];
        for indicator in [Indicator::TxNew, Indicator::TxCurr] {
            columns.extend(
                MetricColumn::quarters(indicator, fiscal_year)
                    .map(|column| ColumnSpec::new(column.to_string(), ColumnKind::Count)),
            );
        }
        let frame = validate(raw, TABLE::FACILITIES, &columns)?;
        info!(
            "Loaded {} facilities for fiscal year {fiscal_year}",
            frame.height()
        );
        Ok(Self { frame, fiscal_year })
    }

    pub fn from_records(records: &[FacilityRecord], fiscal_year: u16) -> SitemapperResult<Self> {
        let mut series = vec![
            Series::new(
                COL::FACILITY_CODE,
                records.iter().map(|r| r.code.as_str()).collect_vec(),
            ),
            Series::new(
                COL::FACILITY_NAME,
                records.iter().map(|r| r.name.as_deref()).collect_vec(),
            ),
            Series::new(
                COL::REGION,
                records.iter().map(|r| r.region.as_str()).collect_vec(),
            ),
            Series::new(
                COL::COUNTY,
                records.iter().map(|r| r.county.as_str()).collect_vec(),
            ),
            Series::new(
                COL::SUB_COUNTY,
                records.iter().map(|r| r.sub_county.as_deref()).collect_vec(),
            ),
            Series::new(
                COL::OWNER,
                records.iter().map(|r| r.owner.as_deref()).collect_vec(),
            ),
            Series::new(
                COL::LATITUDE,
                records.iter().map(|r| r.latitude).collect_vec(),
            ),
            Series::new(
                COL::LONGITUDE,
                records.iter().map(|r| r.longitude).collect_vec(),
            ),
        ];
        for quarter in Quarter::ALL {
            let column = MetricColumn::new(Indicator::TxNew, fiscal_year, quarter);
            series.push(Series::new(
                &column.to_string(),
                records.iter().map(|r| r.tx_new.get(quarter)).collect_vec(),
            ));
        }
        for quarter in Quarter::ALL {
            let column = MetricColumn::new(Indicator::TxCurr, fiscal_year, quarter);
            series.push(Series::new(
                &column.to_string(),
                records.iter().map(|r| r.tx_curr.get(quarter)).collect_vec(),
            ));
        }
        Self::from_frame(&DataFrame::new(series)?, Some(fiscal_year))
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn fiscal_year(&self) -> u16 {
        self.fiscal_year
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn metric_column(&self, indicator: Indicator, quarter: Quarter) -> String {
        MetricColumn::new(indicator, self.fiscal_year, quarter).to_string()
    }

    pub fn metric_columns(&self, indicator: Indicator) -> Vec<String> {
        MetricColumn::quarters(indicator, self.fiscal_year)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn records(&self) -> SitemapperResult<Vec<FacilityRecord>> {
        let codes = text_column(&self.frame, COL::FACILITY_CODE)?;
        let names = text_column(&self.frame, COL::FACILITY_NAME)?;
        let regions = text_column(&self.frame, COL::REGION)?;
        let counties = text_column(&self.frame, COL::COUNTY)?;
        let sub_counties = text_column(&self.frame, COL::SUB_COUNTY)?;
        let owners = text_column(&self.frame, COL::OWNER)?;
        let latitudes = coordinate_column(&self.frame, COL::LATITUDE)?;
        let longitudes = coordinate_column(&self.frame, COL::LONGITUDE)?;
        let tx_new = self
            .metric_columns(Indicator::TxNew)
            .iter()
            .map(|name| count_column(&self.frame, name))
            .collect::<SitemapperResult<Vec<_>>>()?;
        let tx_curr = self
            .metric_columns(Indicator::TxCurr)
            .iter()
            .map(|name| count_column(&self.frame, name))
            .collect::<SitemapperResult<Vec<_>>>()?;

        Ok((0..self.frame.height())
            .map(|idx| FacilityRecord {
                code: codes[idx].clone().unwrap_or_default(),
                name: names[idx].clone(),
                region: regions[idx].clone().unwrap_or_default(),
                county: counties[idx].clone().unwrap_or_default(),
                sub_county: sub_counties[idx].clone(),
                owner: owners[idx].clone(),
                latitude: latitudes[idx],
                longitude: longitudes[idx],
                tx_new: QuarterValues(std::array::from_fn(|q| tx_new[q][idx])),
                tx_curr: QuarterValues(std::array::from_fn(|q| tx_curr[q][idx])),
            })
            .collect())
    }
}

/// Tested and positive counts reported for a county.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestingTotalsRecord {
    pub county: String,
    pub tested: Option<i64>,
    pub positive: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct TestingTotalsTable {
    frame: DataFrame,
}

impl TestingTotalsTable {
    fn columns() -> [ColumnSpec; 3] {
        [
            ColumnSpec::new(COL::COUNTY, ColumnKind::Key),
            ColumnSpec::new(COL::TESTED, ColumnKind::Count),
            ColumnSpec::new(COL::POSITIVE, ColumnKind::Count),
        ]
    }

    pub fn load(path: impl AsRef<Path>) -> SitemapperResult<Self> {
        let raw = read_csv(path.as_ref(), TABLE::TESTING_TOTALS)?;
        Self::from_frame(&raw)
    }

    pub fn from_frame(raw: &DataFrame) -> SitemapperResult<Self> {
        let frame = validate(raw, TABLE::TESTING_TOTALS, &Self::columns())?;
        info!("Loaded testing totals for {} counties", frame.height());
        Ok(Self { frame })
    }

    pub fn from_records(records: &[TestingTotalsRecord]) -> SitemapperResult<Self> {
        let frame = DataFrame::new(vec![
            Series::new(
                COL::COUNTY,
                records.iter().map(|r| r.county.as_str()).collect_vec(),
            ),
            Series::new(COL::TESTED, records.iter().map(|r| r.tested).collect_vec()),
            Series::new(
                COL::POSITIVE,
                records.iter().map(|r| r.positive).collect_vec(),
            ),
        ])?;
        Self::from_frame(&frame)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn records(&self) -> SitemapperResult<Vec<TestingTotalsRecord>> {
        let counties = text_column(&self.frame, COL::COUNTY)?;
        let tested = count_column(&self.frame, COL::TESTED)?;
        let positive = count_column(&self.frame, COL::POSITIVE)?;
        Ok(itertools::izip!(counties, tested, positive)
            .map(|(county, tested, positive)| TestingTotalsRecord {
                county: county.unwrap_or_default(),
                tested,
                positive,
            })
            .collect())
    }
}

/// Tests administered through one service delivery channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointRecord {
    pub entry_point: String,
    pub tested: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct EntryPointTable {
    frame: DataFrame,
}

impl EntryPointTable {
    fn columns() -> [ColumnSpec; 2] {
        [
            ColumnSpec::new(COL::ENTRY_POINT, ColumnKind::Key),
            ColumnSpec::new(COL::TESTED, ColumnKind::Count),
        ]
    }

    pub fn load(path: impl AsRef<Path>) -> SitemapperResult<Self> {
        let raw = read_csv(path.as_ref(), TABLE::ENTRY_POINTS)?;
        Self::from_frame(&raw)
    }

    pub fn from_frame(raw: &DataFrame) -> SitemapperResult<Self> {
        let frame = validate(raw, TABLE::ENTRY_POINTS, &Self::columns())?;
        info!("Loaded {} entry point rows", frame.height());
        Ok(Self { frame })
    }

    pub fn from_records(records: &[EntryPointRecord]) -> SitemapperResult<Self> {
        let frame = DataFrame::new(vec![
            Series::new(
                COL::ENTRY_POINT,
                records.iter().map(|r| r.entry_point.as_str()).collect_vec(),
            ),
            Series::new(COL::TESTED, records.iter().map(|r| r.tested).collect_vec()),
        ])?;
        Self::from_frame(&frame)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn records(&self) -> SitemapperResult<Vec<EntryPointRecord>> {
        let labels = text_column(&self.frame, COL::ENTRY_POINT)?;
        let tested = count_column(&self.frame, COL::TESTED)?;
        Ok(labels
            .into_iter()
            .zip(tested)
            .map(|(label, tested)| EntryPointRecord {
                entry_point: label.unwrap_or_default(),
                tested,
            })
            .collect())
    }
}
