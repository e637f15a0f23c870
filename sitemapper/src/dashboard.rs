//! Which views a dashboard revision shows, and how one render pass builds them.
//!
//! Each source table is loaded independently for every render. A failure to load one table only
//! fails the views that need it; everything else still renders.

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};
use nonempty::{nonempty, NonEmpty};
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::EnumString;

use crate::{
    aggregate::{
        join_yield, new_on_treatment_by_county, regional_current_on_treatment,
        regional_new_on_treatment, scalar_metrics, sites_per_county, sum_by_entry_point,
        AggregateView, CountyRegionMap, CountyTestingYield, DisplayOrder, ScalarMetrics,
    },
    config::Config,
    consistency::{check_facilities, check_testing_totals},
    error::{ConsistencyWarning, SitemapperError, SitemapperResult},
    period::Quarter,
    source::{EntryPointTable, FacilityTable, TestingTotalsTable},
};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ViewKind {
    ScalarMetrics,
    RegionalNewOnTreatment,
    RegionalCurrentOnTreatment,
    SitesPerCounty,
    CountyTestingYield,
    EntryPointTotals,
}

impl ViewKind {
    pub fn needs_facilities(self) -> bool {
        !matches!(self, ViewKind::EntryPointTotals)
    }

    pub fn needs_testing_totals(self) -> bool {
        matches!(self, ViewKind::CountyTestingYield)
    }

    pub fn needs_entry_points(self) -> bool {
        matches!(self, ViewKind::EntryPointTotals)
    }
}

/// Named view sets for the dashboard revisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Revision {
    /// Site mapper: metric cards, regional treatment figures and sites per county.
    Treatment,
    /// Treatment views plus testing yield and entry point totals.
    #[default]
    Full,
}

impl Revision {
    pub fn views(self) -> NonEmpty<ViewKind> {
        let mut views = nonempty![
            ViewKind::ScalarMetrics,
            ViewKind::RegionalNewOnTreatment,
            ViewKind::RegionalCurrentOnTreatment,
            ViewKind::SitesPerCounty
        ];
        if self == Revision::Full {
            views.push(ViewKind::CountyTestingYield);
            views.push(ViewKind::EntryPointTotals);
        }
        views
    }
}

/// Result of loading one source table. The error is shared by every view that needs the table.
pub type SourceResult<T> = Result<T, Arc<SitemapperError>>;

fn serialize_error<S: Serializer>(
    error: &Arc<SitemapperError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", content = "view", rename_all = "snake_case")]
pub enum ViewOutcome<T> {
    Ready(T),
    #[serde(serialize_with = "serialize_error")]
    Failed(Arc<SitemapperError>),
    NotRequested,
}

impl<T> ViewOutcome<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            ViewOutcome::Ready(view) => Some(view),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SitemapperError> {
        match self {
            ViewOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl<T> From<SitemapperResult<T>> for ViewOutcome<T> {
    fn from(result: SitemapperResult<T>) -> Self {
        match result {
            Ok(view) => ViewOutcome::Ready(view),
            Err(error) => ViewOutcome::Failed(Arc::new(error)),
        }
    }
}

/// The source tables of one render pass. `None` means the table was not needed.
#[derive(Debug, Default)]
pub struct RenderInputs {
    pub facilities: Option<SourceResult<FacilityTable>>,
    pub testing_totals: Option<SourceResult<TestingTotalsTable>>,
    pub entry_points: Option<SourceResult<EntryPointTable>>,
}

fn shared<T>(result: SitemapperResult<T>) -> SourceResult<T> {
    result.map_err(|e| {
        error!("{e}");
        Arc::new(e)
    })
}

impl RenderInputs {
    /// Load the tables needed by `views`, each on its own.
    pub fn load(config: &Config, views: &NonEmpty<ViewKind>) -> Self {
        let needs = |f: fn(ViewKind) -> bool| views.iter().any(|&view| f(view));
        Self {
            facilities: needs(ViewKind::needs_facilities).then(|| {
                shared(FacilityTable::load(
                    config.facilities_path(),
                    config.fiscal_year,
                ))
            }),
            testing_totals: needs(ViewKind::needs_testing_totals)
                .then(|| shared(TestingTotalsTable::load(config.testing_totals_path()))),
            entry_points: needs(ViewKind::needs_entry_points)
                .then(|| shared(EntryPointTable::load(config.entry_points_path()))),
        }
    }
}

fn source<'a, T>(name: &str, input: &'a Option<SourceResult<T>>) -> SourceResult<&'a T> {
    match input {
        Some(Ok(table)) => Ok(table),
        Some(Err(error)) => Err(error.clone()),
        None => Err(Arc::new(anyhow!("'{name}' was not loaded for this render").into())),
    }
}

fn build<S, T>(
    requested: bool,
    input: SourceResult<S>,
    view: impl FnOnce(S) -> SitemapperResult<T>,
) -> ViewOutcome<T> {
    if !requested {
        return ViewOutcome::NotRequested;
    }
    match input {
        Ok(input) => view(input).into(),
        Err(error) => ViewOutcome::Failed(error),
    }
}

/// Everything one dashboard render shows.
#[derive(Debug, Serialize)]
pub struct DashboardReport {
    pub fiscal_year: Option<u16>,
    pub quarter: Quarter,
    pub scalar_metrics: ViewOutcome<ScalarMetrics>,
    pub regional_new_on_treatment: ViewOutcome<AggregateView>,
    pub regional_current_on_treatment: ViewOutcome<AggregateView>,
    pub sites_per_county: ViewOutcome<AggregateView>,
    pub county_testing_yield: ViewOutcome<CountyTestingYield>,
    pub entry_point_totals: ViewOutcome<AggregateView>,
    pub warnings: Vec<ConsistencyWarning>,
}

impl DashboardReport {
    pub fn build(views: &NonEmpty<ViewKind>, quarter: Quarter, inputs: &RenderInputs) -> Self {
        let requested = |kind: ViewKind| views.contains(&kind);
        let facilities = source("facilities", &inputs.facilities);
        let testing_totals = source("testing totals", &inputs.testing_totals);
        let entry_points = source("entry points", &inputs.entry_points);

        let mut warnings = vec![];
        if let Some(Ok(table)) = &inputs.facilities {
            collect_warnings(&mut warnings, check_facilities(table));
        }
        if let Some(Ok(table)) = &inputs.testing_totals {
            collect_warnings(&mut warnings, check_testing_totals(table));
        }

        let yield_inputs = facilities
            .clone()
            .and_then(|f| testing_totals.clone().map(|t| (f, t)));
        let county_testing_yield = build(
            requested(ViewKind::CountyTestingYield),
            yield_inputs,
            |(facilities, testing_totals)| {
                let new_by_county = new_on_treatment_by_county(facilities)?;
                let county_regions = CountyRegionMap::from_facilities(facilities)?;
                let (view, join_warnings) =
                    join_yield(&new_by_county, testing_totals, &county_regions)?;
                warnings.extend(join_warnings);
                Ok(view)
            },
        );

        let report = Self {
            fiscal_year: facilities.as_ref().ok().map(|f| f.fiscal_year()),
            quarter,
            scalar_metrics: build(
                requested(ViewKind::ScalarMetrics),
                facilities.clone(),
                |f| scalar_metrics(f, quarter),
            ),
            regional_new_on_treatment: build(
                requested(ViewKind::RegionalNewOnTreatment),
                facilities.clone(),
                regional_new_on_treatment,
            ),
            regional_current_on_treatment: build(
                requested(ViewKind::RegionalCurrentOnTreatment),
                facilities.clone(),
                |f| regional_current_on_treatment(f, quarter),
            ),
            sites_per_county: build(
                requested(ViewKind::SitesPerCounty),
                facilities,
                sites_per_county,
            ),
            county_testing_yield,
            entry_point_totals: build(
                requested(ViewKind::EntryPointTotals),
                entry_points,
                |e| sum_by_entry_point(e, &DisplayOrder::FirstSeen),
            ),
            warnings,
        };
        info!(
            "Rendered {} view(s), {} failed, {} warning(s)",
            views.len(),
            report.failures().len(),
            report.warnings.len()
        );
        report
    }

    /// Views that were requested but could not be built.
    pub fn failures(&self) -> Vec<(ViewKind, &SitemapperError)> {
        [
            (ViewKind::ScalarMetrics, self.scalar_metrics.error()),
            (
                ViewKind::RegionalNewOnTreatment,
                self.regional_new_on_treatment.error(),
            ),
            (
                ViewKind::RegionalCurrentOnTreatment,
                self.regional_current_on_treatment.error(),
            ),
            (ViewKind::SitesPerCounty, self.sites_per_county.error()),
            (
                ViewKind::CountyTestingYield,
                self.county_testing_yield.error(),
            ),
            (ViewKind::EntryPointTotals, self.entry_point_totals.error()),
        ]
        .into_iter()
        .filter_map(|(kind, error)| error.map(|e| (kind, e)))
        .collect()
    }

    /// The grouped view of `kind`, for the kinds rendered as a single grouped table.
    pub fn aggregate(&self, kind: ViewKind) -> Option<&ViewOutcome<AggregateView>> {
        match kind {
            ViewKind::RegionalNewOnTreatment => Some(&self.regional_new_on_treatment),
            ViewKind::RegionalCurrentOnTreatment => Some(&self.regional_current_on_treatment),
            ViewKind::SitesPerCounty => Some(&self.sites_per_county),
            ViewKind::EntryPointTotals => Some(&self.entry_point_totals),
            ViewKind::ScalarMetrics | ViewKind::CountyTestingYield => None,
        }
    }
}

fn collect_warnings(
    warnings: &mut Vec<ConsistencyWarning>,
    checked: SitemapperResult<Vec<ConsistencyWarning>>,
) {
    match checked {
        Ok(found) => warnings.extend(found),
        Err(e) => error!("Consistency check failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::YieldScope,
        source::{EntryPointRecord, FacilityRecord, QuarterValues, TestingTotalsRecord},
    };

    fn inputs() -> RenderInputs {
        let facilities = [("A", "North", "X", 10), ("B", "North", "Y", 5), ("C", "South", "X", 7)]
            .map(|(code, region, county, q4)| FacilityRecord {
                code: code.into(),
                region: region.into(),
                county: county.into(),
                tx_new: [1, 1, 1, q4].into(),
                tx_curr: QuarterValues([Some(1), Some(2), Some(3), Some(q4)]),
                ..Default::default()
            });
        let testing = [("X", 20, 5), ("Y", 10, 12)].map(|(county, tested, positive)| {
            TestingTotalsRecord {
                county: county.into(),
                tested: Some(tested),
                positive: Some(positive),
            }
        });
        RenderInputs {
            facilities: Some(shared(FacilityTable::from_records(&facilities, 2023))),
            testing_totals: Some(shared(TestingTotalsTable::from_records(&testing))),
            entry_points: Some(shared(EntryPointTable::from_records(&[EntryPointRecord {
                entry_point: "OPD".into(),
                tested: Some(4),
            }]))),
        }
    }

    #[test]
    fn full_revision_renders_every_view() {
        let report = DashboardReport::build(&Revision::Full.views(), Quarter::Q4, &inputs());
        assert!(report.failures().is_empty());
        assert_eq!(report.fiscal_year, Some(2023));
        assert_eq!(
            report.scalar_metrics.ready().unwrap().current_on_treatment,
            22
        );
        let regional = report.regional_current_on_treatment.ready().unwrap();
        assert_eq!(regional.value("North", "2023Q4"), Some(15));
        assert!(report.county_testing_yield.ready().is_some());
        assert!(report.warnings.contains(&ConsistencyWarning::PositiveExceedsTested {
            scope: YieldScope::County,
            name: "Y".into(),
            tested: 10,
            positive: 12,
        }));
    }

    #[test]
    fn treatment_revision_skips_testing_views() {
        let report = DashboardReport::build(&Revision::Treatment.views(), Quarter::Q4, &inputs());
        assert!(matches!(
            report.county_testing_yield,
            ViewOutcome::NotRequested
        ));
        assert!(matches!(report.entry_point_totals, ViewOutcome::NotRequested));
        assert!(report.sites_per_county.ready().is_some());
    }

    #[test]
    fn missing_table_only_fails_dependent_views() {
        let mut inputs = inputs();
        inputs.testing_totals = Some(Err(Arc::new(SitemapperError::SourceNotFound {
            table: "testing_totals".into(),
            path: "testing_totals.csv".into(),
        })));
        let report = DashboardReport::build(&Revision::Full.views(), Quarter::Q4, &inputs);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, ViewKind::CountyTestingYield);
        assert!(report.regional_new_on_treatment.ready().is_some());
        assert!(report.entry_point_totals.ready().is_some());
    }

    #[test]
    fn unloaded_table_fails_a_requested_view() {
        let mut inputs = inputs();
        inputs.entry_points = None;
        let report = DashboardReport::build(
            &nonempty![ViewKind::EntryPointTotals],
            Quarter::Q4,
            &inputs,
        );
        assert!(report.entry_point_totals.error().is_some());
        assert!(matches!(report.scalar_metrics, ViewOutcome::NotRequested));
    }

    #[test]
    fn report_serializes_outcomes() {
        let mut inputs = inputs();
        inputs.facilities = Some(Err(Arc::new(SitemapperError::Schema {
            table: "facilities".into(),
            missing: vec!["county".into()],
        })));
        let report = DashboardReport::build(
            &nonempty![ViewKind::SitesPerCounty, ViewKind::EntryPointTotals],
            Quarter::Q4,
            &inputs,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sites_per_county"]["status"], "failed");
        assert_eq!(
            json["sites_per_county"]["view"],
            "Table 'facilities' is missing required column(s): county"
        );
        assert_eq!(json["entry_point_totals"]["status"], "ready");
        assert_eq!(json["scalar_metrics"]["status"], "not_requested");
    }

    #[test]
    fn view_kinds_parse_from_kebab_case() {
        assert_eq!(
            "sites-per-county".parse::<ViewKind>().unwrap(),
            ViewKind::SitesPerCounty
        );
        assert_eq!(ViewKind::CountyTestingYield.to_string(), "county-testing-yield");
        assert_eq!("treatment".parse::<Revision>().unwrap(), Revision::Treatment);
    }
}
