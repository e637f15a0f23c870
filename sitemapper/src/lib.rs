use log::debug;

use crate::config::Config;
use crate::dashboard::{DashboardReport, RenderInputs};
use crate::error::SitemapperResult;
use crate::source::FacilityTable;

// Re-exports
pub use column_names as COL;

// Modules
pub mod aggregate;
pub mod column_names;
pub mod config;
pub mod consistency;
pub mod dashboard;
pub mod error;
#[cfg(feature = "formatters")]
pub mod formatters;
pub mod period;
pub mod source;

/// Entry point for rendering the dashboard's derived views
pub struct Dashboard {
    pub config: Config,
}

impl Dashboard {
    /// Setup the Dashboard object with default configuration
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    /// Setup the Dashboard object with custom configuration
    pub fn new_with_config(config: Config) -> Self {
        debug!("config: {config:?}");
        Self { config }
    }

    /// Loads the sources needed by the configured views and builds them. Every call loads its
    /// own copy of the tables.
    pub fn render(&self) -> DashboardReport {
        let views = self.config.selected_views();
        let inputs = RenderInputs::load(&self.config, &views);
        DashboardReport::build(&views, self.config.quarter, &inputs)
    }

    /// Loads the facility roster on its own, e.g. for the map layer
    pub fn facilities(&self) -> SitemapperResult<FacilityTable> {
        FacilityTable::load(self.config.facilities_path(), self.config.fiscal_year)
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::dashboard::ViewKind;

    const ROSTER: &str = "\
mfl_code,facility_name,region,county,sub_county,owner,latitude,longitude,txnew2023Q1,txnew2023Q2,txnew2023Q3,txnew2023Q4,2023Q1,2023Q2,2023Q3,2023Q4
A,Alpha,North,X,X East,FBO,-0.1,34.7,1,1,1,10,5,8,10,15
B,Bravo,North,Y,Y West,FBO,-0.2,34.8,1,1,1,5,3,4,5,5
C,Charlie,South,X,X North,FBO,,,1,1,1,7,3,6,3,2
";

    fn data_dir(with_testing: bool) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cleaned_data.csv"), ROSTER).unwrap();
        if with_testing {
            fs::write(
                dir.path().join("testing_totals.csv"),
                "county,tested,positive\nX,20,5\nY,10,12\n",
            )
            .unwrap();
        }
        fs::write(
            dir.path().join("entry_points.csv"),
            "entry_point,tested\nOPD,12\nPMTCT,3\nOPD,4\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn dashboard_renders_from_files() {
        let dir = data_dir(true);
        let dashboard = Dashboard::new_with_config(Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let report = dashboard.render();
        assert!(report.failures().is_empty());

        let metrics = report.scalar_metrics.ready().unwrap();
        assert_eq!(metrics.current_on_treatment, 22);
        assert_eq!(metrics.previous_on_treatment, Some(18));
        assert_eq!(metrics.net_new, Some(4));
        assert_eq!(metrics.site_count, 3);
        assert_eq!(metrics.county_count, 2);

        let sites = report.sites_per_county.ready().unwrap();
        assert_eq!(sites.keys(), vec!["Y", "X"]);
        let entry_points = report.entry_point_totals.ready().unwrap();
        assert_eq!(entry_points.value("OPD", COL::TESTED), Some(16));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn missing_testing_export_keeps_other_views() {
        let dir = data_dir(false);
        let dashboard = Dashboard::new_with_config(Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let report = dashboard.render();
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, ViewKind::CountyTestingYield);
        assert!(report.regional_new_on_treatment.ready().is_some());
    }

    #[test]
    fn renders_are_repeatable() {
        let dir = data_dir(true);
        let dashboard = Dashboard::new_with_config(Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let first = serde_json::to_string(&dashboard.render()).unwrap();
        let second = serde_json::to_string(&dashboard.render()).unwrap();
        assert_eq!(first, second);
        assert_eq!(dashboard.facilities().unwrap().height(), 3);
    }
}
