use std::path::PathBuf;

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

use crate::{
    dashboard::{Revision, ViewKind},
    period::Quarter,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the cleaned exports.
    pub data_dir: PathBuf,
    pub facilities_file: String,
    pub testing_totals_file: String,
    pub entry_points_file: String,
    /// Fiscal year of the quarterly metric columns. Inferred from the roster headers when unset.
    pub fiscal_year: Option<u16>,
    /// Reporting quarter for current-on-treatment figures and deltas.
    pub quarter: Quarter,
    pub revision: Revision,
    /// Explicit list of views, overriding `revision`.
    pub views: Option<NonEmpty<ViewKind>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: "processed_data".into(),
            facilities_file: "cleaned_data.csv".into(),
            testing_totals_file: "testing_totals.csv".into(),
            entry_points_file: "entry_points.csv".into(),
            fiscal_year: None,
            quarter: Quarter::Q4,
            revision: Revision::default(),
            views: None,
        }
    }
}

impl Config {
    pub fn facilities_path(&self) -> PathBuf {
        self.data_dir.join(&self.facilities_file)
    }

    pub fn testing_totals_path(&self) -> PathBuf {
        self.data_dir.join(&self.testing_totals_file)
    }

    pub fn entry_points_path(&self) -> PathBuf {
        self.data_dir.join(&self.entry_points_file)
    }

    /// The views to render: `views` when set, otherwise the views of `revision`.
    pub fn selected_views(&self) -> NonEmpty<ViewKind> {
        self.views
            .clone()
            .unwrap_or_else(|| self.revision.views())
    }
}

#[cfg(test)]
mod tests {
    use nonempty::nonempty;

    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"data_dir": "/srv/dashboard"}"#).unwrap();
        assert_eq!(
            config.facilities_path(),
            PathBuf::from("/srv/dashboard/cleaned_data.csv")
        );
        assert_eq!(config.quarter, Quarter::Q4);
        assert_eq!(config.selected_views(), Revision::Full.views());
    }

    #[test]
    fn explicit_views_override_revision() {
        let config = Config {
            views: Some(nonempty![ViewKind::SitesPerCounty]),
            ..Default::default()
        };
        assert_eq!(config.selected_views(), nonempty![ViewKind::SitesPerCounty]);
    }
}
