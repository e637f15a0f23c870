//! Error types.

use serde::Serialize;

/// Fatal errors. Each one aborts the views that depend on the affected table only.
#[derive(thiserror::Error, Debug)]
pub enum SitemapperError {
    #[error("Source table '{table}' not found at {path}")]
    SourceNotFound { table: String, path: String },
    #[error("Table '{table}' is missing required column(s): {}", missing.join(", "))]
    Schema { table: String, missing: Vec<String> },
    #[error("Table '{table}' row {row}, column '{column}': invalid value '{value}'")]
    DataFormat {
        table: String,
        row: usize,
        column: String,
        value: String,
    },
    #[error("Wrapped polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("std IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Wrapped anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type SitemapperResult<T> = Result<T, SitemapperError>;

/// Where a positive > tested violation was observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum YieldScope {
    County,
    Region,
}

/// Soft invariant violations. They are surfaced alongside the views and never halt a render.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    #[error("{scope} '{name}' reports {positive} positive out of {tested} tested")]
    PositiveExceedsTested {
        scope: YieldScope,
        name: String,
        tested: i64,
        positive: i64,
    },
    #[error("facility code '{code}' appears on {rows} rows")]
    DuplicateFacilityCode { code: String, rows: usize },
    #[error("county '{county}' appears on {rows} rows of '{table}' and has been summed")]
    RepeatedCounty {
        table: String,
        county: String,
        rows: usize,
    },
    #[error("county '{county}' has testing totals but no supported facility")]
    UnmatchedCounty { county: String },
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_anyhow() {
        let anyhow_error = anyhow!("An anyhow error");
        let error: SitemapperError = anyhow_error.into();
        assert_eq!(error.to_string(), "Wrapped anyhow error: An anyhow error");
    }

    #[test]
    fn schema_error_lists_every_missing_column() {
        let error = SitemapperError::Schema {
            table: "facilities".into(),
            missing: vec!["county".into(), "txnew2023Q1".into()],
        };
        assert_eq!(
            error.to_string(),
            "Table 'facilities' is missing required column(s): county, txnew2023Q1"
        );
    }

    #[test]
    fn warning_names_the_scope() {
        let warning = ConsistencyWarning::PositiveExceedsTested {
            scope: YieldScope::County,
            name: "Y".into(),
            tested: 10,
            positive: 12,
        };
        assert_eq!(
            warning.to_string(),
            "county 'Y' reports 12 positive out of 10 tested"
        );
    }
}
