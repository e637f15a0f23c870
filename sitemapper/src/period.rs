//! Fiscal quarters and the naming convention of the quarterly metric columns.

use std::{fmt::Display, str::FromStr, sync::OnceLock};

use anyhow::anyhow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::COL;

const METRIC_COLUMN_PATTERN: &str = r"^(txnew)?(\d{4})(Q[1-4])$";

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    strum_macros::Display,
)]
#[strum(ascii_case_insensitive)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    pub fn index(self) -> usize {
        match self {
            Quarter::Q1 => 0,
            Quarter::Q2 => 1,
            Quarter::Q3 => 2,
            Quarter::Q4 => 3,
        }
    }

    /// The quarter before this one within the same fiscal year.
    pub fn previous(self) -> Option<Quarter> {
        match self {
            Quarter::Q1 => None,
            Quarter::Q2 => Some(Quarter::Q1),
            Quarter::Q3 => Some(Quarter::Q2),
            Quarter::Q4 => Some(Quarter::Q3),
        }
    }
}

/// The two quarterly indicators carried by the facility roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    /// Individuals newly started on treatment during the quarter.
    TxNew,
    /// Individuals active on treatment at the end of the quarter.
    TxCurr,
}

/// A parsed quarterly metric column name such as `txnew2023Q1` or `2023Q4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetricColumn {
    pub indicator: Indicator,
    pub fiscal_year: u16,
    pub quarter: Quarter,
}

impl MetricColumn {
    pub fn new(indicator: Indicator, fiscal_year: u16, quarter: Quarter) -> Self {
        Self {
            indicator,
            fiscal_year,
            quarter,
        }
    }

    /// All four quarter columns of an indicator for a fiscal year, in quarter order.
    pub fn quarters(indicator: Indicator, fiscal_year: u16) -> [MetricColumn; 4] {
        Quarter::ALL.map(|quarter| MetricColumn::new(indicator, fiscal_year, quarter))
    }
}

impl Display for MetricColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.indicator {
            Indicator::TxNew => COL::TX_NEW_PREFIX,
            Indicator::TxCurr => "",
        };
        write!(f, "{prefix}{}{}", self.fiscal_year, self.quarter)
    }
}

fn metric_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Unwrap: the pattern is a literal
    RE.get_or_init(|| Regex::new(METRIC_COLUMN_PATTERN).unwrap())
}

impl FromStr for MetricColumn {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = metric_column_regex()
            .captures(value)
            .ok_or_else(|| anyhow!("'{value}' is not a quarterly metric column"))?;
        let indicator = if captures.get(1).is_some() {
            Indicator::TxNew
        } else {
            Indicator::TxCurr
        };
        let fiscal_year = captures[2].parse::<u16>()?;
        let quarter = captures[3].parse::<Quarter>()?;
        Ok(Self::new(indicator, fiscal_year, quarter))
    }
}

/// Latest fiscal year named by any quarterly metric column in `columns`.
pub fn latest_fiscal_year<'a>(columns: impl IntoIterator<Item = &'a str>) -> Option<u16> {
    columns
        .into_iter()
        .filter_map(|name| name.parse::<MetricColumn>().ok())
        .map(|column| column.fiscal_year)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_columns_follow_naming_convention() {
        let names = MetricColumn::quarters(Indicator::TxNew, 2023).map(|c| c.to_string());
        assert_eq!(
            names,
            ["txnew2023Q1", "txnew2023Q2", "txnew2023Q3", "txnew2023Q4"]
        );
        assert_eq!(
            MetricColumn::new(Indicator::TxCurr, 2023, Quarter::Q4).to_string(),
            "2023Q4"
        );
    }

    #[test]
    fn metric_column_parses() {
        let column: MetricColumn = "txnew2024Q3".parse().unwrap();
        assert_eq!(column, MetricColumn::new(Indicator::TxNew, 2024, Quarter::Q3));
        let column: MetricColumn = "2022Q1".parse().unwrap();
        assert_eq!(column, MetricColumn::new(Indicator::TxCurr, 2022, Quarter::Q1));
        assert!("county".parse::<MetricColumn>().is_err());
        assert!("txnew2023Q5".parse::<MetricColumn>().is_err());
    }

    #[test]
    fn latest_fiscal_year_ignores_other_columns() {
        let columns = ["mfl_code", "2022Q4", "txnew2023Q1", "2023Q4", "region"];
        assert_eq!(latest_fiscal_year(columns), Some(2023));
        assert_eq!(latest_fiscal_year(["mfl_code", "county"]), None);
    }

    #[test]
    fn previous_quarter() {
        assert_eq!(Quarter::Q4.previous(), Some(Quarter::Q3));
        assert_eq!(Quarter::Q1.previous(), None);
        assert_eq!("q2".parse::<Quarter>().unwrap(), Quarter::Q2);
    }
}
