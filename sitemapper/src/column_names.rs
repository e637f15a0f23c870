//! Column names of the source exports and of the derived views. These must stay in sync with the
//! headers produced by the cleaning step upstream of the dashboard.

pub const FACILITY_CODE: &str = "mfl_code";
pub const FACILITY_NAME: &str = "facility_name";
pub const REGION: &str = "region";
pub const COUNTY: &str = "county";
pub const SUB_COUNTY: &str = "sub_county";
pub const OWNER: &str = "owner";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

pub const TESTED: &str = "tested";
pub const POSITIVE: &str = "positive";

pub const ENTRY_POINT: &str = "entry_point";

pub const SITE_COUNT: &str = "count";
pub const TX_NEW: &str = "tx_new";

/// Prefix of the new-on-treatment metric columns, e.g. `txnew2023Q1`. Current-on-treatment
/// columns carry no prefix, e.g. `2023Q1`.
pub const TX_NEW_PREFIX: &str = "txnew";
