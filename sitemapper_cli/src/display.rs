use comfy_table::{presets::NOTHING, *};
use itertools::Itertools;

use sitemapper::{
    aggregate::{AggregateView, CountyTestingYield, ScalarMetrics},
    dashboard::{DashboardReport, ViewKind, ViewOutcome},
    error::ConsistencyWarning,
};

const MISSING: &str = "-";

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn header(names: impl IntoIterator<Item = impl ToString>) -> Vec<Cell> {
    names
        .into_iter()
        .map(|name| Cell::new(name.to_string()).add_attribute(Attribute::Bold))
        .collect()
}

fn optional(value: Option<impl ToString>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

/// Short labels for quarterly columns, e.g. `txnew2023Q1` becomes `Q1`.
fn column_label(column: &str) -> String {
    match column.parse::<sitemapper::period::MetricColumn>() {
        Ok(metric) => metric.quarter.to_string(),
        Err(_) => column.to_string(),
    }
}

pub fn display_aggregate(title: &str, view: &AggregateView) {
    let mut table = new_table();
    table.set_header(header(
        std::iter::once(view.key.clone()).chain(view.columns.iter().map(|c| column_label(c))),
    ));
    for row in &view.rows {
        table.add_row(
            std::iter::once(row.key.clone())
                .chain(row.values.iter().map(ToString::to_string))
                .collect_vec(),
        );
    }
    println!("\n{title}\n{table}");
}

pub fn display_scalar_metrics(metrics: &ScalarMetrics) {
    let mut table = new_table();
    table
        .add_row(vec![
            Cell::new("Sites").add_attribute(Attribute::Bold),
            Cell::new(format!(
                "{} in {} counties",
                metrics.site_count, metrics.county_count
            )),
        ])
        .add_row(vec![
            Cell::new("Current on treatment").add_attribute(Attribute::Bold),
            Cell::new(format!(
                "{} (previous: {})",
                metrics.current_on_treatment,
                optional(metrics.previous_on_treatment)
            )),
        ])
        .add_row(vec![
            Cell::new("New on treatment").add_attribute(Attribute::Bold),
            Cell::new(metrics.new_on_treatment),
        ])
        .add_row(vec![
            Cell::new("Treatment net new").add_attribute(Attribute::Bold),
            Cell::new(format!(
                "{} (previous: {})",
                optional(metrics.net_new),
                optional(metrics.previous_net_new)
            )),
        ])
        .add_row(vec![
            Cell::new("New on treatment growth").add_attribute(Attribute::Bold),
            Cell::new(format!(
                "{} (previous: {})",
                optional(metrics.new_growth),
                optional(metrics.previous_new_growth)
            )),
        ]);
    if let Some(column) = table.column_mut(0) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!(
        "\nMetrics as at fiscal year {} {}\n{table}",
        metrics.fiscal_year, metrics.quarter
    );
}

pub fn display_yield(view: &CountyTestingYield) {
    let mut table = new_table();
    table.set_header(header(["county", "region", "tx_new", "tested", "positive"]));
    for row in &view.counties {
        table.add_row(vec![
            row.county.clone(),
            optional(row.region.as_deref()),
            optional(row.tx_new),
            optional(row.tested),
            optional(row.positive),
        ]);
    }
    println!("\nTesting yield per county\n{table}");

    let mut table = new_table();
    table.set_header(header(["region", "tx_new", "tested", "positive", "positivity"]));
    for row in &view.regions {
        table.add_row(vec![
            row.region.clone(),
            optional(row.tx_new),
            optional(row.tested),
            optional(row.positive),
            optional(row.positivity().map(|p| format!("{:.1}%", p * 100.0))),
        ]);
    }
    println!("\nTesting yield per region\n{table}");
}

pub fn display_warnings(warnings: &[ConsistencyWarning]) {
    if warnings.is_empty() {
        return;
    }
    let mut table = new_table();
    table.set_header(header(["Data caveats"]));
    for warning in warnings {
        table.add_row(vec![warning.to_string()]);
    }
    println!("\n{table}");
}

fn display_outcome<T>(kind: ViewKind, outcome: &ViewOutcome<T>, show: impl FnOnce(&T)) {
    match outcome {
        ViewOutcome::Ready(view) => show(view),
        ViewOutcome::Failed(error) => println!("\n{kind}: unavailable ({error})"),
        ViewOutcome::NotRequested => {}
    }
}

pub fn display_report(report: &DashboardReport) {
    display_outcome(
        ViewKind::ScalarMetrics,
        &report.scalar_metrics,
        display_scalar_metrics,
    );
    display_outcome(
        ViewKind::RegionalNewOnTreatment,
        &report.regional_new_on_treatment,
        |view| display_aggregate("New on treatment", view),
    );
    display_outcome(
        ViewKind::RegionalCurrentOnTreatment,
        &report.regional_current_on_treatment,
        |view| display_aggregate("Clients current on treatment", view),
    );
    display_outcome(
        ViewKind::SitesPerCounty,
        &report.sites_per_county,
        |view| display_aggregate("Sites per county", view),
    );
    display_outcome(
        ViewKind::CountyTestingYield,
        &report.county_testing_yield,
        display_yield,
    );
    display_outcome(
        ViewKind::EntryPointTotals,
        &report.entry_point_totals,
        |view| display_aggregate("Tests per entry point", view),
    );
    display_warnings(&report.warnings);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarterly_columns_get_short_labels() {
        assert_eq!(column_label("txnew2023Q1"), "Q1");
        assert_eq!(column_label("2023Q4"), "Q4");
        assert_eq!(column_label("count"), "count");
    }

    #[test]
    fn missing_values_are_dashed() {
        assert_eq!(optional(None::<i64>), "-");
        assert_eq!(optional(Some(3)), "3");
    }
}
