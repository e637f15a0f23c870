use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context};
use clap::{command, Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::{debug, error, info};
use nonempty::nonempty;
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use sitemapper::{
    config::Config,
    consistency::{check_facilities, check_testing_totals},
    dashboard::{ViewKind, ViewOutcome},
    error::SitemapperError,
    formatters::{
        CSVFormatter, GeoJSONFormatter, JSONFormatter, OutputFormatter, OutputGenerator, ToFrame,
    },
    source::{EntryPointTable, FacilityTable, TestingTotalsTable},
    Dashboard,
};
use strum_macros::EnumString;

use crate::display::{
    display_aggregate, display_report, display_scalar_metrics, display_warnings, display_yield,
};

/// Output formats for a single derived view.
#[derive(Clone, Debug, Default, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum ViewFormat {
    #[default]
    Table,
    Csv,
    Json,
}

/// Output formats for the facility roster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum SitesFormat {
    #[default]
    GeoJSON,
    Csv,
    Json,
}

impl From<&SitesFormat> for OutputFormatter {
    fn from(value: &SitesFormat) -> Self {
        match value {
            SitesFormat::GeoJSON => OutputFormatter::GeoJSON(GeoJSONFormatter),
            SitesFormat::Csv => OutputFormatter::Csv(CSVFormatter),
            SitesFormat::Json => OutputFormatter::Json(JSONFormatter),
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> anyhow::Result<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

fn write_json<T, U>(value: &T, output_file: Option<U>) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let f = File::create(output_file).context("Failed to write output")?;
        serde_json::to_writer_pretty(f, value)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout_lock, value)?;
        writeln!(stdout_lock)?;
    }
    Ok(())
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> anyhow::Result<()>;
}

/// The `summary` command renders every selected view.
#[derive(Args, Debug)]
pub struct SummaryCommand {
    #[arg(long, help = "Print the full report as JSON")]
    json: bool,
}

impl RunCommand for SummaryCommand {
    fn run(&self, config: Config) -> anyhow::Result<()> {
        info!("Running `summary` subcommand");
        let report = Dashboard::new_with_config(config).render();
        if self.json {
            write_json(&report, None::<&Path>)?;
        } else {
            display_report(&report);
        }
        Ok(())
    }
}

/// The `view` command renders one derived view, regardless of the configured selection.
#[derive(Args, Debug)]
pub struct ViewCommand {
    #[arg(help = "View to render, e.g. `sites-per-county` or `county-testing-yield`")]
    kind: ViewKind,
    #[arg(
        short = 'f',
        long,
        value_name = "table|csv|json",
        default_value = "table",
        help = "Output format for the view"
    )]
    output_format: ViewFormat,
    #[arg(short = 'o', long, help = "Output file to place the view")]
    output_file: Option<PathBuf>,
}

impl ViewCommand {
    fn output<T>(
        &self,
        outcome: &ViewOutcome<T>,
        table: impl FnOnce(&T),
        frame: impl FnOnce(&T) -> anyhow::Result<DataFrame>,
    ) -> anyhow::Result<()>
    where
        T: Serialize,
    {
        let view = match outcome {
            ViewOutcome::Ready(view) => view,
            ViewOutcome::Failed(error) => bail!("Failed to render {}: {error}", self.kind),
            ViewOutcome::NotRequested => bail!("{} was not rendered", self.kind),
        };
        match self.output_format {
            ViewFormat::Table => table(view),
            ViewFormat::Csv => write_output(CSVFormatter, frame(view)?, self.output_file.as_ref())?,
            ViewFormat::Json => write_json(view, self.output_file.as_ref())?,
        }
        Ok(())
    }
}

impl RunCommand for ViewCommand {
    fn run(&self, config: Config) -> anyhow::Result<()> {
        info!("Running `view` subcommand");
        let config = Config {
            views: Some(nonempty![self.kind]),
            ..config
        };
        let report = Dashboard::new_with_config(config).render();
        match self.kind {
            ViewKind::ScalarMetrics => self.output(
                &report.scalar_metrics,
                display_scalar_metrics,
                |metrics| Ok(metrics.to_frame()?),
            )?,
            ViewKind::CountyTestingYield => self.output(
                &report.county_testing_yield,
                display_yield,
                |view| Ok(view.counties.to_frame()?),
            )?,
            kind => {
                let outcome = report
                    .aggregate(kind)
                    .ok_or_else(|| anyhow!("{kind} is not a grouped view"))?;
                self.output(
                    outcome,
                    |view| display_aggregate(&kind.to_string(), view),
                    |view| Ok(view.to_frame()?),
                )?
            }
        }
        if self.output_format == ViewFormat::Table {
            display_warnings(&report.warnings);
        }
        Ok(())
    }
}

/// The `sites` command outputs the facility roster for the map layer.
#[derive(Args, Debug)]
pub struct SitesCommand {
    #[arg(
        short = 'f',
        long,
        value_name = "geojson|csv|json",
        default_value = "geojson",
        help = "Output format for the facilities"
    )]
    output_format: SitesFormat,
    #[arg(short = 'o', long, help = "Output file to place the facilities")]
    output_file: Option<PathBuf>,
}

impl RunCommand for SitesCommand {
    fn run(&self, config: Config) -> anyhow::Result<()> {
        info!("Running `sites` subcommand");
        let facilities = Dashboard::new_with_config(config).facilities()?;
        debug!("Loaded {} facilities", facilities.height());
        let formatter: OutputFormatter = (&self.output_format).into();
        write_output(
            formatter,
            facilities.frame().clone(),
            self.output_file.as_ref(),
        )
    }
}

/// The `check` command loads every source table and reports load errors and data caveats.
#[derive(Args, Debug)]
pub struct CheckCommand {}

fn report_load<T>(
    name: &str,
    loaded: Result<T, SitemapperError>,
    failed: &mut Vec<String>,
) -> Option<T> {
    match loaded {
        Ok(table) => Some(table),
        Err(err) => {
            error!("{err}");
            println!("{name}: {err}");
            failed.push(name.to_string());
            None
        }
    }
}

impl RunCommand for CheckCommand {
    fn run(&self, config: Config) -> anyhow::Result<()> {
        info!("Running `check` subcommand");
        let mut failed = vec![];
        let mut warnings = vec![];

        let facilities = report_load(
            "facilities",
            FacilityTable::load(config.facilities_path(), config.fiscal_year),
            &mut failed,
        );
        if let Some(facilities) = &facilities {
            println!(
                "facilities: {} rows, fiscal year {}",
                facilities.height(),
                facilities.fiscal_year()
            );
            warnings.extend(check_facilities(facilities)?);
        }

        let testing_totals = report_load(
            "testing totals",
            TestingTotalsTable::load(config.testing_totals_path()),
            &mut failed,
        );
        if let Some(testing_totals) = &testing_totals {
            println!("testing totals: {} rows", testing_totals.frame().height());
            warnings.extend(check_testing_totals(testing_totals)?);
        }

        let entry_points = report_load(
            "entry points",
            EntryPointTable::load(config.entry_points_path()),
            &mut failed,
        );
        if let Some(entry_points) = &entry_points {
            println!("entry points: {} rows", entry_points.frame().height());
        }

        display_warnings(&warnings);
        if !failed.is_empty() {
            bail!("Failed to load: {}", failed.join(", "));
        }
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Sitemapper derives the dashboard views from the facility and testing exports", long_about = None, name="sitemapper")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'c',
        long = "config",
        help = "Config file to use instead of the one in the user config directory",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short = 'd',
        long = "data-dir",
        help = "Directory holding the exported tables, overrides `data_dir` in the config",
        global = true
    )]
    pub data_dir: Option<PathBuf>,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implmement the RunCommand trait and specify the list
/// of required args for that command.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Render every selected view
    Summary(SummaryCommand),
    /// Render a single view as a table, CSV or JSON
    View(ViewCommand),
    /// Output the facility roster for the map layer
    Sites(SitesCommand),
    /// Load every source table and report errors and data caveats
    Check(CheckCommand),
}
