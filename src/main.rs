// Entry point: builds the weekly market report.
//
// Reads `report.json` (optional) for paths and the report week, loads the
// transaction data, fills one template page per usage category and saves
// the finished document once at the end.
mod config;
mod error;
mod output;
mod reports;
mod source;
mod types;
mod util;

use config::{ReportConfig, CONFIG_FILE};
use log::{info, LevelFilter};
use output::TemplateDeck;
use reports::Report;
use source::CsvSource;
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Info)
        .parse_env(env_logger::Env::default().filter_or("WEEKLY_REPORT_LOG", "info"))
        .init();

    let config = ReportConfig::load(Path::new(CONFIG_FILE))?;
    let week = config.report_week()?;
    info!("building report for {} week {}", week.year, week.week);

    let source = CsvSource::open(&config.data_path, week)?;
    let deck = TemplateDeck::open(&config.template_path)?;

    let mut report = Report::new(source, deck, week, config.city.as_str());
    let output = config.output_path(week);
    report.run(&output)?;

    println!("Report saved to {}", output.display());
    Ok(())
}
