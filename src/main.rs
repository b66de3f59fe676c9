use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;

mod config;
mod pipeline;
mod report;
mod sources;

use config::{Dataset, ReportConfig};
use pipeline::{DatasetReport, MonthlyPipeline, COMPLETENESS_SHEET};

#[derive(Parser)]
#[command(name = "plant_reports")]
#[command(about = "Monthly SCADA and meter reports for a solar plant")]
struct Args {
    /// TOML run configuration (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the <YYYY>_<MM> period folders
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Period start (DD-MM-YYYY)
    #[arg(long, global = true)]
    start: Option<String>,

    /// Period end (DD-MM-YYYY)
    #[arg(long, global = true)]
    end: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every dataset of the month
    Run,
    /// Inverter production report
    Inverters,
    /// Meteorological sensors report
    Sensors,
    /// Energy meters report
    Meters,
    /// PRMTE report
    Prmte,
    /// Fill the configured template with report tables
    Template {
        /// Template workbook, overrides the configured one
        #[arg(long)]
        template: Option<PathBuf>,
        /// Output workbook, overrides the configured one
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print daily missing-data ratios as JSON
    Completeness {
        #[arg(value_enum)]
        dataset: Dataset,
    },
}

fn load_config(args: &Args) -> Result<ReportConfig> {
    let mut config = match &args.config {
        Some(path) => ReportConfig::load(path)?,
        None => ReportConfig::default(),
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(start) = &args.start {
        config.start_date = start.clone();
    }
    if let Some(end) = &args.end {
        config.end_date = end.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Writes the dataset workbook and any configured side outputs.
fn write_dataset(config: &ReportConfig, dataset_report: &DatasetReport) -> Result<()> {
    let path = config.output_path(dataset_report.dataset)?;
    report::write_report(&path, &dataset_report.sheets)?;

    if !config.outputs.side_outputs.is_empty() {
        let dir = config.processed_dir()?;
        for (sheet, table) in &dataset_report.sheets {
            for format in &config.outputs.side_outputs {
                let stem = format!("{}_{}_{}", config.park, dataset_report.dataset.label(), sheet);
                report::write_side_output(&dir, &stem, table, *format)?;
            }
        }
    }
    Ok(())
}

fn run_dataset(config: &ReportConfig, dataset: Dataset) -> Result<()> {
    let pipeline = MonthlyPipeline::new(config)?;
    let dataset_report = pipeline.process(dataset)?;
    write_dataset(config, &dataset_report)
}

fn run_all(config: &ReportConfig) -> Result<()> {
    println!("\n☀️  Monthly reports for {} ({} .. {})", config.park, config.start_date, config.end_date);
    println!("{}", "=".repeat(60));

    let mut failed = Vec::new();
    for dataset in Dataset::ALL {
        match run_dataset(config, dataset) {
            Ok(()) => println!("✅ {}", dataset.label()),
            Err(e) => {
                error!("{}: {e:#}", dataset.label());
                println!("❌ {}", dataset.label());
                failed.push(dataset.label());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("failed datasets: {}", failed.join(", "));
    }
    Ok(())
}

fn run_template(config: &ReportConfig, template: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let configured = config
        .template
        .as_ref()
        .context("No [template] section in the configuration")?;
    let template = template.unwrap_or_else(|| configured.path.clone());
    let output = output.unwrap_or_else(|| configured.output.clone());

    let pipeline = MonthlyPipeline::new(config)?;
    let mut reports: Vec<DatasetReport> = Vec::new();
    let mut data = Vec::with_capacity(configured.sheets.len());
    for mapping in &configured.sheets {
        if !reports.iter().any(|r| r.dataset == mapping.dataset) {
            reports.push(pipeline.process(mapping.dataset)?);
        }
        let table = reports
            .iter()
            .find(|r| r.dataset == mapping.dataset)
            .and_then(|r| r.sheet(&mapping.table))
            .with_context(|| format!("{} has no '{}' table", mapping.dataset.label(), mapping.table))?;
        data.push((mapping.sheet.clone(), table.clone()));
    }

    report::fill_template(&template, &output, &data)
}

fn print_completeness(config: &ReportConfig, dataset: Dataset) -> Result<()> {
    let dataset_report = MonthlyPipeline::new(config)?.process(dataset)?;
    let daily = dataset_report
        .sheet(COMPLETENESS_SHEET)
        .context("completeness table missing from report")?;
    let json = serde_json::to_string_pretty(&report::completeness_rows(daily))?;
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    info!("Period directory: {}", config.period_dir()?.display());

    match args.command {
        Command::Run => run_all(&config),
        Command::Inverters => run_dataset(&config, Dataset::Inverters),
        Command::Sensors => run_dataset(&config, Dataset::Sensors),
        Command::Meters => run_dataset(&config, Dataset::Meters),
        Command::Prmte => run_dataset(&config, Dataset::Prmte),
        Command::Template { template, output } => run_template(&config, template, output),
        Command::Completeness { dataset } => print_completeness(&config, dataset),
    }
}
