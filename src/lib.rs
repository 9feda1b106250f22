pub mod aggregate;
pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod derive;
pub mod error;
pub mod export;
pub mod filter;
pub mod frequency;
pub mod insight;
pub mod io_utils;
pub mod report;
pub mod sample;
pub mod schema;
pub mod session;
pub mod source;
pub mod stats;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    session::{Session, mapping_rows},
    source::{DataSource, LoadOptions},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sales_lens", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Report(args) => handle_report(&args),
        Commands::Inspect(args) => handle_inspect(&args),
        Commands::Export(args) => handle_export(&args),
        Commands::Sample(args) => handle_sample(&args),
    }
}

fn open_session(args: &cli::SourceArgs) -> Result<Session> {
    let options = LoadOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
    };
    let source = DataSource::parse(&args.source);
    info!(
        "Loading {source}{}",
        args.delimiter
            .map(|d| format!(" with delimiter '{}'", printable_delimiter(d)))
            .unwrap_or_default()
    );
    let mut session = Session::new(options);
    session.load(&source)?;
    Ok(session)
}

fn handle_report(args: &cli::ReportArgs) -> Result<()> {
    let config = args.dashboard.to_config()?;
    debug!("Dashboard config: {config:?}");
    let session = open_session(&args.dashboard.source)?;
    let report = session.run(&config)?;
    if args.json {
        println!("{}", report::render_json(&report)?);
    } else {
        print!("{}", report::render(&report, config.correlation_floor));
    }
    Ok(())
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let session = open_session(&args.source)?;
    let config = config::DashboardConfig {
        profile: args
            .source
            .profile
            .clone()
            .unwrap_or_else(|| config::DashboardConfig::default().profile),
        cleaning: clean::CleaningOptions::passthrough(),
        ..config::DashboardConfig::default()
    };
    let prepared = session.prepare(&config)?;
    let loaded = session
        .loaded()
        .context("No dataset is loaded in this session")?;
    println!("Source: {}", loaded.source);
    print!("{}", report::render_basic_info(&session::BasicInfo::of(&loaded.dataset)));
    println!();
    print!("{}", report::render_mapping(&mapping_rows(&prepared)));
    let missing = prepared.table().missing_requirements();
    if missing.is_empty() {
        println!("\nReady for the full report.");
    } else {
        println!("\nBasic info only; missing: {}", missing.join(", "));
    }
    Ok(())
}

fn handle_export(args: &cli::ExportArgs) -> Result<()> {
    let config = args.dashboard.to_config()?;
    let session = open_session(&args.dashboard.source)?;
    let prepared = session.prepare(&config)?;
    if !prepared.is_dashboard_ready() {
        warn!(
            "Exporting without a full schema (missing: {})",
            prepared.table().missing_requirements().join(", ")
        );
    }
    let view = filter::apply(&prepared, &config.filter_set()?)?;
    let delimiter = match args.output_delimiter {
        Some(delimiter) => delimiter,
        None => session
            .loaded()
            .context("No dataset is loaded in this session")?
            .format
            .export_delimiter(),
    };
    export::write_filtered(&view, Some(args.output.as_path()), delimiter)
        .with_context(|| format!("Exporting filtered rows to {:?}", args.output))?;
    if let Some(path) = &args.summary {
        let written = export::write_daily_summary(&view, Some(path.as_path()), delimiter)
            .with_context(|| format!("Writing daily summary to {path:?}"))?;
        if written.is_none() {
            warn!("Daily summary skipped: no date or amount column is resolved");
        }
    }
    Ok(())
}

fn handle_sample(args: &cli::SampleArgs) -> Result<()> {
    let dataset = sample::generate_with_seed(args.seed);
    let mut writer = io_utils::open_bom_csv_writer(
        Some(args.output.as_path()),
        io_utils::DEFAULT_CSV_DELIMITER,
    )?;
    writer
        .write_record(&dataset.headers)
        .context("Writing sample header")?;
    for row in 0..dataset.row_count() {
        writer
            .write_record(dataset.display_row(row))
            .with_context(|| format!("Writing sample row {}", row + 1))?;
    }
    writer.flush().context("Flushing sample output")?;
    info!(
        "Generated {} sample order(s) with seed {}",
        dataset.row_count(),
        args.seed
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
