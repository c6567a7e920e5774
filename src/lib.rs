pub mod batch;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod date_layout;
pub mod error;
pub mod escape;
pub mod importer;
pub mod io_utils;
pub mod mysql;
pub mod notify;
pub mod schema;
pub mod session;
pub mod storage;

use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    importer::Importer,
    mysql::MySqlConnector,
    notify::{EmailNotifier, LogNotifier, Notifier, ReportFileNotifier},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv2table", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Plan(args) => handle_plan(&args),
    }
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    info!("Importing CSV files from {:?}", args.dir);
    let global = importer::global_config_for(&args.dir, args.config.as_deref())?;
    let notify_config = global
        .and_then(|config| config.notify)
        .unwrap_or_default();

    let summary = Importer::new(MySqlConnector)
        .with_global_config(args.config.clone())
        .run(&args.dir)?;

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier::new(notify_config.clone()))];
    if let Some(path) = args.report.clone().or(notify_config.report.clone()) {
        notifiers.push(Box::new(ReportFileNotifier::new(path)));
    }
    if notify_config.email_configured() {
        notifiers.push(Box::new(EmailNotifier::new(notify_config)));
    }
    for notifier in &notifiers {
        if let Err(err) = notifier.notify(&summary) {
            warn!("Notification failed: {err:#}");
        }
    }

    if summary.has_errors() {
        bail!(
            "{} of {} file(s) failed to import",
            summary.error_count,
            summary.files.len()
        );
    }
    info!(
        "Imported {} row(s) from {} file(s)",
        summary.total_rows(),
        summary.success_count
    );
    Ok(())
}

fn file_directory(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn global_path_for_file(args: &cli::FileArgs) -> Result<Option<PathBuf>> {
    config::global_config_path(&file_directory(&args.file), args.config.as_deref())
}

fn handle_check(args: &cli::FileArgs) -> Result<()> {
    let global = global_path_for_file(args)?;
    debug!("Global config for {:?}: {:?}", args.file, global);
    let config = importer::check_file(MySqlConnector, &args.file, global.as_deref())
        .with_context(|| format!("Checking {:?}", args.file))?;
    info!(
        "{:?} imports into {}.{} on {}:{} (delimiter '{}', encoding {})",
        args.file,
        config.connection.db,
        config.table,
        config.connection.host,
        config.connection.port,
        io_utils::printable_delimiter(config.delimiter),
        config.encoding.name()
    );
    Ok(())
}

fn handle_plan(args: &cli::FileArgs) -> Result<()> {
    let global = global_path_for_file(args)?;
    let statement = importer::plan_file(&args.file, global.as_deref())
        .with_context(|| format!("Planning {:?}", args.file))?;
    println!("{statement};");
    Ok(())
}
