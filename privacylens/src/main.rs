//! privacylens - App Privacy Report viewer
//!
//! Imports App Privacy Report exports and prints date-bucketed timelines of
//! resource access sessions and network domain contacts.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/privacylens/reports.db (~/.local/share/privacylens/reports.db)
//! - Logs: $XDG_STATE_HOME/privacylens/privacylens.YYYY-MM-DD.log (~/.local/state/privacylens/)
//! - Config: $XDG_CONFIG_HOME/privacylens/config.toml (~/.config/privacylens/config.toml)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use privacylens_core::format::{format_entry, format_relative_time};
use privacylens_core::ingest::discover_reports;
use privacylens_core::summary::{self, coalesce};
use privacylens_core::{Config, Database, IconResolver, Importer, SummaryFilter, TypeFilter};

#[derive(Parser)]
#[command(name = "privacylens")]
#[command(about = "Import and browse App Privacy Report exports")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import report files, or every report inside a directory
    Import {
        /// `.ndjson` / `.json` exports or directories containing them
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List imported reports
    Files,

    /// Show the dates, types and apps available for filtering a report
    Facets {
        /// Report identifier (file name without extension)
        file: String,
    },

    /// Print a report's timeline, newest date first
    Show {
        /// Report identifier (file name without extension)
        file: String,

        /// Only this UTC date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// access, access/<stream> or domain
        #[arg(long = "type", value_parser = parse_type_filter)]
        kind: Option<TypeFilter>,

        /// Only this app
        #[arg(long)]
        bundle_id: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Fetch an app's icon
    Icon {
        bundle_id: String,

        /// Where to write the image
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_type_filter(s: &str) -> std::result::Result<TypeFilter, String> {
    s.parse()
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = privacylens_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Import { paths } => cmd_import(&db, &paths),
        Command::Files => cmd_files(&db),
        Command::Facets { file } => cmd_facets(&db, &file),
        Command::Show {
            file,
            date,
            kind,
            bundle_id,
            format,
        } => {
            let filter = SummaryFilter {
                date,
                kind,
                bundle_id,
            };
            cmd_show(&db, &file, &filter, format)
        }
        Command::Icon { bundle_id, output } => cmd_icon(&config, &bundle_id, &output),
    }
}

fn cmd_import(db: &Database, inputs: &[PathBuf]) -> Result<()> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = discover_reports(input)
                .with_context(|| format!("failed to scan {}", input.display()))?;
            if found.is_empty() {
                println!("No reports found in {}", input.display());
            }
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }

    let pb = if paths.len() > 1 {
        let pb = ProgressBar::new(paths.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let result = Importer::new(db).import_paths_with_progress(&paths, |current, _total, path| {
        if let Some(pb) = &pb {
            pb.set_position(current as u64);
            pb.set_message(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("...")
                    .to_string(),
            );
        }
    });

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    for summary in &result.imported {
        println!(
            "Imported {}: {} access records, {} domain records",
            summary.source_file, summary.access_records, summary.domain_records
        );
    }
    for (path, error) in &result.errors {
        eprintln!("Failed to import {}: {}", path.display(), error);
    }

    tracing::info!(
        imported = result.imported.len(),
        failed = result.errors.len(),
        "Import complete"
    );

    if !result.errors.is_empty() {
        anyhow::bail!(
            "{} of {} report(s) failed to import",
            result.errors.len(),
            paths.len()
        );
    }
    Ok(())
}

fn cmd_files(db: &Database) -> Result<()> {
    let imports = db.list_imports().context("failed to list imports")?;

    if imports.is_empty() {
        println!("No reports imported yet.");
        println!("Run 'privacylens import <FILE>' to import an App Privacy Report.");
        return Ok(());
    }

    for import in imports {
        println!(
            "{:<32} {:>6} access {:>6} domains   imported {}",
            import.source_file,
            import.access_count,
            import.domain_count,
            format_relative_time(import.imported_at)
        );
    }
    Ok(())
}

fn cmd_facets(db: &Database, file: &str) -> Result<()> {
    ensure_imported(db, file)?;

    println!("Dates:");
    for date in db.list_dates(file)? {
        println!("  {}", date);
    }

    println!("Types:");
    for facet in summary::type_facets(db, file)? {
        println!("  {}", facet);
    }

    println!("Bundle ids:");
    for bundle_id in db.list_bundle_ids(file)? {
        println!("  {}", bundle_id);
    }
    Ok(())
}

fn cmd_show(db: &Database, file: &str, filter: &SummaryFilter, format: OutputFormat) -> Result<()> {
    ensure_imported(db, file)?;

    let timeline =
        summary::merged_summaries(db, file, filter).context("failed to build timeline")?;

    match format {
        OutputFormat::Text => {
            if timeline.is_empty() {
                println!("No entries match.");
            }
            for (date, entries) in timeline.iter().rev() {
                println!("{}", date);
                for row in coalesce(entries) {
                    println!("  {}", format_entry(&row));
                }
            }
        }
        OutputFormat::Json => {
            let days: Vec<serde_json::Value> = timeline
                .iter()
                .rev()
                .map(|(date, entries)| {
                    serde_json::json!({
                        "date": date,
                        "entries": coalesce(entries),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&days)?);
        }
    }
    Ok(())
}

fn cmd_icon(config: &Config, bundle_id: &str, output: &Path) -> Result<()> {
    let resolver = IconResolver::new(&config.icons).context("failed to create icon resolver")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let icon = runtime
        .block_on(resolver.resolve(bundle_id))
        .with_context(|| format!("failed to resolve icon for {}", bundle_id))?;

    std::fs::write(output, &icon.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Wrote {} ({}, {} bytes){}",
        output.display(),
        icon.content_type,
        icon.bytes.len(),
        if icon.is_placeholder() {
            " placeholder"
        } else {
            ""
        }
    );
    Ok(())
}

fn ensure_imported(db: &Database, file: &str) -> Result<()> {
    let known = db.get_import(file)?.is_some() || db.list_files()?.iter().any(|f| f == file);
    if !known {
        anyhow::bail!(
            "no imported report named '{}'; run 'privacylens files' to list reports",
            file
        );
    }
    Ok(())
}
