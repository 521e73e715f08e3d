//! A CLI tool for de-identifying DICOM files
//! in nested folders and archives.
use clap::{Parser, Subcommand};
use dicom_deid::{change_files, discover_fields, ChangeOptions, FieldsOptions, WalkSummary};
use snafu::{Report, ResultExt, Whatever};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};

/// Exit code for when a precondition of the command was not met.
const ERROR_CONFIGURATION: i32 = -1;
/// Exit code for when the command failed while running.
const ERROR_RUN: i32 = -2;

/// De-identify DICOM files
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// verbose mode
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the fields found in DICOM files, with example values
    Fields {
        /// The folder to scan, including archives
        #[arg(default_value = ".")]
        folder: PathBuf,
        /// The CSV file to write the report to
        #[arg(short = 't', long = "target-file", default_value = "dicom_fields.csv")]
        target_file: PathBuf,
        /// The maximum number of distinct example values per field
        #[arg(short = 'l', long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Change DICOM files as declared in a parameter file
    Change {
        /// The folder with the files to change, including archives
        #[arg(default_value = ".")]
        folder: PathBuf,
        /// The parameter file (text, or JSON if ending in `.json`)
        #[arg(short = 'p', long = "param-file", default_value = "deidparam.txt")]
        param_file: PathBuf,
        /// The CSV file to append archived values and renamed files to
        #[arg(short = 'a', long = "archive-file", default_value = "archive.csv")]
        archive_file: PathBuf,
        /// Write changed files to this folder
        /// (its contents are removed first)
        /// instead of overwriting them
        #[arg(short = 'o', long = "output-folder")]
        output_folder: Option<PathBuf>,
        /// Rename changed files after their identifying fields,
        /// adding this extension (requires an output folder)
        #[arg(short = 'e', long = "extension", default_value = "")]
        extension: String,
        /// The date replacing the study date (YYYYMMDD),
        /// random if not given
        #[arg(short = 'd', long = "replacement-date")]
        replacement_date: Option<String>,
        /// The salt of hash actions which do not name one,
        /// random if not given
        #[arg(long = "salt")]
        salt: Option<String>,
    },
}

fn main() {
    let App { verbose, command } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let outcome = match command {
        Command::Fields {
            folder,
            target_file,
            limit,
        } => discover_fields(
            &FieldsOptions::new()
                .folder(folder)
                .target_file(target_file)
                .limit(limit),
        ),
        Command::Change {
            folder,
            param_file,
            archive_file,
            output_folder,
            extension,
            replacement_date,
            salt,
        } => change_files(
            &ChangeOptions::new()
                .folder(folder)
                .param_file(Some(param_file))
                .archive_file(archive_file)
                .output_folder(output_folder)
                .extension(extension)
                .replacement_date(replacement_date)
                .salt(salt),
        ),
    };

    match outcome {
        Ok(summary) => report(&summary),
        Err(e) => {
            let code = if e.is_configuration() {
                ERROR_CONFIGURATION
            } else {
                ERROR_RUN
            };
            let hint = e.hint();
            error!("{}", Report::from_error(e));
            if let Some(hint) = hint {
                info!("{}", hint);
            }
            std::process::exit(code);
        }
    }
}

fn report(summary: &WalkSummary) {
    info!(
        "{} records, {} archives, {} files written",
        summary.records, summary.archives, summary.written
    );
    if !summary.skipped.is_empty() {
        info!("{} files skipped", summary.skipped.len());
    }
    for path in &summary.failed {
        warn!("Failed: {}", path.display());
    }
}
