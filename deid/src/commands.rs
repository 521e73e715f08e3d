//! Top-level commands: field discovery and de-identification runs.
//!
//! All preconditions are checked before any output is created
//! or any prior output is removed.
use crate::audit::AuditLog;
use crate::context::RunContext;
use crate::discovery::DiscoveryIndex;
use crate::engine::{deid_and_date_removal, is_valid_date};
use crate::error::{ClearDirectorySnafu, CreateDirectorySnafu, Error, Result};
use crate::record::Record;
use crate::spec::load_spec;
use crate::walker::{walk, WalkOptions, WalkSummary};
use snafu::ResultExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FIELDS_COMMAND: &str = "get_dicom_fields";
const CHANGE_COMMAND: &str = "change_dicom_files";

const CHECK_PATHS: &str = "Please check your paths!";
const CHECK_PERMISSIONS: &str = "Please check your paths and permissions!";

/// Options of a field discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsOptions {
    folder: PathBuf,
    target_file: PathBuf,
    limit: usize,
}

impl Default for FieldsOptions {
    fn default() -> Self {
        FieldsOptions {
            folder: PathBuf::from("."),
            target_file: PathBuf::from("dicom_fields.csv"),
            limit: 20,
        }
    }
}

impl FieldsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The folder to scan.
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Where the report is written.
    pub fn target_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_file = path.into();
        self
    }

    /// The maximum number of example values per field.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Options of a de-identification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOptions {
    folder: PathBuf,
    param_file: Option<PathBuf>,
    archive_file: PathBuf,
    output_folder: Option<PathBuf>,
    extension: String,
    replacement_date: Option<String>,
    salt: Option<String>,
}

impl Default for ChangeOptions {
    fn default() -> Self {
        ChangeOptions {
            folder: PathBuf::from("."),
            param_file: Some(PathBuf::from("deidparam.txt")),
            archive_file: PathBuf::from("archive.csv"),
            output_folder: None,
            extension: String::new(),
            replacement_date: None,
            salt: None,
        }
    }
}

impl ChangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The folder with the records to change.
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = folder.into();
        self
    }

    /// The parameter file declaring the changes.
    pub fn param_file(mut self, path: Option<PathBuf>) -> Self {
        self.param_file = path;
        self
    }

    /// The log receiving archived values and renamed files.
    pub fn archive_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_file = path.into();
        self
    }

    /// Write changed records under this folder instead of in place.
    /// Its previous contents are removed.
    pub fn output_folder(mut self, path: Option<PathBuf>) -> Self {
        self.output_folder = path;
        self
    }

    /// Rename records, adding this extension to their names.
    /// An empty extension keeps the original names.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Replace the study date with this date
    /// instead of a random one.
    pub fn replacement_date(mut self, date: Option<String>) -> Self {
        self.replacement_date = date;
        self
    }

    /// Hash with this salt where the parameter file names none,
    /// instead of a random one.
    pub fn salt(mut self, salt: Option<String>) -> Self {
        self.salt = salt;
        self
    }
}

fn config_error(
    command: &'static str,
    category: &'static str,
    message: String,
    hint: &'static str,
) -> Error {
    Error::Configuration {
        command,
        category,
        message,
        hint,
    }
}

/// Scan a folder for DICOM records and report
/// the fields found, with example values.
pub fn discover_fields(options: &FieldsOptions) -> Result<WalkSummary> {
    if !options.folder.exists() {
        return Err(config_error(
            FIELDS_COMMAND,
            "Folder not found",
            format!(
                "The specified folder with DICOM files to analyse was not found: {}",
                options.folder.display()
            ),
            CHECK_PATHS,
        ));
    }
    if File::create(&options.target_file).is_err() {
        return Err(config_error(
            FIELDS_COMMAND,
            "Could not create target file",
            format!(
                "The specified target file could not be created: {}",
                options.target_file.display()
            ),
            CHECK_PERMISSIONS,
        ));
    }

    let mut index = DiscoveryIndex::new(options.limit);
    let summary = walk(
        &options.folder,
        &WalkOptions::new(),
        &mut RunContext::new(),
        &mut |record: &mut Record, _: &str, _: &RunContext| {
            index.scan(record);
            Ok(())
        },
    )?;
    index.write_report(&options.target_file)?;
    info!(
        "Reported {} fields from {} records to {}",
        index.len(),
        summary.records,
        options.target_file.display()
    );
    Ok(summary)
}

/// Whether `inner` is `outer` or lies inside it.
fn is_within(inner: &Path, outer: &Path) -> bool {
    inner.starts_with(outer)
}

/// Resolve a path which may not exist yet
/// through its closest existing ancestor.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Change the DICOM records of a folder according to a parameter file.
pub fn change_files(options: &ChangeOptions) -> Result<WalkSummary> {
    let folder = &options.folder;
    if !folder.exists() {
        return Err(config_error(
            CHANGE_COMMAND,
            "Folder not found",
            format!(
                "The specified folder with DICOM files to change was not found: {}",
                folder.display()
            ),
            CHECK_PATHS,
        ));
    }

    let param_file = match &options.param_file {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => {
            return Err(config_error(
                CHANGE_COMMAND,
                "No parameter file specified",
                "No parameter file information was provided.".to_string(),
                "Please provide a parameter file that describes the changes to be made!",
            ))
        }
    };
    if !param_file.exists() {
        return Err(config_error(
            CHANGE_COMMAND,
            "Parameter file not found",
            format!(
                "The specified parameter file was not found: {}",
                param_file.display()
            ),
            CHECK_PATHS,
        ));
    }

    let rename = !options.extension.is_empty();
    if rename && options.output_folder.is_none() {
        return Err(config_error(
            CHANGE_COMMAND,
            "Output folder not specified",
            "Renaming files requires an output folder.".to_string(),
            "Please provide an output folder!",
        ));
    }
    if let Some(output) = &options.output_folder {
        let (input, output_resolved) = (resolve(folder), resolve(output));
        if is_within(&input, &output_resolved) || is_within(&output_resolved, &input) {
            return Err(config_error(
                CHANGE_COMMAND,
                "Invalid output folder",
                format!(
                    "The output folder {} overlaps the folder with DICOM files to change.",
                    output.display()
                ),
                "Please provide an output folder outside of the input folder!",
            ));
        }
    }
    if let Some(date) = &options.replacement_date {
        if !is_valid_date(date) {
            return Err(config_error(
                CHANGE_COMMAND,
                "Invalid replacement date",
                format!("The replacement date {} is not a valid YYYYMMDD date.", date),
                "Please provide the date as YYYYMMDD!",
            ));
        }
    }

    let spec = load_spec(param_file)?;
    debug!("Loaded {} rules from {}", spec.rules().len(), param_file.display());

    let archive = AuditLog::open(&options.archive_file).map_err(|_| {
        config_error(
            CHANGE_COMMAND,
            "Could not create archive file",
            format!(
                "The specified archive file could not be created: {}",
                options.archive_file.display()
            ),
            CHECK_PERMISSIONS,
        )
    })?;

    let mut walk_options = WalkOptions::new()
        .save(true)
        .rename(rename)
        .suffix(options.extension.clone())
        .audit_log(archive.clone());
    if let Some(output) = &options.output_folder {
        if output.exists() {
            std::fs::remove_dir_all(output).context(ClearDirectorySnafu { path: output })?;
        }
        std::fs::create_dir_all(output).context(CreateDirectorySnafu { path: output })?;
        walk_options = walk_options.output_root(output);
    }

    let mut ctx = match &options.salt {
        Some(salt) => RunContext::with_default_salt(salt.clone()),
        None => RunContext::new(),
    };
    let replacement_date = options.replacement_date.as_deref();
    let summary = walk(
        folder,
        &walk_options,
        &mut ctx,
        &mut |record: &mut Record, filename: &str, ctx: &RunContext| {
            deid_and_date_removal(record, &spec, &archive, filename, replacement_date, ctx)?;
            Ok(())
        },
    )?;
    info!(
        "Changed {} records, wrote {} files",
        summary.records, summary.written
    );
    Ok(summary)
}
