//! Recursive discovery of DICOM records in folders and archives.
//!
//! Every regular file under the root folder is tried,
//! in order, as a (possibly gzip compressed) DICOM file,
//! a zip archive, and a tar archive.
//! Records are handed to a processing function
//! and optionally written back;
//! archives are extracted into a temporary folder,
//! walked recursively, and optionally repacked from the processed output.
//! Archive members which are not rewritten are packed back unchanged
//! when an archive is repacked in place.
use crate::archive::ArchiveKind;
use crate::audit::AuditLog;
use crate::context::RunContext;
use crate::error::{
    CreateDirectorySnafu, CreateTempDirSnafu, Error, Result, WalkDirectorySnafu, WriteFileSnafu,
};
use crate::naming::{dicom_extension, get_dicom_name};
use crate::record::{read_record, write_record, Record};
use snafu::{Report, ResultExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Options of a walk.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WalkOptions {
    /// write processed records and archives
    save: bool,
    /// mirror the folder structure under this folder instead of
    /// overwriting the inputs
    output_root: Option<PathBuf>,
    /// name written records after their identifying fields
    rename: bool,
    /// added to the names of renamed records and repacked archives
    suffix: String,
    /// where renamed files are logged
    audit_log: Option<AuditLog>,
}

impl WalkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write back processed records and repacked archives.
    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    /// Write outputs under this folder instead of in place.
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    /// Rename written records after their identifying fields.
    /// Requires an output root.
    pub fn rename(mut self, rename: bool) -> Self {
        self.rename = rename;
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Log renamed files to this audit log.
    pub fn audit_log(mut self, log: AuditLog) -> Self {
        self.audit_log = Some(log);
        self
    }
}

/// Counts of what a walk went through.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    /// records found and processed
    pub records: usize,
    /// files which were neither DICOM nor a known archive
    pub skipped: Vec<PathBuf>,
    /// archives descended into
    pub archives: usize,
    /// records and archives written
    pub written: usize,
    /// files which could not be processed or written
    pub failed: Vec<PathBuf>,
}

impl WalkSummary {
    fn absorb(&mut self, other: WalkSummary) {
        self.records += other.records;
        self.skipped.extend(other.skipped);
        self.archives += other.archives;
        self.written += other.written;
        self.failed.extend(other.failed);
    }
}

const WALK_COMMAND: &str = "walk";

/// Walk a folder tree, processing every DICOM record found
/// in plain files and inside zip and tar archives.
///
/// `process` receives each record, its path relative to the walked
/// folder, and the run context.
/// Failures to process or write a single record are logged,
/// counted as failed, and do not stop the walk.
/// Symbolic links are not followed and are reported as skipped.
///
/// Renaming without an output root is a configuration error.
pub fn walk<F>(
    root: &Path,
    options: &WalkOptions,
    ctx: &mut RunContext,
    process: &mut F,
) -> Result<WalkSummary>
where
    F: FnMut(&mut Record, &str, &RunContext) -> Result<()>,
{
    if options.rename && options.output_root.is_none() {
        return Err(Error::Configuration {
            command: WALK_COMMAND,
            category: "Output folder not specified",
            message: "Renaming files requires an output folder.".to_string(),
            hint: "Please provide an output folder!",
        });
    }

    let mut summary = WalkSummary::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.context(WalkDirectorySnafu { path: root })?;
        let path = entry.path();
        if entry.depth() > 0 && entry.path_is_symlink() {
            info!("{} is a symbolic link, skipping", path.display());
            summary.skipped.push(path.to_path_buf());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);

        match read_record(path, options.save) {
            Ok((mut record, gzipped)) => {
                info!("Processing {}", path.display());
                summary.records += 1;
                let filename = relative.to_string_lossy().into_owned();
                if let Err(e) = process(&mut record, filename.as_str(), &*ctx) {
                    error!("Could not process {}: {}", path.display(), Report::from_error(e));
                    summary.failed.push(path.to_path_buf());
                    continue;
                }
                if options.save {
                    match save_record(&record, gzipped, path, relative, options, ctx) {
                        Ok(target) => {
                            debug!("Written to {}", target.display());
                            summary.written += 1;
                        }
                        Err(e) => {
                            error!("Could not save {}: {}", path.display(), Report::from_error(e));
                            summary.failed.push(path.to_path_buf());
                        }
                    }
                }
            }
            Err(e) => {
                debug!("{} is not a DICOM file: {}", path.display(), Report::from_error(e));
                match ArchiveKind::detect(path) {
                    Some(kind) => {
                        info!("Descending into {} archive {}", kind, path.display());
                        let inner = walk_archive(path, relative, kind, options, ctx, process)?;
                        summary.archives += 1;
                        summary.absorb(inner);
                    }
                    None => {
                        info!("{} is not a DICOM file or a known archive, skipping", path.display());
                        summary.skipped.push(path.to_path_buf());
                    }
                }
            }
        }
    }
    Ok(summary)
}

/// Write a processed record,
/// in place or under the output root.
fn save_record(
    record: &Record,
    gzipped: bool,
    source: &Path,
    relative: &Path,
    options: &WalkOptions,
    ctx: &mut RunContext,
) -> Result<PathBuf> {
    let target = match &options.output_root {
        None => source.to_path_buf(),
        Some(root) => {
            let target = root.join(relative);
            let folder = target.parent().unwrap_or(root.as_path());
            std::fs::create_dir_all(folder).context(CreateDirectorySnafu { path: folder })?;
            if options.rename {
                let extension = dicom_extension(&options.suffix, gzipped);
                let target = folder.join(get_dicom_name(record, &extension, ctx));
                if let Some(log) = &options.audit_log {
                    let renamed = target.strip_prefix(root).unwrap_or(&target);
                    log.append(&[[
                        relative.to_string_lossy().into_owned(),
                        "filename".to_string(),
                        renamed.to_string_lossy().into_owned(),
                    ]])?;
                }
                target
            } else {
                target
            }
        }
    };

    let bytes = record.to_bytes()?;
    write_record(&target, &bytes, gzipped)?;
    Ok(target)
}

/// Extract an archive, walk its contents,
/// and repack the processed output if saving.
///
/// In place, the processed folder starts out as a copy of the extracted
/// one, so members which are not DICOM records or failed to process
/// are packed back unchanged.
/// Under an output root, only members which are not DICOM records
/// are carried over next to the processed records.
///
/// Both temporary folders are removed when this function returns,
/// whether it succeeds or not.
fn walk_archive<F>(
    path: &Path,
    relative: &Path,
    kind: ArchiveKind,
    options: &WalkOptions,
    ctx: &mut RunContext,
    process: &mut F,
) -> Result<WalkSummary>
where
    F: FnMut(&mut Record, &str, &RunContext) -> Result<()>,
{
    let extracted = tempfile::tempdir().context(CreateTempDirSnafu)?;
    let processed = tempfile::tempdir().context(CreateTempDirSnafu)?;

    if let Err(e) = kind.extract(path, extracted.path()) {
        warn!("{}", Report::from_error(e));
        return Ok(WalkSummary {
            failed: vec![path.to_path_buf()],
            ..WalkSummary::default()
        });
    }

    let in_place = options.output_root.is_none();
    if options.save && in_place {
        copy_tree(extracted.path(), processed.path())?;
    }

    let inner_options = WalkOptions {
        output_root: Some(processed.path().to_path_buf()),
        // nested archives replace their unchanged copies
        suffix: if in_place {
            String::new()
        } else {
            options.suffix.clone()
        },
        ..options.clone()
    };
    let mut summary = walk(extracted.path(), &inner_options, ctx, process)?;

    if options.save && !in_place {
        for member in &summary.skipped {
            let is_file = std::fs::symlink_metadata(member).map_or(false, |m| m.is_file());
            if let (true, Ok(relative)) = (is_file, member.strip_prefix(extracted.path())) {
                copy_member(member, &processed.path().join(relative))?;
            }
        }
    }

    if options.save {
        let target = match &options.output_root {
            None => path.to_path_buf(),
            Some(root) => {
                let name = relative
                    .file_name()
                    .map(|name| kind.suffixed_name(&name.to_string_lossy(), &options.suffix))
                    .unwrap_or_default();
                let target = root.join(relative).with_file_name(name);
                if let Some(folder) = target.parent() {
                    std::fs::create_dir_all(folder)
                        .context(CreateDirectorySnafu { path: folder })?;
                }
                target
            }
        };
        info!("Packing {}", target.display());
        kind.pack(processed.path(), &target)?;
        summary.written += 1;
    }
    Ok(summary)
}

/// Copy the folders and regular files of a tree into another folder.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.context(WalkDirectorySnafu { path: src })?;
        let target = dest.join(entry.path().strip_prefix(src).unwrap_or(entry.path()));
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).context(CreateDirectorySnafu { path: &target })?;
        } else if entry.file_type().is_file() {
            copy_member(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_member(source: &Path, target: &Path) -> Result<()> {
    if let Some(folder) = target.parent() {
        std::fs::create_dir_all(folder).context(CreateDirectorySnafu { path: folder })?;
    }
    std::fs::copy(source, target).context(WriteFileSnafu { path: target })?;
    Ok(())
}
