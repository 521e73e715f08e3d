//! Error types of the de-identification toolkit.
//!
//! [`Error`] covers whole runs:
//! unmet command preconditions, malformed parameter files,
//! and I/O failures while writing outputs.
//! [`ParseError`] is the outcome of trying to read a single payload
//! as a DICOM file,
//! which the container walker recovers from locally.
use snafu::Snafu;
use std::path::PathBuf;

/// An error which may occur during a field discovery
/// or de-identification run.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A precondition of a top-level command was not met.
    ///
    /// These are raised before any output is created or removed.
    #[snafu(display("[{command}] {category}: {message}"))]
    Configuration {
        command: &'static str,
        category: &'static str,
        message: String,
        hint: &'static str,
    },

    /// Invalid rule at line {line}: {message}
    InvalidRule { line: usize, message: String },

    /// Invalid rule for `{key}`: {message}
    InvalidJsonRule { key: String, message: String },

    /// Invalid tag path `{key}`
    InvalidTagPath { key: String },

    #[snafu(display("Could not read parameter file '{}'", path.display()))]
    ReadSpec {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse JSON parameter file '{}'", path.display()))]
    ParseJsonSpec {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Could not create directory '{}'", path.display()))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not clear directory '{}'", path.display()))]
    ClearDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not walk directory '{}'", path.display()))]
    WalkDirectory {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[snafu(display("Could not write file '{}'", path.display()))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Could not serialize DICOM object
    SerializeRecord { source: dicom_object::WriteError },

    /// Could not rebuild the file meta group
    BuildMeta { source: dicom_object::meta::Error },

    #[snafu(display("Could not write CSV file '{}'", path.display()))]
    WriteCsv { path: PathBuf, source: csv::Error },

    /// Could not create temporary directory
    CreateTempDir { source: std::io::Error },

    #[snafu(display("Could not extract archive '{}'", path.display()))]
    ExtractArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not extract zip archive '{}'", path.display()))]
    ExtractZip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[snafu(display("Could not pack archive '{}'", path.display()))]
    PackArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not pack zip archive '{}'", path.display()))]
    PackZip {
        path: PathBuf,
        source: zip::result::ZipError,
    },
}

impl Error {
    /// A remediation hint for the user,
    /// available for configuration errors.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Configuration { hint, .. } => Some(hint),
            _ => None,
        }
    }

    /// Whether this error is an unmet precondition
    /// (bad paths, missing parameters)
    /// rather than a failure in the middle of a run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::InvalidRule { .. }
                | Error::InvalidJsonRule { .. }
                | Error::InvalidTagPath { .. }
                | Error::ReadSpec { .. }
                | Error::ParseJsonSpec { .. }
        )
    }
}

/// Reasons why a payload could not be read as a DICOM record.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("Could not read '{}'", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Missing DICM magic code
    NotDicom,

    /// Could not decode DICOM data
    Decode { source: dicom_object::ReadError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
