//! DICOM de-identification library
//!
//! This library finds DICOM files in nested folders,
//! including gzip compressed files and files inside zip and tar archives,
//! and either reports which fields they contain
//! or rewrites them according to a parameter file
//! which archives, hashes, replaces, or deletes selected fields.
//!
//! Fields are addressed by tag path:
//! hexadecimal tags joined by `/`,
//! descending into every item of the sequences along the way
//! (e.g. `0x82112/0x81150` for the _Referenced SOP Class UID_
//! of every item of the _Source Image Sequence_).
//!
//! # Examples
//!
//! Report the fields of all DICOM files in a folder,
//! with up to 10 example values each:
//!
//! ```no_run
//! use dicom_deid::{discover_fields, FieldsOptions};
//!
//! let options = FieldsOptions::new()
//!     .folder("inbox/MR")
//!     .target_file("dicom_fields.csv")
//!     .limit(10);
//! discover_fields(&options)?;
//! # Result::<(), Box<dyn std::error::Error>>::Ok(())
//! ```
//!
//! De-identify them into another folder,
//! renaming each file after its identifying fields:
//!
//! ```no_run
//! use dicom_deid::{change_files, ChangeOptions};
//!
//! let options = ChangeOptions::new()
//!     .folder("inbox/MR")
//!     .param_file(Some("deidparam.txt".into()))
//!     .output_folder(Some("deid/MR".into()))
//!     .extension("v1");
//! let summary = change_files(&options)?;
//! println!("{} records changed", summary.records);
//! # Result::<(), Box<dyn std::error::Error>>::Ok(())
//! ```
pub mod archive;
pub mod audit;
pub mod commands;
pub mod context;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod naming;
pub mod record;
pub mod spec;
pub mod tree;
pub mod walker;

pub use audit::AuditLog;
pub use commands::{change_files, discover_fields, ChangeOptions, FieldsOptions};
pub use context::RunContext;
pub use discovery::DiscoveryIndex;
pub use engine::{deid, deid_and_date_removal, hash_value, strip_dates};
pub use error::{Error, ParseError, Result};
pub use naming::{get_dicom_name, suffixed_archive_name};
pub use record::Record;
pub use spec::{load_spec, parse_json_spec, parse_spec, Action, HashSalt, TransformSpec};
pub use tree::{parse_tag, recurse_tree, render_tag, FieldContainer, TagPath};
pub use walker::{walk, WalkOptions, WalkSummary};
