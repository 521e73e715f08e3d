//! Names of written records and repacked archives.
use crate::context::RunContext;
use crate::record::Record;
use crate::tree::display_value;
use dicom_core::Tag;
use dicom_dictionary_std::tags;

/// File name extensions of tar archives, longest first.
const TAR_EXTENSIONS: [&str; 6] = [".tar.bzip2", ".tar.bz2", ".tar.gz", ".tarz", ".tgz", ".tar"];

fn field_text(record: &Record, tag: Tag) -> Option<String> {
    record
        .body()
        .get(tag)
        .map(display_value)
        .filter(|text| !text.is_empty())
}

/// Keep path separators out of a file name component.
fn sanitize(text: &str) -> String {
    text.replace(['/', '\\'], "_")
}

/// Build a file name for a record from its identifying fields:
/// `<subject>-<series>-<instance>.<extension>`.
///
/// The subject is the _Patient ID_, or else the _Study ID_, or else `NA`.
/// The series is the _Series Number_ or `NA`.
/// The instance is the _SOP Instance UID_,
/// or else the run's naming counter zero-padded to 10 digits.
/// The counter advances on every call.
pub fn get_dicom_name(record: &Record, extension: &str, ctx: &mut RunContext) -> String {
    let counter = ctx.next_counter();
    let subject = field_text(record, tags::PATIENT_ID)
        .or_else(|| field_text(record, tags::STUDY_ID))
        .unwrap_or_else(|| "NA".to_string());
    let series = field_text(record, tags::SERIES_NUMBER).unwrap_or_else(|| "NA".to_string());
    let instance = field_text(record, tags::SOP_INSTANCE_UID)
        .unwrap_or_else(|| format!("{:010}", counter));
    format!(
        "{}-{}-{}.{}",
        sanitize(&subject),
        sanitize(&series),
        sanitize(&instance),
        extension
    )
}

/// The extension of a renamed record:
/// the suffix followed by `dcm`, and `gz` if compressed.
pub fn dicom_extension(suffix: &str, gzipped: bool) -> String {
    let mut parts = Vec::with_capacity(3);
    if !suffix.is_empty() {
        parts.push(suffix);
    }
    parts.push("dcm");
    if gzipped {
        parts.push("gz");
    }
    parts.join(".")
}

/// Insert a suffix into the name of a zip archive,
/// before its `.zip` extension.
pub fn suffixed_zip_name(name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return name.to_string();
    }
    match name.strip_suffix(".zip") {
        Some(stem) => format!("{}.{}.zip", stem, suffix),
        None => format!("{}.{}", name, suffix),
    }
}

/// Insert a suffix into the name of a tar archive,
/// before its extension (`.tar`, `.tar.gz`, `.tgz`, ...).
pub fn suffixed_archive_name(name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return name.to_string();
    }
    TAR_EXTENSIONS
        .iter()
        .find_map(|ext| {
            name.strip_suffix(ext)
                .map(|stem| format!("{}.{}{}", stem, suffix, ext))
        })
        .unwrap_or_else(|| format!("{}.{}", name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::sample_record;
    use crate::tree::FieldContainer;
    use pretty_assertions::assert_eq;

    #[test]
    fn names_from_identifying_fields() {
        let mut ctx = RunContext::with_default_salt("X");
        let record = sample_record("Doe^John", "SUBJ01");
        assert_eq!(
            get_dicom_name(&record, "v1.dcm", &mut ctx),
            "SUBJ01-7-1.2.826.0.1.3680043.2.1125.1.v1.dcm"
        );
    }

    #[test]
    fn names_fall_back() {
        let mut ctx = RunContext::with_default_salt("X");
        let mut record = sample_record("Doe^John", "SUBJ01");
        record.body_mut().remove(tags::PATIENT_ID);
        record.body_mut().remove(tags::SERIES_NUMBER);
        record.body_mut().remove(tags::SOP_INSTANCE_UID);

        assert_eq!(get_dicom_name(&record, "dcm", &mut ctx), "NA-NA-0000000001.dcm");
        assert_eq!(get_dicom_name(&record, "dcm", &mut ctx), "NA-NA-0000000002.dcm");
    }

    #[test]
    fn path_separators_are_replaced() {
        let mut ctx = RunContext::with_default_salt("X");
        let record = sample_record("Doe^John", "a/b\\c");
        assert!(get_dicom_name(&record, "dcm", &mut ctx).starts_with("a_b_c-7-"));
    }

    #[test]
    fn extensions() {
        assert_eq!(dicom_extension("v1", false), "v1.dcm");
        assert_eq!(dicom_extension("v1", true), "v1.dcm.gz");
        assert_eq!(dicom_extension("", true), "dcm.gz");
    }

    #[test]
    fn archive_names() {
        assert_eq!(suffixed_zip_name("scans.zip", "deid"), "scans.deid.zip");
        assert_eq!(suffixed_zip_name("scans.zip", ""), "scans.zip");
        assert_eq!(suffixed_archive_name("scans.tar.gz", "deid"), "scans.deid.tar.gz");
        assert_eq!(suffixed_archive_name("scans.tgz", "deid"), "scans.deid.tgz");
        assert_eq!(suffixed_archive_name("scans.tar", "deid"), "scans.deid.tar");
        assert_eq!(suffixed_archive_name("scans.tar.bz2", "deid"), "scans.deid.tar.bz2");
        assert_eq!(suffixed_archive_name("scans", "deid"), "scans.deid");
    }
}
