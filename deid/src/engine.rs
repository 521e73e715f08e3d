//! Application of a [`TransformSpec`] to a record,
//! and removal of the study date.
use crate::audit::{AuditLog, AuditRow};
use crate::context::RunContext;
use crate::error::Result;
use crate::record::Record;
use crate::spec::{Action, TransformSpec};
use crate::tree::{display_value, is_pixel_data, visit_values_mut, FieldContainer};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::NaiveDate;
use dicom_core::value::PrimitiveValue;
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use rand::Rng;
use sha2::Sha256;
use tracing::{debug, warn};

/// Number of PBKDF2 rounds used by the hash action.
pub const HASH_ROUNDS: u32 = 100_000;

/// Hash a value with PBKDF2-HMAC-SHA256,
/// encoded in URL-safe base64 without padding.
pub fn hash_value(value: &str, salt: &str) -> String {
    let mut digest = [0_u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(value.as_bytes(), salt.as_bytes(), HASH_ROUNDS, &mut digest);
    URL_SAFE_NO_PAD.encode(digest)
}

/// Call `f` on every container holding a field at the given path,
/// fanning out over the items of each intermediate sequence.
fn apply_at(
    obj: &mut InMemDicomObject,
    path: &[Tag],
    f: &mut dyn FnMut(&mut InMemDicomObject, Tag),
) {
    match path {
        [] => {}
        [leaf] => f(obj, *leaf),
        [head, rest @ ..] => {
            obj.for_each_item_mut(*head, &mut |item| apply_at(item, rest, &mut *f));
        }
    }
}

fn has_primitive_value(obj: &InMemDicomObject, tag: Tag) -> bool {
    obj.get(tag)
        .map_or(false, |elem| elem.value().primitive().is_some())
}

/// Apply the rules of a transformation spec to a record.
///
/// Archived values are appended to `archive`,
/// each row naming the record by `filename`.
pub fn deid(
    record: &mut Record,
    spec: &TransformSpec,
    archive: &AuditLog,
    filename: &str,
    ctx: &RunContext,
) -> Result<()> {
    let mut rows: Vec<AuditRow> = Vec::new();

    for rule in spec.rules() {
        let path = rule.path();
        if is_pixel_data(path.leaf()) {
            warn!("Pixel data cannot be transformed, ignoring rule for {}", rule.key());
            continue;
        }
        let subtree = record.subtree_mut(path.is_meta());

        for action in rule.actions() {
            match action {
                Action::Archive => apply_at(subtree, path.tags(), &mut |obj, tag| {
                    if let Some(elem) = obj.get(tag) {
                        rows.push([
                            filename.to_string(),
                            rule.key().to_string(),
                            display_value(elem),
                        ]);
                    }
                }),
                Action::Hash => {
                    let salt = spec.salt(rule.key()).resolve(ctx.default_salt());
                    apply_at(subtree, path.tags(), &mut |obj, tag| {
                        if !has_primitive_value(obj, tag) {
                            return;
                        }
                        if let Some(elem) = obj.get(tag) {
                            let hashed = hash_value(&display_value(elem), salt);
                            obj.set(tag, hashed);
                        }
                    });
                }
                Action::Replace => match spec.replacement(rule.key()) {
                    Some(replacement) => apply_at(subtree, path.tags(), &mut |obj, tag| {
                        if has_primitive_value(obj, tag) {
                            obj.set(tag, replacement.to_string());
                        }
                    }),
                    None => warn!("No replacement value for {}", rule.key()),
                },
                Action::Delete => apply_at(subtree, path.tags(), &mut |obj, tag| {
                    obj.remove(tag);
                }),
            }
        }
    }

    archive.append(&rows)
}

/// The outcome of a date removal pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSubstitution {
    /// the study date which was removed
    pub target: String,
    /// the date written in its place
    pub replacement: String,
    /// number of values changed
    pub values: usize,
}

/// A random date between 1970 and 2015 in `YYYYMMDD` form.
/// Days range from 1 to 28.
pub fn random_date() -> String {
    let mut rng = rand::thread_rng();
    let year: u32 = rng.gen_range(1970..=2015);
    let month: u32 = rng.gen_range(1..=12);
    let day: u32 = rng.gen_range(1..=28);
    format!("{:04}{:02}{:02}", year, month, day)
}

/// Whether the text is a valid calendar date in `YYYYMMDD` form.
pub fn is_valid_date(text: &str) -> bool {
    text.len() == 8
        && text.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(text, "%Y%m%d").is_ok()
}

fn substitute(value: &mut PrimitiveValue, target: &str, replacement: &str) -> bool {
    match value {
        PrimitiveValue::Str(text) => replace_in(text, target, replacement),
        PrimitiveValue::Strs(texts) => texts
            .iter_mut()
            .fold(false, |changed, text| replace_in(text, target, replacement) || changed),
        PrimitiveValue::Date(_) | PrimitiveValue::Time(_) | PrimitiveValue::DateTime(_) => {
            let replaced = {
                let text = value.to_str();
                text.contains(target)
                    .then(|| text.replace(target, replacement))
            };
            match replaced {
                Some(text) => {
                    *value = PrimitiveValue::from(text);
                    true
                }
                None => false,
            }
        }
        _ => false,
    }
}

fn replace_in(text: &mut String, target: &str, replacement: &str) -> bool {
    if text.contains(target) {
        *text = text.replace(target, replacement);
        true
    } else {
        false
    }
}

/// Replace every occurrence of the study date
/// in the text values of the record.
///
/// The study date is taken from _Study Date_,
/// or _Series Date_ if the former is absent.
/// Without a replacement date, a random one is picked.
/// Returns `None` if the record has no usable study date.
pub fn strip_dates(record: &mut Record, replacement_date: Option<&str>) -> Option<DateSubstitution> {
    let target = [tags::STUDY_DATE, tags::SERIES_DATE]
        .into_iter()
        .find_map(|tag| record.body().get(tag))
        .map(display_value);
    let target = match target {
        Some(target) if !target.is_empty() => target,
        Some(_) => {
            warn!("Study date is empty, dates left unchanged");
            return None;
        }
        None => {
            warn!("No StudyDate field present, dates left unchanged");
            return None;
        }
    };
    let replacement = replacement_date
        .map(str::to_string)
        .unwrap_or_else(random_date);

    let mut values = 0;
    let mut visit = |value: &mut PrimitiveValue| {
        if substitute(value, &target, &replacement) {
            values += 1;
        }
    };
    visit_values_mut(record.body_mut(), &mut visit);
    visit_values_mut(record.meta_mut(), &mut visit);
    debug!("Replaced date in {} values", values);

    Some(DateSubstitution {
        target,
        replacement,
        values,
    })
}

/// Apply a transformation spec, then remove the study date.
pub fn deid_and_date_removal(
    record: &mut Record,
    spec: &TransformSpec,
    archive: &AuditLog,
    filename: &str,
    replacement_date: Option<&str>,
    ctx: &RunContext,
) -> Result<Option<DateSubstitution>> {
    deid(record, spec, archive, filename, ctx)?;
    Ok(strip_dates(record, replacement_date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::sample_record;
    use dicom_core::value::DataSetSequence;
    use dicom_core::{DataElement, Length, VR};
    use pretty_assertions::assert_eq;

    fn text(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
        obj.get(tag).map(display_value)
    }

    fn archive_in(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::open(dir.path().join("archive.csv")).unwrap()
    }

    #[test]
    fn hash_matches_reference_vectors() {
        assert_eq!(
            hash_value("Doe^John", "s1"),
            "gR_QR8XyG6TgKPQOxND3pxbTzQJg4iQ1Vd-cB2HKZp4"
        );
        assert_eq!(
            hash_value("Doe^John", "s2"),
            "0I4tkISuD421Fwj6h1TUw75RTnJ_6fHrBlYo0ATYLis"
        );
    }

    #[test]
    fn archive_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x100010 > delete, archive").unwrap();
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        assert_eq!(text(record.body(), tags::PATIENT_NAME), None);
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "a.dcm,0x100010,Doe^John\n");
    }

    #[test]
    fn archive_sees_value_before_hash() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x100010 > hash:s1, archive").unwrap();
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        assert_eq!(
            text(record.body(), tags::PATIENT_NAME).as_deref(),
            Some("gR_QR8XyG6TgKPQOxND3pxbTzQJg4iQ1Vd-cB2HKZp4")
        );
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "a.dcm,0x100010,Doe^John\n");
    }

    #[test]
    fn bare_hash_uses_the_run_salt() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x100010 > hash").unwrap();
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("s2")).unwrap();

        assert_eq!(
            text(record.body(), tags::PATIENT_NAME).as_deref(),
            Some("0I4tkISuD421Fwj6h1TUw75RTnJ_6fHrBlYo0ATYLis")
        );
        // nothing archived, nothing written
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "");
    }

    #[test]
    fn deleting_twice_changes_nothing_more() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x100010 > delete\n0x80060 > delete").unwrap();
        let ctx = RunContext::with_default_salt("X");
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &ctx).unwrap();
        let once = record.clone();
        deid(&mut record, &spec, &log, "a.dcm", &ctx).unwrap();

        assert_eq!(record, once);
        assert_eq!(text(record.body(), tags::PATIENT_NAME), None);
        assert_eq!(text(record.body(), tags::MODALITY), None);
    }

    #[test]
    fn declared_order_does_not_change_the_outcome() {
        let ctx = RunContext::with_default_salt("X");
        let outcome = |rules: &str| {
            let dir = tempfile::tempdir().unwrap();
            let log = archive_in(&dir);
            let spec = TransformSpec::parse_str(rules).unwrap();
            let mut record = sample_record("Doe^John", "SUBJ01");
            deid(&mut record, &spec, &log, "a.dcm", &ctx).unwrap();
            (record, std::fs::read_to_string(log.path()).unwrap())
        };

        let (first, first_log) = outcome("0x100010 > archive, hash:s1\n0x100020 > replace:X, delete");
        let (second, second_log) = outcome("0x100010 > hash:s1, archive\n0x100020 > delete, replace:X");

        assert_eq!(first, second);
        assert_eq!(first_log, second_log);
        assert_eq!(first_log, "a.dcm,0x100010,Doe^John\n");
        assert_eq!(text(first.body(), tags::PATIENT_ID), None);
    }

    #[test]
    fn replacement_values_may_name_other_actions() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x100010 > replace:hashed").unwrap();
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        assert_eq!(text(record.body(), tags::PATIENT_NAME).as_deref(), Some("hashed"));
    }

    #[test]
    fn rules_fan_out_over_sequence_items() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let item = |uid: &str| {
            InMemDicomObject::from_element_iter([DataElement::new(
                tags::REFERENCED_SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uid),
            )])
        };
        let mut record = sample_record("Doe^John", "SUBJ01");
        record.body_mut().put(DataElement::new(
            tags::SOURCE_IMAGE_SEQUENCE,
            VR::SQ,
            DataSetSequence::new(
                vec![item("1.2.840.10008.5.1.4.1.1.4"), item("1.2.840.10008.5.1.4.1.1.4")],
                Length::UNDEFINED,
            ),
        ));
        let spec = TransformSpec::parse_str("0x82112/0x81150 > hash:s1").unwrap();

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        let sequence = record.body().get(tags::SOURCE_IMAGE_SEQUENCE).unwrap();
        let items = sequence.value().items().unwrap();
        assert_eq!(items.len(), 2);
        for item in items {
            assert_eq!(
                text(item, tags::REFERENCED_SOP_CLASS_UID).as_deref(),
                Some("JhvCK69VT-1nP7RpSsaz9a_xsDTX6w6xSNyIMF3FfJ0")
            );
        }
    }

    #[test]
    fn missing_paths_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        // Modality is not a sequence, Patient's Age is absent
        let spec = TransformSpec::parse_str(
            "0x80060/0x100010 > delete\n0x101010 > archive, replace:X\n0x7fe00010 > delete",
        )
        .unwrap();
        let original = sample_record("Doe^John", "SUBJ01");
        let mut record = original.clone();

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        assert_eq!(record, original);
    }

    #[test]
    fn meta_fields_are_addressable() {
        let dir = tempfile::tempdir().unwrap();
        let log = archive_in(&dir);
        let spec = TransformSpec::parse_str("0x20003 > archive, replace:1.2.3").unwrap();
        let mut record = sample_record("Doe^John", "SUBJ01");

        deid(&mut record, &spec, &log, "a.dcm", &RunContext::with_default_salt("X")).unwrap();

        assert_eq!(
            text(record.meta(), tags::MEDIA_STORAGE_SOP_INSTANCE_UID).as_deref(),
            Some("1.2.3")
        );
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "a.dcm,0x20003,1.2.826.0.1.3680043.2.1125.1\n");
    }

    #[test]
    fn study_date_is_replaced_everywhere() {
        let mut record = sample_record("Doe^John", "SUBJ01");
        let outcome = strip_dates(&mut record, Some("19990101")).unwrap();

        assert_eq!(outcome.target, "20200101");
        assert_eq!(outcome.replacement, "19990101");
        assert_eq!(outcome.values, 3);
        assert_eq!(text(record.body(), tags::STUDY_DATE).as_deref(), Some("19990101"));
        assert_eq!(text(record.body(), tags::SERIES_DATE).as_deref(), Some("19990101"));
        assert_eq!(
            text(record.body(), tags::SERIES_DESCRIPTION).as_deref(),
            Some("T1w 19990101 run")
        );
    }

    #[test]
    fn series_date_is_the_fallback() {
        let mut record = sample_record("Doe^John", "SUBJ01");
        record.body_mut().remove(tags::STUDY_DATE);
        let outcome = strip_dates(&mut record, None).unwrap();

        assert_eq!(outcome.target, "20200101");
        assert!(is_valid_date(&outcome.replacement));
        assert_eq!(
            text(record.body(), tags::SERIES_DATE),
            Some(outcome.replacement.clone())
        );
    }

    #[test]
    fn records_without_dates_are_left_alone() {
        let mut record = sample_record("Doe^John", "SUBJ01");
        record.body_mut().remove(tags::STUDY_DATE);
        record.body_mut().remove(tags::SERIES_DATE);
        let original = record.clone();

        assert_eq!(strip_dates(&mut record, Some("19990101")), None);
        assert_eq!(record, original);
    }

    #[test]
    fn random_dates_are_in_range() {
        for _ in 0..200 {
            let date = random_date();
            assert!(is_valid_date(&date), "{}", date);
            let year: u32 = date[..4].parse().unwrap();
            let day: u32 = date[6..].parse().unwrap();
            assert!((1970..=2015).contains(&year));
            assert!((1..=28).contains(&day));
        }
    }

    #[test]
    fn date_validation() {
        assert!(is_valid_date("20070101"));
        assert!(!is_valid_date("20070230"));
        assert!(!is_valid_date("2007-01-01"));
        assert!(!is_valid_date("+2007011"));
    }
}
