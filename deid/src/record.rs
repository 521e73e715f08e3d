//! Reading and writing DICOM records.
//!
//! A [`Record`] holds the two field trees of a DICOM file:
//! the file meta group (group `0x0002`) and the main data set.
//! Both are exposed as in-memory objects,
//! so that transformations may address and modify meta fields
//! the same way as any other field.
use crate::error::{
    BuildMetaSnafu, DecodeSnafu, NotDicomSnafu, ParseError, ReadSnafu, Result,
    SerializeRecordSnafu, WriteFileSnafu,
};
use dicom_core::value::PrimitiveValue;
use dicom_core::{DataElement, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTable, FileMetaTableBuilder, InMemDicomObject, OpenFileOptions};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::{OptionExt, ResultExt};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const DICM_MAGIC: &[u8; 4] = b"DICM";
const PREAMBLE_LEN: usize = 128;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A parsed DICOM record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    meta: InMemDicomObject,
    body: InMemDicomObject,
}

impl Record {
    /// Create a record from a file meta table and a main data set.
    pub fn new(meta: &FileMetaTable, body: InMemDicomObject) -> Self {
        Record {
            meta: meta_to_dataset(meta),
            body,
        }
    }

    /// Parse a complete DICOM file from memory.
    ///
    /// The data may or may not start with the 128-byte preamble,
    /// but must contain the `DICM` magic code.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(bytes, OpenFileOptions::new())
    }

    /// Parse a DICOM file from memory,
    /// stopping before the pixel data.
    ///
    /// The outcome is only suitable for inspection,
    /// since writing it back would lose the image.
    pub fn parse_partial(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(bytes, OpenFileOptions::new().read_until(tags::PIXEL_DATA))
    }

    fn parse_with(bytes: &[u8], options: OpenFileOptions) -> Result<Self, ParseError> {
        let start = dicm_offset(bytes).context(NotDicomSnafu)?;
        let file = options.from_reader(&bytes[start..]).context(DecodeSnafu)?;
        let meta = meta_to_dataset(file.meta());
        Ok(Record {
            meta,
            body: file.into_inner(),
        })
    }

    /// The file meta group as a field tree.
    pub fn meta(&self) -> &InMemDicomObject {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut InMemDicomObject {
        &mut self.meta
    }

    /// The main data set.
    pub fn body(&self) -> &InMemDicomObject {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut InMemDicomObject {
        &mut self.body
    }

    /// The file meta group if `meta` is true, the main data set otherwise.
    pub fn subtree_mut(&mut self, meta: bool) -> &mut InMemDicomObject {
        if meta {
            &mut self.meta
        } else {
            &mut self.body
        }
    }

    /// Serialize the record into a complete DICOM file,
    /// preamble included.
    ///
    /// The file meta group is rebuilt from the meta field tree,
    /// so changes made to it are preserved
    /// and the group length is recalculated.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let meta = dataset_to_meta(&self.meta)?;
        let file = self.body.clone().with_exact_meta(meta);
        let mut out = Vec::new();
        file.write_all(&mut out).context(SerializeRecordSnafu)?;
        Ok(out)
    }
}

/// Find the position of the `DICM` magic code,
/// either after the preamble or at the very beginning.
fn dicm_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.get(PREAMBLE_LEN..PREAMBLE_LEN + 4) == Some(&DICM_MAGIC[..]) {
        Some(PREAMBLE_LEN)
    } else if bytes.starts_with(DICM_MAGIC) {
        Some(0)
    } else {
        None
    }
}

/// Check whether the leading bytes of a payload look like a DICOM file.
pub(crate) fn looks_like_dicom(head: &[u8]) -> bool {
    dicm_offset(head).is_some()
}

/// Read a payload from disk as a DICOM record,
/// transparently decompressing gzip.
///
/// Returns the record and whether the payload was gzip compressed.
/// Only the leading bytes are read
/// if the payload is not a DICOM file,
/// so that large archives are not loaded into memory for nothing.
pub(crate) fn read_record(path: &Path, full: bool) -> Result<(Record, bool), ParseError> {
    let mut file = File::open(path).context(ReadSnafu { path })?;
    let mut magic = Vec::with_capacity(2);
    (&mut file)
        .take(2)
        .read_to_end(&mut magic)
        .context(ReadSnafu { path })?;
    let gzipped = magic == GZIP_MAGIC;

    let file = File::open(path).context(ReadSnafu { path })?;
    let mut reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut bytes = Vec::with_capacity(PREAMBLE_LEN + 4);
    (&mut reader)
        .take((PREAMBLE_LEN + 4) as u64)
        .read_to_end(&mut bytes)
        .context(ReadSnafu { path })?;
    if !looks_like_dicom(&bytes) {
        return NotDicomSnafu.fail();
    }
    reader.read_to_end(&mut bytes).context(ReadSnafu { path })?;

    let record = if full {
        Record::parse(&bytes)?
    } else {
        Record::parse_partial(&bytes).or_else(|_| Record::parse(&bytes))?
    };
    Ok((record, gzipped))
}

/// Write a serialized record to disk, gzip compressed if requested.
pub(crate) fn write_record(path: &Path, bytes: &[u8], gzipped: bool) -> Result<()> {
    let file = File::create(path).context(WriteFileSnafu { path })?;
    if gzipped {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes).context(WriteFileSnafu { path })?;
        encoder.finish().context(WriteFileSnafu { path })?;
    } else {
        let mut file = file;
        file.write_all(bytes).context(WriteFileSnafu { path })?;
    }
    Ok(())
}

fn trim_text(text: &str) -> &str {
    text.trim_end_matches(|c: char| c == '\0' || c == ' ')
}

fn put_text(obj: &mut InMemDicomObject, tag: Tag, vr: VR, text: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(trim_text(text))));
}

/// Represent a file meta table as a field tree.
fn meta_to_dataset(meta: &FileMetaTable) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        tags::FILE_META_INFORMATION_GROUP_LENGTH,
        VR::UL,
        PrimitiveValue::from(meta.information_group_length),
    ));
    obj.put(DataElement::new(
        tags::FILE_META_INFORMATION_VERSION,
        VR::OB,
        PrimitiveValue::from(meta.information_version.to_vec()),
    ));
    put_text(
        &mut obj,
        tags::MEDIA_STORAGE_SOP_CLASS_UID,
        VR::UI,
        &meta.media_storage_sop_class_uid,
    );
    put_text(
        &mut obj,
        tags::MEDIA_STORAGE_SOP_INSTANCE_UID,
        VR::UI,
        &meta.media_storage_sop_instance_uid,
    );
    put_text(
        &mut obj,
        tags::TRANSFER_SYNTAX_UID,
        VR::UI,
        &meta.transfer_syntax,
    );
    put_text(
        &mut obj,
        tags::IMPLEMENTATION_CLASS_UID,
        VR::UI,
        &meta.implementation_class_uid,
    );

    let optional = [
        (
            tags::IMPLEMENTATION_VERSION_NAME,
            VR::SH,
            &meta.implementation_version_name,
        ),
        (
            tags::SOURCE_APPLICATION_ENTITY_TITLE,
            VR::AE,
            &meta.source_application_entity_title,
        ),
        (
            tags::SENDING_APPLICATION_ENTITY_TITLE,
            VR::AE,
            &meta.sending_application_entity_title,
        ),
        (
            tags::RECEIVING_APPLICATION_ENTITY_TITLE,
            VR::AE,
            &meta.receiving_application_entity_title,
        ),
        (
            tags::PRIVATE_INFORMATION_CREATOR_UID,
            VR::UI,
            &meta.private_information_creator_uid,
        ),
    ];
    for (tag, vr, value) in optional {
        if let Some(text) = value {
            put_text(&mut obj, tag, vr, text);
        }
    }
    if let Some(data) = &meta.private_information {
        obj.put(DataElement::new(
            tags::PRIVATE_INFORMATION,
            VR::OB,
            PrimitiveValue::from(data.clone()),
        ));
    }
    obj
}

/// Rebuild a file meta table from its field tree.
///
/// Required UIDs which were removed are written out empty.
fn dataset_to_meta(obj: &InMemDicomObject) -> Result<FileMetaTable> {
    let text = |tag: Tag| -> Option<String> {
        let elem = obj.get(tag)?;
        let value = elem.value().to_str().ok()?;
        Some(trim_text(&value).to_string())
    };

    let mut builder = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(text(tags::MEDIA_STORAGE_SOP_CLASS_UID).unwrap_or_default())
        .media_storage_sop_instance_uid(
            text(tags::MEDIA_STORAGE_SOP_INSTANCE_UID).unwrap_or_default(),
        )
        .transfer_syntax(text(tags::TRANSFER_SYNTAX_UID).unwrap_or_default());

    if let Some(version) = obj
        .get(tags::FILE_META_INFORMATION_VERSION)
        .and_then(|e| e.value().to_bytes().ok())
    {
        if let [major, minor] = version[..] {
            builder = builder.information_version([major, minor]);
        }
    }
    if let Some(uid) = text(tags::IMPLEMENTATION_CLASS_UID) {
        builder = builder.implementation_class_uid(uid);
    }
    if let Some(name) = text(tags::IMPLEMENTATION_VERSION_NAME) {
        builder = builder.implementation_version_name(name);
    }
    if let Some(title) = text(tags::SOURCE_APPLICATION_ENTITY_TITLE) {
        builder = builder.source_application_entity_title(title);
    }
    if let Some(title) = text(tags::SENDING_APPLICATION_ENTITY_TITLE) {
        builder = builder.sending_application_entity_title(title);
    }
    if let Some(title) = text(tags::RECEIVING_APPLICATION_ENTITY_TITLE) {
        builder = builder.receiving_application_entity_title(title);
    }
    if let Some(uid) = text(tags::PRIVATE_INFORMATION_CREATOR_UID) {
        builder = builder.private_information_creator_uid(uid);
    }
    if let Some(data) = obj
        .get(tags::PRIVATE_INFORMATION)
        .and_then(|e| e.value().to_bytes().ok())
    {
        builder = builder.private_information(data.into_owned());
    }

    builder.build().context(BuildMetaSnafu)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory DICOM fixtures.
    use super::Record;
    use dicom_core::value::PrimitiveValue;
    use dicom_core::{DataElement, VR};
    use dicom_dictionary_std::{tags, uids};
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

    pub fn sample_body(patient_name: &str, patient_id: &str) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.3680043.2.1125.1")),
            DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20200101")),
            DataElement::new(tags::SERIES_DATE, VR::DA, PrimitiveValue::from("20200101")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(patient_name)),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
            DataElement::new(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("7")),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from("T1w 20200101 run")),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(vec![0_u8; 8])),
        ])
    }

    pub fn sample_record(patient_name: &str, patient_id: &str) -> Record {
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
            .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1125.1")
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .implementation_class_uid("1.2.826.0.1.3680043.2.1125.99")
            .build()
            .expect("valid meta table");
        Record::new(&meta, sample_body(patient_name, patient_id))
    }

    pub fn sample_bytes(patient_name: &str, patient_id: &str) -> Vec<u8> {
        sample_record(patient_name, patient_id)
            .to_bytes()
            .expect("serializable record")
    }
}
