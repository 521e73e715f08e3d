//! DICOM file and archive fixtures.
#![allow(dead_code)]
use dicom_core::value::PrimitiveValue;
use dicom_core::{DataElement, Tag, VR};
use dicom_deid::tree::{display_value, FieldContainer};
use dicom_deid::Record;
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const SOP_INSTANCE_UID: &str = "1.2.826.0.1.3680043.2.1125.7";

/// Serialize a DICOM file with a few identifying fields
/// plus the given ones.
pub fn dicom_bytes(fields: &[(Tag, VR, &str)]) -> Vec<u8> {
    let mut obj = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(SOP_INSTANCE_UID)),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SUBJ01")),
        DataElement::new(tags::PATIENT_SEX, VR::CS, PrimitiveValue::from("O")),
        DataElement::new(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("7")),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(vec![1_u8, 2, 3, 4])),
    ]);
    for &(tag, vr, value) in fields {
        obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }
    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(SOP_INSTANCE_UID)
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .unwrap();
    let mut out = Vec::new();
    file.write_all(&mut out).unwrap();
    out
}

pub fn write_dicom(path: &Path, fields: &[(Tag, VR, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, dicom_bytes(fields)).unwrap();
}

pub fn write_gzipped_dicom(path: &Path, fields: &[(Tag, VR, &str)]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(&dicom_bytes(fields)).unwrap();
    encoder.finish().unwrap();
}

/// Pack named payloads into a zip archive.
pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Pack named payloads into a gzip compressed tar archive.
pub fn write_tar_gz(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, &data[..]).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

pub fn read_record(path: &Path) -> Record {
    Record::parse(&fs::read(path).unwrap()).unwrap()
}

/// The text of a field of the main data set, if present.
pub fn field(record: &Record, tag: Tag) -> Option<String> {
    record.body().get(tag).map(display_value)
}
