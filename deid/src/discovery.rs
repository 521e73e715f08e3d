//! Field discovery: which fields occur across a collection of records,
//! with a bounded set of example values for each.
use crate::error::{Result, WriteCsvSnafu, WriteFileSnafu};
use crate::record::Record;
use crate::tree::{display_value, is_binary, recurse_tree, NodeKey};
use dicom_core::header::Header;
use dicom_core::Tag;
use dicom_object::mem::InMemElement;
use snafu::ResultExt;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Value reported in place of binary field contents.
pub const BINARY_PLACEHOLDER: &str = "POTENTIAL PHI; REMOVE: binary data";

/// The only binary field whose contents are reported as is.
const FILE_META_INFORMATION_VERSION: Tag = Tag(0x0002, 0x0001);

/// Distinct example values per field,
/// in the order in which fields were first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryIndex {
    limit: usize,
    order: Vec<NodeKey>,
    values: HashMap<NodeKey, BTreeSet<String>>,
}

impl DiscoveryIndex {
    /// Create an empty index
    /// keeping at most `limit` distinct values per field.
    pub fn new(limit: usize) -> Self {
        DiscoveryIndex {
            limit,
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Record one occurrence of a field.
    pub fn observe(&mut self, key: &NodeKey, elem: &InMemElement) {
        let value = if is_binary(elem) && elem.tag() != FILE_META_INFORMATION_VERSION {
            BINARY_PLACEHOLDER.to_string()
        } else {
            display_value(elem)
        };

        if !self.values.contains_key(key) {
            self.order.push(key.clone());
        }
        let values = self.values.entry(key.clone()).or_default();
        if values.len() < self.limit {
            values.insert(value);
        }
    }

    /// Record every field of a record, main data set first.
    pub fn scan(&mut self, record: &Record) {
        recurse_tree(record.body(), &mut |key, elem| self.observe(key, elem));
        recurse_tree(record.meta(), &mut |key, elem| self.observe(key, elem));
    }

    /// The number of distinct fields seen.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The example values recorded for the field with the given id.
    pub fn values(&self, node_id: &str) -> Option<&BTreeSet<String>> {
        self.order
            .iter()
            .find(|key| key.id == node_id)
            .and_then(|key| self.values.get(key))
    }

    /// Iterate over the report rows:
    /// node id, node path, then the example values.
    pub fn rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.order.iter().map(move |key| {
            let mut row = vec![key.id.as_str(), key.path.as_str()];
            if let Some(values) = self.values.get(key) {
                row.extend(values.iter().map(String::as_str));
            }
            row
        })
    }

    /// Write the report as a header-less CSV file,
    /// one variable-length row per field.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .context(WriteCsvSnafu { path })?;
        for row in self.rows() {
            writer.write_record(row).context(WriteCsvSnafu { path })?;
        }
        writer.flush().context(WriteFileSnafu { path })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::sample_record;
    use dicom_core::value::PrimitiveValue;
    use dicom_core::{DataElement, VR};
    use dicom_dictionary_std::tags;
    use pretty_assertions::assert_eq;

    fn key(id: &str, path: &str) -> NodeKey {
        NodeKey {
            id: id.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn values_are_bounded_per_field() {
        let mut index = DiscoveryIndex::new(2);
        let k = key("0x100010", "PatientName");
        for name in ["A", "B", "C", "A"] {
            let elem = DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(name));
            index.observe(&k, &elem);
        }
        let values: Vec<_> = index.values("0x100010").unwrap().iter().cloned().collect();
        assert_eq!(values, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn binary_values_are_masked() {
        let mut index = DiscoveryIndex::new(20);
        let private = DataElement::new(Tag(0x0029, 0x1010), VR::OB, PrimitiveValue::from(vec![1_u8, 2, 3]));
        index.observe(&key("0x291010", "0x291010"), &private);
        let version = DataElement::new(
            FILE_META_INFORMATION_VERSION,
            VR::OB,
            PrimitiveValue::from(vec![0_u8, 1]),
        );
        index.observe(&key("0x20001", "FileMetaInformationVersion"), &version);

        assert!(index.values("0x291010").unwrap().contains(BINARY_PLACEHOLDER));
        assert!(!index.values("0x20001").unwrap().contains(BINARY_PLACEHOLDER));
    }

    #[test]
    fn scanning_covers_body_and_meta() {
        let mut index = DiscoveryIndex::new(20);
        index.scan(&sample_record("Doe^John", "S1"));
        index.scan(&sample_record("Roe^Jane", "S2"));

        let names: Vec<_> = index.values("0x100010").unwrap().iter().cloned().collect();
        assert_eq!(names, vec!["Doe^John".to_string(), "Roe^Jane".to_string()]);
        assert!(index.values("0x20010").is_some());
        // pixel data is never reported
        assert!(index.values("0x7fe00010").is_none());

        // main data set fields come first
        assert_eq!(index.rows().next().unwrap()[0], "0x80016");
    }

    #[test]
    fn report_rows_have_variable_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dicom_fields.csv");
        let mut index = DiscoveryIndex::new(20);
        let k = key("0x100010", "PatientName");
        for name in ["Doe^John", "Roe^Jane"] {
            let elem = DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(name));
            index.observe(&k, &elem);
        }
        let elem = DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR"));
        index.observe(&key("0x80060", "Modality"), &elem);
        index.write_report(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "0x100010,PatientName,Doe^John,Roe^Jane\n0x80060,Modality,MR\n"
        );
    }
}
