//! Tag-tree model: addressing fields of a DICOM data set by tag path.
//!
//! Every field is identified by a `node_id`,
//! the `/`-joined hexadecimal tags from the data set root to the field
//! (e.g. `0x82112/0x81150`),
//! and a `node_path`,
//! the parallel `/`-joined dictionary aliases
//! (e.g. `SourceImageSequence/ReferencedSOPClassUID`).
//! Items of a sequence are not distinguished:
//! all items under the same tag path share one id.
use crate::error::{Error, InvalidTagPathSnafu};
use dicom_core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom_core::header::Header;
use dicom_core::value::PrimitiveValue;
use dicom_core::{Tag, VR};
use dicom_object::mem::{InMemDicomObject, InMemElement};
use dicom_object::StandardDataDictionary;
use std::fmt;
use std::str::FromStr;

/// Bulk pixel data attributes,
/// which are never traversed nor transformed.
const PIXEL_DATA_TAGS: [Tag; 3] = [
    // Float Pixel Data
    Tag(0x7FE0, 0x0008),
    // Double Float Pixel Data
    Tag(0x7FE0, 0x0009),
    // Pixel Data
    Tag(0x7FE0, 0x0010),
];

/// Whether the tag refers to one of the bulk pixel data attributes.
pub fn is_pixel_data(tag: Tag) -> bool {
    PIXEL_DATA_TAGS.contains(&tag)
}

/// Render a tag as `0x` followed by the shortest lowercase hexadecimal
/// form of its 32-bit code, e.g. `0x100010` for _Patient's Name_.
pub fn render_tag(tag: Tag) -> String {
    let code = (u32::from(tag.group()) << 16) | u32::from(tag.element());
    format!("{:#x}", code)
}

/// Parse a tag from its hexadecimal code,
/// with an optional `0x` prefix, case-insensitive,
/// with or without zero padding (at most 8 digits).
pub fn parse_tag(text: &str) -> Option<Tag> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let code = u32::from_str_radix(digits, 16).ok()?;
    Some(Tag((code >> 16) as u16, (code & 0xFFFF) as u16))
}

/// The human readable name of a field:
/// its standard dictionary alias,
/// or the rendered tag if the dictionary has no entry for it.
pub fn field_name(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias().to_string())
        .unwrap_or_else(|| render_tag(tag))
}

/// A sequence of tags leading from a data set root to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagPath(Vec<Tag>);

impl TagPath {
    pub fn tags(&self) -> &[Tag] {
        &self.0
    }

    /// The last tag of the path, naming the field itself.
    pub fn leaf(&self) -> Tag {
        // never empty, guaranteed by the constructor
        self.0[self.0.len() - 1]
    }

    /// Whether the path addresses the file meta group (group 0x0002).
    pub fn is_meta(&self) -> bool {
        self.0[0].group() == 0x0002
    }
}

impl FromStr for TagPath {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let tags = key
            .split('/')
            .map(parse_tag)
            .collect::<Option<Vec<_>>>()
            .filter(|tags| !tags.is_empty());
        match tags {
            Some(tags) => Ok(TagPath(tags)),
            None => InvalidTagPathSnafu { key }.fail(),
        }
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&render_tag(*tag))?;
        }
        Ok(())
    }
}

/// The address of a field in the tree, as reported to node visitors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    /// `/`-joined hexadecimal tags
    pub id: String,
    /// `/`-joined field names
    pub path: String,
}

impl NodeKey {
    fn root(tag: Tag) -> Self {
        NodeKey {
            id: render_tag(tag),
            path: field_name(tag),
        }
    }

    fn child(&self, tag: Tag) -> Self {
        NodeKey {
            id: format!("{}/{}", self.id, render_tag(tag)),
            path: format!("{}/{}", self.path, field_name(tag)),
        }
    }
}

/// Visit every plain field of the data set depth-first,
/// skipping pixel data.
///
/// Nested data sets of a sequence are visited in order
/// under the sequence's own key,
/// so `node_fn` may be called several times with the same key.
/// Sequence elements themselves are not passed to `node_fn`.
pub fn recurse_tree<F>(obj: &InMemDicomObject, node_fn: &mut F)
where
    F: FnMut(&NodeKey, &InMemElement),
{
    recurse_from(obj, None, node_fn)
}

fn recurse_from<F>(obj: &InMemDicomObject, parent: Option<&NodeKey>, node_fn: &mut F)
where
    F: FnMut(&NodeKey, &InMemElement),
{
    for elem in obj {
        let tag = elem.tag();
        if is_pixel_data(tag) || elem.value().fragments().is_some() {
            continue;
        }
        let key = match parent {
            Some(parent) => parent.child(tag),
            None => NodeKey::root(tag),
        };
        match elem.value().items() {
            Some(items) => {
                for item in items {
                    recurse_from(item, Some(&key), node_fn);
                }
            }
            None => node_fn(&key, elem),
        }
    }
}

/// Visit every primitive value of the data set mutably,
/// descending into all sequence items and skipping pixel data.
pub fn visit_values_mut(obj: &mut InMemDicomObject, f: &mut dyn FnMut(&mut PrimitiveValue)) {
    let tags: Vec<Tag> = obj
        .iter()
        .map(|elem| elem.tag())
        .filter(|tag| !is_pixel_data(*tag))
        .collect();
    for tag in tags {
        obj.update_value(tag, |value| {
            if let Some(items) = value.items_mut() {
                for item in items.iter_mut() {
                    visit_values_mut(item, f);
                }
            } else if let Some(primitive) = value.primitive_mut() {
                f(primitive);
            }
        });
    }
}

/// A data set exposing its fields by tag.
///
/// Transformations only rely on this interface
/// to look up, overwrite, and remove fields,
/// and to descend into the items of a sequence.
pub trait FieldContainer {
    /// Fetch the field with the given tag, if present.
    fn get(&self, tag: Tag) -> Option<&InMemElement>;

    fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    /// Remove the field, returning whether it was present.
    fn remove(&mut self, tag: Tag) -> bool;

    /// Overwrite the value of an existing field with text.
    ///
    /// Returns `false` and does nothing if the field is absent.
    fn set(&mut self, tag: Tag, text: String) -> bool;

    /// Call `f` on each item of the sequence with the given tag.
    /// Does nothing if the field is absent or not a sequence.
    fn for_each_item_mut(&mut self, tag: Tag, f: &mut dyn FnMut(&mut InMemDicomObject));
}

impl FieldContainer for InMemDicomObject {
    fn get(&self, tag: Tag) -> Option<&InMemElement> {
        self.element(tag).ok()
    }

    fn remove(&mut self, tag: Tag) -> bool {
        self.remove_element(tag)
    }

    fn set(&mut self, tag: Tag, text: String) -> bool {
        let vr = match self.get(tag) {
            Some(elem) => text_vr(elem.vr(), &text),
            None => return false,
        };
        self.put(InMemElement::new(tag, vr, PrimitiveValue::from(text)));
        true
    }

    fn for_each_item_mut(&mut self, tag: Tag, f: &mut dyn FnMut(&mut InMemDicomObject)) {
        self.update_value(tag, |value| {
            if let Some(items) = value.items_mut() {
                for item in items.iter_mut() {
                    f(item);
                }
            }
        });
    }
}

/// The value representation to use when storing text in a field
/// which currently has the given VR.
fn text_vr(vr: VR, text: &str) -> VR {
    match vr {
        VR::AE | VR::AS | VR::CS | VR::DA | VR::DS | VR::DT | VR::IS | VR::LO | VR::LT
        | VR::PN | VR::SH | VR::ST | VR::TM | VR::UC | VR::UI | VR::UR | VR::UT => vr,
        _ if text.len() <= 64 => VR::LO,
        _ => VR::UT,
    }
}

/// Whether the field holds binary data rather than text or numbers.
pub fn is_binary(elem: &InMemElement) -> bool {
    matches!(
        elem.vr(),
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::UN
    )
}

/// The textual representation of a field's value,
/// without trailing padding.
///
/// Multiple values are joined with a backslash.
pub fn display_value(elem: &InMemElement) -> String {
    let value = elem.value();
    if let Some(items) = value.items() {
        return format!("<sequence of {} items>", items.len());
    }
    match value.primitive() {
        Some(primitive) => primitive
            .to_str()
            .trim_end_matches(|c: char| c == '\0' || c == ' ')
            .to_string(),
        None => "<pixel data fragments>".to_string(),
    }
}
