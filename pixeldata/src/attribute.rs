//! Fetching and replacing image attributes of a DICOM object.
use dicom_core::value::{PrimitiveValue, Value};
use dicom_core::{DataElement, Tag, VR};
use dicom_object::{mem::InMemElement, InMemDicomObject};
use snafu::{OptionExt, ResultExt};

use crate::{ConvertAttributeSnafu, MissingAttributeSnafu, Result};

pub(crate) fn required_u16(obj: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<u16> {
    let value = obj
        .element(tag)
        .ok()
        .context(MissingAttributeSnafu { name })?
        .to_int::<u16>()
        .context(ConvertAttributeSnafu { name })?;
    Ok(value)
}

pub(crate) fn optional_u16(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<Option<u16>> {
    match obj.element(tag).ok() {
        Some(elem) => Ok(Some(
            elem.to_int::<u16>().context(ConvertAttributeSnafu { name })?,
        )),
        None => Ok(None),
    }
}

pub(crate) fn optional_u32(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<Option<u32>> {
    match obj.element(tag).ok() {
        Some(elem) => Ok(Some(
            elem.to_int::<u32>().context(ConvertAttributeSnafu { name })?,
        )),
        None => Ok(None),
    }
}

pub(crate) fn required_string(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<String> {
    let elem = obj.element(tag).ok().context(MissingAttributeSnafu { name })?;
    match elem.value() {
        Value::Primitive(v) => Ok(v.to_str().trim().to_string()),
        _ => Err(MissingAttributeSnafu { name }.build().into()),
    }
}

/// The raw bytes of a binary value,
/// with 16-bit words laid out in little endian order.
pub(crate) fn binary_value(elem: &InMemElement) -> Option<Vec<u8>> {
    match elem.value() {
        Value::Primitive(PrimitiveValue::U8(bytes)) => Some(bytes.to_vec()),
        Value::Primitive(PrimitiveValue::U16(words)) => {
            Some(words.iter().flat_map(|w| w.to_le_bytes()).collect())
        }
        Value::Primitive(PrimitiveValue::I16(words)) => {
            Some(words.iter().flat_map(|w| w.to_le_bytes()).collect())
        }
        _ => None,
    }
}

/// An OW element holding the given bytes,
/// padded to an even length.
pub(crate) fn ow_element(tag: Tag, bytes: &[u8]) -> InMemElement {
    let words: Vec<u16> = bytes
        .chunks(2)
        .map(|c| u16::from_le_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
        .collect();
    DataElement::new(tag, VR::OW, PrimitiveValue::U16(words.into()))
}

pub(crate) fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

pub(crate) fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}
