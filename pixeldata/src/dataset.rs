//! A data set together with the transfer syntax it is encoded in.
use dicom_encoding::TransferSyntaxIndex;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry as EncodingRegistry;
use pacsnet_transfer_syntax_registry::{trim_uid, TransferSyntaxRegistry};
use snafu::{OptionExt, ResultExt};

use crate::{
    DatasetEncodingUnsupportedSnafu, ReadDatasetSnafu, Result, UnknownTransferSyntaxSnafu,
    WriteDatasetSnafu,
};

/// A data set as received in a message,
/// or about to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    transfer_syntax: String,
    object: InMemDicomObject,
}

impl Dataset {
    pub fn new(transfer_syntax: impl Into<String>, object: InMemDicomObject) -> Self {
        let transfer_syntax: String = transfer_syntax.into();
        Dataset {
            transfer_syntax: trim_uid(&transfer_syntax).to_string(),
            object,
        }
    }

    /// Read a data set encoded in the given transfer syntax.
    ///
    /// The transfer syntax must be registered.
    pub fn from_bytes(
        bytes: &[u8],
        transfer_syntax: &str,
        registry: &TransferSyntaxRegistry,
    ) -> Result<Self> {
        let uid = trim_uid(transfer_syntax);
        registry
            .get(uid)
            .context(UnknownTransferSyntaxSnafu { uid })?;
        let ts = EncodingRegistry
            .get(uid)
            .context(DatasetEncodingUnsupportedSnafu { uid })?;
        let object = InMemDicomObject::read_dataset_with_ts(bytes, ts).context(ReadDatasetSnafu)?;
        Ok(Dataset::new(uid, object))
    }

    /// Encode the data set in its transfer syntax.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let ts = EncodingRegistry
            .get(&self.transfer_syntax)
            .context(DatasetEncodingUnsupportedSnafu {
                uid: &self.transfer_syntax,
            })?;
        let mut out = Vec::new();
        self.object
            .write_dataset_with_ts(&mut out, ts)
            .context(WriteDatasetSnafu)?;
        Ok(out)
    }

    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    pub fn object(&self) -> &InMemDicomObject {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut InMemDicomObject {
        &mut self.object
    }

    pub fn into_object(self) -> InMemDicomObject {
        self.object
    }

    pub(crate) fn set_transfer_syntax(&mut self, transfer_syntax: &str) {
        self.transfer_syntax = trim_uid(transfer_syntax).to_string();
    }

    /// Replace the object and its transfer syntax together.
    pub(crate) fn commit(&mut self, transfer_syntax: &str, object: InMemDicomObject) {
        self.transfer_syntax = trim_uid(transfer_syntax).to_string();
        self.object = object;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use dicom_core::value::PrimitiveValue;
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::tags;
    use pacsnet_transfer_syntax_registry::entries;

    fn object() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
            DataElement::new(tags::ROWS, VR::US, dicom_value!(U16, [512])),
        ])
    }

    #[test]
    fn write_then_read() {
        let registry = TransferSyntaxRegistry::with_builtin();
        let ts_entry = entries::EXPLICIT_VR_LITTLE_ENDIAN;
        let uid = ts_entry.uid();
        let bytes = Dataset::new(uid, object()).to_bytes().unwrap();
        let dataset = Dataset::from_bytes(&bytes, uid, &registry).unwrap();
        assert_eq!(dataset.transfer_syntax(), uid);
        let rows = dataset.object().element(tags::ROWS).unwrap();
        assert_eq!(rows.to_int::<u16>().unwrap(), 512);
    }

    #[test]
    fn unregistered_transfer_syntax() {
        let registry = TransferSyntaxRegistry::builder().build();
        let e = Dataset::from_bytes(&[], entries::IMPLICIT_VR_LITTLE_ENDIAN.uid(), &registry)
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnknownTransferSyntax);
    }
}
