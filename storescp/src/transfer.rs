//! Accepted storage presentation contexts
use dicom_dictionary_std::uids;
use pacsnet_transfer_syntax_registry::{entries, TransferSyntaxRegistry};

/// The storage SOP classes accepted besides verification.
pub static STORAGE_SOP_CLASSES: &[&str] = &[
    uids::COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
    uids::DIGITAL_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    uids::DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    uids::CT_IMAGE_STORAGE,
    uids::ENHANCED_CT_IMAGE_STORAGE,
    uids::MR_IMAGE_STORAGE,
    uids::ENHANCED_MR_IMAGE_STORAGE,
    uids::ULTRASOUND_IMAGE_STORAGE,
    uids::ULTRASOUND_MULTI_FRAME_IMAGE_STORAGE,
    uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
    uids::MULTI_FRAME_TRUE_COLOR_SECONDARY_CAPTURE_IMAGE_STORAGE,
    uids::X_RAY_ANGIOGRAPHIC_IMAGE_STORAGE,
    uids::NUCLEAR_MEDICINE_IMAGE_STORAGE,
    uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
    uids::RT_IMAGE_STORAGE,
    uids::RT_DOSE_STORAGE,
    uids::RT_STRUCTURE_SET_STORAGE,
    uids::GRAYSCALE_SOFTCOPY_PRESENTATION_STATE_STORAGE,
    uids::ENCAPSULATED_PDF_STORAGE,
    uids::BASIC_TEXT_SR_STORAGE,
    uids::ENHANCED_SR_STORAGE,
    uids::X_RAY_RADIATION_DOSE_SR_STORAGE,
];

/// The transfer syntaxes accepted for storage,
/// in order of preference.
///
/// Deflated data sets are never accepted.
pub fn storage_transfer_syntaxes(
    registry: &TransferSyntaxRegistry,
    uncompressed_only: bool,
) -> Vec<String> {
    let mut list = vec![
        entries::EXPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
        entries::IMPLICIT_VR_LITTLE_ENDIAN.uid().to_string(),
    ];
    if uncompressed_only {
        return list;
    }
    for ts in registry.iter().filter(|ts| !ts.is_deflated()) {
        if !list.iter().any(|uid| uid == ts.uid()) {
            list.push(ts.uid().to_string());
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_only() {
        let registry = TransferSyntaxRegistry::with_builtin();
        let list = storage_transfer_syntaxes(&registry, true);
        assert_eq!(list, vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"]);
    }

    #[test]
    fn encapsulated_syntaxes_without_deflate() {
        let registry = TransferSyntaxRegistry::with_builtin();
        let list = storage_transfer_syntaxes(&registry, false);
        assert_eq!(&list[..2], &["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"]);
        assert!(list.iter().any(|uid| uid == entries::RLE_LOSSLESS.uid()));
        assert!(list.iter().any(|uid| uid == entries::JPEG_BASELINE.uid()));
        assert!(!list
            .iter()
            .any(|uid| uid == entries::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN.uid()));
        // no duplicates
        let mut sorted = list.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), list.len());
    }
}
