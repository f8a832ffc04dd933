//! Fragmentation of DIMSE message parts into P-DATA-TF PDUs.
use crate::pdu::{PDataValue, PDataValueType, Pdu, MAXIMUM_PDU_SIZE, PDV_HEADER_SIZE};

/// Split a command or data set into P-DATA-TF PDUs
/// which respect the peer's maximum PDU length.
///
/// Each PDU carries exactly one presentation data value.
/// The last one has its last-fragment bit set.
/// An empty payload still yields a single PDU.
pub fn fragment(
    presentation_context_id: u8,
    value_type: PDataValueType,
    data: &[u8],
    peer_max_pdu_length: u32,
) -> impl Iterator<Item = Pdu> + '_ {
    let max_data = max_data_length(peer_max_pdu_length);
    let chunk_count = data.len().div_ceil(max_data).max(1);
    (0..chunk_count).map(move |i| {
        let start = i * max_data;
        let end = (start + max_data).min(data.len());
        Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: i + 1 == chunk_count,
                data: data[start..end].to_vec(),
            }],
        }
    })
}

/// The largest PDV payload fitting in a PDU of the given length.
///
/// An unlimited peer is still sent PDUs
/// no larger than [`MAXIMUM_PDU_SIZE`].
pub fn max_data_length(peer_max_pdu_length: u32) -> usize {
    let max_pdu = peer_max_pdu_length.min(MAXIMUM_PDU_SIZE);
    max_pdu.saturating_sub(PDV_HEADER_SIZE).max(1) as usize
}
