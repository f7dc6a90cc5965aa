//! H.264 bitstream reframing
//!
//! The display server may send NAL units either in Annex-B layout
//! (start-code delimited) or in AVCC layout (4-byte big-endian length
//! prefix per NAL). Decoders are always fed Annex-B, so every packet is
//! normalized through [`to_annex_b`] first.
//!
//! ```text
//! AVCC:    [len:4][NAL][len:4][NAL]...
//! Annex-B: [00 00 00 01][NAL][00 00 00 01][NAL]...
//! ```

use std::borrow::Cow;

/// NAL unit start code (Annex B)
pub const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
/// Short NAL start code
pub const NAL_SHORT_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Coded slice of an IDR picture
pub const NAL_TYPE_IDR: u8 = 5;
/// Sequence parameter set
pub const NAL_TYPE_SPS: u8 = 7;
/// Picture parameter set
pub const NAL_TYPE_PPS: u8 = 8;

/// Size of the AVCC length prefix
const AVCC_LENGTH_SIZE: usize = 4;

/// Returns true if the packet already begins with an Annex-B start code
#[must_use]
pub fn is_annex_b(packet: &[u8]) -> bool {
    packet.starts_with(&NAL_START_CODE) || packet.starts_with(&NAL_SHORT_START_CODE)
}

/// Normalize a packet to Annex-B layout.
///
/// Packets that already start with a start code are returned unchanged.
/// Anything else is parsed as a sequence of AVCC records; if any record
/// is empty or runs past the end of the buffer the original packet is
/// returned unchanged rather than a partial conversion.
#[must_use]
pub fn to_annex_b(packet: &[u8]) -> Cow<'_, [u8]> {
    if is_annex_b(packet) {
        return Cow::Borrowed(packet);
    }

    match avcc_to_annex_b(packet) {
        Some(converted) => Cow::Owned(converted),
        None => Cow::Borrowed(packet),
    }
}

fn avcc_to_annex_b(packet: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(packet.len() + NAL_START_CODE.len());
    let mut offset = 0;

    while offset < packet.len() {
        let header = packet.get(offset..offset + AVCC_LENGTH_SIZE)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        offset += AVCC_LENGTH_SIZE;

        if len == 0 {
            return None;
        }
        let end = offset.checked_add(len)?;
        let nal = packet.get(offset..end)?;

        out.extend_from_slice(&NAL_START_CODE);
        out.extend_from_slice(nal);
        offset = end;
    }

    Some(out)
}

/// Type of the first NAL unit in an Annex-B buffer.
///
/// Scans for the first 3- or 4-byte start code and returns the low five
/// bits of the header byte that follows it.
#[must_use]
pub fn nal_unit_type(packet: &[u8]) -> Option<u8> {
    // A 4-byte start code contains the short one at offset 1
    let pos = packet
        .windows(NAL_SHORT_START_CODE.len())
        .position(|w| w == NAL_SHORT_START_CODE)?;

    packet
        .get(pos + NAL_SHORT_START_CODE.len())
        .map(|header| header & 0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avcc(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_annex_b_passthrough() {
        let long = vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84];
        assert_eq!(to_annex_b(&long).as_ref(), long.as_slice());
        assert!(matches!(to_annex_b(&long), Cow::Borrowed(_)));

        let short = vec![0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];
        assert_eq!(to_annex_b(&short).as_ref(), short.as_slice());
    }

    #[test]
    fn test_avcc_conversion() {
        let sps: &[u8] = &[0x67, 0x42, 0x00, 0x1F];
        let pps: &[u8] = &[0x68, 0xCE, 0x3C];
        let input = avcc(&[sps, pps]);

        let out = to_annex_b(&input);
        assert_eq!(
            out.as_ref(),
            &[
                0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1F, //
                0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C,
            ]
        );
    }

    #[test]
    fn test_avcc_conversion_is_idempotent() {
        let input = avcc(&[&[0x65, 0x88, 0x84, 0x00, 0x10], &[0x41, 0x9A]]);
        let once = to_annex_b(&input).into_owned();
        let twice = to_annex_b(&once).into_owned();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_truncated_avcc_passthrough() {
        // Length field claims 16 bytes, only 3 follow
        let input = vec![0x00, 0x00, 0x00, 0x10, 0x65, 0x88, 0x84];
        assert_eq!(to_annex_b(&input).as_ref(), input.as_slice());
    }

    #[test]
    fn test_corrupt_second_record_passthrough() {
        let mut input = avcc(&[&[0x65, 0x88]]);
        input.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF, 0x41]);
        assert_eq!(to_annex_b(&input).as_ref(), input.as_slice());
    }

    #[test]
    fn test_zero_length_record_passthrough() {
        let input = vec![0x00, 0x00, 0x00, 0x00, 0x65];
        assert_eq!(to_annex_b(&input).as_ref(), input.as_slice());
    }

    #[test]
    fn test_trailing_partial_length_passthrough() {
        let mut input = avcc(&[&[0x65, 0x88]]);
        input.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(to_annex_b(&input).as_ref(), input.as_slice());
    }

    #[test]
    fn test_nal_unit_type() {
        assert_eq!(
            nal_unit_type(&[0x00, 0x00, 0x00, 0x01, 0x67, 0x42]),
            Some(NAL_TYPE_SPS)
        );
        assert_eq!(nal_unit_type(&[0x00, 0x00, 0x01, 0x68, 0xCE]), Some(NAL_TYPE_PPS));
        assert_eq!(nal_unit_type(&[0x00, 0x00, 0x00, 0x01, 0x65]), Some(5));
    }

    #[test]
    fn test_nal_unit_type_without_start_code() {
        assert_eq!(nal_unit_type(&[0x67, 0x42, 0x00, 0x1F]), None);
        assert_eq!(nal_unit_type(&[]), None);
        // Start code with nothing after it
        assert_eq!(nal_unit_type(&[0x00, 0x00, 0x01]), None);
    }

    #[test]
    fn test_nal_unit_type_after_leading_garbage() {
        assert_eq!(nal_unit_type(&[0xAA, 0x00, 0x00, 0x01, 0x41]), Some(1));
    }
}
