// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Fixed-width and variable-length integers as stored in database pages.

/// Read a 2-byte big-endian integer.
#[inline]
pub fn get2(bytes: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?))
}

/// Read a 4-byte big-endian integer.
#[inline]
pub fn get4(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?))
}

/// Decode a base-128 varint.
///
/// The first eight bytes contribute seven bits each and have the high bit set
/// when another byte follows; a ninth byte contributes all eight bits.
/// Returns the value and the number of bytes consumed, or `None` when the
/// input ends before the varint does.
pub fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..8 {
        let byte = *bytes.get(i)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    let last = *bytes.get(8)?;
    Some(((value << 8) | u64::from(last), 9))
}

/// Number of bytes [`read_varint`] consumes for `value`.
pub fn varint_len(value: u64) -> usize {
    if value > 0x00ff_ffff_ffff_ffff {
        return 9;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

#[cfg(test)]
pub(crate) fn write_varint(value: u64, out: &mut Vec<u8>) {
    if value > 0x00ff_ffff_ffff_ffff {
        let high = value >> 8;
        for i in (0..8).rev() {
            out.push((((high >> (7 * i)) & 0x7f) as u8) | 0x80);
        }
        out.push(value as u8);
        return;
    }
    let len = varint_len(value);
    for i in (0..len).rev() {
        let mut byte = ((value >> (7 * i)) & 0x7f) as u8;
        if i != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x00], 0, 1)]
    #[case(&[0x7f], 127, 1)]
    #[case(&[0x81, 0x00], 128, 2)]
    #[case(&[0x82, 0x2c], 300, 2)]
    #[case(&[0xff, 0xff, 0x7f], 0x1f_ffff, 3)]
    fn test_known_varints(#[case] bytes: &[u8], #[case] value: u64, #[case] len: usize) {
        assert_eq!(read_varint(bytes), Some((value, len)));
        assert_eq!(varint_len(value), len);
    }

    #[test]
    fn test_nine_byte_varint_uses_full_last_byte() {
        let bytes = [0xff; 9];
        assert_eq!(read_varint(&bytes), Some((u64::MAX, 9)));
    }

    #[test]
    fn test_truncated_varint() {
        assert_eq!(read_varint(&[0x81]), None);
        assert_eq!(read_varint(&[]), None);
    }

    #[test]
    fn test_fixed_width_reads() {
        assert_eq!(get2(&[0x12, 0x34, 0xff]), Some(0x1234));
        assert_eq!(get4(&[0xde, 0xad, 0xbe, 0xef]), Some(0xdead_beef));
        assert_eq!(get4(&[0xde, 0xad]), None);
    }

    proptest! {
        #[test]
        fn prop_varint_decodes_what_was_encoded(value in any::<u64>()) {
            let mut buf = Vec::new();
            write_varint(value, &mut buf);
            prop_assert_eq!(buf.len(), varint_len(value));
            prop_assert_eq!(read_varint(&buf), Some((value, buf.len())));
        }
    }
}
