//! Fixed-width big-endian base-256 cardinals.
//!
//! Values that do not fit the width are saturated to the column maximum.

/// Largest value a cardinal of `width` bytes can hold.
pub const fn max_value(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    }
}

/// Write `value` into `out`, most significant byte first.
pub fn encode_b256(value: u64, out: &mut [u8]) {
    let width = out.len();
    let value = value.min(max_value(width));
    for (i, byte) in out.iter_mut().enumerate() {
        let shift = 8 * (width - 1 - i);
        *byte = if shift >= 64 { 0 } else { (value >> shift) as u8 };
    }
}

/// Read a cardinal written by [`encode_b256`].
pub fn decode_b256(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut buf = [0u8; 2];
        encode_b256(0x1234, &mut buf);
        assert_eq!(buf, [0x12, 0x34]);
        assert_eq!(decode_b256(&buf), 0x1234);
    }

    #[test]
    fn test_saturation() {
        let mut one = [0u8; 1];
        encode_b256(300, &mut one);
        assert_eq!(one, [0xff]);

        let mut two = [0u8; 2];
        encode_b256(70_000, &mut two);
        assert_eq!(decode_b256(&two), 65_535);
    }

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(1), 255);
        assert_eq!(max_value(4), u32::MAX as u64);
        assert_eq!(max_value(8), u64::MAX);
    }

    #[test]
    fn test_wide_cardinal() {
        let mut buf = [0u8; 8];
        encode_b256(u64::MAX - 1, &mut buf);
        assert_eq!(decode_b256(&buf), u64::MAX - 1);
    }
}
