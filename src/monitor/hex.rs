//! ASCII hex fields, as used by the checksummed upload protocol.
//!
//! Digits are decoded leniently: anything up to `'9'` is taken relative to
//! `'0'` and anything above relative to `'A'`, keeping the low four bits.
//! Lowercase letters therefore decode to garbage, as on the host side.

/// The running checksum of an upload: the 8-bit sum of every byte received.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Checksum(u8);

impl Checksum {
    /// Start from zero.
    pub const fn new() -> Checksum {
        Checksum(0)
    }

    /// Add a byte to the sum.
    pub fn add(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(byte);
    }

    /// The sum so far.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// What the monitor sends back: the one's complement of the sum.
    pub fn complement(&self) -> u8 {
        !self.0
    }
}

/// The value of one hex digit.
pub fn nibble(c: u8) -> u8 {
    if c <= b'9' {
        c.wrapping_sub(b'0') & 0xF
    } else {
        c.wrapping_sub(b'A').wrapping_add(0xA) & 0xF
    }
}

/// Decode a field of hex digits, most significant first.
///
/// Every time a whole byte has been shifted in, the low byte of the value so
/// far is added to `checksum`. For fields of an even number of digits that
/// is the sum of the field's bytes.
pub fn decode(digits: &[u8], checksum: &mut Checksum) -> u32 {
    let mut value = 0u32;
    for (i, &c) in digits.iter().enumerate() {
        value = (value << 4) | u32::from(nibble(c));
        if i & 1 == 1 {
            checksum.add(value as u8);
        }
    }
    value
}

/// Encode the low `out.len()` nibbles of `value` as uppercase hex.
pub fn encode(value: u32, out: &mut [u8]) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let len = out.len();
    for (i, o) in out.iter_mut().enumerate() {
        let shift = 4 * (len - 1 - i);
        let n = if shift < 32 { (value >> shift) & 0xF } else { 0 };
        *o = DIGITS[n as usize];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digits() {
        assert_eq!(nibble(b'0'), 0);
        assert_eq!(nibble(b'9'), 9);
        assert_eq!(nibble(b'A'), 10);
        assert_eq!(nibble(b'F'), 15);
    }

    #[test]
    fn field_checksum_is_byte_sum() {
        let mut checksum = Checksum::new();
        assert_eq!(decode(b"40001000", &mut checksum), 0x4000_1000);
        assert_eq!(checksum.value(), 0x40 + 0x10);
        assert_eq!(decode(b"FF", &mut checksum), 0xFF);
        assert_eq!(checksum.value(), 0x4F);
        assert_eq!(checksum.complement(), 0xB0);
    }

    #[test]
    fn encode_is_uppercase_and_zero_padded() {
        let mut out = [0u8; 8];
        encode(0x00AB_12CD, &mut out);
        assert_eq!(&out, b"00AB12CD");
        let mut out = [0u8; 2];
        encode(0x1F3, &mut out);
        assert_eq!(&out, b"F3");
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
