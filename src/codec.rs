/// Byte-order and bit-packing codecs
///
/// Every conversion here is expressed relative to "big-endian on the wire".
/// The host byte order is resolved once at compile time ([`HOST_ENDIANNESS`])
/// and passed explicitly to the conversions that need it.

use serde::{Deserialize, Serialize};

/// Byte order of a 16-bit word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    /// The opposite byte order
    pub fn swapped(self) -> Self {
        match self {
            Endianness::Big => Endianness::Little,
            Endianness::Little => Endianness::Big,
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        NETWORK_ENDIANNESS
    }
}

/// Byte order of the machine running the slave
pub const HOST_ENDIANNESS: Endianness = if cfg!(target_endian = "big") {
    Endianness::Big
} else {
    Endianness::Little
};

/// Modbus always transmits address, quantity and register fields big-endian
pub const NETWORK_ENDIANNESS: Endianness = Endianness::Big;

/// Swap the two bytes of a 16-bit word
pub fn byte_swap(value: u16) -> u16 {
    value.rotate_left(8)
}

/// Combine a high and a low byte into a 16-bit value
pub fn combine_bytes(high: u8, low: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}

/// Split a 16-bit value into two bytes laid out in `order`
pub fn split_bytes(value: u16, order: Endianness) -> [u8; 2] {
    let value = if order == HOST_ENDIANNESS { value } else { byte_swap(value) };
    value.to_ne_bytes()
}

/// Decode two bytes laid out in `order` into a 16-bit value
///
/// The bytes are copied raw into a host word and swapped only when `order`
/// differs from the host byte order.
pub fn decode_word(bytes: [u8; 2], order: Endianness) -> u16 {
    let raw = u16::from_ne_bytes(bytes);
    if order == HOST_ENDIANNESS { raw } else { byte_swap(raw) }
}

/// Combine two 16-bit words into a 32-bit value, high word first
pub fn combine_words(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Split a 32-bit value into `[high, low]` 16-bit words
pub fn split_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

/// Pack up to 8 booleans into one byte, LSB first
///
/// Bit `i` of the result is `bits[i]` for `i < min(limit, 8, bits.len())`;
/// every other bit is zero.
pub fn compress_booleans(bits: &[bool], limit: usize) -> u8 {
    bits.iter()
        .take(limit.min(8))
        .enumerate()
        .filter(|&(_, &bit)| bit)
        .fold(0u8, |byte, (i, _)| byte | (1 << i))
}

/// Unpack one byte into 8 booleans, LSB first
pub fn decompress_booleans(byte: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = byte & (1 << i) != 0;
    }
    bits
}

/// Number of bytes needed to carry `count` packed bits
pub fn packed_len(count: usize) -> usize {
    count / 8 + usize::from(count % 8 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_split() {
        assert_eq!(combine_bytes(0x12, 0x34), 0x1234);
        assert_eq!(split_bytes(0x1234, Endianness::Big), [0x12, 0x34]);
        assert_eq!(split_bytes(0x1234, Endianness::Little), [0x34, 0x12]);
        assert_eq!(byte_swap(0x1234), 0x3412);
        assert_eq!(byte_swap(byte_swap(0xBEEF)), 0xBEEF);
    }

    #[test]
    fn test_decode_word_matches_std() {
        for value in [0x0000u16, 0x0001, 0x00FF, 0x1234, 0xFF00, 0xFFFF] {
            assert_eq!(decode_word(value.to_be_bytes(), Endianness::Big), value);
            assert_eq!(decode_word(value.to_le_bytes(), Endianness::Little), value);
            assert_eq!(decode_word(split_bytes(value, Endianness::Big), Endianness::Big), value);
        }
    }

    #[test]
    fn test_host_endianness() {
        let probe = 1u16.to_ne_bytes();
        let expected = if probe[0] == 1 { Endianness::Little } else { Endianness::Big };
        assert_eq!(HOST_ENDIANNESS, expected);
        assert_eq!(Endianness::Big.swapped(), Endianness::Little);
    }

    #[test]
    fn test_words() {
        assert_eq!(combine_words(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(split_words(0x1234_5678), [0x1234, 0x5678]);
        let [high, low] = split_words(2.5f32.to_bits());
        assert_eq!(f32::from_bits(combine_words(high, low)), 2.5);
    }

    #[test]
    fn test_compress_booleans() {
        let bits = [true, false, true, true, false, false, false, true];
        assert_eq!(compress_booleans(&bits, 8), 0b1000_1101);
        assert_eq!(decompress_booleans(0b1000_1101), bits);

        // Bits past the limit stay clear
        assert_eq!(compress_booleans(&bits, 3), 0b0000_0101);
        assert_eq!(compress_booleans(&[true; 8], 0), 0);
        assert_eq!(compress_booleans(&[true; 3], 8), 0b0000_0111);
    }

    #[test]
    fn test_decompress_every_byte() {
        for byte in 0..=u8::MAX {
            let bits = decompress_booleans(byte);
            assert_eq!(compress_booleans(&bits, 8), byte);
            for limit in 0..8 {
                let packed = compress_booleans(&bits, limit);
                assert_eq!(packed >> limit, 0);
                assert_eq!(packed, byte & ((1u16 << limit) - 1) as u8);
            }
        }
    }

    #[test]
    fn test_decompress_sequence() {
        let compressed = [0b0000_0010u8, 0b0100_0000, 0b0000_0000];
        let values: Vec<bool> = compressed.iter()
            .flat_map(|&byte| decompress_booleans(byte))
            .collect();
        assert!(!values[0]);
        assert!(values[1]);
        assert!(!values[2]);
        assert!(!values[13]);
        assert!(values[14]);
        assert!(!values[15]);
    }

    #[test]
    fn test_packed_len() {
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(1), 1);
        assert_eq!(packed_len(8), 1);
        assert_eq!(packed_len(9), 2);
        assert_eq!(packed_len(88), 11);
    }
}
