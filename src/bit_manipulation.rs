use std::ops::RangeInclusive;

use crate::cpu::Register;

pub trait BitManipulation: Sized {
    fn get_bit(self, offset: usize) -> bool;

    fn set_bit(self, offset: usize, set: bool) -> Self;

    fn get_bit_range(self, bit_range: RangeInclusive<usize>) -> Self;

    fn set_bit_range(self, value: Self, bit_range: RangeInclusive<usize>) -> Self;

    /// Reads the register index field starting at `offset`.
    ///
    /// ARM fields are 4 bits wide, Thumb fields 3 bits wide.
    fn get_register_at_offset(self, offset: usize) -> Register;

    /// Sign extends the low `width` bits to a full 32-bit value.
    fn sign_extend(self, width: u32) -> u32;
}

macro_rules! impl_bit_manipulation {
    ($type:ty, $register_field_mask:expr) => {
        impl BitManipulation for $type {
            fn get_bit(self, offset: usize) -> bool {
                let mask = 1 << offset;
                (self & mask) == mask
            }

            fn set_bit(self, offset: usize, set: bool) -> Self {
                let mask = 1 << offset;
                if set {
                    self | mask
                } else {
                    self & !mask
                }
            }

            fn get_bit_range(self, bit_range: RangeInclusive<usize>) -> Self {
                if bit_range.is_empty() {
                    return 0;
                }

                let shift = *bit_range.start();
                let num_ones = (bit_range.end() - bit_range.start() + 1) as u32;
                let mask = (<$type>::MAX >> (<$type>::BITS - num_ones)) << shift;
                (self & mask) >> shift
            }

            fn set_bit_range(self, value: Self, bit_range: RangeInclusive<usize>) -> Self {
                if bit_range.is_empty() {
                    return self;
                }

                let shift = *bit_range.start();
                let num_ones = (bit_range.end() - bit_range.start() + 1) as u32;
                let mask = (<$type>::MAX >> (<$type>::BITS - num_ones)) << shift;
                ((value << shift) & mask) | (self & !mask)
            }

            fn get_register_at_offset(self, offset: usize) -> Register {
                let register_index = (self >> offset) & $register_field_mask;
                Register::from_index(u32::from(register_index))
            }

            fn sign_extend(self, width: u32) -> u32 {
                let shift = 32 - width;
                ((u32::from(self) << shift) as i32 >> shift) as u32
            }
        }
    };
}

impl_bit_manipulation!(u32, 0b1111);
impl_bit_manipulation!(u16, 0b111);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ranges() {
        assert_eq!(0xABCD_1234u32.get_bit_range(16..=23), 0xCD);
        assert_eq!(0xABCD_1234u32.get_bit_range(0..=31), 0xABCD_1234);
        assert_eq!(0u32.set_bit_range(0b10011, 0..=4), 0b10011);
        assert_eq!(0xFFFF_FFFFu32.set_bit_range(0, 28..=31), 0x0FFF_FFFF);
        assert_eq!(0xF0u16.get_bit_range(4..=7), 0xF);
    }

    #[test]
    fn single_bits() {
        assert!(0x8000_0000u32.get_bit(31));
        assert!(!0x8000_0000u32.get_bit(30));
        assert_eq!(0u32.set_bit(5, true), 0x20);
        assert_eq!(0x20u32.set_bit(5, false), 0);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(0x00FF_FFFFu32.sign_extend(24), 0xFFFF_FFFF);
        assert_eq!(0x007F_FFFFu32.sign_extend(24), 0x007F_FFFF);
        assert_eq!(0x80u16.sign_extend(8), 0xFFFF_FF80);
        assert_eq!(0x400u16.sign_extend(11), 0xFFFF_FC00);
    }

    #[test]
    fn register_fields() {
        assert_eq!(0x0000_F000u32.get_register_at_offset(12), Register::R15);
        assert_eq!(0b0000_0000_0011_1000u16.get_register_at_offset(3), Register::R7);
    }
}
