use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;

use super::{Cpu, Register};

/// Internal cycles (m) the multiplier array needs for `multiplier`.
///
/// The array terminates early once the remaining high bits are all zero,
/// or all one for signed multiplies.
pub(crate) fn multiplier_cycles(multiplier: u32, signed: bool) -> u32 {
    let terminates = |mask: u32| {
        let high_bits = multiplier & mask;
        high_bits == 0 || (signed && high_bits == mask)
    };

    if terminates(0xFFFF_FF00) {
        1
    } else if terminates(0xFFFF_0000) {
        2
    } else if terminates(0xFF00_0000) {
        3
    } else {
        4
    }
}

/// Operands of a 64-bit multiply.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LongMultiply {
    pub destination_high: Register,
    pub destination_low: Register,
    pub multiplicand: u32,
    pub multiplier: u32,
    pub signed: bool,
    pub accumulate: bool,
    pub set_conditions: bool,
}

impl Cpu {
    /// MUL/MLA. Carry is left cleared since the architecture defines no
    /// meaningful value for it.
    pub(crate) fn execute_multiply(
        &mut self,
        bus: &mut dyn Bus,
        destination_register: Register,
        multiplicand: u32,
        multiplier: u32,
        accumulate: Option<u32>,
        set_conditions: bool,
    ) {
        let product = multiplicand.wrapping_mul(multiplier);
        let result = match accumulate {
            Some(addend) => product.wrapping_add(addend),
            None => product,
        };

        let internal_cycles =
            multiplier_cycles(multiplier, true) + u32::from(accumulate.is_some());
        bus.charge_cycles(internal_cycles);

        self.write_register(result, destination_register);

        if set_conditions {
            self.set_sign_and_zero_flags(result);
            self.set_carry_flag(false);
        }
    }

    /// UMULL/UMLAL/SMULL/SMLAL.
    pub(crate) fn execute_multiply_long(&mut self, bus: &mut dyn Bus, operation: LongMultiply) {
        let product = if operation.signed {
            (i64::from(operation.multiplicand as i32) * i64::from(operation.multiplier as i32))
                as u64
        } else {
            u64::from(operation.multiplicand) * u64::from(operation.multiplier)
        };

        let result = if operation.accumulate {
            let high = self.read_register(operation.destination_high, |pc| pc);
            let low = self.read_register(operation.destination_low, |pc| pc);
            product.wrapping_add((u64::from(high) << 32) | u64::from(low))
        } else {
            product
        };

        let internal_cycles = multiplier_cycles(operation.multiplier, operation.signed)
            + 1
            + u32::from(operation.accumulate);
        bus.charge_cycles(internal_cycles);

        self.write_register(result as u32, operation.destination_low);
        self.write_register((result >> 32) as u32, operation.destination_high);

        if operation.set_conditions {
            self.set_sign_flag((result >> 63) != 0);
            self.set_zero_flag(result == 0);
            self.set_carry_flag(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_tiers() {
        assert_eq!(multiplier_cycles(1, false), 1);
        assert_eq!(multiplier_cycles(0xFF, false), 1);
        assert_eq!(multiplier_cycles(0x100, false), 2);
        assert_eq!(multiplier_cycles(0xFFFF, false), 2);
        assert_eq!(multiplier_cycles(0x0001_0000, false), 3);
        assert_eq!(multiplier_cycles(0x00FF_FFFF, false), 3);
        assert_eq!(multiplier_cycles(0x1234_5678, false), 4);
        assert_eq!(multiplier_cycles(0x1234_5678, true), 4);
    }

    #[test]
    fn signed_tiers_accept_leading_ones() {
        assert_eq!(multiplier_cycles(0xFFFF_FFFF, true), 1);
        assert_eq!(multiplier_cycles(0xFFFF_FFFF, false), 4);
        assert_eq!(multiplier_cycles(0xFFFF_8000, true), 2);
        assert_eq!(multiplier_cycles(0xFF80_0000, true), 3);
    }
}
