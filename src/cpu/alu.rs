//! Barrel shifter and the arithmetic behind the 16 data-processing
//! operations. Everything here is pure; flag updates happen in `Cpu`.

use std::fmt::Display;

use crate::bit_manipulation::BitManipulation;

use super::Cpu;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftType {
    /// Only the low 2 bits of `bits` are significant.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }

    /// Shift by a 5-bit immediate. An amount of 0 selects LSR #32, ASR #32
    /// and RRX for the right shifts and rotate.
    pub(crate) fn shift_by_immediate(self, value: u32, amount: u32, carry: bool) -> (u32, Option<bool>) {
        let amount = amount & 0b1_1111;

        match (self, amount) {
            (Self::Lsl, 0) => (value, None),
            (Self::Lsl, _) => (value << amount, Some(value.get_bit(32 - amount as usize))),
            (Self::Lsr, 0) => (0, Some(value.get_bit(31))),
            (Self::Lsr, _) => (value >> amount, Some(value.get_bit(amount as usize - 1))),
            (Self::Asr, 0) => (Self::sign_fill(value), Some(value.get_bit(31))),
            (Self::Asr, _) => (
                ((value as i32) >> amount) as u32,
                Some(value.get_bit(amount as usize - 1)),
            ),
            // RRX
            (Self::Ror, 0) => (
                (value >> 1).set_bit(31, carry),
                Some(value.get_bit(0)),
            ),
            (Self::Ror, _) => (
                value.rotate_right(amount),
                Some(value.get_bit(amount as usize - 1)),
            ),
        }
    }

    /// Shift by the bottom byte of a register.
    pub(crate) fn shift_by_register(self, value: u32, amount: u32) -> (u32, Option<bool>) {
        let amount = amount & 0xFF;

        if amount == 0 {
            return (value, None);
        }

        match self {
            Self::Lsl => match amount {
                1..=31 => (value << amount, Some(value.get_bit(32 - amount as usize))),
                32 => (0, Some(value.get_bit(0))),
                _ => (0, Some(false)),
            },
            Self::Lsr => match amount {
                1..=31 => (value >> amount, Some(value.get_bit(amount as usize - 1))),
                32 => (0, Some(value.get_bit(31))),
                _ => (0, Some(false)),
            },
            Self::Asr => match amount {
                1..=31 => (
                    ((value as i32) >> amount) as u32,
                    Some(value.get_bit(amount as usize - 1)),
                ),
                _ => (Self::sign_fill(value), Some(value.get_bit(31))),
            },
            Self::Ror => match amount % 32 {
                0 => (value, Some(value.get_bit(31))),
                rotate => (
                    value.rotate_right(rotate),
                    Some(value.get_bit(rotate as usize - 1)),
                ),
            },
        }
    }

    fn sign_fill(value: u32) -> u32 {
        if value.get_bit(31) {
            u32::MAX
        } else {
            0
        }
    }
}

impl Display for ShiftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShiftType::Lsl => f.write_str("lsl"),
            ShiftType::Lsr => f.write_str("lsr"),
            ShiftType::Asr => f.write_str("asr"),
            ShiftType::Ror => f.write_str("ror"),
        }
    }
}

/// 8-bit immediate rotated right by twice the 4-bit rotate field.
pub(crate) fn rotate_immediate(immediate: u32, rotate: u32) -> (u32, Option<bool>) {
    let amount = (rotate & 0b1111) * 2;
    let value = (immediate & 0xFF).rotate_right(amount);

    if amount == 0 {
        (value, None)
    } else {
        (value, Some(value.get_bit(31)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOperation {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl AluOperation {
    /// Only the low 4 bits of `bits` are significant.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b1111 {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Sub,
            0x3 => Self::Rsb,
            0x4 => Self::Add,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Rsc,
            0x8 => Self::Tst,
            0x9 => Self::Teq,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mov,
            0xE => Self::Bic,
            _ => Self::Mvn,
        }
    }

    /// Operations that only set flags.
    pub fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    pub(crate) fn evaluate(
        self,
        first_operand: u32,
        second_operand: u32,
        shifter_carry: Option<bool>,
        carry_flag: bool,
    ) -> AluOutput {
        let logical = |value| AluOutput {
            value,
            carry: shifter_carry,
            overflow: None,
        };

        match self {
            Self::And | Self::Tst => logical(first_operand & second_operand),
            Self::Eor | Self::Teq => logical(first_operand ^ second_operand),
            Self::Orr => logical(first_operand | second_operand),
            Self::Mov => logical(second_operand),
            Self::Bic => logical(first_operand & !second_operand),
            Self::Mvn => logical(!second_operand),
            Self::Sub | Self::Cmp => subtract_with_carry(first_operand, second_operand, true),
            Self::Rsb => subtract_with_carry(second_operand, first_operand, true),
            Self::Add | Self::Cmn => add_with_carry(first_operand, second_operand, false),
            Self::Adc => add_with_carry(first_operand, second_operand, carry_flag),
            Self::Sbc => subtract_with_carry(first_operand, second_operand, carry_flag),
            Self::Rsc => subtract_with_carry(second_operand, first_operand, carry_flag),
        }
    }
}

impl Display for AluOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mnemonic = match self {
            Self::And => "and",
            Self::Eor => "eor",
            Self::Sub => "sub",
            Self::Rsb => "rsb",
            Self::Add => "add",
            Self::Adc => "adc",
            Self::Sbc => "sbc",
            Self::Rsc => "rsc",
            Self::Tst => "tst",
            Self::Teq => "teq",
            Self::Cmp => "cmp",
            Self::Cmn => "cmn",
            Self::Orr => "orr",
            Self::Mov => "mov",
            Self::Bic => "bic",
            Self::Mvn => "mvn",
        };

        f.write_str(mnemonic)
    }
}

/// Result of an ALU operation. `None` leaves the matching flag untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AluOutput {
    pub value: u32,
    pub carry: Option<bool>,
    pub overflow: Option<bool>,
}

/// `a + b + carry_in`, carry is the unsigned carry-out.
pub(crate) fn add_with_carry(a: u32, b: u32, carry_in: bool) -> AluOutput {
    let value = a.wrapping_add(b).wrapping_add(u32::from(carry_in));
    let carry = if carry_in { a >= value } else { a > value };
    let overflow = ((a ^ value) & (b ^ value)).get_bit(31);

    AluOutput {
        value,
        carry: Some(carry),
        overflow: Some(overflow),
    }
}

/// `a - b - !carry_in`, carry is NOT borrow.
pub(crate) fn subtract_with_carry(a: u32, b: u32, carry_in: bool) -> AluOutput {
    let value = a.wrapping_sub(b).wrapping_sub(u32::from(!carry_in));
    let carry = if carry_in { a >= b } else { a > b };
    let overflow = ((a ^ b) & (a ^ value)).get_bit(31);

    AluOutput {
        value,
        carry: Some(carry),
        overflow: Some(overflow),
    }
}

impl Cpu {
    pub(crate) fn set_alu_flags(&mut self, output: AluOutput) {
        self.set_sign_and_zero_flags(output.value);

        if let Some(carry) = output.carry {
            self.set_carry_flag(carry);
        }

        if let Some(overflow) = output.overflow {
            self.set_overflow_flag(overflow);
        }
    }
}
