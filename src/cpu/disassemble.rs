//! Opcode to mnemonic text for both instruction sets. Branch targets are
//! printed absolute, relative to the address the opcode was fetched from.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;
use crate::error::CpuError;

use super::alu::{rotate_immediate, AluOperation, ShiftType};
use super::arm::{decode_arm, ArmInstructionKind};
use super::thumb::{
    decode_thumb, high_register, thumb_alu_operation, thumb_alu_shift_type,
    ThumbInstructionKind,
};
use super::{Cpu, InstructionCondition, InstructionSet, Register};

pub fn disassemble_arm(opcode: u32, address: u32) -> String {
    ArmDisassembly { opcode, address }.to_string()
}

pub fn disassemble_thumb(opcode: u16, address: u32) -> String {
    ThumbDisassembly { opcode, address }.to_string()
}

impl Cpu {
    /// Disassembles the instruction at `fetch_address()` in the current
    /// state. Both halves of a Thumb BL are read and shown as one branch.
    pub fn disassemble(&self, bus: &mut dyn Bus) -> Result<String, CpuError> {
        let address = self.fetch_address();

        match self.get_instruction_mode() {
            InstructionSet::Arm => Ok(disassemble_arm(bus.read_word(address)?, address)),
            InstructionSet::Thumb => {
                let opcode = bus.read_halfword(address)?;

                if is_long_branch_half(opcode, false) {
                    let second = bus.read_halfword(address.wrapping_add(2))?;
                    if is_long_branch_half(second, true) {
                        let target = long_branch_prefix_target(opcode, address)
                            .wrapping_add(u32::from(second.get_bit_range(0..=10)) << 1);
                        return Ok(format!("bl 0x{:08X}", target));
                    }
                }

                Ok(disassemble_thumb(opcode, address))
            }
        }
    }
}

fn is_long_branch_half(opcode: u16, low_half: bool) -> bool {
    decode_thumb(opcode) == ThumbInstructionKind::LongBranchLink && opcode.get_bit(11) == low_half
}

/// LR after the first half of a Thumb BL.
fn long_branch_prefix_target(opcode: u16, address: u32) -> u32 {
    let high_offset = opcode.get_bit_range(0..=10).sign_extend(11) << 12;
    address.wrapping_add(4).wrapping_add(high_offset)
}

fn immediate(value: u32) -> String {
    if value < 10 {
        format!("#{}", value)
    } else {
        format!("#0x{:X}", value)
    }
}

fn signed_immediate(add: bool, value: u32) -> String {
    let sign = if add { "" } else { "-" };
    if value < 10 {
        format!("#{}{}", sign, value)
    } else {
        format!("#{}0x{:X}", sign, value)
    }
}

fn immediate_shift(shift_type: ShiftType, amount: u32) -> String {
    match (shift_type, amount) {
        (ShiftType::Lsl, 0) => String::new(),
        (ShiftType::Ror, 0) => ", rrx".to_string(),
        (_, 0) => format!(", {} #32", shift_type),
        _ => format!(", {} #{}", shift_type, amount),
    }
}

/// Runs of three or more registers are collapsed into a range.
fn write_register_list(f: &mut Formatter<'_>, register_list: u16) -> FmtResult {
    f.write_str("{")?;

    let mut index = 0;
    let mut first = true;
    while index < 16 {
        if !register_list.get_bit(index) {
            index += 1;
            continue;
        }

        let start = Register::from_index(index as u32);
        while index < 16 && register_list.get_bit(index) {
            index += 1;
        }
        let end = Register::from_index(index as u32 - 1);

        if !first {
            f.write_str(", ")?;
        }
        first = false;

        match end.index() - start.index() {
            0 => write!(f, "{}", start)?,
            1 => write!(f, "{}, {}", start, end)?,
            _ => write!(f, "{}-{}", start, end)?,
        }
    }

    f.write_str("}")
}

struct ArmDisassembly {
    opcode: u32,
    address: u32,
}

impl ArmDisassembly {
    fn condition(&self) -> InstructionCondition {
        InstructionCondition::from_bits(self.opcode >> 28)
    }

    fn shifter_operand(&self) -> String {
        let opcode = self.opcode;

        if opcode.get_bit(25) {
            let (value, _) =
                rotate_immediate(opcode.get_bit_range(0..=7), opcode.get_bit_range(8..=11));
            return immediate(value);
        }

        let operand_register = opcode.get_register_at_offset(0);
        let shift_type = ShiftType::from_bits(opcode.get_bit_range(5..=6));

        if opcode.get_bit(4) {
            format!(
                "{}, {} {}",
                operand_register,
                shift_type,
                opcode.get_register_at_offset(8)
            )
        } else {
            format!(
                "{}{}",
                operand_register,
                immediate_shift(shift_type, opcode.get_bit_range(7..=11))
            )
        }
    }

    /// `None` for a zero immediate offset.
    fn write_address(&self, f: &mut Formatter<'_>, offset: Option<String>) -> FmtResult {
        let base_register = self.opcode.get_register_at_offset(16);
        let pre_index = self.opcode.get_bit(24);

        match (pre_index, offset) {
            (true, None) => write!(f, "[{}]", base_register)?,
            (true, Some(offset)) => write!(f, "[{}, {}]", base_register, offset)?,
            (false, None) => write!(f, "[{}], #0", base_register)?,
            (false, Some(offset)) => write!(f, "[{}], {}", base_register, offset)?,
        }

        if pre_index && self.opcode.get_bit(21) {
            f.write_str("!")?;
        }

        Ok(())
    }

    fn data_processing(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let operation = AluOperation::from_bits(opcode.get_bit_range(21..=24));
        let destination_register = opcode.get_register_at_offset(12);
        let first_operand_register = opcode.get_register_at_offset(16);
        // test operations always set flags and never take an s
        let set_string = if opcode.get_bit(20) && !operation.is_test() {
            "s"
        } else {
            ""
        };

        write!(f, "{}{}{} ", operation, set_string, self.condition())?;

        match operation {
            AluOperation::Tst | AluOperation::Teq | AluOperation::Cmp | AluOperation::Cmn => {
                write!(f, "{}, ", first_operand_register)?
            }
            AluOperation::Mov | AluOperation::Mvn => write!(f, "{}, ", destination_register)?,
            _ => write!(f, "{}, {}, ", destination_register, first_operand_register)?,
        }

        f.write_str(&self.shifter_operand())
    }

    fn psr_name(&self) -> &'static str {
        if self.opcode.get_bit(22) {
            "spsr"
        } else {
            "cpsr"
        }
    }

    fn mrs(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "mrs{} {}, {}",
            self.condition(),
            self.opcode.get_register_at_offset(12),
            self.psr_name()
        )
    }

    fn msr(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let fields: String = [(19, 'f'), (18, 's'), (17, 'x'), (16, 'c')]
            .iter()
            .filter(|(bit, _)| opcode.get_bit(*bit))
            .map(|(_, field)| *field)
            .collect();

        write!(f, "msr{} {}", self.condition(), self.psr_name())?;
        if !fields.is_empty() {
            write!(f, "_{}", fields)?;
        }

        if opcode.get_bit(25) {
            let (value, _) =
                rotate_immediate(opcode.get_bit_range(0..=7), opcode.get_bit_range(8..=11));
            write!(f, ", {}", immediate(value))
        } else {
            write!(f, ", {}", opcode.get_register_at_offset(0))
        }
    }

    fn multiply(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let set_string = if opcode.get_bit(20) { "s" } else { "" };
        let destination_register = opcode.get_register_at_offset(16);
        let multiplicand_register = opcode.get_register_at_offset(0);
        let multiplier_register = opcode.get_register_at_offset(8);

        if opcode.get_bit(21) {
            write!(
                f,
                "mla{}{} {}, {}, {}, {}",
                set_string,
                self.condition(),
                destination_register,
                multiplicand_register,
                multiplier_register,
                opcode.get_register_at_offset(12)
            )
        } else {
            write!(
                f,
                "mul{}{} {}, {}, {}",
                set_string,
                self.condition(),
                destination_register,
                multiplicand_register,
                multiplier_register
            )
        }
    }

    fn multiply_long(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let sign = if opcode.get_bit(22) { "s" } else { "u" };
        let operation = if opcode.get_bit(21) { "mlal" } else { "mull" };
        let set_string = if opcode.get_bit(20) { "s" } else { "" };

        write!(
            f,
            "{}{}{}{} {}, {}, {}, {}",
            sign,
            operation,
            set_string,
            self.condition(),
            opcode.get_register_at_offset(12),
            opcode.get_register_at_offset(16),
            opcode.get_register_at_offset(0),
            opcode.get_register_at_offset(8)
        )
    }

    fn single_data_swap(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let byte = if opcode.get_bit(22) { "b" } else { "" };

        write!(
            f,
            "swp{}{} {}, {}, [{}]",
            byte,
            self.condition(),
            opcode.get_register_at_offset(12),
            opcode.get_register_at_offset(0),
            opcode.get_register_at_offset(16)
        )
    }

    fn halfword_data_transfer(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let mnemonic = if opcode.get_bit(20) { "ldr" } else { "str" };
        let size = match opcode.get_bit_range(5..=6) {
            0b01 => "h",
            0b10 => "sb",
            _ => "sh",
        };
        let add = opcode.get_bit(23);

        let offset = if opcode.get_bit(22) {
            match (opcode.get_bit_range(8..=11) << 4) | opcode.get_bit_range(0..=3) {
                0 => None,
                value => Some(signed_immediate(add, value)),
            }
        } else {
            let sign = if add { "" } else { "-" };
            Some(format!("{}{}", sign, opcode.get_register_at_offset(0)))
        };

        write!(
            f,
            "{}{}{} {}, ",
            mnemonic,
            size,
            self.condition(),
            opcode.get_register_at_offset(12)
        )?;
        self.write_address(f, offset)
    }

    fn single_data_transfer(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let mnemonic = if opcode.get_bit(20) { "ldr" } else { "str" };
        let byte = if opcode.get_bit(22) { "b" } else { "" };
        // post-indexed with W set forces a user mode access
        let user = if !opcode.get_bit(24) && opcode.get_bit(21) {
            "t"
        } else {
            ""
        };
        let add = opcode.get_bit(23);

        let offset = if opcode.get_bit(25) {
            let sign = if add { "" } else { "-" };
            Some(format!(
                "{}{}{}",
                sign,
                opcode.get_register_at_offset(0),
                immediate_shift(
                    ShiftType::from_bits(opcode.get_bit_range(5..=6)),
                    opcode.get_bit_range(7..=11)
                )
            ))
        } else {
            match opcode.get_bit_range(0..=11) {
                0 => None,
                value => Some(signed_immediate(add, value)),
            }
        };

        write!(
            f,
            "{}{}{}{} {}, ",
            mnemonic,
            byte,
            user,
            self.condition(),
            opcode.get_register_at_offset(12)
        )?;
        self.write_address(f, offset)
    }

    fn block_data_transfer(&self, f: &mut Formatter<'_>) -> FmtResult {
        let opcode = self.opcode;
        let mnemonic = if opcode.get_bit(20) { "ldm" } else { "stm" };
        let addressing_mode = match (opcode.get_bit(23), opcode.get_bit(24)) {
            (true, false) => "ia",
            (true, true) => "ib",
            (false, false) => "da",
            (false, true) => "db",
        };

        write!(
            f,
            "{}{}{} {}",
            mnemonic,
            addressing_mode,
            self.condition(),
            opcode.get_register_at_offset(16)
        )?;
        if opcode.get_bit(21) {
            f.write_str("!")?;
        }
        f.write_str(", ")?;
        write_register_list(f, opcode.get_bit_range(0..=15) as u16)?;
        if opcode.get_bit(22) {
            f.write_str("^")?;
        }

        Ok(())
    }

    fn branch(&self, f: &mut Formatter<'_>) -> FmtResult {
        let link = if self.opcode.get_bit(24) { "l" } else { "" };
        let offset = (self.opcode.get_bit_range(0..=23) << 2).sign_extend(26);
        let target = self.address.wrapping_add(8).wrapping_add(offset);

        write!(f, "b{}{} 0x{:08X}", link, self.condition(), target)
    }
}

impl Display for ArmDisassembly {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match decode_arm(self.opcode) {
            ArmInstructionKind::DataProcessing => self.data_processing(f),
            ArmInstructionKind::Mrs => self.mrs(f),
            ArmInstructionKind::Msr => self.msr(f),
            ArmInstructionKind::Multiply => self.multiply(f),
            ArmInstructionKind::MultiplyLong => self.multiply_long(f),
            ArmInstructionKind::SingleDataSwap => self.single_data_swap(f),
            ArmInstructionKind::BranchExchange => write!(
                f,
                "bx{} {}",
                self.condition(),
                self.opcode.get_register_at_offset(0)
            ),
            ArmInstructionKind::HalfwordDataTransfer => self.halfword_data_transfer(f),
            ArmInstructionKind::SingleDataTransfer => self.single_data_transfer(f),
            ArmInstructionKind::BlockDataTransfer => self.block_data_transfer(f),
            ArmInstructionKind::Branch => self.branch(f),
            ArmInstructionKind::SoftwareInterrupt => write!(
                f,
                "swi{} {}",
                self.condition(),
                immediate(self.opcode.get_bit_range(0..=23))
            ),
            ArmInstructionKind::Undefined => write!(f, "undefined 0x{:08X}", self.opcode),
        }
    }
}

struct ThumbDisassembly {
    opcode: u16,
    address: u32,
}

impl ThumbDisassembly {
    fn field(&self, bit_range: std::ops::RangeInclusive<usize>) -> u32 {
        u32::from(self.opcode.get_bit_range(bit_range))
    }

    fn low_register(&self, offset: usize) -> Register {
        self.opcode.get_register_at_offset(offset)
    }

    fn load_store_mnemonic(&self) -> &'static str {
        if self.opcode.get_bit(11) {
            "ldr"
        } else {
            "str"
        }
    }

    fn move_shifted_register(&self, f: &mut Formatter<'_>) -> FmtResult {
        let shift_type = ShiftType::from_bits(self.field(11..=12));
        let amount = match (shift_type, self.field(6..=10)) {
            (ShiftType::Lsr | ShiftType::Asr, 0) => 32,
            (_, amount) => amount,
        };

        write!(
            f,
            "{} {}, {}, #{}",
            shift_type,
            self.low_register(0),
            self.low_register(3),
            amount
        )
    }

    fn add_subtract(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mnemonic = if self.opcode.get_bit(9) { "sub" } else { "add" };
        let second_operand = if self.opcode.get_bit(10) {
            immediate(self.field(6..=8))
        } else {
            self.low_register(6).to_string()
        };

        write!(
            f,
            "{} {}, {}, {}",
            mnemonic,
            self.low_register(0),
            self.low_register(3),
            second_operand
        )
    }

    fn immediate_operation(&self, f: &mut Formatter<'_>) -> FmtResult {
        let operation = match self.field(11..=12) {
            0b00 => AluOperation::Mov,
            0b01 => AluOperation::Cmp,
            0b10 => AluOperation::Add,
            _ => AluOperation::Sub,
        };

        write!(
            f,
            "{} {}, {}",
            operation,
            self.low_register(8),
            immediate(self.field(0..=7))
        )
    }

    fn alu_operation(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mnemonic = match self.field(6..=9) {
            0x2 | 0x3 | 0x4 | 0x7 => thumb_alu_shift_type(self.opcode).to_string(),
            0x9 => "neg".to_string(),
            0xD => "mul".to_string(),
            _ => thumb_alu_operation(self.opcode).to_string(),
        };

        write!(
            f,
            "{} {}, {}",
            mnemonic,
            self.low_register(0),
            self.low_register(3)
        )
    }

    fn high_register_operation(&self, f: &mut Formatter<'_>) -> FmtResult {
        let destination_register = high_register(self.opcode, 0, 7);
        let source_register = high_register(self.opcode, 3, 6);

        match self.field(8..=9) {
            0b00 => write!(f, "add {}, {}", destination_register, source_register),
            0b01 => write!(f, "cmp {}, {}", destination_register, source_register),
            0b10 => write!(f, "mov {}, {}", destination_register, source_register),
            _ => write!(f, "bx {}", source_register),
        }
    }

    fn register_offset(&self, f: &mut Formatter<'_>, mnemonic: &str) -> FmtResult {
        write!(
            f,
            "{} {}, [{}, {}]",
            mnemonic,
            self.low_register(0),
            self.low_register(3),
            self.low_register(6)
        )
    }

    fn load_store_register_offset(&self, f: &mut Formatter<'_>) -> FmtResult {
        let byte = if self.opcode.get_bit(10) { "b" } else { "" };
        let mnemonic = format!("{}{}", self.load_store_mnemonic(), byte);

        self.register_offset(f, &mnemonic)
    }

    fn load_store_sign_extended(&self, f: &mut Formatter<'_>) -> FmtResult {
        // bit 10 is S, bit 11 is H
        let mnemonic = match (self.opcode.get_bit(10), self.opcode.get_bit(11)) {
            (false, false) => "strh",
            (false, true) => "ldrh",
            (true, false) => "ldrsb",
            (true, true) => "ldrsh",
        };

        self.register_offset(f, mnemonic)
    }

    fn load_store_immediate_offset(&self, f: &mut Formatter<'_>) -> FmtResult {
        let (byte, offset) = if self.opcode.get_bit(12) {
            ("b", self.field(6..=10))
        } else {
            ("", self.field(6..=10) << 2)
        };

        write!(
            f,
            "{}{} {}, [{}, {}]",
            self.load_store_mnemonic(),
            byte,
            self.low_register(0),
            self.low_register(3),
            immediate(offset)
        )
    }

    fn load_store_halfword(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{}h {}, [{}, {}]",
            self.load_store_mnemonic(),
            self.low_register(0),
            self.low_register(3),
            immediate(self.field(6..=10) << 1)
        )
    }

    fn push_pop(&self, f: &mut Formatter<'_>) -> FmtResult {
        let extra_register = self.opcode.get_bit(8);
        let register_list = self.opcode.get_bit_range(0..=7);

        if self.opcode.get_bit(11) {
            f.write_str("pop ")?;
            write_register_list(
                f,
                register_list.set_bit(Register::R15.index(), extra_register),
            )
        } else {
            f.write_str("push ")?;
            write_register_list(
                f,
                register_list.set_bit(Register::R14.index(), extra_register),
            )
        }
    }

    fn branch_target(&self, offset: u32) -> u32 {
        self.address.wrapping_add(4).wrapping_add(offset)
    }

    fn long_branch_link(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.opcode.get_bit(11) {
            write!(f, "bl_2 {}", immediate(self.field(0..=10) << 1))
        } else {
            write!(
                f,
                "bl_1 0x{:08X}",
                long_branch_prefix_target(self.opcode, self.address)
            )
        }
    }
}

impl Display for ThumbDisassembly {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match decode_thumb(self.opcode) {
            ThumbInstructionKind::MoveShiftedRegister => self.move_shifted_register(f),
            ThumbInstructionKind::AddSubtract => self.add_subtract(f),
            ThumbInstructionKind::ImmediateOperation => self.immediate_operation(f),
            ThumbInstructionKind::AluOperation => self.alu_operation(f),
            ThumbInstructionKind::HighRegisterOperation => self.high_register_operation(f),
            ThumbInstructionKind::PcRelativeLoad => write!(
                f,
                "ldr {}, [pc, {}]",
                self.low_register(8),
                immediate(self.field(0..=7) << 2)
            ),
            ThumbInstructionKind::LoadStoreRegisterOffset => self.load_store_register_offset(f),
            ThumbInstructionKind::LoadStoreSignExtended => self.load_store_sign_extended(f),
            ThumbInstructionKind::LoadStoreImmediateOffset => {
                self.load_store_immediate_offset(f)
            }
            ThumbInstructionKind::LoadStoreHalfword => self.load_store_halfword(f),
            ThumbInstructionKind::SpRelativeLoadStore => write!(
                f,
                "{} {}, [sp, {}]",
                self.load_store_mnemonic(),
                self.low_register(8),
                immediate(self.field(0..=7) << 2)
            ),
            ThumbInstructionKind::LoadAddress => {
                let base = if self.opcode.get_bit(11) { "sp" } else { "pc" };
                write!(
                    f,
                    "add {}, {}, {}",
                    self.low_register(8),
                    base,
                    immediate(self.field(0..=7) << 2)
                )
            }
            ThumbInstructionKind::AddOffsetToStackPointer => write!(
                f,
                "add sp, {}",
                signed_immediate(!self.opcode.get_bit(7), self.field(0..=6) << 2)
            ),
            ThumbInstructionKind::PushPop => self.push_pop(f),
            ThumbInstructionKind::MultipleLoadStore => {
                let mnemonic = if self.opcode.get_bit(11) {
                    "ldmia"
                } else {
                    "stmia"
                };
                write!(f, "{} {}!, ", mnemonic, self.low_register(8))?;
                write_register_list(f, self.opcode.get_bit_range(0..=7))
            }
            ThumbInstructionKind::ConditionalBranch => {
                let condition = InstructionCondition::from_bits(self.field(8..=11));
                let offset = (self.field(0..=7) << 1).sign_extend(9);
                write!(f, "b{} 0x{:08X}", condition, self.branch_target(offset))
            }
            ThumbInstructionKind::SoftwareInterrupt => {
                write!(f, "swi {}", immediate(self.field(0..=7)))
            }
            ThumbInstructionKind::UnconditionalBranch => {
                let offset = (self.field(0..=10) << 1).sign_extend(12);
                write!(f, "b 0x{:08X}", self.branch_target(offset))
            }
            ThumbInstructionKind::LongBranchLink => self.long_branch_link(f),
            ThumbInstructionKind::Undefined => write!(f, "undefined 0x{:04X}", self.opcode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpuConfig;
    use crate::testing::RamBus;

    #[test]
    fn arm_data_processing() {
        let cases = [
            (0xE3A0_0000, "mov r0, #0"),
            (0xE251_1001, "subs r1, r1, #1"),
            (0xE080_0001, "add r0, r0, r1"),
            (0x0290_0001, "addseq r0, r0, #1"),
            (0xE350_0010, "cmp r0, #0x10"),
            (0xE1A0_0311, "mov r0, r1, lsl r3"),
            (0xE1A0_0061, "mov r0, r1, rrx"),
            (0xE1A0_0021, "mov r0, r1, lsr #32"),
            (0xE1E0_1102, "mvn r1, r2, lsl #2"),
        ];

        for (opcode, text) in cases {
            assert_eq!(disassemble_arm(opcode, 0), text, "0x{opcode:08X}");
        }
    }

    #[test]
    fn arm_transfers() {
        let cases = [
            (0xE591_0004, "ldr r0, [r1, #4]"),
            (0xE591_0000, "ldr r0, [r1]"),
            (0xE48F_0004, "str r0, [pc], #4"),
            (0xE773_2104, "ldrb r2, [r3, -r4, lsl #2]!"),
            (0xE4B1_0004, "ldrt r0, [r1], #4"),
            (0xE1D1_00B2, "ldrh r0, [r1, #2]"),
            (0xE111_00D2, "ldrsb r0, [r1, -r2]"),
            (0xE92D_40F0, "stmdb sp!, {r4-r7, lr}"),
            (0xE8F0_8004, "ldmia r0!, {r2, pc}^"),
            (0xE890_0003, "ldmia r0, {r0, r1}"),
            (0xE142_0091, "swpb r0, r1, [r2]"),
        ];

        for (opcode, text) in cases {
            assert_eq!(disassemble_arm(opcode, 0), text, "0x{opcode:08X}");
        }
    }

    #[test]
    fn arm_control_and_psr() {
        let cases = [
            (0x1AFF_FFFC, 0x10, "bne 0x00000008"),
            (0xEB00_0002, 0x100, "bl 0x00000110"),
            (0xE12F_FF10, 0, "bx r0"),
            (0xEF00_0012, 0, "swi #0x12"),
            (0xE14F_0000, 0, "mrs r0, spsr"),
            (0xE129_F000, 0, "msr cpsr_fc, r0"),
            (0xE328_F20F, 0, "msr cpsr_f, #0xF0000000"),
            (0xE020_3291, 0, "mla r0, r1, r2, r3"),
            (0xE0D1_0392, 0, "smulls r0, r1, r2, r3"),
            (0xE600_0010, 0, "undefined 0xE6000010"),
        ];

        for (opcode, address, text) in cases {
            assert_eq!(disassemble_arm(opcode, address), text, "0x{opcode:08X}");
        }
    }

    #[test]
    fn thumb_formats() {
        let cases = [
            (0x0088, 0, "lsl r0, r1, #2"),
            (0x0808, 0, "lsr r0, r1, #32"),
            (0x1888, 0, "add r0, r1, r2"),
            (0x1E48, 0, "sub r0, r1, #1"),
            (0x2120, 0, "mov r1, #0x20"),
            (0x4248, 0, "neg r0, r1"),
            (0x4348, 0, "mul r0, r1"),
            (0x4088, 0, "lsl r0, r1"),
            (0x4388, 0, "bic r0, r1"),
            (0x4708, 0, "bx r1"),
            (0x4685, 0, "mov sp, r0"),
            (0x4801, 0x100, "ldr r0, [pc, #4]"),
            (0x5888, 0, "ldr r0, [r1, r2]"),
            (0x5E88, 0, "ldrsh r0, [r1, r2]"),
            (0x6848, 0, "ldr r0, [r1, #4]"),
            (0x8848, 0, "ldrh r0, [r1, #2]"),
            (0x9001, 0, "str r0, [sp, #4]"),
            (0xA801, 0, "add r0, sp, #4"),
            (0xB082, 0, "add sp, #-8"),
            (0xB5F0, 0, "push {r4-r7, lr}"),
            (0xBD01, 0, "pop {r0, pc}"),
            (0xC806, 0, "ldmia r0!, {r1, r2}"),
            (0xD0FE, 0x200, "beq 0x00000200"),
            (0xDF12, 0, "swi #0x12"),
            (0xE7FE, 0x300, "b 0x00000300"),
            (0xF000, 0x100, "bl_1 0x00000104"),
            (0xF804, 0x102, "bl_2 #8"),
            (0xB100, 0, "undefined 0xB100"),
        ];

        for (opcode, address, text) in cases {
            assert_eq!(disassemble_thumb(opcode, address), text, "0x{opcode:04X}");
        }
    }

    #[test]
    fn cpu_joins_both_halves_of_long_branch() {
        let mut bus = RamBus::new();
        bus.load_halfwords(0x100, &[0xF000, 0xF804]);
        let mut config = CpuConfig::direct_boot(0x100);
        config.state = InstructionSet::Thumb;
        let cpu = Cpu::from_config(&config);

        assert_eq!(cpu.disassemble(&mut bus).unwrap(), "bl 0x0000010C");
    }

    #[test]
    fn cpu_disassembles_at_fetch_address() {
        let mut bus = RamBus::new();
        bus.load_words(0x20, &[0xEAFF_FFFE]);
        let cpu = Cpu::from_config(&CpuConfig::direct_boot(0x20));

        assert_eq!(cpu.disassemble(&mut bus).unwrap(), "b 0x00000020");
    }
}
