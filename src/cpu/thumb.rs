use std::fmt::Display;

use lazy_static::lazy_static;

use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;
use crate::error::CpuError;

use super::alu::{add_with_carry, subtract_with_carry, AluOperation, AluOutput, ShiftType};
use super::transfer::{
    BlockDataTransfer, OffsetModifierType, SingleDataMemoryAccessSize, SingleDataTransfer,
    SingleDataTransferIndexType,
};
use super::{Cpu, ExceptionType, InstructionCondition, Register};

pub type ThumbHandler = fn(&mut Cpu, &mut dyn Bus, u16) -> Result<(), CpuError>;

/// The 19 Thumb formats, selected by the high byte of the opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThumbInstructionKind {
    MoveShiftedRegister,
    AddSubtract,
    ImmediateOperation,
    AluOperation,
    HighRegisterOperation,
    PcRelativeLoad,
    LoadStoreRegisterOffset,
    LoadStoreSignExtended,
    LoadStoreImmediateOffset,
    LoadStoreHalfword,
    SpRelativeLoadStore,
    LoadAddress,
    AddOffsetToStackPointer,
    PushPop,
    MultipleLoadStore,
    ConditionalBranch,
    SoftwareInterrupt,
    UnconditionalBranch,
    LongBranchLink,
    Undefined,
}

impl ThumbInstructionKind {
    pub fn from_high_byte(high_byte: u8) -> Self {
        match high_byte {
            0x00..=0x17 => Self::MoveShiftedRegister,
            0x18..=0x1F => Self::AddSubtract,
            0x20..=0x3F => Self::ImmediateOperation,
            0x40..=0x43 => Self::AluOperation,
            0x44..=0x47 => Self::HighRegisterOperation,
            0x48..=0x4F => Self::PcRelativeLoad,
            0x50..=0x5F => {
                if high_byte & 0b10 == 0 {
                    Self::LoadStoreRegisterOffset
                } else {
                    Self::LoadStoreSignExtended
                }
            }
            0x60..=0x7F => Self::LoadStoreImmediateOffset,
            0x80..=0x8F => Self::LoadStoreHalfword,
            0x90..=0x9F => Self::SpRelativeLoadStore,
            0xA0..=0xAF => Self::LoadAddress,
            0xB0 => Self::AddOffsetToStackPointer,
            0xB4 | 0xB5 | 0xBC | 0xBD => Self::PushPop,
            0xC0..=0xCF => Self::MultipleLoadStore,
            // condition 0b1110 is not a valid branch
            0xD0..=0xDD => Self::ConditionalBranch,
            0xDF => Self::SoftwareInterrupt,
            0xE0..=0xE7 => Self::UnconditionalBranch,
            0xF0..=0xFF => Self::LongBranchLink,
            _ => Self::Undefined,
        }
    }

    fn handler(self) -> ThumbHandler {
        match self {
            Self::MoveShiftedRegister => Cpu::execute_thumb_move_shifted_register,
            Self::AddSubtract => Cpu::execute_thumb_add_subtract,
            Self::ImmediateOperation => Cpu::execute_thumb_immediate_operation,
            Self::AluOperation => Cpu::execute_thumb_alu_operation,
            Self::HighRegisterOperation => Cpu::execute_thumb_high_register_operation,
            Self::PcRelativeLoad => Cpu::execute_thumb_pc_relative_load,
            Self::LoadStoreRegisterOffset => Cpu::execute_thumb_load_store_register_offset,
            Self::LoadStoreSignExtended => Cpu::execute_thumb_load_store_sign_extended,
            Self::LoadStoreImmediateOffset => Cpu::execute_thumb_load_store_immediate_offset,
            Self::LoadStoreHalfword => Cpu::execute_thumb_load_store_halfword,
            Self::SpRelativeLoadStore => Cpu::execute_thumb_sp_relative_load_store,
            Self::LoadAddress => Cpu::execute_thumb_load_address,
            Self::AddOffsetToStackPointer => Cpu::execute_thumb_add_offset_to_stack_pointer,
            Self::PushPop => Cpu::execute_thumb_push_pop,
            Self::MultipleLoadStore => Cpu::execute_thumb_multiple_load_store,
            Self::ConditionalBranch => Cpu::execute_thumb_conditional_branch,
            Self::SoftwareInterrupt => Cpu::execute_thumb_software_interrupt,
            Self::UnconditionalBranch => Cpu::execute_thumb_unconditional_branch,
            Self::LongBranchLink => Cpu::execute_thumb_long_branch_link,
            Self::Undefined => Cpu::execute_thumb_undefined,
        }
    }
}

impl Display for ThumbInstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MoveShiftedRegister => "move shifted register",
            Self::AddSubtract => "add/subtract",
            Self::ImmediateOperation => "move/compare/add/subtract immediate",
            Self::AluOperation => "alu operation",
            Self::HighRegisterOperation => "hi register operation/bx",
            Self::PcRelativeLoad => "pc-relative load",
            Self::LoadStoreRegisterOffset => "load/store with register offset",
            Self::LoadStoreSignExtended => "load/store sign-extended byte/halfword",
            Self::LoadStoreImmediateOffset => "load/store with immediate offset",
            Self::LoadStoreHalfword => "load/store halfword",
            Self::SpRelativeLoadStore => "sp-relative load/store",
            Self::LoadAddress => "load address",
            Self::AddOffsetToStackPointer => "add offset to stack pointer",
            Self::PushPop => "push/pop",
            Self::MultipleLoadStore => "multiple load/store",
            Self::ConditionalBranch => "conditional branch",
            Self::SoftwareInterrupt => "swi",
            Self::UnconditionalBranch => "b",
            Self::LongBranchLink => "bl",
            Self::Undefined => "undefined",
        };

        f.write_str(name)
    }
}

/// Entry of the format 4 sub-table, indexed by bits [9:6].
fn thumb_alu_handler(index: usize) -> ThumbHandler {
    match index & 0xF {
        0x2 | 0x3 | 0x4 | 0x7 => Cpu::execute_thumb_alu_shift,
        0x9 => Cpu::execute_thumb_alu_negate,
        0xD => Cpu::execute_thumb_alu_multiply,
        _ => Cpu::execute_thumb_alu_data_processing,
    }
}

lazy_static! {
    static ref THUMB_HANDLERS: [ThumbHandler; 256] = {
        let mut handlers = [Cpu::execute_thumb_undefined as ThumbHandler; 256];
        for (index, handler) in handlers.iter_mut().enumerate() {
            *handler = ThumbInstructionKind::from_high_byte(index as u8).handler();
        }
        handlers
    };
    static ref THUMB_ALU_HANDLERS: [ThumbHandler; 16] = {
        let mut handlers = [Cpu::execute_thumb_alu_data_processing as ThumbHandler; 16];
        for (index, handler) in handlers.iter_mut().enumerate() {
            *handler = thumb_alu_handler(index);
        }
        handlers
    };
}

pub fn decode_thumb(opcode: u16) -> ThumbInstructionKind {
    ThumbInstructionKind::from_high_byte((opcode >> 8) as u8)
}

pub(super) fn dispatch_thumb(
    cpu: &mut Cpu,
    bus: &mut dyn Bus,
    opcode: u16,
) -> Result<(), CpuError> {
    THUMB_HANDLERS[usize::from(opcode >> 8)](cpu, bus, opcode)
}

const LOAD_STORE_BIT_INDEX: usize = 11;

/// Format 4 operation field. Shifts, NEG and MUL have their own handlers.
pub(super) fn thumb_alu_operation(opcode: u16) -> AluOperation {
    match opcode.get_bit_range(6..=9) {
        0x0 => AluOperation::And,
        0x1 => AluOperation::Eor,
        0x5 => AluOperation::Adc,
        0x6 => AluOperation::Sbc,
        0x8 => AluOperation::Tst,
        0xA => AluOperation::Cmp,
        0xB => AluOperation::Cmn,
        0xC => AluOperation::Orr,
        0xE => AluOperation::Bic,
        _ => AluOperation::Mvn,
    }
}

/// Format 4 shift operations, for sub-table entries 2, 3, 4 and 7.
pub(super) fn thumb_alu_shift_type(opcode: u16) -> ShiftType {
    match opcode.get_bit_range(6..=9) {
        0x2 => ShiftType::Lsl,
        0x3 => ShiftType::Lsr,
        0x4 => ShiftType::Asr,
        _ => ShiftType::Ror,
    }
}

/// Register R0-R15 from a 3-bit field and its high bit.
pub(super) fn high_register(opcode: u16, offset: usize, high_bit: usize) -> Register {
    let index = u32::from(opcode.get_bit_range(offset..=offset + 2))
        | (u32::from(opcode.get_bit(high_bit)) << 3);
    Register::from_index(index)
}

impl Cpu {
    fn thumb_pc(&self) -> u32 {
        self.read_register(Register::R15, |pc| pc)
    }

    /// Word-aligned PC used by format 6 and 12.
    fn thumb_aligned_pc(&self) -> u32 {
        self.thumb_pc() & !0b10
    }

    fn execute_thumb_move_shifted_register(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        // opcode 0b11 belongs to format 2
        let shift_type = ShiftType::from_bits(u32::from(opcode.get_bit_range(11..=12)));
        let amount = u32::from(opcode.get_bit_range(6..=10));
        let source = self.read_register(opcode.get_register_at_offset(3), |pc| pc);

        let (value, carry) = shift_type.shift_by_immediate(source, amount, self.get_carry_flag());

        self.write_register(value, opcode.get_register_at_offset(0));
        self.set_alu_flags(AluOutput {
            value,
            carry,
            overflow: None,
        });

        Ok(())
    }

    fn execute_thumb_add_subtract(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let first_operand = self.read_register(opcode.get_register_at_offset(3), |pc| pc);
        let second_operand = if opcode.get_bit(10) {
            u32::from(opcode.get_bit_range(6..=8))
        } else {
            self.read_register(opcode.get_register_at_offset(6), |pc| pc)
        };

        let output = if opcode.get_bit(9) {
            subtract_with_carry(first_operand, second_operand, true)
        } else {
            add_with_carry(first_operand, second_operand, false)
        };

        self.write_register(output.value, opcode.get_register_at_offset(0));
        self.set_alu_flags(output);

        Ok(())
    }

    fn execute_thumb_immediate_operation(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let operation = match opcode.get_bit_range(11..=12) {
            0b00 => AluOperation::Mov,
            0b01 => AluOperation::Cmp,
            0b10 => AluOperation::Add,
            _ => AluOperation::Sub,
        };
        let destination_register = opcode.get_register_at_offset(8);
        let immediate = u32::from(opcode.get_bit_range(0..=7));

        let output = operation.evaluate(
            self.read_register(destination_register, |pc| pc),
            immediate,
            None,
            self.get_carry_flag(),
        );

        if !operation.is_test() {
            self.write_register(output.value, destination_register);
        }
        self.set_alu_flags(output);

        Ok(())
    }

    fn execute_thumb_alu_operation(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        THUMB_ALU_HANDLERS[usize::from(opcode.get_bit_range(6..=9))](self, bus, opcode)
    }

    fn execute_thumb_alu_data_processing(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let operation = thumb_alu_operation(opcode);
        let destination_register = opcode.get_register_at_offset(0);

        let output = operation.evaluate(
            self.read_register(destination_register, |pc| pc),
            self.read_register(opcode.get_register_at_offset(3), |pc| pc),
            None,
            self.get_carry_flag(),
        );

        if !operation.is_test() {
            self.write_register(output.value, destination_register);
        }
        self.set_alu_flags(output);

        Ok(())
    }

    fn execute_thumb_alu_shift(&mut self, bus: &mut dyn Bus, opcode: u16) -> Result<(), CpuError> {
        let shift_type = thumb_alu_shift_type(opcode);
        let destination_register = opcode.get_register_at_offset(0);
        let amount = self.read_register(opcode.get_register_at_offset(3), |pc| pc);

        bus.charge_cycles(1);
        let (value, carry) =
            shift_type.shift_by_register(self.read_register(destination_register, |pc| pc), amount);

        self.write_register(value, destination_register);
        self.set_alu_flags(AluOutput {
            value,
            carry,
            overflow: None,
        });

        Ok(())
    }

    fn execute_thumb_alu_negate(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let source = self.read_register(opcode.get_register_at_offset(3), |pc| pc);
        let output = subtract_with_carry(0, source, true);

        self.write_register(output.value, opcode.get_register_at_offset(0));
        self.set_alu_flags(output);

        Ok(())
    }

    fn execute_thumb_alu_multiply(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let destination_register = opcode.get_register_at_offset(0);
        let source = self.read_register(opcode.get_register_at_offset(3), |pc| pc);
        let destination = self.read_register(destination_register, |pc| pc);

        // timing follows the original Rd
        self.execute_multiply(bus, destination_register, source, destination, None, true);

        Ok(())
    }

    fn execute_thumb_high_register_operation(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let destination_register = high_register(opcode, 0, 7);
        let source = self.read_register(high_register(opcode, 3, 6), |pc| pc);

        match opcode.get_bit_range(8..=9) {
            0b00 => {
                let value = self
                    .read_register(destination_register, |pc| pc)
                    .wrapping_add(source);
                self.write_register_or_branch(bus, value, destination_register);
            }
            0b01 => {
                let output = subtract_with_carry(
                    self.read_register(destination_register, |pc| pc),
                    source,
                    true,
                );
                self.set_alu_flags(output);
            }
            0b10 => self.write_register_or_branch(bus, source, destination_register),
            _ => self.branch_exchange(bus, source),
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_thumb_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
        load: bool,
        access_size: SingleDataMemoryAccessSize,
        base_register: Register,
        base_address: u32,
        offset: u32,
        register: Register,
    ) -> Result<(), CpuError> {
        let transfer = SingleDataTransfer {
            load,
            access_size,
            base_register,
            base_address,
            offset,
            offset_modifier: OffsetModifierType::AddToBase,
            index_type: SingleDataTransferIndexType::PreIndex { write_back: false },
            exchange: false,
        };

        self.execute_single_data_transfer(bus, u32::from(opcode), transfer, register)
    }

    fn execute_thumb_pc_relative_load(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        self.execute_thumb_transfer(
            bus,
            opcode,
            true,
            SingleDataMemoryAccessSize::Word,
            Register::R15,
            self.thumb_aligned_pc(),
            u32::from(opcode.get_bit_range(0..=7)) << 2,
            opcode.get_register_at_offset(8),
        )
    }

    fn execute_thumb_load_store_register_offset(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let access_size = if opcode.get_bit(10) {
            SingleDataMemoryAccessSize::Byte
        } else {
            SingleDataMemoryAccessSize::Word
        };
        let base_register = opcode.get_register_at_offset(3);

        self.execute_thumb_transfer(
            bus,
            opcode,
            opcode.get_bit(LOAD_STORE_BIT_INDEX),
            access_size,
            base_register,
            self.read_register(base_register, |pc| pc),
            self.read_register(opcode.get_register_at_offset(6), |pc| pc),
            opcode.get_register_at_offset(0),
        )
    }

    fn execute_thumb_load_store_sign_extended(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        // bit 10 is S, bit 11 is H
        let (load, access_size) = match (opcode.get_bit(10), opcode.get_bit(11)) {
            (false, false) => (false, SingleDataMemoryAccessSize::HalfWord),
            (false, true) => (true, SingleDataMemoryAccessSize::HalfWord),
            (true, false) => (true, SingleDataMemoryAccessSize::SignedByte),
            (true, true) => (true, SingleDataMemoryAccessSize::SignedHalfWord),
        };
        let base_register = opcode.get_register_at_offset(3);

        self.execute_thumb_transfer(
            bus,
            opcode,
            load,
            access_size,
            base_register,
            self.read_register(base_register, |pc| pc),
            self.read_register(opcode.get_register_at_offset(6), |pc| pc),
            opcode.get_register_at_offset(0),
        )
    }

    fn execute_thumb_load_store_immediate_offset(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let immediate = u32::from(opcode.get_bit_range(6..=10));
        let (access_size, offset) = if opcode.get_bit(12) {
            (SingleDataMemoryAccessSize::Byte, immediate)
        } else {
            (SingleDataMemoryAccessSize::Word, immediate << 2)
        };
        let base_register = opcode.get_register_at_offset(3);

        self.execute_thumb_transfer(
            bus,
            opcode,
            opcode.get_bit(LOAD_STORE_BIT_INDEX),
            access_size,
            base_register,
            self.read_register(base_register, |pc| pc),
            offset,
            opcode.get_register_at_offset(0),
        )
    }

    fn execute_thumb_load_store_halfword(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let base_register = opcode.get_register_at_offset(3);

        self.execute_thumb_transfer(
            bus,
            opcode,
            opcode.get_bit(LOAD_STORE_BIT_INDEX),
            SingleDataMemoryAccessSize::HalfWord,
            base_register,
            self.read_register(base_register, |pc| pc),
            u32::from(opcode.get_bit_range(6..=10)) << 1,
            opcode.get_register_at_offset(0),
        )
    }

    fn execute_thumb_sp_relative_load_store(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        self.execute_thumb_transfer(
            bus,
            opcode,
            opcode.get_bit(LOAD_STORE_BIT_INDEX),
            SingleDataMemoryAccessSize::Word,
            Register::R13,
            self.read_register(Register::R13, |pc| pc),
            u32::from(opcode.get_bit_range(0..=7)) << 2,
            opcode.get_register_at_offset(8),
        )
    }

    fn execute_thumb_load_address(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let base = if opcode.get_bit(11) {
            self.read_register(Register::R13, |pc| pc)
        } else {
            self.thumb_aligned_pc()
        };
        let offset = u32::from(opcode.get_bit_range(0..=7)) << 2;

        self.write_register(base.wrapping_add(offset), opcode.get_register_at_offset(8));

        Ok(())
    }

    fn execute_thumb_add_offset_to_stack_pointer(
        &mut self,
        _bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let offset = u32::from(opcode.get_bit_range(0..=6)) << 2;
        let stack_pointer = self.read_register(Register::R13, |pc| pc);

        let value = if opcode.get_bit(7) {
            stack_pointer.wrapping_sub(offset)
        } else {
            stack_pointer.wrapping_add(offset)
        };
        self.write_register(value, Register::R13);

        Ok(())
    }

    fn execute_thumb_push_pop(&mut self, bus: &mut dyn Bus, opcode: u16) -> Result<(), CpuError> {
        let load = opcode.get_bit(LOAD_STORE_BIT_INDEX);
        let extra_register = opcode.get_bit(8);
        let mut register_list = opcode.get_bit_range(0..=7);

        // PUSH is STMDB SP!, POP is LDMIA SP!
        let transfer = if load {
            register_list = register_list.set_bit(Register::R15.index(), extra_register);
            BlockDataTransfer {
                load,
                base_register: Register::R13,
                register_list,
                offset_modifier: OffsetModifierType::AddToBase,
                pre_index: false,
                write_back: true,
                psr_or_user_bank: false,
            }
        } else {
            register_list = register_list.set_bit(Register::R14.index(), extra_register);
            BlockDataTransfer {
                load,
                base_register: Register::R13,
                register_list,
                offset_modifier: OffsetModifierType::SubtractFromBase,
                pre_index: true,
                write_back: true,
                psr_or_user_bank: false,
            }
        };

        self.execute_block_data_transfer(bus, u32::from(opcode), transfer)
    }

    fn execute_thumb_multiple_load_store(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let transfer = BlockDataTransfer {
            load: opcode.get_bit(LOAD_STORE_BIT_INDEX),
            base_register: opcode.get_register_at_offset(8),
            register_list: opcode.get_bit_range(0..=7),
            offset_modifier: OffsetModifierType::AddToBase,
            pre_index: false,
            write_back: true,
            psr_or_user_bank: false,
        };

        self.execute_block_data_transfer(bus, u32::from(opcode), transfer)
    }

    fn execute_thumb_conditional_branch(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let condition = InstructionCondition::from_bits(u32::from(opcode.get_bit_range(8..=11)));

        if self.evaluate_instruction_condition(condition) {
            let offset = (opcode.get_bit_range(0..=7) << 1).sign_extend(9);
            let target = self.thumb_pc().wrapping_add(offset);
            self.branch_to(bus, target);
        }

        Ok(())
    }

    fn execute_thumb_software_interrupt(
        &mut self,
        bus: &mut dyn Bus,
        _opcode: u16,
    ) -> Result<(), CpuError> {
        self.raise_exception(bus, ExceptionType::SoftwareInterrupt)
    }

    fn execute_thumb_unconditional_branch(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let offset = (opcode.get_bit_range(0..=10) << 1).sign_extend(12);
        let target = self.thumb_pc().wrapping_add(offset);
        self.branch_to(bus, target);

        Ok(())
    }

    /// BL is split over two opcodes. The first parks the high part of the
    /// offset in LR, the second adds the low part and jumps.
    fn execute_thumb_long_branch_link(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u16,
    ) -> Result<(), CpuError> {
        let offset = opcode.get_bit_range(0..=10);
        let pc = self.thumb_pc();

        if opcode.get_bit(11) {
            let target = self
                .read_register(Register::R14, |pc| pc)
                .wrapping_add(u32::from(offset) << 1);
            self.write_register(pc.wrapping_sub(2) | 1, Register::R14);
            self.branch_to(bus, target);
        } else {
            let high_offset = offset.sign_extend(11) << 12;
            self.write_register(pc.wrapping_add(high_offset), Register::R14);
        }

        Ok(())
    }

    fn execute_thumb_undefined(&mut self, _bus: &mut dyn Bus, opcode: u16) -> Result<(), CpuError> {
        Err(self.undefined_instruction(u32::from(opcode)))
    }
}
