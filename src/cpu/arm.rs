use std::fmt::Display;

use lazy_static::lazy_static;

use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;
use crate::error::CpuError;

use super::alu::{rotate_immediate, AluOperation, ShiftType};
use super::multiply::LongMultiply;
use super::transfer::{
    BlockDataTransfer, OffsetModifierType, SingleDataMemoryAccessSize, SingleDataTransfer,
    SingleDataTransferIndexType,
};
use super::{Cpu, CpuMode, ExceptionType, Register};

pub type ArmHandler = fn(&mut Cpu, &mut dyn Bus, u32) -> Result<(), CpuError>;

/// Instruction class selected by bits [27:20] and [7:4] of an ARM opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArmInstructionKind {
    DataProcessing,
    Mrs,
    Msr,
    Multiply,
    MultiplyLong,
    SingleDataSwap,
    BranchExchange,
    HalfwordDataTransfer,
    SingleDataTransfer,
    BlockDataTransfer,
    Branch,
    SoftwareInterrupt,
    Undefined,
}

impl ArmInstructionKind {
    /// Classifies a 12-bit dispatch index. Total over `0..4096`.
    pub fn from_index(index: usize) -> Self {
        // bits [27:20] and [7:4] of the opcode
        let high = ((index >> 4) & 0xFF) as u32;
        let low = (index & 0xF) as u32;

        match high >> 5 {
            0b000 => Self::classify_register_space(high, low),
            0b001 => {
                // test opcodes without S hold MSR, the rest is undefined
                if high & 0b1_1001 == 0b1_0000 {
                    if high.get_bit(1) {
                        Self::Msr
                    } else {
                        Self::Undefined
                    }
                } else {
                    Self::DataProcessing
                }
            }
            0b010 => Self::SingleDataTransfer,
            0b011 => {
                if low.get_bit(0) {
                    Self::Undefined
                } else {
                    Self::SingleDataTransfer
                }
            }
            0b100 => Self::BlockDataTransfer,
            0b101 => Self::Branch,
            // coprocessor data transfer
            0b110 => Self::Undefined,
            _ => {
                if high.get_bit(4) {
                    Self::SoftwareInterrupt
                } else {
                    // coprocessor data operation and register transfer
                    Self::Undefined
                }
            }
        }
    }

    fn classify_register_space(high: u32, low: u32) -> Self {
        if low == 0b1001 {
            return match high {
                0x00..=0x03 => Self::Multiply,
                0x08..=0x0F => Self::MultiplyLong,
                0x10 | 0x14 => Self::SingleDataSwap,
                _ => Self::Undefined,
            };
        }

        if low & 0b1001 == 0b1001 {
            let load = high.get_bit(0);
            let signed = low.get_bit(2);

            // there is no signed store
            return if !load && signed {
                Self::Undefined
            } else {
                Self::HalfwordDataTransfer
            };
        }

        if high & 0b1_1001 == 0b1_0000 {
            return match (high, low) {
                (0x12, 0b0001) => Self::BranchExchange,
                (0x10 | 0x14, 0b0000) => Self::Mrs,
                (0x12 | 0x16, 0b0000) => Self::Msr,
                _ => Self::Undefined,
            };
        }

        Self::DataProcessing
    }

    fn handler(self) -> ArmHandler {
        match self {
            Self::DataProcessing => Cpu::execute_arm_data_processing,
            Self::Mrs => Cpu::execute_arm_mrs,
            Self::Msr => Cpu::execute_arm_msr,
            Self::Multiply => Cpu::execute_arm_multiply,
            Self::MultiplyLong => Cpu::execute_arm_multiply_long,
            Self::SingleDataSwap => Cpu::execute_arm_single_data_swap,
            Self::BranchExchange => Cpu::execute_arm_branch_exchange,
            Self::HalfwordDataTransfer => Cpu::execute_arm_halfword_data_transfer,
            Self::SingleDataTransfer => Cpu::execute_arm_single_data_transfer,
            Self::BlockDataTransfer => Cpu::execute_arm_block_data_transfer,
            Self::Branch => Cpu::execute_arm_branch,
            Self::SoftwareInterrupt => Cpu::execute_arm_software_interrupt,
            Self::Undefined => Cpu::execute_arm_undefined,
        }
    }
}

impl Display for ArmInstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DataProcessing => "data processing",
            Self::Mrs => "mrs",
            Self::Msr => "msr",
            Self::Multiply => "mul",
            Self::MultiplyLong => "mull",
            Self::SingleDataSwap => "swp",
            Self::BranchExchange => "bx",
            Self::HalfwordDataTransfer => "halfword transfer",
            Self::SingleDataTransfer => "single transfer",
            Self::BlockDataTransfer => "block transfer",
            Self::Branch => "b",
            Self::SoftwareInterrupt => "swi",
            Self::Undefined => "undefined",
        };

        f.write_str(name)
    }
}

lazy_static! {
    static ref ARM_HANDLERS: [ArmHandler; 4096] = {
        let mut handlers = [Cpu::execute_arm_undefined as ArmHandler; 4096];
        for (index, handler) in handlers.iter_mut().enumerate() {
            *handler = ArmInstructionKind::from_index(index).handler();
        }
        handlers
    };
}

pub fn arm_dispatch_index(opcode: u32) -> usize {
    (((opcode >> 16) & 0xFF0) | ((opcode >> 4) & 0xF)) as usize
}

pub fn decode_arm(opcode: u32) -> ArmInstructionKind {
    ArmInstructionKind::from_index(arm_dispatch_index(opcode))
}

pub(super) fn dispatch_arm(cpu: &mut Cpu, bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
    ARM_HANDLERS[arm_dispatch_index(opcode)](cpu, bus, opcode)
}

const IMMEDIATE_OPERAND_BIT_INDEX: usize = 25;
const PRE_POST_BIT_INDEX: usize = 24;
const LINK_BIT_INDEX: usize = 24;
const UP_DOWN_BIT_INDEX: usize = 23;
const BYTE_WORD_BIT_INDEX: usize = 22;
const PSR_BIT_INDEX: usize = 22;
const SIGNED_BIT_INDEX: usize = 22;
const HALFWORD_IMMEDIATE_BIT_INDEX: usize = 22;
const WRITE_BACK_BIT_INDEX: usize = 21;
const ACCUMULATE_BIT_INDEX: usize = 21;
const SET_CONDITIONS_BIT_INDEX: usize = 20;
const LOAD_STORE_BIT_INDEX: usize = 20;
const REGISTER_SHIFT_BIT_INDEX: usize = 4;

const FLAGS_FIELD_MASK: u32 = 0xFF00_0000;
const CONTROL_FIELD_MASK: u32 = 0x0000_00FF;

fn offset_modifier(opcode: u32) -> OffsetModifierType {
    if opcode.get_bit(UP_DOWN_BIT_INDEX) {
        OffsetModifierType::AddToBase
    } else {
        OffsetModifierType::SubtractFromBase
    }
}

fn index_type(opcode: u32) -> SingleDataTransferIndexType {
    if opcode.get_bit(PRE_POST_BIT_INDEX) {
        SingleDataTransferIndexType::PreIndex {
            write_back: opcode.get_bit(WRITE_BACK_BIT_INDEX),
        }
    } else {
        SingleDataTransferIndexType::PostIndex
    }
}

impl Cpu {
    /// Operand 2 of a data-processing instruction and the shifter carry-out.
    fn evaluate_arm_second_operand(&self, bus: &mut dyn Bus, opcode: u32) -> (u32, Option<bool>) {
        if opcode.get_bit(IMMEDIATE_OPERAND_BIT_INDEX) {
            return rotate_immediate(opcode.get_bit_range(0..=7), opcode.get_bit_range(8..=11));
        }

        let operand_register = opcode.get_register_at_offset(0);
        let shift_type = ShiftType::from_bits(opcode.get_bit_range(5..=6));

        if opcode.get_bit(REGISTER_SHIFT_BIT_INDEX) {
            // the extra internal cycle reads the shift register
            bus.charge_cycles(1);

            let shift_register = opcode.get_register_at_offset(8);
            let amount = self.read_register(shift_register, |pc| pc.wrapping_add(4));
            // "PC+12" when the shift amount is taken from a register
            let value = self.read_register(operand_register, |pc| pc.wrapping_add(4));

            shift_type.shift_by_register(value, amount)
        } else {
            let amount = opcode.get_bit_range(7..=11);
            let value = self.read_register(operand_register, |pc| pc);

            shift_type.shift_by_immediate(value, amount, self.get_carry_flag())
        }
    }

    fn execute_arm_data_processing(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let operation = AluOperation::from_bits(opcode.get_bit_range(21..=24));
        let set_conditions = opcode.get_bit(SET_CONDITIONS_BIT_INDEX);
        let first_operand_register = opcode.get_register_at_offset(16);
        let destination_register = opcode.get_register_at_offset(12);

        let register_shift = !opcode.get_bit(IMMEDIATE_OPERAND_BIT_INDEX)
            && opcode.get_bit(REGISTER_SHIFT_BIT_INDEX);
        let (second_operand, shifter_carry) = self.evaluate_arm_second_operand(bus, opcode);
        let first_operand = if register_shift {
            self.read_register(first_operand_register, |pc| pc.wrapping_add(4))
        } else {
            self.read_register(first_operand_register, |pc| pc)
        };

        let output = operation.evaluate(
            first_operand,
            second_operand,
            shifter_carry,
            self.get_carry_flag(),
        );

        if operation.is_test() {
            self.set_alu_flags(output);
            return Ok(());
        }

        if destination_register == Register::R15 {
            if set_conditions {
                self.restore_cpsr_from_spsr()?;
            }
            self.branch_to(bus, output.value);
        } else {
            self.write_register(output.value, destination_register);
            if set_conditions {
                self.set_alu_flags(output);
            }
        }

        Ok(())
    }

    fn execute_arm_mrs(&mut self, _bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        let destination_register = opcode.get_register_at_offset(12);

        let value = if opcode.get_bit(PSR_BIT_INDEX) {
            self.read_spsr().unwrap_or_else(|| {
                log::warn!(
                    "reading SPSR in {:?} mode, returning CPSR",
                    self.get_cpu_mode()
                );
                self.cpsr
            })
        } else {
            self.cpsr
        };

        self.write_register(value, destination_register);

        Ok(())
    }

    fn execute_arm_msr(&mut self, _bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        let source_value = if opcode.get_bit(IMMEDIATE_OPERAND_BIT_INDEX) {
            rotate_immediate(opcode.get_bit_range(0..=7), opcode.get_bit_range(8..=11)).0
        } else {
            self.read_register(opcode.get_register_at_offset(0), |pc| pc)
        };

        let mut write_mask = 0;
        if opcode.get_bit(19) {
            write_mask |= FLAGS_FIELD_MASK;
        }
        if opcode.get_bit(16) {
            write_mask |= CONTROL_FIELD_MASK;
        }

        if opcode.get_bit(PSR_BIT_INDEX) {
            if let Some(spsr) = self.read_spsr() {
                self.write_spsr((source_value & write_mask) | (spsr & !write_mask));
            } else {
                log::warn!("ignoring MSR to SPSR in {:?} mode", self.get_cpu_mode());
            }
            return Ok(());
        }

        if self.get_cpu_mode() == CpuMode::User {
            write_mask &= FLAGS_FIELD_MASK;
        }
        // the state bit only changes through BX and exceptions
        write_mask = write_mask.set_bit(Self::STATE_BIT_OFFSET, false);

        let new_cpsr = (source_value & write_mask) | (self.cpsr & !write_mask);
        self.write_cpsr(new_cpsr)
    }

    fn execute_arm_multiply(&mut self, bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        let destination_register = opcode.get_register_at_offset(16);
        let multiplicand = self.read_register(opcode.get_register_at_offset(0), |pc| pc);
        let multiplier = self.read_register(opcode.get_register_at_offset(8), |pc| pc);
        let accumulate = opcode
            .get_bit(ACCUMULATE_BIT_INDEX)
            .then(|| self.read_register(opcode.get_register_at_offset(12), |pc| pc));

        self.execute_multiply(
            bus,
            destination_register,
            multiplicand,
            multiplier,
            accumulate,
            opcode.get_bit(SET_CONDITIONS_BIT_INDEX),
        );

        Ok(())
    }

    fn execute_arm_multiply_long(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let operation = LongMultiply {
            destination_high: opcode.get_register_at_offset(16),
            destination_low: opcode.get_register_at_offset(12),
            multiplicand: self.read_register(opcode.get_register_at_offset(0), |pc| pc),
            multiplier: self.read_register(opcode.get_register_at_offset(8), |pc| pc),
            signed: opcode.get_bit(SIGNED_BIT_INDEX),
            accumulate: opcode.get_bit(ACCUMULATE_BIT_INDEX),
            set_conditions: opcode.get_bit(SET_CONDITIONS_BIT_INDEX),
        };

        self.execute_multiply_long(bus, operation);

        Ok(())
    }

    fn execute_arm_single_data_swap(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        self.execute_single_data_swap(
            bus,
            opcode.get_bit(BYTE_WORD_BIT_INDEX),
            opcode.get_register_at_offset(16),
            opcode.get_register_at_offset(12),
            opcode.get_register_at_offset(0),
        )
    }

    fn execute_arm_branch_exchange(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let target = self.read_register(opcode.get_register_at_offset(0), |pc| pc);
        self.branch_exchange(bus, target);

        Ok(())
    }

    fn execute_arm_halfword_data_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let base_register = opcode.get_register_at_offset(16);

        let offset = if opcode.get_bit(HALFWORD_IMMEDIATE_BIT_INDEX) {
            (opcode.get_bit_range(8..=11) << 4) | opcode.get_bit_range(0..=3)
        } else {
            self.read_register(opcode.get_register_at_offset(0), |pc| pc)
        };

        let access_size = match opcode.get_bit_range(5..=6) {
            0b01 => SingleDataMemoryAccessSize::HalfWord,
            0b10 => SingleDataMemoryAccessSize::SignedByte,
            _ => SingleDataMemoryAccessSize::SignedHalfWord,
        };

        let transfer = SingleDataTransfer {
            load: opcode.get_bit(LOAD_STORE_BIT_INDEX),
            access_size,
            base_register,
            base_address: self.read_register(base_register, |pc| pc),
            offset,
            offset_modifier: offset_modifier(opcode),
            index_type: index_type(opcode),
            exchange: false,
        };

        self.execute_single_data_transfer(bus, opcode, transfer, opcode.get_register_at_offset(12))
    }

    fn execute_arm_single_data_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let base_register = opcode.get_register_at_offset(16);

        // the I bit selects a register offset here
        let offset = if opcode.get_bit(IMMEDIATE_OPERAND_BIT_INDEX) {
            let shift_type = ShiftType::from_bits(opcode.get_bit_range(5..=6));
            let amount = opcode.get_bit_range(7..=11);
            let value = self.read_register(opcode.get_register_at_offset(0), |pc| pc);

            shift_type
                .shift_by_immediate(value, amount, self.get_carry_flag())
                .0
        } else {
            opcode.get_bit_range(0..=11)
        };

        let access_size = if opcode.get_bit(BYTE_WORD_BIT_INDEX) {
            SingleDataMemoryAccessSize::Byte
        } else {
            SingleDataMemoryAccessSize::Word
        };

        let transfer = SingleDataTransfer {
            load: opcode.get_bit(LOAD_STORE_BIT_INDEX),
            access_size,
            base_register,
            // "including R15=PC+8"
            base_address: self.read_register(base_register, |pc| pc),
            offset,
            offset_modifier: offset_modifier(opcode),
            index_type: index_type(opcode),
            exchange: access_size == SingleDataMemoryAccessSize::Word,
        };

        self.execute_single_data_transfer(bus, opcode, transfer, opcode.get_register_at_offset(12))
    }

    fn execute_arm_block_data_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
    ) -> Result<(), CpuError> {
        let transfer = BlockDataTransfer {
            load: opcode.get_bit(LOAD_STORE_BIT_INDEX),
            base_register: opcode.get_register_at_offset(16),
            register_list: opcode.get_bit_range(0..=15) as u16,
            offset_modifier: offset_modifier(opcode),
            pre_index: opcode.get_bit(PRE_POST_BIT_INDEX),
            write_back: opcode.get_bit(WRITE_BACK_BIT_INDEX),
            psr_or_user_bank: opcode.get_bit(PSR_BIT_INDEX),
        };

        self.execute_block_data_transfer(bus, opcode, transfer)
    }

    fn execute_arm_branch(&mut self, bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        let offset = (opcode.get_bit_range(0..=23) << 2).sign_extend(26);
        let pc = self.read_register(Register::R15, |pc| pc);

        if opcode.get_bit(LINK_BIT_INDEX) {
            // return to the instruction after the branch
            self.write_register(pc.wrapping_sub(4), Register::R14);
        }

        self.branch_to(bus, pc.wrapping_add(offset));

        Ok(())
    }

    fn execute_arm_software_interrupt(
        &mut self,
        bus: &mut dyn Bus,
        _opcode: u32,
    ) -> Result<(), CpuError> {
        self.raise_exception(bus, ExceptionType::SoftwareInterrupt)
    }

    fn execute_arm_undefined(&mut self, _bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        Err(self.undefined_instruction(opcode))
    }
}
