mod alu;
pub mod arm;
mod disassemble;
mod multiply;
pub mod thumb;
mod transfer;

use std::fmt::Display;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;
use crate::config::CpuConfig;
use crate::error::CpuError;

pub use alu::{AluOperation, ShiftType};
pub use disassemble::{disassemble_arm, disassemble_thumb};

/// Register and status file of one ARM7TDMI.
///
/// `registers` always holds the view of the current mode. The banked
/// copies belonging to the current mode are stale until the next mode
/// switch stores them back.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "CpuState")]
pub struct Cpu {
    registers: [u32; 16],
    r8_r12: [u32; 5],
    r8_r12_fiq: [u32; 5],
    r13_r14_banked: [[u32; 2]; 6],
    // index 0 (User/System) has no SPSR
    spsr_banked: [u32; 6],
    cpsr: u32,
    #[serde(skip)]
    pipeline_flushed: bool,
}

/// Deserialized form of `Cpu`, checked before it becomes one.
#[derive(Deserialize)]
struct CpuState {
    registers: [u32; 16],
    r8_r12: [u32; 5],
    r8_r12_fiq: [u32; 5],
    r13_r14_banked: [[u32; 2]; 6],
    spsr_banked: [u32; 6],
    cpsr: u32,
}

impl TryFrom<CpuState> for Cpu {
    type Error = CpuError;

    fn try_from(state: CpuState) -> Result<Self, Self::Error> {
        Self::mode_from_psr(state.cpsr)?;

        Ok(Self {
            registers: state.registers,
            r8_r12: state.r8_r12,
            r8_r12_fiq: state.r8_r12_fiq,
            r13_r14_banked: state.r13_r14_banked,
            spsr_banked: state.spsr_banked,
            cpsr: state.cpsr,
            pipeline_flushed: false,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuMode {
    User,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
    System,
}

impl CpuMode {
    const USER_MODE_BITS: u32 = 0b10000;
    const FIQ_MODE_BITS: u32 = 0b10001;
    const IRQ_MODE_BITS: u32 = 0b10010;
    const SUPERVISOR_MODE_BITS: u32 = 0b10011;
    const ABORT_MODE_BITS: u32 = 0b10111;
    const UNDEFINED_MODE_BITS: u32 = 0b11011;
    const SYSTEM_MODE_BITS: u32 = 0b11111;

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            Self::USER_MODE_BITS => Some(Self::User),
            Self::FIQ_MODE_BITS => Some(Self::Fiq),
            Self::IRQ_MODE_BITS => Some(Self::Irq),
            Self::SUPERVISOR_MODE_BITS => Some(Self::Supervisor),
            Self::ABORT_MODE_BITS => Some(Self::Abort),
            Self::UNDEFINED_MODE_BITS => Some(Self::Undefined),
            Self::SYSTEM_MODE_BITS => Some(Self::System),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::User => Self::USER_MODE_BITS,
            Self::Fiq => Self::FIQ_MODE_BITS,
            Self::Irq => Self::IRQ_MODE_BITS,
            Self::Supervisor => Self::SUPERVISOR_MODE_BITS,
            Self::Abort => Self::ABORT_MODE_BITS,
            Self::Undefined => Self::UNDEFINED_MODE_BITS,
            Self::System => Self::SYSTEM_MODE_BITS,
        }
    }

    /// Slot of this mode's R13/R14 and SPSR. User and System share slot 0.
    fn bank_index(self) -> usize {
        match self {
            Self::User | Self::System => 0,
            Self::Fiq => 1,
            Self::Irq => 2,
            Self::Supervisor => 3,
            Self::Abort => 4,
            Self::Undefined => 5,
        }
    }

    pub fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13, // SP
    R14, // LR
    R15, // PC
}

impl Register {
    const ALL: [Register; 16] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    /// Only the low 4 bits of `index` are significant.
    pub fn from_index(index: u32) -> Self {
        Self::ALL[(index & 0b1111) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::R13 => f.write_str("sp"),
            Self::R14 => f.write_str("lr"),
            Self::R15 => f.write_str("pc"),
            other => write!(f, "r{}", other.index()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionCondition {
    Equal,
    NotEqual,
    UnsignedHigherOrSame,
    UnsignedLower,
    SignedNegative,
    SignedPositiveOrZero,
    SignedOverflow,
    SignedNoOverflow,
    UnsignedHigher,
    UnsignedLowerOrSame,
    SignedGreaterOrEqual,
    SignedLessThan,
    SignedGreaterThan,
    SignedLessOrEqual,
    Always,
    Never,
}

impl InstructionCondition {
    /// Only the low 4 bits of `bits` are significant.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b1111 {
            0 => Self::Equal,
            1 => Self::NotEqual,
            2 => Self::UnsignedHigherOrSame,
            3 => Self::UnsignedLower,
            4 => Self::SignedNegative,
            5 => Self::SignedPositiveOrZero,
            6 => Self::SignedOverflow,
            7 => Self::SignedNoOverflow,
            8 => Self::UnsignedHigher,
            9 => Self::UnsignedLowerOrSame,
            10 => Self::SignedGreaterOrEqual,
            11 => Self::SignedLessThan,
            12 => Self::SignedGreaterThan,
            13 => Self::SignedLessOrEqual,
            14 => Self::Always,
            _ => Self::Never,
        }
    }
}

impl Display for InstructionCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => f.write_str("eq"),
            Self::NotEqual => f.write_str("ne"),
            Self::UnsignedHigherOrSame => f.write_str("cs"),
            Self::UnsignedLower => f.write_str("cc"),
            Self::SignedNegative => f.write_str("mi"),
            Self::SignedPositiveOrZero => f.write_str("pl"),
            Self::SignedOverflow => f.write_str("vs"),
            Self::SignedNoOverflow => f.write_str("vc"),
            Self::UnsignedHigher => f.write_str("hi"),
            Self::UnsignedLowerOrSame => f.write_str("ls"),
            Self::SignedGreaterOrEqual => f.write_str("ge"),
            Self::SignedLessThan => f.write_str("lt"),
            Self::SignedGreaterThan => f.write_str("gt"),
            Self::SignedLessOrEqual => f.write_str("le"),
            Self::Always => Ok(()),
            Self::Never => f.write_str("nv"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionSet {
    Arm,
    Thumb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionType {
    Reset,
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    InterruptRequest,
    FastInterruptRequest,
}

/// Interrupt lines driven by the external interrupt controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Irq,
    Fiq,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Processor state right after a hardware reset.
    pub fn new() -> Self {
        Self::from_config(&CpuConfig::default())
    }

    pub fn from_config(config: &CpuConfig) -> Self {
        let cpsr = config
            .mode
            .bits()
            .set_bit(Self::STATE_BIT_OFFSET, config.state == InstructionSet::Thumb)
            .set_bit(Self::IRQ_DISABLE_BIT_OFFSET, config.irq_disabled)
            .set_bit(Self::FIQ_DISABLE_BIT_OFFSET, config.fiq_disabled);

        let stack_pointers = &config.stack_pointers;
        let mut r13_r14_banked = [[0; 2]; 6];
        r13_r14_banked[CpuMode::User.bank_index()][0] = stack_pointers.user;
        r13_r14_banked[CpuMode::Fiq.bank_index()][0] = stack_pointers.fiq;
        r13_r14_banked[CpuMode::Irq.bank_index()][0] = stack_pointers.irq;
        r13_r14_banked[CpuMode::Supervisor.bank_index()][0] = stack_pointers.supervisor;
        r13_r14_banked[CpuMode::Abort.bank_index()][0] = stack_pointers.abort;
        r13_r14_banked[CpuMode::Undefined.bank_index()][0] = stack_pointers.undefined;

        let mut registers = [0; 16];
        registers[13] = r13_r14_banked[config.mode.bank_index()][0];

        let mut cpu = Self {
            registers,
            r8_r12: [0; 5],
            r8_r12_fiq: [0; 5],
            r13_r14_banked,
            spsr_banked: [0; 6],
            cpsr,
            pipeline_flushed: false,
        };

        let pipeline_offset = 2 * cpu.get_instruction_width();
        cpu.write_register(
            config.entry_point.wrapping_add(pipeline_offset),
            Register::R15,
        );

        cpu
    }

    /// Back to the hardware reset state of `Cpu::new`. The configuration
    /// the processor was built from is not kept, so a direct-boot core
    /// resets to Supervisor mode at address 0 like real hardware.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Display for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (row_index, values) in self.registers.chunks(4).enumerate() {
            for (column, value) in values.iter().enumerate() {
                let register = Register::from_index((row_index * 4 + column) as u32);
                write!(f, "{:>4}: 0x{:08x} ", register.to_string(), value)?;
            }
            writeln!(f)?;
        }

        write!(
            f,
            "cpsr: 0x{:08x} ({:?}, {:?})",
            self.cpsr,
            self.get_cpu_mode(),
            self.get_instruction_mode()
        )
    }
}

impl Cpu {
    /// Writes a register of the current mode. Writes to R15 are aligned to
    /// the current state but do not refill; use `branch_to` for jumps.
    pub(crate) fn write_register(&mut self, value: u32, register: Register) {
        if register == Register::R15 {
            let aligned = match self.get_instruction_mode() {
                InstructionSet::Arm => value & !0b11,
                InstructionSet::Thumb => value & !0b1,
            };

            if aligned != value {
                log::warn!(
                    "writing to {:?} PC with unaligned value: 0x{:08X}, force aligning",
                    self.get_instruction_mode(),
                    value
                );
            }

            self.registers[15] = aligned;
        } else {
            self.registers[register.index()] = value;
        }
    }

    /// Writes a loaded or computed value, refilling when the target is R15.
    pub(crate) fn write_register_or_branch(
        &mut self,
        bus: &mut dyn Bus,
        value: u32,
        register: Register,
    ) {
        if register == Register::R15 {
            self.branch_to(bus, value);
        } else {
            self.write_register(value, register);
        }
    }

    pub fn read_register(&self, register: Register, pc_calculation: fn(u32) -> u32) -> u32 {
        match register {
            Register::R15 => pc_calculation(self.registers[15]),
            other => self.registers[other.index()],
        }
    }

    /// Reads `register` as seen from `mode`, whichever mode is current.
    pub fn read_banked_register(&self, mode: CpuMode, register: Register) -> u32 {
        let current_mode = self.get_cpu_mode();
        let index = register.index();

        match index {
            8..=12 if (mode == CpuMode::Fiq) != (current_mode == CpuMode::Fiq) => {
                if mode == CpuMode::Fiq {
                    self.r8_r12_fiq[index - 8]
                } else {
                    self.r8_r12[index - 8]
                }
            }
            13 | 14 if mode.bank_index() != current_mode.bank_index() => {
                self.r13_r14_banked[mode.bank_index()][index - 13]
            }
            _ => self.registers[index],
        }
    }

    fn write_banked_register(&mut self, mode: CpuMode, value: u32, register: Register) {
        let current_mode = self.get_cpu_mode();
        let index = register.index();

        match index {
            8..=12 if (mode == CpuMode::Fiq) != (current_mode == CpuMode::Fiq) => {
                if mode == CpuMode::Fiq {
                    self.r8_r12_fiq[index - 8] = value;
                } else {
                    self.r8_r12[index - 8] = value;
                }
            }
            13 | 14 if mode.bank_index() != current_mode.bank_index() => {
                self.r13_r14_banked[mode.bank_index()][index - 13] = value;
            }
            _ => self.write_register(value, register),
        }
    }

    pub(crate) fn read_user_register(
        &self,
        register: Register,
        pc_calculation: fn(u32) -> u32,
    ) -> u32 {
        match register {
            Register::R15 => self.read_register(register, pc_calculation),
            other => self.read_banked_register(CpuMode::User, other),
        }
    }

    pub(crate) fn write_user_register(&mut self, value: u32, register: Register) {
        self.write_banked_register(CpuMode::User, value, register);
    }

    fn switch_register_bank(&mut self, old_mode: CpuMode, new_mode: CpuMode) {
        if old_mode.bank_index() == new_mode.bank_index() {
            return;
        }

        // store the active view into the old mode's storage
        if old_mode == CpuMode::Fiq {
            self.r8_r12_fiq.copy_from_slice(&self.registers[8..13]);
        } else {
            self.r8_r12.copy_from_slice(&self.registers[8..13]);
        }
        self.r13_r14_banked[old_mode.bank_index()].copy_from_slice(&self.registers[13..15]);

        // and load the new mode's storage into it
        if new_mode == CpuMode::Fiq {
            self.registers[8..13].copy_from_slice(&self.r8_r12_fiq);
        } else {
            self.registers[8..13].copy_from_slice(&self.r8_r12);
        }
        self.registers[13..15].copy_from_slice(&self.r13_r14_banked[new_mode.bank_index()]);
    }

    pub fn read_cpsr(&self) -> u32 {
        self.cpsr
    }

    /// Replaces the CPSR, rebanking registers when the mode field changes.
    pub(crate) fn write_cpsr(&mut self, value: u32) -> Result<(), CpuError> {
        let new_mode = Self::mode_from_psr(value)?;
        let old_mode = self.get_cpu_mode();

        self.cpsr = value;

        if old_mode != new_mode {
            log::debug!("mode switch: {:?} -> {:?}", old_mode, new_mode);
            self.switch_register_bank(old_mode, new_mode);
        }

        Ok(())
    }

    /// SPSR of the current mode, if the mode owns one.
    pub fn read_spsr(&self) -> Option<u32> {
        match self.get_cpu_mode().bank_index() {
            0 => None,
            index => Some(self.spsr_banked[index]),
        }
    }

    pub(crate) fn write_spsr(&mut self, value: u32) {
        match self.get_cpu_mode().bank_index() {
            0 => log::warn!(
                "ignoring SPSR write of 0x{:08X} in {:?} mode",
                value,
                self.get_cpu_mode()
            ),
            index => self.spsr_banked[index] = value,
        }
    }

    fn mode_from_psr(value: u32) -> Result<CpuMode, CpuError> {
        let mode_bits = value.get_bit_range(Self::MODE_BITS_RANGE);
        CpuMode::from_bits(mode_bits).ok_or(CpuError::InvalidMode { bits: mode_bits })
    }

    /// Fails exactly when `restore_cpsr_from_spsr` would, without touching
    /// any state.
    pub(crate) fn check_spsr_restore(&self) -> Result<(), CpuError> {
        match self.read_spsr() {
            Some(spsr) => Self::mode_from_psr(spsr).map(|_| ()),
            None => Ok(()),
        }
    }

    pub(crate) fn restore_cpsr_from_spsr(&mut self) -> Result<(), CpuError> {
        match self.read_spsr() {
            Some(spsr) => self.write_cpsr(spsr),
            None => {
                log::warn!("no SPSR to restore in {:?} mode", self.get_cpu_mode());
                Ok(())
            }
        }
    }

    /// Address of the instruction that is executing, or that executes next
    /// when called between steps.
    pub fn fetch_address(&self) -> u32 {
        self.registers[15].wrapping_sub(2 * self.get_instruction_width())
    }

    pub fn get_instruction_width(&self) -> u32 {
        match self.get_instruction_mode() {
            InstructionSet::Arm => 4,
            InstructionSet::Thumb => 2,
        }
    }

    pub(crate) fn state_words(&self) -> impl Iterator<Item = u32> + '_ {
        self.registers
            .iter()
            .chain(self.r8_r12.iter())
            .chain(self.r8_r12_fiq.iter())
            .chain(self.r13_r14_banked.iter().flatten())
            .chain(self.spsr_banked.iter())
            .chain(std::iter::once(&self.cpsr))
            .copied()
    }
}

impl Cpu {
    /// Executes one ARM instruction located at `fetch_address()`.
    pub fn execute_arm(&mut self, bus: &mut dyn Bus, opcode: u32) -> Result<(), CpuError> {
        let condition = InstructionCondition::from_bits(opcode >> 28);

        self.pipeline_flushed = false;
        bus.charge_cycles(1);

        if self.evaluate_instruction_condition(condition) {
            log::trace!(
                "0x{:08X}: 0x{:08X} {}",
                self.fetch_address(),
                opcode,
                disassemble_arm(opcode, self.fetch_address())
            );
            arm::dispatch_arm(self, bus, opcode)?;
        } else {
            log::trace!(
                "0x{:08X}: 0x{:08X} skipped ({})",
                self.fetch_address(),
                opcode,
                condition
            );
        }

        if !self.pipeline_flushed {
            self.registers[15] = self.registers[15].wrapping_add(4);
        }

        Ok(())
    }

    /// Executes one Thumb instruction located at `fetch_address()`.
    pub fn execute_thumb(&mut self, bus: &mut dyn Bus, opcode: u16) -> Result<(), CpuError> {
        self.pipeline_flushed = false;
        bus.charge_cycles(1);

        log::trace!(
            "0x{:08X}: 0x{:04X} {}",
            self.fetch_address(),
            opcode,
            disassemble_thumb(opcode, self.fetch_address())
        );
        thumb::dispatch_thumb(self, bus, opcode)?;

        if !self.pipeline_flushed {
            self.registers[15] = self.registers[15].wrapping_add(2);
        }

        Ok(())
    }

    /// Fetches the next instruction through `bus` and executes it.
    pub fn fetch_decode_execute(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        let address = self.fetch_address();

        match self.get_instruction_mode() {
            InstructionSet::Arm => {
                let opcode = bus.read_word(address)?;
                self.execute_arm(bus, opcode)
            }
            InstructionSet::Thumb => {
                let opcode = bus.read_halfword(address)?;
                self.execute_thumb(bus, opcode)
            }
        }
    }

    /// Jumps to `target` in the current state and notifies the bus so it
    /// can refill its prefetch.
    pub(crate) fn branch_to(&mut self, bus: &mut dyn Bus, target: u32) {
        let state = self.get_instruction_mode();
        let target = match state {
            InstructionSet::Arm => target & !0b11,
            InstructionSet::Thumb => target & !0b1,
        };

        self.registers[15] = target.wrapping_add(2 * self.get_instruction_width());
        self.pipeline_flushed = true;

        bus.branch_notify(target, state);
        bus.charge_cycles(2);
    }

    /// Bit 0 of `target` selects the state to continue in.
    pub(crate) fn branch_exchange(&mut self, bus: &mut dyn Bus, target: u32) {
        let state = if target.get_bit(0) {
            InstructionSet::Thumb
        } else {
            InstructionSet::Arm
        };

        self.set_instruction_mode(state);
        self.branch_to(bus, target);
    }

    /// Enters the handler of `exception_type`, as if taken at the boundary
    /// before the instruction at `fetch_address()` completes.
    pub fn raise_exception(
        &mut self,
        bus: &mut dyn Bus,
        exception_type: ExceptionType,
    ) -> Result<(), CpuError> {
        log::debug!(
            "exception {:?} at 0x{:08X}",
            exception_type,
            self.fetch_address()
        );

        let new_mode = match exception_type {
            ExceptionType::Reset => CpuMode::Supervisor,
            ExceptionType::Undefined => CpuMode::Undefined,
            ExceptionType::SoftwareInterrupt => CpuMode::Supervisor,
            ExceptionType::PrefetchAbort => CpuMode::Abort,
            ExceptionType::DataAbort => CpuMode::Abort,
            ExceptionType::InterruptRequest => CpuMode::Irq,
            ExceptionType::FastInterruptRequest => CpuMode::Fiq,
        };

        let return_offset = match exception_type {
            ExceptionType::Reset => 0,
            ExceptionType::Undefined | ExceptionType::SoftwareInterrupt => {
                self.get_instruction_width()
            }
            ExceptionType::PrefetchAbort
            | ExceptionType::InterruptRequest
            | ExceptionType::FastInterruptRequest => 4,
            ExceptionType::DataAbort => 8,
        };

        let return_address = self.fetch_address().wrapping_add(return_offset);
        let old_cpsr = self.cpsr;

        // fiq only disabled by reset and fiq
        let disable_fiq = matches!(
            exception_type,
            ExceptionType::Reset | ExceptionType::FastInterruptRequest
        ) || old_cpsr.get_bit(Self::FIQ_DISABLE_BIT_OFFSET);

        let new_cpsr = old_cpsr
            .set_bit_range(new_mode.bits(), Self::MODE_BITS_RANGE)
            .set_bit(Self::STATE_BIT_OFFSET, false)
            .set_bit(Self::IRQ_DISABLE_BIT_OFFSET, true)
            .set_bit(Self::FIQ_DISABLE_BIT_OFFSET, disable_fiq);

        self.write_cpsr(new_cpsr)?;
        self.write_register(return_address, Register::R14);
        self.write_spsr(old_cpsr);

        self.branch_to(bus, Self::get_exception_vector_address(exception_type));

        Ok(())
    }

    /// Takes `interrupt` unless it is masked. Returns whether it was taken.
    pub fn request_interrupt(
        &mut self,
        bus: &mut dyn Bus,
        interrupt: Interrupt,
    ) -> Result<bool, CpuError> {
        let (masked, exception_type) = match interrupt {
            Interrupt::Irq => (self.get_irq_disable(), ExceptionType::InterruptRequest),
            Interrupt::Fiq => (self.get_fiq_disable(), ExceptionType::FastInterruptRequest),
        };

        if masked {
            return Ok(false);
        }

        self.raise_exception(bus, exception_type)?;
        Ok(true)
    }

    fn get_exception_vector_address(exception_type: ExceptionType) -> u32 {
        const RESET_EXCEPTION_VECTOR: u32 = 0x00000000;
        const UNDEFINED_INSTRUCTION_VECTOR: u32 = 0x00000004;
        const SOFTWARE_INTERRUPT_VECTOR: u32 = 0x00000008;
        const PREFETCH_ABORT_VECTOR: u32 = 0x0000000C;
        const DATA_ABORT_VECTOR: u32 = 0x00000010;
        const INTERRUPT_REQUEST_VECTOR: u32 = 0x00000018;
        const FAST_INTERRUPT_REQUEST_VECTOR: u32 = 0x0000001C;

        match exception_type {
            ExceptionType::Reset => RESET_EXCEPTION_VECTOR,
            ExceptionType::Undefined => UNDEFINED_INSTRUCTION_VECTOR,
            ExceptionType::SoftwareInterrupt => SOFTWARE_INTERRUPT_VECTOR,
            ExceptionType::PrefetchAbort => PREFETCH_ABORT_VECTOR,
            ExceptionType::DataAbort => DATA_ABORT_VECTOR,
            ExceptionType::InterruptRequest => INTERRUPT_REQUEST_VECTOR,
            ExceptionType::FastInterruptRequest => FAST_INTERRUPT_REQUEST_VECTOR,
        }
    }

    pub(crate) fn undefined_instruction(&self, opcode: u32) -> CpuError {
        CpuError::UndefinedInstruction {
            opcode,
            address: self.fetch_address(),
            state: self.get_instruction_mode(),
        }
    }

    pub(crate) fn unpredictable_instruction(&self, opcode: u32, reason: &'static str) -> CpuError {
        CpuError::UnpredictableInstruction {
            opcode,
            address: self.fetch_address(),
            reason,
        }
    }
}

impl Cpu {
    pub fn evaluate_instruction_condition(&self, condition: InstructionCondition) -> bool {
        match condition {
            InstructionCondition::Equal => self.get_zero_flag(),
            InstructionCondition::NotEqual => !self.get_zero_flag(),
            InstructionCondition::UnsignedHigherOrSame => self.get_carry_flag(),
            InstructionCondition::UnsignedLower => !self.get_carry_flag(),
            InstructionCondition::SignedNegative => self.get_sign_flag(),
            InstructionCondition::SignedPositiveOrZero => !self.get_sign_flag(),
            InstructionCondition::SignedOverflow => self.get_overflow_flag(),
            InstructionCondition::SignedNoOverflow => !self.get_overflow_flag(),
            InstructionCondition::UnsignedHigher => self.get_carry_flag() && !self.get_zero_flag(),
            InstructionCondition::UnsignedLowerOrSame => {
                !self.get_carry_flag() || self.get_zero_flag()
            }
            InstructionCondition::SignedGreaterOrEqual => {
                self.get_sign_flag() == self.get_overflow_flag()
            }
            InstructionCondition::SignedLessThan => {
                self.get_sign_flag() != self.get_overflow_flag()
            }
            InstructionCondition::SignedGreaterThan => {
                !self.get_zero_flag() && (self.get_sign_flag() == self.get_overflow_flag())
            }
            InstructionCondition::SignedLessOrEqual => {
                self.get_zero_flag() || (self.get_sign_flag() != self.get_overflow_flag())
            }
            InstructionCondition::Always => true,
            InstructionCondition::Never => false,
        }
    }
}

impl Cpu {
    const SIGN_FLAG_BIT_INDEX: usize = 31;
    const ZERO_FLAG_BIT_INDEX: usize = 30;
    const CARRY_FLAG_BIT_INDEX: usize = 29;
    const OVERFLOW_FLAG_BIT_INDEX: usize = 28;

    pub fn get_sign_flag(&self) -> bool {
        self.cpsr.get_bit(Self::SIGN_FLAG_BIT_INDEX)
    }

    fn set_sign_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::SIGN_FLAG_BIT_INDEX, set);
    }

    pub fn get_zero_flag(&self) -> bool {
        self.cpsr.get_bit(Self::ZERO_FLAG_BIT_INDEX)
    }

    fn set_zero_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::ZERO_FLAG_BIT_INDEX, set);
    }

    pub fn get_carry_flag(&self) -> bool {
        self.cpsr.get_bit(Self::CARRY_FLAG_BIT_INDEX)
    }

    fn set_carry_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::CARRY_FLAG_BIT_INDEX, set);
    }

    pub fn get_overflow_flag(&self) -> bool {
        self.cpsr.get_bit(Self::OVERFLOW_FLAG_BIT_INDEX)
    }

    fn set_overflow_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::OVERFLOW_FLAG_BIT_INDEX, set);
    }

    fn set_sign_and_zero_flags(&mut self, value: u32) {
        self.set_sign_flag(value.get_bit(31));
        self.set_zero_flag(value == 0);
    }

    const IRQ_DISABLE_BIT_OFFSET: usize = 7;
    const FIQ_DISABLE_BIT_OFFSET: usize = 6;
    const STATE_BIT_OFFSET: usize = 5;
    const MODE_BITS_RANGE: RangeInclusive<usize> = 0..=4;

    pub fn get_irq_disable(&self) -> bool {
        self.cpsr.get_bit(Self::IRQ_DISABLE_BIT_OFFSET)
    }

    pub fn get_fiq_disable(&self) -> bool {
        self.cpsr.get_bit(Self::FIQ_DISABLE_BIT_OFFSET)
    }

    pub fn get_instruction_mode(&self) -> InstructionSet {
        if self.cpsr.get_bit(Self::STATE_BIT_OFFSET) {
            InstructionSet::Thumb
        } else {
            InstructionSet::Arm
        }
    }

    fn set_instruction_mode(&mut self, state: InstructionSet) {
        self.cpsr = self
            .cpsr
            .set_bit(Self::STATE_BIT_OFFSET, state == InstructionSet::Thumb);
    }

    pub fn get_cpu_mode(&self) -> CpuMode {
        let bits = self.cpsr.get_bit_range(Self::MODE_BITS_RANGE);
        match CpuMode::from_bits(bits) {
            Some(mode) => mode,
            None => unreachable!("cpsr holds invalid mode bits 0b{:05b}", bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackPointers;
    use crate::testing::RamBus;

    fn cpu_with_flags(sign: bool, zero: bool, carry: bool, overflow: bool) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.set_sign_flag(sign);
        cpu.set_zero_flag(zero);
        cpu.set_carry_flag(carry);
        cpu.set_overflow_flag(overflow);
        cpu
    }

    #[test]
    fn condition_table_with_only_zero_set() {
        let cpu = cpu_with_flags(false, true, false, false);
        let expected = [
            (InstructionCondition::Equal, true),
            (InstructionCondition::NotEqual, false),
            (InstructionCondition::UnsignedHigherOrSame, false),
            (InstructionCondition::UnsignedLower, true),
            (InstructionCondition::SignedNegative, false),
            (InstructionCondition::SignedPositiveOrZero, true),
            (InstructionCondition::SignedOverflow, false),
            (InstructionCondition::SignedNoOverflow, true),
            (InstructionCondition::UnsignedHigher, false),
            (InstructionCondition::UnsignedLowerOrSame, true),
            (InstructionCondition::SignedGreaterOrEqual, true),
            (InstructionCondition::SignedLessThan, false),
            (InstructionCondition::SignedGreaterThan, false),
            (InstructionCondition::SignedLessOrEqual, true),
            (InstructionCondition::Always, true),
            (InstructionCondition::Never, false),
        ];

        for (code, (condition, result)) in expected.into_iter().enumerate() {
            assert_eq!(InstructionCondition::from_bits(code as u32), condition);
            assert_eq!(
                cpu.evaluate_instruction_condition(condition),
                result,
                "{condition:?}"
            );
        }
    }

    #[test]
    fn signed_conditions_follow_overflow() {
        let cpu = cpu_with_flags(true, false, true, true);
        assert!(cpu.evaluate_instruction_condition(InstructionCondition::SignedGreaterOrEqual));
        assert!(cpu.evaluate_instruction_condition(InstructionCondition::SignedGreaterThan));
        assert!(cpu.evaluate_instruction_condition(InstructionCondition::UnsignedHigher));

        let cpu = cpu_with_flags(true, false, false, false);
        assert!(cpu.evaluate_instruction_condition(InstructionCondition::SignedLessThan));
        assert!(cpu.evaluate_instruction_condition(InstructionCondition::SignedLessOrEqual));
    }

    #[test]
    fn reset_state() {
        let cpu = Cpu::new();
        assert_eq!(cpu.get_cpu_mode(), CpuMode::Supervisor);
        assert_eq!(cpu.get_instruction_mode(), InstructionSet::Arm);
        assert!(cpu.get_irq_disable());
        assert!(cpu.get_fiq_disable());
        assert_eq!(cpu.fetch_address(), 0);
        assert_eq!(cpu.read_register(Register::R15, |pc| pc), 8);
    }

    #[test]
    fn reset_ignores_boot_configuration() {
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0x0800_0000));
        cpu.write_register(0x55, Register::R0);

        cpu.reset();

        assert_eq!(cpu.get_cpu_mode(), CpuMode::Supervisor);
        assert_eq!(cpu.fetch_address(), 0);
        assert_eq!(cpu.read_register(Register::R0, |pc| pc), 0);
        assert_eq!(cpu.read_register(Register::R13, |pc| pc), 0);
    }

    #[test]
    fn config_stack_pointers_land_in_their_banks() {
        let config = CpuConfig {
            stack_pointers: StackPointers {
                user: 0x100,
                fiq: 0x200,
                irq: 0x300,
                supervisor: 0x400,
                abort: 0x500,
                undefined: 0x600,
            },
            ..CpuConfig::direct_boot(0x0800_0000)
        };
        let cpu = Cpu::from_config(&config);

        assert_eq!(cpu.get_cpu_mode(), CpuMode::System);
        assert_eq!(cpu.fetch_address(), 0x0800_0000);
        assert_eq!(cpu.read_register(Register::R13, |pc| pc), 0x100);
        assert_eq!(cpu.read_banked_register(CpuMode::Fiq, Register::R13), 0x200);
        assert_eq!(cpu.read_banked_register(CpuMode::Irq, Register::R13), 0x300);
        assert_eq!(
            cpu.read_banked_register(CpuMode::Supervisor, Register::R13),
            0x400
        );
        assert_eq!(cpu.read_banked_register(CpuMode::Abort, Register::R13), 0x500);
        assert_eq!(
            cpu.read_banked_register(CpuMode::Undefined, Register::R13),
            0x600
        );
    }

    #[test]
    fn banking_survives_mode_round_trip() {
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0));
        for index in 0..15 {
            cpu.write_register(index * 0x11, Register::from_index(index));
        }

        let system_cpsr = cpu.read_cpsr();
        cpu.write_cpsr(system_cpsr.set_bit_range(CpuMode::Fiq.bits(), 0..=4))
            .unwrap();
        assert_eq!(cpu.read_register(Register::R7, |pc| pc), 7 * 0x11);
        assert_eq!(cpu.read_register(Register::R8, |pc| pc), 0);
        cpu.write_register(0xF1F1, Register::R8);
        cpu.write_register(0xF1F2, Register::R13);
        assert_eq!(cpu.read_user_register(Register::R8, |pc| pc), 8 * 0x11);

        cpu.write_cpsr(system_cpsr.set_bit_range(CpuMode::Irq.bits(), 0..=4))
            .unwrap();
        assert_eq!(cpu.read_register(Register::R8, |pc| pc), 8 * 0x11);
        assert_eq!(cpu.read_register(Register::R13, |pc| pc), 0x0300_7FA0);
        cpu.write_register(0x1234, Register::R14);

        cpu.write_cpsr(system_cpsr).unwrap();
        for index in 0..15 {
            assert_eq!(
                cpu.read_register(Register::from_index(index), |pc| pc),
                index * 0x11
            );
        }
        assert_eq!(cpu.read_banked_register(CpuMode::Fiq, Register::R8), 0xF1F1);
        assert_eq!(cpu.read_banked_register(CpuMode::Fiq, Register::R13), 0xF1F2);
        assert_eq!(cpu.read_banked_register(CpuMode::Irq, Register::R14), 0x1234);
    }

    #[test]
    fn user_and_system_share_registers() {
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0));
        cpu.write_register(0xAAAA, Register::R13);

        let cpsr = cpu.read_cpsr();
        cpu.write_cpsr(cpsr.set_bit_range(CpuMode::User.bits(), 0..=4))
            .unwrap();

        assert_eq!(cpu.read_register(Register::R13, |pc| pc), 0xAAAA);
        assert_eq!(cpu.read_spsr(), None);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let mut cpu = Cpu::new();
        let cpsr = cpu.read_cpsr();

        let error = cpu.write_cpsr(cpsr.set_bit_range(0b00000, 0..=4)).unwrap_err();
        assert!(matches!(error, CpuError::InvalidMode { bits: 0 }));
        assert_eq!(cpu.get_cpu_mode(), CpuMode::Supervisor);
    }

    #[test]
    fn irq_entry_saves_state() {
        let mut bus = RamBus::new();
        let mut config = CpuConfig::direct_boot(0x100);
        config.state = InstructionSet::Thumb;
        let mut cpu = Cpu::from_config(&config);
        cpu.set_carry_flag(true);
        let old_cpsr = cpu.read_cpsr();

        assert!(cpu.request_interrupt(&mut bus, Interrupt::Irq).unwrap());

        assert_eq!(cpu.get_cpu_mode(), CpuMode::Irq);
        assert_eq!(cpu.get_instruction_mode(), InstructionSet::Arm);
        assert!(cpu.get_irq_disable());
        assert!(!cpu.get_fiq_disable());
        assert_eq!(cpu.read_spsr(), Some(old_cpsr));
        assert_eq!(cpu.read_register(Register::R14, |pc| pc), 0x104);
        assert_eq!(cpu.fetch_address(), 0x18);
        assert_eq!(bus.branches, vec![(0x18, InstructionSet::Arm)]);
    }

    #[test]
    fn masked_interrupt_is_not_taken() {
        let mut bus = RamBus::new();
        let mut cpu = Cpu::new();

        assert!(!cpu.request_interrupt(&mut bus, Interrupt::Irq).unwrap());
        assert!(!cpu.request_interrupt(&mut bus, Interrupt::Fiq).unwrap());
        assert_eq!(cpu.get_cpu_mode(), CpuMode::Supervisor);
        assert!(bus.branches.is_empty());
    }

    #[test]
    fn fiq_entry_masks_both_interrupts() {
        let mut bus = RamBus::new();
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0x200));

        cpu.raise_exception(&mut bus, ExceptionType::FastInterruptRequest)
            .unwrap();

        assert_eq!(cpu.get_cpu_mode(), CpuMode::Fiq);
        assert!(cpu.get_irq_disable());
        assert!(cpu.get_fiq_disable());
        assert_eq!(cpu.read_register(Register::R14, |pc| pc), 0x204);
        assert_eq!(cpu.fetch_address(), 0x1C);
    }

    #[test]
    fn display_lists_registers() {
        let cpu = Cpu::new();
        let dump = cpu.to_string();

        assert!(dump.contains("pc: 0x00000008"));
        assert!(dump.contains("Supervisor"));
    }
}
