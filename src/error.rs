use thiserror::Error;

use crate::cpu::InstructionSet;

/// Stop conditions surfaced by the core. None of them is recovered locally.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("undefined {state:?} instruction 0x{opcode:08X} at 0x{address:08X}")]
    UndefinedInstruction {
        opcode: u32,
        address: u32,
        state: InstructionSet,
    },

    #[error("unpredictable instruction 0x{opcode:08X} at 0x{address:08X}: {reason}")]
    UnpredictableInstruction {
        opcode: u32,
        address: u32,
        reason: &'static str,
    },

    #[error("invalid processor mode bits 0b{bits:05b}")]
    InvalidMode { bits: u32 },

    #[error(transparent)]
    Bus(#[from] anyhow::Error),
}
