use serde::{Deserialize, Serialize};

use crate::cpu::{CpuMode, InstructionSet};

/// Initial stack pointer of every register bank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackPointers {
    pub user: u32,
    pub fiq: u32,
    pub irq: u32,
    pub supervisor: u32,
    pub abort: u32,
    pub undefined: u32,
}

/// Power-on state of the processor.
///
/// The default is the hardware reset convention: Supervisor mode, ARM
/// state, both interrupt masks set and execution starting at address 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub entry_point: u32,
    pub mode: CpuMode,
    pub state: InstructionSet,
    pub irq_disabled: bool,
    pub fiq_disabled: bool,
    pub stack_pointers: StackPointers,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            entry_point: 0x0000_0000,
            mode: CpuMode::Supervisor,
            state: InstructionSet::Arm,
            irq_disabled: true,
            fiq_disabled: true,
            stack_pointers: StackPointers::default(),
        }
    }
}

impl CpuConfig {
    /// State left behind by the handheld's boot firmware, for starting
    /// directly at `entry_point` without running it.
    pub fn direct_boot(entry_point: u32) -> Self {
        Self {
            entry_point,
            mode: CpuMode::System,
            state: InstructionSet::Arm,
            irq_disabled: false,
            fiq_disabled: false,
            stack_pointers: StackPointers {
                user: 0x0300_7F00,
                irq: 0x0300_7FA0,
                supervisor: 0x0300_7FE0,
                ..StackPointers::default()
            },
        }
    }
}
