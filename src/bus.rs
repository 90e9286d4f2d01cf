use anyhow::Result;

use crate::cpu::InstructionSet;

/// Memory and timing collaborator supplied by the enclosing emulator.
///
/// Addresses are passed through as computed by the core. Word accesses are
/// always 4-byte aligned and halfword accesses 2-byte aligned by the time
/// they reach the bus; any rotation of misaligned loads happens in the core.
pub trait Bus {
    fn read_byte(&mut self, address: u32) -> Result<u8>;

    fn read_halfword(&mut self, address: u32) -> Result<u16>;

    fn read_word(&mut self, address: u32) -> Result<u32>;

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()>;

    fn write_halfword(&mut self, address: u32, value: u16) -> Result<()>;

    fn write_word(&mut self, address: u32, value: u32) -> Result<()>;

    /// Charges cycles spent inside the core: one per executed (or skipped)
    /// instruction, internal cycles of shifts, loads and multiplies, and two
    /// for every pipeline refill.
    fn charge_cycles(&mut self, cycles: u32);

    /// Called whenever the program counter changes discontinuously. `target`
    /// is the address of the next instruction to fetch in `state`.
    fn branch_notify(&mut self, _target: u32, _state: InstructionSet) {}
}
