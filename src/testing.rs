use anyhow::{bail, Result};

use crate::bus::Bus;
use crate::cpu::InstructionSet;

const RAM_SIZE: usize = 64 * 1024;

/// Flat little-endian RAM at address 0 that records timing and refills.
pub struct RamBus {
    memory: Vec<u8>,
    pub cycles: u64,
    pub branches: Vec<(u32, InstructionSet)>,
}

impl RamBus {
    pub fn new() -> Self {
        Self {
            memory: vec![0; RAM_SIZE],
            cycles: 0,
            branches: Vec::new(),
        }
    }

    pub fn load_words(&mut self, address: u32, words: &[u32]) {
        for (index, word) in words.iter().enumerate() {
            let start = address as usize + index * 4;
            self.memory[start..start + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn load_halfwords(&mut self, address: u32, halfwords: &[u16]) {
        for (index, halfword) in halfwords.iter().enumerate() {
            let start = address as usize + index * 2;
            self.memory[start..start + 2].copy_from_slice(&halfword.to_le_bytes());
        }
    }

    pub fn peek_word(&self, address: u32) -> u32 {
        let start = address as usize;
        u32::from_le_bytes([
            self.memory[start],
            self.memory[start + 1],
            self.memory[start + 2],
            self.memory[start + 3],
        ])
    }

    fn slice(&mut self, address: u32, width: usize) -> Result<&mut [u8]> {
        let start = address as usize;
        match self.memory.get_mut(start..start + width) {
            Some(bytes) => Ok(bytes),
            None => bail!("access of {} bytes at 0x{:08X} is out of range", width, address),
        }
    }
}

impl Default for RamBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for RamBus {
    fn read_byte(&mut self, address: u32) -> Result<u8> {
        Ok(self.slice(address, 1)?[0])
    }

    fn read_halfword(&mut self, address: u32) -> Result<u16> {
        let bytes = self.slice(address, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_word(&mut self, address: u32) -> Result<u32> {
        let bytes = self.slice(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()> {
        self.slice(address, 1)?[0] = value;
        Ok(())
    }

    fn write_halfword(&mut self, address: u32, value: u16) -> Result<()> {
        self.slice(address, 2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_word(&mut self, address: u32, value: u32) -> Result<()> {
        self.slice(address, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn charge_cycles(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
    }

    fn branch_notify(&mut self, target: u32, state: InstructionSet) {
        self.branches.push((target, state));
    }
}
