use crate::bit_manipulation::BitManipulation;
use crate::bus::Bus;
use crate::error::CpuError;

use super::{Cpu, Register};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OffsetModifierType {
    AddToBase,
    SubtractFromBase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SingleDataTransferIndexType {
    PreIndex { write_back: bool },
    PostIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SingleDataMemoryAccessSize {
    Byte,
    HalfWord,
    Word,
    SignedByte,
    SignedHalfWord,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SingleDataTransfer {
    pub load: bool,
    pub access_size: SingleDataMemoryAccessSize,
    pub base_register: Register,
    /// Value of the base, already adjusted for the PC quirks of the caller.
    pub base_address: u32,
    pub offset: u32,
    pub offset_modifier: OffsetModifierType,
    pub index_type: SingleDataTransferIndexType,
    /// Loading R15 may switch to Thumb through bit 0.
    pub exchange: bool,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockDataTransfer {
    pub load: bool,
    pub base_register: Register,
    pub register_list: u16,
    pub offset_modifier: OffsetModifierType,
    pub pre_index: bool,
    pub write_back: bool,
    /// The `^` suffix: user bank access, or CPSR restore when loading R15.
    pub psr_or_user_bank: bool,
}

impl Cpu {
    fn load_with_size(
        &mut self,
        bus: &mut dyn Bus,
        address: u32,
        access_size: SingleDataMemoryAccessSize,
    ) -> Result<u32, CpuError> {
        let value = match access_size {
            SingleDataMemoryAccessSize::Byte => u32::from(bus.read_byte(address)?),
            SingleDataMemoryAccessSize::HalfWord => {
                // misaligned halfwords come back rotated
                let rotate = (address & 0b1) * 8;
                u32::from(bus.read_halfword(address & !0b1)?).rotate_right(rotate)
            }
            SingleDataMemoryAccessSize::Word => {
                let rotate = (address & 0b11) * 8;
                bus.read_word(address & !0b11)?.rotate_right(rotate)
            }
            SingleDataMemoryAccessSize::SignedByte => u32::from(bus.read_byte(address)?).sign_extend(8),
            SingleDataMemoryAccessSize::SignedHalfWord => {
                // a misaligned signed halfword load reads only the addressed byte
                if address.get_bit(0) {
                    u32::from(bus.read_byte(address)?).sign_extend(8)
                } else {
                    bus.read_halfword(address)?.sign_extend(16)
                }
            }
        };

        Ok(value)
    }

    fn store_with_size(
        &mut self,
        bus: &mut dyn Bus,
        address: u32,
        value: u32,
        access_size: SingleDataMemoryAccessSize,
    ) -> Result<(), CpuError> {
        match access_size {
            SingleDataMemoryAccessSize::Byte => bus.write_byte(address, value as u8)?,
            SingleDataMemoryAccessSize::HalfWord => {
                bus.write_halfword(address & !0b1, value as u16)?
            }
            SingleDataMemoryAccessSize::Word => bus.write_word(address & !0b11, value)?,
            SingleDataMemoryAccessSize::SignedByte | SingleDataMemoryAccessSize::SignedHalfWord => {
                unreachable!("signed stores are decoded as undefined instructions")
            }
        }

        Ok(())
    }

    /// LDR/STR and their halfword and signed forms, for both states.
    pub(crate) fn execute_single_data_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
        transfer: SingleDataTransfer,
        register: Register,
    ) -> Result<(), CpuError> {
        let offset_address = match transfer.offset_modifier {
            OffsetModifierType::AddToBase => transfer.base_address.wrapping_add(transfer.offset),
            OffsetModifierType::SubtractFromBase => {
                transfer.base_address.wrapping_sub(transfer.offset)
            }
        };

        let (address, write_back) = match transfer.index_type {
            SingleDataTransferIndexType::PreIndex { write_back } => (offset_address, write_back),
            // post index always has write-back
            SingleDataTransferIndexType::PostIndex => (transfer.base_address, true),
        };

        if write_back && transfer.base_register == Register::R15 {
            return Err(self.unpredictable_instruction(opcode, "write-back to the program counter"));
        }

        if transfer.load {
            let value = self.load_with_size(bus, address, transfer.access_size)?;
            bus.charge_cycles(1);

            // the loaded value wins over the written back base
            if write_back && transfer.base_register != register {
                self.write_register(offset_address, transfer.base_register);
            }

            if register == Register::R15 && transfer.exchange {
                self.branch_exchange(bus, value);
            } else {
                self.write_register_or_branch(bus, value, register);
            }
        } else {
            // "including R15=PC+12"
            let value = self.read_register(register, |pc| pc.wrapping_add(4));
            self.store_with_size(bus, address, value, transfer.access_size)?;

            if write_back {
                self.write_register(offset_address, transfer.base_register);
            }
        }

        Ok(())
    }

    /// LDM/STM, PUSH/POP and LDMIA/STMIA.
    pub(crate) fn execute_block_data_transfer(
        &mut self,
        bus: &mut dyn Bus,
        opcode: u32,
        transfer: BlockDataTransfer,
    ) -> Result<(), CpuError> {
        if transfer.register_list == 0 {
            return Err(self.unpredictable_instruction(opcode, "empty register list"));
        }

        if transfer.write_back && transfer.base_register == Register::R15 {
            return Err(self.unpredictable_instruction(opcode, "write-back to the program counter"));
        }

        let loads_pc = transfer.load && transfer.register_list.get_bit(15);
        if loads_pc && transfer.psr_or_user_bank {
            self.check_spsr_restore()?;
        }

        let transfer_size = 4 * transfer.register_list.count_ones();
        let base_address = self.read_register(transfer.base_register, |pc| pc);

        // Memory is always walked upwards from the lowest address, so for
        // decrementing transfers pre and post indexing swap meaning.
        let (lowest_address, final_address) = match transfer.offset_modifier {
            OffsetModifierType::AddToBase => {
                (base_address, base_address.wrapping_add(transfer_size))
            }
            OffsetModifierType::SubtractFromBase => {
                let lowest = base_address.wrapping_sub(transfer_size);
                (lowest, lowest)
            }
        };
        let skip_first_slot = match transfer.offset_modifier {
            OffsetModifierType::AddToBase => transfer.pre_index,
            OffsetModifierType::SubtractFromBase => !transfer.pre_index,
        };
        let mut address = if skip_first_slot {
            lowest_address.wrapping_add(4)
        } else {
            lowest_address
        };

        let base_in_list = transfer
            .register_list
            .get_bit(transfer.base_register.index());
        let user_bank = transfer.psr_or_user_bank && !loads_pc;

        let registers = (0..16)
            .filter(|&index| transfer.register_list.get_bit(index as usize))
            .map(Register::from_index);

        if transfer.load {
            let mut loaded_pc = None;

            for register in registers {
                let value = bus.read_word(address & !0b11)?;
                address = address.wrapping_add(4);

                if register == Register::R15 {
                    loaded_pc = Some(value);
                } else if user_bank {
                    self.write_user_register(value, register);
                } else {
                    self.write_register(value, register);
                }
            }

            bus.charge_cycles(1);

            if transfer.write_back && !base_in_list {
                self.write_register(final_address, transfer.base_register);
            }

            if let Some(pc) = loaded_pc {
                if transfer.psr_or_user_bank {
                    self.restore_cpsr_from_spsr()?;
                }
                self.branch_to(bus, pc);
            }
        } else {
            let lowest_register = transfer.register_list.trailing_zeros() as usize;

            for register in registers {
                let value = if register == transfer.base_register && transfer.write_back {
                    // the base is stored before it is written back only in the first slot
                    if register.index() == lowest_register {
                        base_address
                    } else {
                        final_address
                    }
                } else if user_bank {
                    self.read_user_register(register, |pc| pc.wrapping_add(4))
                } else {
                    self.read_register(register, |pc| pc.wrapping_add(4))
                };

                bus.write_word(address & !0b11, value)?;
                address = address.wrapping_add(4);
            }

            if transfer.write_back {
                self.write_register(final_address, transfer.base_register);
            }
        }

        Ok(())
    }

    /// SWP/SWPB.
    pub(crate) fn execute_single_data_swap(
        &mut self,
        bus: &mut dyn Bus,
        byte: bool,
        base_register: Register,
        destination_register: Register,
        source_register: Register,
    ) -> Result<(), CpuError> {
        let address = self.read_register(base_register, |pc| pc);
        let source_value = self.read_register(source_register, |pc| pc);

        let old_value = if byte {
            let old_value = bus.read_byte(address)?;
            bus.write_byte(address, source_value as u8)?;
            u32::from(old_value)
        } else {
            let rotate = (address & 0b11) * 8;
            let old_value = bus.read_word(address & !0b11)?.rotate_right(rotate);
            bus.write_word(address & !0b11, source_value)?;
            old_value
        };

        bus.charge_cycles(1);
        self.write_register_or_branch(bus, old_value, destination_register);

        Ok(())
    }
}
