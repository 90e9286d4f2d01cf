mod bit_manipulation;
mod bus;
mod config;
mod cpu;
mod error;
#[cfg(test)]
mod testing;

pub use bus::Bus;
pub use config::{CpuConfig, StackPointers};
pub use cpu::arm::{decode_arm, ArmInstructionKind};
pub use cpu::thumb::{decode_thumb, ThumbInstructionKind};
pub use cpu::Cpu;
pub use cpu::{disassemble_arm, disassemble_thumb};
pub use cpu::CpuMode;
pub use cpu::ExceptionType;
pub use cpu::InstructionCondition;
pub use cpu::InstructionSet;
pub use cpu::Interrupt;
pub use cpu::Register;
pub use cpu::{AluOperation, ShiftType};
pub use error::CpuError;

/// Hash over every register bank, the SPSRs and the CPSR. Two processors
/// with the same checksum continue identically on the same bus.
pub fn calculate_register_checksum(cpu: &Cpu) -> u64 {
    use std::hash::Hasher;
    use xxhash_rust::xxh3::Xxh3;

    let mut hasher = Xxh3::default();

    for word in cpu.state_words() {
        hasher.write_u32(word);
    }

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RamBus;

    const SUM_LOOP: [u32; 6] = [
        0xE3A0_0000, // mov r0, #0
        0xE3A0_100A, // mov r1, #10
        0xE080_0001, // add r0, r0, r1
        0xE251_1001, // subs r1, r1, #1
        0x1AFF_FFFC, // bne 0x08
        0xEAFF_FFFE, // b .
    ];

    fn run_until(cpu: &mut Cpu, bus: &mut RamBus, address: u32) {
        for _ in 0..10_000 {
            if cpu.fetch_address() == address {
                return;
            }
            cpu.fetch_decode_execute(bus).unwrap();
        }
        panic!("never reached 0x{address:08X}");
    }

    #[test]
    fn arm_loop_sums_and_counts_cycles() {
        let mut bus = RamBus::new();
        bus.load_words(0, &SUM_LOOP);
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0));

        run_until(&mut cpu, &mut bus, 0x14);

        assert_eq!(cpu.read_register(Register::R0, |pc| pc), 55);
        assert_eq!(cpu.read_register(Register::R1, |pc| pc), 0);
        assert!(cpu.get_zero_flag());
        // two movs, ten add/subs pairs, nine taken and one untaken bne
        assert_eq!(bus.cycles, 2 + 10 * 2 + 9 * 3 + 1);
        assert_eq!(bus.branches.len(), 9);
    }

    #[test]
    fn branch_exchange_round_trip() {
        let mut bus = RamBus::new();
        bus.load_words(
            0,
            &[
                0xE28F_0009, // add r0, pc, #9
                0xE12F_FF10, // bx r0
            ],
        );
        bus.load_halfwords(
            0x10,
            &[
                0x2120, // mov r1, #0x20
                0x4708, // bx r1
            ],
        );
        bus.load_words(0x20, &[0xEAFF_FFFE]);
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0));

        cpu.fetch_decode_execute(&mut bus).unwrap();
        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_eq!(cpu.get_instruction_mode(), InstructionSet::Thumb);
        assert_eq!(cpu.fetch_address(), 0x10);
        assert_eq!(cpu.read_register(Register::R15, |pc| pc), 0x14);

        cpu.fetch_decode_execute(&mut bus).unwrap();
        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_eq!(cpu.get_instruction_mode(), InstructionSet::Arm);
        assert_eq!(cpu.fetch_address(), 0x20);
        assert_eq!(cpu.read_register(Register::R15, |pc| pc), 0x28);

        assert_eq!(
            bus.branches,
            vec![(0x10, InstructionSet::Thumb), (0x20, InstructionSet::Arm)]
        );
    }

    #[test]
    fn software_interrupt_returns_with_movs() {
        let mut bus = RamBus::new();
        bus.load_words(0x08, &[0xE1B0_F00E]); // movs pc, lr
        bus.load_words(
            0x100,
            &[
                0xEF00_0012, // swi 0x12
                0xE3A0_0001, // mov r0, #1
                0xEAFF_FFFE, // b .
            ],
        );
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0x100));
        cpu.write_register(0x0300_0000, Register::R14);

        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_eq!(cpu.get_cpu_mode(), CpuMode::Supervisor);
        assert_eq!(cpu.fetch_address(), 0x08);

        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_eq!(cpu.get_cpu_mode(), CpuMode::System);
        assert_eq!(cpu.fetch_address(), 0x104);
        assert_eq!(cpu.read_register(Register::R14, |pc| pc), 0x0300_0000);

        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_eq!(cpu.read_register(Register::R0, |pc| pc), 1);
        assert_eq!(cpu.fetch_address(), 0x108);
    }

    #[test]
    fn fetch_outside_memory_surfaces_bus_error() {
        let mut bus = RamBus::new();
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0x0800_0000));

        let error = cpu.fetch_decode_execute(&mut bus).unwrap_err();

        assert!(matches!(error, CpuError::Bus(_)));
    }

    #[test]
    fn snapshot_resumes_identically() {
        let mut bus = RamBus::new();
        bus.load_words(0, &SUM_LOOP);
        let mut cpu = Cpu::from_config(&CpuConfig::direct_boot(0));

        for _ in 0..7 {
            cpu.fetch_decode_execute(&mut bus).unwrap();
        }

        let snapshot = serde_json::to_string(&cpu).unwrap();
        let mut restored: Cpu = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(
            calculate_register_checksum(&cpu),
            calculate_register_checksum(&restored)
        );

        let mut restored_bus = RamBus::new();
        restored_bus.load_words(0, &SUM_LOOP);
        run_until(&mut cpu, &mut bus, 0x14);
        run_until(&mut restored, &mut restored_bus, 0x14);

        assert_eq!(
            calculate_register_checksum(&cpu),
            calculate_register_checksum(&restored)
        );
        assert_eq!(restored.read_register(Register::R0, |pc| pc), 55);
    }

    #[test]
    fn snapshot_with_invalid_mode_is_rejected() {
        let cpu = Cpu::from_config(&CpuConfig::direct_boot(0));
        let mut snapshot = serde_json::to_value(&cpu).unwrap();
        snapshot["cpsr"] = serde_json::json!(0x0000_0000u32);

        let error = serde_json::from_value::<Cpu>(snapshot).unwrap_err();

        assert!(error.to_string().contains("invalid processor mode"));
    }

    #[test]
    fn checksum_tracks_state() {
        let mut bus = RamBus::new();
        bus.load_words(0, &SUM_LOOP);
        let mut cpu = Cpu::new();
        let initial = calculate_register_checksum(&cpu);

        assert_eq!(initial, calculate_register_checksum(&Cpu::new()));

        cpu.fetch_decode_execute(&mut bus).unwrap();
        assert_ne!(initial, calculate_register_checksum(&cpu));

        cpu.reset();
        assert_eq!(initial, calculate_register_checksum(&cpu));
    }
}
