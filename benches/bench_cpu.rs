use anyhow::{bail, Result};
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use arm7tdmi_core::{Bus, Cpu, CpuConfig, InstructionSet};

const ARM_LOOP: [u32; 6] = [
    0xE3A0_0000, // mov r0, #0
    0xE3A0_10C8, // mov r1, #200
    0xE080_0001, // add r0, r0, r1
    0xE251_1001, // subs r1, r1, #1
    0x1AFF_FFFC, // bne 0x08
    0xEAFF_FFF9, // b 0x00
];

const THUMB_LOOP: [u16; 6] = [
    0x2000, // mov r0, #0
    0x21C8, // mov r1, #200
    0x1840, // add r0, r0, r1
    0x3901, // sub r1, #1
    0xD1FC, // bne 0x04
    0xE7F9, // b 0x00
];

struct FlatBus {
    memory: Vec<u8>,
    cycles: u64,
}

impl FlatBus {
    fn with_program(program: &[u8]) -> Self {
        let mut memory = vec![0; 0x1000];
        memory[..program.len()].copy_from_slice(program);
        Self { memory, cycles: 0 }
    }

    fn bytes<const N: usize>(&self, address: u32) -> Result<[u8; N]> {
        let start = address as usize;
        match self.memory.get(start..start + N) {
            Some(bytes) => {
                let mut buffer = [0; N];
                buffer.copy_from_slice(bytes);
                Ok(buffer)
            }
            None => bail!("address 0x{:08X} is out of range", address),
        }
    }

    fn store<const N: usize>(&mut self, address: u32, bytes: [u8; N]) -> Result<()> {
        let start = address as usize;
        match self.memory.get_mut(start..start + N) {
            Some(slot) => {
                slot.copy_from_slice(&bytes);
                Ok(())
            }
            None => bail!("address 0x{:08X} is out of range", address),
        }
    }
}

impl Bus for FlatBus {
    fn read_byte(&mut self, address: u32) -> Result<u8> {
        Ok(self.bytes::<1>(address)?[0])
    }

    fn read_halfword(&mut self, address: u32) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(address)?))
    }

    fn read_word(&mut self, address: u32) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(address)?))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()> {
        self.store(address, [value])
    }

    fn write_halfword(&mut self, address: u32, value: u16) -> Result<()> {
        self.store(address, value.to_le_bytes())
    }

    fn write_word(&mut self, address: u32, value: u32) -> Result<()> {
        self.store(address, value.to_le_bytes())
    }

    fn charge_cycles(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
    }
}

fn bench_loop(c: &mut Criterion, name: &str, program: Vec<u8>, state: InstructionSet) {
    let mut group = c.benchmark_group(name);

    for num_steps in [1, 32, 1024, 32_768] {
        group.throughput(Throughput::Elements(num_steps));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_steps),
            &program,
            |b, program| {
                b.iter_batched_ref(
                    || {
                        let mut config = CpuConfig::direct_boot(0);
                        config.state = state;
                        (Cpu::from_config(&config), FlatBus::with_program(program))
                    },
                    |(cpu, bus)| {
                        for _ in 0..num_steps {
                            cpu.fetch_decode_execute(bus).unwrap();
                        }
                        black_box(bus.cycles);
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }
}

pub fn arm_step_benchmark(c: &mut Criterion) {
    let program = ARM_LOOP.iter().flat_map(|word| word.to_le_bytes()).collect();
    bench_loop(c, "CPU ARM loop", program, InstructionSet::Arm);
}

pub fn thumb_step_benchmark(c: &mut Criterion) {
    let program = THUMB_LOOP
        .iter()
        .flat_map(|halfword| halfword.to_le_bytes())
        .collect();
    bench_loop(c, "CPU Thumb loop", program, InstructionSet::Thumb);
}

criterion_group!(cpu, arm_step_benchmark, thumb_step_benchmark);
criterion_main!(cpu);
