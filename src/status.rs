//! Read-only views of a machine for display: a serializable snapshot and the
//! text rendering of the system information panel.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::controller::Controller;
use crate::cpu::Reg;
use crate::decode::mnemonic;
use crate::memory::Memory;

const REGISTER_NAMES: [(&str, Reg); 7] = [
    ("A", Reg::A),
    ("B", Reg::B),
    ("C", Reg::C),
    ("D", Reg::D),
    ("E", Reg::E),
    ("H", Reg::H),
    ("L", Reg::L),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagState {
    pub zero: bool,
    pub sign: bool,
    pub parity: bool,
    pub carry: bool,
    pub auxiliary_carry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    pub pc: u16,
    pub sp: u16,
    pub registers: BTreeMap<String, u8>,
    pub flags: FlagState,
    pub interrupts_enabled: bool,
    pub running: bool,
    pub cycles: u64,
    /// Mnemonic of the byte under the program counter.
    pub next_instruction: &'static str,
}

impl MachineStatus {
    pub fn capture(controller: &Controller) -> Self {
        let cpu = controller.cpu();
        let registers = REGISTER_NAMES
            .iter()
            .map(|(name, reg)| (name.to_string(), cpu.reg(*reg)))
            .collect();

        MachineStatus {
            pc: cpu.get_pc(),
            sp: cpu.get_sp(),
            registers,
            flags: FlagState {
                zero: cpu.zero(),
                sign: cpu.sign(),
                parity: cpu.parity(),
                carry: cpu.carry(),
                auxiliary_carry: cpu.auxiliary_carry(),
            },
            interrupts_enabled: cpu.interrupts_enabled,
            running: controller.is_running(),
            cycles: controller.cycles(),
            next_instruction: mnemonic(controller.read_at_cursor()),
        }
    }

    fn register(&self, name: &str) -> u8 {
        self.registers.get(name).copied().unwrap_or(0)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PC:{:04X} SP:{:04X}", self.pc, self.sp)?;
        writeln!(
            f,
            "B:{:02X} C:{:02X} D:{:02X} E:{:02X}",
            self.register("B"),
            self.register("C"),
            self.register("D"),
            self.register("E")
        )?;
        writeln!(
            f,
            "H:{:02X} L:{:02X} A:{:02X}",
            self.register("H"),
            self.register("L"),
            self.register("A")
        )?;
        write!(
            f,
            "Z:{} S:{} P:{} C:{} AC:{}",
            self.flags.zero as u8,
            self.flags.sign as u8,
            self.flags.parity as u8,
            self.flags.carry as u8,
            self.flags.auxiliary_carry as u8
        )
    }
}

/// Hex dump of `length` bytes from `address`, eight bytes per line.
pub fn memory_map(memory: &Memory, address: u16, length: usize) -> Vec<String> {
    memory
        .read_range(address, length)
        .chunks(8)
        .enumerate()
        .map(|(row, bytes)| {
            let start = address.wrapping_add((row * 8) as u16);
            let cells: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("{:04X}: {}", start, cells.join(" "))
        })
        .collect()
}
