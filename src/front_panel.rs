//! Front panel: a memory cursor over the program counter, and the switch
//! and lamp model of the Altair 8800 panel.
//!
//! Cursor operations bypass the instruction engine entirely. They are meant
//! to be used while the controller is stopped; the switch model enforces
//! that for examine and deposit.

use serde::Serialize;
use std::str::FromStr;

use crate::controller::{ControlError, Controller};

/// Lamp labels in panel order.
pub const LAMP_NAMES: [&str; 36] = [
    "INTE", "PROT", "MEMR", "INP", "MI", "OUT", "HLTA", "STACK", "WO", "INT",
    "D7", "D6", "D5", "D4", "D3", "D2", "D1", "D0",
    "WAIT", "HLDA",
    "A15", "A14", "A13", "A12", "A11", "A10", "A9", "A8",
    "A7", "A6", "A5", "A4", "A3", "A2", "A1", "A0",
];

impl Controller {
    /// Advances the cursor by one, wrapping at the top of memory.
    pub fn examine_next(&mut self) {
        let cpu = self.cpu_mut();
        cpu.pc = cpu.pc.wrapping_add(1);
    }

    /// Moves the cursor to `address`.
    pub fn examine(&mut self, address: u16) {
        self.cpu_mut().pc = address;
    }

    pub fn cursor(&self) -> u16 {
        self.cpu().pc
    }

    pub fn read_at_cursor(&self) -> u8 {
        self.memory().read(self.cursor())
    }

    pub fn write_at_cursor(&mut self, value: u8) {
        let cursor = self.cursor();
        self.memory_mut().write(cursor, value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSwitch {
    StopRun,
    SingleStep,
    Examine,
    Deposit,
    ResetClear,
}

impl FromStr for ControlSwitch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STOP_RUN" => Ok(ControlSwitch::StopRun),
            "SINGLE_STEP" => Ok(ControlSwitch::SingleStep),
            "EXAMINE" => Ok(ControlSwitch::Examine),
            "DEPOSIT" => Ok(ControlSwitch::Deposit),
            "RESET_CLR" => Ok(ControlSwitch::ResetClear),
            _ => Err(s.to_string()),
        }
    }
}

/// Momentary positions of a control switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Up,
    Down,
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Position::Up),
            "down" => Ok(Position::Down),
            _ => Err(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontPanel {
    address_switches: u16,
}

impl FrontPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address_switches(&self) -> u16 {
        self.address_switches
    }

    /// The data switches are the low eight address switches.
    pub fn data_switches(&self) -> u8 {
        (self.address_switches & 0xFF) as u8
    }

    pub fn set_address_switches(&mut self, value: u16) {
        self.address_switches = value;
    }

    /// Flips address switch `bit` (0 = A0). Returns the new switch position.
    pub fn toggle_address_switch(&mut self, bit: u8) -> bool {
        let mask = 1u16 << (bit & 0x0F);
        self.address_switches ^= mask;
        self.address_switches & mask != 0
    }

    pub fn actuate(
        &self,
        controller: &mut Controller,
        switch: ControlSwitch,
        position: Position,
    ) -> Result<(), ControlError> {
        match (switch, position) {
            (ControlSwitch::Examine, _) | (ControlSwitch::Deposit, _) if controller.is_running() => {
                Err(ControlError::Running(match switch {
                    ControlSwitch::Examine => "examine",
                    _ => "deposit",
                }))
            }
            (ControlSwitch::Examine, Position::Up) => {
                controller.examine(self.address_switches);
                Ok(())
            }
            (ControlSwitch::Examine, Position::Down) => {
                controller.examine_next();
                Ok(())
            }
            (ControlSwitch::Deposit, Position::Up) => {
                controller.write_at_cursor(self.data_switches());
                Ok(())
            }
            (ControlSwitch::Deposit, Position::Down) => {
                controller.examine_next();
                controller.write_at_cursor(self.data_switches());
                Ok(())
            }
            (ControlSwitch::SingleStep, _) => controller.step().map(|_| ()),
            (ControlSwitch::StopRun, Position::Up) => {
                controller.stop();
                Ok(())
            }
            (ControlSwitch::StopRun, Position::Down) => {
                controller.run();
                Ok(())
            }
            (ControlSwitch::ResetClear, Position::Up) => controller.reset(),
            (ControlSwitch::ResetClear, Position::Down) => controller.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lamps {
    pub address: u16,
    pub data: u8,
    pub wait: bool,
    pub inte: bool,
}

impl Lamps {
    pub fn read(controller: &Controller) -> Self {
        Lamps {
            address: controller.cursor(),
            data: controller.read_at_cursor(),
            wait: !controller.is_running(),
            inte: controller.cpu().interrupts_enabled,
        }
    }

    /// Lamp state by panel label; `None` for unknown labels. Lamps the
    /// emulator does not drive read as dark.
    pub fn is_lit(&self, name: &str) -> Option<bool> {
        if !LAMP_NAMES.contains(&name) {
            return None;
        }
        let bit = |label: &str, prefix: char| label.strip_prefix(prefix).and_then(|n| n.parse::<u8>().ok());
        let lit = match name {
            "WAIT" => self.wait,
            "INTE" => self.inte,
            _ => match (bit(name, 'A'), bit(name, 'D')) {
                (Some(n), _) => self.address >> n & 1 == 1,
                (_, Some(n)) => self.data >> n & 1 == 1,
                _ => false,
            },
        };
        Some(lit)
    }

    /// Labels of every lit lamp, in panel order.
    pub fn lit(&self) -> Vec<&'static str> {
        LAMP_NAMES
            .iter()
            .copied()
            .filter(|name| self.is_lit(name) == Some(true))
            .collect()
    }
}
