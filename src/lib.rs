//! # Altair 8800 Emulator
//!
//! An Intel 8080 processor and the front panel of the Altair 8800 that
//! hosts it, with a small HTTP service for driving machines remotely.
//!
//! ## Features
//!
//! - 8080 instruction engine: a fixed-opcode pass, then bit-field decoding
//!   of the general MOV, ALU, register-pair and conditional forms
//! - Flag handling for every arithmetic and logic operation
//! - Stack, subroutine and restart instructions with wrapping 16-bit addressing
//! - An execution controller with single step, cooperative run, stop, reset
//!   and clear, plus a redraw callback for displays
//! - Front-panel switches and lamps, memory examine/deposit
//! - Raw binary program load and save
//!
//! ## Example
//!
//! ```rust
//! use altair8800::controller::Controller;
//! use altair8800::cpu::{Reg, StepOutcome};
//!
//! let mut controller = Controller::new();
//!
//! // MVI A,$05; ADI $03; HLT
//! controller.load_program(&[0x3E, 0x05, 0xC6, 0x03, 0x76], 0).unwrap();
//!
//! controller.step().unwrap();
//! controller.step().unwrap();
//! assert_eq!(controller.cpu().reg(Reg::A), 0x08);
//! assert_eq!(controller.step(), Ok(StepOutcome::Halted));
//! ```

#![recursion_limit = "2048"]

pub mod alu;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod decode;
pub mod front_panel;
pub mod memory;
pub mod metrics;
pub mod program;
pub mod scheduler;
pub mod server;
pub mod status;

pub use controller::{ControlError, Controller, RunState};
pub use cpu::{Cpu, StepOutcome};
pub use front_panel::FrontPanel;
pub use memory::Memory;
