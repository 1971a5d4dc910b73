//! Execution control: single step, continuous run, stop, reset and clear.
//!
//! The controller owns the processor and its memory. Continuous running is
//! cooperative: [`Controller::run`] only flips the state, and whoever drives
//! the machine calls [`Controller::tick`] once per scheduling slot until it
//! reports that the machine has stopped (see [`crate::scheduler`]).

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::cpu::{Cpu, StepOutcome};
use crate::memory::Memory;
use crate::metrics::record_transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0} is not permitted while the machine is running")]
    Running(&'static str),
}

pub type RedrawCallback = Box<dyn FnMut() + Send + 'static>;

pub struct Controller {
    cpu: Cpu,
    memory: Memory,
    state: RunState,
    cycles: u64,
    // set while a run loop owns this machine
    driven: bool,
    redraw: RedrawCallback,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            cpu: Cpu::new(),
            memory: Memory::new(),
            state: RunState::Stopped,
            cycles: 0,
            driven: false,
            redraw: Box::new(|| {}),
        }
    }

    /// Replaces the hook invoked after every state-changing operation.
    pub fn set_redraw_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.redraw = Box::new(callback);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Instructions executed since the machine was created.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn ensure_stopped(&self, operation: &'static str) -> Result<(), ControlError> {
        if self.is_running() {
            return Err(ControlError::Running(operation));
        }
        Ok(())
    }

    fn notify(&mut self) {
        (self.redraw)();
    }

    fn execute(&mut self) -> StepOutcome {
        let outcome = self.cpu.step(&mut self.memory);
        self.cycles += 1;
        outcome
    }

    /// Executes exactly one instruction. Only permitted while stopped.
    pub fn step(&mut self) -> Result<StepOutcome, ControlError> {
        self.ensure_stopped("step")?;
        let outcome = self.execute();
        if outcome == StepOutcome::Halted {
            debug!(pc = self.cpu.pc, "halted under single step");
        }
        self.notify();
        Ok(outcome)
    }

    /// Enters the running state. Instructions are executed by [`Controller::tick`].
    pub fn run(&mut self) {
        if self.is_running() {
            return;
        }
        debug!(pc = self.cpu.pc, "run");
        record_transition("run");
        self.state = RunState::Running;
    }

    /// One slot of the run loop: executes a single instruction if running and
    /// reports whether the machine is still running afterwards.
    pub fn tick(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let outcome = self.execute();
        self.notify();
        if outcome == StepOutcome::Halted {
            debug!(pc = self.cpu.pc, "halted while running");
            self.stop();
        }
        self.is_running()
    }

    /// Leaves the running state. Always permitted; always notifies.
    pub fn stop(&mut self) {
        if self.is_running() {
            debug!(pc = self.cpu.pc, cycles = self.cycles, "stop");
        }
        record_transition("stop");
        self.state = RunState::Stopped;
        self.notify();
    }

    /// Zeroes the program counter; registers, memory and flags are kept.
    pub fn reset(&mut self) -> Result<(), ControlError> {
        self.ensure_stopped("reset")?;
        debug!("reset");
        record_transition("reset");
        self.cpu.pc = 0;
        self.notify();
        Ok(())
    }

    /// Zeroes registers and memory and restores PC and SP to power-on values.
    pub fn clear(&mut self) -> Result<(), ControlError> {
        self.ensure_stopped("clear")?;
        debug!("clear");
        record_transition("clear");
        self.cpu.clear();
        self.memory.clear();
        self.notify();
        Ok(())
    }

    /// Writes a raw program image into memory at `address`. Returns the byte count written.
    pub fn load_program(&mut self, image: &[u8], address: u16) -> Result<usize, ControlError> {
        self.ensure_stopped("load program")?;
        let written = self.memory.load_program(image, address);
        debug!(bytes = written, address, "program loaded");
        self.notify();
        Ok(written)
    }

    /// Memory from address 0 through the highest nonzero byte.
    pub fn program_image(&self) -> Vec<u8> {
        self.memory.program_image()
    }

    /// Marks the machine as owned by a run loop. Returns false when a loop
    /// already holds it; that loop keeps ticking while the state is running.
    pub fn claim_driver(&mut self) -> bool {
        if self.driven {
            return false;
        }
        self.driven = true;
        true
    }

    /// Gives up run-loop ownership. Must be called under the same lock that
    /// observed the machine leaving the running state.
    pub fn release_driver(&mut self) {
        self.driven = false;
    }

    pub fn has_driver(&self) -> bool {
        self.driven
    }

    pub(crate) fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub(crate) fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("cpu", &self.cpu)
            .field("memory", &self.memory)
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("driven", &self.driven)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Reg, INITIAL_SP};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(controller: &mut Controller) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = count.clone();
        controller.set_redraw_callback(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    const ADD_PROGRAM: [u8; 5] = [0x3E, 0x05, 0xC6, 0x03, 0x76]; // MVI A,5; ADI 3; HLT

    #[test]
    fn test_initially_stopped() {
        let controller = Controller::new();
        assert_eq!(controller.state(), RunState::Stopped);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_step_executes_and_notifies_once() {
        let mut controller = Controller::new();
        let redraws = counting(&mut controller);
        controller.load_program(&ADD_PROGRAM, 0).unwrap();
        let after_load = redraws.load(Ordering::SeqCst);

        assert_eq!(controller.step(), Ok(StepOutcome::Continue));
        assert_eq!(controller.step(), Ok(StepOutcome::Continue));
        assert_eq!(controller.cpu().reg(Reg::A), 8);
        assert!(!controller.cpu().zero());
        assert!(!controller.cpu().carry());
        assert_eq!(redraws.load(Ordering::SeqCst), after_load + 2);

        assert_eq!(controller.step(), Ok(StepOutcome::Halted));
        assert!(!controller.is_running());
        assert_eq!(controller.cycles(), 3);
    }

    #[test]
    fn test_run_until_halt() {
        let mut controller = Controller::new();
        controller.load_program(&ADD_PROGRAM, 0).unwrap();
        let redraws = counting(&mut controller);

        controller.run();
        assert!(controller.is_running());
        assert!(controller.tick());
        assert!(controller.tick());
        assert!(!controller.tick()); // HLT
        assert!(!controller.is_running());
        assert_eq!(controller.cpu().reg(Reg::A), 8);

        // one per cycle, plus the stop triggered by HLT
        assert_eq!(redraws.load(Ordering::SeqCst), 4);
        assert!(!controller.tick());
    }

    #[test]
    fn test_operations_rejected_while_running() {
        let mut controller = Controller::new();
        controller.run();

        assert_eq!(controller.step(), Err(ControlError::Running("step")));
        assert_eq!(controller.reset(), Err(ControlError::Running("reset")));
        assert_eq!(controller.clear(), Err(ControlError::Running("clear")));
        assert!(controller.load_program(&[1], 0).is_err());
        assert_eq!(controller.cycles(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_notifies() {
        let mut controller = Controller::new();
        let redraws = counting(&mut controller);

        controller.stop();
        assert!(!controller.is_running());
        assert_eq!(redraws.load(Ordering::SeqCst), 1);

        controller.run();
        controller.stop();
        controller.stop();
        assert_eq!(redraws.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reset_only_touches_pc() {
        let mut controller = Controller::new();
        controller.load_program(&ADD_PROGRAM, 0).unwrap();
        controller.step().unwrap();
        controller.step().unwrap();
        let redraws = counting(&mut controller);

        controller.reset().unwrap();
        assert_eq!(controller.cpu().get_pc(), 0);
        assert_eq!(controller.cpu().reg(Reg::A), 8);
        assert_eq!(controller.memory().read(0), 0x3E);
        assert_eq!(redraws.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_restores_power_on_state() {
        let mut controller = Controller::new();
        // LXI SP,$1000; PUSH B; MVI A,5
        controller
            .load_program(&[0x31, 0x00, 0x10, 0xC5, 0x3E, 0x05], 0)
            .unwrap();
        for _ in 0..3 {
            controller.step().unwrap();
        }
        let redraws = counting(&mut controller);

        controller.clear().unwrap();
        assert_eq!(controller.cpu().registers, [0; 8]);
        assert_eq!(controller.cpu().get_pc(), 0);
        assert_eq!(controller.cpu().get_sp(), INITIAL_SP);
        assert_eq!(controller.memory().highest_nonzero(), None);
        assert_eq!(redraws.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_driver_claim() {
        let mut controller = Controller::new();
        assert!(!controller.has_driver());
        assert!(controller.claim_driver());
        assert!(!controller.claim_driver());
        assert!(controller.has_driver());

        controller.release_driver();
        assert!(controller.claim_driver());
    }

    #[test]
    fn test_replacing_callback() {
        let mut controller = Controller::new();
        let first = counting(&mut controller);
        let second = counting(&mut controller);

        controller.stop();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
