//! Cooperative run loop.
//!
//! A machine in the running state advances one instruction per tick of a
//! tokio interval. The controller lock is held only for the duration of a
//! single tick, so stop requests and status reads interleave with execution
//! and are observed at the next tick boundary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::controller::Controller;

pub type SharedController = Arc<Mutex<Controller>>;

/// Locks a shared controller. A panic in another holder does not leave the
/// machine unusable; its state is still consistent between instructions.
pub fn lock(controller: &SharedController) -> MutexGuard<'_, Controller> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ticks `controller` every `period` until it leaves the running state.
/// Returns the number of instructions this loop executed.
///
/// The run-loop claim is released under the same lock that observes the
/// machine stopped, so a `run` that arrives afterwards can always start a
/// fresh loop and one that arrives before is picked up by this one.
pub async fn drive(controller: SharedController, period: Duration) -> u64 {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut executed = 0;

    loop {
        interval.tick().await;
        let mut machine = lock(&controller);
        if machine.is_running() {
            executed += 1;
            if machine.tick() {
                continue;
            }
        }
        machine.release_driver();
        break;
    }

    debug!(executed, "run loop finished");
    executed
}

/// Starts a run loop for an already locked machine unless one holds it.
pub fn start_driver(
    machine: &mut Controller,
    controller: &SharedController,
    period: Duration,
) -> Option<JoinHandle<u64>> {
    if !machine.claim_driver() {
        return None;
    }
    Some(tokio::spawn(drive(controller.clone(), period)))
}

pub fn spawn_driver(controller: SharedController, period: Duration) -> Option<JoinHandle<u64>> {
    let mut machine = lock(&controller);
    start_driver(&mut machine, &controller, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Reg;

    fn shared(program: &[u8]) -> SharedController {
        let mut controller = Controller::new();
        controller.load_program(program, 0).unwrap();
        Arc::new(Mutex::new(controller))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_halt() {
        // MVI A,5; ADI 3; INR A; HLT
        let controller = shared(&[0x3E, 0x05, 0xC6, 0x03, 0x3C, 0x76]);
        lock(&controller).run();

        let executed = spawn_driver(controller.clone(), Duration::from_millis(1))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(executed, 4);
        let machine = lock(&controller);
        assert!(!machine.is_running());
        assert_eq!(machine.cpu().reg(Reg::A), 9);
        assert_eq!(machine.cpu().get_pc(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_observed_at_tick_boundary() {
        // JMP 0
        let controller = shared(&[0xC3, 0x00, 0x00]);
        lock(&controller).run();
        let handle = spawn_driver(controller.clone(), Duration::from_millis(1)).unwrap();

        time::sleep(Duration::from_millis(10)).await;
        lock(&controller).stop();

        let executed = handle.await.unwrap();
        assert!(executed >= 1);
        let machine = lock(&controller);
        assert!(!machine.is_running());
        assert_eq!(machine.cycles(), executed);
        assert_eq!(machine.cpu().get_pc(), 0);
        assert!(!machine.has_driver());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_run_is_picked_up_by_live_loop() {
        let period = Duration::from_millis(1);
        let controller = shared(&[0xC3, 0x00, 0x00]);
        lock(&controller).run();
        let handle = spawn_driver(controller.clone(), period).unwrap();
        time::sleep(Duration::from_millis(5)).await;

        {
            let mut machine = lock(&controller);
            machine.stop();
            machine.run();
            assert!(start_driver(&mut machine, &controller, period).is_none());
        }

        time::sleep(Duration::from_millis(5)).await;
        let before = lock(&controller).cycles();
        time::sleep(Duration::from_millis(5)).await;
        assert!(lock(&controller).cycles() > before);

        lock(&controller).stop();
        handle.await.unwrap();
        assert!(!lock(&controller).has_driver());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_after_loop_exit_starts_new_loop() {
        let period = Duration::from_millis(1);
        let controller = shared(&[0xC3, 0x00, 0x00]);
        lock(&controller).run();
        let first = spawn_driver(controller.clone(), period).unwrap();
        time::sleep(Duration::from_millis(5)).await;
        lock(&controller).stop();
        first.await.unwrap();

        let second = {
            let mut machine = lock(&controller);
            machine.run();
            start_driver(&mut machine, &controller, period)
        };
        let second = second.expect("released loop leaves the machine unclaimed");

        let before = lock(&controller).cycles();
        time::sleep(Duration::from_millis(5)).await;
        assert!(lock(&controller).cycles() > before);

        lock(&controller).stop();
        second.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_machine_exits_immediately() {
        let controller = shared(&[0x00]);
        let executed = drive(controller.clone(), Duration::from_millis(1)).await;
        assert_eq!(executed, 0);
        assert_eq!(lock(&controller).cycles(), 0);
    }
}
