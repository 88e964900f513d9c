//! SilentStepStick stepper motor driver.
//!
//! The driver board takes three lines: enable (torque on/off), direction,
//! and a step input that advances one microstep per pulse. Stepping rate
//! comes from the requested motor speed:
//!
//! ```text
//! steps/s   = rpm / 60 * microsteps_per_rev
//! half period = 0.5 / (steps/s)
//! ```
//!
//! and the square wave itself is produced by a [`PulseTrain`]. Every start
//! is preceded by a 100 ms settle so the rotor is at rest before the
//! direction can flip (datasheet requirement).
//!
//! # Example
//!
//! ```no_run
//! use robot_hardware::stepper::{Direction, Resolution, SilentStepStick};
//! # use robot_hardware::io::DigitalOutput;
//! # struct Pin;
//! # impl DigitalOutput for Pin {
//! #     fn set_active(&mut self, _: bool) -> std::io::Result<()> { Ok(()) }
//! # }
//! # let (enable, dir, step) = (Pin, Pin, Pin);
//!
//! let mut stepper = SilentStepStick::new(enable, dir, step, 200, Resolution::Eighth);
//! stepper.enable(true)?;
//! // One full revolution at 30 RPM, then let it coast.
//! stepper.step_count(1600, Direction::Cw, 30.0, false, None)?;
//! stepper.enable(false)?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::io::DigitalOutput;
use crate::pulse::{CompletionAction, PulseTrain};

/// Coast-to-rest delay before (re)starting the step signal.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Rotation direction, viewed from the motor face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cw,
    Ccw,
}

/// Microstep resolution configured on the driver's CFG pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Full,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl Resolution {
    pub fn microsteps(self) -> u32 {
        match self {
            Resolution::Full => 1,
            Resolution::Half => 2,
            Resolution::Quarter => 4,
            Resolution::Eighth => 8,
            Resolution::Sixteenth => 16,
        }
    }
}

/// Driver for one SilentStepStick board.
///
/// Dropping the driver stops any running pulse train and de-energizes the
/// motor.
pub struct SilentStepStick<P: DigitalOutput + Send + 'static> {
    enable: P,
    direction: P,
    step: PulseTrain<P>,
    microsteps_per_rev: f32,
    running: Arc<AtomicBool>,
}

impl<P: DigitalOutput + Send + 'static> SilentStepStick<P> {
    /// Wire up the three driver lines.
    ///
    /// `steps_per_rev` is the motor's full-step count (typically 200);
    /// `resolution` must match the CFG pin strapping on the board.
    pub fn new(
        enable: P,
        direction: P,
        step: P,
        steps_per_rev: u32,
        resolution: Resolution,
    ) -> Self {
        Self {
            enable,
            direction,
            step: PulseTrain::new(step),
            microsteps_per_rev: (steps_per_rev * resolution.microsteps()) as f32,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Energize (`true`) or release (`false`) the motor.
    ///
    /// A disabled driver applies no torque and the shaft turns freely; step
    /// pulses only move the motor while enabled.
    pub fn enable(&mut self, on: bool) -> io::Result<()> {
        self.enable.set_active(on)
    }

    /// Run continuously in `direction` at `speed_rpm` until [`stop`](Self::stop).
    ///
    /// A loop already running is stopped and restarted at the new direction
    /// and speed, after the settle delay.
    pub fn run(&mut self, direction: Direction, speed_rpm: f32) -> io::Result<()> {
        if self.running.load(Ordering::Acquire) {
            self.step.stop();
        }
        thread::sleep(SETTLE_DELAY);
        self.set_direction(direction)?;

        let half_period = self.half_period(speed_rpm);
        debug!("continuous run {direction:?} at {speed_rpm} RPM, half period {half_period:?}");
        self.step.start(half_period, half_period, None, true, None);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Step exactly `count` microsteps in `direction` at `speed_rpm`.
    ///
    /// Returns `Ok(false)` without stepping if a move is already running.
    /// With `background` the call returns once the pulse train is started;
    /// otherwise it blocks until the move completes. Either way the running
    /// flag is cleared before `on_complete` runs, so a completion handler
    /// that starts the next move is never rejected.
    pub fn step_count(
        &mut self,
        count: u64,
        direction: Direction,
        speed_rpm: f32,
        background: bool,
        on_complete: Option<CompletionAction>,
    ) -> io::Result<bool> {
        if self.running.load(Ordering::Acquire) {
            return Ok(false);
        }
        thread::sleep(SETTLE_DELAY);
        self.set_direction(direction)?;
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let finish: CompletionAction = Box::new(move || {
            running.store(false, Ordering::Release);
            if let Some(action) = on_complete {
                action();
            }
        });

        let half_period = self.half_period(speed_rpm);
        debug!("{count} steps {direction:?} at {speed_rpm} RPM, half period {half_period:?}");
        self.step
            .start(half_period, half_period, Some(count), background, Some(finish));
        Ok(true)
    }

    /// Stop the step signal. Idempotent; safe to call in any state.
    pub fn stop(&mut self) {
        self.step.stop();
        self.running.store(false, Ordering::Release);
    }

    /// Steps taken since the current (or most recent) move started.
    pub fn steps_taken(&self) -> u64 {
        self.step.cycle_count()
    }

    fn set_direction(&mut self, direction: Direction) -> io::Result<()> {
        self.direction.set_active(direction == Direction::Ccw)
    }

    fn half_period(&self, speed_rpm: f32) -> Duration {
        let speed_rps = speed_rpm / 60.0;
        let step_frequency = speed_rps * self.microsteps_per_rev;
        Duration::from_secs_f32(0.5 / step_frequency)
    }
}

impl<P: DigitalOutput + Send + 'static> Drop for SilentStepStick<P> {
    fn drop(&mut self) {
        self.stop();
        let _ = self.enable.set_active(false);
    }
}
