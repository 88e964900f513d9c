//! Interrupt-driven inertial sensors.
//!
//! Two NXP parts share this module: the FXAS21002C gyroscope and the
//! FXOS8700CQ accelerometer/magnetometer. Both raise a data-ready interrupt
//! at their configured output data rate; the [`Gyro`] and [`AccelMag`]
//! pipelines attach to that interrupt, read the sample registers in a single
//! bus transaction, and deliver processed samples through a
//! [`BoundedQueue`](crate::queue::BoundedQueue) without ever blocking the
//! interrupt context.
//!
//! The gyro pipeline additionally supports zero-offset calibration,
//! dead-zone noise suppression and time-integrated heading; see [`gyro`].

pub mod accel;
pub mod fxas21002c;
pub mod fxos8700cq;
pub mod gyro;

pub use accel::AccelMag;
pub use fxas21002c::Fxas21002c;
pub use fxos8700cq::Fxos8700cq;
pub use gyro::{Gyro, GyroReading};

use std::io;

use thiserror::Error;

/// One processed sensor reading.
///
/// `delta_ns` is the time since the previous accepted interrupt; the first
/// sample after activation measures from the activation baseline (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub value: i32,
    pub delta_ns: u64,
}

/// Errors from the IMU drivers and pipelines.
#[derive(Error, Debug)]
pub enum ImuError {
    /// Bus failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A different part (or nothing) answered the WHO_AM_I check.
    #[error("unexpected WHO_AM_I {got:#04x} (expected {expected:#04x})")]
    WrongDevice { expected: u8, got: u8 },

    /// An operation needed the output data rate, but `begin` has not run.
    #[error("sensor not configured; call begin first")]
    NotConfigured,

    /// Heading requested before a zero-offset calibration.
    #[error("zero offset not calibrated")]
    NotCalibrated,

    /// Calibration ended before any samples survived the settling discard.
    #[error("calibration captured only {interrupts} interrupts, all within the settling discard")]
    InsufficientSamples { interrupts: u32 },
}
