//! Hardware drivers for robot peripherals.
//!
//! This crate provides drivers for the peripherals of a small robot built
//! around a single-board computer: a dual-motor controller and a scanning
//! lidar on USB serial, an interrupt-driven IMU on I2C, and a stepper driver
//! on GPIO. Each driver is feature-gated for optional compilation.
//!
//! # Features
//!
//! - `roboclaw` - Basicmicro RoboClaw dual-motor controller (CRC-checked
//!   packet serial)
//! - `lidar` - Scanning lidar unit (command/response serial protocol)
//! - `imu` - FXAS21002C gyroscope and FXOS8700CQ accelerometer/magnetometer
//!   with interrupt-driven sampling pipelines
//! - `stepper` - SilentStepStick stepper motor driver
//!
//! All four are enabled by default.
//!
//! # Hardware access
//!
//! Drivers talk to hardware through the traits in [`io`] so they can be
//! exercised against scripted fakes. [`serial::SerialChannel`] adapts a
//! serial port to [`io::ByteChannel`]; on Linux the `imu` feature adds an
//! [`io::RegisterBus`] adapter over `/dev/i2c-*`. GPIO line and edge-event
//! adapters are supplied by the deployment platform.

pub mod io;
pub mod pulse;
pub mod queue;
pub mod serial;

#[cfg(all(target_os = "linux", feature = "imu"))]
pub mod i2c;

#[cfg(feature = "imu")]
pub mod imu;

#[cfg(feature = "lidar")]
pub mod lidar;

#[cfg(feature = "roboclaw")]
pub mod roboclaw;

#[cfg(feature = "stepper")]
pub mod stepper;
