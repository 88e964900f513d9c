//! Basicmicro RoboClaw dual-motor controller driver.
//!
//! The RoboClaw speaks "packet serial": every frame is the controller
//! address, a command byte, command-specific payload bytes, and a trailing
//! CRC16 (big-endian, see [`crc16`]). Write-style commands are acknowledged
//! with a single `0xFF` status byte; read-style commands answer with
//! big-endian payload words followed by a CRC computed over the request
//! address/command and the response bytes.
//!
//! # Reliability
//!
//! The link is treated as lossy. Every exchange (including the initial
//! write) is retried as a whole, up to [`MAX_RETRIES`] extra attempts, with
//! no delay between attempts. A CRC mismatch is indistinguishable from wire
//! corruption at this layer and retries the same way. Once the budget is
//! exhausted the operation reports failure and the caller decides whether to
//! escalate; no transport failure is fatal here.
//!
//! Speeds are signed quadrature pulses per second, accelerations unsigned
//! pulses per second squared, distances unsigned pulses: the encoder's
//! native units.
//!
//! # Example
//!
//! ```no_run
//! use robot_hardware::roboclaw::RoboClaw;
//! use robot_hardware::serial::SerialChannel;
//!
//! let channel = SerialChannel::open("/dev/ttyACM0", 38400)?;
//! let mut claw = RoboClaw::new(channel, 0x80);
//! if !claw.speed_m1_m2(2000, 2000) {
//!     eprintln!("controller not responding");
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod crc16;

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::io::ByteChannel;
use self::crc16::Crc16;

/// Extra attempts after the first failed exchange (3 attempts total).
pub const MAX_RETRIES: u8 = 2;

/// Status byte acknowledging a successfully received write command.
const ACK: u8 = 0xFF;

/// How long the liveness check waits for any response byte.
const IDENTITY_WINDOW_MS: u32 = 20;

/// Velocity-PID wire values are 16.16 fixed point.
const FIXED_POINT_SCALE: f32 = 65536.0;

/// Command codes used by this driver.
pub mod commands {
    pub const RESET_ENCODERS: u8 = 20;
    pub const SET_M1_ENC_COUNT: u8 = 22;
    pub const GET_MAIN_BATTERY: u8 = 24;
    pub const SET_M1_PID: u8 = 28;
    pub const SET_M2_PID: u8 = 29;
    pub const MIXED_SPEED: u8 = 37;
    pub const MIXED_SPEED_ACCEL: u8 = 40;
    pub const MIXED_SPEED_DIST: u8 = 43;
    pub const MIXED_SPEED_ACCEL_DIST: u8 = 46;
    pub const READ_M1_PID: u8 = 55;
    pub const READ_M2_PID: u8 = 56;
    pub const GET_ENCODERS: u8 = 78;
}

/// Velocity-control PID constants for one motor channel.
///
/// `qpps` is the speed at 100% duty, in quadrature pulses per second; it
/// scales the other constants on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityPid {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub qpps: u32,
}

impl VelocityPid {
    pub fn new(kp: f32, ki: f32, kd: f32, qpps: u32) -> Self {
        Self { kp, ki, kd, qpps }
    }
}

/// Driver for one RoboClaw on a byte channel.
///
/// `address` selects the controller on a shared bus (0x80-0x87); over USB
/// there is one controller per device file but the address is still part of
/// every frame.
///
/// Dropping the driver commands both motors to stop, so a panicking control
/// loop cannot leave the robot driving.
pub struct RoboClaw<C: ByteChannel> {
    channel: C,
    address: u8,
}

impl<C: ByteChannel> RoboClaw<C> {
    pub fn new(channel: C, address: u8) -> Self {
        Self { channel, address }
    }

    // ==================== Transport ====================

    /// Write a frame (`bytes` plus CRC) and, if `expect_ack`, require the
    /// controller's `0xFF` status byte.
    ///
    /// Retries the whole frame up to `retries` extra times on I/O failure or
    /// a bad status byte. Returns `true` on success.
    pub fn write_frame(&mut self, retries: u8, expect_ack: bool, bytes: &[u8]) -> bool {
        for attempt in 0..=retries {
            match self.write_frame_once(expect_ack, bytes) {
                Ok(true) => return true,
                Ok(false) => trace!("attempt {attempt}: bad status byte"),
                Err(e) => trace!("attempt {attempt}: {e}"),
            }
        }
        warn!(
            "command {:#04x}: write failed after {} attempts",
            bytes.get(1).copied().unwrap_or(0),
            retries as u32 + 1
        );
        false
    }

    fn write_frame_once(&mut self, expect_ack: bool, bytes: &[u8]) -> io::Result<bool> {
        let mut crc = Crc16::new();
        crc.update_all(bytes);
        self.channel.write_bytes(bytes)?;
        self.channel.write_bytes(&crc.value().to_be_bytes())?;
        if expect_ack {
            Ok(self.channel.read_byte()? == ACK)
        } else {
            Ok(true)
        }
    }

    /// Issue a read command and collect `N` big-endian 32-bit words.
    ///
    /// The request bytes and every response byte feed one running CRC that
    /// is checked against the trailing CRC from the controller. Signedness
    /// of the words is up to the caller. `None` after the retry budget.
    pub fn read_words<const N: usize>(&mut self, command: u8) -> Option<[u32; N]> {
        for attempt in 0..=MAX_RETRIES {
            match self.read_words_once::<N>(command) {
                Ok(Some(words)) => return Some(words),
                Ok(None) => trace!("attempt {attempt}: CRC mismatch"),
                Err(e) => trace!("attempt {attempt}: {e}"),
            }
        }
        warn!("command {command:#04x}: read failed after {} attempts", MAX_RETRIES as u32 + 1);
        None
    }

    fn read_words_once<const N: usize>(&mut self, command: u8) -> io::Result<Option<[u32; N]>> {
        let mut crc = Crc16::new();
        self.channel.write_byte(self.address)?;
        crc.update(self.address);
        self.channel.write_byte(command)?;
        crc.update(command);

        let mut words = [0u32; N];
        for word in &mut words {
            let mut value: u32 = 0;
            for _ in 0..4 {
                let byte = self.channel.read_byte()?;
                crc.update(byte);
                value = (value << 8) | u32::from(byte);
            }
            *word = value;
        }

        let device_crc =
            u16::from_be_bytes([self.channel.read_byte()?, self.channel.read_byte()?]);
        Ok((crc.value() == device_crc).then_some(words))
    }

    /// Issue a read command for a 2-byte diagnostic response, same exchange
    /// shape and retry policy as [`read_words`](Self::read_words).
    pub fn read_byte_pair(&mut self, command: u8) -> Option<[u8; 2]> {
        for attempt in 0..=MAX_RETRIES {
            match self.read_byte_pair_once(command) {
                Ok(Some(pair)) => return Some(pair),
                Ok(None) => trace!("attempt {attempt}: CRC mismatch"),
                Err(e) => trace!("attempt {attempt}: {e}"),
            }
        }
        warn!("command {command:#04x}: read failed after {} attempts", MAX_RETRIES as u32 + 1);
        None
    }

    fn read_byte_pair_once(&mut self, command: u8) -> io::Result<Option<[u8; 2]>> {
        let mut crc = Crc16::new();
        self.channel.write_byte(self.address)?;
        crc.update(self.address);
        self.channel.write_byte(command)?;
        crc.update(command);

        let mut pair = [0u8; 2];
        for byte in &mut pair {
            *byte = self.channel.read_byte()?;
            crc.update(*byte);
        }

        let device_crc =
            u16::from_be_bytes([self.channel.read_byte()?, self.channel.read_byte()?]);
        Ok((crc.value() == device_crc).then_some(pair))
    }

    /// Liveness check: send a write-only command with no retries, then wait
    /// up to 20 ms for any response byte.
    ///
    /// The byte's value is irrelevant: a powered controller at this address
    /// answers something, an absent one answers nothing. Used by device
    /// discovery to tell identical USB adapters apart.
    pub fn verify_identity(&mut self) -> io::Result<bool> {
        self.write_frame(0, false, &[self.address, commands::RESET_ENCODERS]);
        Ok(self.read_with_timeout(IDENTITY_WINDOW_MS)?.is_some())
    }

    /// Poll for one response byte, giving up after `timeout_ms`.
    fn read_with_timeout(&mut self, timeout_ms: u32) -> io::Result<Option<u8>> {
        let mut waited = 0;
        while self.channel.bytes_available()? < 1 {
            thread::sleep(Duration::from_millis(1));
            waited += 1;
            if waited >= timeout_ms {
                return Ok(None);
            }
        }
        self.channel.read_byte().map(Some)
    }

    // ==================== Encoders ====================

    /// Zero both motor encoders.
    pub fn reset_encoders(&mut self) -> bool {
        self.write_frame(MAX_RETRIES, true, &[self.address, commands::RESET_ENCODERS])
    }

    /// Set the motor 1 encoder count.
    pub fn set_encoder_m1(&mut self, count: u32) -> bool {
        let mut frame = Vec::with_capacity(6);
        frame.push(self.address);
        frame.push(commands::SET_M1_ENC_COUNT);
        frame.extend_from_slice(&count.to_be_bytes());
        self.write_frame(MAX_RETRIES, true, &frame)
    }

    /// Read both encoder counts as `[m1, m2]`.
    pub fn get_encoders(&mut self) -> Option<[u32; 2]> {
        self.read_words(commands::GET_ENCODERS)
    }

    // ==================== Status ====================

    /// Main battery voltage in tenths of a volt.
    pub fn get_main_battery_voltage(&mut self) -> Option<u16> {
        self.read_byte_pair(commands::GET_MAIN_BATTERY)
            .map(u16::from_be_bytes)
    }

    // ==================== Velocity PID ====================

    /// Set the velocity PID constants for motor 1.
    pub fn set_m1_velocity_pid(&mut self, pid: &VelocityPid) -> bool {
        self.set_velocity_pid(commands::SET_M1_PID, pid)
    }

    /// Set the velocity PID constants for motor 2.
    pub fn set_m2_velocity_pid(&mut self, pid: &VelocityPid) -> bool {
        self.set_velocity_pid(commands::SET_M2_PID, pid)
    }

    // Wire order on write is D, P, I, QPPS.
    fn set_velocity_pid(&mut self, command: u8, pid: &VelocityPid) -> bool {
        let mut frame = Vec::with_capacity(18);
        frame.push(self.address);
        frame.push(command);
        frame.extend_from_slice(&fixed_point(pid.kd).to_be_bytes());
        frame.extend_from_slice(&fixed_point(pid.kp).to_be_bytes());
        frame.extend_from_slice(&fixed_point(pid.ki).to_be_bytes());
        frame.extend_from_slice(&pid.qpps.to_be_bytes());
        self.write_frame(MAX_RETRIES, true, &frame)
    }

    /// Read the velocity PID constants for motor 1.
    pub fn get_m1_velocity_pid(&mut self) -> Option<VelocityPid> {
        self.get_velocity_pid(commands::READ_M1_PID)
    }

    /// Read the velocity PID constants for motor 2.
    pub fn get_m2_velocity_pid(&mut self) -> Option<VelocityPid> {
        self.get_velocity_pid(commands::READ_M2_PID)
    }

    // Wire order on read is P, I, D, QPPS.
    fn get_velocity_pid(&mut self, command: u8) -> Option<VelocityPid> {
        let words: [u32; 4] = self.read_words(command)?;
        Some(VelocityPid {
            kp: words[0] as f32 / FIXED_POINT_SCALE,
            ki: words[1] as f32 / FIXED_POINT_SCALE,
            kd: words[2] as f32 / FIXED_POINT_SCALE,
            qpps: words[3],
        })
    }

    // ==================== Motion ====================

    /// Drive both motors at signed speeds (pulses/s); 0 stops.
    pub fn speed_m1_m2(&mut self, speed_m1: i32, speed_m2: i32) -> bool {
        let mut frame = Vec::with_capacity(10);
        frame.push(self.address);
        frame.push(commands::MIXED_SPEED);
        frame.extend_from_slice(&speed_m1.to_be_bytes());
        frame.extend_from_slice(&speed_m2.to_be_bytes());
        self.write_frame(MAX_RETRIES, true, &frame)
    }

    /// Drive both motors at signed speeds, ramping at `acceleration`
    /// (pulses/s²).
    pub fn speed_accel_m1_m2(&mut self, acceleration: u32, speed_m1: i32, speed_m2: i32) -> bool {
        let mut frame = Vec::with_capacity(14);
        frame.push(self.address);
        frame.push(commands::MIXED_SPEED_ACCEL);
        frame.extend_from_slice(&acceleration.to_be_bytes());
        frame.extend_from_slice(&speed_m1.to_be_bytes());
        frame.extend_from_slice(&speed_m2.to_be_bytes());
        self.write_frame(MAX_RETRIES, true, &frame)
    }

    /// Drive each motor a distance (pulses) at a signed speed.
    ///
    /// With `buffered` the move queues behind the current one; otherwise it
    /// preempts immediately.
    pub fn speed_distance_m1_m2(
        &mut self,
        speed_m1: i32,
        distance_m1: u32,
        speed_m2: i32,
        distance_m2: u32,
        buffered: bool,
    ) -> bool {
        let mut frame = Vec::with_capacity(19);
        frame.push(self.address);
        frame.push(commands::MIXED_SPEED_DIST);
        frame.extend_from_slice(&speed_m1.to_be_bytes());
        frame.extend_from_slice(&distance_m1.to_be_bytes());
        frame.extend_from_slice(&speed_m2.to_be_bytes());
        frame.extend_from_slice(&distance_m2.to_be_bytes());
        frame.push(if buffered { 0 } else { 1 });
        self.write_frame(MAX_RETRIES, true, &frame)
    }

    /// Drive each motor a distance at a signed speed with an acceleration
    /// ramp. `buffered` as in [`speed_distance_m1_m2`](Self::speed_distance_m1_m2).
    #[allow(clippy::too_many_arguments)]
    pub fn speed_accel_distance_m1_m2(
        &mut self,
        acceleration: u32,
        speed_m1: i32,
        distance_m1: u32,
        speed_m2: i32,
        distance_m2: u32,
        buffered: bool,
    ) -> bool {
        let mut frame = Vec::with_capacity(23);
        frame.push(self.address);
        frame.push(commands::MIXED_SPEED_ACCEL_DIST);
        frame.extend_from_slice(&acceleration.to_be_bytes());
        frame.extend_from_slice(&speed_m1.to_be_bytes());
        frame.extend_from_slice(&distance_m1.to_be_bytes());
        frame.extend_from_slice(&speed_m2.to_be_bytes());
        frame.extend_from_slice(&distance_m2.to_be_bytes());
        frame.push(if buffered { 0 } else { 1 });
        self.write_frame(MAX_RETRIES, true, &frame)
    }
}

impl<C: ByteChannel> Drop for RoboClaw<C> {
    fn drop(&mut self) {
        // Motors must not keep driving past the controller handle.
        let _ = self.speed_m1_m2(0, 0);
    }
}

fn fixed_point(value: f32) -> u32 {
    (value * FIXED_POINT_SCALE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockChannel;

    const ADDRESS: u8 = 0x80;

    fn claw(channel: &MockChannel) -> RoboClaw<MockChannel> {
        RoboClaw::new(channel.clone(), ADDRESS)
    }

    /// Queue a well-formed read response: payload plus the CRC the
    /// controller would send (covering address, command and payload).
    fn queue_read_response(channel: &MockChannel, command: u8, payload: &[u8]) {
        let mut frame = vec![ADDRESS, command];
        frame.extend_from_slice(payload);
        channel.queue_response(payload);
        channel.queue_response(&crc16::compute(&frame).to_be_bytes());
    }

    #[test]
    fn speed_command_frame_layout() {
        let channel = MockChannel::new();
        channel.queue_response(&[0xFF]);
        let mut claw = claw(&channel);

        assert!(claw.speed_m1_m2(1000, -1000));

        let written = channel.written();
        let expected_body = [
            ADDRESS,
            commands::MIXED_SPEED,
            0x00, 0x00, 0x03, 0xE8, // 1000
            0xFF, 0xFF, 0xFC, 0x18, // -1000
        ];
        assert_eq!(&written[..10], &expected_body);
        let crc = crc16::compute(&expected_body);
        assert_eq!(&written[10..12], &crc.to_be_bytes());
        assert_eq!(written.len(), 12);
    }

    #[test]
    fn write_exhausts_exactly_three_attempts_on_bad_ack() {
        let channel = MockChannel::new();
        channel.queue_response(&[0x00, 0x00, 0x00]);
        let mut claw = claw(&channel);

        assert!(!claw.reset_encoders());

        // Each attempt is address + command + 2 CRC bytes.
        assert_eq!(channel.written().len(), 3 * 4);
        assert_eq!(channel.remaining(), 0);
    }

    #[test]
    fn write_recovers_on_second_attempt() {
        let channel = MockChannel::new();
        channel.queue_response(&[0x00, 0xFF]);
        let mut claw = claw(&channel);

        assert!(claw.reset_encoders());
        assert_eq!(channel.written().len(), 2 * 4);
    }

    #[test]
    fn write_retries_after_io_failure() {
        let channel = MockChannel::new();
        channel.fail_writes(1);
        channel.queue_response(&[0xFF]);
        let mut claw = claw(&channel);

        assert!(claw.reset_encoders());
    }

    #[test]
    fn get_encoders_decodes_both_words() {
        let channel = MockChannel::new();
        queue_read_response(
            &channel,
            commands::GET_ENCODERS,
            &[0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFE],
        );
        let mut claw = claw(&channel);

        assert_eq!(claw.get_encoders(), Some([65536, 0xFFFF_FFFE]));
        // Request was address + command.
        assert_eq!(channel.written(), vec![ADDRESS, commands::GET_ENCODERS]);
    }

    #[test]
    fn read_exhausts_exactly_three_attempts_on_corrupt_crc() {
        let channel = MockChannel::new();
        for _ in 0..3 {
            // 8 payload bytes and a CRC that can never match.
            channel.queue_response(&[0u8; 8]);
            channel.queue_response(&[0xDE, 0xAD]);
        }
        let mut claw = claw(&channel);

        assert_eq!(claw.get_encoders(), None);
        assert_eq!(channel.written().len(), 3 * 2);
        assert_eq!(channel.remaining(), 0);
    }

    #[test]
    fn read_recovers_after_one_corrupt_response() {
        let channel = MockChannel::new();
        channel.queue_response(&[0u8; 10]); // corrupt attempt
        queue_read_response(
            &channel,
            commands::GET_ENCODERS,
            &[0x00, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x07],
        );
        let mut claw = claw(&channel);

        assert_eq!(claw.get_encoders(), Some([42, 7]));
    }

    #[test]
    fn battery_voltage_is_big_endian_tenths() {
        let channel = MockChannel::new();
        queue_read_response(&channel, commands::GET_MAIN_BATTERY, &[0x00, 0x7B]);
        let mut claw = claw(&channel);

        assert_eq!(claw.get_main_battery_voltage(), Some(123)); // 12.3 V
    }

    #[test]
    fn pid_set_uses_fixed_point_and_device_write_order() {
        let channel = MockChannel::new();
        channel.queue_response(&[0xFF]);
        let mut claw = claw(&channel);

        let pid = VelocityPid::new(1.0, 0.5, 0.25, 44_000);
        assert!(claw.set_m1_velocity_pid(&pid));

        let written = channel.written();
        assert_eq!(written[0], ADDRESS);
        assert_eq!(written[1], commands::SET_M1_PID);
        assert_eq!(&written[2..6], &16_384u32.to_be_bytes()); // kd
        assert_eq!(&written[6..10], &65_536u32.to_be_bytes()); // kp
        assert_eq!(&written[10..14], &32_768u32.to_be_bytes()); // ki
        assert_eq!(&written[14..18], &44_000u32.to_be_bytes());
    }

    #[test]
    fn pid_get_uses_device_read_order() {
        let channel = MockChannel::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&65_536u32.to_be_bytes()); // kp
        payload.extend_from_slice(&32_768u32.to_be_bytes()); // ki
        payload.extend_from_slice(&16_384u32.to_be_bytes()); // kd
        payload.extend_from_slice(&44_000u32.to_be_bytes());
        queue_read_response(&channel, commands::READ_M2_PID, &payload);
        let mut claw = claw(&channel);

        let pid = claw.get_m2_velocity_pid().unwrap();
        assert_eq!(pid, VelocityPid::new(1.0, 0.5, 0.25, 44_000));
    }

    #[test]
    fn distance_command_carries_buffer_flag() {
        let channel = MockChannel::new();
        channel.queue_response(&[0xFF]);
        channel.queue_response(&[0xFF]);
        let mut claw = claw(&channel);

        assert!(claw.speed_distance_m1_m2(500, 4000, 500, 4000, true));
        let buffered = channel.written();
        assert_eq!(buffered[18], 0);

        assert!(claw.speed_distance_m1_m2(500, 4000, 500, 4000, false));
        let immediate = channel.written();
        assert_eq!(immediate[buffered.len() + 18], 1);
    }

    #[test]
    fn set_encoder_m1_frame_layout() {
        let channel = MockChannel::new();
        channel.queue_response(&[0xFF]);
        let mut claw = claw(&channel);

        assert!(claw.set_encoder_m1(0x0102_0304));
        let written = channel.written();
        assert_eq!(
            &written[..6],
            &[ADDRESS, commands::SET_M1_ENC_COUNT, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn verify_identity_accepts_any_response_byte() {
        let channel = MockChannel::new();
        channel.queue_response(&[0x37]);
        let mut claw = claw(&channel);

        assert!(claw.verify_identity().unwrap());
    }

    #[test]
    fn verify_identity_times_out_when_silent() {
        let channel = MockChannel::new();
        let mut claw = claw(&channel);

        assert!(!claw.verify_identity().unwrap());
        // The probe command still went out (with zero retries).
        assert_eq!(channel.written().len(), 4);
    }

    #[test]
    fn drop_stops_both_motors() {
        let channel = MockChannel::new();
        channel.queue_response(&[0xFF]);
        drop(claw(&channel));

        let written = channel.written();
        assert_eq!(written[1], commands::MIXED_SPEED);
        assert_eq!(&written[2..10], &[0u8; 8]);
    }
}
