//! Scanning lidar unit driver.
//!
//! The lidar unit is a rangefinder on a servo behind a small USB serial
//! controller (115200 baud). It produces a 180° scan with a range reading
//! every 0.5°, 361 readings in all.
//!
//! # Protocol
//!
//! Commands are one byte, optionally followed by a 16-bit big-endian
//! parameter; responses are one or more 16-bit big-endian signed words.
//! There is no framing or checksum; the stream stays aligned only because
//! both sides agree on the byte counts, which is why the completion check
//! consumes its sync word (see [`task_done`](Lidar::task_done)).
//!
//! Scans and warmups run on the unit itself and finish long after the
//! command byte; completion is detected by polling for the unit's done word.
//! A finished scan is collected with [`scan_retrieve`](Lidar::scan_retrieve),
//! whose leading status word guards the bulk payload.
//!
//! # Example
//!
//! ```no_run
//! use robot_hardware::lidar::Lidar;
//! use robot_hardware::serial::SerialChannel;
//!
//! let channel = SerialChannel::open("/dev/ttyUSB0", 115_200)?;
//! let mut lidar = Lidar::new(channel);
//! if !lidar.verify_identity()? {
//!     eprintln!("some other device is on this port");
//! }
//! lidar.scan(0)?; // blocks until the sweep finishes
//! let ranges = lidar.scan_retrieve()?;
//! # Ok::<(), robot_hardware::lidar::LidarError>(())
//! ```

pub mod point;

use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::io::ByteChannel;

/// Identity word the unit reports for the ID command.
pub const LIDAR_ID: i16 = 600;

/// Readings in a full 180° scan (0.5° steps, both endpoints).
pub const SCAN_POINTS: usize = 361;

/// Settling time between the ID command and its response.
const ID_RESPONSE_DELAY: Duration = Duration::from_millis(100);

/// Poll interval while waiting for a long-running task.
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Command codes understood by the unit.
pub mod commands {
    pub const ID: u8 = 10;
    pub const ECHO: u8 = 11;
    pub const SERVO_POS: u8 = 30;
    pub const SERVO_PARMS: u8 = 32;
    pub const MULTIPLE: u8 = 50;
    pub const SCAN: u8 = 52;
    pub const SCAN_RETRIEVE: u8 = 54;
    pub const WARMUP: u8 = 60;
}

/// Errors from the lidar unit.
#[derive(Error, Debug)]
pub enum LidarError {
    /// Byte channel failure or timeout.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The unit's controller enumerated but its sensor head has no power;
    /// the ID command goes unanswered. Re-attempt discovery after fixing
    /// power; retrying the command changes nothing.
    #[error("lidar not powered (no response to ID command)")]
    NotPowered,

    /// The unit reported it has no completed scan to hand over.
    #[error("no scan to retrieve")]
    NoScan,
}

/// Driver for one lidar unit on a byte channel.
pub struct Lidar<C: ByteChannel> {
    channel: C,
}

impl<C: ByteChannel> Lidar<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Check that the device on this channel is a lidar unit.
    ///
    /// # Errors
    /// [`LidarError::NotPowered`] if nothing answers the ID command.
    pub fn verify_identity(&mut self) -> Result<bool, LidarError> {
        Ok(self.get_id()? == LIDAR_ID)
    }

    /// Read the unit's identity word.
    ///
    /// The unit needs a moment to answer, and an unpowered sensor head never
    /// does: fewer than 2 buffered bytes after the settling delay is
    /// reported as [`LidarError::NotPowered`], distinct from any protocol
    /// failure.
    pub fn get_id(&mut self) -> Result<i16, LidarError> {
        self.write_command(commands::ID)?;
        thread::sleep(ID_RESPONSE_DELAY);
        if self.channel.bytes_available()? < 2 {
            return Err(LidarError::NotPowered);
        }
        Ok(self.read_word()?)
    }

    /// Ask the unit to echo `value` back; a functional check.
    pub fn echo(&mut self, value: i16) -> Result<i16, LidarError> {
        self.write_command_with_param(commands::ECHO, value)?;
        Ok(self.read_word()?)
    }

    /// Point the servo at `position_half_deg` (0.5° units; 180 = 90°).
    ///
    /// Returns the echoed position, or `-1` if the unit rejected it. Mostly
    /// for calibration and bench tests; a scan moves the servo itself.
    pub fn set_servo_position(&mut self, position_half_deg: i16) -> Result<i16, LidarError> {
        self.write_command_with_param(commands::SERVO_POS, position_half_deg)?;
        Ok(self.read_word()?)
    }

    /// Servo pulse widths (µs) that produce 0°, 90° and 180°.
    ///
    /// These calibrate the exact angle of each reading; see
    /// [`point::ServoCalibration`].
    pub fn servo_parms(&mut self) -> Result<[i16; 3], LidarError> {
        self.write_command(commands::SERVO_PARMS)?;
        let mut parms = [0i16; 3];
        for parm in &mut parms {
            *parm = self.read_word()?;
        }
        Ok(parms)
    }

    /// Take `count` range readings without moving the servo.
    pub fn ranges(&mut self, count: u16) -> Result<Vec<i16>, LidarError> {
        self.write_command_with_param(commands::MULTIPLE, count as i16)?;
        Ok(self.read_words(count as usize)?)
    }

    /// Start a 180° scan and return immediately.
    ///
    /// `delay_ms` is the pause between a servo step and the reading taken
    /// there; 0 selects the unit's default (80 ms).
    pub fn scan_start(&mut self, delay_ms: i16) -> Result<(), LidarError> {
        debug!("starting scan (delay {delay_ms} ms)");
        self.write_command_with_param(commands::SCAN, delay_ms)?;
        Ok(())
    }

    /// Run a 180° scan and block until the unit reports completion.
    pub fn scan(&mut self, delay_ms: i16) -> Result<(), LidarError> {
        self.scan_start(delay_ms)?;
        self.task_done(true)?;
        Ok(())
    }

    /// Start a sensor warmup and return immediately.
    ///
    /// `period` is the unit's warmup code, 0-5: 0 is a few seconds, 5 a few
    /// minutes.
    pub fn warmup_start(&mut self, period: i16) -> Result<(), LidarError> {
        debug!("starting warmup (period code {period})");
        self.write_command_with_param(commands::WARMUP, period)?;
        Ok(())
    }

    /// Run a sensor warmup and block until the unit reports completion.
    pub fn warmup(&mut self, period: i16) -> Result<(), LidarError> {
        self.warmup_start(period)?;
        self.task_done(true)?;
        Ok(())
    }

    /// Check whether the running task (scan or warmup) has finished.
    ///
    /// The unit signals completion by sending one word. When it has arrived
    /// this consumes it (the stream would otherwise fall out of alignment)
    /// and reports done. With `wait` false an unfinished task reports
    /// not-done immediately; with `wait` true this polls once a second until
    /// the word arrives. A busy-poll state check, not an event notification.
    pub fn task_done(&mut self, wait: bool) -> Result<bool, LidarError> {
        if self.channel.bytes_available()? >= 2 {
            self.read_word()?;
            return Ok(true);
        }
        if !wait {
            return Ok(false);
        }
        while self.channel.bytes_available()? < 2 {
            thread::sleep(TASK_POLL_INTERVAL);
        }
        self.read_word()?;
        Ok(true)
    }

    /// Collect the ranges of the last completed scan (361 readings, 0.5°
    /// apart, 0° to 180° inclusive).
    ///
    /// # Errors
    /// [`LidarError::NoScan`] if the unit's status word says there is no
    /// scan to hand over; the bulk payload is not touched in that case.
    pub fn scan_retrieve(&mut self) -> Result<Vec<i16>, LidarError> {
        self.write_command(commands::SCAN_RETRIEVE)?;
        if self.read_word()? == -1 {
            return Err(LidarError::NoScan);
        }
        Ok(self.read_words(SCAN_POINTS)?)
    }

    // ==================== Wire format ====================

    fn write_command(&mut self, command: u8) -> io::Result<()> {
        trace!("command {command}");
        self.channel.write_byte(command)
    }

    fn write_command_with_param(&mut self, command: u8, param: i16) -> io::Result<()> {
        trace!("command {command}, param {param}");
        let param = param.to_be_bytes();
        self.channel.write_bytes(&[command, param[0], param[1]])
    }

    fn read_word(&mut self) -> io::Result<i16> {
        let mut word = [0u8; 2];
        self.channel.read_bytes(&mut word)?;
        Ok(i16::from_be_bytes(word))
    }

    fn read_words(&mut self, count: usize) -> io::Result<Vec<i16>> {
        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(self.read_word()?);
        }
        Ok(words)
    }
}
