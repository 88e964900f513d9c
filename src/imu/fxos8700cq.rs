//! NXP FXOS8700CQ accelerometer/magnetometer.
//!
//! Register-level driver for the combined part in hybrid mode: one block
//! read returns magnetometer X/Y/Z followed by accelerometer X/Y/Z. The
//! configuration is fixed to the robot's needs: ±2 g, 100 Hz, high
//! resolution, data-ready interrupt on pin 1.
//!
//! Accelerometer samples are 14 bits left-justified in their 16-bit
//! registers and are sign-extended here; magnetometer samples are full
//! 16-bit values.

use std::io;
use std::thread;
use std::time::Duration;

use crate::io::RegisterBus;

use super::ImuError;

/// I2C bus address.
pub const ADDRESS: u16 = 0x1F;

/// WHO_AM_I response.
pub const DEVICE_ID: u8 = 0xC7;

/// Settle time after the soft reset.
const RESET_SETTLE: Duration = Duration::from_millis(10);

mod registers {
    pub const WHO_AM_I: u8 = 0x0D;
    pub const XYZ_DATA_CFG: u8 = 0x0E;
    pub const CTRL_REG1: u8 = 0x2A;
    pub const CTRL_REG2: u8 = 0x2B;
    pub const CTRL_REG3: u8 = 0x2C;
    pub const CTRL_REG4: u8 = 0x2D;
    pub const CTRL_REG5: u8 = 0x2E;
    pub const M_DR_STATUS: u8 = 0x32;
    pub const M_OUT_X_MSB: u8 = 0x33;
    pub const M_CTRL_REG1: u8 = 0x5B;
    pub const M_CTRL_REG2: u8 = 0x5C;
}

// CTRL_REG1: stand-by/active plus ODR and noise bits.
const STANDBY: u8 = 0x00;
const ACTIVE: u8 = 0x01;
const ODR_100HZ: u8 = 3 << 3;
const REDUCED_NOISE: u8 = 1 << 2;

// CTRL_REG2: soft reset, and the high-resolution oversampling mode.
const RESET: u8 = 0x40;
const HIGH_RESOLUTION_OSR: u8 = 0x02;

// Interrupt wiring: active-high push-pull, data-ready source, pin 1.
const INTERRUPT_HIGH_PP: u8 = 0x02;
const INTERRUPT_DATA_READY: u8 = 0x01;
const INTERRUPT_PIN1: u8 = 0x01;

// M_CTRL_REG1: highest magnetometer oversampling, hybrid (accel+mag) mode.
const MAG_OSR7_HYBRID: u8 = (7 << 2) | 0x03;
// M_CTRL_REG2: auto-increment jumps from accel to mag registers so one
// burst covers all twelve output bytes.
const HYBRID_AUTO_INC: u8 = 0x20;

// XYZ_DATA_CFG: ±2 g, no high-pass filter.
const RANGE_2G: u8 = 0x00;

/// Register-level FXOS8700CQ driver over a register bus.
pub struct Fxos8700cq<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Fxos8700cq<B> {
    /// Attach to the part and confirm its WHO_AM_I signature.
    pub fn new(mut bus: B) -> Result<Self, ImuError> {
        let id = bus.read_register(registers::WHO_AM_I)?;
        if id != DEVICE_ID {
            return Err(ImuError::WrongDevice {
                expected: DEVICE_ID,
                got: id,
            });
        }
        Ok(Self { bus })
    }

    /// Configure and activate the part in hybrid mode.
    pub fn begin(&mut self) -> io::Result<()> {
        self.bus.write_register(registers::CTRL_REG1, STANDBY)?;
        // The part resets before it can ACK this write; the resulting bus
        // error is expected.
        let _ = self.bus.write_register(registers::CTRL_REG2, RESET);
        thread::sleep(RESET_SETTLE);

        self.bus.write_register(registers::CTRL_REG1, STANDBY)?;

        self.bus
            .write_register(registers::CTRL_REG3, INTERRUPT_HIGH_PP)?;
        self.bus
            .write_register(registers::CTRL_REG4, INTERRUPT_DATA_READY)?;
        self.bus
            .write_register(registers::CTRL_REG5, INTERRUPT_PIN1)?;

        self.bus
            .write_register(registers::M_CTRL_REG1, MAG_OSR7_HYBRID)?;
        self.bus
            .write_register(registers::M_CTRL_REG2, HYBRID_AUTO_INC)?;

        self.bus.write_register(registers::XYZ_DATA_CFG, RANGE_2G)?;
        self.bus
            .write_register(registers::CTRL_REG2, HIGH_RESOLUTION_OSR)?;

        self.bus.write_register(
            registers::CTRL_REG1,
            ODR_100HZ | REDUCED_NOISE | ACTIVE,
        )?;
        Ok(())
    }

    /// Read all six axes in one bus transaction: `[mag x, mag y, mag z,
    /// accel x, accel y, accel z]`.
    ///
    /// Also clears a pending data-ready interrupt.
    pub fn read_raw(&mut self) -> io::Result<[i16; 6]> {
        let mut buf = [0u8; 12];
        self.bus.read_block(registers::M_OUT_X_MSB, &mut buf)?;

        let word = |msb: u8, lsb: u8| i16::from_be_bytes([msb, lsb]);
        Ok([
            word(buf[0], buf[1]),
            word(buf[2], buf[3]),
            word(buf[4], buf[5]),
            sign_extend_14(word(buf[6], buf[7])),
            sign_extend_14(word(buf[8], buf[9])),
            sign_extend_14(word(buf[10], buf[11])),
        ])
    }

    /// Whether fresh samples exist on all axes; with `wait`, polls until
    /// they do.
    pub fn data_ready(&mut self, wait: bool) -> io::Result<bool> {
        loop {
            let status = self.bus.read_register(registers::M_DR_STATUS)?;
            if status & 0x08 != 0 {
                return Ok(true);
            }
            if !wait {
                return Ok(false);
            }
        }
    }
}

/// Sign-extend the low 14 bits of an accelerometer word.
fn sign_extend_14(word: i16) -> i16 {
    ((i32::from(word) << 18) >> 18) as i16
}
