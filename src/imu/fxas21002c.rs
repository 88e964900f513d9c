//! NXP FXAS21002C three-axis gyroscope.
//!
//! Register-level driver: configuration, raw reads and data-ready status.
//! Sample processing lives in [`gyro`](super::gyro).
//!
//! The part sits at I2C address 0x21 and identifies itself as 0xD7. The
//! full-scale range is left at ±250 dps, the most sensitive setting; the
//! low-pass cutoff and output data rate are chosen at [`begin`](Fxas21002c::begin).

use std::io;
use std::thread;
use std::time::Duration;

use bitflags::bitflags;

use crate::io::RegisterBus;

use super::ImuError;

/// I2C bus address.
pub const ADDRESS: u16 = 0x21;

/// WHO_AM_I response.
pub const DEVICE_ID: u8 = 0xD7;

/// Register settle time after leaving standby.
const ACTIVATION_SETTLE: Duration = Duration::from_millis(100);

mod registers {
    pub const OUT_X_MSB: u8 = 0x01;
    pub const OUT_Z_MSB: u8 = 0x05;
    pub const DR_STATUS: u8 = 0x07;
    pub const WHO_AM_I: u8 = 0x0C;
    pub const CTRL_REG0: u8 = 0x0D;
    pub const CTRL_REG1: u8 = 0x13;
    pub const CTRL_REG2: u8 = 0x14;
}

// CTRL_REG1 power-state bits.
const STANDBY: u8 = 0x00;
const ACTIVE: u8 = 0x02;
const RESET: u8 = 0x40;

/// CTRL_REG2 value: data-ready interrupt enabled, routed to pin 1,
/// active-high, push-pull driver.
const DATA_READY_INTERRUPT: u8 = 0x0E;

bitflags! {
    /// DR_STATUS register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrStatus: u8 {
        /// New Z-axis sample available.
        const ZDR = 0x04;
        /// New samples available on all three axes.
        const ZYXDR = 0x08;
    }
}

/// Full-scale range, with the sensitivity (dps per LSB) it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl Range {
    pub fn code(self) -> u8 {
        match self {
            Range::Dps250 => 3,
            Range::Dps500 => 2,
            Range::Dps1000 => 1,
            Range::Dps2000 => 0,
        }
    }

    /// Degrees per second represented by one raw LSB.
    pub fn sensitivity(self) -> f32 {
        match self {
            Range::Dps250 => 0.007_812_5,
            Range::Dps500 => 0.015_625,
            Range::Dps1000 => 0.031_25,
            Range::Dps2000 => 0.062_5,
        }
    }
}

/// Output data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum OutputDataRate {
    Hz800,
    Hz400,
    Hz200,
    Hz100,
    Hz50,
    Hz25,
    Hz12_5,
}

impl OutputDataRate {
    pub fn code(self) -> u8 {
        let index: u8 = match self {
            OutputDataRate::Hz800 => 0,
            OutputDataRate::Hz400 => 1,
            OutputDataRate::Hz200 => 2,
            OutputDataRate::Hz100 => 3,
            OutputDataRate::Hz50 => 4,
            OutputDataRate::Hz25 => 5,
            OutputDataRate::Hz12_5 => 6,
        };
        index << 2
    }

    pub fn hz(self) -> f32 {
        match self {
            OutputDataRate::Hz800 => 800.0,
            OutputDataRate::Hz400 => 400.0,
            OutputDataRate::Hz200 => 200.0,
            OutputDataRate::Hz100 => 100.0,
            OutputDataRate::Hz50 => 50.0,
            OutputDataRate::Hz25 => 25.0,
            OutputDataRate::Hz12_5 => 12.5,
        }
    }
}

/// Low-pass filter cutoff selection (the actual corner frequency depends on
/// the output data rate; see the datasheet table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpfCutoff {
    Highest,
    Medium,
    Lowest,
}

impl LpfCutoff {
    pub fn code(self) -> u8 {
        let index: u8 = match self {
            LpfCutoff::Highest => 0,
            LpfCutoff::Medium => 1,
            LpfCutoff::Lowest => 2,
        };
        index << 6
    }
}

/// Register-level FXAS21002C driver over a register bus.
pub struct Fxas21002c<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Fxas21002c<B> {
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

    /// Configure and activate the part.
    ///
    /// Runs the datasheet bring-up: standby, soft reset, standby again, then
    /// range/cutoff, the data-ready interrupt, and finally the requested
    /// output data rate together with the active bit, followed by a settle
    /// delay.
    pub fn begin(&mut self, lpf: LpfCutoff, odr: OutputDataRate) -> io::Result<()> {
        self.bus.write_register(registers::CTRL_REG1, STANDBY)?;
        // The part resets before it can ACK this write; the resulting bus
        // error is expected.
        let _ = self.bus.write_register(registers::CTRL_REG1, RESET);
        self.bus.write_register(registers::CTRL_REG1, STANDBY)?;

        self.bus
            .write_register(registers::CTRL_REG0, lpf.code() | Range::Dps250.code())?;
        self.bus
            .write_register(registers::CTRL_REG2, DATA_READY_INTERRUPT)?;
        self.bus
            .write_register(registers::CTRL_REG1, odr.code() | ACTIVE)?;

        thread::sleep(ACTIVATION_SETTLE);
        Ok(())
    }

    /// Read all three axes in one bus transaction.
    ///
    /// Also clears a pending data-ready interrupt, which is why pipeline
    /// activation issues one read before listening for edges.
    pub fn read_raw(&mut self) -> io::Result<[i16; 3]> {
        let mut buf = [0u8; 6];
        self.bus.read_block(registers::OUT_X_MSB, &mut buf)?;
        Ok([
            i16::from_be_bytes([buf[0], buf[1]]),
            i16::from_be_bytes([buf[2], buf[3]]),
            i16::from_be_bytes([buf[4], buf[5]]),
        ])
    }

    /// Read the Z axis only.
    pub fn read_raw_z(&mut self) -> io::Result<i16> {
        let mut buf = [0u8; 2];
        self.bus.read_block(registers::OUT_Z_MSB, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Whether fresh samples exist on all three axes; with `wait`, polls the
    /// status register until they do.
    pub fn xyz_ready(&mut self, wait: bool) -> io::Result<bool> {
        self.data_ready(DrStatus::ZYXDR, wait)
    }

    /// Whether a fresh Z sample exists; with `wait`, polls until one does.
    pub fn z_ready(&mut self, wait: bool) -> io::Result<bool> {
        self.data_ready(DrStatus::ZDR, wait)
    }

    fn data_ready(&mut self, flag: DrStatus, wait: bool) -> io::Result<bool> {
        loop {
            let status = DrStatus::from_bits_truncate(self.bus.read_register(registers::DR_STATUS)?);
            if status.contains(flag) {
                return Ok(true);
            }
            if !wait {
                return Ok(false);
            }
        }
    }
}
