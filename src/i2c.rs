//! Linux I2C register-bus adapter.
//!
//! Wraps one slave address on a `/dev/i2c-*` bus as a [`RegisterBus`].
//! Block reads are issued as a register-pointer write followed by a read,
//! which every sensor in this crate supports via register auto-increment.

use std::io;
use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use crate::io::RegisterBus;

/// One I2C slave opened through the Linux i2c-dev interface.
pub struct I2cRegisterBus {
    device: LinuxI2CDevice,
}

impl I2cRegisterBus {
    /// Open `bus` (e.g. `/dev/i2c-1`) and address `slave`.
    pub fn open<P: AsRef<Path>>(bus: P, slave: u16) -> io::Result<Self> {
        let device = LinuxI2CDevice::new(bus, slave).map_err(io::Error::other)?;
        Ok(Self { device })
    }
}

impl RegisterBus for I2cRegisterBus {
    fn read_register(&mut self, register: u8) -> io::Result<u8> {
        self.device
            .smbus_read_byte_data(register)
            .map_err(io::Error::other)
    }

    fn write_register(&mut self, register: u8, value: u8) -> io::Result<()> {
        self.device
            .smbus_write_byte_data(register, value)
            .map_err(io::Error::other)
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> io::Result<()> {
        self.device.write(&[register]).map_err(io::Error::other)?;
        self.device.read(buf).map_err(io::Error::other)
    }
}
