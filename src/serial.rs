//! Serial port access and USB device-file discovery.
//!
//! [`SerialChannel`] adapts a [`serialport`] port to the crate's
//! [`ByteChannel`] trait. Reads block up to the configured timeout; the
//! retry layers above treat a timeout as an ordinary I/O failure.
//!
//! Both serial peripherals (motor controller and lidar) enumerate as USB CDC
//! devices whose `/dev` names are assigned in plug order, so callers locate
//! them with [`find_device_files`] (match by USB vendor/product ID) and then
//! confirm which unit answered with the driver's identity check.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::debug;

use crate::io::ByteChannel;

/// Default per-read timeout. Generous compared to any single protocol
/// exchange; device-absent cases are detected much faster by the explicit
/// liveness checks.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// A serial device file opened as a byte channel.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Open `device_file` (e.g. `/dev/ttyACM0`) at `baud`, 8N1, with the
    /// default timeout.
    pub fn open(device_file: &str, baud: u32) -> io::Result<Self> {
        let port = serialport::new(device_file, baud)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(io::Error::other)?;
        debug!("opened {device_file} at {baud} baud");
        Ok(Self { port })
    }

    /// Change the blocking-read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }
}

impl ByteChannel for SerialChannel {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.port.read_exact(buf)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read().map_err(io::Error::other)? as usize)
    }
}

/// Device files of all connected USB serial devices matching
/// `vendor_id`/`product_id`.
///
/// Several identical adapters may be plugged in at once, so this returns
/// every match; the caller narrows the list with a per-device identity
/// check.
pub fn find_device_files(vendor_id: u16, product_id: u16) -> io::Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(io::Error::other)?;
    Ok(ports
        .into_iter()
        .filter(|port| {
            matches!(
                &port.port_type,
                SerialPortType::UsbPort(usb) if usb.vid == vendor_id && usb.pid == product_id
            )
        })
        .map(|port| port.port_name)
        .collect())
}

/// All serial ports the platform reports, for diagnostic listings.
pub fn list_ports() -> io::Result<Vec<SerialPortInfo>> {
    serialport::available_ports().map_err(io::Error::other)
}
