//! List serial ports with their USB identities.
//!
//! The robot's USB peripherals get device files in plug order, so discovery
//! matches on vendor/product ID; this shows what is actually connected.

use anyhow::Result;
use robot_hardware::serial;
use serialport::SerialPortType;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    for port in serial::list_ports()? {
        match port.port_type {
            SerialPortType::UsbPort(usb) => println!(
                "{}  usb {:04x}:{:04x}  {} {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.manufacturer.as_deref().unwrap_or("?"),
                usb.product.as_deref().unwrap_or("?"),
            ),
            other => println!("{}  {:?}", port.port_name, other),
        }
    }
    Ok(())
}
