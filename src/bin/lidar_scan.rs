//! Run one lidar scan and print the result.

use anyhow::{bail, Result};
use clap::Parser;
use robot_hardware::lidar::point::{self, ServoCalibration};
use robot_hardware::lidar::Lidar;
use robot_hardware::serial::SerialChannel;
use tracing::info;

#[derive(Parser)]
#[command(about = "Warm up the lidar unit, scan 180 degrees and print ranges")]
struct Args {
    /// Serial device file, e.g. /dev/ttyUSB0
    device: String,

    /// Delay between servo step and reading, in ms (0 = unit default)
    #[arg(long, default_value_t = 0)]
    delay: i16,

    /// Warmup period code, 0 (seconds) to 5 (minutes)
    #[arg(long, default_value_t = 0)]
    warmup: i16,

    /// Print every reading instead of a summary
    #[arg(long)]
    full: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let channel = SerialChannel::open(&args.device, 115_200)?;
    let mut lidar = Lidar::new(channel);

    if !lidar.verify_identity()? {
        bail!("device at {} is not a lidar unit", args.device);
    }

    info!("warming up (period code {})", args.warmup);
    lidar.warmup(args.warmup)?;

    let calibration = ServoCalibration::from_parms(lidar.servo_parms()?);

    info!("scanning");
    lidar.scan(args.delay)?;
    let ranges = lidar.scan_retrieve()?;
    let points = point::process_scan(&ranges, &calibration);

    let valid = points.iter().filter(|p| p.range.is_some()).count();
    info!("{valid}/{} readings valid", points.len());

    for point in &points {
        if !args.full && point.index % 20 != 0 {
            continue;
        }
        match point.cartesian() {
            Some((x, y)) => info!(
                "{:3}  {:6.1}°  rho {:6.1}  x {:7.1}  y {:7.1}",
                point.index,
                point.theta.to_degrees(),
                point.range.unwrap_or_default(),
                x,
                y
            ),
            None => info!("{:3}  {:6.1}°  (no return)", point.index, point.theta.to_degrees()),
        }
    }
    Ok(())
}
