//! Scan post-processing: per-reading angles and Cartesian coordinates.
//!
//! A scan indexes readings by half-degree step, but the servo can only stop
//! on whole controller steps (0.25 µs pulse-width increments), so the true
//! angle of reading `i` is the ideal `i/2`° snapped to the servo's step
//! grid. The grid pitch comes from the unit's servo parameters (the pulse
//! widths for 0°, 90° and 180°) reported by
//! [`servo_parms`](super::Lidar::servo_parms).

/// Range readings at or below this value (cm) are sensor noise, not returns.
pub const MIN_VALID_RANGE: i16 = 5;

/// Servo step geometry derived from the unit's calibration parameters.
#[derive(Debug, Clone, Copy)]
pub struct ServoCalibration {
    steps_per_degree: f32,
}

impl ServoCalibration {
    /// Build from the three pulse widths (µs) for 0°, 90° and 180°. The
    /// controller positions in 0.25 µs steps, so the 180° sweep spans
    /// `(parms[2] - parms[0]) * 4` steps.
    pub fn from_parms(parms: [i16; 3]) -> Self {
        let steps_in_180 = f32::from(parms[2] - parms[0]) * 4.0;
        Self {
            steps_per_degree: steps_in_180 / 180.0,
        }
    }

    /// Snap an ideal angle (degrees) to the nearest whole servo step.
    pub fn snap_degrees(&self, ideal_deg: f32) -> f32 {
        (ideal_deg * self.steps_per_degree + 0.5).floor() / self.steps_per_degree
    }
}

/// One reading of a scan, located in the robot's polar frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPoint {
    /// Position in the 361-reading scan (half-degree steps).
    pub index: usize,
    /// Actual measurement angle in radians, servo-step corrected.
    pub theta: f32,
    /// Radial distance, `None` for a noise reading.
    pub range: Option<f32>,
}

impl ScanPoint {
    /// Cartesian `(x, y)` of the reading, `None` if the range was invalid.
    pub fn cartesian(&self) -> Option<(f32, f32)> {
        let range = self.range?;
        Some((self.theta.cos() * range, self.theta.sin() * range))
    }
}

/// Locate every reading of a raw scan.
pub fn process_scan(ranges: &[i16], calibration: &ServoCalibration) -> Vec<ScanPoint> {
    ranges
        .iter()
        .enumerate()
        .map(|(index, &raw)| {
            let ideal_deg = index as f32 / 2.0;
            let theta = calibration.snap_degrees(ideal_deg).to_radians();
            let range = (raw > MIN_VALID_RANGE).then_some(f32::from(raw));
            ScanPoint { index, theta, range }
        })
        .collect()
}
