//! Interrupt-driven gyro sampling pipeline.
//!
//! [`Gyro`] couples an [`Fxas21002c`] to a data-ready edge line and a
//! bounded queue. Each activation installs one of five handlers:
//!
//! 1. raw Z samples with inter-interrupt deltas,
//! 2. calibration accumulation (no queue output),
//! 3. zero-offset-corrected samples,
//! 4. offset-corrected samples with dead-zone clamping,
//! 5. integrated Z-axis heading.
//!
//! Activation always clears the queue and re-baselines the delta clock, so
//! the consumer never sees data from an earlier activation. Deactivation
//! flips a flag the handler checks first; an interrupt already being
//! processed completes normally.
//!
//! All mutable pipeline state (timestamps, accumulators, offsets, heading)
//! is written only from the interrupt context while active; the main thread
//! reads it only after deactivating. The queue is the only hand-off to
//! consumer code, and the handler never blocks on it; a full queue drops
//! the sample with a diagnostic.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::io::{EdgeInput, RegisterBus};
use crate::queue::BoundedQueue;

use super::fxas21002c::{Fxas21002c, LpfCutoff, OutputDataRate, Range};
use super::{ImuError, Sample};

/// Interrupts discarded at the start of a calibration; the first readings
/// after activation carry start-up transients.
pub const SETTLING_SAMPLES: u32 = 5;

/// Offset-corrected readings within ±this band are forced to zero.
pub const DEAD_ZONE: i32 = 20;

/// What the pipeline delivers, depending on the active mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GyroReading {
    /// Z-axis rate sample (modes 1, 3 and 4).
    Rate(Sample),
    /// Integrated heading in degrees (mode 5).
    Heading(f32),
}

#[derive(Default)]
struct PipelineState {
    ts_last: u64,
    acc: [i64; 3],
    total: u32,
    zero_offset: [f32; 3],
    calibrated: bool,
    angle: f32,
    sensitivity: f32,
    period: f32,
}

struct Shared {
    active: AtomicBool,
    state: Mutex<PipelineState>,
}

/// Data-ready-driven gyro pipeline.
pub struct Gyro<B, E>
where
    B: RegisterBus + Send + 'static,
    E: EdgeInput,
{
    device: Arc<Mutex<Fxas21002c<B>>>,
    irq: E,
    queue: Arc<BoundedQueue<GyroReading>>,
    shared: Arc<Shared>,
    odr: Option<OutputDataRate>,
}

impl<B, E> Gyro<B, E>
where
    B: RegisterBus + Send + 'static,
    E: EdgeInput,
{
    /// Build a pipeline from a gyro, the edge line carrying its data-ready
    /// interrupt, and the queue that will deliver results.
    pub fn new(device: Fxas21002c<B>, irq: E, queue: Arc<BoundedQueue<GyroReading>>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            irq,
            queue,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                state: Mutex::new(PipelineState::default()),
            }),
            odr: None,
        }
    }

    /// Configure and activate the underlying part.
    pub fn begin(&mut self, lpf: LpfCutoff, odr: OutputDataRate) -> io::Result<()> {
        self.odr = Some(odr);
        self.device.lock().unwrap().begin(lpf, odr)
    }

    /// Stop processing interrupts.
    ///
    /// Takes effect at the next interrupt; one already in flight completes.
    pub fn deactivate(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    /// Mode 1: queue raw Z samples with inter-interrupt deltas.
    pub fn activate_raw(&mut self) -> io::Result<()> {
        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let Some(xyz) = read_raw(&device) else { return };
            let delta = next_delta(&shared, timestamp);
            offer(
                &queue,
                GyroReading::Rate(Sample {
                    value: i32::from(xyz[2]),
                    delta_ns: delta,
                }),
            );
        }));
        self.arm()
    }

    /// Mode 3: queue zero-offset-corrected Z samples.
    pub fn activate_zero_offset(&mut self) -> Result<(), ImuError> {
        self.require_calibrated()?;
        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let Some(xyz) = read_raw(&device) else { return };
            let (delta, offset) = {
                let mut state = shared.state.lock().unwrap();
                let delta = timestamp - state.ts_last;
                state.ts_last = timestamp;
                (delta, state.zero_offset[2])
            };
            let z = i32::from(xyz[2]) - offset as i32;
            offer(&queue, GyroReading::Rate(Sample { value: z, delta_ns: delta }));
        }));
        self.arm()?;
        Ok(())
    }

    /// Mode 4: like [`activate_zero_offset`](Self::activate_zero_offset),
    /// with corrected values inside the dead zone forced to exactly zero.
    pub fn activate_dead_zone(&mut self) -> Result<(), ImuError> {
        self.require_calibrated()?;
        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let Some(xyz) = read_raw(&device) else { return };
            let (delta, offset) = {
                let mut state = shared.state.lock().unwrap();
                let delta = timestamp - state.ts_last;
                state.ts_last = timestamp;
                (delta, state.zero_offset[2])
            };
            let mut z = i32::from(xyz[2]) - offset as i32;
            if (-DEAD_ZONE..=DEAD_ZONE).contains(&z) {
                z = 0;
            }
            offer(&queue, GyroReading::Rate(Sample { value: z, delta_ns: delta }));
        }));
        self.arm()?;
        Ok(())
    }

    /// Mode 2: measure the at-rest zero offset of all three axes.
    ///
    /// Accumulates raw readings for `duration`, discarding the first
    /// [`SETTLING_SAMPLES`] interrupts, then freezes the per-axis averages
    /// as the offsets used by the corrected modes. Nothing is queued while
    /// calibrating. The device must be stationary throughout.
    pub fn calibrate_zero_offset(&mut self, duration: Duration) -> Result<(), ImuError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.acc = [0; 3];
            state.total = 0;
        }

        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |_timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let Some(xyz) = read_raw(&device) else { return };
            let mut state = shared.state.lock().unwrap();
            if state.total >= SETTLING_SAMPLES {
                state.acc[0] += i64::from(xyz[0]);
                state.acc[1] += i64::from(xyz[1]);
                state.acc[2] += i64::from(xyz[2]);
            }
            state.total += 1;
        }));
        self.arm()?;

        thread::sleep(duration);
        self.deactivate();

        let mut state = self.shared.state.lock().unwrap();
        if state.total <= SETTLING_SAMPLES {
            return Err(ImuError::InsufficientSamples {
                interrupts: state.total,
            });
        }
        let denominator = (state.total - SETTLING_SAMPLES) as f32;
        for axis in 0..3 {
            state.zero_offset[axis] = state.acc[axis] as f32 / denominator;
        }
        state.calibrated = true;
        info!(
            "zero offsets from {} samples: x={:.2} y={:.2} z={:.2}",
            denominator, state.zero_offset[0], state.zero_offset[1], state.zero_offset[2]
        );
        Ok(())
    }

    /// Mode 5: queue an integrated Z-axis heading (degrees).
    ///
    /// Each interrupt corrects the raw Z rate by the calibrated offset,
    /// clamps it to zero inside the dead zone, and Euler-integrates it over
    /// the sample period: `angle += z * sensitivity * period`. `range` must
    /// be the full-scale range the part was configured with.
    pub fn activate_heading(&mut self, range: Range) -> Result<(), ImuError> {
        let odr = self.odr.ok_or(ImuError::NotConfigured)?;
        self.require_calibrated()?;
        {
            let mut state = self.shared.state.lock().unwrap();
            state.angle = 0.0;
            state.sensitivity = range.sensitivity();
            state.period = 1.0 / odr.hz();
        }

        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |_timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let Some(xyz) = read_raw(&device) else { return };
            let mut state = shared.state.lock().unwrap();
            let mut z = f32::from(xyz[2]) - state.zero_offset[2];
            if (-(DEAD_ZONE as f32)..=DEAD_ZONE as f32).contains(&z) {
                z = 0.0;
            }
            state.angle += z * state.sensitivity * state.period;
            let angle = state.angle;
            drop(state);
            offer(&queue, GyroReading::Heading(angle));
        }));
        self.arm()?;
        Ok(())
    }

    /// The calibrated zero offsets, if a calibration has completed.
    pub fn zero_offset(&self) -> Option<[f32; 3]> {
        let state = self.shared.state.lock().unwrap();
        state.calibrated.then_some(state.zero_offset)
    }

    fn require_calibrated(&self) -> Result<(), ImuError> {
        if self.shared.state.lock().unwrap().calibrated {
            Ok(())
        } else {
            Err(ImuError::NotCalibrated)
        }
    }

    /// Common activation tail: clear any pending interrupt with a throwaway
    /// read, empty the queue, re-baseline the delta clock, then go live.
    fn arm(&mut self) -> io::Result<()> {
        self.device.lock().unwrap().read_raw()?;
        self.queue.clear();
        self.shared.state.lock().unwrap().ts_last = 0;
        self.shared.active.store(true, Ordering::Release);
        Ok(())
    }
}

fn read_raw<B: RegisterBus>(device: &Arc<Mutex<Fxas21002c<B>>>) -> Option<[i16; 3]> {
    match device.lock().unwrap().read_raw() {
        Ok(xyz) => Some(xyz),
        Err(e) => {
            warn!("gyro read failed in interrupt context: {e}");
            None
        }
    }
}

fn next_delta(shared: &Shared, timestamp: u64) -> u64 {
    let mut state = shared.state.lock().unwrap();
    let delta = timestamp - state.ts_last;
    state.ts_last = timestamp;
    delta
}

fn offer(queue: &BoundedQueue<GyroReading>, reading: GyroReading) {
    if !queue.push(reading) {
        warn!("gyro queue full, dropping sample");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::fxas21002c;
    use crate::io::mock::{MockEdge, MockRegisterBus};
    use approx::assert_relative_eq;

    const WHO_AM_I: u8 = 0x0C;

    fn frame(x: i16, y: i16, z: i16) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(6);
        bytes.extend_from_slice(&x.to_be_bytes());
        bytes.extend_from_slice(&y.to_be_bytes());
        bytes.extend_from_slice(&z.to_be_bytes());
        bytes
    }

    fn pipeline(
        bus: &MockRegisterBus,
        edge: &MockEdge,
        capacity: usize,
    ) -> (Gyro<MockRegisterBus, MockEdge>, Arc<BoundedQueue<GyroReading>>) {
        bus.set_register(WHO_AM_I, fxas21002c::DEVICE_ID);
        let device = Fxas21002c::new(bus.clone()).unwrap();
        let queue = Arc::new(BoundedQueue::new(capacity));
        (Gyro::new(device, edge.clone(), Arc::clone(&queue)), queue)
    }

    /// Calibrate against a constant raw frame already queued on `bus`,
    /// firing interrupts from a helper thread while the pipeline gathers.
    fn calibrate(gyro: &mut Gyro<MockRegisterBus, MockEdge>, edge: &MockEdge) {
        let firing = Arc::new(AtomicBool::new(true));
        let stop = Arc::clone(&firing);
        let trigger = edge.clone();
        let worker = thread::spawn(move || {
            let mut ts = 1u64;
            while stop.load(Ordering::Acquire) {
                trigger.fire(ts);
                ts += 1_000_000;
                thread::sleep(Duration::from_millis(1));
            }
        });
        gyro.calibrate_zero_offset(Duration::from_millis(100)).unwrap();
        firing.store(false, Ordering::Release);
        worker.join().unwrap();
    }

    #[test]
    fn raw_mode_queues_z_with_deltas() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(1, 2, 300));

        gyro.activate_raw().unwrap();
        edge.fire(1_000);
        edge.fire(3_500);

        assert_eq!(
            queue.pop(),
            GyroReading::Rate(Sample { value: 300, delta_ns: 1_000 })
        );
        assert_eq!(
            queue.pop(),
            GyroReading::Rate(Sample { value: 300, delta_ns: 2_500 })
        );
    }

    #[test]
    fn inactive_pipeline_ignores_edges() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 10));

        gyro.activate_raw().unwrap();
        gyro.deactivate();
        edge.fire(1_000);

        assert!(queue.is_empty());
    }

    #[test]
    fn activation_clears_stale_queue_contents() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 1));

        assert!(queue.push(GyroReading::Heading(99.0)));
        gyro.activate_raw().unwrap();

        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_new_samples() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 1);
        bus.queue_block(&frame(0, 0, 7));

        gyro.activate_raw().unwrap();
        edge.fire(1_000);
        edge.fire(2_000);
        edge.fire(3_000);

        // Only the first sample fit; the pipeline kept running.
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.pop(),
            GyroReading::Rate(Sample { value: 7, delta_ns: 1_000 })
        );
    }

    #[test]
    fn calibration_converges_to_constant_input() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, _queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(40, -80, 120));

        calibrate(&mut gyro, &edge);

        let offsets = gyro.zero_offset().unwrap();
        assert_relative_eq!(offsets[0], 40.0);
        assert_relative_eq!(offsets[1], -80.0);
        assert_relative_eq!(offsets[2], 120.0);
    }

    #[test]
    fn calibration_discards_settling_samples() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, _queue) = pipeline(&bus, &edge, 8);

        // One garbage frame for the arm() read, five for the settling
        // discard, then the steady value that must come out exactly.
        for _ in 0..6 {
            bus.queue_block(&frame(9_999, 9_999, 9_999));
        }
        bus.queue_block(&frame(0, 0, 50));

        calibrate(&mut gyro, &edge);

        let offsets = gyro.zero_offset().unwrap();
        assert_relative_eq!(offsets[2], 50.0);
        assert_relative_eq!(offsets[0], 0.0);
    }

    #[test]
    fn too_short_calibration_is_an_error() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, _queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 0));

        // No edges fire at all during this calibration window.
        let result = gyro.calibrate_zero_offset(Duration::from_millis(10));
        assert!(matches!(
            result,
            Err(ImuError::InsufficientSamples { interrupts: 0 })
        ));
        assert!(gyro.zero_offset().is_none());
    }

    #[test]
    fn corrected_modes_require_calibration() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, _queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 0));

        assert!(matches!(
            gyro.activate_zero_offset(),
            Err(ImuError::NotCalibrated)
        ));
        assert!(matches!(
            gyro.activate_dead_zone(),
            Err(ImuError::NotCalibrated)
        ));
        assert!(matches!(
            gyro.activate_heading(Range::Dps250),
            Err(ImuError::NotCalibrated)
        ));
    }

    #[test]
    fn zero_offset_mode_subtracts_the_offset() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 100));

        calibrate(&mut gyro, &edge);

        bus.queue_block(&frame(0, 0, 130)); // arm() consumes the 100-frame
        gyro.activate_zero_offset().unwrap();
        edge.fire(500);

        assert_eq!(
            queue.pop(),
            GyroReading::Rate(Sample { value: 30, delta_ns: 500 })
        );
    }

    #[test]
    fn dead_zone_clamps_small_corrected_values() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 100));

        calibrate(&mut gyro, &edge);

        // After the arm() read: corrected +20, -20, +21, -21.
        bus.queue_block(&frame(0, 0, 120));
        bus.queue_block(&frame(0, 0, 80));
        bus.queue_block(&frame(0, 0, 121));
        bus.queue_block(&frame(0, 0, 79));
        gyro.activate_dead_zone().unwrap();
        for ts in 1..=4 {
            edge.fire(ts * 1_000);
        }

        let values: Vec<i32> = (0..4)
            .map(|_| match queue.pop() {
                GyroReading::Rate(sample) => sample.value,
                other => panic!("unexpected reading {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![0, 0, 21, -21]);
    }

    #[test]
    fn heading_integrates_rate_over_time() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, queue) = pipeline(&bus, &edge, 64);
        bus.queue_block(&frame(0, 0, 100));

        gyro.begin(LpfCutoff::Highest, OutputDataRate::Hz100).unwrap();

        calibrate(&mut gyro, &edge);

        // Corrected rate of 128 LSB at 100 Hz and 250 dps sensitivity:
        // each interrupt adds 128 * 0.0078125 * 0.01 = 0.01 degrees.
        bus.queue_block(&frame(0, 0, 228));
        gyro.activate_heading(Range::Dps250).unwrap();
        let steps = 10;
        for ts in 1..=steps {
            edge.fire(ts * 10_000_000);
        }

        let mut last = 0.0;
        for _ in 0..steps {
            match queue.pop() {
                GyroReading::Heading(angle) => last = angle,
                other => panic!("unexpected reading {other:?}"),
            }
        }
        assert_relative_eq!(last, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn heading_requires_begin() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut gyro, _queue) = pipeline(&bus, &edge, 8);
        bus.queue_block(&frame(0, 0, 100));

        calibrate(&mut gyro, &edge);

        assert!(matches!(
            gyro.activate_heading(Range::Dps250),
            Err(ImuError::NotConfigured)
        ));
    }
}
