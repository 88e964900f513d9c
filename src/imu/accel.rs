//! Interrupt-driven accelerometer sampling pipeline.
//!
//! The accelerometer counterpart of [`gyro`](super::gyro): attaches an
//! [`Fxos8700cq`] to its data-ready line and queues raw accelerometer X
//! samples with inter-interrupt deltas. The odometry consumers only need
//! the raw stream, so this pipeline has a single mode; activation and
//! deactivation semantics match the gyro pipeline.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::io::{EdgeInput, RegisterBus};
use crate::queue::BoundedQueue;

use super::fxos8700cq::Fxos8700cq;
use super::Sample;

struct Shared {
    active: AtomicBool,
    ts_last: Mutex<u64>,
}

/// Data-ready-driven accelerometer pipeline.
pub struct AccelMag<B, E>
where
    B: RegisterBus + Send + 'static,
    E: EdgeInput,
{
    device: Arc<Mutex<Fxos8700cq<B>>>,
    irq: E,
    queue: Arc<BoundedQueue<Sample>>,
    shared: Arc<Shared>,
}

impl<B, E> AccelMag<B, E>
where
    B: RegisterBus + Send + 'static,
    E: EdgeInput,
{
    pub fn new(device: Fxos8700cq<B>, irq: E, queue: Arc<BoundedQueue<Sample>>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            irq,
            queue,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                ts_last: Mutex::new(0),
            }),
        }
    }

    /// Configure and activate the underlying part.
    pub fn begin(&mut self) -> io::Result<()> {
        self.device.lock().unwrap().begin()
    }

    /// Queue raw accelerometer X samples with inter-interrupt deltas.
    pub fn activate_raw(&mut self) -> io::Result<()> {
        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        self.irq.on_rising_edge(Box::new(move |timestamp| {
            if !shared.active.load(Ordering::Acquire) {
                return;
            }
            let raw = match device.lock().unwrap().read_raw() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("accel read failed in interrupt context: {e}");
                    return;
                }
            };
            let delta = {
                let mut ts_last = shared.ts_last.lock().unwrap();
                let delta = timestamp - *ts_last;
                *ts_last = timestamp;
                delta
            };
            let sample = Sample {
                value: i32::from(raw[3]),
                delta_ns: delta,
            };
            if !queue.push(sample) {
                warn!("accel queue full, dropping sample");
            }
        }));
        self.arm()
    }

    /// Stop processing interrupts; takes effect at the next interrupt.
    pub fn deactivate(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    fn arm(&mut self) -> io::Result<()> {
        self.device.lock().unwrap().read_raw()?;
        self.queue.clear();
        *self.shared.ts_last.lock().unwrap() = 0;
        self.shared.active.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::fxos8700cq;
    use crate::io::mock::{MockEdge, MockRegisterBus};

    const WHO_AM_I: u8 = 0x0D;

    fn twelve_byte_frame(accel_x: i16) -> Vec<u8> {
        let mut bytes = vec![0u8; 6]; // magnetometer axes
        bytes.extend_from_slice(&accel_x.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes
    }

    fn pipeline(
        bus: &MockRegisterBus,
        edge: &MockEdge,
    ) -> (AccelMag<MockRegisterBus, MockEdge>, Arc<BoundedQueue<Sample>>) {
        bus.set_register(WHO_AM_I, fxos8700cq::DEVICE_ID);
        let device = Fxos8700cq::new(bus.clone()).unwrap();
        let queue = Arc::new(BoundedQueue::new(8));
        (AccelMag::new(device, edge.clone(), Arc::clone(&queue)), queue)
    }

    #[test]
    fn raw_mode_queues_accel_x_with_deltas() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut accel, queue) = pipeline(&bus, &edge);
        bus.queue_block(&twelve_byte_frame(1_024));

        accel.activate_raw().unwrap();
        edge.fire(2_000);
        edge.fire(5_000);

        assert_eq!(queue.pop(), Sample { value: 1_024, delta_ns: 2_000 });
        assert_eq!(queue.pop(), Sample { value: 1_024, delta_ns: 3_000 });
    }

    #[test]
    fn accel_x_is_sign_extended_from_14_bits() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut accel, queue) = pipeline(&bus, &edge);
        bus.queue_block(&twelve_byte_frame(0x2000)); // -8192 once extended

        accel.activate_raw().unwrap();
        edge.fire(1_000);

        assert_eq!(queue.pop().value, -8_192);
    }

    #[test]
    fn deactivated_pipeline_ignores_edges() {
        let bus = MockRegisterBus::new();
        let edge = MockEdge::new();
        let (mut accel, queue) = pipeline(&bus, &edge);
        bus.queue_block(&twelve_byte_frame(5));

        accel.activate_raw().unwrap();
        accel.deactivate();
        edge.fire(1_000);

        assert!(queue.is_empty());
    }
}
