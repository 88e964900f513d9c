//! Scripted in-memory implementations of the hardware traits.
//!
//! Each mock is a cloneable handle over shared state, so a test can keep one
//! handle for scripting and assertions while the driver under test owns
//! another.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{ByteChannel, DigitalOutput, EdgeHandler, EdgeInput, RegisterBus};

#[derive(Default)]
struct ChannelState {
    written: Vec<u8>,
    reads: VecDeque<u8>,
    write_failures: usize,
}

/// Byte channel fed from a scripted response queue.
///
/// Reads that outrun the queue fail with `TimedOut`, mimicking a serial
/// port whose device stopped talking.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes the device will "send" on subsequent reads.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.state.lock().unwrap().reads.extend(bytes);
    }

    /// Make the next `count` write calls fail with `BrokenPipe`.
    pub fn fail_writes(&self, count: usize) {
        self.state.lock().unwrap().write_failures = count;
    }

    /// Everything the driver wrote so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    /// Scripted response bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().reads.len()
    }
}

impl ByteChannel for MockChannel {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.reads.len() < buf.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "response queue empty"));
        }
        for slot in buf.iter_mut() {
            *slot = state.reads.pop_front().unwrap();
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.state.lock().unwrap().reads.len())
    }
}

/// Digital output that records its level and counts level changes.
#[derive(Clone)]
pub struct MockPin {
    active: Arc<AtomicBool>,
    transitions: Arc<AtomicU64>,
}

impl MockPin {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            transitions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Level changes observed since creation.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Acquire)
    }
}

impl Default for MockPin {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalOutput for MockPin {
    fn set_active(&mut self, active: bool) -> io::Result<()> {
        let previous = self.active.swap(active, Ordering::AcqRel);
        if previous != active {
            self.transitions.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Edge input whose edges are fired by the test.
#[derive(Clone, Default)]
pub struct MockEdge {
    slot: Arc<Mutex<Option<EdgeHandler>>>,
}

impl MockEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the registered handler as if a rising edge arrived at
    /// `timestamp_ns`. Does nothing if no handler is registered.
    pub fn fire(&self, timestamp_ns: u64) {
        if let Some(handler) = self.slot.lock().unwrap().as_mut() {
            handler(timestamp_ns);
        }
    }

    pub fn has_handler(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl EdgeInput for MockEdge {
    fn on_rising_edge(&mut self, handler: EdgeHandler) {
        *self.slot.lock().unwrap() = Some(handler);
    }

    fn clear_handler(&mut self) {
        *self.slot.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct BusState {
    registers: HashMap<u8, u8>,
    writes: Vec<(u8, u8)>,
    blocks: VecDeque<Vec<u8>>,
}

/// Register bus with a scripted queue of block-read frames.
///
/// Block reads pop queued frames until one remains; the final frame then
/// repeats forever, which lets a test script "the sensor keeps reading X"
/// with a single frame.
#[derive(Clone, Default)]
pub struct MockRegisterBus {
    state: Arc<Mutex<BusState>>,
}

impl MockRegisterBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&self, register: u8, value: u8) {
        self.state.lock().unwrap().registers.insert(register, value);
    }

    pub fn queue_block(&self, bytes: &[u8]) {
        self.state.lock().unwrap().blocks.push_back(bytes.to_vec());
    }

    /// All (register, value) writes in order.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.state.lock().unwrap().writes.clone()
    }
}

impl RegisterBus for MockRegisterBus {
    fn read_register(&mut self, register: u8) -> io::Result<u8> {
        Ok(*self.state.lock().unwrap().registers.get(&register).unwrap_or(&0))
    }

    fn write_register(&mut self, register: u8, value: u8) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.writes.push((register, value));
        state.registers.insert(register, value);
        Ok(())
    }

    fn read_block(&mut self, _register: u8, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let frame = if state.blocks.len() > 1 {
            state.blocks.pop_front()
        } else {
            state.blocks.front().cloned()
        };
        buf.fill(0);
        if let Some(frame) = frame {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
        }
        Ok(())
    }
}
