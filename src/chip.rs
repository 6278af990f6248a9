//! Emulated chip backends
//!
//! The controller only talks to the chip through [`ChipBackend`]: register
//! writes in, interleaved stereo PCM out. Addresses carry the port in bit 8
//! (`0x000-0x0FF` port 0, `0x100-0x1FF` port 1).

use parking_lot::Mutex;
use std::sync::Arc;

/// Opaque register-mapped YM2608
pub trait ChipBackend: Send {
    /// Return the chip to its power-on state
    fn reset(&mut self);

    fn set_register(&mut self, address: u32, value: u8);

    /// Fill `buffer` with interleaved stereo samples (`buffer.len() / 2` frames)
    fn generate(&mut self, buffer: &mut [i16]);

    fn set_rate(&mut self, _rate: u32) {}

    fn set_volume_fm(&mut self, _db: f64) {}

    fn set_volume_ssg(&mut self, _db: f64) {}
}

/// Backend producing silence and discarding writes
#[derive(Debug, Default)]
pub struct NullChip;

impl ChipBackend for NullChip {
    fn reset(&mut self) {}

    fn set_register(&mut self, _address: u32, _value: u8) {}

    fn generate(&mut self, buffer: &mut [i16]) {
        buffer.fill(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub address: u32,
    pub value: u8,
}

/// Shared view of the writes received by a [`RegisterLog`]
pub type RegisterLogHandle = Arc<Mutex<Vec<RegisterWrite>>>;

/// Backend recording every write in order
#[derive(Debug, Default)]
pub struct RegisterLog {
    writes: RegisterLogHandle,
    frames: u64,
}

impl RegisterLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> RegisterLogHandle {
        Arc::clone(&self.writes)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl ChipBackend for RegisterLog {
    fn reset(&mut self) {
        self.writes.lock().clear();
    }

    fn set_register(&mut self, address: u32, value: u8) {
        self.writes.lock().push(RegisterWrite { address, value });
    }

    fn generate(&mut self, buffer: &mut [i16]) {
        buffer.fill(0);
        self.frames += (buffer.len() / 2) as u64;
    }
}
