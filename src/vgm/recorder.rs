//! Chip backend that records a register log
//!
//! Register writes become YM2608 commands; rendered frames become waits
//! converted to the 44.1 kHz log clock. The audio buffer itself is silent.
//! The same recorder feeds VGM and S98 writers through [`StreamWriter`].

use super::header::VGM_SAMPLE_RATE;
use super::writer::VgmWriter;
use crate::chip::ChipBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Sink for a recorded YM2608 register stream
pub trait StreamWriter: Send {
    /// Register write; bit 8 of `address` selects the port
    fn write_register(&mut self, address: u32, value: u8);

    /// Wait `samples` at 44.1 kHz
    fn write_delay(&mut self, samples: u64);
}

impl StreamWriter for VgmWriter {
    fn write_register(&mut self, address: u32, value: u8) {
        VgmWriter::write_register(self, address, value);
    }

    fn write_delay(&mut self, samples: u64) {
        VgmWriter::write_delay(self, samples);
    }
}

/// Shared access to the writer owned by a [`VgmRecorder`]
pub type VgmWriterHandle = Arc<Mutex<VgmWriter>>;

pub type VgmRecorder = Recorder<VgmWriter>;

pub struct Recorder<W> {
    writer: Arc<Mutex<W>>,
    rate: u32,
    /// Fraction of a log sample carried between buffers, in units of 1/rate
    remainder: u64,
}

impl<W> Recorder<W> {
    pub fn with_writer(writer: W, rate: u32) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            rate: rate.max(1),
            remainder: 0,
        }
    }

    pub fn writer(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.writer)
    }
}

impl VgmRecorder {
    pub fn new(clock: u32, rate: u32) -> Self {
        Self::with_writer(VgmWriter::new(clock), rate)
    }
}

impl<W: StreamWriter> ChipBackend for Recorder<W> {
    fn reset(&mut self) {}

    fn set_register(&mut self, address: u32, value: u8) {
        self.writer.lock().write_register(address, value);
    }

    fn generate(&mut self, buffer: &mut [i16]) {
        buffer.fill(0);
        let frames = (buffer.len() / 2) as u64;
        let scaled = frames * u64::from(VGM_SAMPLE_RATE) + self.remainder;
        let rate = u64::from(self.rate);
        self.remainder = scaled % rate;
        self.writer.lock().write_delay(scaled / rate);
    }

    fn set_rate(&mut self, rate: u32) {
        self.rate = rate.max(1);
        self.remainder = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_follow_rendered_frames() {
        let mut recorder = VgmRecorder::new(7_987_200, 44100);
        let writer = recorder.writer();
        let mut buf = vec![0i16; 735 * 2];
        recorder.set_register(0x28, 0xF0);
        recorder.generate(&mut buf);
        assert_eq!(writer.lock().total_samples(), 735);
        assert_eq!(writer.lock().position(), 4);
    }

    #[test]
    fn test_rate_conversion_keeps_remainder() {
        let mut recorder = VgmRecorder::new(7_987_200, 48000);
        let writer = recorder.writer();
        let mut buf = vec![0i16; 2 * 1000];
        for _ in 0..48 {
            recorder.generate(&mut buf);
        }
        // 48000 frames at 48 kHz is exactly one second
        assert_eq!(writer.lock().total_samples(), 44100);
    }
}
