//! ADPCM channel and sample memory

use super::tone::{ToneChannel, ToneDetail};
use super::{OpnaController, ADPCM_CHANNELS};
use crate::error::{Error, Result};
use crate::instrument::{AdpcmPatch, AdpcmSample, SequenceCursor, SequenceIterator};
use crate::pitch::{delta_n_adpcm, Note};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(super) const MAX_VOLUME: i32 = 255;

/// Sample memory size in 32-byte units (256 KiB)
pub const ADPCM_MEMORY_UNITS: usize = 0x2000;

const UNIT_BYTES: usize = 32;

/// Control register bits
mod control {
    pub const RESET: u8 = 0x01;
    pub const REPEAT: u8 = 0x10;
    pub const MEMORY_WRITE: u8 = 0x60;
    pub const START: u8 = 0xA0;
}

/// Start and stop addresses of a stored sample, in 32-byte units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleAddress {
    pub start: u16,
    pub stop: u16,
}

pub(super) struct AdpcmChannel {
    pub(super) tone: ToneChannel,
    pub(super) patch: Option<AdpcmPatch>,
    envelope: Option<SequenceCursor>,
    /// Envelope type
    env: i32,
    pan: u8,
    is_releasing: bool,
}

impl AdpcmChannel {
    pub(super) fn new() -> Self {
        Self {
            tone: ToneChannel::new(MAX_VOLUME),
            patch: None,
            envelope: None,
            env: MAX_VOLUME,
            pan: 3,
            is_releasing: false,
        }
    }

    pub(super) fn instrument_number(&self) -> Option<usize> {
        self.patch.as_ref().map(|p| p.number)
    }

    fn level(&self) -> u8 {
        let t = &self.tone;
        if t.is_mute || !(t.is_key_on || self.is_releasing) {
            return 0;
        }
        let level = self.env.min(MAX_VOLUME) - (MAX_VOLUME - t.current_volume())
            - t.tremolo_value()
            + t.sum_volume_slide;
        level.clamp(0, MAX_VOLUME) as u8
    }
}

impl OpnaController {
    pub(super) fn reset_adpcm(&mut self) {
        for ch in 0..ADPCM_CHANNELS {
            let mute = self.adpcm[ch].tone.is_mute;
            self.adpcm[ch] = AdpcmChannel::new();
            self.adpcm[ch].tone.is_mute = mute;
        }
        self.regs.write(0x100, control::RESET);
        self.regs.write(0x101, 0xC2);
        self.regs.write(0x10B, 0);
        self.regs.write(0x10C, 0xFF);
        self.regs.write(0x10D, 0xFF);
        self.adpcm_store_point = 0;
        self.sample_addresses.clear();
    }

    /// Write a sample into ADPCM memory after the ones already stored
    pub fn store_sample_adpcm(&mut self, sample: &AdpcmSample) -> Result<SampleAddress> {
        if let Some(addr) = self.sample_addresses.get(&sample.index) {
            return Ok(*addr);
        }
        let units = sample.data.len().div_ceil(UNIT_BYTES).max(1);
        let available = ADPCM_MEMORY_UNITS - self.adpcm_store_point;
        if units > available {
            return Err(Error::AdpcmMemoryFull {
                required: units,
                available,
            });
        }
        let start = self.adpcm_store_point as u16;
        let stop = (self.adpcm_store_point + units - 1) as u16;
        debug!(sample = sample.index, start, stop, "storing ADPCM sample");

        let pan = self.adpcm[0].pan;
        self.regs.write(0x100, control::RESET);
        self.regs.write(0x100, control::MEMORY_WRITE);
        self.regs.write(0x101, 0x02);
        self.regs.write(0x102, (start & 0xFF) as u8);
        self.regs.write(0x103, (start >> 8) as u8);
        self.regs.write(0x104, (stop & 0xFF) as u8);
        self.regs.write(0x105, (stop >> 8) as u8);
        for &byte in &sample.data {
            self.regs.write(0x108, byte);
        }
        // Pad to the unit boundary
        for _ in sample.data.len()..units * UNIT_BYTES {
            self.regs.write(0x108, 0x80);
        }
        self.regs.write(0x100, 0);
        self.regs.write(0x100, control::RESET);
        self.regs.write(0x101, (pan << 6) | 0x02);

        self.adpcm_store_point += units;
        let addr = SampleAddress { start, stop };
        self.sample_addresses.insert(sample.index, addr);
        Ok(addr)
    }

    /// Forget every stored sample; memory is overwritten by the next stores
    pub fn clear_samples_adpcm(&mut self) {
        self.adpcm_store_point = 0;
        self.sample_addresses.clear();
    }

    pub fn sample_address_adpcm(&self, sample: usize) -> Option<SampleAddress> {
        self.sample_addresses.get(&sample).copied()
    }

    pub fn key_on_adpcm(&mut self, ch: usize, note: Note, octave: i32, pitch: i32, is_jam: bool) {
        self.key_on_adpcm_tone(ch, ToneDetail::new(octave, note, pitch), is_jam);
    }

    pub fn key_on_adpcm_echo(&mut self, ch: usize, buffer: usize) {
        match self.adpcm.get(ch).and_then(|c| c.tone.echo_tone(buffer)) {
            Some(tone) => self.key_on_adpcm_tone(ch, tone, false),
            None => trace!(ch, buffer, "ADPCM echo buffer empty"),
        }
    }

    fn key_on_adpcm_tone(&mut self, ch: usize, tone: ToneDetail, is_jam: bool) {
        let Some(c) = self.adpcm.get_mut(ch) else {
            return;
        };
        if c.tone.prepare_key_on(tone) {
            return;
        }
        let Some((sample_index, repeat)) = c.patch.as_ref().map(|p| (p.sample.index, p.sample.repeat))
        else {
            trace!(ch, "ADPCM key-on without instrument");
            return;
        };
        let was_on = c.tone.is_key_on || c.is_releasing;
        c.tone.front_tone_sequences();
        if let Some(seq) = c.envelope.as_mut() {
            if seq.front().is_some() {
                c.env = seq.command_type().unwrap_or(MAX_VOLUME);
            }
        }
        c.tone.is_key_on = true;
        c.is_releasing = false;
        c.tone.has_preset_tick_event = !is_jam;

        let Some(addr) = self.sample_addresses.get(&sample_index).copied() else {
            trace!(ch, sample = sample_index, "ADPCM sample not stored");
            return;
        };
        if was_on {
            self.regs.write(0x100, control::RESET);
        }
        self.regs.write(0x102, (addr.start & 0xFF) as u8);
        self.regs.write(0x103, (addr.start >> 8) as u8);
        self.regs.write(0x104, (addr.stop & 0xFF) as u8);
        self.regs.write(0x105, (addr.stop >> 8) as u8);
        self.write_pitch_adpcm(ch);
        self.write_volume_adpcm(ch);
        self.write_pan_adpcm(ch);
        let flags = if repeat { control::REPEAT } else { 0 };
        self.regs.write(0x100, control::START | flags);
    }

    pub fn key_off_adpcm(&mut self, ch: usize, is_jam: bool) {
        let Some(c) = self.adpcm.get_mut(ch) else {
            return;
        };
        c.tone.release_tone_sequences();
        let has_release = c
            .envelope
            .as_ref()
            .is_some_and(|s| s.sequence().release_begin().is_some());
        if let Some(seq) = c.envelope.as_mut() {
            if seq.next(true).is_some() {
                c.env = seq.command_type().unwrap_or(0);
            }
        }
        c.tone.is_key_on = false;
        c.is_releasing = has_release;
        c.tone.has_preset_tick_event = !is_jam;
        if has_release {
            self.write_volume_adpcm(ch);
        } else {
            self.regs.write(0x100, control::RESET);
        }
    }

    /// Attach an instrument, storing its sample in memory if needed
    pub fn set_instrument_adpcm(&mut self, ch: usize, patch: AdpcmPatch) {
        if ch >= ADPCM_CHANNELS {
            return;
        }
        if let Err(e) = self.store_sample_adpcm(&patch.sample) {
            warn!(sample = patch.sample.index, "{}", e);
        }
        let c = &mut self.adpcm[ch];
        c.envelope = patch
            .envelope
            .as_ref()
            .map(|s| SequenceCursor::new(Arc::clone(s)));
        if c.envelope.is_none() {
            c.env = MAX_VOLUME;
        }
        c.tone.set_instrument_arpeggio(patch.arpeggio.as_ref());
        c.tone.set_instrument_pitch(patch.pitch.as_ref());
        c.patch = Some(patch);
    }

    pub(super) fn set_pan_adpcm(&mut self, ch: usize, pan: u8) {
        if let Some(c) = self.adpcm.get_mut(ch) {
            c.pan = pan & 3;
            self.write_pan_adpcm(ch);
        }
    }

    pub(super) fn tick_event_adpcm(&mut self, ch: usize) {
        let Some(c) = self.adpcm.get_mut(ch) else {
            return;
        };
        if c.tone.has_preset_tick_event {
            c.tone.has_preset_tick_event = false;
            return;
        }
        c.tone.step_tone_sequences(false);
        let mut volume_changed = false;
        if let Some(seq) = c.envelope.as_mut() {
            if seq.next(false).is_some() {
                c.env = seq.command_type().unwrap_or(0);
                volume_changed = true;
            }
        }
        volume_changed |= c.tone.step_volume_effects();
        let tone_changed = c.tone.need_tone_set;
        if tone_changed {
            self.write_pitch_adpcm(ch);
        }
        if volume_changed {
            self.write_volume_adpcm(ch);
        }
    }

    pub(super) fn halt_sequences_adpcm(&mut self, ch: usize) {
        if let Some(c) = self.adpcm.get_mut(ch) {
            c.tone.halt();
            if let Some(seq) = c.envelope.as_mut() {
                seq.end();
            }
        }
    }

    /// Stop playback at once, ending any release phase
    pub(super) fn silence_adpcm(&mut self, ch: usize) {
        let Some(c) = self.adpcm.get_mut(ch) else {
            return;
        };
        c.tone.is_key_on = false;
        c.is_releasing = false;
        self.halt_sequences_adpcm(ch);
        self.regs.write(0x100, control::RESET);
        self.write_volume_adpcm(ch);
    }

    pub(super) fn write_pitch_adpcm(&mut self, ch: usize) {
        let Some(c) = self.adpcm.get_mut(ch) else {
            return;
        };
        c.tone.need_tone_set = false;
        let Some(sample) = c.patch.as_ref().map(|p| &p.sample) else {
            return;
        };
        let t = &c.tone;
        let delta_n = delta_n_adpcm(
            t.key_tone.note,
            t.key_tone.octave,
            t.pitch_offset(),
            sample.root_key,
            sample.root_delta_n,
        );
        self.regs.write(0x109, (delta_n & 0xFF) as u8);
        self.regs.write(0x10A, (delta_n >> 8) as u8);
    }

    pub(super) fn write_volume_adpcm(&mut self, ch: usize) {
        if let Some(c) = self.adpcm.get(ch) {
            self.regs.write(0x10B, c.level());
        }
    }

    fn write_pan_adpcm(&mut self, ch: usize) {
        if let Some(c) = self.adpcm.get(ch) {
            self.regs.write(0x101, (c.pan << 6) | 0x02);
        }
    }
}
