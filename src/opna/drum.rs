//! Rhythm channels: BD, SD, TOP, HH, TOM, RIM

use super::{OpnaController, DRUM_CHANNELS};

pub(super) const MAX_VOLUME: i32 = 31;

pub(super) const DEFAULT_MASTER_VOLUME: i32 = 0x3F;

pub(super) struct DrumChannel {
    pub(super) volume: i32,
    pub(super) pan: u8,
    pub(super) is_key_on: bool,
    pub(super) is_mute: bool,
}

impl DrumChannel {
    pub(super) fn new() -> Self {
        Self {
            volume: MAX_VOLUME,
            pan: 3,
            is_key_on: false,
            is_mute: false,
        }
    }
}

impl OpnaController {
    pub(super) fn reset_drum(&mut self) {
        for ch in 0..DRUM_CHANNELS {
            let mute = self.drum[ch].is_mute;
            self.drum[ch] = DrumChannel::new();
            self.drum[ch].is_mute = mute;
            self.write_volume_drum(ch);
        }
        self.drum_key_on = 0;
        self.drum_key_off = 0;
        // Dump every instrument
        self.regs.write(0x10, 0xBF);
        self.drum_master_volume = DEFAULT_MASTER_VOLUME;
        self.regs.write(0x11, self.drum_master_volume as u8);
    }

    /// Queue a rhythm key-on, written with the other flags of this tick
    pub fn set_key_on_flag_drum(&mut self, ch: usize) {
        let Some(d) = self.drum.get_mut(ch) else {
            return;
        };
        if d.is_mute {
            return;
        }
        d.is_key_on = true;
        self.drum_key_on |= 1 << ch;
    }

    pub fn set_key_off_flag_drum(&mut self, ch: usize) {
        let Some(d) = self.drum.get_mut(ch) else {
            return;
        };
        d.is_key_on = false;
        self.drum_key_off |= 1 << ch;
    }

    pub(super) fn flush_drum_key_flags(&mut self) {
        if self.drum_key_off != 0 {
            self.regs.write(0x10, 0x80 | self.drum_key_off);
            self.drum_key_off = 0;
        }
        if self.drum_key_on != 0 {
            self.regs.write(0x10, self.drum_key_on);
            self.drum_key_on = 0;
        }
    }

    pub(super) fn set_volume_drum(&mut self, ch: usize, volume: i32) {
        if let Some(d) = self.drum.get_mut(ch) {
            d.volume = volume.clamp(0, MAX_VOLUME);
            self.write_volume_drum(ch);
        }
    }

    pub(super) fn set_pan_drum(&mut self, ch: usize, pan: u8) {
        if let Some(d) = self.drum.get_mut(ch) {
            d.pan = pan & 3;
            self.write_volume_drum(ch);
        }
    }

    /// Rhythm total level, 0-63
    pub fn set_master_volume_drum(&mut self, volume: i32) {
        self.drum_master_volume = volume.clamp(0, DEFAULT_MASTER_VOLUME);
        self.regs.write(0x11, self.drum_master_volume as u8);
    }

    pub(super) fn write_volume_drum(&mut self, ch: usize) {
        let Some(d) = self.drum.get(ch) else {
            return;
        };
        let volume = if d.is_mute { 0 } else { d.volume as u8 };
        self.regs.write(0x18 + ch as u32, (d.pan << 6) | volume);
    }
}
