//! SSG channels
//!
//! Square tone, noise and the shared hardware envelope. Waveforms other than
//! the plain square are produced with the hardware envelope, so a channel
//! playing one of them owns the envelope registers while it sounds.

use super::tone::{ToneChannel, ToneDetail};
use super::{OpnaController, SSG_CHANNELS};
use crate::instrument::command_sequence::{check_data_type, data2ratio, data2shift, DataType};
use crate::instrument::{CommandSequence, SequenceCursor, SequenceIterator, SsgPatch};
use crate::pitch::{pitch_ssg_saw, pitch_ssg_square, pitch_ssg_triangle, Note};
use std::sync::Arc;
use tracing::trace;

pub(super) const MAX_VOLUME: i32 = 15;

/// Volume register value handing the level to the hardware envelope
const HARD_ENVELOPE_VOLUME: u8 = 0x10;

/// Envelope sequence types from here select a hardware envelope shape
const HARD_ENVELOPE_TYPE_BASE: i32 = 16;

/// Tone/noise sequence types from here are noise only
const NOISE_ONLY_TYPE_BASE: i32 = 33;

/// Waveform sequence type values
pub mod waveform {
    pub const SQUARE: i32 = 0;
    pub const TRIANGLE: i32 = 1;
    pub const SAW: i32 = 2;
    pub const INV_SAW: i32 = 3;
    pub const SQ_MASK_TRIANGLE: i32 = 4;
    pub const SQ_MASK_SAW: i32 = 5;
    pub const SQ_MASK_INV_SAW: i32 = 6;
}

/// Hardware envelope shapes producing repeating waves
const SHAPE_TRIANGLE: u8 = 0x0E;
const SHAPE_SAW: u8 = 0x0C;
const SHAPE_INV_SAW: u8 = 0x08;

/// Hardware envelope period for a tone period and a unit's data word
pub fn hard_env_period(tone_period: u16, data: i32) -> u16 {
    let tp = u32::from(tone_period);
    let period = match check_data_type(data) {
        DataType::Raw => (data & 0xFFFF) as u32,
        DataType::Ratio => {
            let (a, b) = data2ratio(data);
            if a == 0 {
                0
            } else {
                tp * b as u32 / (a as u32 * 16)
            }
        }
        DataType::RightShift => (tp >> data2shift(data).min(31)) >> 4,
        DataType::LeftShift => (tp << data2shift(data).min(16)) >> 4,
        DataType::NoData => tp >> 4,
    };
    period.min(0xFFFF) as u16
}

pub(super) struct SsgChannel {
    pub(super) tone: ToneChannel,
    pub(super) patch: Option<SsgPatch>,
    waveform: Option<SequenceCursor>,
    tone_noise: Option<SequenceCursor>,
    envelope: Option<SequenceCursor>,
    /// Waveform type and data
    wave: (i32, i32),
    /// Envelope type and data
    env: (i32, i32),
    /// Tone/noise sequence type
    tone_noise_type: i32,
    /// `0V` override: bit 0 tone, bit 1 noise
    tone_noise_mix: Option<u8>,
    noise_period: Option<u8>,
    /// `0H`/`0I` override of the hardware envelope period
    hard_period: Option<u16>,
    /// `0Exy`: shift and shape
    auto_envelope: Option<(i32, u8)>,
    is_releasing: bool,
    /// Hardware envelope shape last written by this channel
    written_shape: Option<u8>,
}

impl SsgChannel {
    pub(super) fn new() -> Self {
        Self {
            tone: ToneChannel::new(MAX_VOLUME),
            patch: None,
            waveform: None,
            tone_noise: None,
            envelope: None,
            wave: (waveform::SQUARE, -1),
            env: (MAX_VOLUME, -1),
            tone_noise_type: 0,
            tone_noise_mix: None,
            noise_period: None,
            hard_period: None,
            auto_envelope: None,
            is_releasing: false,
            written_shape: None,
        }
    }

    pub(super) fn instrument_number(&self) -> Option<usize> {
        self.patch.as_ref().map(|p| p.number)
    }

    fn tone_period(&self) -> u16 {
        let t = &self.tone;
        pitch_ssg_square(t.key_tone.note, t.key_tone.octave, t.pitch_offset())
    }

    /// Shape and period of the hardware envelope this channel needs
    fn hard_envelope(&self) -> Option<(u8, u16)> {
        let t = &self.tone;
        let (note, octave, pitch) = (t.key_tone.note, t.key_tone.octave, t.pitch_offset());
        let tp = self.tone_period();
        let from_wave = match self.wave.0 {
            waveform::TRIANGLE => Some((SHAPE_TRIANGLE, pitch_ssg_triangle(note, octave, pitch))),
            waveform::SAW => Some((SHAPE_SAW, pitch_ssg_saw(note, octave, pitch))),
            waveform::INV_SAW => Some((SHAPE_INV_SAW, pitch_ssg_saw(note, octave, pitch))),
            waveform::SQ_MASK_TRIANGLE => Some((SHAPE_TRIANGLE, hard_env_period(tp, self.wave.1))),
            waveform::SQ_MASK_SAW => Some((SHAPE_SAW, hard_env_period(tp, self.wave.1))),
            waveform::SQ_MASK_INV_SAW => Some((SHAPE_INV_SAW, hard_env_period(tp, self.wave.1))),
            _ => None,
        };
        let hard = from_wave
            .or_else(|| {
                (self.env.0 >= HARD_ENVELOPE_TYPE_BASE).then(|| {
                    let shape = (((self.env.0 - HARD_ENVELOPE_TYPE_BASE) & 7) | 8) as u8;
                    (shape, hard_env_period(tp, self.env.1))
                })
            })
            .or_else(|| {
                self.auto_envelope.map(|(shift, shape)| {
                    let period = if shift >= 0 {
                        (u32::from(tp) >> shift.min(31)) >> 4
                    } else {
                        (u32::from(tp) << (-shift).min(16)) >> 4
                    };
                    (shape, period.min(0xFFFF) as u16)
                })
            });
        hard.map(|(shape, period)| (shape, self.hard_period.unwrap_or(period)))
    }

    /// (tone enabled, noise enabled)
    fn mix(&self) -> (bool, bool) {
        let (tone, noise) = match self.tone_noise_mix {
            Some(mix) => (mix & 1 != 0, mix & 2 != 0),
            None => match self.tone_noise_type {
                0 => (true, false),
                t if t < NOISE_ONLY_TYPE_BASE => (true, true),
                _ => (false, true),
            },
        };
        let square = self.wave.0 == waveform::SQUARE || self.wave.0 >= waveform::SQ_MASK_TRIANGLE;
        (tone && square, noise)
    }

    fn is_sounding(&self) -> bool {
        self.tone.is_key_on || self.is_releasing
    }

    fn volume_register(&self) -> u8 {
        if self.tone.is_mute || !self.is_sounding() {
            return 0;
        }
        if self.hard_envelope().is_some() {
            return HARD_ENVELOPE_VOLUME;
        }
        let t = &self.tone;
        let level = self.env.0.min(MAX_VOLUME) - (MAX_VOLUME - t.current_volume())
            - t.tremolo_value()
            + t.sum_volume_slide;
        level.clamp(0, MAX_VOLUME) as u8
    }

    fn apply_tone_noise(&mut self) {
        if let Some(ty) = self.tone_noise.as_ref().and_then(|s| s.command_type()) {
            self.tone_noise_type = ty;
            self.noise_period = match ty {
                0 => None,
                t if t < NOISE_ONLY_TYPE_BASE => Some((t - 1) as u8),
                t => Some((t - NOISE_ONLY_TYPE_BASE) as u8),
            };
        }
    }
}

impl OpnaController {
    pub(super) fn reset_ssg(&mut self) {
        for ch in 0..SSG_CHANNELS {
            let mute = self.ssg[ch].tone.is_mute;
            self.ssg[ch] = SsgChannel::new();
            self.ssg[ch].tone.is_mute = mute;
            self.regs.write(0x08 + ch as u32, 0);
        }
        self.ssg_mixer = 0x3F;
        self.regs.write(0x07, self.ssg_mixer);
    }

    pub fn key_on_ssg(&mut self, ch: usize, note: Note, octave: i32, pitch: i32, is_jam: bool) {
        self.key_on_ssg_tone(ch, ToneDetail::new(octave, note, pitch), is_jam);
    }

    pub fn key_on_ssg_echo(&mut self, ch: usize, buffer: usize) {
        match self.ssg.get(ch).and_then(|c| c.tone.echo_tone(buffer)) {
            Some(tone) => self.key_on_ssg_tone(ch, tone, false),
            None => trace!(ch, buffer, "SSG echo buffer empty"),
        }
    }

    fn key_on_ssg_tone(&mut self, ch: usize, tone: ToneDetail, is_jam: bool) {
        let Some(c) = self.ssg.get_mut(ch) else {
            return;
        };
        if c.tone.prepare_key_on(tone) {
            return;
        }
        c.tone.front_tone_sequences();
        if let Some(seq) = c.waveform.as_mut() {
            if seq.front().is_some() {
                c.wave = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        if let Some(seq) = c.tone_noise.as_mut() {
            seq.front();
        }
        c.apply_tone_noise();
        if let Some(seq) = c.envelope.as_mut() {
            if seq.front().is_some() {
                c.env = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        c.tone.is_key_on = true;
        c.is_releasing = false;
        c.tone.has_preset_tick_event = !is_jam;
        self.write_ssg_output(ch, true);
    }

    pub fn key_off_ssg(&mut self, ch: usize, is_jam: bool) {
        let Some(c) = self.ssg.get_mut(ch) else {
            return;
        };
        c.tone.release_tone_sequences();
        let has_release = c
            .envelope
            .as_ref()
            .is_some_and(|s| s.sequence().release_begin().is_some());
        if let Some(seq) = c.envelope.as_mut() {
            if seq.next(true).is_some() {
                c.env = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        if let Some(seq) = c.waveform.as_mut() {
            if seq.next(true).is_some() {
                c.wave = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        c.tone.is_key_on = false;
        c.is_releasing = has_release;
        c.tone.has_preset_tick_event = !is_jam;
        self.write_ssg_output(ch, false);
    }

    pub fn set_instrument_ssg(&mut self, ch: usize, patch: SsgPatch) {
        let Some(c) = self.ssg.get_mut(ch) else {
            return;
        };
        let cursor = |s: &Option<Arc<CommandSequence>>| s.as_ref().map(|s| SequenceCursor::new(Arc::clone(s)));
        c.waveform = cursor(&patch.waveform);
        c.tone_noise = cursor(&patch.tone_noise);
        c.envelope = cursor(&patch.envelope);
        c.tone.set_instrument_arpeggio(patch.arpeggio.as_ref());
        c.tone.set_instrument_pitch(patch.pitch.as_ref());
        c.hard_period = None;
        if c.waveform.is_none() {
            c.wave = (waveform::SQUARE, -1);
        }
        if c.tone_noise.is_none() {
            c.tone_noise_type = 0;
            c.noise_period = None;
        }
        if c.envelope.is_none() {
            c.env = (MAX_VOLUME, -1);
        }
        c.patch = Some(patch);
    }

    /// `0Vxx`: bit 0 tone, bit 1 noise
    pub fn set_tone_noise_mix_ssg(&mut self, ch: usize, mix: u8) {
        if let Some(c) = self.ssg.get_mut(ch) {
            c.tone_noise_mix = Some(mix & 3);
            self.write_ssg_output(ch, false);
        }
    }

    pub fn set_noise_pitch_ssg(&mut self, ch: usize, period: u8) {
        if let Some(c) = self.ssg.get_mut(ch) {
            c.noise_period = Some(period & 0x1F);
            self.write_ssg_output(ch, false);
        }
    }

    /// Replace the high or low byte of the hardware envelope period
    pub fn set_hard_envelope_period_ssg(&mut self, ch: usize, high: bool, period: u8) {
        let Some(c) = self.ssg.get(ch) else {
            return;
        };
        let current = c
            .hard_period
            .or_else(|| c.hard_envelope().map(|(_, p)| p))
            .unwrap_or(0);
        let value = if high {
            (current & 0x00FF) | (u16::from(period) << 8)
        } else {
            (current & 0xFF00) | u16::from(period)
        };
        self.ssg[ch].hard_period = Some(value);
        self.write_ssg_output(ch, false);
    }

    /// `0Exy`: hardware envelope following the tone, `None` to disable
    pub fn set_auto_envelope_ssg(&mut self, ch: usize, auto: Option<(i32, u8)>) {
        if let Some(c) = self.ssg.get_mut(ch) {
            c.auto_envelope = auto.map(|(shift, shape)| (shift, shape & 0x0F));
            c.hard_period = None;
            self.write_ssg_output(ch, true);
        }
    }

    pub(super) fn tick_event_ssg(&mut self, ch: usize) {
        let Some(c) = self.ssg.get_mut(ch) else {
            return;
        };
        if c.tone.has_preset_tick_event {
            c.tone.has_preset_tick_event = false;
            return;
        }
        c.tone.step_tone_sequences(false);
        if let Some(seq) = c.waveform.as_mut() {
            if seq.next(false).is_some() {
                c.wave = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        let tone_noise_changed = c.tone_noise.as_mut().is_some_and(|s| s.next(false).is_some());
        if tone_noise_changed {
            c.apply_tone_noise();
        }
        if let Some(seq) = c.envelope.as_mut() {
            if seq.next(false).is_some() {
                c.env = (seq.command_type().unwrap_or(0), seq.command_data().unwrap_or(-1));
            }
        }
        c.tone.step_volume_effects();
        self.write_ssg_output(ch, false);
    }

    pub(super) fn halt_sequences_ssg(&mut self, ch: usize) {
        if let Some(c) = self.ssg.get_mut(ch) {
            c.tone.halt();
            for seq in [&mut c.waveform, &mut c.tone_noise, &mut c.envelope]
                .into_iter()
                .flatten()
            {
                seq.end();
            }
        }
    }

    /// Cut a channel immediately, ending any release phase
    pub(super) fn silence_ssg(&mut self, ch: usize) {
        let Some(c) = self.ssg.get_mut(ch) else {
            return;
        };
        c.tone.is_key_on = false;
        c.is_releasing = false;
        self.halt_sequences_ssg(ch);
        self.write_ssg_output(ch, false);
        self.ssg_mixer |= 0x09 << ch;
        self.regs.write(0x07, self.ssg_mixer);
    }

    /// Bring every register of a channel in line with its state
    ///
    /// Unchanged values are dropped by the register cache; the envelope shape
    /// restarts the envelope, so it is written only when it changes or when
    /// `restart` is set.
    pub(super) fn write_ssg_output(&mut self, ch: usize, restart: bool) {
        let Some(c) = self.ssg.get(ch) else {
            return;
        };
        let base = ch as u32;
        let tp = c.tone_period();
        let (tone_on, noise_on) = c.mix();
        let noise_period = c.noise_period;
        let hard = if c.is_sounding() { c.hard_envelope() } else { None };
        let volume = c.volume_register();
        let written_shape = c.written_shape;

        self.regs.write(base * 2, (tp & 0xFF) as u8);
        self.regs.write(base * 2 + 1, (tp >> 8) as u8);

        let mut mixer = self.ssg_mixer | (0x09 << ch);
        if tone_on {
            mixer &= !(1 << ch);
        }
        if noise_on {
            mixer &= !(0x08 << ch);
            if let Some(np) = noise_period {
                self.regs.write(0x06, np);
            }
        }
        self.ssg_mixer = mixer;
        self.regs.write(0x07, mixer);

        if let Some((shape, period)) = hard {
            self.regs.write(0x0B, (period & 0xFF) as u8);
            self.regs.write(0x0C, (period >> 8) as u8);
            if restart || written_shape != Some(shape) {
                self.regs.write(0x0D, shape);
                self.ssg[ch].written_shape = Some(shape);
            }
        } else {
            self.ssg[ch].written_shape = None;
        }

        self.regs.write(0x08 + base, volume);
        self.ssg[ch].tone.need_tone_set = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::NullChip;
    use crate::instrument::command_sequence::{ratio2data, shift2data};
    use crate::instrument::{CommandSequenceUnit, ReleaseType, SequenceType};
    use crate::module::SoundSource;

    fn controller() -> OpnaController {
        OpnaController::new(Box::new(NullChip), 44100)
    }

    fn seq(units: &[(i32, i32)]) -> Arc<CommandSequence> {
        Arc::new(CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            units.iter().map(|&(t, d)| CommandSequenceUnit::new(t, d)).collect(),
        ))
    }

    fn patch() -> SsgPatch {
        SsgPatch {
            number: 0,
            waveform: None,
            tone_noise: None,
            envelope: None,
            arpeggio: None,
            pitch: None,
        }
    }

    #[test]
    fn test_hard_env_period_data_types() {
        assert_eq!(hard_env_period(0x100, -1), 0x10);
        assert_eq!(hard_env_period(0x100, 0x1234), 0x1234);
        assert_eq!(hard_env_period(0x100, ratio2data(1, 2)), 0x20);
        assert_eq!(hard_env_period(0x100, shift2data(2)), 0x04);
        assert_eq!(hard_env_period(0x100, shift2data(-2)), 0x40);
        assert_eq!(hard_env_period(0x100, ratio2data(0, 2)), 0);
    }

    #[test]
    fn test_square_key_on_and_off() {
        let mut ctrl = controller();
        ctrl.set_volume(SoundSource::Ssg, 1, 12);
        ctrl.key_on_ssg(1, Note::A, 4, 0, false);
        let tp = pitch_ssg_square(Note::A, 4, 0);
        assert_eq!(ctrl.register(0x02), Some((tp & 0xFF) as u8));
        assert_eq!(ctrl.register(0x03), Some((tp >> 8) as u8));
        assert_eq!(ctrl.register(0x09), Some(12));
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x12), Some(0x10));

        ctrl.key_off_ssg(1, false);
        assert_eq!(ctrl.register(0x09), Some(0));
    }

    #[test]
    fn test_envelope_release_keeps_sounding() {
        let mut ctrl = controller();
        let mut env = CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            vec![
                CommandSequenceUnit::new(15, -1),
                CommandSequenceUnit::new(8, -1),
                CommandSequenceUnit::new(4, -1),
            ],
        );
        env.set_release(ReleaseType::Fixed, 1);
        let mut p = patch();
        p.envelope = Some(Arc::new(env));
        ctrl.set_instrument_ssg(0, p);
        ctrl.key_on_ssg(0, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(0x08), Some(15));
        ctrl.tick_event_ssg(0);
        assert_eq!(ctrl.register(0x08), Some(15));

        ctrl.key_off_ssg(0, true);
        assert_eq!(ctrl.register(0x08), Some(8));
        ctrl.tick_event_ssg(0);
        assert_eq!(ctrl.register(0x08), Some(4));
    }

    #[test]
    fn test_silence_ends_release() {
        let mut ctrl = controller();
        let mut env = CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            vec![
                CommandSequenceUnit::new(15, -1),
                CommandSequenceUnit::new(8, -1),
                CommandSequenceUnit::new(4, -1),
            ],
        );
        env.set_release(ReleaseType::Fixed, 1);
        let mut p = patch();
        p.envelope = Some(Arc::new(env));
        ctrl.set_instrument_ssg(2, p);
        ctrl.key_on_ssg(2, Note::C, 4, 0, true);
        ctrl.key_off_ssg(2, true);
        assert_eq!(ctrl.register(0x0A), Some(8));

        ctrl.silence();
        assert_eq!(ctrl.register(0x0A), Some(0));
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x24), Some(0x24));
        ctrl.tick_event_ssg(2);
        assert_eq!(ctrl.register(0x0A), Some(0));

        ctrl.key_on_ssg(2, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(0x0A), Some(15));
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x04), Some(0));
    }

    #[test]
    fn test_triangle_uses_hardware_envelope() {
        let mut ctrl = controller();
        let mut p = patch();
        p.waveform = Some(seq(&[(waveform::TRIANGLE, -1)]));
        ctrl.set_instrument_ssg(2, p);
        ctrl.key_on_ssg(2, Note::C, 3, 0, false);
        assert_eq!(ctrl.register(0x0A), Some(HARD_ENVELOPE_VOLUME));
        assert_eq!(ctrl.register(0x0D), Some(SHAPE_TRIANGLE));
        let period = pitch_ssg_triangle(Note::C, 3, 0);
        assert_eq!(ctrl.register(0x0B), Some((period & 0xFF) as u8));
        // Tone disabled, noise disabled
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x24), Some(0x24));
    }

    #[test]
    fn test_tone_noise_sequence_and_override() {
        let mut ctrl = controller();
        let mut p = patch();
        p.tone_noise = Some(seq(&[(5, -1), (NOISE_ONLY_TYPE_BASE + 7, -1)]));
        ctrl.set_instrument_ssg(0, p);
        ctrl.key_on_ssg(0, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(0x06), Some(4));
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x09), Some(0x00));
        ctrl.tick_event_ssg(0);
        assert_eq!(ctrl.register(0x06), Some(7));
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x09), Some(0x01));

        ctrl.set_tone_noise_mix_ssg(0, 1);
        assert_eq!(ctrl.register(0x07).map(|m| m & 0x09), Some(0x08));
    }

    #[test]
    fn test_auto_envelope() {
        let mut ctrl = controller();
        ctrl.key_on_ssg(0, Note::C, 4, 0, false);
        ctrl.set_auto_envelope_ssg(0, Some((1, 0x0E)));
        let tp = pitch_ssg_square(Note::C, 4, 0);
        let period = (tp >> 1) >> 4;
        assert_eq!(ctrl.register(0x0B), Some((period & 0xFF) as u8));
        assert_eq!(ctrl.register(0x08), Some(HARD_ENVELOPE_VOLUME));
        ctrl.set_hard_envelope_period_ssg(0, true, 0x12);
        assert_eq!(ctrl.register(0x0C), Some(0x12));
        ctrl.set_auto_envelope_ssg(0, None);
        ctrl.set_hard_envelope_period_ssg(0, false, 0);
        assert_ne!(ctrl.register(0x08), Some(HARD_ENVELOPE_VOLUME));
    }

    #[test]
    fn test_mute_is_idempotent() {
        let mut ctrl = controller();
        ctrl.set_volume(SoundSource::Ssg, 0, 9);
        ctrl.key_on_ssg(0, Note::G, 5, 0, false);
        let before: Vec<_> = (0..0x10).map(|a| ctrl.register(a)).collect();
        ctrl.set_mute_state(SoundSource::Ssg, 0, true);
        assert_eq!(ctrl.register(0x08), Some(0));
        ctrl.set_mute_state(SoundSource::Ssg, 0, false);
        let after: Vec<_> = (0..0x10).map(|a| ctrl.register(a)).collect();
        assert_eq!(before, after);
    }
}
