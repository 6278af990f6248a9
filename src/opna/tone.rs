//! Pitch and volume state shared by the tone-bearing sources (FM, SSG, ADPCM)

use super::effect_iterator::{
    NoteSlideEffectIterator, WavingEffectIterator, ARPEGGIO_CENTER,
};
use crate::instrument::{CommandSequence, SequenceCursor, SequenceIterator, SequenceType};
use crate::module::step::{ECHO_BUFFER_DEPTH, MAX_NOTE_NUMBER};
use crate::pitch::{
    note_number_to_octave_and_note, octave_and_note_to_note_number, Note, SEMINOTE_PITCH,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Pitch sequence type value meaning "no offset"
pub const PITCH_CENTER: i32 = 127;

/// A sounding or remembered tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneDetail {
    pub octave: i32,
    pub note: Note,
    pub pitch: i32,
}

impl ToneDetail {
    pub fn new(octave: i32, note: Note, pitch: i32) -> Self {
        Self { octave, note, pitch }
    }

    pub fn note_number(&self) -> i32 {
        octave_and_note_to_note_number(self.octave, self.note)
    }

    /// Position in pitch steps, unclamped
    pub fn absolute_pitch(&self) -> i32 {
        self.note_number() * SEMINOTE_PITCH + self.pitch
    }

    fn set_note_number(&mut self, number: i32) {
        let (octave, note) = note_number_to_octave_and_note(number.clamp(0, MAX_NOTE_NUMBER));
        self.octave = octave;
        self.note = note;
    }
}

impl Default for ToneDetail {
    fn default() -> Self {
        Self::new(4, Note::C, 0)
    }
}

pub struct ToneChannel {
    pub is_key_on: bool,
    /// Most recent first
    pub base_tone: VecDeque<ToneDetail>,
    pub key_tone: ToneDetail,
    pub sum_pitch: i32,
    pub need_tone_set: bool,
    /// Sequences were already advanced for the current tick
    pub has_preset_tick_event: bool,
    pub base_volume: i32,
    pub tmp_volume: Option<i32>,
    pub is_mute: bool,
    pub arpeggio: Option<Box<dyn SequenceIterator>>,
    pub is_arpeggio_effect: bool,
    pub pitch_seq: Option<SequenceCursor>,
    pub portamento: i32,
    pub is_tone_portamento: bool,
    pub vibrato: Option<WavingEffectIterator>,
    pub tremolo: Option<WavingEffectIterator>,
    /// Loudness change per tick, positive is louder
    pub volume_slide: i32,
    pub sum_volume_slide: i32,
    pub detune: i32,
    pub note_slide: Option<NoteSlideEffectIterator>,
    pub sum_note_slide: i32,
    pub transpose: i32,
}

impl ToneChannel {
    pub fn new(base_volume: i32) -> Self {
        Self {
            is_key_on: false,
            base_tone: VecDeque::with_capacity(ECHO_BUFFER_DEPTH),
            key_tone: ToneDetail::default(),
            sum_pitch: 0,
            need_tone_set: false,
            has_preset_tick_event: false,
            base_volume,
            tmp_volume: None,
            is_mute: false,
            arpeggio: None,
            is_arpeggio_effect: false,
            pitch_seq: None,
            portamento: 0,
            is_tone_portamento: false,
            vibrato: None,
            tremolo: None,
            volume_slide: 0,
            sum_volume_slide: 0,
            detune: 0,
            note_slide: None,
            sum_note_slide: 0,
            transpose: 0,
        }
    }

    pub fn current_volume(&self) -> i32 {
        self.tmp_volume.unwrap_or(self.base_volume)
    }

    /// Tone that an echo buffer slot refers to
    pub fn echo_tone(&self, buffer: usize) -> Option<ToneDetail> {
        self.base_tone.get(buffer).copied()
    }

    pub fn update_echo_buffer(&mut self, tone: ToneDetail) {
        self.base_tone.push_front(tone);
        self.base_tone.truncate(ECHO_BUFFER_DEPTH);
    }

    /// Record a new note; returns true when it glides from the sounding tone
    /// instead of retriggering
    pub fn prepare_key_on(&mut self, tone: ToneDetail) -> bool {
        let legato = self.is_tone_portamento && self.is_key_on;
        let had_previous = !self.base_tone.is_empty();
        self.update_echo_buffer(tone);
        if self.is_tone_portamento && had_previous {
            // Fold pending offsets into the glide origin
            self.key_tone.pitch += self.sum_note_slide + self.transpose;
        } else {
            self.key_tone = tone;
        }
        self.sum_note_slide = 0;
        self.transpose = 0;
        self.tmp_volume = None;
        self.need_tone_set = true;
        legato
    }

    /// Pitch offset added to the key tone when encoding the frequency
    pub fn pitch_offset(&self) -> i32 {
        self.key_tone.pitch
            + self.sum_pitch
            + self.vibrato.as_ref().map_or(0, WavingEffectIterator::value)
            + self.detune
            + self.sum_note_slide
            + self.transpose
    }

    pub fn tremolo_value(&self) -> i32 {
        self.tremolo.as_ref().map_or(0, WavingEffectIterator::value)
    }

    fn is_arpeggio_idle(&self) -> bool {
        self.arpeggio.as_ref().map_or(true, |a| a.is_finished())
    }

    pub fn check_real_tone_by_arpeggio(&mut self, changed: Option<usize>) {
        if changed.is_none() {
            return;
        }
        let Some(arp) = self.arpeggio.as_ref() else {
            return;
        };
        let (Some(ty), Some(base)) = (arp.command_type(), self.base_tone.front().copied()) else {
            return;
        };
        let number = match arp.sequence_type() {
            SequenceType::Absolute => base.note_number() + ty - ARPEGGIO_CENTER,
            SequenceType::Fixed => ty,
            SequenceType::Relative => self.key_tone.note_number() + ty - ARPEGGIO_CENTER,
        };
        self.key_tone.set_note_number(number);
        self.need_tone_set = true;
    }

    /// Glide toward the newest tone; only while no arpeggio drives the tone
    pub fn check_portamento(&mut self) {
        if self.portamento == 0 || !self.is_arpeggio_idle() {
            return;
        }
        let Some(target) = self.base_tone.front().copied() else {
            return;
        };
        if self.is_tone_portamento {
            let dif = target.absolute_pitch() - self.key_tone.absolute_pitch();
            let depth = self.portamento.abs();
            if dif > 0 {
                if dif - depth < 0 {
                    self.key_tone = target;
                } else {
                    self.key_tone.pitch += depth;
                }
                self.need_tone_set = true;
            } else if dif < 0 {
                if dif + depth > 0 {
                    self.key_tone = target;
                } else {
                    self.key_tone.pitch -= depth;
                }
                self.need_tone_set = true;
            }
        } else {
            self.key_tone.pitch += self.portamento;
            self.need_tone_set = true;
        }
    }

    pub fn check_real_tone_by_pitch(&mut self, changed: Option<usize>) {
        if changed.is_none() {
            return;
        }
        let Some(seq) = self.pitch_seq.as_ref() else {
            return;
        };
        let Some(ty) = seq.command_type() else {
            return;
        };
        match seq.sequence_type() {
            SequenceType::Relative => self.sum_pitch += ty - PITCH_CENTER,
            _ => self.sum_pitch = ty - PITCH_CENTER,
        }
        self.need_tone_set = true;
    }

    /// Reset the tone sequences at key-on
    pub fn front_tone_sequences(&mut self) {
        self.sum_pitch = 0;
        self.sum_volume_slide = 0;
        if let Some(t) = self.tremolo.as_mut() {
            t.front();
        }
        let changed = self.arpeggio.as_mut().and_then(|a| a.front());
        self.check_real_tone_by_arpeggio(changed);
        self.check_portamento();
        let changed = self.pitch_seq.as_mut().and_then(|p| p.front());
        self.check_real_tone_by_pitch(changed);
        if let Some(v) = self.vibrato.as_mut() {
            v.front();
        }
        if let Some(ns) = self.note_slide.as_mut() {
            ns.front();
            self.sum_note_slide += ns.command_type().unwrap_or(0);
        }
        self.need_tone_set = true;
    }

    /// Advance the tone sequences by one tick, in release mode after key-off
    pub fn step_tone_sequences(&mut self, release_begin: bool) {
        let changed = self.arpeggio.as_mut().and_then(|a| a.next(release_begin));
        self.check_real_tone_by_arpeggio(changed);
        self.check_portamento();
        let changed = self.pitch_seq.as_mut().and_then(|p| p.next(release_begin));
        self.check_real_tone_by_pitch(changed);
        if let Some(v) = self.vibrato.as_mut() {
            v.next(false);
            self.need_tone_set = true;
        }
        if let Some(ns) = self.note_slide.as_mut() {
            if ns.next(false).is_some() {
                self.sum_note_slide += ns.command_type().unwrap_or(0);
                self.need_tone_set = true;
            }
        }
    }

    /// Switch the arpeggio and pitch sequences to their release phase
    pub fn release_tone_sequences(&mut self) {
        let changed = self.arpeggio.as_mut().and_then(|a| a.next(true));
        self.check_real_tone_by_arpeggio(changed);
        let changed = self.pitch_seq.as_mut().and_then(|p| p.next(true));
        self.check_real_tone_by_pitch(changed);
    }

    /// Advance tremolo and volume slide; returns true if the volume changed
    pub fn step_volume_effects(&mut self) -> bool {
        let mut changed = false;
        if let Some(t) = self.tremolo.as_mut() {
            changed |= t.next(false).is_some();
        }
        if self.volume_slide != 0 {
            self.sum_volume_slide += self.volume_slide;
            changed = true;
        }
        changed
    }

    pub fn halt(&mut self) {
        if let Some(a) = self.arpeggio.as_mut() {
            a.end();
        }
        if let Some(p) = self.pitch_seq.as_mut() {
            p.end();
        }
        if let Some(ns) = self.note_slide.as_mut() {
            ns.end();
        }
    }

    /// Attach an instrument's arpeggio unless an arpeggio effect is active
    pub fn set_instrument_arpeggio(&mut self, seq: Option<&Arc<CommandSequence>>) {
        if !self.is_arpeggio_effect {
            self.arpeggio = seq.map(|s| {
                Box::new(SequenceCursor::new(Arc::clone(s))) as Box<dyn SequenceIterator>
            });
        }
    }

    pub fn set_instrument_pitch(&mut self, seq: Option<&Arc<CommandSequence>>) {
        self.pitch_seq = seq.map(|s| SequenceCursor::new(Arc::clone(s)));
    }

    /// Replace the arpeggio with `00xy`; `0000` returns to the instrument arpeggio
    pub fn set_arpeggio_effect(
        &mut self,
        second: i32,
        third: i32,
        instrument_arpeggio: Option<&Arc<CommandSequence>>,
    ) {
        if second == 0 && third == 0 {
            self.is_arpeggio_effect = false;
            self.set_instrument_arpeggio(instrument_arpeggio);
            if let Some(base) = self.base_tone.front().copied() {
                self.key_tone.octave = base.octave;
                self.key_tone.note = base.note;
            }
        } else {
            let mut it = super::effect_iterator::ArpeggioEffectIterator::new(second, third);
            if self.is_key_on {
                it.front();
            }
            self.arpeggio = Some(Box::new(it));
            self.is_arpeggio_effect = true;
        }
        self.need_tone_set = true;
    }

    pub fn set_portamento_effect(&mut self, depth: i32, is_tone_portamento: bool) {
        self.portamento = depth;
        self.is_tone_portamento = is_tone_portamento && depth != 0;
    }

    pub fn set_vibrato_effect(&mut self, period: i32, depth: i32) {
        self.vibrato = if period > 0 && depth > 0 {
            let mut it = WavingEffectIterator::new(period, depth);
            it.front();
            Some(it)
        } else {
            None
        };
        self.need_tone_set = true;
    }

    pub fn set_tremolo_effect(&mut self, period: i32, amplitude: i32) {
        self.tremolo = if period > 0 && amplitude > 0 {
            let mut it = WavingEffectIterator::unipolar(period, amplitude);
            it.front();
            Some(it)
        } else {
            None
        };
    }

    pub fn set_volume_slide(&mut self, depth: i32, is_up: bool) {
        self.volume_slide = if is_up { depth } else { -depth };
    }

    pub fn set_detune(&mut self, pitch: i32) {
        self.detune = pitch;
        self.need_tone_set = true;
    }

    pub fn set_note_slide(&mut self, speed: i32, seminote: i32) {
        self.note_slide = if speed > 0 && seminote != 0 {
            let mut it = NoteSlideEffectIterator::new(speed, seminote);
            it.front();
            Some(it)
        } else {
            None
        };
    }

    pub fn set_transpose_effect(&mut self, seminote: i32) {
        self.transpose += seminote * SEMINOTE_PITCH;
        self.need_tone_set = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::CommandSequenceUnit;

    fn keyed(tone: ToneDetail) -> ToneChannel {
        let mut ch = ToneChannel::new(0);
        ch.prepare_key_on(tone);
        ch.front_tone_sequences();
        ch.is_key_on = true;
        ch
    }

    #[test]
    fn test_echo_buffer_is_bounded() {
        let mut ch = ToneChannel::new(0);
        for i in 0..6 {
            ch.update_echo_buffer(ToneDetail::new(4, Note::from_index(i), 0));
        }
        assert_eq!(ch.base_tone.len(), ECHO_BUFFER_DEPTH);
        assert_eq!(ch.echo_tone(0).unwrap().note, Note::F);
        assert!(ch.echo_tone(ECHO_BUFFER_DEPTH).is_none());
    }

    #[test]
    fn test_tone_portamento_glides_to_target() {
        let mut ch = keyed(ToneDetail::new(4, Note::C, 0));
        ch.set_portamento_effect(20, true);
        assert!(ch.prepare_key_on(ToneDetail::new(4, Note::D, 0)));
        assert_eq!(ch.key_tone.note, Note::C);
        let target = ch.base_tone[0].absolute_pitch();
        let mut ticks = 0;
        while ch.key_tone.absolute_pitch() != target {
            ch.step_tone_sequences(false);
            ticks += 1;
            assert!(ticks < 10);
        }
        // 64 pitch steps at 20 per tick
        assert_eq!(ticks, 4);
    }

    #[test]
    fn test_arpeggio_blocks_portamento() {
        let mut ch = keyed(ToneDetail::new(4, Note::C, 0));
        ch.set_portamento_effect(5, false);
        ch.set_arpeggio_effect(4, 7, None);
        let before = ch.key_tone.pitch;
        ch.step_tone_sequences(false);
        assert_eq!(ch.key_tone.pitch, before);
        assert_eq!(ch.key_tone.note, Note::E);

        ch.set_arpeggio_effect(0, 0, None);
        ch.step_tone_sequences(false);
        assert_eq!(ch.key_tone.pitch, before + 5);
        assert_eq!(ch.key_tone.note, Note::C);
    }

    #[test]
    fn test_finished_arpeggio_releases_portamento() {
        let seq = Arc::new(CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            vec![CommandSequenceUnit::new(ARPEGGIO_CENTER + 12, -1)],
        ));
        let mut ch = ToneChannel::new(0);
        ch.set_instrument_arpeggio(Some(&seq));
        ch.set_portamento_effect(3, false);
        ch.prepare_key_on(ToneDetail::new(3, Note::A, 0));
        ch.front_tone_sequences();
        assert_eq!(ch.key_tone.octave, 4);
        assert_eq!(ch.key_tone.pitch, 0);
        ch.step_tone_sequences(false);
        assert_eq!(ch.key_tone.pitch, 3);
    }

    #[test]
    fn test_pitch_offset_composition() {
        let mut ch = keyed(ToneDetail::new(4, Note::C, 2));
        ch.set_detune(-5);
        ch.set_transpose_effect(1);
        assert_eq!(ch.pitch_offset(), 2 - 5 + SEMINOTE_PITCH);
    }

    #[test]
    fn test_relative_pitch_sequence_accumulates() {
        let seq = Arc::new(CommandSequence::from_units(
            0,
            SequenceType::Relative,
            vec![
                CommandSequenceUnit::new(PITCH_CENTER + 2, -1),
                CommandSequenceUnit::new(PITCH_CENTER + 2, -1),
            ],
        ));
        let mut ch = ToneChannel::new(0);
        ch.set_instrument_pitch(Some(&seq));
        ch.prepare_key_on(ToneDetail::default());
        ch.front_tone_sequences();
        ch.step_tone_sequences(false);
        assert_eq!(ch.sum_pitch, 4);
    }
}
