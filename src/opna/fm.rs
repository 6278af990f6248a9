//! FM channels

use super::tone::{ToneChannel, ToneDetail};
use super::{OpnaController, FM_CHANNELS};
use crate::error::Result;
use crate::instrument::envelope_fm::{
    is_carrier, parameter_ar, parameter_dr, parameter_ml, parameter_rr, parameter_tl,
};
use crate::instrument::{
    EnvelopeFm, FmEnvelopeParameter, FmOperatorParameter, FmPatch, LfoFm, SequenceCursor,
    SequenceIterator,
};
use crate::pitch::{pitch_fm, Note};
use std::sync::Arc;
use tracing::trace;

/// Largest attenuation
pub(super) const MAX_VOLUME: i32 = 127;

/// Register offsets of operators 1-4 within a parameter block
const OP_OFFSETS: [u32; 4] = [0x0, 0x8, 0x4, 0xC];

fn bank(ch: usize) -> u32 {
    if ch < 3 {
        0
    } else {
        0x100
    }
}

fn channel_reg(ch: usize, base: u32) -> u32 {
    bank(ch) | (base + (ch % 3) as u32)
}

fn operator_reg(ch: usize, op: usize, base: u32) -> u32 {
    channel_reg(ch, base + OP_OFFSETS[op & 3])
}

/// Channel code used by the key on/off register
fn chcode(ch: usize) -> u8 {
    ((ch % 3) | ((ch / 3) << 2)) as u8
}

pub(super) struct FmChannel {
    pub(super) tone: ToneChannel,
    pub(super) patch: Option<FmPatch>,
    /// Working copy of the instrument envelope, modified by controls and sequences
    env: EnvelopeFm,
    op_sequences: Vec<(FmEnvelopeParameter, SequenceCursor)>,
    lfo: Option<LfoFm>,
    /// Ticks left before the LFO starts
    lfo_wait: Option<u32>,
    lfo_active: bool,
    pan: u8,
    brightness: i32,
    instrument_envelope_reset: bool,
    envelope_reset_effect: Option<bool>,
    has_reset_envelope: bool,
}

impl FmChannel {
    pub(super) fn new() -> Self {
        Self {
            tone: ToneChannel::new(0),
            patch: None,
            env: EnvelopeFm::new(0),
            op_sequences: Vec::new(),
            lfo: None,
            lfo_wait: None,
            lfo_active: false,
            pan: 3,
            brightness: 0,
            instrument_envelope_reset: false,
            envelope_reset_effect: None,
            has_reset_envelope: false,
        }
    }

    pub(super) fn instrument_number(&self) -> Option<usize> {
        self.patch.as_ref().map(|p| p.number)
    }

    fn is_envelope_reset(&self) -> bool {
        self.envelope_reset_effect
            .unwrap_or(self.instrument_envelope_reset)
    }
}

impl OpnaController {
    pub(super) fn reset_fm(&mut self) {
        self.regs.write(0x22, 0);
        for ch in 0..FM_CHANNELS {
            let mute = self.fm[ch].tone.is_mute;
            self.fm[ch] = FmChannel::new();
            self.fm[ch].tone.is_mute = mute;
            self.regs.write(0x28, chcode(ch));
            self.write_envelope_fm(ch);
            self.write_pan_fm(ch);
        }
    }

    /// Attenuation of a carrier after applying the channel volume, at most 127
    pub fn calculate_tl(&self, ch: usize, data: i32) -> u8 {
        let volume = self.fm.get(ch).map_or(0, |c| c.tone.current_volume());
        (data + volume).clamp(0, MAX_VOLUME) as u8
    }

    pub fn key_on_fm(&mut self, ch: usize, note: Note, octave: i32, pitch: i32, is_jam: bool) {
        self.key_on_fm_tone(ch, ToneDetail::new(octave, note, pitch), is_jam);
    }

    pub fn key_on_fm_echo(&mut self, ch: usize, buffer: usize) {
        match self.fm.get(ch).and_then(|c| c.tone.echo_tone(buffer)) {
            Some(tone) => self.key_on_fm_tone(ch, tone, false),
            None => trace!(ch, buffer, "FM echo buffer empty"),
        }
    }

    fn key_on_fm_tone(&mut self, ch: usize, tone: ToneDetail, is_jam: bool) {
        if ch >= FM_CHANNELS {
            return;
        }
        let legato = self.fm[ch].tone.prepare_key_on(tone);
        if legato {
            return;
        }
        if self.fm[ch].tone.is_key_on {
            self.regs.write(0x28, chcode(ch));
        }
        if self.fm[ch].has_reset_envelope {
            self.restore_envelope_fm(ch);
        }

        self.front_sequences_fm(ch);
        self.write_pitch_fm(ch);
        self.write_tl_fm(ch);

        let c = &mut self.fm[ch];
        c.tone.is_key_on = true;
        c.tone.has_preset_tick_event = !is_jam;
        let mask = c.env.slot_mask();
        self.regs.write(0x28, mask | chcode(ch));
    }

    pub fn key_off_fm(&mut self, ch: usize, is_jam: bool) {
        if ch >= FM_CHANNELS {
            return;
        }
        let c = &mut self.fm[ch];
        c.tone.release_tone_sequences();
        let mut changed = Vec::new();
        for (param, seq) in c.op_sequences.iter_mut() {
            if seq.next(true).is_some() {
                if let Some(v) = seq.command_type() {
                    c.env.set(*param, v);
                    changed.push(*param);
                }
            }
        }
        c.tone.is_key_on = false;
        c.tone.has_preset_tick_event = !is_jam;
        self.regs.write(0x28, chcode(ch));
        for param in changed {
            self.write_envelope_parameter_fm(ch, param);
        }
        if self.fm[ch].tone.need_tone_set {
            self.write_pitch_fm(ch);
        }
    }

    pub fn set_instrument_fm(&mut self, ch: usize, patch: FmPatch) {
        let Some(c) = self.fm.get_mut(ch) else {
            return;
        };
        c.env = (*patch.envelope).clone();
        c.op_sequences = patch
            .operator_sequences
            .iter()
            .map(|(param, seq)| (*param, SequenceCursor::new(Arc::clone(seq))))
            .collect();
        c.tone.set_instrument_arpeggio(patch.arpeggio.as_ref());
        c.tone.set_instrument_pitch(patch.pitch.as_ref());
        c.lfo = patch.lfo.as_deref().copied();
        c.lfo_wait = None;
        c.lfo_active = false;
        c.instrument_envelope_reset = patch.envelope_reset;
        c.patch = Some(patch);
        self.write_envelope_fm(ch);
        self.write_pan_fm(ch);
    }

    pub(super) fn set_pan_fm(&mut self, ch: usize, pan: u8) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.pan = pan & 3;
            self.write_pan_fm(ch);
        }
    }

    pub fn set_fb_control_fm(&mut self, ch: usize, value: i32) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.env.set(FmEnvelopeParameter::Fb, value);
            self.write_envelope_parameter_fm(ch, FmEnvelopeParameter::Fb);
        }
    }

    fn set_operator_control_fm(&mut self, ch: usize, param: FmEnvelopeParameter, value: i32) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.env.set(param, value);
            self.write_envelope_parameter_fm(ch, param);
        }
    }

    pub fn set_tl_control_fm(&mut self, ch: usize, op: usize, value: i32) -> Result<()> {
        let param = parameter_tl(op)?;
        self.set_operator_control_fm(ch, param, value);
        Ok(())
    }

    pub fn set_ml_control_fm(&mut self, ch: usize, op: usize, value: i32) -> Result<()> {
        let param = parameter_ml(op)?;
        self.set_operator_control_fm(ch, param, value);
        Ok(())
    }

    pub fn set_ar_control_fm(&mut self, ch: usize, op: usize, value: i32) -> Result<()> {
        let param = parameter_ar(op)?;
        self.set_operator_control_fm(ch, param, value);
        Ok(())
    }

    pub fn set_dr_control_fm(&mut self, ch: usize, op: usize, value: i32) -> Result<()> {
        let param = parameter_dr(op)?;
        self.set_operator_control_fm(ch, param, value);
        Ok(())
    }

    pub fn set_rr_control_fm(&mut self, ch: usize, op: usize, value: i32) -> Result<()> {
        let param = parameter_rr(op)?;
        self.set_operator_control_fm(ch, param, value);
        Ok(())
    }

    /// Offset subtracted from modulator attenuation; positive is brighter
    pub fn set_brightness_fm(&mut self, ch: usize, value: i32) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.brightness = value;
            self.write_tl_fm(ch);
        }
    }

    /// Override the instrument's envelope reset flag
    pub fn set_envelope_reset_fm(&mut self, ch: usize, enabled: bool) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.envelope_reset_effect = Some(enabled);
        }
    }

    pub fn is_envelope_reset_fm(&self, ch: usize) -> bool {
        self.fm.get(ch).is_some_and(FmChannel::is_envelope_reset)
    }

    /// Force the operators to silence before the next key-on
    pub fn reset_fm_channel_envelope(&mut self, ch: usize) {
        if ch >= FM_CHANNELS {
            return;
        }
        for op in 0..4 {
            self.regs.write(operator_reg(ch, op, 0x80), 0xFF);
        }
        self.regs.write(0x28, chcode(ch));
        let c = &mut self.fm[ch];
        c.tone.is_key_on = false;
        c.has_reset_envelope = true;
    }

    fn restore_envelope_fm(&mut self, ch: usize) {
        for op in 0..4 {
            self.write_envelope_parameter_fm(
                ch,
                FmEnvelopeParameter::Op(op, FmOperatorParameter::Rr),
            );
        }
        self.fm[ch].has_reset_envelope = false;
    }

    fn front_sequences_fm(&mut self, ch: usize) {
        let c = &mut self.fm[ch];
        c.tone.front_tone_sequences();
        let mut changed = Vec::new();
        for (param, seq) in c.op_sequences.iter_mut() {
            if seq.front().is_some() {
                if let Some(v) = seq.command_type() {
                    c.env.set(*param, v);
                    changed.push(*param);
                }
            }
        }
        c.lfo_active = false;
        c.lfo_wait = c.lfo.map(|l| l.count);
        for param in changed {
            self.write_envelope_parameter_fm(ch, param);
        }
        if self.fm[ch].lfo_wait == Some(0) {
            self.start_lfo_fm(ch);
        } else {
            self.write_lfo_state_fm(ch);
        }
    }

    pub(super) fn tick_event_fm(&mut self, ch: usize) {
        if ch >= FM_CHANNELS {
            return;
        }
        let c = &mut self.fm[ch];
        if c.tone.has_preset_tick_event {
            c.tone.has_preset_tick_event = false;
            return;
        }

        let mut start_lfo = false;
        if let Some(wait) = c.lfo_wait.as_mut() {
            if *wait > 0 {
                *wait -= 1;
                start_lfo = *wait == 0;
            }
        }

        c.tone.step_tone_sequences(false);
        let mut changed = Vec::new();
        for (param, seq) in c.op_sequences.iter_mut() {
            if seq.next(false).is_some() {
                if let Some(v) = seq.command_type() {
                    c.env.set(*param, v);
                    changed.push(*param);
                }
            }
        }
        let volume_changed = c.tone.step_volume_effects();
        let tone_changed = c.tone.need_tone_set;

        for param in changed {
            self.write_envelope_parameter_fm(ch, param);
        }
        if start_lfo {
            self.start_lfo_fm(ch);
        }
        if tone_changed {
            self.write_pitch_fm(ch);
        }
        if volume_changed {
            self.write_tl_fm(ch);
        }
    }

    pub(super) fn halt_sequences_fm(&mut self, ch: usize) {
        if let Some(c) = self.fm.get_mut(ch) {
            c.tone.halt();
            for (_, seq) in c.op_sequences.iter_mut() {
                seq.end();
            }
            c.lfo_wait = None;
        }
    }

    pub(super) fn write_pitch_fm(&mut self, ch: usize) {
        let Some(c) = self.fm.get_mut(ch) else {
            return;
        };
        let t = &c.tone;
        let code = pitch_fm(t.key_tone.note, t.key_tone.octave, t.pitch_offset());
        c.tone.need_tone_set = false;
        // Block/F-num high latches on the low byte write
        self.regs.write(channel_reg(ch, 0xA4), (code >> 8) as u8);
        self.regs.write(channel_reg(ch, 0xA0), (code & 0xFF) as u8);
    }

    /// Rewrite the total level of every operator
    pub(super) fn write_tl_fm(&mut self, ch: usize) {
        let Some(c) = self.fm.get(ch) else {
            return;
        };
        let mut values = [0u8; 4];
        for (op, value) in values.iter_mut().enumerate() {
            let base = i32::from(c.env.ops[op].tl);
            *value = if is_carrier(op, c.env.al) {
                if c.tone.is_mute {
                    MAX_VOLUME as u8
                } else {
                    self.calculate_tl(
                        ch,
                        base + c.tone.tremolo_value() - c.tone.sum_volume_slide,
                    )
                }
            } else {
                (base - c.brightness).clamp(0, MAX_VOLUME) as u8
            };
        }
        for (op, value) in values.into_iter().enumerate() {
            self.regs.write(operator_reg(ch, op, 0x40), value);
        }
    }

    fn write_envelope_fm(&mut self, ch: usize) {
        self.write_envelope_parameter_fm(ch, FmEnvelopeParameter::Al);
        for op in 0..4 {
            for param in [
                FmOperatorParameter::Ml,
                FmOperatorParameter::Ar,
                FmOperatorParameter::Dr,
                FmOperatorParameter::Sr,
                FmOperatorParameter::Rr,
                FmOperatorParameter::SsgEg,
            ] {
                self.write_envelope_parameter_fm(ch, FmEnvelopeParameter::Op(op, param));
            }
        }
    }

    /// Write the register carrying `param`
    fn write_envelope_parameter_fm(&mut self, ch: usize, param: FmEnvelopeParameter) {
        let c = &self.fm[ch];
        let env = &c.env;
        match param {
            FmEnvelopeParameter::Al | FmEnvelopeParameter::Fb => {
                self.regs.write(channel_reg(ch, 0xB0), (env.fb << 3) | env.al);
                // Carrier set depends on the algorithm
                self.write_tl_fm(ch);
            }
            FmEnvelopeParameter::Op(op, p) => {
                let o = &env.ops[op & 3];
                let am = c.lfo_active && c.lfo.is_some_and(|l| l.am[op & 3]);
                let value = match p {
                    FmOperatorParameter::Tl => {
                        self.write_tl_fm(ch);
                        return;
                    }
                    FmOperatorParameter::Dt | FmOperatorParameter::Ml => (o.dt << 4) | o.ml,
                    FmOperatorParameter::Ks | FmOperatorParameter::Ar => (o.ks << 6) | o.ar,
                    FmOperatorParameter::Dr => (u8::from(am) << 7) | o.dr,
                    FmOperatorParameter::Sr => o.sr,
                    FmOperatorParameter::Sl | FmOperatorParameter::Rr => (o.sl << 4) | o.rr,
                    FmOperatorParameter::SsgEg => o.ssgeg.map_or(0, |v| 0x08 | v),
                };
                self.regs.write(operator_reg(ch, op, p.register_base()), value);
            }
        }
    }

    fn write_pan_fm(&mut self, ch: usize) {
        let c = &self.fm[ch];
        let mut value = c.pan << 6;
        if c.lfo_active {
            if let Some(lfo) = c.lfo {
                value |= (lfo.ams << 4) | lfo.pms;
            }
        }
        self.regs.write(channel_reg(ch, 0xB4), value);
    }

    fn start_lfo_fm(&mut self, ch: usize) {
        let c = &mut self.fm[ch];
        c.lfo_wait = None;
        let Some(lfo) = c.lfo else {
            return;
        };
        c.lfo_active = true;
        self.regs.write(0x22, 0x08 | (lfo.freq & 7));
        self.write_lfo_state_fm(ch);
    }

    /// Pan/sensitivity and AM enable bits after the LFO state changed
    fn write_lfo_state_fm(&mut self, ch: usize) {
        self.write_pan_fm(ch);
        for op in 0..4 {
            self.write_envelope_parameter_fm(ch, FmEnvelopeParameter::Op(op, FmOperatorParameter::Dr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{NullChip, RegisterLog};
    use crate::error::Error;
    use crate::instrument::{CommandSequence, CommandSequenceUnit, SequenceType};
    use crate::module::SoundSource;

    fn controller() -> OpnaController {
        OpnaController::new(Box::new(NullChip), 44100)
    }

    fn patch(envelope: EnvelopeFm) -> FmPatch {
        FmPatch {
            number: 1,
            envelope: Arc::new(envelope),
            lfo: None,
            operator_sequences: Vec::new(),
            arpeggio: None,
            pitch: None,
            envelope_reset: false,
        }
    }

    #[test]
    fn test_register_layout() {
        assert_eq!(channel_reg(0, 0xA0), 0xA0);
        assert_eq!(channel_reg(5, 0xA4), 0x1A6);
        assert_eq!(operator_reg(1, 1, 0x40), 0x49);
        assert_eq!(chcode(4), 0x05);
    }

    #[test]
    fn test_calculate_tl_clamps() {
        let mut ctrl = controller();
        ctrl.set_volume(SoundSource::Fm, 0, 100);
        assert_eq!(ctrl.calculate_tl(0, 10), 110);
        assert_eq!(ctrl.calculate_tl(0, 100), 127);
        assert_eq!(ctrl.calculate_tl(0, i32::MAX - 200), 127);
        ctrl.set_temporary_volume(SoundSource::Fm, 0, 0);
        assert_eq!(ctrl.calculate_tl(0, 10), 10);
    }

    #[test]
    fn test_key_on_writes_pitch_then_key() {
        let log = RegisterLog::new();
        let handle = log.handle();
        let mut ctrl = OpnaController::new(Box::new(log), 44100);
        ctrl.update_register_states();
        handle.lock().clear();

        ctrl.key_on_fm(4, Note::A, 4, 0, false);
        ctrl.update_register_states();
        let writes = handle.lock();
        let code = pitch_fm(Note::A, 4, 0);
        let fnum_lo = writes.iter().position(|w| w.address == 0x1A1).unwrap();
        let key = writes.iter().position(|w| w.address == 0x28).unwrap();
        assert!(fnum_lo < key);
        assert_eq!(writes[fnum_lo].value, (code & 0xFF) as u8);
        assert_eq!(writes[key].value, 0xF0 | 0x05);
        assert!(ctrl.is_key_on(SoundSource::Fm, 4));
    }

    #[test]
    fn test_tl_only_on_carriers() {
        let mut ctrl = controller();
        let mut env = EnvelopeFm::new(0);
        env.al = 4;
        for op in &mut env.ops {
            op.tl = 20;
        }
        ctrl.set_instrument_fm(0, patch(env));
        ctrl.set_volume(SoundSource::Fm, 0, 30);
        assert_eq!(ctrl.register(operator_reg(0, 0, 0x40)), Some(20));
        assert_eq!(ctrl.register(operator_reg(0, 1, 0x40)), Some(50));
        assert_eq!(ctrl.register(operator_reg(0, 2, 0x40)), Some(20));
        assert_eq!(ctrl.register(operator_reg(0, 3, 0x40)), Some(50));
    }

    #[test]
    fn test_mute_is_idempotent() {
        let mut ctrl = controller();
        ctrl.set_instrument_fm(2, patch(EnvelopeFm::new(0)));
        ctrl.set_volume(SoundSource::Fm, 2, 12);
        ctrl.key_on_fm(2, Note::C, 4, 0, false);
        let snapshot: Vec<_> = (0..0x200).map(|a| ctrl.register(a)).collect();

        ctrl.set_mute_state(SoundSource::Fm, 2, true);
        assert_eq!(ctrl.register(operator_reg(2, 3, 0x40)), Some(127));
        ctrl.set_mute_state(SoundSource::Fm, 2, false);
        let after: Vec<_> = (0..0x200).map(|a| ctrl.register(a)).collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_invalid_operator_control() {
        let mut ctrl = controller();
        assert!(matches!(
            ctrl.set_tl_control_fm(0, 4, 10),
            Err(Error::InvalidOperator(4))
        ));
        ctrl.set_ar_control_fm(0, 3, 12).unwrap();
        assert_eq!(ctrl.register(operator_reg(0, 3, 0x50)), Some(12));
    }

    #[test]
    fn test_echo_out_of_range_is_noop() {
        let mut ctrl = controller();
        ctrl.key_on_fm_echo(0, 2);
        assert!(!ctrl.is_key_on(SoundSource::Fm, 0));
        ctrl.key_on_fm(0, Note::E, 3, 0, false);
        ctrl.key_off_fm(0, false);
        ctrl.key_on_fm_echo(0, 0);
        assert!(ctrl.is_key_on(SoundSource::Fm, 0));
        assert_eq!(ctrl.tone(SoundSource::Fm, 0).unwrap().note, Note::E);
    }

    #[test]
    fn test_envelope_reset_restores_release() {
        let mut ctrl = controller();
        ctrl.set_instrument_fm(0, patch(EnvelopeFm::new(0)));
        ctrl.key_on_fm(0, Note::C, 4, 0, false);
        ctrl.reset_fm_channel_envelope(0);
        assert_eq!(ctrl.register(operator_reg(0, 0, 0x80)), Some(0xFF));
        assert!(!ctrl.is_key_on(SoundSource::Fm, 0));
        ctrl.key_on_fm(0, Note::C, 4, 0, false);
        assert_eq!(ctrl.register(operator_reg(0, 0, 0x80)), Some(0x07));
    }

    #[test]
    fn test_operator_sequence_drives_register() {
        let mut ctrl = controller();
        let seq = Arc::new(CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            vec![CommandSequenceUnit::new(3, -1), CommandSequenceUnit::new(9, -1)],
        ));
        let mut p = patch(EnvelopeFm::new(0));
        p.operator_sequences = vec![(
            FmEnvelopeParameter::Op(0, FmOperatorParameter::Ml),
            seq,
        )];
        ctrl.set_instrument_fm(1, p);
        ctrl.key_on_fm(1, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(operator_reg(1, 0, 0x30)), Some(3));
        ctrl.tick_event_fm(1);
        assert_eq!(ctrl.register(operator_reg(1, 0, 0x30)), Some(9));
    }

    #[test]
    fn test_lfo_starts_after_count() {
        let mut ctrl = controller();
        let mut p = patch(EnvelopeFm::new(0));
        p.lfo = Some(Arc::new(LfoFm {
            freq: 3,
            pms: 2,
            ams: 1,
            am: [false, false, false, true],
            count: 2,
            ..LfoFm::default()
        }));
        ctrl.set_instrument_fm(0, p);
        ctrl.key_on_fm(0, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(0xB4), Some(0xC0));
        ctrl.tick_event_fm(0);
        assert_eq!(ctrl.register(0xB4), Some(0xC0));
        ctrl.tick_event_fm(0);
        assert_eq!(ctrl.register(0xB4), Some(0xC0 | 0x12));
        assert_eq!(ctrl.register(0x22), Some(0x0B));
        assert_eq!(ctrl.register(operator_reg(0, 3, 0x60)).map(|v| v & 0x80), Some(0x80));
    }
}
