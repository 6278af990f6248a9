//! YM2608 controller
//!
//! Turns note, instrument and effect requests into register writes. Channel
//! state is kept per sound source; every write goes through a
//! [`RegisterCache`] and reaches the backend on
//! [`OpnaController::update_register_states`].

mod adpcm;
mod drum;
pub mod effect_iterator;
mod fm;
pub mod registers;
mod ssg;
pub mod tone;

pub use adpcm::{SampleAddress, ADPCM_MEMORY_UNITS};
pub use registers::{RegisterCache, RegisterUnit};
pub use tone::ToneDetail;

use crate::chip::ChipBackend;
use crate::instrument::InstrumentsManager;
use crate::module::SoundSource;
use crate::pitch::Note;
use adpcm::AdpcmChannel;
use drum::DrumChannel;
use fm::FmChannel;
use parking_lot::Mutex;
use ssg::SsgChannel;
use std::collections::HashMap;
use std::sync::Arc;
use tone::ToneChannel;
use tracing::{debug, trace};

pub const FM_CHANNELS: usize = 6;
pub const SSG_CHANNELS: usize = 3;
pub const DRUM_CHANNELS: usize = 6;
pub const ADPCM_CHANNELS: usize = 1;

/// Samples kept in the output history (interleaved)
pub const OUTPUT_HISTORY_SIZE: usize = 1024;

/// Shared snapshot of the most recent output samples
pub type OutputHistory = Arc<Mutex<Vec<i16>>>;

pub struct OpnaController {
    chip: Box<dyn ChipBackend>,
    regs: RegisterCache,
    rate: u32,
    master_volume_ratio: f64,
    history: OutputHistory,

    fm: [FmChannel; FM_CHANNELS],

    ssg: [SsgChannel; SSG_CHANNELS],
    ssg_mixer: u8,

    drum: [DrumChannel; DRUM_CHANNELS],
    drum_key_on: u8,
    drum_key_off: u8,
    drum_master_volume: i32,

    adpcm: [AdpcmChannel; ADPCM_CHANNELS],
    adpcm_store_point: usize,
    sample_addresses: HashMap<usize, SampleAddress>,
}

impl OpnaController {
    pub fn new(chip: Box<dyn ChipBackend>, rate: u32) -> Self {
        let mut ctrl = Self {
            chip,
            regs: RegisterCache::new(),
            rate,
            master_volume_ratio: 1.0,
            history: Arc::new(Mutex::new(vec![0; OUTPUT_HISTORY_SIZE])),
            fm: std::array::from_fn(|_| FmChannel::new()),
            ssg: std::array::from_fn(|_| SsgChannel::new()),
            ssg_mixer: 0x3F,
            drum: std::array::from_fn(|_| DrumChannel::new()),
            drum_key_on: 0,
            drum_key_off: 0,
            drum_master_volume: drum::DEFAULT_MASTER_VOLUME,
            adpcm: std::array::from_fn(|_| AdpcmChannel::new()),
            adpcm_store_point: 0,
            sample_addresses: HashMap::new(),
        };
        ctrl.chip.set_rate(rate);
        ctrl.reset();
        ctrl
    }

    /// Silence everything and bring every source back to its initial state
    ///
    /// Mute flags survive; sample memory is cleared.
    pub fn reset(&mut self) {
        debug!("resetting OPNA controller");
        self.chip.reset();
        self.regs.invalidate();

        // Enable FM channels 4-6
        self.regs.write(0x29, 0x80);
        self.reset_fm();
        self.reset_ssg();
        self.reset_drum();
        self.reset_adpcm();
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
        self.chip.set_rate(rate);
    }

    /// Master output level in percent
    pub fn set_master_volume(&mut self, percentage: i32) {
        self.master_volume_ratio = f64::from(percentage.max(0)) / 100.0;
    }

    pub fn set_master_volume_fm(&mut self, db: f64) {
        self.chip.set_volume_fm(db);
    }

    pub fn set_master_volume_ssg(&mut self, db: f64) {
        self.chip.set_volume_ssg(db);
    }

    /// Raw register write (port in bit 8)
    pub fn send_register(&mut self, address: u32, value: u8) {
        self.regs.write(address, value);
    }

    /// Last value written to a register
    pub fn register(&self, address: u32) -> Option<u8> {
        self.regs.value(address)
    }

    /// Flush pending writes, including the rhythm key flags collected this tick
    pub fn update_register_states(&mut self) {
        self.flush_drum_key_flags();
        self.regs.flush(self.chip.as_mut());
    }

    /// Render `frames` stereo frames into `buffer`
    pub fn get_stream_samples(&mut self, buffer: &mut [i16], frames: usize) {
        self.update_register_states();
        let len = (frames * 2).min(buffer.len());
        let out = &mut buffer[..len];
        self.chip.generate(out);
        if (self.master_volume_ratio - 1.0).abs() > f64::EPSILON {
            for s in out.iter_mut() {
                *s = (f64::from(*s) * self.master_volume_ratio)
                    .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
            }
        }
        self.fill_output_history(out);
    }

    fn fill_output_history(&self, out: &[i16]) {
        let mut history = self.history.lock();
        if out.len() >= OUTPUT_HISTORY_SIZE {
            history.copy_from_slice(&out[out.len() - OUTPUT_HISTORY_SIZE..]);
        } else {
            history.rotate_left(out.len());
            let start = OUTPUT_HISTORY_SIZE - out.len();
            history[start..].copy_from_slice(out);
        }
    }

    /// Copy of the most recent output samples
    pub fn output_history(&self) -> Vec<i16> {
        self.history.lock().clone()
    }

    pub fn output_history_handle(&self) -> OutputHistory {
        Arc::clone(&self.history)
    }

    fn tone_channel(&self, src: SoundSource, ch: usize) -> Option<&ToneChannel> {
        match src {
            SoundSource::Fm => self.fm.get(ch).map(|c| &c.tone),
            SoundSource::Ssg => self.ssg.get(ch).map(|c| &c.tone),
            SoundSource::Adpcm => self.adpcm.get(ch).map(|c| &c.tone),
            SoundSource::Drum => None,
        }
    }

    fn tone_channel_mut(&mut self, src: SoundSource, ch: usize) -> Option<&mut ToneChannel> {
        match src {
            SoundSource::Fm => self.fm.get_mut(ch).map(|c| &mut c.tone),
            SoundSource::Ssg => self.ssg.get_mut(ch).map(|c| &mut c.tone),
            SoundSource::Adpcm => self.adpcm.get_mut(ch).map(|c| &mut c.tone),
            SoundSource::Drum => None,
        }
    }

    fn write_pitch(&mut self, src: SoundSource, ch: usize) {
        match src {
            SoundSource::Fm => self.write_pitch_fm(ch),
            SoundSource::Ssg => self.write_ssg_output(ch, false),
            SoundSource::Adpcm => self.write_pitch_adpcm(ch),
            SoundSource::Drum => {}
        }
    }

    fn write_volume(&mut self, src: SoundSource, ch: usize) {
        match src {
            SoundSource::Fm => self.write_tl_fm(ch),
            SoundSource::Ssg => self.write_ssg_output(ch, false),
            SoundSource::Adpcm => self.write_volume_adpcm(ch),
            SoundSource::Drum => self.write_volume_drum(ch),
        }
    }

    /*----- Key on/off -----*/

    pub fn key_on(&mut self, src: SoundSource, ch: usize, note: Note, octave: i32, pitch: i32, is_jam: bool) {
        match src {
            SoundSource::Fm => self.key_on_fm(ch, note, octave, pitch, is_jam),
            SoundSource::Ssg => self.key_on_ssg(ch, note, octave, pitch, is_jam),
            SoundSource::Adpcm => self.key_on_adpcm(ch, note, octave, pitch, is_jam),
            SoundSource::Drum => self.set_key_on_flag_drum(ch),
        }
    }

    /// Key on with a tone from the channel's echo buffer
    pub fn key_on_echo(&mut self, src: SoundSource, ch: usize, buffer: usize) {
        match src {
            SoundSource::Fm => self.key_on_fm_echo(ch, buffer),
            SoundSource::Ssg => self.key_on_ssg_echo(ch, buffer),
            SoundSource::Adpcm => self.key_on_adpcm_echo(ch, buffer),
            SoundSource::Drum => trace!(ch, buffer, "echo buffer on rhythm channel ignored"),
        }
    }

    pub fn key_off(&mut self, src: SoundSource, ch: usize, is_jam: bool) {
        match src {
            SoundSource::Fm => self.key_off_fm(ch, is_jam),
            SoundSource::Ssg => self.key_off_ssg(ch, is_jam),
            SoundSource::Adpcm => self.key_off_adpcm(ch, is_jam),
            SoundSource::Drum => self.set_key_off_flag_drum(ch),
        }
    }

    pub fn is_key_on(&self, src: SoundSource, ch: usize) -> bool {
        match src {
            SoundSource::Drum => self.drum.get(ch).is_some_and(|d| d.is_key_on),
            _ => self.tone_channel(src, ch).is_some_and(|t| t.is_key_on),
        }
    }

    /// Tone currently sounding (or last sounded) on a channel
    pub fn tone(&self, src: SoundSource, ch: usize) -> Option<ToneDetail> {
        self.tone_channel(src, ch).map(|t| t.key_tone)
    }

    /*----- Sequences -----*/

    /// Advance every sequence and effect of a channel by one tick
    pub fn tick_event(&mut self, src: SoundSource, ch: usize) {
        match src {
            SoundSource::Fm => self.tick_event_fm(ch),
            SoundSource::Ssg => self.tick_event_ssg(ch),
            SoundSource::Adpcm => self.tick_event_adpcm(ch),
            SoundSource::Drum => {}
        }
    }

    /// End every iterator of a channel so nothing advances until the next key-on
    pub fn halt_sequences(&mut self, src: SoundSource, ch: usize) {
        match src {
            SoundSource::Fm => self.halt_sequences_fm(ch),
            SoundSource::Ssg => self.halt_sequences_ssg(ch),
            SoundSource::Adpcm => self.halt_sequences_adpcm(ch),
            SoundSource::Drum => {}
        }
    }

    /// Silence SSG and ADPCM without waiting for their release envelopes
    ///
    /// FM keeps its hardware release; call after keying everything off.
    pub fn silence(&mut self) {
        for ch in 0..SSG_CHANNELS {
            self.silence_ssg(ch);
        }
        for ch in 0..ADPCM_CHANNELS {
            self.silence_adpcm(ch);
        }
    }

    /*----- Instruments -----*/

    /// Re-resolve an edited instrument on every channel using it
    pub fn update_instrument(&mut self, instruments: &InstrumentsManager, number: usize) {
        for ch in 0..FM_CHANNELS {
            if self.fm[ch].instrument_number() == Some(number) {
                if let Some(patch) = instruments.fm_patch(number) {
                    self.set_instrument_fm(ch, patch);
                }
            }
        }
        for ch in 0..SSG_CHANNELS {
            if self.ssg[ch].instrument_number() == Some(number) {
                if let Some(patch) = instruments.ssg_patch(number) {
                    self.set_instrument_ssg(ch, patch);
                }
            }
        }
        for ch in 0..ADPCM_CHANNELS {
            if self.adpcm[ch].instrument_number() == Some(number) {
                if let Some(patch) = instruments.adpcm_patch(number) {
                    self.set_instrument_adpcm(ch, patch);
                }
            }
        }
    }

    /// Attach instrument `number` to a channel; returns false if it does not
    /// exist or belongs to another source
    pub fn set_instrument(
        &mut self,
        instruments: &InstrumentsManager,
        src: SoundSource,
        ch: usize,
        number: usize,
    ) -> bool {
        match src {
            SoundSource::Fm => instruments
                .fm_patch(number)
                .map(|p| self.set_instrument_fm(ch, p))
                .is_some(),
            SoundSource::Ssg => instruments
                .ssg_patch(number)
                .map(|p| self.set_instrument_ssg(ch, p))
                .is_some(),
            SoundSource::Adpcm => instruments
                .adpcm_patch(number)
                .map(|p| self.set_instrument_adpcm(ch, p))
                .is_some(),
            SoundSource::Drum => false,
        }
    }

    /*----- Volume and pan -----*/

    pub fn set_volume(&mut self, src: SoundSource, ch: usize, volume: i32) {
        match src {
            SoundSource::Drum => self.set_volume_drum(ch, volume),
            _ => {
                let max = volume_limit(src);
                if let Some(t) = self.tone_channel_mut(src, ch) {
                    t.base_volume = volume.clamp(0, max);
                    t.tmp_volume = None;
                    self.write_volume(src, ch);
                }
            }
        }
    }

    /// Volume for the current note only; the next key-on restores the base volume
    pub fn set_temporary_volume(&mut self, src: SoundSource, ch: usize, volume: i32) {
        match src {
            SoundSource::Drum => self.set_volume_drum(ch, volume),
            _ => {
                let max = volume_limit(src);
                if let Some(t) = self.tone_channel_mut(src, ch) {
                    t.tmp_volume = Some(volume.clamp(0, max));
                    self.write_volume(src, ch);
                }
            }
        }
    }

    /// Pan bits: 1 right, 2 left, 3 centre
    pub fn set_pan(&mut self, src: SoundSource, ch: usize, pan: u8) {
        match src {
            SoundSource::Fm => self.set_pan_fm(ch, pan),
            SoundSource::Drum => self.set_pan_drum(ch, pan),
            SoundSource::Adpcm => self.set_pan_adpcm(ch, pan),
            SoundSource::Ssg => {}
        }
    }

    /*----- Mute -----*/

    /// Suppress a channel's output without touching its state
    pub fn set_mute_state(&mut self, src: SoundSource, ch: usize, mute: bool) {
        match src {
            SoundSource::Drum => {
                if let Some(d) = self.drum.get_mut(ch) {
                    d.is_mute = mute;
                    self.write_volume_drum(ch);
                }
            }
            _ => {
                if let Some(t) = self.tone_channel_mut(src, ch) {
                    t.is_mute = mute;
                    self.write_volume(src, ch);
                }
            }
        }
    }

    pub fn is_mute(&self, src: SoundSource, ch: usize) -> bool {
        match src {
            SoundSource::Drum => self.drum.get(ch).is_some_and(|d| d.is_mute),
            _ => self.tone_channel(src, ch).is_some_and(|t| t.is_mute),
        }
    }

    /*----- Shared tone effects -----*/

    /// `00xy`; `(0, 0)` returns to the instrument's arpeggio
    pub fn set_arpeggio_effect(&mut self, src: SoundSource, ch: usize, second: i32, third: i32) {
        let inst_arp = match src {
            SoundSource::Fm => self.fm.get(ch).and_then(|c| c.patch.as_ref()?.arpeggio.clone()),
            SoundSource::Ssg => self.ssg.get(ch).and_then(|c| c.patch.as_ref()?.arpeggio.clone()),
            SoundSource::Adpcm => self.adpcm.get(ch).and_then(|c| c.patch.as_ref()?.arpeggio.clone()),
            SoundSource::Drum => None,
        };
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_arpeggio_effect(second, third, inst_arp.as_ref());
        }
    }

    pub fn set_portamento_effect(&mut self, src: SoundSource, ch: usize, depth: i32, is_tone_portamento: bool) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_portamento_effect(depth, is_tone_portamento);
        }
    }

    pub fn is_tone_portamento(&self, src: SoundSource, ch: usize) -> bool {
        self.tone_channel(src, ch).is_some_and(|t| t.is_tone_portamento)
    }

    pub fn set_vibrato_effect(&mut self, src: SoundSource, ch: usize, period: i32, depth: i32) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_vibrato_effect(period, depth * 4);
            self.write_pitch(src, ch);
        }
    }

    pub fn set_tremolo_effect(&mut self, src: SoundSource, ch: usize, period: i32, depth: i32) {
        let amplitude = match src {
            SoundSource::Fm => depth * 4,
            SoundSource::Adpcm => depth * 16,
            _ => depth,
        };
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_tremolo_effect(period, amplitude);
            self.write_volume(src, ch);
        }
    }

    pub fn set_volume_slide(&mut self, src: SoundSource, ch: usize, depth: i32, is_up: bool) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_volume_slide(depth, is_up);
        }
    }

    /// Fine tune in pitch steps
    pub fn set_detune(&mut self, src: SoundSource, ch: usize, pitch: i32) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_detune(pitch);
            self.write_pitch(src, ch);
        }
    }

    pub fn set_note_slide(&mut self, src: SoundSource, ch: usize, speed: i32, seminote: i32) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_note_slide(speed, seminote);
        }
    }

    pub fn set_transpose_effect(&mut self, src: SoundSource, ch: usize, seminote: i32) {
        if let Some(t) = self.tone_channel_mut(src, ch) {
            t.set_transpose_effect(seminote);
            self.write_pitch(src, ch);
        }
    }
}

/// Largest volume value of a tone-bearing source
fn volume_limit(src: SoundSource) -> i32 {
    match src {
        SoundSource::Fm => fm::MAX_VOLUME,
        SoundSource::Ssg => ssg::MAX_VOLUME,
        SoundSource::Adpcm => adpcm::MAX_VOLUME,
        SoundSource::Drum => drum::MAX_VOLUME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{NullChip, RegisterLog};
    use crate::instrument::{
        CommandSequence, CommandSequenceUnit, EnvelopeFm, FmEnvelopeParameter,
        FmOperatorParameter, Instrument, InstrumentFm, InstrumentSsg, SequenceType,
    };

    fn fm_instrument(number: usize, envelope: usize) -> Instrument {
        Instrument::Fm(InstrumentFm {
            number,
            name: String::new(),
            envelope,
            lfo: None,
            operator_sequences: Vec::new(),
            arpeggio: None,
            pitch: None,
            envelope_reset: false,
        })
    }

    #[test]
    fn test_output_history_keeps_latest_samples() {
        let mut ctrl = OpnaController::new(Box::new(NullChip), 44100);
        ctrl.fill_output_history(&[7; 10]);
        let history = ctrl.output_history();
        assert_eq!(history.len(), OUTPUT_HISTORY_SIZE);
        assert_eq!(&history[OUTPUT_HISTORY_SIZE - 10..], &[7; 10]);
        assert_eq!(history[OUTPUT_HISTORY_SIZE - 11], 0);

        let mut buf = vec![1i16; 4096];
        ctrl.get_stream_samples(&mut buf, 2048);
        assert!(ctrl.output_history().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_reset_writes_initial_state() {
        let log = RegisterLog::new();
        let handle = log.handle();
        let mut ctrl = OpnaController::new(Box::new(log), 44100);
        ctrl.update_register_states();
        assert_eq!(ctrl.register(0x29), Some(0x80));
        assert_eq!(ctrl.register(0x07), Some(0x3F));
        assert_eq!(ctrl.register(0x11), Some(drum::DEFAULT_MASTER_VOLUME as u8));
        assert!(!handle.lock().is_empty());
    }

    #[test]
    fn test_drum_has_no_tone_effects() {
        let mut ctrl = OpnaController::new(Box::new(NullChip), 44100);
        ctrl.set_detune(SoundSource::Drum, 0, 4);
        ctrl.set_arpeggio_effect(SoundSource::Drum, 0, 4, 7);
        assert!(ctrl.tone(SoundSource::Drum, 0).is_none());
        assert!(!ctrl.is_tone_portamento(SoundSource::Drum, 0));
    }

    #[test]
    fn test_master_volume_scales_output() {
        struct Constant;
        impl ChipBackend for Constant {
            fn reset(&mut self) {}
            fn set_register(&mut self, _address: u32, _value: u8) {}
            fn generate(&mut self, buffer: &mut [i16]) {
                buffer.fill(1000);
            }
        }
        let mut ctrl = OpnaController::new(Box::new(Constant), 44100);
        ctrl.set_master_volume(50);
        let mut buf = [0i16; 8];
        ctrl.get_stream_samples(&mut buf, 4);
        assert_eq!(buf, [500; 8]);
    }

    #[test]
    fn test_update_instrument_rewrites_only_its_channels() {
        let mut instruments = InstrumentsManager::new();
        let edited = instruments.add_envelope_fm(EnvelopeFm::new(0));
        let other = instruments.add_envelope_fm(EnvelopeFm::new(0));
        instruments.add_instrument(1, fm_instrument(1, edited)).unwrap();
        instruments.add_instrument(2, fm_instrument(2, other)).unwrap();

        let log = RegisterLog::new();
        let handle = log.handle();
        let mut ctrl = OpnaController::new(Box::new(log), 44100);
        assert!(ctrl.set_instrument(&instruments, SoundSource::Fm, 0, 1));
        assert!(ctrl.set_instrument(&instruments, SoundSource::Fm, 1, 2));
        assert!(ctrl.set_instrument(&instruments, SoundSource::Fm, 2, 1));
        ctrl.update_register_states();
        assert_eq!(ctrl.register(0x30), Some(0x01));
        handle.lock().clear();

        let ml = FmEnvelopeParameter::Op(0, FmOperatorParameter::Ml);
        instruments.envelope_fm_mut(edited).unwrap().set(ml, 5);
        ctrl.update_instrument(&instruments, 1);
        ctrl.update_register_states();

        assert_eq!(ctrl.register(0x30), Some(0x05));
        assert_eq!(ctrl.register(0x32), Some(0x05));
        assert_eq!(ctrl.register(0x31), Some(0x01));
        let writes = handle.lock();
        assert!(writes.iter().any(|w| w.address == 0x30 && w.value == 0x05));
        assert!(writes.iter().all(|w| w.address & 3 != 1));
    }

    #[test]
    fn test_update_instrument_picks_up_edited_sequence() {
        let mut instruments = InstrumentsManager::new();
        let envelope = instruments.add_sequence(CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            vec![CommandSequenceUnit::new(10, -1)],
        ));
        instruments
            .add_instrument(
                3,
                Instrument::Ssg(InstrumentSsg {
                    number: 3,
                    name: String::new(),
                    waveform: None,
                    tone_noise: None,
                    envelope: Some(envelope),
                    arpeggio: None,
                    pitch: None,
                }),
            )
            .unwrap();

        let mut ctrl = OpnaController::new(Box::new(NullChip), 44100);
        ctrl.set_instrument(&instruments, SoundSource::Ssg, 0, 3);
        ctrl.key_on(SoundSource::Ssg, 0, Note::C, 4, 0, true);
        assert_eq!(ctrl.register(0x08), Some(10));

        instruments
            .sequence_mut(envelope)
            .unwrap()
            .set_sequence_command(0, 6, -1);
        ctrl.key_on(SoundSource::Ssg, 0, Note::D, 4, 0, true);
        assert_eq!(ctrl.register(0x08), Some(10));

        ctrl.update_instrument(&instruments, 3);
        ctrl.key_on(SoundSource::Ssg, 0, Note::E, 4, 0, true);
        assert_eq!(ctrl.register(0x08), Some(6));
    }
}
