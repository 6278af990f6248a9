//! Song playback
//!
//! The driver calls [`PlaybackManager::stream_count_up`] once per tick. At
//! a step head every track's row is read and turned into controller calls;
//! the ticks in between run delayed events and advance the sequences.

pub mod tick_counter;

pub use tick_counter::{tempo_to_interrupt_rate, TickCounter};

use crate::error::{Error, Result};
use crate::instrument::InstrumentsManager;
use crate::module::effect::make_effect_data;
use crate::module::step::MAX_NOTE_NUMBER;
use crate::module::{
    Effect, EffectClass, EffectType, Module, SoundSource, Step, StepNote, TrackAttribute,
};
use crate::opna::{OpnaController, RegisterUnit};
use crate::pitch::note_number_to_octave_and_note;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Speed effect values below this set the speed, others the tempo
const SPEED_TEMPO_BOUNDARY: i32 = 0x20;

/// Centre value of detune and brightness effects
const SIGNED_EFFECT_CENTER: i32 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    /// Follow the order list
    Song,
    /// Repeat one order
    Pattern,
    /// Play one step and stop
    Step,
}

/// Position published for other threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackPosition {
    pub is_playing: bool,
    pub order: Option<usize>,
    pub step: Option<usize>,
}

pub type PlaybackStatus = Arc<Mutex<PlaybackPosition>>;

/// Per-track state of the row being played
#[derive(Debug, Clone)]
struct TrackState {
    source: SoundSource,
    channel: usize,
    step: Step,
    key_on_effects: Vec<Effect>,
    step_begin_effects: Vec<Effect>,
    registers: Vec<RegisterUnit>,
    note_delay: Option<u32>,
    note_cut: Option<u32>,
    volume_delay: Option<(u32, i32)>,
    transpose_delay: Option<(u32, i32)>,
}

impl TrackState {
    fn new(attribute: &TrackAttribute) -> Self {
        Self {
            source: attribute.source,
            channel: attribute.channel_in_source,
            step: Step::default(),
            key_on_effects: Vec::new(),
            step_begin_effects: Vec::new(),
            registers: Vec::new(),
            note_delay: None,
            note_cut: None,
            volume_delay: None,
            transpose_delay: None,
        }
    }

    /// Take a new row, sorting its effects by when they apply
    fn begin_step(&mut self, step: Step, globals: &mut Vec<Effect>) {
        self.key_on_effects.clear();
        self.step_begin_effects.clear();
        self.registers.clear();
        self.note_delay = None;

        for cell in step.effects.iter().flatten() {
            let eff = make_effect_data(self.source, &cell.id, cell.value);
            match eff.ty.class() {
                EffectClass::Global => globals.push(eff),
                EffectClass::KeyOnBased => self.key_on_effects.push(eff),
                EffectClass::StepBeginBased => self.step_begin_effects.push(eff),
                EffectClass::DirectRegister => self.queue_register(eff),
                EffectClass::None => trace!(id = %cell.id, "unknown effect ignored"),
            }
        }
        self.step = step;
    }

    fn queue_register(&mut self, eff: Effect) {
        match eff.ty {
            EffectType::RegisterAddress(bank) => {
                self.registers
                    .push(RegisterUnit::new((bank << 8) | eff.value as u32));
            }
            EffectType::RegisterValue => {
                if let Some(unit) = self.registers.last_mut().filter(|u| !u.has_completed) {
                    unit.set_value(eff.value as u8);
                }
            }
            _ => {}
        }
    }

    /// Count every pending delay down by one tick
    fn count_down_delays(&mut self) {
        for n in [&mut self.note_delay, &mut self.note_cut].into_iter().flatten() {
            *n = n.saturating_sub(1);
        }
        for (n, _) in [&mut self.volume_delay, &mut self.transpose_delay]
            .into_iter()
            .flatten()
        {
            *n = n.saturating_sub(1);
        }
    }
}

pub struct PlaybackManager {
    opna: OpnaController,
    module: Arc<RwLock<Module>>,
    instruments: Arc<RwLock<InstrumentsManager>>,
    tick_counter: TickCounter,
    song: usize,
    tracks: Vec<TrackState>,
    mode: PlayMode,
    is_playing: bool,
    play_position: Option<(usize, usize)>,
    next_read: Option<(usize, usize)>,
    is_retrieve_channel: bool,
    is_looping: bool,
    status: PlaybackStatus,
}

impl PlaybackManager {
    pub fn new(
        opna: OpnaController,
        module: Arc<RwLock<Module>>,
        instruments: Arc<RwLock<InstrumentsManager>>,
    ) -> Self {
        Self {
            opna,
            module,
            instruments,
            tick_counter: TickCounter::new(),
            song: 0,
            tracks: Vec::new(),
            mode: PlayMode::Song,
            is_playing: false,
            play_position: None,
            next_read: None,
            is_retrieve_channel: true,
            is_looping: true,
            status: Arc::new(Mutex::new(PlaybackPosition::default())),
        }
    }

    pub fn opna(&self) -> &OpnaController {
        &self.opna
    }

    pub fn opna_mut(&mut self) -> &mut OpnaController {
        &mut self.opna
    }

    pub fn tick_counter(&self) -> &TickCounter {
        &self.tick_counter
    }

    /// Current tick rate in Hz
    pub fn interrupt_rate(&self) -> f64 {
        self.tick_counter.interrupt_rate()
    }

    pub fn status_handle(&self) -> PlaybackStatus {
        Arc::clone(&self.status)
    }

    /// Select the song to play; stops playback
    pub fn set_song(&mut self, song: usize) -> Result<()> {
        self.module.read().song(song)?;
        if self.is_playing {
            self.stop_play_song();
        }
        self.song = song;
        Ok(())
    }

    pub fn song(&self) -> usize {
        self.song
    }

    /// Rebuild channel state from earlier rows when starting mid-song
    pub fn set_channel_retrieving(&mut self, enabled: bool) {
        self.is_retrieve_channel = enabled;
    }

    /// Wrap to the first order after the last one instead of stopping
    pub fn set_song_looping(&mut self, enabled: bool) {
        self.is_looping = enabled;
    }

    /*----- Transport -----*/

    pub fn start_play_from_start(&mut self) -> Result<()> {
        self.start_play(PlayMode::Song, 0, 0)
    }

    pub fn start_play_song(&mut self, order: usize) -> Result<()> {
        self.start_play(PlayMode::Song, order, 0)
    }

    /// Loop one order
    pub fn start_play_pattern(&mut self, order: usize) -> Result<()> {
        self.start_play(PlayMode::Pattern, order, 0)
    }

    pub fn start_play_from_position(&mut self, order: usize, step: usize) -> Result<()> {
        self.start_play(PlayMode::Song, order, step)
    }

    /// Play a single step; playback stops at the next step head
    pub fn play_step(&mut self, order: usize, step: usize) -> Result<()> {
        self.start_play(PlayMode::Step, order, step)
    }

    fn start_play(&mut self, mode: PlayMode, order: usize, step: usize) -> Result<()> {
        let (tempo, speed, groove, attributes, order_len, size) = {
            let module = self.module.read();
            let song = module.song(self.song)?;
            let groove = song
                .groove
                .and_then(|g| module.groove(g).map(<[u32]>::to_vec));
            (
                song.tempo,
                song.speed,
                groove,
                song.tracks.iter().map(|t| t.attribute).collect::<Vec<_>>(),
                song.order_len(),
                song.pattern_size_at(order),
            )
        };
        if order >= order_len || step >= size {
            return Err(Error::InvalidPosition { order, step });
        }

        self.opna.reset();
        self.tracks = attributes.iter().map(TrackState::new).collect();
        self.tick_counter.set_tempo(tempo);
        match groove {
            Some(g) => self.tick_counter.set_groove(&g),
            None => self.tick_counter.set_speed(speed),
        }
        self.tick_counter.reset_count();

        if self.is_retrieve_channel && (order, step) != (0, 0) {
            self.retrieve_channel_states(order, step);
        }

        self.mode = mode;
        self.play_position = None;
        self.next_read = Some((order, step));
        self.is_playing = true;
        self.tick_counter.set_play_state(true);
        self.publish_status();
        info!(song = self.song, order, step, ?mode, "playback started");
        Ok(())
    }

    /// Stop and key off every channel
    pub fn stop_play_song(&mut self) {
        for src in SoundSource::ALL {
            for ch in 0..src.channel_count() {
                self.opna.key_off(src, ch, false);
            }
        }
        self.opna.silence();
        self.opna.update_register_states();
        self.tick_counter.set_play_state(false);
        self.is_playing = false;
        self.next_read = None;
        self.play_position = None;
        self.publish_status();
        info!(song = self.song, "playback stopped");
    }

    pub fn is_play_song(&self) -> bool {
        self.is_playing && self.mode != PlayMode::Step
    }

    pub fn is_playing_step(&self) -> bool {
        self.is_playing && self.mode == PlayMode::Step
    }

    pub fn playing_order(&self) -> Option<usize> {
        self.play_position.map(|(o, _)| o)
    }

    pub fn playing_step(&self) -> Option<usize> {
        self.play_position.map(|(_, s)| s)
    }

    fn publish_status(&self) {
        *self.status.lock() = PlaybackPosition {
            is_playing: self.is_playing,
            order: self.playing_order(),
            step: self.playing_step(),
        };
    }

    /*----- Stream -----*/

    /// Advance one tick
    ///
    /// Returns -1 when stopped, 0 when a step was read, otherwise the number
    /// of ticks left before the next step.
    pub fn stream_count_up(&mut self) -> i32 {
        let state = self.tick_counter.count_up();
        let state = if state == 0 {
            if self.step_process() {
                self.tick_all_channels();
                0
            } else {
                -1
            }
        } else {
            if state > 0 {
                self.tick_process(state);
            }
            state
        };
        self.opna.update_register_states();
        state
    }

    pub fn get_stream_samples(&mut self, buffer: &mut [i16], frames: usize) {
        self.opna.get_stream_samples(buffer, frames);
    }

    /// Tick and pull one tick's worth of frames at a time until playback
    /// stops or `max_frames` were rendered; returns the frames rendered
    pub fn render(&mut self, max_frames: u64) -> u64 {
        let rate = f64::from(self.opna.rate());
        let mut buffer = Vec::new();
        let mut carry = 0.0;
        let mut rendered = 0;
        while rendered < max_frames && self.stream_count_up() >= 0 {
            let exact = rate / self.interrupt_rate() + carry;
            carry = exact.fract();
            let frames = (exact as u64).min(max_frames - rendered);
            buffer.resize(frames as usize * 2, 0);
            self.get_stream_samples(&mut buffer, frames as usize);
            rendered += frames;
        }
        rendered
    }

    pub fn update_register_states(&mut self) {
        self.opna.update_register_states();
    }

    fn tick_all_channels(&mut self) {
        for t in &self.tracks {
            self.opna.tick_event(t.source, t.channel);
        }
    }

    /*----- Step -----*/

    /// Read and execute the next row; returns false when playback stopped
    fn step_process(&mut self) -> bool {
        let Some((order, step)) = self.next_read.take() else {
            info!(song = self.song, "end of song");
            self.stop_play_song();
            return false;
        };
        let rows: Option<Vec<Step>> = {
            let module = self.module.read();
            module.song(self.song).ok().map(|song| {
                song.tracks
                    .iter()
                    .map(|t| t.step(order, step).cloned().unwrap_or_default())
                    .collect()
            })
        };
        let Some(rows) = rows else {
            self.stop_play_song();
            return false;
        };
        self.play_position = Some((order, step));

        let mut globals = Vec::new();
        for (track, row) in self.tracks.iter_mut().zip(rows) {
            track.begin_step(row, &mut globals);
        }

        let jumped = self.execute_global_effects(&globals, order);
        for i in 0..self.tracks.len() {
            self.execute_step_begin_effects(i);
            if self.tracks[i].note_delay.is_none() {
                self.execute_step_events(i);
            }
            self.execute_direct_registers(i);
            self.fire_delay_events(i);
        }

        if self.mode == PlayMode::Step {
            self.next_read = None;
        } else if !jumped {
            self.next_read = self.find_next_step(order, step);
        }
        self.publish_status();
        true
    }

    /// Apply transport and timing effects; returns true if the next position was set
    fn execute_global_effects(&mut self, globals: &[Effect], order: usize) -> bool {
        let mut jump_order = None;
        let mut break_step = None;
        let mut song_end = false;

        for eff in globals {
            match eff.ty {
                EffectType::SpeedTempoChange => {
                    if eff.value < SPEED_TEMPO_BOUNDARY {
                        if eff.value > 0 {
                            self.tick_counter.set_speed(eff.value as u32);
                        }
                    } else {
                        self.tick_counter.set_tempo(eff.value as u32);
                    }
                }
                EffectType::GrooveChange => {
                    let module = self.module.read();
                    match module.groove(eff.value as usize) {
                        Some(g) => self.tick_counter.set_groove(g),
                        None => trace!(groove = eff.value, "unknown groove"),
                    }
                }
                EffectType::PositionJump if self.mode == PlayMode::Song => {
                    jump_order = Some(eff.value as usize);
                }
                EffectType::SongEnd => song_end = true,
                EffectType::PatternBreak => break_step = Some(eff.value as usize),
                _ => {}
            }
        }

        if song_end {
            debug!("song end effect");
            self.next_read = None;
            return true;
        }
        if jump_order.is_none() && break_step.is_none() {
            return false;
        }

        let module = self.module.read();
        let Ok(song) = module.song(self.song) else {
            return false;
        };
        let order_len = song.order_len();
        let next_order = match (jump_order, self.mode) {
            (Some(o), _) if o < order_len => Some(o),
            (Some(_), _) => None,
            (None, PlayMode::Pattern) => Some(order),
            (None, _) if order + 1 < order_len => Some(order + 1),
            (None, _) if self.is_looping => Some(0),
            (None, _) => None,
        };
        self.next_read = next_order.map(|o| {
            let size = song.pattern_size_at(o);
            let s = break_step.filter(|&s| s < size).unwrap_or(0);
            (o, s)
        });
        debug!(next = ?self.next_read, "transport jump");
        true
    }

    fn find_next_step(&self, order: usize, step: usize) -> Option<(usize, usize)> {
        let module = self.module.read();
        let song = module.song(self.song).ok()?;
        if step + 1 < song.pattern_size_at(order) {
            return Some((order, step + 1));
        }
        match self.mode {
            PlayMode::Pattern => Some((order, 0)),
            PlayMode::Step => None,
            PlayMode::Song if order + 1 < song.order_len() => Some((order + 1, 0)),
            PlayMode::Song if self.is_looping => Some((0, 0)),
            PlayMode::Song => None,
        }
    }

    fn execute_step_begin_effects(&mut self, i: usize) {
        let effects = self.tracks[i].step_begin_effects.clone();
        let (src, ch) = (self.tracks[i].source, self.tracks[i].channel);
        for eff in effects {
            let track = &mut self.tracks[i];
            match eff.ty {
                EffectType::NoteDelay => {
                    track.note_delay = (eff.value > 0).then_some(eff.value as u32);
                }
                EffectType::NoteCut => track.note_cut = Some(eff.value as u32),
                EffectType::VolumeDelay => {
                    track.volume_delay = Some((eff.x() as u32, eff.y()));
                }
                EffectType::TransposeDelay => {
                    let seminote = if eff.x() & 8 != 0 { -eff.y() } else { eff.y() };
                    track.transpose_delay = Some(((eff.x() & 7) as u32, seminote));
                }
                _ => apply_step_begin_effect(&mut self.opna, src, ch, eff),
            }
        }
    }

    /// Instrument, volume, key-on based effects and the note of the current row
    fn execute_step_events(&mut self, i: usize) {
        let (src, ch) = (self.tracks[i].source, self.tracks[i].channel);
        let step = self.tracks[i].step.clone();
        let effects = self.tracks[i].key_on_effects.clone();

        if let Some(number) = step.instrument {
            if src != SoundSource::Drum {
                let instruments = Arc::clone(&self.instruments);
                let instruments = instruments.read();
                if self.opna.set_instrument(&instruments, src, ch, number) {
                    debug!(%src, ch, number, "instrument changed");
                } else {
                    trace!(%src, ch, number, "instrument not usable on this channel");
                }
            }
        }
        if let Some(volume) = step.volume {
            self.opna.set_volume(src, ch, volume);
        }
        for eff in effects {
            apply_key_on_effect(&mut self.opna, src, ch, eff);
        }
        match step.note {
            StepNote::Note(n) => {
                let (octave, note) = note_number_to_octave_and_note(n.clamp(0, MAX_NOTE_NUMBER));
                self.opna.key_on(src, ch, note, octave, 0, false);
            }
            StepNote::Echo(buffer) => self.opna.key_on_echo(src, ch, buffer),
            StepNote::KeyOff => self.opna.key_off(src, ch, false),
            StepNote::None => {}
        }
    }

    fn execute_direct_registers(&mut self, i: usize) {
        for unit in std::mem::take(&mut self.tracks[i].registers) {
            if unit.has_completed {
                self.opna.send_register(unit.address, unit.value);
            }
        }
    }

    /// Run delayed events whose counter reached zero
    fn fire_delay_events(&mut self, i: usize) {
        let (src, ch) = (self.tracks[i].source, self.tracks[i].channel);
        if self.tracks[i].note_delay == Some(0) {
            self.tracks[i].note_delay = None;
            self.execute_step_events(i);
        }
        let track = &mut self.tracks[i];
        if track.note_cut == Some(0) {
            track.note_cut = None;
            self.opna.key_off(src, ch, false);
        }
        if let Some((0, volume)) = track.volume_delay {
            track.volume_delay = None;
            self.opna.set_temporary_volume(src, ch, volume);
        }
        if let Some((0, seminote)) = track.transpose_delay {
            track.transpose_delay = None;
            self.opna.set_transpose_effect(src, ch, seminote);
        }
    }

    /*----- Tick -----*/

    fn tick_process(&mut self, rest: i32) {
        for i in 0..self.tracks.len() {
            self.tracks[i].count_down_delays();
            self.fire_delay_events(i);
            if rest == 1 && self.tracks[i].source == SoundSource::Fm {
                self.check_envelope_reset_fm(i);
            }
        }
        self.tick_all_channels();
    }

    /// Silence an FM channel one tick before a row that keys it on again
    fn check_envelope_reset_fm(&mut self, i: usize) {
        let Some((order, step)) = self.next_read else {
            return;
        };
        let ch = self.tracks[i].channel;
        let next = {
            let module = self.module.read();
            module
                .song(self.song)
                .ok()
                .and_then(|s| s.tracks.get(i)?.step(order, step).cloned())
        };
        let Some(next) = next else {
            return;
        };
        if !next.note.is_key_on() || self.opna.is_tone_portamento(SoundSource::Fm, ch) {
            return;
        }
        let effects: Vec<Effect> = next
            .effects
            .iter()
            .flatten()
            .map(|c| make_effect_data(SoundSource::Fm, &c.id, c.value))
            .collect();
        if effects
            .iter()
            .any(|e| e.ty == EffectType::NoteDelay && e.value > 0)
        {
            return;
        }
        let enabled = effects
            .iter()
            .rev()
            .find(|e| e.ty == EffectType::EnvelopeReset)
            .map_or_else(|| self.opna.is_envelope_reset_fm(ch), |e| e.value != 0);
        if enabled {
            self.opna.reset_fm_channel_envelope(ch);
        }
    }

    /*----- Retrieval -----*/

    /// Rebuild instruments, volumes, persistent effects and timing from the
    /// rows before `(order, step)` without sounding anything
    fn retrieve_channel_states(&mut self, order: usize, step: usize) {
        let mut instruments = vec![None; self.tracks.len()];
        let mut volumes = vec![None; self.tracks.len()];
        let mut effects: Vec<Vec<Effect>> = vec![Vec::new(); self.tracks.len()];
        let mut speed = None;
        let mut tempo = None;
        let mut groove: Option<Vec<u32>> = None;

        {
            let module = self.module.read();
            let Ok(song) = module.song(self.song) else {
                return;
            };
            for o in 0..=order {
                let size = song.pattern_size_at(o);
                let end = if o == order { step.min(size) } else { size };
                for s in 0..end {
                    for (ti, track) in song.tracks.iter().enumerate().take(self.tracks.len()) {
                        let Some(row) = track.step(o, s) else {
                            continue;
                        };
                        if row.instrument.is_some() {
                            instruments[ti] = row.instrument;
                        }
                        if row.volume.is_some() {
                            volumes[ti] = row.volume;
                        }
                        for cell in row.effects.iter().flatten() {
                            let eff = make_effect_data(track.attribute.source, &cell.id, cell.value);
                            match eff.ty {
                                EffectType::SpeedTempoChange if eff.value < SPEED_TEMPO_BOUNDARY => {
                                    if eff.value > 0 {
                                        speed = Some(eff.value as u32);
                                        groove = None;
                                    }
                                }
                                EffectType::SpeedTempoChange => tempo = Some(eff.value as u32),
                                EffectType::GrooveChange => {
                                    if let Some(g) = module.groove(eff.value as usize) {
                                        groove = Some(g.to_vec());
                                        speed = None;
                                    }
                                }
                                ty => {
                                    if let Some(slot) = retrieval_slot(ty) {
                                        let list = &mut effects[ti];
                                        list.retain(|e| retrieval_slot(e.ty) != Some(slot));
                                        list.push(eff);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(t) = tempo {
            self.tick_counter.set_tempo(t);
        }
        if let Some(s) = speed {
            self.tick_counter.set_speed(s);
        }
        if let Some(g) = groove {
            self.tick_counter.set_groove(&g);
        }

        let manager = Arc::clone(&self.instruments);
        let manager = manager.read();
        for (i, track) in self.tracks.iter().enumerate() {
            let (src, ch) = (track.source, track.channel);
            if let Some(number) = instruments[i] {
                if src != SoundSource::Drum {
                    self.opna.set_instrument(&manager, src, ch, number);
                }
            }
            if let Some(volume) = volumes[i] {
                self.opna.set_volume(src, ch, volume);
            }
            for &eff in &effects[i] {
                match eff.ty.class() {
                    EffectClass::KeyOnBased => apply_key_on_effect(&mut self.opna, src, ch, eff),
                    _ => apply_step_begin_effect(&mut self.opna, src, ch, eff),
                }
            }
            self.opna.halt_sequences(src, ch);
        }
        debug!(order, step, "channel states retrieved");
    }
}

/// Effects that persist across rows, grouped so a later one replaces an
/// earlier one of the same group
fn retrieval_slot(ty: EffectType) -> Option<EffectType> {
    use EffectType::*;
    match ty {
        PortamentoUp | PortamentoDown | TonePortamento => Some(PortamentoUp),
        Arpeggio | Vibrato | Tremolo | Pan | VolumeSlide | Detune | EnvelopeReset
        | AutoEnvelope | ToneNoiseMix | MasterVolume | NoisePitch | HardEnvHighPeriod
        | HardEnvLowPeriod | FbControl | TlControl(_) | MlControl(_) | ArControl(_)
        | DrControl(_) | RrControl(_) | Brightness => Some(ty),
        _ => None,
    }
}

fn apply_key_on_effect(opna: &mut OpnaController, src: SoundSource, ch: usize, eff: Effect) {
    let v = eff.value;
    let result = match eff.ty {
        EffectType::Arpeggio => {
            opna.set_arpeggio_effect(src, ch, eff.x(), eff.y());
            Ok(())
        }
        EffectType::PortamentoUp => {
            opna.set_portamento_effect(src, ch, v, false);
            Ok(())
        }
        EffectType::PortamentoDown => {
            opna.set_portamento_effect(src, ch, -v, false);
            Ok(())
        }
        EffectType::TonePortamento => {
            opna.set_portamento_effect(src, ch, v, true);
            Ok(())
        }
        EffectType::Vibrato => {
            opna.set_vibrato_effect(src, ch, eff.x(), eff.y());
            Ok(())
        }
        EffectType::Pan => {
            if (0..=3).contains(&v) {
                opna.set_pan(src, ch, v as u8);
            }
            Ok(())
        }
        EffectType::EnvelopeReset => {
            opna.set_envelope_reset_fm(ch, v != 0);
            Ok(())
        }
        EffectType::AutoEnvelope => {
            let auto = (eff.x() != 0).then(|| (eff.x() - 8, eff.y() as u8));
            opna.set_auto_envelope_ssg(ch, auto);
            Ok(())
        }
        EffectType::Detune => {
            opna.set_detune(src, ch, v - SIGNED_EFFECT_CENTER);
            Ok(())
        }
        EffectType::NoteSlideUp => {
            opna.set_note_slide(src, ch, eff.x(), eff.y());
            Ok(())
        }
        EffectType::NoteSlideDown => {
            opna.set_note_slide(src, ch, eff.x(), -eff.y());
            Ok(())
        }
        EffectType::FbControl => {
            opna.set_fb_control_fm(ch, v);
            Ok(())
        }
        EffectType::TlControl(op) => opna.set_tl_control_fm(ch, op, v),
        EffectType::MlControl(op) => opna.set_ml_control_fm(ch, op, v),
        EffectType::ArControl(op) => opna.set_ar_control_fm(ch, op, v),
        EffectType::DrControl(op) => opna.set_dr_control_fm(ch, op, v),
        EffectType::RrControl(op) => opna.set_rr_control_fm(ch, op, v),
        EffectType::Brightness => {
            opna.set_brightness_fm(ch, v - SIGNED_EFFECT_CENTER);
            Ok(())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        debug!(%src, ch, "effect rejected: {}", e);
    }
}

fn apply_step_begin_effect(opna: &mut OpnaController, src: SoundSource, ch: usize, eff: Effect) {
    let v = eff.value;
    match eff.ty {
        EffectType::VolumeSlide => {
            if eff.x() > 0 {
                opna.set_volume_slide(src, ch, eff.x(), true);
            } else {
                opna.set_volume_slide(src, ch, eff.y(), false);
            }
        }
        EffectType::Tremolo => opna.set_tremolo_effect(src, ch, eff.x(), eff.y()),
        EffectType::ToneNoiseMix => opna.set_tone_noise_mix_ssg(ch, v as u8),
        EffectType::MasterVolume => opna.set_master_volume_drum(v),
        EffectType::NoisePitch => opna.set_noise_pitch_ssg(ch, v as u8),
        EffectType::HardEnvHighPeriod => opna.set_hard_envelope_period_ssg(ch, true, v as u8),
        EffectType::HardEnvLowPeriod => opna.set_hard_envelope_period_ssg(ch, false, v as u8),
        _ => {}
    }
}
