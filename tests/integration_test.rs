//! Integration tests driving playback through the public API
//!
//! Songs are built in code, played against a register-recording backend or
//! the VGM recorder, and checked through the recorded writes.

use opnatrack::chip::{ChipBackend, RegisterLog, RegisterLogHandle};
use opnatrack::instrument::{EnvelopeFm, Instrument, InstrumentFm, InstrumentsManager};
use opnatrack::module::{Module, Song, SoundSource, Step, StepNote};
use opnatrack::pitch::{pitch_fm, Note};
use opnatrack::s98::{S98Command, S98File, S98Recorder, DEVICE_YM2608};
use opnatrack::vgm::{read_vgm_file, Gd3Metadata, VgmCommand, VgmReader, VgmRecorder};
use opnatrack::{Config, Error, OpnaController, PlaybackManager, Project};
use parking_lot::RwLock;
use std::sync::Arc;
use tempfile::tempdir;

const FM1: usize = 0;
const SSG1: usize = 6;
const BD: usize = 9;

/// Instrument 0: FM patch with carrier TL 0
fn instruments() -> InstrumentsManager {
    let mut manager = InstrumentsManager::new();
    let mut env = EnvelopeFm::new(0);
    env.ops[1].tl = 0;
    env.ops[3].tl = 0;
    let envelope = manager.add_envelope_fm(env);
    manager
        .add_instrument(
            0,
            Instrument::Fm(InstrumentFm {
                number: 0,
                name: "piano".into(),
                envelope,
                lfo: None,
                operator_sequences: Vec::new(),
                arpeggio: None,
                pitch: None,
                envelope_reset: false,
            }),
        )
        .unwrap();
    manager
}

fn song_module(pattern_size: usize, speed: u32) -> Module {
    let mut module = Module::new();
    module.title = "Test module".into();
    let mut song = Song::new_standard(0, pattern_size);
    song.speed = speed;
    module.songs.push(song);
    module
}

fn step(module: &mut Module, track: usize, order: usize, step: usize) -> &mut Step {
    module.songs[0].tracks[track]
        .pattern_from_order_mut(order)
        .and_then(|p| p.step_mut(step))
        .unwrap()
}

fn manager(chip: Box<dyn ChipBackend>, module: Module, instruments: InstrumentsManager) -> PlaybackManager {
    PlaybackManager::new(
        OpnaController::new(chip, 44100),
        Arc::new(RwLock::new(module)),
        Arc::new(RwLock::new(instruments)),
    )
}

fn logged(module: Module) -> (PlaybackManager, RegisterLogHandle) {
    let log = RegisterLog::new();
    let handle = log.handle();
    (manager(Box::new(log), module, instruments()), handle)
}

fn key_on_writes(handle: &RegisterLogHandle) -> usize {
    handle
        .lock()
        .iter()
        .filter(|w| w.address == 0x28 && w.value & 0xF0 != 0)
        .count()
}

fn heads(pm: &mut PlaybackManager, n: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    while out.len() < n {
        match pm.stream_count_up() {
            0 => out.push((pm.playing_order().unwrap(), pm.playing_step().unwrap())),
            r if r < 0 => break,
            _ => {}
        }
    }
    out
}

// =============================================================================
// Timing
// =============================================================================

#[test]
fn test_speed_three_song_tick_sequence() {
    let mut module = song_module(4, 6);
    let first = step(&mut module, FM1, 0, 0);
    first.note = StepNote::Note(48);
    first.instrument = Some(0);
    first.push_effect("0F", 0x03);
    first.push_effect("0F", 0x78);
    step(&mut module, FM1, 0, 3).note = StepNote::KeyOff;

    let (mut pm, handle) = logged(module);
    pm.set_song_looping(false);
    pm.start_play_from_start().unwrap();

    let counts: Vec<i32> = (0..13).map(|_| pm.stream_count_up()).collect();
    assert_eq!(counts, vec![0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, -1]);
    assert_eq!(pm.interrupt_rate(), 48.0);
    assert_eq!(key_on_writes(&handle), 1);
    assert!(!pm.opna().is_key_on(SoundSource::Fm, 0));
    assert!(!pm.status_handle().lock().is_playing);
}

// =============================================================================
// Transport
// =============================================================================

#[test]
fn test_pattern_break_is_deterministic() {
    let mut module = song_module(4, 1);
    module.songs[0].push_order(1);
    step(&mut module, FM1, 0, 1).push_effect("0D", 0x02);

    let expected = vec![(0, 0), (0, 1), (1, 2), (1, 3), (0, 0), (0, 1), (1, 2), (1, 3)];
    for _ in 0..2 {
        let (mut pm, _) = logged(module.clone());
        pm.start_play_from_start().unwrap();
        assert_eq!(heads(&mut pm, 8), expected);
    }
}

#[test]
fn test_song_end_stops_even_when_looping() {
    let mut module = song_module(8, 2);
    step(&mut module, SSG1, 0, 2).push_effect("0C", 0x00);
    let (mut pm, _) = logged(module);
    pm.start_play_from_start().unwrap();
    assert_eq!(heads(&mut pm, 10), vec![(0, 0), (0, 1), (0, 2)]);
    assert!(!pm.is_play_song());
    assert_eq!(pm.stream_count_up(), -1);
}

#[test]
fn test_stop_from_another_thread() {
    let mut module = song_module(16, 3);
    step(&mut module, FM1, 0, 0).note = StepNote::Note(60);
    let (pm, _) = logged(module);
    let pm = Arc::new(parking_lot::Mutex::new(pm));
    pm.lock().start_play_from_start().unwrap();
    pm.lock().stream_count_up();
    assert!(pm.lock().opna().is_key_on(SoundSource::Fm, 0));

    let remote = Arc::clone(&pm);
    std::thread::spawn(move || remote.lock().stop_play_song())
        .join()
        .unwrap();
    let mut pm = pm.lock();
    assert!(!pm.opna().is_key_on(SoundSource::Fm, 0));
    assert_eq!(pm.stream_count_up(), -1);
}

// =============================================================================
// Controller behaviour during playback
// =============================================================================

#[test]
fn test_mute_toggle_restores_registers() {
    let mut module = song_module(8, 6);
    let first = step(&mut module, FM1, 0, 0);
    first.note = StepNote::Note(48);
    first.instrument = Some(0);
    first.volume = Some(8);
    let (mut pm, handle) = logged(module);
    pm.start_play_from_start().unwrap();
    pm.stream_count_up();

    let tl = |pm: &PlaybackManager| -> Vec<Option<u8>> {
        (0x40..0x50).map(|a| pm.opna().register(a)).collect()
    };
    let before = tl(&pm);
    assert_eq!(pm.opna().register(0x4C), Some(8));

    pm.opna_mut().set_mute_state(SoundSource::Fm, 0, true);
    pm.update_register_states();
    let writes = handle.lock().len();
    pm.opna_mut().set_mute_state(SoundSource::Fm, 0, true);
    pm.update_register_states();
    assert_eq!(handle.lock().len(), writes);
    assert_eq!(pm.opna().register(0x48), Some(127));
    assert_eq!(pm.opna().register(0x4C), Some(127));

    pm.opna_mut().set_mute_state(SoundSource::Fm, 0, false);
    pm.update_register_states();
    assert_eq!(tl(&pm), before);
}

#[test]
fn test_drum_track_writes_key_flags() {
    let mut module = song_module(4, 2);
    let hit = step(&mut module, BD, 0, 0);
    hit.note = StepNote::Note(48);
    hit.volume = Some(20);
    step(&mut module, BD, 0, 1).note = StepNote::KeyOff;
    let (mut pm, handle) = logged(module);
    pm.start_play_from_start().unwrap();
    for _ in 0..4 {
        pm.stream_count_up();
    }
    let flags: Vec<u8> = handle
        .lock()
        .iter()
        .filter(|w| w.address == 0x10 && w.value != 0xBF)
        .map(|w| w.value)
        .collect();
    assert_eq!(flags, vec![0x01, 0x81]);
    assert_eq!(pm.opna().register(0x18), Some(0xC0 | 20));
}

#[test]
fn test_retrieval_restores_state_without_key_on() {
    let mut module = song_module(8, 6);
    let early = step(&mut module, FM1, 0, 1);
    early.note = StepNote::Note(48);
    early.instrument = Some(0);
    early.volume = Some(12);
    early.push_effect("0F", 0x04);

    let (mut pm, handle) = logged(module);
    pm.start_play_from_position(0, 5).unwrap();
    assert_eq!(pm.stream_count_up(), 0);
    assert_eq!(pm.playing_step(), Some(5));
    assert_eq!(pm.tick_counter().speed(), 4);
    assert_eq!(pm.opna().register(0x4C), Some(12));
    assert_eq!(key_on_writes(&handle), 0);
}

#[test]
fn test_retrieval_disabled_keeps_defaults() {
    let mut module = song_module(8, 6);
    let early = step(&mut module, FM1, 0, 1);
    early.instrument = Some(0);
    early.volume = Some(12);
    let (mut pm, _) = logged(module);
    pm.set_channel_retrieving(false);
    pm.start_play_from_position(0, 5).unwrap();
    pm.stream_count_up();
    assert_ne!(pm.opna().register(0x4C), Some(12));
}

// =============================================================================
// VGM export and configuration
// =============================================================================

#[test]
fn test_vgm_export_parses_back() {
    let dir = tempdir().unwrap();
    let project_path = dir.path().join("song.json");
    let output_path = dir.path().join("song.vgz");

    let mut module = song_module(4, 3);
    let first = step(&mut module, FM1, 0, 0);
    first.note = StepNote::Note(57);
    first.instrument = Some(0);
    step(&mut module, SSG1, 0, 1).note = StepNote::Note(60);
    step(&mut module, BD, 0, 2).note = StepNote::Note(0);
    step(&mut module, FM1, 0, 3).note = StepNote::KeyOff;
    Project {
        module,
        instruments: instruments(),
    }
    .save(&project_path)
    .unwrap();

    let project = Project::load(&project_path).unwrap();
    let metadata = Gd3Metadata::from_module(&project.module, 0);
    let recorder = VgmRecorder::new(7_987_200, 44100);
    let writer = recorder.writer();
    let mut pm = manager(Box::new(recorder), project.module, project.instruments);
    pm.set_song_looping(false);
    pm.start_play_from_start().unwrap();
    let frames = pm.render(44100 * 10);
    assert_eq!(frames, 12 * 735);
    writer.lock().save(&output_path, &metadata, true).unwrap();

    let data = read_vgm_file(&output_path).unwrap();
    let mut reader = VgmReader::new(&data);
    let header = reader.parse_header().unwrap();
    assert_eq!(header.ym2608.map(|c| c.clock), Some(7_987_200));
    assert_eq!(u64::from(header.total_samples), frames);

    let commands = reader.parse_commands(&header).unwrap();
    let writes: Vec<(u32, u8)> = commands.iter().filter_map(VgmCommand::ym2608_address).collect();
    assert!(writes.iter().any(|&(a, v)| a == 0x28 && v & 0xF0 != 0));
    assert!(writes.iter().any(|&(a, v)| a == 0x10 && v == 0x01));
    let a4 = pitch_fm(Note::A, 4, 0);
    assert!(writes.contains(&(0xA4, (a4 >> 8) as u8)));
    assert!(writes.contains(&(0xA0, (a4 & 0xFF) as u8)));
    let waits: u32 = commands.iter().filter_map(VgmCommand::wait_samples).sum();
    assert_eq!(u64::from(waits), frames);
    assert_eq!(commands.last(), Some(&VgmCommand::End));

    let gd3 = reader.parse_gd3(&header).unwrap().unwrap();
    assert_eq!(gd3.game, "Test module");
}

#[test]
fn test_s98_export_parses_back() {
    let dir = tempdir().unwrap();
    let output_path = dir.path().join("song.s98");

    let mut module = song_module(4, 3);
    let first = step(&mut module, FM1, 0, 0);
    first.note = StepNote::Note(57);
    first.instrument = Some(0);
    step(&mut module, FM1, 0, 3).note = StepNote::KeyOff;
    let metadata = Gd3Metadata::from_module(&module, 0);

    let recorder = S98Recorder::new(7_987_200, 44100);
    let writer = recorder.writer();
    let mut pm = manager(Box::new(recorder), module, instruments());
    pm.set_song_looping(false);
    pm.start_play_from_start().unwrap();
    let frames = pm.render(44100 * 10);
    assert_eq!(frames, 12 * 735);
    writer.lock().save(&output_path, Some(&metadata)).unwrap();

    let file = S98File::parse(&std::fs::read(&output_path).unwrap()).unwrap();
    assert_eq!(file.device_type, DEVICE_YM2608);
    assert_eq!(file.clock, 7_987_200);
    assert_eq!(file.total_syncs(), frames);
    assert_eq!(file.loop_command, None);
    assert_eq!(file.commands.last(), Some(&S98Command::End));
    let a4 = pitch_fm(Note::A, 4, 0);
    assert!(file
        .commands
        .contains(&S98Command::Write { address: 0xA4, value: (a4 >> 8) as u8 }));
    assert!(file
        .commands
        .iter()
        .any(|c| matches!(c, S98Command::Write { address: 0x28, value } if value & 0xF0 != 0)));
    assert_eq!(file.tag_value("game"), Some("Test module"));
}

#[test]
fn test_config_file_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"chip": {"rate": 0}}"#).unwrap();
    assert!(matches!(Config::load(&path), Err(Error::Config(_))));

    std::fs::write(&path, r#"{"playback": {"loop_song": false}}"#).unwrap();
    let config = Config::load(&path).unwrap();
    assert!(!config.playback.loop_song);
    assert_eq!(config.chip.rate, 44100);

    assert!(matches!(
        Config::load(&dir.path().join("missing.json")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_missing_song_rejected() {
    let (mut pm, _) = logged(song_module(4, 6));
    assert!(matches!(pm.set_song(3), Err(Error::SongNotFound(3))));
}

#[test]
fn test_start_order_outside_song_rejected() {
    let (mut pm, log) = logged(song_module(4, 6));
    assert!(matches!(
        pm.start_play_song(7),
        Err(Error::InvalidPosition { order: 7, step: 0 })
    ));
    assert!(!pm.is_play_song());
    assert_eq!(key_on_writes(&log), 0);
}
