//! Note to chip frequency code conversion
//!
//! Every pitch is addressed by an index into a 3072 entry table:
//! 8 octaves of 12 semitones, each split into [`SEMINOTE_PITCH`] steps.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Pitch steps per semitone
pub const SEMINOTE_PITCH: i32 = 32;

/// Number of octaves covered by the tables
pub const OCTAVE_COUNT: i32 = 8;

/// Table length
pub const PITCH_TABLE_SIZE: usize = (OCTAVE_COUNT * 12 * SEMINOTE_PITCH) as usize;

/// YM2608 master clock
pub const OPNA_CLOCK: f64 = 7_987_200.0;

/// FM section clock after the chip's /2 prescaler
const FM_CLOCK: f64 = OPNA_CLOCK / 2.0;

/// SSG section clock
const SSG_CLOCK: f64 = OPNA_CLOCK / 4.0;

/// Pitch index of A4
const A4_INDEX: i32 = (4 * 12 + 9) * SEMINOTE_PITCH;

/// Note names within an octave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Note {
    C = 0,
    CS = 1,
    D = 2,
    DS = 3,
    E = 4,
    F = 5,
    FS = 6,
    G = 7,
    GS = 8,
    A = 9,
    AS = 10,
    B = 11,
}

impl Note {
    /// Note for a semitone offset within an octave (wrapped into 0..12)
    pub fn from_index(index: i32) -> Self {
        match index.rem_euclid(12) {
            0 => Note::C,
            1 => Note::CS,
            2 => Note::D,
            3 => Note::DS,
            4 => Note::E,
            5 => Note::F,
            6 => Note::FS,
            7 => Note::G,
            8 => Note::GS,
            9 => Note::A,
            10 => Note::AS,
            _ => Note::B,
        }
    }

    pub fn index(self) -> i32 {
        self as i32
    }
}

/// Split a note number (octave * 12 + note) into octave and note
pub fn note_number_to_octave_and_note(number: i32) -> (i32, Note) {
    (number.div_euclid(12), Note::from_index(number))
}

/// Combine octave and note into a note number
pub fn octave_and_note_to_note_number(octave: i32, note: Note) -> i32 {
    octave * 12 + note.index()
}

/// Table index for a tone, clamped to the table range
pub fn calculate_pitch_index(octave: i32, note: Note, pitch: i32) -> usize {
    let index = octave_and_note_to_note_number(octave, note) * SEMINOTE_PITCH + pitch;
    index.clamp(0, PITCH_TABLE_SIZE as i32 - 1) as usize
}

struct PitchTables {
    fm: Vec<u16>,
    ssg_square: Vec<u16>,
    ssg_triangle: Vec<u16>,
    ssg_saw: Vec<u16>,
}

fn frequency(index: usize) -> f64 {
    440.0 * 2f64.powf((index as i32 - A4_INDEX) as f64 / (12 * SEMINOTE_PITCH) as f64)
}

fn tables() -> &'static PitchTables {
    static TABLES: OnceLock<PitchTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut fm = Vec::with_capacity(PITCH_TABLE_SIZE);
        let mut ssg_square = Vec::with_capacity(PITCH_TABLE_SIZE);
        let mut ssg_triangle = Vec::with_capacity(PITCH_TABLE_SIZE);
        let mut ssg_saw = Vec::with_capacity(PITCH_TABLE_SIZE);

        for index in 0..PITCH_TABLE_SIZE {
            let freq = frequency(index);

            // fnum = 144 * f * 2^20 / clock / 2^block, one block per octave
            let block = (index / (12 * SEMINOTE_PITCH as usize)).min(7) as u16;
            let fnum = (144.0 * freq * 1_048_576.0 / FM_CLOCK / f64::from(1u32 << block)).round();
            let fnum = (fnum as u16).min(0x7FF);
            fm.push((block << 11) | fnum);

            let square = (SSG_CLOCK / (16.0 * freq)).round() as u32;
            ssg_square.push(square.clamp(1, 0xFFF) as u16);

            let triangle = (SSG_CLOCK / (512.0 * freq)).round() as u32;
            ssg_triangle.push(triangle.clamp(1, 0xFFFF) as u16);

            let saw = (SSG_CLOCK / (256.0 * freq)).round() as u32;
            ssg_saw.push(saw.clamp(1, 0xFFFF) as u16);
        }

        PitchTables {
            fm,
            ssg_square,
            ssg_triangle,
            ssg_saw,
        }
    })
}

/// FM frequency code: `(block << 11) | fnum`
pub fn pitch_fm(note: Note, octave: i32, pitch: i32) -> u16 {
    tables().fm[calculate_pitch_index(octave, note, pitch)]
}

/// SSG tone period (12 bits)
pub fn pitch_ssg_square(note: Note, octave: i32, pitch: i32) -> u16 {
    tables().ssg_square[calculate_pitch_index(octave, note, pitch)]
}

/// SSG tone period by raw table index
pub fn pitch_ssg_square_raw(index: usize) -> u16 {
    tables().ssg_square[index.min(PITCH_TABLE_SIZE - 1)]
}

/// SSG hardware envelope period producing a triangle at the note's pitch
pub fn pitch_ssg_triangle(note: Note, octave: i32, pitch: i32) -> u16 {
    tables().ssg_triangle[calculate_pitch_index(octave, note, pitch)]
}

/// SSG hardware envelope period producing a saw at the note's pitch
pub fn pitch_ssg_saw(note: Note, octave: i32, pitch: i32) -> u16 {
    tables().ssg_saw[calculate_pitch_index(octave, note, pitch)]
}

/// ADPCM delta-N for a tone, relative to the sample's root key and root delta-N
pub fn delta_n_adpcm(note: Note, octave: i32, pitch: i32, root_key: i32, root_delta_n: u16) -> u16 {
    let index = calculate_pitch_index(octave, note, pitch) as i32;
    let root = (root_key * SEMINOTE_PITCH).clamp(0, PITCH_TABLE_SIZE as i32 - 1);
    let ratio = 2f64.powf((index - root) as f64 / (12 * SEMINOTE_PITCH) as f64);
    (f64::from(root_delta_n) * ratio).round().clamp(0.0, 65535.0) as u16
}
