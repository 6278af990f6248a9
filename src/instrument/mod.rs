//! Instruments and their shared properties
//!
//! Instruments only name the properties they use by index; the properties
//! themselves (envelopes, LFOs, sequences, samples) live in pools owned by
//! [`InstrumentsManager`] and are shared between instruments.

pub mod command_sequence;
pub mod envelope_fm;
pub mod manager;

pub use command_sequence::{
    CommandSequence, CommandSequenceUnit, DataType, Loop, Release, ReleaseType, SequenceCursor,
    SequenceIterator, SequenceType,
};
pub use envelope_fm::{EnvelopeFm, FmEnvelopeParameter, FmOperator, FmOperatorParameter};
pub use manager::{AdpcmPatch, FmPatch, InstrumentsManager, SsgPatch};

use serde::{Deserialize, Serialize};

/// FM hardware LFO settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoFm {
    pub index: usize,
    /// LFO frequency 0-7
    pub freq: u8,
    /// Phase modulation sensitivity 0-7
    pub pms: u8,
    /// Amplitude modulation sensitivity 0-3
    pub ams: u8,
    /// Amplitude modulation enable per operator
    pub am: [bool; 4],
    /// Ticks after key-on before the LFO starts
    pub count: u32,
}

/// ADPCM sample with its pitch reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdpcmSample {
    #[serde(default)]
    pub index: usize,
    /// Note number played back at `root_delta_n`
    #[serde(default = "default_root_key")]
    pub root_key: i32,
    #[serde(default = "default_root_delta_n")]
    pub root_delta_n: u16,
    #[serde(default)]
    pub repeat: bool,
    /// Encoded YM2608 ADPCM data
    pub data: Vec<u8>,
}

fn default_root_key() -> i32 {
    60
}

fn default_root_delta_n() -> u16 {
    0x49CD
}

/// Reference from an FM instrument to an operator sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSequenceRef {
    pub parameter: FmEnvelopeParameter,
    pub sequence: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFm {
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub name: String,
    pub envelope: usize,
    #[serde(default)]
    pub lfo: Option<usize>,
    #[serde(default)]
    pub operator_sequences: Vec<OperatorSequenceRef>,
    #[serde(default)]
    pub arpeggio: Option<usize>,
    #[serde(default)]
    pub pitch: Option<usize>,
    /// Restart the envelope from silence on every key-on
    #[serde(default)]
    pub envelope_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSsg {
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub waveform: Option<usize>,
    #[serde(default)]
    pub tone_noise: Option<usize>,
    #[serde(default)]
    pub envelope: Option<usize>,
    #[serde(default)]
    pub arpeggio: Option<usize>,
    #[serde(default)]
    pub pitch: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAdpcm {
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub name: String,
    pub sample: usize,
    #[serde(default)]
    pub envelope: Option<usize>,
    #[serde(default)]
    pub arpeggio: Option<usize>,
    #[serde(default)]
    pub pitch: Option<usize>,
}

/// An instrument of any sound source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Instrument {
    Fm(InstrumentFm),
    Ssg(InstrumentSsg),
    Adpcm(InstrumentAdpcm),
}

impl Instrument {
    pub fn number(&self) -> usize {
        match self {
            Instrument::Fm(i) => i.number,
            Instrument::Ssg(i) => i.number,
            Instrument::Adpcm(i) => i.number,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Instrument::Fm(i) => &i.name,
            Instrument::Ssg(i) => &i.name,
            Instrument::Adpcm(i) => &i.name,
        }
    }

    fn set_number(&mut self, number: usize) {
        match self {
            Instrument::Fm(i) => i.number = number,
            Instrument::Ssg(i) => i.number = number,
            Instrument::Adpcm(i) => i.number = number,
        }
    }
}
