//! Pattern rows

use serde::{Deserialize, Serialize};

/// Effect columns per step
pub const EFFECT_COLUMNS: usize = 4;

/// Highest playable note number (B-7)
pub const MAX_NOTE_NUMBER: i32 = 95;

/// Echo buffer slots addressable from a step
pub const ECHO_BUFFER_DEPTH: usize = 4;

/// Note column of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepNote {
    #[default]
    None,
    /// Note number, octave * 12 + semitone
    Note(i32),
    KeyOff,
    /// Re-trigger the n-th most recent tone
    Echo(usize),
}

impl StepNote {
    pub fn is_key_on(self) -> bool {
        matches!(self, StepNote::Note(_) | StepNote::Echo(_))
    }
}

/// Effect column: two character id and an optional value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectCell {
    pub id: String,
    #[serde(default)]
    pub value: Option<u8>,
}

impl EffectCell {
    pub fn new(id: &str, value: u8) -> Self {
        Self {
            id: id.to_string(),
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    pub note: StepNote,
    pub instrument: Option<usize>,
    pub volume: Option<i32>,
    pub effects: [Option<EffectCell>; EFFECT_COLUMNS],
}

impl Step {
    pub fn with_note(note: StepNote) -> Self {
        Self {
            note,
            ..Self::default()
        }
    }

    /// Put an effect into the first free column; returns false when all are used
    pub fn push_effect(&mut self, id: &str, value: u8) -> bool {
        match self.effects.iter_mut().find(|e| e.is_none()) {
            Some(slot) => {
                *slot = Some(EffectCell::new(id, value));
                true
            }
            None => false,
        }
    }

    pub fn has_effect(&self, id: &str) -> bool {
        self.effects
            .iter()
            .flatten()
            .any(|e| e.id == id && e.value.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.note == StepNote::None
            && self.instrument.is_none()
            && self.volume.is_none()
            && self.effects.iter().all(Option::is_none)
    }
}
