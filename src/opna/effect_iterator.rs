//! Generators driven by pattern effects
//!
//! They follow the same cursor protocol as instrument sequences so a channel
//! can swap an effect in place of an instrument macro.

use crate::instrument::{SequenceIterator, SequenceType};
use crate::pitch::SEMINOTE_PITCH;

/// Arpeggio type value meaning "no offset"
pub const ARPEGGIO_CENTER: i32 = 48;

/// Pitch units added per tick for each note slide speed step
const NOTE_SLIDE_UNIT: i32 = 4;

/// `00xy` arpeggio: cycles base, +x and +y semitones, one per tick
#[derive(Debug, Clone)]
pub struct ArpeggioEffectIterator {
    seq: [i32; 3],
    pos: Option<usize>,
    finished: bool,
}

impl ArpeggioEffectIterator {
    pub fn new(second: i32, third: i32) -> Self {
        Self {
            seq: [
                ARPEGGIO_CENTER,
                ARPEGGIO_CENTER + second,
                ARPEGGIO_CENTER + third,
            ],
            pos: None,
            finished: false,
        }
    }
}

impl SequenceIterator for ArpeggioEffectIterator {
    fn position(&self) -> Option<usize> {
        self.pos
    }

    fn is_finished(&self) -> bool {
        self.pos.is_none() || self.finished
    }

    fn sequence_type(&self) -> SequenceType {
        SequenceType::Absolute
    }

    fn command_type(&self) -> Option<i32> {
        self.pos.map(|p| self.seq[p])
    }

    fn command_data(&self) -> Option<i32> {
        self.pos.map(|_| -1)
    }

    fn front(&mut self) -> Option<usize> {
        self.finished = false;
        self.pos = Some(0);
        self.pos
    }

    fn next(&mut self, _release_begin: bool) -> Option<usize> {
        if self.finished {
            return None;
        }
        self.pos = Some(self.pos.map_or(0, |p| (p + 1) % self.seq.len()));
        self.pos
    }

    fn end(&mut self) -> Option<usize> {
        self.finished = true;
        None
    }
}

/// Triangle LFO used by vibrato (signed) and tremolo (unipolar)
#[derive(Debug, Clone)]
pub struct WavingEffectIterator {
    seq: Vec<i32>,
    pos: Option<usize>,
    finished: bool,
}

impl WavingEffectIterator {
    /// Oscillates between `-amplitude` and `amplitude` over `4 * period` ticks
    pub fn new(period: i32, amplitude: i32) -> Self {
        let quarter = period.max(1);
        let seq = (0..quarter * 4)
            .map(|i| {
                let phase = i % (quarter * 2);
                let ramp = if phase <= quarter { phase } else { quarter * 2 - phase };
                let value = amplitude * ramp / quarter;
                if i < quarter * 2 {
                    value
                } else {
                    -value
                }
            })
            .collect();
        Self {
            seq,
            pos: None,
            finished: false,
        }
    }

    /// Oscillates between 0 and `amplitude`
    pub fn unipolar(period: i32, amplitude: i32) -> Self {
        let mut it = Self::new(period, amplitude);
        for v in &mut it.seq {
            *v = (*v + amplitude) / 2;
        }
        it
    }

    /// Current offset, 0 before the first key-on
    pub fn value(&self) -> i32 {
        self.command_type().unwrap_or(0)
    }
}

impl SequenceIterator for WavingEffectIterator {
    fn position(&self) -> Option<usize> {
        self.pos
    }

    fn is_finished(&self) -> bool {
        self.pos.is_none() || self.finished
    }

    fn sequence_type(&self) -> SequenceType {
        SequenceType::Absolute
    }

    fn command_type(&self) -> Option<i32> {
        self.pos.map(|p| self.seq[p])
    }

    fn command_data(&self) -> Option<i32> {
        self.pos.map(|_| -1)
    }

    fn front(&mut self) -> Option<usize> {
        self.finished = false;
        self.pos = Some(0);
        self.pos
    }

    fn next(&mut self, _release_begin: bool) -> Option<usize> {
        if self.finished {
            return None;
        }
        self.pos = Some(self.pos.map_or(0, |p| (p + 1) % self.seq.len()));
        self.pos
    }

    fn end(&mut self) -> Option<usize> {
        self.finished = true;
        None
    }
}

/// Note slide: yields per-tick pitch deltas until `seminote` semitones are covered
#[derive(Debug, Clone)]
pub struct NoteSlideEffectIterator {
    seq: Vec<i32>,
    pos: Option<usize>,
    finished: bool,
}

impl NoteSlideEffectIterator {
    pub fn new(speed: i32, seminote: i32) -> Self {
        let step = (speed.abs() * NOTE_SLIDE_UNIT).max(1);
        let total = seminote.abs() * SEMINOTE_PITCH;
        let sign = seminote.signum();
        let mut seq = vec![0];
        let mut covered = 0;
        while covered < total {
            let delta = step.min(total - covered);
            seq.push(delta * sign);
            covered += delta;
        }
        Self {
            seq,
            pos: None,
            finished: false,
        }
    }

    /// Sum of all deltas the slide produces
    pub fn total(&self) -> i32 {
        self.seq.iter().sum()
    }
}

impl SequenceIterator for NoteSlideEffectIterator {
    fn position(&self) -> Option<usize> {
        self.pos
    }

    fn is_finished(&self) -> bool {
        self.pos.is_none() || self.finished
    }

    fn sequence_type(&self) -> SequenceType {
        SequenceType::Relative
    }

    fn command_type(&self) -> Option<i32> {
        self.pos.map(|p| self.seq[p])
    }

    fn command_data(&self) -> Option<i32> {
        self.pos.map(|_| -1)
    }

    fn front(&mut self) -> Option<usize> {
        self.finished = false;
        self.pos = Some(0);
        self.pos
    }

    fn next(&mut self, _release_begin: bool) -> Option<usize> {
        let pos = self.pos?;
        if self.finished {
            return None;
        }
        if pos + 1 >= self.seq.len() {
            self.finished = true;
            return None;
        }
        self.pos = Some(pos + 1);
        self.pos
    }

    fn end(&mut self) -> Option<usize> {
        self.finished = true;
        None
    }
}
