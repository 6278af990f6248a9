//! Instrument macro sequences
//!
//! A [`CommandSequence`] is an ordered list of units with optional nested loops
//! and a release point. Playback never walks the sequence directly; each
//! sounding channel owns a [`SequenceCursor`] over an `Arc` snapshot so many
//! channels can iterate one instrument's sequence independently.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the data word of a unit is to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    NoData,
    Raw,
    Ratio,
    RightShift,
    LeftShift,
}

const RATIO_FLAG: i32 = 0x10000;
const SHIFT_FLAG: i32 = 0x20000;

/// Decode the type tag carried in bits 16 and 17 of a data word
pub fn check_data_type(data: i32) -> DataType {
    if data < 0 {
        DataType::NoData
    } else if data & SHIFT_FLAG != 0 {
        if data & RATIO_FLAG != 0 {
            DataType::LeftShift
        } else {
            DataType::RightShift
        }
    } else if data & RATIO_FLAG != 0 {
        DataType::Ratio
    } else {
        DataType::Raw
    }
}

/// Pack a ratio `first:second` (each 0-255)
pub fn ratio2data(first: i32, second: i32) -> i32 {
    RATIO_FLAG | ((first & 0xFF) << 8) | (second & 0xFF)
}

/// Unpack a ratio word
pub fn data2ratio(data: i32) -> (i32, i32) {
    ((data & 0xFF00) >> 8, data & 0xFF)
}

/// Pack a signed shift amount; positive shifts right, negative shifts left
pub fn shift2data(shift: i32) -> i32 {
    if shift > 0 {
        SHIFT_FLAG | (shift & 0xFFFF)
    } else {
        SHIFT_FLAG | RATIO_FLAG | (-shift & 0xFFFF)
    }
}

/// Unpack the magnitude of a shift word; its direction is given by [`check_data_type`]
pub fn data2shift(data: i32) -> i32 {
    data & 0xFFFF
}

/// Value written at each sequence position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSequenceUnit {
    #[serde(rename = "type")]
    pub ty: i32,
    #[serde(default = "no_data")]
    pub data: i32,
}

fn no_data() -> i32 {
    -1
}

impl CommandSequenceUnit {
    pub fn new(ty: i32, data: i32) -> Self {
        Self { ty, data }
    }

    pub fn data_type(&self) -> DataType {
        check_data_type(self.data)
    }
}

/// How a sequence's type values relate to the note or register they drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    #[default]
    Absolute,
    Fixed,
    Relative,
}

/// Inclusive loop range repeated `times` times (0 repeats forever)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    pub begin: usize,
    pub end: usize,
    pub times: u32,
}

/// Where iteration continues once the key is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    #[default]
    NoRelease,
    Fixed,
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Release {
    #[serde(rename = "type")]
    pub ty: ReleaseType,
    pub begin: usize,
}

/// Instrument macro: units, loops and release point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSequence {
    #[serde(default)]
    pub index: usize,
    #[serde(default, rename = "type")]
    pub ty: SequenceType,
    pub units: Vec<CommandSequenceUnit>,
    #[serde(default)]
    loops: Vec<Loop>,
    #[serde(default)]
    release: Release,
}

impl CommandSequence {
    /// Create a sequence holding a single default unit
    pub fn new(index: usize, ty: SequenceType, default_type: i32, default_data: i32) -> Self {
        Self {
            index,
            ty,
            units: vec![CommandSequenceUnit::new(default_type, default_data)],
            loops: Vec::new(),
            release: Release::default(),
        }
    }

    pub fn from_units(index: usize, ty: SequenceType, units: Vec<CommandSequenceUnit>) -> Self {
        Self {
            index,
            ty,
            units,
            loops: Vec::new(),
            release: Release::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, pos: usize) -> Option<&CommandSequenceUnit> {
        self.units.get(pos)
    }

    pub fn add_sequence_command(&mut self, ty: i32, data: i32) {
        self.units.push(CommandSequenceUnit::new(ty, data));
    }

    /// Remove the last unit; loops and release past the new end are dropped
    pub fn remove_sequence_command(&mut self) {
        if self.units.pop().is_some() {
            let len = self.units.len();
            self.loops.retain(|l| l.end < len);
            if self.release.begin >= len {
                self.release = Release::default();
            }
        }
    }

    pub fn set_sequence_command(&mut self, pos: usize, ty: i32, data: i32) {
        if let Some(unit) = self.units.get_mut(pos) {
            *unit = CommandSequenceUnit::new(ty, data);
        }
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Replace every loop at once from parallel begin/end/times arrays
    pub fn set_loops(&mut self, begins: &[usize], ends: &[usize], times: &[u32]) -> Result<()> {
        if begins.len() != ends.len() || ends.len() != times.len() {
            return Err(Error::LoopMismatch {
                begins: begins.len(),
                ends: ends.len(),
                times: times.len(),
            });
        }
        let mut loops: Vec<Loop> = begins
            .iter()
            .zip(ends)
            .zip(times)
            .map(|((&begin, &end), &times)| Loop { begin, end, times })
            .collect();
        loops.sort_by(|a, b| a.begin.cmp(&b.begin).then(b.end.cmp(&a.end)));
        self.loops = loops;
        Ok(())
    }

    pub fn release(&self) -> Release {
        self.release
    }

    pub fn set_release(&mut self, ty: ReleaseType, begin: usize) {
        self.release = Release { ty, begin };
    }

    /// Release point, if one is set inside the sequence
    pub fn release_begin(&self) -> Option<usize> {
        match self.release.ty {
            ReleaseType::NoRelease => None,
            _ if self.release.begin < self.units.len() => Some(self.release.begin),
            _ => None,
        }
    }
}

/// Cursor protocol shared by instrument sequences and effect generators
///
/// `front` and `next` return the new position when a value should be
/// (re)applied, and `None` when nothing changed this tick.
pub trait SequenceIterator: Send {
    fn position(&self) -> Option<usize>;
    /// True once the cursor can no longer progress
    fn is_finished(&self) -> bool;
    fn sequence_type(&self) -> SequenceType;
    fn command_type(&self) -> Option<i32>;
    fn command_data(&self) -> Option<i32>;
    fn front(&mut self) -> Option<usize>;
    fn next(&mut self, release_begin: bool) -> Option<usize>;
    fn end(&mut self) -> Option<usize>;
}

#[derive(Debug, Clone, Copy)]
struct ActiveLoop {
    begin: usize,
    end: usize,
    /// Passes left including the current one; `None` loops forever
    remaining: Option<u32>,
}

/// Independent read cursor over a shared sequence
#[derive(Debug, Clone)]
pub struct SequenceCursor {
    seq: Arc<CommandSequence>,
    pos: Option<usize>,
    started: bool,
    finished: bool,
    loop_stack: Vec<ActiveLoop>,
    is_release: bool,
    rel_release_ratio: f32,
}

impl SequenceCursor {
    pub fn new(seq: Arc<CommandSequence>) -> Self {
        Self {
            seq,
            pos: None,
            started: false,
            finished: false,
            loop_stack: Vec::new(),
            is_release: false,
            rel_release_ratio: 1.0,
        }
    }

    pub fn sequence(&self) -> &Arc<CommandSequence> {
        &self.seq
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_release(&self) -> bool {
        self.is_release
    }

    fn enter_loops_at(&mut self, pos: usize) {
        if self.is_release {
            return;
        }
        // Loops are sorted outer-first, so the innermost ends up on top
        for l in self.seq.loops.iter().filter(|l| l.begin == pos && l.end >= l.begin) {
            self.loop_stack.push(ActiveLoop {
                begin: l.begin,
                end: l.end,
                remaining: if l.times == 0 { None } else { Some(l.times) },
            });
        }
    }

    fn re_enter_inner_loops(&mut self, outer: ActiveLoop) {
        for l in self.seq.loops.iter().filter(|l| {
            l.begin == outer.begin && l.end < outer.end && l.end >= l.begin
        }) {
            self.loop_stack.push(ActiveLoop {
                begin: l.begin,
                end: l.end,
                remaining: if l.times == 0 { None } else { Some(l.times) },
            });
        }
    }

    fn advance(&mut self, pos: usize) -> Option<usize> {
        while let Some(top) = self.loop_stack.last().copied() {
            if top.end < pos {
                self.loop_stack.pop();
                continue;
            }
            if top.end != pos {
                break;
            }
            let repeat = match top.remaining {
                None => true,
                Some(n) => n > 1,
            };
            if repeat {
                if let Some(last) = self.loop_stack.last_mut() {
                    last.remaining = top.remaining.map(|n| n - 1);
                }
                self.pos = Some(top.begin);
                self.re_enter_inner_loops(top);
                return self.pos;
            }
            self.loop_stack.pop();
        }

        let next = pos + 1;
        if !self.is_release && self.seq.release_begin() == Some(next) {
            // Sustain until key-off
            return None;
        }
        if next >= self.seq.len() {
            self.finished = true;
            return None;
        }
        self.pos = Some(next);
        self.enter_loops_at(next);
        self.pos
    }

    fn begin_release(&mut self, pos: usize) -> Option<usize> {
        let Some(begin) = self.seq.release_begin() else {
            return self.advance(pos);
        };
        let current = self.seq.units[pos].ty;
        self.loop_stack.clear();
        self.is_release = true;
        self.finished = false;

        match self.seq.release.ty {
            ReleaseType::NoRelease => self.advance(pos),
            ReleaseType::Fixed => {
                self.pos = Some(begin);
                self.pos
            }
            ReleaseType::Absolute => {
                match (begin..self.seq.len()).find(|&i| self.seq.units[i].ty <= current) {
                    Some(i) => {
                        self.pos = Some(i);
                        self.pos
                    }
                    None => {
                        self.finished = true;
                        None
                    }
                }
            }
            ReleaseType::Relative => {
                let at_release = self.seq.units[begin].ty;
                self.rel_release_ratio = if at_release == 0 {
                    1.0
                } else {
                    current as f32 / at_release as f32
                };
                self.pos = Some(begin);
                self.pos
            }
        }
    }
}

impl SequenceIterator for SequenceCursor {
    fn position(&self) -> Option<usize> {
        self.pos
    }

    fn is_finished(&self) -> bool {
        !self.started || self.finished
    }

    fn sequence_type(&self) -> SequenceType {
        self.seq.ty
    }

    fn command_type(&self) -> Option<i32> {
        let unit = self.seq.unit(self.pos?)?;
        if self.is_release && self.seq.release.ty == ReleaseType::Relative {
            Some((unit.ty as f32 * self.rel_release_ratio).round() as i32)
        } else {
            Some(unit.ty)
        }
    }

    fn command_data(&self) -> Option<i32> {
        self.seq.unit(self.pos?).map(|u| u.data)
    }

    fn front(&mut self) -> Option<usize> {
        self.loop_stack.clear();
        self.is_release = false;
        self.rel_release_ratio = 1.0;
        self.finished = false;
        self.started = true;
        if self.seq.is_empty() {
            self.pos = None;
            self.finished = true;
            return None;
        }
        self.pos = Some(0);
        self.enter_loops_at(0);
        self.pos
    }

    fn next(&mut self, release_begin: bool) -> Option<usize> {
        if !self.started || self.finished && !release_begin {
            return None;
        }
        let pos = self.pos?;
        if release_begin && !self.is_release {
            self.begin_release(pos)
        } else if self.finished {
            None
        } else {
            self.advance(pos)
        }
    }

    fn end(&mut self) -> Option<usize> {
        self.finished = true;
        self.loop_stack.clear();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_of(types: &[i32]) -> CommandSequence {
        CommandSequence::from_units(
            0,
            SequenceType::Absolute,
            types.iter().map(|&t| CommandSequenceUnit::new(t, -1)).collect(),
        )
    }

    /// Count `next(false)` calls from `front` until the cursor reports the end
    fn advances_to_end(seq: CommandSequence) -> usize {
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        let mut count = 0;
        loop {
            count += 1;
            if cursor.next(false).is_none() {
                return count;
            }
            assert!(count < 10_000, "sequence never ended");
        }
    }

    #[test]
    fn test_data_type_tags() {
        assert_eq!(check_data_type(-1), DataType::NoData);
        assert_eq!(check_data_type(42), DataType::Raw);
        assert_eq!(check_data_type(ratio2data(1, 2)), DataType::Ratio);
        assert_eq!(check_data_type(shift2data(3)), DataType::RightShift);
        assert_eq!(check_data_type(shift2data(-3)), DataType::LeftShift);
    }

    #[test]
    fn test_ratio_packing() {
        for a in 0..=255 {
            for b in [0, 1, 127, 128, 255] {
                assert_eq!(data2ratio(ratio2data(a, b)), (a, b));
            }
        }
    }

    #[test]
    fn test_shift_packing() {
        for r in [-65535, -256, -1, 1, 7, 65535] {
            let data = shift2data(r);
            assert_eq!(data2shift(data), r.abs());
            let is_left = check_data_type(data) == DataType::LeftShift;
            assert_eq!(is_left, r < 0);
        }
    }

    #[test]
    fn test_no_loop_runs_to_end() {
        assert_eq!(advances_to_end(seq_of(&[1, 2, 3, 4])), 4);
    }

    #[test]
    fn test_loop_count_formula() {
        let len = 6;
        for (end, times) in [(0usize, 1u32), (2, 2), (3, 3), (5, 4)] {
            let mut seq = seq_of(&vec![0; len]);
            seq.set_loops(&[0], &[end], &[times]).unwrap();
            let expected = (end + 1) * times as usize + (len - end - 1);
            assert_eq!(advances_to_end(seq), expected, "loop [0,{}] x{}", end, times);
        }
    }

    #[test]
    fn test_loop_with_offset_begin() {
        let mut seq = seq_of(&[0; 8]);
        seq.set_loops(&[2], &[4], &[3]).unwrap();
        // 2 lead-in positions, 3 passes of the loop, 3 trailing positions
        assert_eq!(advances_to_end(seq), 2 + 3 * 3 + 3);
    }

    #[test]
    fn test_nested_loops() {
        let mut seq = seq_of(&[0, 1, 2, 3]);
        seq.set_loops(&[0, 1], &[3, 2], &[2, 2]).unwrap();
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        let mut visited = vec![cursor.front().unwrap()];
        while let Some(p) = cursor.next(false) {
            visited.push(p);
        }
        assert_eq!(visited, vec![0, 1, 2, 1, 2, 3, 0, 1, 2, 1, 2, 3]);
    }

    #[test]
    fn test_infinite_loop() {
        let mut seq = seq_of(&[5, 6]);
        seq.set_loops(&[0], &[1], &[0]).unwrap();
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        for _ in 0..100 {
            assert!(cursor.next(false).is_some());
        }
        assert!(!cursor.is_finished());
    }

    #[test]
    fn test_set_loops_mismatch() {
        let mut seq = seq_of(&[0, 1]);
        let err = seq.set_loops(&[0], &[1, 1], &[1]).unwrap_err();
        assert!(matches!(err, Error::LoopMismatch { begins: 1, ends: 2, times: 1 }));
    }

    #[test]
    fn test_sustain_at_release_point() {
        let mut seq = seq_of(&[15, 14, 13, 8, 4, 0]);
        seq.set_release(ReleaseType::Fixed, 3);
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        assert_eq!(cursor.next(false), Some(1));
        assert_eq!(cursor.next(false), Some(2));
        assert_eq!(cursor.next(false), None);
        assert_eq!(cursor.position(), Some(2));
        assert_eq!(cursor.command_type(), Some(13));
    }

    #[test]
    fn test_fixed_release_continues_forward() {
        let mut seq = seq_of(&[15, 14, 13, 8, 4, 0]);
        seq.set_release(ReleaseType::Fixed, 3);
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        cursor.next(false);
        let before = cursor.position().unwrap();
        assert_eq!(cursor.next(true), Some(3));
        let mut last = cursor.position().unwrap();
        assert!(last >= before);
        while let Some(p) = cursor.next(false) {
            assert!(p > last);
            last = p;
        }
        assert_eq!(last, 5);
        assert!(cursor.is_finished());
        assert_eq!(cursor.command_type(), Some(0));
    }

    #[test]
    fn test_absolute_release_finds_lower_value() {
        let mut seq = seq_of(&[10, 6, 9, 7, 5, 2]);
        seq.set_release(ReleaseType::Absolute, 2);
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        cursor.next(false);
        // Current value 6: first release position with type <= 6 is index 4
        assert_eq!(cursor.next(true), Some(4));
    }

    #[test]
    fn test_relative_release_scales_types() {
        let mut seq = seq_of(&[8, 8, 16, 8, 4]);
        seq.set_release(ReleaseType::Relative, 2);
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        assert_eq!(cursor.next(true), Some(2));
        assert_eq!(cursor.command_type(), Some(8));
        assert_eq!(cursor.next(false), Some(3));
        assert_eq!(cursor.command_type(), Some(4));
        assert_eq!(cursor.next(false), Some(4));
        assert_eq!(cursor.command_type(), Some(2));
    }

    #[test]
    fn test_loops_ignored_after_release() {
        let mut seq = seq_of(&[1, 2, 3, 4]);
        seq.set_loops(&[2], &[3], &[0]).unwrap();
        seq.set_release(ReleaseType::Fixed, 2);
        let mut cursor = SequenceCursor::new(Arc::new(seq));
        cursor.front();
        assert_eq!(cursor.next(true), Some(2));
        assert_eq!(cursor.next(false), Some(3));
        assert_eq!(cursor.next(false), None);
        assert!(cursor.is_finished());
    }

    #[test]
    fn test_end_freezes_position() {
        let mut cursor = SequenceCursor::new(Arc::new(seq_of(&[3, 2, 1])));
        cursor.front();
        cursor.next(false);
        assert_eq!(cursor.end(), None);
        assert_eq!(cursor.next(false), None);
        assert_eq!(cursor.position(), Some(1));
        assert_eq!(cursor.command_type(), Some(2));
    }

    #[test]
    fn test_independent_cursors_share_sequence() {
        let seq = Arc::new(seq_of(&[1, 2, 3]));
        let mut a = SequenceCursor::new(Arc::clone(&seq));
        let mut b = SequenceCursor::new(Arc::clone(&seq));
        a.front();
        b.front();
        a.next(false);
        a.next(false);
        assert_eq!(a.command_type(), Some(3));
        assert_eq!(b.command_type(), Some(1));
    }

    #[test]
    fn test_remove_drops_stale_release() {
        let mut seq = seq_of(&[1, 2, 3]);
        seq.set_release(ReleaseType::Fixed, 2);
        seq.remove_sequence_command();
        assert_eq!(seq.release_begin(), None);
        assert_eq!(seq.len(), 2);
    }
}
