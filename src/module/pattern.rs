//! Patterns of steps

use super::step::{Step, StepNote, MAX_NOTE_NUMBER};
use serde::{Deserialize, Serialize};

/// Effect ids that end a pattern early
const PATTERN_ENDING_EFFECTS: [&str; 3] = ["0B", "0C", "0D"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pattern {
    pub steps: Vec<Step>,
    /// Number of orders referring to this pattern
    #[serde(default)]
    pub used_count: usize,
}

impl Pattern {
    pub fn new(size: usize) -> Self {
        Self {
            steps: vec![Step::default(); size],
            used_count: 0,
        }
    }

    /// Playable length: stops after the first step holding a jump, end or break
    pub fn size(&self) -> usize {
        self.steps
            .iter()
            .position(|s| PATTERN_ENDING_EFFECTS.iter().any(|id| s.has_effect(id)))
            .map_or(self.steps.len(), |i| i + 1)
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    pub fn is_used(&self) -> bool {
        self.used_count > 0
    }

    /// Shift every note by `seminotes`, clamping to the playable range
    pub fn transpose(&mut self, seminotes: i32) {
        for step in &mut self.steps {
            if let StepNote::Note(n) = &mut step.note {
                *n = (*n + seminotes).clamp(0, MAX_NOTE_NUMBER);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_truncated_by_break() {
        let mut pattern = Pattern::new(16);
        assert_eq!(pattern.size(), 16);
        pattern.steps[5].push_effect("0D", 0);
        assert_eq!(pattern.size(), 6);
        pattern.steps[2].push_effect("0C", 0);
        assert_eq!(pattern.size(), 3);
    }

    #[test]
    fn test_effect_without_value_does_not_truncate() {
        let mut pattern = Pattern::new(8);
        pattern.steps[1].effects[0] = Some(super::super::step::EffectCell {
            id: "0B".into(),
            value: None,
        });
        assert_eq!(pattern.size(), 8);
    }

    #[test]
    fn test_transpose_clamps() {
        let mut pattern = Pattern::new(2);
        pattern.steps[0].note = StepNote::Note(94);
        pattern.steps[1].note = StepNote::Note(1);
        pattern.transpose(3);
        assert_eq!(pattern.steps[0].note, StepNote::Note(95));
        pattern.transpose(-10);
        assert_eq!(pattern.steps[1].note, StepNote::Note(0));
    }
}
