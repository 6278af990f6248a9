//! Tracks: one channel's order list and pattern pool

use super::pattern::Pattern;
use super::step::Step;
use super::SoundSource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAttribute {
    pub number: usize,
    pub source: SoundSource,
    pub channel_in_source: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub attribute: TrackAttribute,
    /// Pattern index per order
    pub orders: Vec<usize>,
    pub patterns: Vec<Pattern>,
}

impl Track {
    /// Track with a single order pointing at an empty pattern
    pub fn new(attribute: TrackAttribute, pattern_size: usize) -> Self {
        let mut pattern = Pattern::new(pattern_size);
        pattern.used_count = 1;
        Self {
            attribute,
            orders: vec![0],
            patterns: vec![pattern],
        }
    }

    pub fn pattern_from_order(&self, order: usize) -> Option<&Pattern> {
        self.orders.get(order).and_then(|&p| self.patterns.get(p))
    }

    pub fn pattern_from_order_mut(&mut self, order: usize) -> Option<&mut Pattern> {
        let index = *self.orders.get(order)?;
        self.patterns.get_mut(index)
    }

    pub fn step(&self, order: usize, step: usize) -> Option<&Step> {
        self.pattern_from_order(order)?.step(step)
    }

    /// Append an order using `pattern`, growing the pool when needed
    pub fn push_order(&mut self, pattern: usize, pattern_size: usize) {
        while self.patterns.len() <= pattern {
            self.patterns.push(Pattern::new(pattern_size));
        }
        self.patterns[pattern].used_count += 1;
        self.orders.push(pattern);
    }
}
