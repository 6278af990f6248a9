//! Step timing
//!
//! The tempo sets how often the driver ticks; speed or a groove sets how
//! many ticks make one step.

/// Tick rate in Hz for a tempo (150 gives 60 Hz)
pub fn tempo_to_interrupt_rate(tempo: u32) -> f64 {
    f64::from(tempo) * 2.0 / 5.0
}

#[derive(Debug, Clone)]
pub struct TickCounter {
    tempo: u32,
    speed: u32,
    groove: Option<Vec<u32>>,
    groove_pos: usize,
    /// Ticks left before the next step head
    rest: u32,
    /// The last `count_up` was a step head
    at_head: bool,
    is_playing: bool,
}

impl TickCounter {
    pub fn new() -> Self {
        Self {
            tempo: 150,
            speed: 6,
            groove: None,
            groove_pos: 0,
            rest: 0,
            at_head: false,
            is_playing: false,
        }
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn interrupt_rate(&self) -> f64 {
        tempo_to_interrupt_rate(self.tempo)
    }

    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.max(1);
    }

    /// Fixed ticks per step; disables any groove
    pub fn set_speed(&mut self, speed: u32) {
        self.speed = speed.max(1);
        self.groove = None;
        if self.at_head {
            self.rest = self.speed - 1;
        }
    }

    /// Ticks per step taken in turn from `groove`
    pub fn set_groove(&mut self, groove: &[u32]) {
        if groove.is_empty() {
            return;
        }
        self.groove = Some(groove.iter().map(|&t| t.max(1)).collect());
        self.groove_pos = 0;
        if self.at_head {
            self.rest = self.next_step_ticks() - 1;
        }
    }

    pub fn is_groove(&self) -> bool {
        self.groove.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn set_play_state(&mut self, is_playing: bool) {
        self.is_playing = is_playing;
    }

    /// Restart counting so the next tick is a step head
    pub fn reset_count(&mut self) {
        self.rest = 0;
        self.at_head = false;
        self.groove_pos = 0;
    }

    fn next_step_ticks(&mut self) -> u32 {
        match &self.groove {
            Some(g) => {
                let ticks = g[self.groove_pos % g.len()];
                self.groove_pos = (self.groove_pos + 1) % g.len();
                ticks
            }
            None => self.speed,
        }
    }

    /// Advance one tick
    ///
    /// Returns -1 when stopped, 0 at a step head, otherwise the number of
    /// ticks left before the next head.
    pub fn count_up(&mut self) -> i32 {
        if !self.is_playing {
            return -1;
        }
        let ret = self.rest as i32;
        self.at_head = self.rest == 0;
        if self.at_head {
            self.rest = self.next_step_ticks();
        }
        self.rest -= 1;
        ret
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(counter: &mut TickCounter, n: usize) -> Vec<i32> {
        (0..n).map(|_| counter.count_up()).collect()
    }

    #[test]
    fn test_stopped_returns_minus_one() {
        let mut counter = TickCounter::new();
        assert_eq!(counter.count_up(), -1);
    }

    #[test]
    fn test_speed_sets_step_length() {
        let mut counter = TickCounter::new();
        counter.set_speed(3);
        counter.set_play_state(true);
        assert_eq!(run(&mut counter, 7), vec![0, 2, 1, 0, 2, 1, 0]);
    }

    #[test]
    fn test_speed_change_at_head_applies_to_current_step() {
        let mut counter = TickCounter::new();
        counter.set_play_state(true);
        assert_eq!(counter.count_up(), 0);
        counter.set_speed(2);
        assert_eq!(run(&mut counter, 3), vec![1, 0, 1]);
    }

    #[test]
    fn test_groove_alternates() {
        let mut counter = TickCounter::new();
        counter.set_groove(&[2, 3]);
        counter.set_play_state(true);
        assert_eq!(run(&mut counter, 6), vec![0, 1, 0, 2, 1, 0]);
        assert!(counter.is_groove());
        counter.set_speed(4);
        assert!(!counter.is_groove());
    }

    #[test]
    fn test_interrupt_rate() {
        assert_eq!(tempo_to_interrupt_rate(150), 60.0);
        let mut counter = TickCounter::new();
        counter.set_tempo(120);
        assert_eq!(counter.interrupt_rate(), 48.0);
    }
}
