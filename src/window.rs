// SIMPLE-THERMAL SMOOTHING WINDOW
// FIXED-CAPACITY CIRCULAR BUFFER OF RAW SAMPLES. PRE-ALLOCATED AT START,
// NO HEAP ALLOCATION PER TICK. EQUAL WEIGHTS: OLDEST AND NEWEST COUNT THE SAME.
//
// WARM-UP ENDS EXACTLY WHEN THE CURSOR WRAPS BACK TO 0 FOR THE FIRST TIME
// AFTER A RESET. UNTIL THEN THE AVERAGE IS MEANINGLESS (ZERO-FILLED SLOTS).

use std::num::NonZeroUsize;

pub const DEFAULT_WINDOW: usize = 5;
pub const MAX_WINDOW: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PushOutcome {
    // STILL FILLING. NO ZONE DECISION THIS TICK.
    WarmingUp { percent: u32 },
    // THIS PUSH COMPLETED WARM-UP
    Filled,
    Ready,
}

impl PushOutcome {
    pub fn is_ready(self) -> bool {
        !matches!(self, Self::WarmingUp { .. })
    }
}

pub struct SamplingWindow {
    samples: Box<[i32]>,
    cursor: usize,
    warming_up: bool,
}

impl SamplingWindow {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            samples: vec![0; capacity.get()].into_boxed_slice(),
            cursor: 0,
            warming_up: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_warming_up(&self) -> bool {
        self.warming_up
    }

    pub fn push(&mut self, sample: i32) -> PushOutcome {
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.samples.len();

        if !self.warming_up {
            return PushOutcome::Ready;
        }
        if self.cursor == 0 {
            self.warming_up = false;
            return PushOutcome::Filled;
        }
        PushOutcome::WarmingUp {
            percent: (self.cursor * 100 / self.samples.len()) as u32,
        }
    }

    // TRUNCATING MEAN OF ALL SLOTS. None UNTIL WARM-UP COMPLETES.
    pub fn average(&self) -> Option<i32> {
        if self.warming_up {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|&s| s as i64).sum();
        // MEAN OF i32 VALUES ALWAYS FITS IN i32
        Some((sum / self.samples.len() as i64) as i32)
    }

    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.cursor = 0;
        self.warming_up = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(n: usize) -> SamplingWindow {
        SamplingWindow::new(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn progress_reports_percent() {
        let mut w = window(4);
        assert_eq!(w.push(1), PushOutcome::WarmingUp { percent: 25 });
        assert_eq!(w.push(1), PushOutcome::WarmingUp { percent: 50 });
        assert_eq!(w.push(1), PushOutcome::WarmingUp { percent: 75 });
        assert_eq!(w.push(1), PushOutcome::Filled);
        assert_eq!(w.push(1), PushOutcome::Ready);
    }

    #[test]
    fn capacity_one_fills_on_first_push() {
        let mut w = window(1);
        assert_eq!(w.push(-7), PushOutcome::Filled);
        assert_eq!(w.average(), Some(-7));
    }

    #[test]
    fn negative_mean_truncates_toward_zero() {
        let mut w = window(2);
        w.push(-3);
        w.push(-4);
        assert_eq!(w.average(), Some(-3));
    }

    #[test]
    fn extreme_samples_do_not_overflow() {
        let mut w = window(3);
        for _ in 0..3 {
            w.push(i32::MAX);
        }
        assert_eq!(w.average(), Some(i32::MAX));
    }

    #[test]
    fn reset_clears_state() {
        let mut w = window(2);
        w.push(10);
        w.push(20);
        assert!(!w.is_warming_up());
        w.reset();
        assert!(w.is_warming_up());
        assert_eq!(w.cursor(), 0);
        assert_eq!(w.average(), None);
    }
}
