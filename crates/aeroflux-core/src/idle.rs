//! Backoff idle strategy used by the event loop between ticks that did no
//! work. Spin briefly, then yield the OS thread, then park with an
//! exponentially growing (capped) sleep -- the latency/CPU knob called out in
//! the design notes.

use std::thread;
use std::time::Duration;

const SPIN_TRIES: u32 = 100;
const YIELD_TRIES: u32 = 200;
const MIN_PARK: Duration = Duration::from_micros(1);
const MAX_PARK: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct BackoffIdleStrategy {
    attempts: u32,
    park_duration: Duration,
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self {
            attempts: 0,
            park_duration: MIN_PARK,
        }
    }
}

impl BackoffIdleStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per tick. Pass `true` when the tick drained at least one
    /// command, fragment or send-queue item; the strategy resets immediately
    /// so busy periods never pay spin/yield/park overhead.
    pub fn idle(&mut self, work_done: bool) {
        if work_done {
            self.reset();
            return;
        }

        if self.attempts < SPIN_TRIES {
            self.attempts += 1;
            thread::yield_now();
            return;
        }

        if self.attempts < SPIN_TRIES + YIELD_TRIES {
            self.attempts += 1;
            thread::yield_now();
            return;
        }

        thread::park_timeout(self.park_duration);
        self.park_duration = (self.park_duration * 2).min(MAX_PARK);
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.park_duration = MIN_PARK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_on_work() {
        let mut idle = BackoffIdleStrategy::new();
        for _ in 0..SPIN_TRIES + 5 {
            idle.idle(false);
        }
        assert!(idle.attempts > 0);
        idle.idle(true);
        assert_eq!(idle.attempts, 0);
        assert_eq!(idle.park_duration, MIN_PARK);
    }
}
