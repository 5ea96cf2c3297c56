//! Bounded exponential backoff for transport reconnects.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a hard cap and ±20% jitter.
///
/// Each call to [`next_delay`](Backoff::next_delay) returns the current delay
/// (jittered) and doubles the stored delay up to the cap. `reset` is called
/// after a successful resubscribe so a later outage starts from the base
/// delay again.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.min(cap);
        Self { base, cap, next: base }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.cap);
        jitter(delay)
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}
