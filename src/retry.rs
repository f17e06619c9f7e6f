// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for the Concurrency Arbiter's bounded conflict
//! retries.
//!
//! Adapted from the Kubernetes-API retry helper this codebase used to carry:
//! same shape (`ExponentialBackoff`, jittered `next_backoff`), but retuned
//! to the arbiter's much smaller budget — roughly ten attempts or one
//! second total, rather than the original five-minute API budget.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::constants::{
    ARBITER_BACKOFF_MULTIPLIER, ARBITER_INITIAL_INTERVAL, ARBITER_MAX_ATTEMPTS,
    ARBITER_MAX_ELAPSED, ARBITER_RANDOMIZATION_FACTOR,
};

/// Bounded, jittered exponential backoff used between Arbiter retry
/// attempts.
pub struct ExponentialBackoff {
    current_interval: Duration,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
    multiplier: f64,
    randomization_factor: f64,
    start_time: Instant,
    attempts: u32,
    max_attempts: u32,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
            attempts: 0,
            max_attempts,
        }
    }

    /// Next backoff interval, or `None` if the attempt or elapsed-time
    /// budget is exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        self.attempts += 1;
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Number of attempts consumed so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }
        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = (secs - delta).max(0.0);
        let max = secs + delta;
        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// The backoff configuration used by [`crate::arbiter`] for every
/// conditional write.
#[must_use]
pub fn arbiter_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        ARBITER_INITIAL_INTERVAL,
        ARBITER_MAX_ELAPSED,
        Some(ARBITER_MAX_ELAPSED),
        ARBITER_BACKOFF_MULTIPLIER,
        ARBITER_RANDOMIZATION_FACTOR,
        ARBITER_MAX_ATTEMPTS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_max_attempts() {
        let mut backoff = arbiter_backoff();
        let mut count = 0;
        while backoff.next_backoff().is_some() {
            count += 1;
        }
        assert_eq!(count, ARBITER_MAX_ATTEMPTS);
    }

    #[test]
    fn interval_grows_but_is_capped() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            None,
            2.0,
            0.0,
            20,
        );
        let first = backoff.next_backoff().unwrap();
        let second = backoff.next_backoff().unwrap();
        assert!(second >= first);
        for _ in 0..10 {
            let _ = backoff.next_backoff();
        }
        let later = backoff.next_backoff().unwrap();
        assert!(later <= Duration::from_millis(50));
    }
}
