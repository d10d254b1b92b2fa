//! Exponential backoff for failed exports.
//!
//! The SDK drives exports from its own export thread (or the caller's thread
//! when batching is off), so backoff waits block that thread on a condvar.
//! [`RetryGate::drain`] wakes every waiter and turns later failures into
//! immediate give-ups, which keeps a shutting-down instance from sitting in
//! backoff while the drain bound runs out.

use observe_config::RetryConfig;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Retry policy plus the drain flag shared by one bundle's exporters.
#[derive(Debug, Default)]
pub struct RetryGate {
    policy: Option<RetryConfig>,
    draining: Mutex<bool>,
    wake: Condvar,
}

impl RetryGate {
    /// A gate following `config`. A disabled policy never retries.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            policy: config.enabled.then(|| config.clone()),
            ..Self::default()
        }
    }

    /// Stops all current and future backoff waits.
    pub fn drain(&self) {
        *self.draining.lock() = true;
        self.wake.notify_all();
    }

    /// Whether [`RetryGate::drain`] has been called.
    pub fn is_draining(&self) -> bool {
        *self.draining.lock()
    }

    /// Starts the schedule for one export call.
    pub(crate) fn backoff(&self) -> Backoff<'_> {
        Backoff {
            gate: self,
            next: self
                .policy
                .as_ref()
                .map_or(Duration::ZERO, |p| p.initial_interval),
            started: Instant::now(),
        }
    }

    /// Waits `delay` unless draining starts first. Returns false when
    /// draining.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut draining = self.draining.lock();
        while !*draining {
            if self.wake.wait_until(&mut draining, deadline).timed_out() {
                break;
            }
        }
        !*draining
    }
}

/// Backoff state of a single export call.
pub(crate) struct Backoff<'a> {
    gate: &'a RetryGate,
    next: Duration,
    started: Instant,
}

impl Backoff<'_> {
    /// Waits for the next attempt. Returns false when the batch should be
    /// given up: retry disabled, elapsed budget spent, or draining.
    pub(crate) fn wait(&mut self) -> bool {
        let Some(policy) = &self.gate.policy else {
            return false;
        };
        if self.started.elapsed() + self.next > policy.max_elapsed_time {
            return false;
        }

        let delay = self.next;
        self.next = (self.next * 2).min(policy.max_interval);
        self.gate.pause(delay)
    }
}
