//! Client liveness: the keepalive challenge and the timer that drives it.
//!
//! The proxy, not the backend, owns the client's keepalive. Every tick a fresh
//! random nonce is sent to the client and the reply must echo the latest one.

use std::time::Duration;

use rand::Rng;
use switchyard_net::packets::KeepAlive;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::SessionError;

/// The single outstanding keepalive nonce of a session.
#[derive(Debug, Clone, Default)]
pub struct KeepAliveChallenge {
    outstanding: Option<i64>,
}

impl KeepAliveChallenge {
    /// Create a challenge with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a new nonce, remember it, and return the packet to send.
    pub fn issue(&mut self) -> KeepAlive {
        let random_id = i64::from(rand::rng().random::<i32>());
        self.outstanding = Some(random_id);
        KeepAlive { random_id }
    }

    /// Check a client reply against the latest nonce.
    pub fn verify(&self, reply: &KeepAlive) -> Result<(), SessionError> {
        match self.outstanding {
            Some(expected) if expected == reply.random_id => Ok(()),
            expected => Err(SessionError::KeepAliveMismatch {
                expected,
                got: reply.random_id,
            }),
        }
    }

    /// Latest issued nonce, if any.
    pub fn outstanding(&self) -> Option<i64> {
        self.outstanding
    }
}

/// Timing of the keepalive cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessConfig {
    /// Delay before the first keepalive. Default: 5 s.
    pub initial_delay: Duration,
    /// Period between keepalives. Default: 15 s.
    pub interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(15),
        }
    }
}

/// Periodic keepalive timer for one session.
///
/// Polled from the session's own task, so ticks never run concurrently with
/// packet handling. Once stopped it never ticks again.
pub struct LivenessMonitor {
    interval: Option<Interval>,
}

impl LivenessMonitor {
    /// Start the timer: first tick after `initial_delay`, then every `interval`.
    pub fn start(config: &LivenessConfig) -> Self {
        let period = config.interval.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + config.initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
        }
    }

    /// Wait for the next tick. Pends forever once stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Stop and release the timer. Returns `false` if it was already stopped.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    /// Whether the timer is still running.
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }
}
