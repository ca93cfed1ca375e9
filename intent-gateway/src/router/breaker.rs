//! Circuit breaker around the forward path. Transitions are serialized
//! behind one mutex; HALF_OPEN admits exactly one probe.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::config::router::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { probe: bool },
    Rejected { retry_after: Duration },
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    #[must_use]
    pub fn admit(&self) -> Admission {
        let mut state = self.state.lock().expect("breaker lock never poisoned");
        match state.circuit {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= self.config.reset_timeout {
                    tracing::info!("circuit transitioning to half-open");
                    state.circuit = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        retry_after: self.config.reset_timeout - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Admission::Rejected {
                        retry_after: self.config.reset_timeout,
                    }
                } else {
                    state.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    pub fn record(&self, success: bool) {
        let mut state = self.state.lock().expect("breaker lock never poisoned");
        match state.circuit {
            CircuitState::HalfOpen => {
                state.probe_in_flight = false;
                if success {
                    tracing::info!("probe succeeded, closing circuit");
                    state.circuit = CircuitState::Closed;
                    state.window.clear();
                    state.opened_at = None;
                } else {
                    tracing::warn!("probe failed, reopening circuit");
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Closed => {
                state.window.push_back(success);
                while state.window.len() > self.config.window_size {
                    state.window.pop_front();
                }
                if !success && self.should_open(&state) {
                    tracing::warn!(
                        window = state.window.len(),
                        "error threshold reached, opening circuit"
                    );
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            // Late completion of a call admitted before the trip.
            CircuitState::Open => {}
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
            .lock()
            .expect("breaker lock never poisoned")
            .circuit
    }

    fn should_open(&self, state: &BreakerState) -> bool {
        if state.window.len() < self.config.minimum_requests {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let failures = state
            .window
            .iter()
            .filter(|success| !**success)
            .count() as f64;
        #[allow(clippy::cast_precision_loss)]
        let total = state.window.len() as f64;
        failures / total * 100.0
            >= f64::from(self.config.error_threshold_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(reset: Duration) -> BreakerConfig {
        BreakerConfig {
            error_threshold_percent: 50,
            call_timeout: Duration::from_secs(30),
            reset_timeout: reset,
            window_size: 10,
            minimum_requests: 3,
        }
    }

    #[test]
    fn stays_closed_under_the_minimum() {
        let breaker = CircuitBreaker::new(config(Duration::from_secs(30)));
        breaker.record(false);
        breaker.record(false);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_the_error_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(config(Duration::from_secs(30)));
        for _ in 0..5 {
            breaker.record(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.admit(), Admission::Rejected { .. }));
    }

    #[test]
    fn admits_exactly_one_probe_after_the_reset_window() {
        let breaker = CircuitBreaker::new(config(Duration::from_millis(0)));
        for _ in 0..5 {
            breaker.record(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let first = breaker.admit();
        assert_eq!(first, Admission::Allowed { probe: true });
        // A second caller while the probe is outstanding is rejected.
        assert!(matches!(breaker.admit(), Admission::Rejected { .. }));
    }

    #[test]
    fn successful_probe_closes_the_circuit() {
        let breaker = CircuitBreaker::new(config(Duration::from_millis(0)));
        for _ in 0..5 {
            breaker.record(false);
        }
        assert_eq!(breaker.admit(), Admission::Allowed { probe: true });
        breaker.record(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(), Admission::Allowed { probe: false });
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(config(Duration::from_millis(0)));
        for _ in 0..5 {
            breaker.record(false);
        }
        assert_eq!(breaker.admit(), Admission::Allowed { probe: true });
        breaker.record(false);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn mixed_window_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::new(config(Duration::from_secs(30)));
        for _ in 0..7 {
            breaker.record(true);
        }
        for _ in 0..3 {
            breaker.record(false);
        }
        // 30% failures over a window of 10
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
