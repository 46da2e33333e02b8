//! Circuit breaker guarding calls to external `MCPClient` backends when
//! L1/L4 are configured to use one. States: `CLOSED` → `OPEN` after
//! `N` consecutive failures → `HALF_OPEN` after a reset interval →
//! `CLOSED` on probe success or back to `OPEN` on probe failure. While
//! `OPEN`, calls are rejected immediately without reaching the backend.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_interval: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen;

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_interval: Duration) -> Self {
        Self {
            failure_threshold,
            reset_interval,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.maybe_transition_to_half_open();
        self.inner.lock().unwrap().state
    }

    /// Check before issuing a call. Returns `Err(BreakerOpen)` immediately
    /// if the breaker is open and the reset interval has not elapsed.
    pub fn before_call(&self) -> Result<(), BreakerOpen> {
        self.maybe_transition_to_half_open();
        let inner = self.inner.lock().unwrap();
        if inner.state == State::Open {
            Err(BreakerOpen)
        } else {
            Ok(())
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.state = State::Closed;
        inner.opened_at = None;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    fn maybe_transition_to_half_open(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.reset_interval {
                    inner.state = State::HalfOpen;
                }
            }
        }
    }
}
