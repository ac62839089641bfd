//! Consumer demand and the stream state machine.
//!
//! [`FlowControl`] is the only state shared between the consumer handle and
//! the delivery context. Every access is a short critical section and the
//! lock is never held while a callback runs.
//!
//! Demand is written by the delivery context only: the handle forwards
//! `fetch`/`pause` as commands, unless it is called from a callback running
//! on the delivery context itself, where the change applies at once.

use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::{ResponseError, ResponseResult};

/// Fetch amount that requests unbounded delivery.
pub const UNBOUNDED: i64 = i64::MAX;

/// Number of chunks the consumer currently allows to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Bounded(u64),
    Unbounded,
}

impl Demand {
    /// Add `amount` chunks of demand, saturating at [`Demand::Unbounded`].
    pub fn add(self, amount: u64) -> Demand {
        match self {
            Demand::Unbounded => Demand::Unbounded,
            Demand::Bounded(current) => match current.checked_add(amount) {
                Some(total) if total < UNBOUNDED as u64 => Demand::Bounded(total),
                _ => Demand::Unbounded,
            },
        }
    }

    /// Consume one unit. Returns `false` when there is no demand left.
    pub fn take(&mut self) -> bool {
        match self {
            Demand::Unbounded => true,
            Demand::Bounded(0) => false,
            Demand::Bounded(n) => {
                *n -= 1;
                true
            }
        }
    }

    pub fn is_positive(self) -> bool {
        self != Demand::Bounded(0)
    }
}

/// Lifecycle of the body stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No consumer has shown interest yet; chunks are held.
    Idle,
    Streaming,
    Ended,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Ended | StreamState::Failed)
    }
}

#[derive(Debug)]
struct Flow {
    demand: Demand,
    state: StreamState,
    /// Thread running a delivery step, while one is in progress.
    delivering: Option<ThreadId>,
}

/// Demand and stream state shared by the handle and the delivery context.
#[derive(Debug)]
pub(crate) struct FlowControl {
    flow: Mutex<Flow>,
}

impl FlowControl {
    /// Start idle with unbounded demand, so a consumer that never touches
    /// demand receives everything.
    pub(crate) fn new() -> Self {
        Self {
            flow: Mutex::new(Flow {
                demand: Demand::Unbounded,
                state: StreamState::Idle,
                delivering: None,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Flow) -> R) -> R {
        let mut flow = self.flow.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut flow)
    }

    /// Check a fetch amount before it touches any state.
    pub(crate) fn validate(amount: i64) -> ResponseResult<u64> {
        if amount <= 0 {
            return Err(ResponseError::InvalidDemand(amount));
        }
        Ok(amount as u64)
    }

    /// Add demand. Returns the demand after the update.
    pub(crate) fn add(&self, amount: u64) -> Demand {
        self.with(|flow| {
            flow.demand = flow.demand.add(amount);
            flow.demand
        })
    }

    pub(crate) fn pause(&self) {
        self.with(|flow| flow.demand = Demand::Bounded(0));
    }

    /// Consume one unit of demand for a chunk about to be delivered.
    pub(crate) fn take(&self) -> bool {
        self.with(|flow| flow.demand.take())
    }

    pub(crate) fn demand(&self) -> Demand {
        self.with(|flow| flow.demand)
    }

    pub(crate) fn state(&self) -> StreamState {
        self.with(|flow| flow.state)
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.with(|flow| flow.state = state);
    }

    /// Mark the current thread as running a delivery step.
    pub(crate) fn enter(&self) {
        self.with(|flow| flow.delivering = Some(thread::current().id()));
    }

    pub(crate) fn leave(&self) {
        self.with(|flow| flow.delivering = None);
    }

    /// Whether the caller is a callback of the delivery step in progress.
    pub(crate) fn in_delivery(&self) -> bool {
        let current = thread::current().id();
        self.with(|flow| flow.delivering == Some(current))
    }
}
