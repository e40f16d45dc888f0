//! Completion event for asynchronous transfers
//!
//! An [`Overlapped`] is a manual-reset event with a result slot. The transport
//! arms it before each transfer and hands the returned [`Ticket`] to the
//! platform; the platform completes the ticket from whatever thread finishes
//! the I/O. Arming or disarming bumps a generation counter, so a ticket that
//! outlives its transfer (cancelled, timed out) can never signal a later one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::TransportError;
use crate::types::Completion;

type CompletionResult = Result<Completion, TransportError>;

struct State {
    generation: u64,
    signaled: bool,
    completion: Option<CompletionResult>,
}

/// Manual-reset completion event shared by every device of one direction
pub struct Overlapped {
    state: Mutex<State>,
    signal: Condvar,
}

/// Outcome of waiting on an [`Overlapped`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

impl Overlapped {
    /// New event, initially signaled
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                generation: 0,
                signaled: true,
                completion: None,
            }),
            signal: Condvar::new(),
        })
    }

    /// Reset to non-signaled and issue a ticket for the next transfer
    pub fn arm(self: &Arc<Self>) -> Ticket {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.signaled = false;
        state.completion = None;
        Ticket {
            overlapped: Arc::clone(self),
            generation: state.generation,
        }
    }

    /// Invalidate the outstanding ticket; a late completion is discarded
    pub fn disarm(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.completion = None;
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Block until signaled or until `timeout` elapses
    ///
    /// A timeout too large to express as a deadline waits without bound.
    pub fn wait(&self, timeout: Duration) -> WaitStatus {
        let mut state = self.state.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !state.signaled {
                    if self.signal.wait_until(&mut state, deadline).timed_out() {
                        return if state.signaled {
                            WaitStatus::Signaled
                        } else {
                            WaitStatus::TimedOut
                        };
                    }
                }
            }
            None => {
                while !state.signaled {
                    self.signal.wait(&mut state);
                }
            }
        }
        WaitStatus::Signaled
    }

    /// Take the result delivered by the current ticket, if any
    pub fn take(&self) -> Option<CompletionResult> {
        self.state.lock().completion.take()
    }
}

/// Completion token for one armed transfer
pub struct Ticket {
    overlapped: Arc<Overlapped>,
    generation: u64,
}

impl Ticket {
    /// Deliver the transfer result and signal the event
    ///
    /// Returns `false` when the ticket is stale and the result was dropped.
    pub fn complete(self, result: CompletionResult) -> bool {
        let mut state = self.overlapped.state.lock();
        if state.generation != self.generation {
            trace!("Dropping stale completion (generation {})", self.generation);
            return false;
        }
        state.completion = Some(result);
        state.signaled = true;
        self.overlapped.signal.notify_all();
        true
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("generation", &self.generation)
            .finish()
    }
}
