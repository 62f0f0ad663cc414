//! Call registry: sequence allocation and the pending-call map.
//!
//! One mutex guards the sequence counter, the map and the `closing` /
//! `shutdown` flags together, so a registration can never slip in after a
//! drain has started. Calls leave the map exactly once, either through
//! [`remove`](CallRegistry::remove) or [`terminate_all`](CallRegistry::terminate_all),
//! and are completed only after they have left it.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::call::{PendingCall, ReplySlot};
use crate::error::{Result, RpcError};

#[derive(Default)]
struct State {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    closing: bool,
    shutdown: bool,
}

/// Registry of a client's in-flight calls.
#[derive(Default)]
pub(crate) struct CallRegistry {
    state: Mutex<State>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call and assign its sequence number.
    ///
    /// `submit` runs under the registry lock with the assigned number, so
    /// whatever it queues is ordered by sequence number. If it fails nothing
    /// is registered and the number is not consumed.
    ///
    /// Fails with [`RpcError::Unavailable`] once the registry is closing or
    /// shut down; the slot is dropped unregistered.
    pub(crate) fn register<T>(
        &self,
        service_method: &str,
        slot: Box<dyn ReplySlot>,
        submit: impl FnOnce(u64) -> Result<T>,
    ) -> Result<(u64, T)> {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(RpcError::Unavailable);
        }
        let seq = state.seq;
        let submitted = submit(seq)?;
        state.seq += 1;
        state
            .pending
            .insert(seq, PendingCall::new(seq, service_method.to_string(), slot));
        Ok((seq, submitted))
    }

    /// Pop the call registered under `seq`.
    pub(crate) fn remove(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().pending.remove(&seq)
    }

    /// Shut the registry down for good and fail every pending call with `err`.
    ///
    /// Returns the number of calls completed.
    pub(crate) fn terminate_all(&self, err: &RpcError) -> usize {
        let drained: Vec<PendingCall> = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.pending.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            call.complete(Err(err.duplicate()));
        }
        count
    }

    /// Mark the registry closing. Fails if it already was.
    pub(crate) fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closing {
            return Err(RpcError::Unavailable);
        }
        state.closing = true;
        Ok(())
    }

    pub(crate) fn is_available(&self) -> bool {
        let state = self.state.lock();
        !state.closing && !state.shutdown
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}
