//! One-shot settlement handles, fulfilled by the drain scheduler.
//!
//! A handle is created at encode time and settles exactly once: with the
//! node's final id, with a plain acknowledgement, or with the error that
//! cancelled its batch. The wait/notify pair is the same shared-flag
//! Condvar handshake the engine boundary uses.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, UmbraError};
use crate::types::NodeId;

/// What an operation settled to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// A create/upsert settled; carries the engine-final node id.
    Created(NodeId),
    /// An update/delete/increment/expire was applied.
    Applied,
}

#[derive(Debug)]
enum SettleState {
    Pending,
    Done(Result<Settlement>),
}

#[derive(Debug)]
struct Inner {
    state: Mutex<SettleState>,
    cvar: Condvar,
    /// Provisional id for creates; `None` for other operations.
    provisional: Option<NodeId>,
    /// Wire tag of the type this operation targets.
    type_tag: u16,
    /// Whether settlement should translate the provisional id. Verbatim
    /// (unsafe-mode) creates carry a final id already.
    translate: bool,
}

/// Settlement future for one encoded operation.
#[derive(Clone, Debug)]
pub struct OpHandle {
    inner: Arc<Inner>,
}

impl OpHandle {
    pub(crate) fn create(type_tag: u16, provisional: NodeId) -> Self {
        Self::new_create(type_tag, provisional, true)
    }

    /// Unsafe-mode create: the id is final, the offset map does not apply.
    pub(crate) fn create_verbatim(type_tag: u16, id: NodeId) -> Self {
        Self::new_create(type_tag, id, false)
    }

    fn new_create(type_tag: u16, provisional: NodeId, translate: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SettleState::Pending),
                cvar: Condvar::new(),
                provisional: Some(provisional),
                type_tag,
                translate,
            }),
        }
    }

    pub(crate) fn applied(type_tag: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SettleState::Pending),
                cvar: Condvar::new(),
                provisional: None,
                type_tag,
                translate: false,
            }),
        }
    }

    /// The provisional id assigned at encode time, before settlement.
    /// References to a not-yet-settled create resolve through this.
    pub fn provisional_id(&self) -> Option<NodeId> {
        self.inner.provisional
    }

    /// Wire tag of the targeted type.
    pub fn type_tag(&self) -> u16 {
        self.inner.type_tag
    }

    /// Resolves to the best-known node id: the final id once settled, the
    /// provisional id before that. Used when encoding references to
    /// pending creates.
    pub fn node_id(&self) -> Option<NodeId> {
        if let SettleState::Done(Ok(Settlement::Created(id))) =
            &*self.inner.state.lock().expect("handle lock poisoned")
        {
            return Some(*id);
        }
        self.inner.provisional
    }

    /// Non-blocking poll; `None` while pending.
    pub fn try_get(&self) -> Option<Result<Settlement>> {
        match &*self.inner.state.lock().expect("handle lock poisoned") {
            SettleState::Pending => None,
            SettleState::Done(result) => Some(result.clone()),
        }
    }

    /// Blocks until the owning batch settles.
    pub fn wait(&self) -> Result<Settlement> {
        let mut state = self.inner.state.lock().expect("handle lock poisoned");
        loop {
            match &*state {
                SettleState::Done(result) => return result.clone(),
                SettleState::Pending => {
                    state = self
                        .inner
                        .cvar
                        .wait(state)
                        .expect("handle lock poisoned");
                }
            }
        }
    }

    /// Blocks up to `timeout`; `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Settlement>> {
        let state = self.inner.state.lock().expect("handle lock poisoned");
        let (state, result) = self
            .inner
            .cvar
            .wait_timeout_while(state, timeout, |s| matches!(s, SettleState::Pending))
            .expect("handle lock poisoned");
        if result.timed_out() {
            return None;
        }
        match &*state {
            SettleState::Done(result) => Some(result.clone()),
            SettleState::Pending => None,
        }
    }

    /// Settles with the id offset reported by the engine for this type.
    pub(crate) fn settle_with_offset(&self, offset: u32) {
        let settlement = match self.inner.provisional {
            Some(tmp) if self.inner.translate => Settlement::Created(NodeId(tmp.0 + offset)),
            Some(id) => Settlement::Created(id),
            None => Settlement::Applied,
        };
        self.settle(Ok(settlement));
    }

    /// Settles with an error (schema change, transport failure).
    pub(crate) fn settle_err(&self, err: UmbraError) {
        self.settle(Err(err));
    }

    fn settle(&self, result: Result<Settlement>) {
        let mut state = self.inner.state.lock().expect("handle lock poisoned");
        if matches!(*state, SettleState::Done(_)) {
            return; // settles exactly once
        }
        *state = SettleState::Done(result);
        self.inner.cvar.notify_all();
    }
}
