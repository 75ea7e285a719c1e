//! Fixed-capacity pool of reorder-session slots.
//!
//! Slots are shared across all peers and traffic classes keyed into the
//! engine. The pool lock guards only the used-bitmap; session contents sit
//! behind each slot's own lock. Handles carry a generation counter bumped
//! on every acquire, so a handle kept past `release` (a late timer fire, a
//! stale table entry) can be detected instead of mutating whatever session
//! reused the slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as SessionMutex;

use crate::frame::SessionKey;
use crate::session::{EngineError, ReorderSession};
use crate::timer::AgingTimer;

/// Handle to an acquired pool slot: index plus the generation it was
/// acquired under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    index: usize,
    generation: u64,
}

impl SessionHandle {
    /// Slot index within the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything guarded by one session's lock.
#[derive(Debug)]
pub(crate) struct SlotState {
    /// The reorder state machine itself.
    pub(crate) session: ReorderSession,
    /// Key of the current owner while the slot is in use.
    pub(crate) owner: Option<SessionKey>,
    /// Pending aging timer, if armed. Dropping it cancels the timer task.
    pub(crate) timer: Option<AgingTimer>,
    /// Monotonic arm counter; a fire is only honored when its epoch matches
    /// the currently armed timer.
    pub(crate) timer_epoch: u64,
}

/// One pool slot: the per-session lock plus the generation counter used to
/// invalidate stale handles.
#[derive(Debug)]
pub(crate) struct SessionSlot {
    generation: AtomicU64,
    pub(crate) state: SessionMutex<SlotState>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            state: SessionMutex::new(SlotState {
                session: ReorderSession::new(0),
                owner: None,
                timer: None,
                timer_epoch: 0,
            }),
        }
    }

    /// Current generation of this slot.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Fixed array of session slots with a used-bitmap.
#[derive(Debug)]
pub struct SessionPool {
    slots: Vec<Arc<SessionSlot>>,
    // Guards only the used flags; never held across an await point.
    used: Mutex<Vec<bool>>,
}

impl SessionPool {
    /// Create a pool with `max_sessions` slots.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            slots: (0..max_sessions).map(|_| Arc::new(SessionSlot::new())).collect(),
            used: Mutex::new(vec![false; max_sessions]),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently in use.
    pub fn in_use(&self) -> usize {
        self.used
            .lock()
            .map(|used| used.iter().filter(|&&u| u).count())
            .unwrap_or(0)
    }

    /// Claim the first free slot.
    ///
    /// Never waits: fails with [`EngineError::PoolExhausted`] when every
    /// slot is taken. The slot's generation is bumped before the handle is
    /// returned, invalidating any handle from a prior occupant.
    pub fn acquire(&self) -> Result<SessionHandle, EngineError> {
        let mut used = self.used.lock().map_err(|_| EngineError::PoolExhausted)?;
        let index = used
            .iter()
            .position(|&u| !u)
            .ok_or(EngineError::PoolExhausted)?;
        used[index] = true;
        let generation = self.slots[index].generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(SessionHandle { index, generation })
    }

    /// Return a slot to the pool.
    ///
    /// A stale handle (the slot has been reacquired since) is ignored and
    /// reported as `false`.
    pub fn release(&self, handle: SessionHandle) -> bool {
        if handle.index >= self.slots.len()
            || self.slots[handle.index].generation() != handle.generation
        {
            return false;
        }
        match self.used.lock() {
            Ok(mut used) if used[handle.index] => {
                used[handle.index] = false;
                true
            }
            _ => false,
        }
    }

    /// Access a slot by index. The caller is expected to re-validate the
    /// generation under the slot's lock before mutating the session.
    pub(crate) fn slot(&self, index: usize) -> &Arc<SessionSlot> {
        &self.slots[index]
    }
}
