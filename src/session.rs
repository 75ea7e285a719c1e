//! Per-session Block-Ack reorder state machine.
//!
//! A session owns a circular frame buffer covering the reorder window
//! `[expected_sn, expected_sn + capacity - 1]` (mod 4096). Frames at
//! `expected_sn` are released immediately, frames ahead of it are buffered,
//! and frames behind it are either passed straight through (before the
//! window has seen any in-window traffic) or dropped as stale.
//!
//! The machine moves `Inactive -> Active(unseeded) -> Active(seeded) ->
//! Inactive`. It is purely synchronous: released frames are appended to a
//! caller-supplied `Vec` so the caller can hand them to the delivery queue
//! after dropping whatever lock guards the session. Timer arming and
//! cancellation are likewise the caller's job; the session only reports its
//! occupancy.
//!
//! # Example
//!
//! ```
//! use ba_reorder::session::ReorderSession;
//! use ba_reorder::frame::OwnedFrame;
//!
//! let mut session = ReorderSession::new(0);
//! let mut out = Vec::new();
//! session.start(4, 0, &mut out).unwrap();
//!
//! // sn 1 arrives before sn 0: it is held back.
//! session.frame_in(1, OwnedFrame::new(vec![1]), &mut out).unwrap();
//! assert!(out.is_empty());
//!
//! // sn 0 arrives: both are released in order.
//! session.frame_in(0, OwnedFrame::new(vec![0]), &mut out).unwrap();
//! assert_eq!(out.len(), 2);
//! ```

use crate::frame::OwnedFrame;
use crate::seq::{
    is_behind, seq_add, seq_delta, seq_sub, SequenceNum, MAX_REORDER_WINDOW, SEQ_MODULUS,
};
use crate::Tid;

/// Errors surfaced by the reorder engine.
///
/// Duplicate and stale receptions are not errors: they are expected,
/// frequent conditions in wireless reception and are silently counted in
/// [`SessionStats`] instead. Every variant here is local to one session and
/// recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A parameter was out of range (window capacity, sequence number).
    InvalidParameter(&'static str),
    /// The operation targeted a session that is not currently active.
    NotActive,
    /// No free session slot was available in the pool.
    PoolExhausted,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            Self::NotActive => write!(f, "session not active"),
            Self::PoolExhausted => write!(f, "session pool exhausted"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Per-session delivery and drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames released to the sink in window order.
    pub delivered: u64,
    /// Pre-session frames passed straight through before the window seeded.
    pub passed_through: u64,
    /// Frames dropped because their slot was already occupied.
    pub duplicates_dropped: u64,
    /// Frames behind the window dropped after the window seeded.
    pub stale_dropped: u64,
    /// Buffered frames discarded by a flushing stop.
    pub flushed: u64,
    /// Times the aging timeout forced the window past a missing frame.
    pub aging_skips: u64,
}

/// One circular-buffer slot. Occupied iff it holds a frame; `sn` is only
/// meaningful while occupied.
#[derive(Debug)]
struct FrameSlot {
    frame: Option<OwnedFrame>,
    sn: SequenceNum,
}

impl FrameSlot {
    fn empty() -> Self {
        Self { frame: None, sn: 0 }
    }
}

/// Reorder state for one (peer, TID) Block-Ack session.
#[derive(Debug)]
pub struct ReorderSession {
    tid: Tid,
    capacity: u16,
    start_sn: SequenceNum,
    expected_sn: SequenceNum,
    // Physical slot holding `expected_sn`; rotates in lockstep with it.
    head_slot: usize,
    occupied: u16,
    slots: Vec<FrameSlot>,
    active: bool,
    window_seeded: bool,
    stats: SessionStats,
}

impl ReorderSession {
    /// Create an inactive session for the given traffic class.
    pub fn new(tid: Tid) -> Self {
        Self {
            tid,
            capacity: 0,
            start_sn: 0,
            expected_sn: 0,
            head_slot: 0,
            occupied: 0,
            slots: Vec::new(),
            active: false,
            window_seeded: false,
            stats: SessionStats::default(),
        }
    }

    /// Traffic class this session is scoped to.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// True while the session is started and accepting frames.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of currently occupied buffer slots.
    pub fn occupied(&self) -> u16 {
        self.occupied
    }

    /// Next sequence number owed to the sink.
    pub fn expected_sn(&self) -> SequenceNum {
        self.expected_sn
    }

    /// Snapshot of the delivery and drop counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// True when the session is active with exactly these parameters.
    pub fn has_params(&self, capacity: u16, start_sn: SequenceNum) -> bool {
        self.active && self.capacity == capacity && self.start_sn == start_sn
    }

    /// Validate Block-Ack session parameters without touching any state.
    pub fn validate_params(capacity: u16, start_sn: SequenceNum) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidParameter("window capacity is zero"));
        }
        if capacity > MAX_REORDER_WINDOW {
            return Err(EngineError::InvalidParameter(
                "window capacity exceeds maximum",
            ));
        }
        if start_sn >= SEQ_MODULUS {
            return Err(EngineError::InvalidParameter(
                "start sequence number exceeds 12 bits",
            ));
        }
        Ok(())
    }

    /// Start (or restart) the session with a fresh window.
    ///
    /// Restarting with identical parameters is a no-op, so a retransmitted
    /// ADDBA does not discard buffered frames. Restarting with different
    /// parameters first performs an implicit non-flushing stop: anything
    /// buffered is released to `released` in best-effort order.
    pub fn start(
        &mut self,
        capacity: u16,
        start_sn: SequenceNum,
        released: &mut Vec<OwnedFrame>,
    ) -> Result<(), EngineError> {
        Self::validate_params(capacity, start_sn)?;

        if self.has_params(capacity, start_sn) {
            return Ok(());
        }
        if self.active {
            // Implicit stop of the prior window; delivery, not discard.
            let _ = self.stop(false, released);
        }

        self.capacity = capacity;
        self.start_sn = start_sn;
        self.expected_sn = start_sn;
        self.head_slot = 0;
        self.occupied = 0;
        self.slots.clear();
        self.slots.resize_with(capacity as usize, FrameSlot::empty);
        self.active = true;
        self.window_seeded = false;
        Ok(())
    }

    /// Process one received frame.
    ///
    /// Frames at `expected_sn` are released immediately; frames ahead of it
    /// are buffered (window advancing first if the gap exceeds the window);
    /// frames behind it pass straight through before the window has seeded
    /// and are counted as stale drops afterwards. Finishes by releasing any
    /// now-contiguous run starting at `expected_sn`.
    pub fn frame_in(
        &mut self,
        sn: SequenceNum,
        frame: OwnedFrame,
        released: &mut Vec<OwnedFrame>,
    ) -> Result<(), EngineError> {
        if !self.active {
            return Err(EngineError::NotActive);
        }
        if sn >= SEQ_MODULUS {
            return Err(EngineError::InvalidParameter(
                "sequence number exceeds 12 bits",
            ));
        }

        if !is_behind(sn, self.expected_sn) {
            self.window_seeded = true;

            if seq_delta(sn, self.expected_sn) >= self.capacity {
                // Frame is past the far edge: slide the window so that sn
                // becomes its last entry, releasing everything left behind.
                let new_expected = seq_add(seq_sub(sn, self.capacity), 1);
                self.release_up_to(new_expected, released);
            }

            if sn == self.expected_sn {
                released.push(frame);
                self.stats.delivered += 1;
                self.advance_expected(1);
            } else {
                let i = self.slot_of(sn);
                if self.slots[i].frame.is_some() {
                    debug_assert_eq!(self.slots[i].sn, sn);
                    self.stats.duplicates_dropped += 1;
                } else {
                    self.slots[i] = FrameSlot {
                        frame: Some(frame),
                        sn,
                    };
                    self.occupied += 1;
                }
            }
        } else if !self.window_seeded {
            // Traffic from before the Block-Ack window was established;
            // passing it through avoids losing legitimate early frames.
            released.push(frame);
            self.stats.passed_through += 1;
        } else {
            self.stats.stale_dropped += 1;
        }

        self.release_ready(released);
        debug_assert!(self.occupied <= self.capacity);
        Ok(())
    }

    /// Force forward progress after the aging timeout expired.
    ///
    /// Skips `expected_sn` forward to the first buffered frame, releases it,
    /// then releases any contiguous run behind it. Does nothing when the
    /// buffer is empty.
    pub fn aging_timeout(&mut self, released: &mut Vec<OwnedFrame>) {
        if !self.active || self.occupied == 0 {
            return;
        }
        for g in 1..self.capacity {
            let sn = seq_add(self.expected_sn, g);
            let i = self.slot_of(sn);
            if self.slots[i].sn != sn {
                continue;
            }
            let Some(frame) = self.slots[i].frame.take() else {
                continue;
            };
            self.occupied -= 1;
            self.advance_expected(g + 1);
            released.push(frame);
            self.stats.delivered += 1;
            self.stats.aging_skips += 1;
            self.release_ready(released);
            return;
        }
    }

    /// Stop the session, emptying the buffer.
    ///
    /// With `flush == true` buffered frames are discarded and counted; with
    /// `flush == false` they are released in slot order starting at
    /// `expected_sn`'s slot.
    pub fn stop(&mut self, flush: bool, released: &mut Vec<OwnedFrame>) -> Result<(), EngineError> {
        if !self.active {
            return Err(EngineError::NotActive);
        }
        let first = self.head_slot;
        for k in 0..self.capacity as usize {
            let i = (first + k) % self.capacity as usize;
            if let Some(frame) = self.slots[i].frame.take() {
                if flush {
                    self.stats.flushed += 1;
                } else {
                    released.push(frame);
                    self.stats.delivered += 1;
                }
            }
        }
        self.occupied = 0;
        self.active = false;
        self.window_seeded = false;
        Ok(())
    }

    /// Authoritative window reset from a BAR or Block-Ack error event.
    ///
    /// A `new_sn` behind the current window is stale and ignored. Otherwise
    /// every buffered frame behind `new_sn` is released in order before
    /// `expected_sn` jumps, so no slot is ever stranded behind the live
    /// window and two sequence numbers can never alias to one slot.
    pub fn scroll(
        &mut self,
        new_sn: SequenceNum,
        released: &mut Vec<OwnedFrame>,
    ) -> Result<(), EngineError> {
        if !self.active {
            return Err(EngineError::NotActive);
        }
        if new_sn >= SEQ_MODULUS {
            return Err(EngineError::InvalidParameter(
                "sequence number exceeds 12 bits",
            ));
        }
        if is_behind(new_sn, self.expected_sn) {
            return Ok(());
        }
        self.release_up_to(new_sn, released);
        self.release_ready(released);
        Ok(())
    }

    /// Move `expected_sn` to `new_expected`, releasing every buffered frame
    /// behind the new head in increasing sequence order.
    fn release_up_to(&mut self, new_expected: SequenceNum, released: &mut Vec<OwnedFrame>) {
        if self.occupied > 0 {
            for off in 0..self.capacity {
                let sn = seq_add(self.expected_sn, off);
                if !is_behind(sn, new_expected) {
                    break;
                }
                let i = self.slot_of(sn);
                if self.slots[i].sn != sn {
                    continue;
                }
                if let Some(frame) = self.slots[i].frame.take() {
                    self.occupied -= 1;
                    released.push(frame);
                    self.stats.delivered += 1;
                }
            }
        }
        let steps = seq_delta(new_expected, self.expected_sn);
        self.advance_expected(steps);
    }

    /// Release the contiguous run of buffered frames starting at
    /// `expected_sn`, advancing it past each one.
    fn release_ready(&mut self, released: &mut Vec<OwnedFrame>) {
        loop {
            let i = self.head_slot;
            if self.slots[i].sn != self.expected_sn {
                break;
            }
            let Some(frame) = self.slots[i].frame.take() else {
                break;
            };
            self.occupied -= 1;
            released.push(frame);
            self.stats.delivered += 1;
            self.advance_expected(1);
        }
    }

    /// Physical slot for an in-window sequence number.
    ///
    /// The base rotates with the window head, so a buffered frame keeps its
    /// slot while `expected_sn` slides past it and no two live-window
    /// sequence numbers ever share a slot, even once the window has
    /// travelled a distance the capacity does not divide.
    fn slot_of(&self, sn: SequenceNum) -> usize {
        (self.head_slot + seq_delta(sn, self.expected_sn) as usize) % self.capacity as usize
    }

    /// Advance `expected_sn` by `steps`, rotating the slot base with it.
    fn advance_expected(&mut self, steps: u16) {
        self.expected_sn = seq_add(self.expected_sn, steps);
        self.head_slot = (self.head_slot + steps as usize) % self.capacity as usize;
    }
}
