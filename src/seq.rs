//! Modulo-4096 sequence-number arithmetic.
//!
//! 802.11 data frames carry a 12-bit sequence number, so every ordering
//! decision in the reorder engine is a modular distance in a 4096-wide
//! space. The space is split in half: a distance of at most
//! [`WINDOW_BOUNDARY`] means the number is at or ahead of the reference
//! point, anything larger means it is behind (a retransmission or a stale
//! frame from before the window moved).
//!
//! These functions are pure so the wraparound edge cases (4095 -> 0, the
//! boundary at exactly 2048) can be verified independently of any session
//! state.
//!
//! # Example
//!
//! ```
//! use ba_reorder::seq::{seq_delta, seq_add, is_behind};
//!
//! assert_eq!(seq_add(4095, 1), 0); // wraps at 4096
//! assert_eq!(seq_delta(2, 4094), 4); // forward distance across the wrap
//! assert!(is_behind(4090, 5)); // 4090 is 11 steps behind 5, not 4085 ahead
//! ```

/// Sequence numbers occupy a 12-bit field; all arithmetic is modulo 4096.
pub const SEQ_MODULUS: u16 = 4096;

/// Half the sequence space. A modular distance greater than this is
/// interpreted as "behind" the reference point rather than ahead of it.
pub const WINDOW_BOUNDARY: u16 = 2048;

/// Largest reorder window a Block-Ack session may negotiate.
pub const MAX_REORDER_WINDOW: u16 = 64;

/// A 12-bit 802.11 frame sequence number (valid values `0..4096`).
pub type SequenceNum = u16;

/// Modular distance from `b` forward to `a`: `(a - b) mod 4096`.
#[inline]
pub fn seq_delta(a: SequenceNum, b: SequenceNum) -> u16 {
    a.wrapping_sub(b) & (SEQ_MODULUS - 1)
}

/// Advance `sn` by `n` steps, wrapping at 4096.
#[inline]
pub fn seq_add(sn: SequenceNum, n: u16) -> SequenceNum {
    sn.wrapping_add(n) & (SEQ_MODULUS - 1)
}

/// Step `sn` back by `n`, wrapping at 4096.
#[inline]
pub fn seq_sub(sn: SequenceNum, n: u16) -> SequenceNum {
    sn.wrapping_sub(n) & (SEQ_MODULUS - 1)
}

/// True when `sn` lies behind `reference` in modular terms.
///
/// A distance of exactly [`WINDOW_BOUNDARY`] still counts as ahead.
#[inline]
pub fn is_behind(sn: SequenceNum, reference: SequenceNum) -> bool {
    seq_delta(sn, reference) > WINDOW_BOUNDARY
}
