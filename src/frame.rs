//! Frame ownership and session identity types.
//!
//! A reorder session is scoped to one peer station and one traffic class;
//! [`SessionKey`] combines the two for table lookups. [`OwnedFrame`] is the
//! unit of delivery: it moves into the session when buffered and out to the
//! sink (or is dropped and counted) when released, so a frame is never
//! referenced by two owners at once.

use std::fmt;

/// 6-byte MAC address identifying a peer station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Create a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Create a zero address (useful for single-peer tests).
    pub const fn zero() -> Self {
        Self([0; 6])
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// QoS Traffic Identifier (0-7). Block-Ack sessions are negotiated per TID.
pub type Tid = u8;

/// Key identifying one Block-Ack session: a peer and a traffic class.
///
/// At most one active session exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Peer station address.
    pub peer: MacAddr,
    /// Traffic identifier the session is scoped to.
    pub tid: Tid,
}

impl SessionKey {
    /// Create a new session key.
    pub const fn new(peer: MacAddr, tid: Tid) -> Self {
        Self { peer, tid }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tid{}", self.peer, self.tid)
    }
}

/// A decoded received data frame with single ownership.
///
/// The MAC layer hands the frame over together with its already-extracted
/// sequence number; the payload itself is opaque to the reorder engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    payload: Vec<u8>,
}

impl OwnedFrame {
    /// Create a frame from its payload bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the frame, yielding the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
