//! Bridge lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BridgeState {
    Uninitialized = 0,
    Initialized = 1,
    TearingDown = 2,
    Destroyed = 3,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BridgeState::Uninitialized,
            1 => BridgeState::Initialized,
            2 => BridgeState::TearingDown,
            _ => BridgeState::Destroyed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Initialized => "initialized",
            BridgeState::TearingDown => "tearing_down",
            BridgeState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for [`BridgeState`]; the state only ever moves forward.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(BridgeState::Uninitialized as u8))
    }

    pub(crate) fn get(&self) -> BridgeState {
        BridgeState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns the previous state on success.
    pub(crate) fn advance(&self, next: BridgeState) -> Option<BridgeState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < next as u8).then_some(next as u8)
            })
            .ok()
            .map(BridgeState::from_u8)
    }
}
