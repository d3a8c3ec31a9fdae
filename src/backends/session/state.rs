// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle states

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`DeviceSession`](super::DeviceSession)
///
/// ```text
/// Idle ─open()─▶ Starting ─▶ Opening ─▶ Streaming ─▶ Stopping ─┐
///                               ▲                              │
///                               └──────── reopen ◀─────────────┘
///                      close() / init failure ─▶ Closed ─open()─▶ Starting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Constructed, never opened
    Idle = 0,
    /// `open()` spawned the background task
    Starting = 1,
    /// Background task is looking for or opening a device
    Opening = 2,
    /// Both streams started, events being processed
    Streaming = 3,
    /// Streams being stopped and the device closed
    Stopping = 4,
    /// Background task has exited
    Closed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Opening,
            3 => SessionState::Streaming,
            4 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Opening => "opening",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding a [`SessionState`]
#[derive(Debug)]
pub(crate) struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
