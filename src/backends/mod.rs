// SPDX-License-Identifier: GPL-3.0-only

//! Device access layer
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  Consumer                   │
//! │        update() / pixels() / draw()         │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │               DeviceSession                 │
//! │  ┌──────────────┐    ┌──────────────────┐   │
//! │  │ SessionShared│◀───│ driver callbacks │   │
//! │  │ (one lock)   │    └──────────────────┘   │
//! │  └──────────────┘    ┌──────────────────┐   │
//! │                      │ background task  │   │
//! │                      │ (frame_loop)     │   │
//! │                      └──────────────────┘   │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │   Driver: simulated │ freedepth (feature)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`driver`]: driver contract and implementations
//! - [`context`]: process-wide driver context for device queries
//! - [`frame_loop`]: background thread controller
//! - [`session`]: the device session itself

pub mod context;
pub mod driver;
pub mod frame_loop;
pub mod session;

pub use context::DeviceContext;
pub use session::{DeviceSession, FlagSender, SessionState, SessionStats};
