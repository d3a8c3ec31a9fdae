// SPDX-License-Identifier: GPL-3.0-only

//! Kinect Session - asynchronous streaming from structured-light depth cameras
//!
//! A [`DeviceSession`] keeps a depth camera open on a background thread,
//! reopening it when it disappears, and hands the newest complete RGB and
//! depth frames to the consumer without ever exposing a half-written buffer.
//!
//! # Architecture
//!
//! - [`backends`]: driver contract, shared driver context, session engine
//! - [`depth_table`]: raw depth to display range lookup table
//! - [`surface`]: display surfaces frames are published to
//! - [`config`]: session settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kinect_session::{DeviceSession, SessionConfig, SimulatedDriver};
//!
//! let driver = Arc::new(SimulatedDriver::default());
//! let mut session = DeviceSession::new(driver, SessionConfig::default());
//! session.open();
//! loop {
//!     session.update();
//!     if session.is_frame_new() {
//!         let rgb = session.pixels();
//!         println!("{} bytes at {}", rgb.len(), rgb.timestamp);
//!     }
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod depth_table;
pub mod errors;
pub mod surface;
pub mod terminal;

// Re-export commonly used types
pub use backends::driver::{
    DeviceFlag, Driver, FrameFormat, FrameMode, Led, PixelBuffer, SimulatedDriver,
    SimulatorConfig,
};
pub use backends::{DeviceContext, DeviceSession, FlagSender, SessionState, SessionStats};
pub use config::SessionConfig;
pub use depth_table::{DepthCurve, DepthLookupTable};
pub use errors::{ConfigError, DriverError};
pub use surface::{DrawRect, PixelSurface, Surface, SurfaceFormat, SurfacePixels};
