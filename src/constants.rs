// SPDX-License-Identifier: GPL-3.0-only

//! Session-wide constants

use std::time::Duration;

/// Number of entries in the depth lookup table (11-bit raw depth)
pub const DEPTH_TABLE_SIZE: usize = 2048;

/// Raw depth value the sensor reports when it has no reading for a pixel
pub const DEPTH_NO_DATA: u16 = 2047;

/// Largest value a table entry can hold
pub const DEPTH_TABLE_MAX: u16 = u16::MAX;

/// Default exponent of the exponential depth curve
pub const DEFAULT_CURVE_POWER: f32 = 3.0;

/// Default multiplier of the exponential depth curve
pub const DEFAULT_CURVE_MULTIPLY: f32 = 6.0;

/// Delay between polls when no device is present or opening fails
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Pause between starting the video stream and starting the depth stream
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Pause between stopping the depth stream and stopping the video stream
pub const DEFAULT_STOP_SETTLE_DELAY: Duration = Duration::from_millis(0);

/// How often interruptible sleeps check the stop signal
pub const DEFAULT_STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How many times a driver callback tries the session lock before dropping a frame
pub const DEFAULT_CALLBACK_LOCK_ATTEMPTS: u32 = 64;

/// Name of the background acquisition thread
pub const WORKER_THREAD_NAME: &str = "kinect-session";

/// Channel counts per stream
pub const VIDEO_CHANNELS: usize = 3;
pub const DEPTH_CHANNELS: usize = 1;
