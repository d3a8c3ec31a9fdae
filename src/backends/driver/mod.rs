// SPDX-License-Identifier: GPL-3.0-only

//! Driver abstraction for structured-light depth sensors
//!
//! This is the narrow contract the session needs from a sensor driver:
//!
//! ```text
//! Driver ──init──▶ DriverContext ──open_device──▶ DriverDevice
//!                       │                              │
//!                process_events ───invokes───▶ video / depth callbacks
//! ```
//!
//! Frame buffers are handed back and forth by value. The session gives the
//! device a write target with `set_*_buffer`; when a frame is complete the
//! driver passes the filled buffer to the stream callback, and whatever the
//! callback returns becomes the next write target. No buffer is ever shared
//! between the driver and the session at the same time.
//!
//! Implementations:
//! - [`SimulatedDriver`]: deterministic in-process sensor (tests, `--simulate`)
//! - `FreedepthDriver`: Kinect v1 over USB via freedepth (feature `freedepth`)

pub mod simulated;

#[cfg(all(target_arch = "x86_64", feature = "freedepth"))]
pub mod freedepth;

pub use simulated::{SimulatedDriver, SimulatorConfig, SimulatorStats};

#[cfg(all(target_arch = "x86_64", feature = "freedepth"))]
pub use self::freedepth::FreedepthDriver;

use serde::{Deserialize, Serialize};

use crate::errors::DriverResult;

/// Owned pixel storage for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer<T> {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    /// Driver timestamp of the frame last written into this buffer
    pub timestamp: u32,
    data: Vec<T>,
}

impl<T: Copy + Default> PixelBuffer<T> {
    /// Allocate a zeroed buffer
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            timestamp: 0,
            data: vec![T::default(); width as usize * height as usize * channels],
        }
    }

    /// Allocate a buffer sized for a frame mode
    pub fn for_mode(mode: &FrameMode) -> Self {
        Self::new(mode.width, mode.height, mode.format.channels())
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> PixelBuffer<T> {
    /// Number of samples (pixels times channels)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Sample layout of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Interleaved 8-bit RGB
    Rgb,
    /// 11-bit depth stored in 16-bit samples
    Depth11Bit,
}

impl FrameFormat {
    pub fn channels(&self) -> usize {
        match self {
            FrameFormat::Rgb => crate::constants::VIDEO_CHANNELS,
            FrameFormat::Depth11Bit => crate::constants::DEPTH_CHANNELS,
        }
    }
}

/// Mode a stream was started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMode {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub framerate: u32,
}

impl FrameMode {
    /// 640x480 @ 30fps RGB
    pub const fn video_medium() -> Self {
        Self {
            width: 640,
            height: 480,
            format: FrameFormat::Rgb,
            framerate: 30,
        }
    }

    /// 640x480 @ 30fps 11-bit depth
    pub const fn depth_medium() -> Self {
        Self {
            width: 640,
            height: 480,
            format: FrameFormat::Depth11Bit,
            framerate: 30,
        }
    }
}

impl std::fmt::Display for FrameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {:?} @ {}fps",
            self.width, self.height, self.format, self.framerate
        )
    }
}

/// Front panel LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Led {
    Off,
    #[default]
    Green,
    Red,
    Yellow,
    BlinkGreen,
    BlinkRedYellow,
}

impl Led {
    /// Value the device firmware expects
    pub fn code(&self) -> u16 {
        match self {
            Led::Off => 0,
            Led::Green => 1,
            Led::Red => 2,
            Led::Yellow => 3,
            Led::BlinkGreen => 4,
            Led::BlinkRedYellow => 6,
        }
    }
}

/// Boolean device setting applied through the session's pending queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFlag {
    AutoExposure,
    AutoWhiteBalance,
    RawColor,
    MirrorDepth,
    MirrorVideo,
    NearMode,
}

impl DeviceFlag {
    pub const ALL: [DeviceFlag; 6] = [
        DeviceFlag::AutoExposure,
        DeviceFlag::AutoWhiteBalance,
        DeviceFlag::RawColor,
        DeviceFlag::MirrorDepth,
        DeviceFlag::MirrorVideo,
        DeviceFlag::NearMode,
    ];

    /// Register bit of the flag
    pub fn code(&self) -> u32 {
        match self {
            DeviceFlag::AutoExposure => 1 << 14,
            DeviceFlag::AutoWhiteBalance => 1 << 1,
            DeviceFlag::RawColor => 1 << 4,
            DeviceFlag::MirrorDepth => 1 << 16,
            DeviceFlag::MirrorVideo => 1 << 17,
            DeviceFlag::NearMode => 1 << 18,
        }
    }
}

/// Stream callback: receives the filled write target and the frame timestamp,
/// returns the buffer the driver should write the next frame into.
pub type FrameCallback<T> = Box<dyn FnMut(PixelBuffer<T>, u32) -> PixelBuffer<T> + Send>;

pub type VideoCallback = FrameCallback<u8>;
pub type DepthCallback = FrameCallback<u16>;

/// Entry point of a driver library
pub trait Driver: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Global initialization, yielding a context handle
    ///
    /// Dropping the returned context tears the driver down again.
    fn init(&self) -> DriverResult<Box<dyn DriverContext>>;
}

/// An initialized driver context
pub trait DriverContext: Send {
    /// Number of connected devices
    fn num_devices(&self) -> DriverResult<usize>;

    /// Open the device at `index`
    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn DriverDevice>>;

    /// Process one batch of pending events, invoking stream callbacks
    ///
    /// Must return within a bounded time even when nothing arrives.
    /// `Err(DriverError::EventsFailed)` is fatal for the open device.
    fn process_events(&mut self) -> DriverResult<()>;
}

/// An open device handle
pub trait DriverDevice: Send {
    fn set_led(&mut self, led: Led) -> DriverResult<()>;

    fn current_video_mode(&self) -> FrameMode;

    fn current_depth_mode(&self) -> FrameMode;

    /// Hand the driver the buffer to write the next video frame into
    fn set_video_buffer(&mut self, buffer: PixelBuffer<u8>);

    /// Hand the driver the buffer to write the next depth frame into
    fn set_depth_buffer(&mut self, buffer: PixelBuffer<u16>);

    fn set_video_callback(&mut self, callback: VideoCallback);

    fn set_depth_callback(&mut self, callback: DepthCallback);

    fn start_video(&mut self) -> DriverResult<()>;

    fn start_depth(&mut self) -> DriverResult<()>;

    fn stop_video(&mut self) -> DriverResult<()>;

    fn stop_depth(&mut self) -> DriverResult<()>;

    fn set_flag(&mut self, flag: DeviceFlag, enabled: bool) -> DriverResult<()>;

    /// Close the handle, releasing buffers and callbacks
    fn close(self: Box<Self>);
}
