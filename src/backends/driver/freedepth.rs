// SPDX-License-Identifier: GPL-3.0-only

#![cfg(all(target_arch = "x86_64", feature = "freedepth"))]

//! Kinect v1 driver backed by freedepth
//!
//! freedepth streams over USB directly (unbinding the kernel driver) and
//! delivers frames on channels. `process_events` drains those channels,
//! converts each frame into the device's current write target and hands
//! it to the registered callback.
//!
//! Both endpoints are started together by freedepth, so `start_video`
//! starts the streamer and `start_depth` only enables depth delivery.
//! LED and flag control are not exposed by freedepth's streamer.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use freedepth::{DepthFormat, DepthFrame, KinectStreamer, Resolution, VideoFormat, VideoFrame};
use tracing::{debug, info, warn};

use super::{
    DepthCallback, DeviceFlag, Driver, DriverContext, DriverDevice, FrameMode, Led, PixelBuffer,
    VideoCallback,
};
use crate::errors::{DriverError, DriverResult};

/// Idle wait of `process_events` when no frame is pending
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Driver for Kinect v1 sensors via freedepth
#[derive(Debug, Default, Clone, Copy)]
pub struct FreedepthDriver;

impl FreedepthDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for FreedepthDriver {
    fn name(&self) -> &str {
        "freedepth"
    }

    fn init(&self) -> DriverResult<Box<dyn DriverContext>> {
        // Enumeration doubles as a check that USB access works at all
        freedepth::enumerate_devices()
            .map_err(|e| DriverError::InitFailed(e.to_string()))?;
        Ok(Box::new(FreedepthContext { active: None }))
    }
}

/// Streams of the open device, shared between the device handle and the
/// context's event processing
#[derive(Default)]
struct StreamState {
    streamer: Option<KinectStreamer>,
    video_rx: Option<Receiver<VideoFrame>>,
    depth_rx: Option<Receiver<DepthFrame>>,
    video_buffer: Option<PixelBuffer<u8>>,
    depth_buffer: Option<PixelBuffer<u16>>,
    video_callback: Option<VideoCallback>,
    depth_callback: Option<DepthCallback>,
    depth_enabled: bool,
}

type SharedState = Arc<Mutex<StreamState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, StreamState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FreedepthContext {
    active: Option<SharedState>,
}

impl DriverContext for FreedepthContext {
    fn num_devices(&self) -> DriverResult<usize> {
        freedepth::enumerate_devices()
            .map(|devices| devices.len())
            .map_err(|e| DriverError::Other(e.to_string()))
    }

    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn DriverDevice>> {
        let streamer = KinectStreamer::new(index)
            .map_err(|e| DriverError::OpenFailed(format!("device {}: {}", index, e)))?;
        info!(device = index, "Opened depth camera via freedepth");

        let state: SharedState = Arc::new(Mutex::new(StreamState {
            streamer: Some(streamer),
            ..StreamState::default()
        }));
        self.active = Some(Arc::clone(&state));
        Ok(Box::new(FreedepthDevice { state }))
    }

    fn process_events(&mut self) -> DriverResult<()> {
        let Some(state) = self.active.clone() else {
            thread::sleep(IDLE_POLL);
            return Ok(());
        };

        let mut guard = lock(&state);
        if guard.streamer.is_none() {
            drop(guard);
            self.active = None;
            return Ok(());
        }

        let mut delivered = false;
        let video = guard.video_rx.as_ref().map(|rx| rx.try_recv());
        match video {
            Some(Ok(frame)) => {
                deliver_video(&mut guard, &frame);
                delivered = true;
            }
            Some(Err(TryRecvError::Disconnected)) => {
                return Err(DriverError::EventsFailed(-1));
            }
            Some(Err(TryRecvError::Empty)) | None => {}
        }

        let depth = guard.depth_rx.as_ref().map(|rx| rx.try_recv());
        match depth {
            Some(Ok(frame)) => {
                if guard.depth_enabled {
                    deliver_depth(&mut guard, &frame);
                }
                delivered = true;
            }
            Some(Err(TryRecvError::Disconnected)) => {
                return Err(DriverError::EventsFailed(-1));
            }
            Some(Err(TryRecvError::Empty)) | None => {}
        }
        drop(guard);

        if !delivered {
            thread::sleep(IDLE_POLL);
        }
        Ok(())
    }
}

fn deliver_video(state: &mut StreamState, frame: &VideoFrame) {
    let (Some(mut buffer), Some(callback)) =
        (state.video_buffer.take(), state.video_callback.as_mut())
    else {
        return;
    };

    // The hardware only produces Bayer data, RGB is demosaiced in software
    let pixels = (frame.width * frame.height) as usize;
    let mut rgb = vec![0u8; pixels * 3];
    freedepth::convert_bayer_to_rgb(&frame.data, &mut rgb, frame.width, frame.height);

    if rgb.len() == buffer.len() {
        buffer.as_mut_slice().copy_from_slice(&rgb);
        buffer = callback(buffer, frame.timestamp as u32);
    } else {
        warn!(
            frame = rgb.len(),
            buffer = buffer.len(),
            "Video frame size does not match the negotiated mode"
        );
    }
    state.video_buffer = Some(buffer);
}

fn deliver_depth(state: &mut StreamState, frame: &DepthFrame) {
    let (Some(mut buffer), Some(callback)) =
        (state.depth_buffer.take(), state.depth_callback.as_mut())
    else {
        return;
    };

    match frame.as_u16() {
        Some(samples) if samples.len() == buffer.len() => {
            buffer.as_mut_slice().copy_from_slice(samples);
            buffer = callback(buffer, frame.timestamp as u32);
        }
        Some(samples) => warn!(
            frame = samples.len(),
            buffer = buffer.len(),
            "Depth frame size does not match the negotiated mode"
        ),
        None => debug!("Depth frame without 16-bit samples skipped"),
    }
    state.depth_buffer = Some(buffer);
}

struct FreedepthDevice {
    state: SharedState,
}

impl FreedepthDevice {
    fn stop_streamer(state: &mut StreamState) {
        state.video_rx = None;
        state.depth_rx = None;
        if let Some(mut streamer) = state.streamer.take() {
            streamer.stop();
            if let Err(e) = streamer.rebind_driver() {
                warn!("Failed to rebind kernel driver: {}", e);
            }
        }
    }
}

impl DriverDevice for FreedepthDevice {
    fn set_led(&mut self, led: Led) -> DriverResult<()> {
        Err(DriverError::Unsupported(format!("LED {:?}", led)))
    }

    fn current_video_mode(&self) -> FrameMode {
        FrameMode::video_medium()
    }

    fn current_depth_mode(&self) -> FrameMode {
        FrameMode::depth_medium()
    }

    fn set_video_buffer(&mut self, buffer: PixelBuffer<u8>) {
        lock(&self.state).video_buffer = Some(buffer);
    }

    fn set_depth_buffer(&mut self, buffer: PixelBuffer<u16>) {
        lock(&self.state).depth_buffer = Some(buffer);
    }

    fn set_video_callback(&mut self, callback: VideoCallback) {
        lock(&self.state).video_callback = Some(callback);
    }

    fn set_depth_callback(&mut self, callback: DepthCallback) {
        lock(&self.state).depth_callback = Some(callback);
    }

    fn start_video(&mut self) -> DriverResult<()> {
        let mut guard = lock(&self.state);
        let streamer = guard
            .streamer
            .as_mut()
            .ok_or_else(|| DriverError::StreamFailed("device closed".to_string()))?;
        let (video_rx, depth_rx) = streamer
            .start(VideoFormat::Bayer, Resolution::Medium, DepthFormat::Depth11Bit)
            .map_err(|e| DriverError::StreamFailed(e.to_string()))?;
        guard.video_rx = Some(video_rx);
        guard.depth_rx = Some(depth_rx);
        Ok(())
    }

    fn start_depth(&mut self) -> DriverResult<()> {
        let mut guard = lock(&self.state);
        if guard.depth_rx.is_none() {
            return Err(DriverError::StreamFailed(
                "depth is delivered only while video streams".to_string(),
            ));
        }
        guard.depth_enabled = true;
        Ok(())
    }

    fn stop_video(&mut self) -> DriverResult<()> {
        Self::stop_streamer(&mut lock(&self.state));
        Ok(())
    }

    fn stop_depth(&mut self) -> DriverResult<()> {
        lock(&self.state).depth_enabled = false;
        Ok(())
    }

    fn set_flag(&mut self, flag: DeviceFlag, _enabled: bool) -> DriverResult<()> {
        Err(DriverError::Unsupported(format!("flag {:?}", flag)))
    }

    fn close(self: Box<Self>) {
        let mut guard = lock(&self.state);
        Self::stop_streamer(&mut guard);
        guard.video_callback = None;
        guard.depth_callback = None;
        guard.video_buffer = None;
        guard.depth_buffer = None;
        debug!("freedepth device closed");
    }
}
