// SPDX-License-Identifier: GPL-3.0-only

//! In-process simulated depth sensor
//!
//! Behaves like a single-bus USB driver: `process_events` delivers at most one
//! video and one depth frame per call and then waits one frame interval.
//! Every sample of a delivered frame carries the same marker (the frame's
//! sequence number), so a consumer that ever sees two different values in
//! one frame has observed a torn buffer.
//!
//! Failure injection (no devices, failing init/open/events/flags) is exposed
//! on [`SimulatedDriver`] so tests can drive every recovery path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::{
    DepthCallback, DeviceFlag, Driver, DriverContext, DriverDevice, FrameCallback, FrameMode,
    Led, PixelBuffer, VideoCallback,
};
use crate::constants::DEPTH_NO_DATA;
use crate::errors::{DriverError, DriverResult};

/// Startup configuration of the simulator
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Number of devices reported by `num_devices`
    pub devices: usize,
    pub video_mode: FrameMode,
    pub depth_mode: FrameMode,
    /// Time `process_events` waits after delivering (or not delivering) frames
    pub frame_interval: Duration,
    /// Only deliver frames queued with [`SimulatedDriver::queue_frames`]
    pub manual_frames: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            video_mode: FrameMode::video_medium(),
            depth_mode: FrameMode::depth_medium(),
            frame_interval: Duration::from_millis(33),
            manual_frames: false,
        }
    }
}

impl SimulatorConfig {
    /// Small frames at a high rate, suited to tests
    pub fn small() -> Self {
        let mut video_mode = FrameMode::video_medium();
        video_mode.width = 32;
        video_mode.height = 24;
        let mut depth_mode = FrameMode::depth_medium();
        depth_mode.width = 32;
        depth_mode.height = 24;
        Self {
            devices: 1,
            video_mode,
            depth_mode,
            frame_interval: Duration::from_millis(1),
            manual_frames: false,
        }
    }
}

/// Snapshot of what the simulator has been asked to do
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorStats {
    pub init_calls: u64,
    pub num_devices_calls: u64,
    pub open_calls: u64,
    pub open_successes: u64,
    pub close_calls: u64,
    pub process_events_calls: u64,
    pub video_frames: u64,
    pub depth_frames: u64,
    pub video_streaming: bool,
    pub depth_streaming: bool,
    pub last_led: Option<Led>,
    /// Flags successfully applied, in order
    pub applied_flags: Vec<(DeviceFlag, bool)>,
}

#[derive(Default)]
struct Counters {
    init_calls: AtomicU64,
    num_devices_calls: AtomicU64,
    open_calls: AtomicU64,
    open_successes: AtomicU64,
    close_calls: AtomicU64,
    process_events_calls: AtomicU64,
    video_frames: AtomicU64,
    depth_frames: AtomicU64,
}

struct SimState {
    config: SimulatorConfig,
    device_count: AtomicUsize,
    fail_init: AtomicBool,
    open_failures_left: AtomicUsize,
    fail_next_events: AtomicBool,
    failing_flags: Mutex<HashSet<DeviceFlag>>,
    queued_video: AtomicUsize,
    queued_depth: AtomicUsize,
    sequence: AtomicU32,
    counters: Counters,
    applied_flags: Mutex<Vec<(DeviceFlag, bool)>>,
    last_led: Mutex<Option<Led>>,
    video_streaming: AtomicBool,
    depth_streaming: AtomicBool,
}

/// Simulated driver handle; clones share the same simulated hardware
#[derive(Clone)]
pub struct SimulatedDriver {
    state: Arc<SimState>,
}

impl SimulatedDriver {
    pub fn new(config: SimulatorConfig) -> Self {
        let devices = config.devices;
        Self {
            state: Arc::new(SimState {
                config,
                device_count: AtomicUsize::new(devices),
                fail_init: AtomicBool::new(false),
                open_failures_left: AtomicUsize::new(0),
                fail_next_events: AtomicBool::new(false),
                failing_flags: Mutex::new(HashSet::new()),
                queued_video: AtomicUsize::new(0),
                queued_depth: AtomicUsize::new(0),
                sequence: AtomicU32::new(0),
                counters: Counters::default(),
                applied_flags: Mutex::new(Vec::new()),
                last_led: Mutex::new(None),
                video_streaming: AtomicBool::new(false),
                depth_streaming: AtomicBool::new(false),
            }),
        }
    }

    /// Plug or unplug simulated devices
    pub fn set_device_count(&self, count: usize) {
        self.state.device_count.store(count, Ordering::SeqCst);
    }

    /// Make every subsequent `init` fail (or succeed again)
    pub fn set_fail_init(&self, fail: bool) {
        self.state.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `open_device`
    pub fn fail_next_opens(&self, count: usize) {
        self.state.open_failures_left.store(count, Ordering::SeqCst);
    }

    /// Make the next `process_events` call return a negative status
    pub fn fail_next_events(&self) {
        self.state.fail_next_events.store(true, Ordering::SeqCst);
    }

    /// Reject every attempt to set `flag`
    pub fn fail_flag(&self, flag: DeviceFlag) {
        self.state
            .failing_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flag);
    }

    /// Queue frames for delivery in manual mode
    pub fn queue_frames(&self, video: usize, depth: usize) {
        self.state.queued_video.fetch_add(video, Ordering::SeqCst);
        self.state.queued_depth.fetch_add(depth, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SimulatorStats {
        let c = &self.state.counters;
        SimulatorStats {
            init_calls: c.init_calls.load(Ordering::SeqCst),
            num_devices_calls: c.num_devices_calls.load(Ordering::SeqCst),
            open_calls: c.open_calls.load(Ordering::SeqCst),
            open_successes: c.open_successes.load(Ordering::SeqCst),
            close_calls: c.close_calls.load(Ordering::SeqCst),
            process_events_calls: c.process_events_calls.load(Ordering::SeqCst),
            video_frames: c.video_frames.load(Ordering::SeqCst),
            depth_frames: c.depth_frames.load(Ordering::SeqCst),
            video_streaming: self.state.video_streaming.load(Ordering::SeqCst),
            depth_streaming: self.state.depth_streaming.load(Ordering::SeqCst),
            last_led: *self
                .state
                .last_led
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            applied_flags: self
                .state
                .applied_flags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl Driver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn init(&self) -> DriverResult<Box<dyn DriverContext>> {
        self.state.counters.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_init.load(Ordering::SeqCst) {
            return Err(DriverError::InitFailed("simulated init failure".to_string()));
        }
        debug!("Simulated driver context created");
        Ok(Box::new(SimContext {
            state: Arc::clone(&self.state),
            streams: None,
        }))
    }
}

struct SimStream<T> {
    buffer: Option<PixelBuffer<T>>,
    callback: Option<FrameCallback<T>>,
    running: bool,
}

impl<T> Default for SimStream<T> {
    fn default() -> Self {
        Self {
            buffer: None,
            callback: None,
            running: false,
        }
    }
}

#[derive(Default)]
struct SimStreams {
    video: SimStream<u8>,
    depth: SimStream<u16>,
    closed: bool,
}

type SharedStreams = Arc<Mutex<SimStreams>>;

fn lock(streams: &SharedStreams) -> std::sync::MutexGuard<'_, SimStreams> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SimContext {
    state: Arc<SimState>,
    streams: Option<SharedStreams>,
}

impl SimContext {
    fn take_queued(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn should_deliver(&self, queued: &AtomicUsize) -> bool {
        !self.state.config.manual_frames || Self::take_queued(queued)
    }

    /// Deliver one frame on a stream, calling the callback without holding
    /// the stream lock.
    fn deliver<T, S>(
        streams: &SharedStreams,
        select: S,
        marker: T,
        timestamp: u32,
        frames: &AtomicU64,
    ) where
        T: Copy + Default,
        S: Fn(&mut SimStreams) -> &mut SimStream<T>,
    {
        let (mut buffer, mut callback) = {
            let mut guard = lock(streams);
            if guard.closed {
                return;
            }
            let stream = select(&mut guard);
            if !stream.running {
                return;
            }
            match (stream.buffer.take(), stream.callback.take()) {
                (Some(buffer), Some(callback)) => (buffer, callback),
                (buffer, callback) => {
                    stream.buffer = buffer;
                    stream.callback = callback;
                    return;
                }
            }
        };

        buffer.fill(marker);
        buffer.timestamp = timestamp;
        let next = callback(buffer, timestamp);
        frames.fetch_add(1, Ordering::SeqCst);

        let mut guard = lock(streams);
        let stream = select(&mut guard);
        stream.buffer = Some(next);
        stream.callback = Some(callback);
    }
}

impl DriverContext for SimContext {
    fn num_devices(&self) -> DriverResult<usize> {
        self.state
            .counters
            .num_devices_calls
            .fetch_add(1, Ordering::SeqCst);
        Ok(self.state.device_count.load(Ordering::SeqCst))
    }

    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn DriverDevice>> {
        self.state.counters.open_calls.fetch_add(1, Ordering::SeqCst);
        if index >= self.state.device_count.load(Ordering::SeqCst) {
            return Err(DriverError::DeviceNotFound(index));
        }
        let failed = self
            .state
            .open_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DriverError::OpenFailed(format!(
                "simulated open failure on device {}",
                index
            )));
        }

        let streams: SharedStreams = Arc::new(Mutex::new(SimStreams::default()));
        self.streams = Some(Arc::clone(&streams));
        self.state
            .counters
            .open_successes
            .fetch_add(1, Ordering::SeqCst);
        debug!(device = index, "Simulated device opened");

        Ok(Box::new(SimDevice {
            state: Arc::clone(&self.state),
            streams,
        }))
    }

    fn process_events(&mut self) -> DriverResult<()> {
        self.state
            .counters
            .process_events_calls
            .fetch_add(1, Ordering::SeqCst);

        if self.state.fail_next_events.swap(false, Ordering::SeqCst) {
            return Err(DriverError::EventsFailed(-1));
        }

        if let Some(streams) = self.streams.clone() {
            if self.should_deliver(&self.state.queued_video) {
                let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
                Self::deliver(
                    &streams,
                    |s| &mut s.video,
                    (seq % 256) as u8,
                    seq,
                    &self.state.counters.video_frames,
                );
            }
            if self.should_deliver(&self.state.queued_depth) {
                let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
                Self::deliver(
                    &streams,
                    |s| &mut s.depth,
                    (seq % DEPTH_NO_DATA as u32) as u16,
                    seq,
                    &self.state.counters.depth_frames,
                );
            }
            if lock(&streams).closed {
                self.streams = None;
            }
        }

        thread::sleep(self.state.config.frame_interval);
        Ok(())
    }
}

struct SimDevice {
    state: Arc<SimState>,
    streams: SharedStreams,
}

impl DriverDevice for SimDevice {
    fn set_led(&mut self, led: Led) -> DriverResult<()> {
        *self
            .state
            .last_led
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(led);
        Ok(())
    }

    fn current_video_mode(&self) -> FrameMode {
        self.state.config.video_mode
    }

    fn current_depth_mode(&self) -> FrameMode {
        self.state.config.depth_mode
    }

    fn set_video_buffer(&mut self, buffer: PixelBuffer<u8>) {
        lock(&self.streams).video.buffer = Some(buffer);
    }

    fn set_depth_buffer(&mut self, buffer: PixelBuffer<u16>) {
        lock(&self.streams).depth.buffer = Some(buffer);
    }

    fn set_video_callback(&mut self, callback: VideoCallback) {
        lock(&self.streams).video.callback = Some(callback);
    }

    fn set_depth_callback(&mut self, callback: DepthCallback) {
        lock(&self.streams).depth.callback = Some(callback);
    }

    fn start_video(&mut self) -> DriverResult<()> {
        lock(&self.streams).video.running = true;
        self.state.video_streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start_depth(&mut self) -> DriverResult<()> {
        lock(&self.streams).depth.running = true;
        self.state.depth_streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_video(&mut self) -> DriverResult<()> {
        lock(&self.streams).video.running = false;
        self.state.video_streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop_depth(&mut self) -> DriverResult<()> {
        lock(&self.streams).depth.running = false;
        self.state.depth_streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_flag(&mut self, flag: DeviceFlag, enabled: bool) -> DriverResult<()> {
        let failing = self
            .state
            .failing_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&flag);
        if failing {
            return Err(DriverError::FlagFailed(format!("{:?} rejected", flag)));
        }
        trace!(?flag, enabled, "Simulated flag applied");
        self.state
            .applied_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((flag, enabled));
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut guard = lock(&self.streams);
        guard.closed = true;
        guard.video = SimStream::default();
        guard.depth = SimStream::default();
        self.state.video_streaming.store(false, Ordering::SeqCst);
        self.state.depth_streaming.store(false, Ordering::SeqCst);
        self.state.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(driver: &SimulatedDriver) -> (Box<dyn DriverContext>, Box<dyn DriverDevice>) {
        let mut ctx = driver.init().unwrap();
        let dev = ctx.open_device(0).unwrap();
        (ctx, dev)
    }

    #[test]
    fn test_open_failures_are_consumed() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        driver.fail_next_opens(2);
        let mut ctx = driver.init().unwrap();
        assert!(ctx.open_device(0).is_err());
        assert!(ctx.open_device(0).is_err());
        assert!(ctx.open_device(0).is_ok());
        assert_eq!(driver.stats().open_calls, 3);
        assert_eq!(driver.stats().open_successes, 1);
    }

    #[test]
    fn test_no_device_index() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        driver.set_device_count(0);
        let mut ctx = driver.init().unwrap();
        assert_eq!(ctx.num_devices().unwrap(), 0);
        assert_eq!(
            ctx.open_device(0).err(),
            Some(DriverError::DeviceNotFound(0))
        );
    }

    #[test]
    fn test_frames_handed_through_callback() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let (mut ctx, mut dev) = open(&driver);
        let mode = dev.current_video_mode();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        dev.set_video_buffer(PixelBuffer::for_mode(&mode));
        dev.set_video_callback(Box::new(move |buffer, ts| {
            let first = buffer.as_slice()[0];
            assert!(buffer.as_slice().iter().all(|&b| b == first));
            seen_cb.lock().unwrap().push(ts);
            buffer
        }));
        // Nothing arrives before the stream starts
        ctx.process_events().unwrap();
        assert!(seen.lock().unwrap().is_empty());

        dev.start_video().unwrap();
        ctx.process_events().unwrap();
        ctx.process_events().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(driver.stats().video_frames, 2);
    }

    #[test]
    fn test_manual_frames_only_when_queued() {
        let mut config = SimulatorConfig::small();
        config.manual_frames = true;
        let driver = SimulatedDriver::new(config);
        let (mut ctx, mut dev) = open(&driver);
        let mode = dev.current_depth_mode();
        dev.set_depth_buffer(PixelBuffer::for_mode(&mode));
        dev.set_depth_callback(Box::new(|buffer, _| buffer));
        dev.start_depth().unwrap();

        ctx.process_events().unwrap();
        assert_eq!(driver.stats().depth_frames, 0);
        driver.queue_frames(0, 1);
        ctx.process_events().unwrap();
        ctx.process_events().unwrap();
        assert_eq!(driver.stats().depth_frames, 1);
    }

    #[test]
    fn test_failing_flag_and_events() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        driver.fail_flag(DeviceFlag::NearMode);
        let (mut ctx, mut dev) = open(&driver);
        assert!(dev.set_flag(DeviceFlag::NearMode, true).is_err());
        assert!(dev.set_flag(DeviceFlag::MirrorDepth, true).is_ok());
        assert_eq!(
            driver.stats().applied_flags,
            vec![(DeviceFlag::MirrorDepth, true)]
        );

        driver.fail_next_events();
        assert_eq!(ctx.process_events(), Err(DriverError::EventsFailed(-1)));
        assert!(ctx.process_events().is_ok());
    }

    #[test]
    fn test_close_stops_delivery() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let (mut ctx, mut dev) = open(&driver);
        let mode = dev.current_video_mode();
        dev.set_video_buffer(PixelBuffer::for_mode(&mode));
        dev.set_video_callback(Box::new(|buffer, _| buffer));
        dev.start_video().unwrap();
        ctx.process_events().unwrap();
        dev.close();
        ctx.process_events().unwrap();
        let stats = driver.stats();
        assert_eq!(stats.video_frames, 1);
        assert_eq!(stats.close_calls, 1);
        assert!(!stats.video_streaming);
    }
}
