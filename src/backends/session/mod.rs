// SPDX-License-Identifier: GPL-3.0-only

//! Asynchronous depth camera session
//!
//! A [`DeviceSession`] owns one background task that finds, opens and
//! streams a device, reopening it after unplugs or driver failures. The
//! consumer calls [`DeviceSession::update`] once per cycle to publish the
//! newest complete frames onto its surfaces and then reads or draws them.
//!
//! None of the methods return errors. Failures are logged and show up as
//! observable state: [`DeviceSession::is_open`] stays false, or
//! [`DeviceSession::is_frame_new`] never turns true.

mod shared;
mod state;
mod worker;

pub use shared::SessionStats;
pub use state::SessionState;

use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{debug, error, info};

use self::shared::SessionShared;
use crate::backends::context::DeviceContext;
use crate::backends::driver::{DeviceFlag, Driver, FrameMode, PixelBuffer};
use crate::backends::frame_loop::CaptureLoopController;
use crate::config::SessionConfig;
use crate::depth_table::DepthLookupTable;
use crate::surface::{DrawRect, PixelSurface, Surface, SurfaceFormat};

/// One depth camera streamed on a background thread
pub struct DeviceSession<S: Surface = PixelSurface> {
    driver: Arc<dyn Driver>,
    config: SessionConfig,
    shared: Arc<SessionShared>,
    worker: Option<CaptureLoopController>,
    /// Thread that created the session; only it touches the shared context
    owner: ThreadId,
    /// Set once this session's driver initialized the shared context
    owns_shared_context: bool,
    depth_table: DepthLookupTable,
    published_video: PixelBuffer<u8>,
    published_depth: PixelBuffer<u16>,
    video_surface: S,
    depth_surface: S,
}

impl DeviceSession<PixelSurface> {
    /// Create a session publishing into in-memory surfaces
    pub fn new(driver: Arc<dyn Driver>, config: SessionConfig) -> Self {
        Self::with_surfaces(driver, config, PixelSurface::new(), PixelSurface::new())
    }
}

impl<S: Surface> DeviceSession<S> {
    /// Create a session publishing into caller-provided surfaces
    pub fn with_surfaces(
        driver: Arc<dyn Driver>,
        config: SessionConfig,
        video_surface: S,
        depth_surface: S,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(config.callback_lock_attempts)),
            depth_table: DepthLookupTable::with_curve(config.depth_curve),
            driver,
            config,
            worker: None,
            owner: thread::current().id(),
            owns_shared_context: false,
            published_video: PixelBuffer::new(0, 0, 0),
            published_depth: PixelBuffer::new(0, 0, 0),
            video_surface,
            depth_surface,
        }
    }

    /// Start the background task
    ///
    /// A second call while the task is running is logged and ignored.
    pub fn open(&mut self) {
        if thread::current().id() == self.owner {
            let context = DeviceContext::shared();
            if !context.is_initialized() && context.init(self.driver.as_ref()) {
                self.owns_shared_context = true;
            }
        }

        if let Some(worker) = &self.worker
            && worker.is_running()
        {
            error!(state = %self.shared.state(), "Session already open, ignoring duplicate open request");
            return;
        }

        // A task that exited on its own (driver init failure) is reaped here
        if let Some(mut finished) = self.worker.take() {
            finished.join();
        }

        self.shared.set_state(SessionState::Starting);
        match worker::spawn(
            Arc::clone(&self.driver),
            Arc::clone(&self.shared),
            self.config.clone(),
        ) {
            Ok(controller) => {
                info!(driver = self.driver.name(), device = self.config.device_index, "Session opening");
                self.worker = Some(controller);
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn session thread");
                self.shared.set_state(SessionState::Closed);
            }
        }
    }

    /// Stop the background task and wait for it to exit
    ///
    /// No callback fires for this session after `close` returns.
    pub fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            self.shared.set_open(false);
            self.shared.set_state(SessionState::Closed);
            debug!("Session closed");
        }
    }

    /// Publish the newest complete frames
    ///
    /// Call once per consumer cycle. Afterwards `is_frame_new_*` report
    /// whether this call published a new frame on each stream.
    pub fn update(&mut self) {
        if self.shared.is_open() {
            self.allocate_surfaces();
        }

        let published = self
            .shared
            .publish(&mut self.published_video, &mut self.published_depth);

        if published.video && self.video_surface.is_allocated() {
            self.video_surface.load_rgb8(&self.published_video);
        }
        if published.depth {
            self.depth_table.apply(self.published_depth.as_mut_slice());
            if self.depth_surface.is_allocated() {
                self.depth_surface.load_gray16(&self.published_depth);
            }
        }
    }

    fn allocate_surfaces(&mut self) {
        if self.video_surface.is_allocated() && self.depth_surface.is_allocated() {
            return;
        }
        let (video_mode, depth_mode) = self.shared.modes();
        if let Some(mode) = video_mode
            && !self.video_surface.is_allocated()
        {
            self.video_surface
                .allocate(mode.width, mode.height, SurfaceFormat::Rgb8);
        }
        if let Some(mode) = depth_mode
            && !self.depth_surface.is_allocated()
        {
            self.depth_surface
                .allocate(mode.width, mode.height, SurfaceFormat::Gray16);
        }
    }

    // ===== State =====

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True if the last `update` published a new video or depth frame
    pub fn is_frame_new(&self) -> bool {
        self.is_frame_new_video() || self.is_frame_new_depth()
    }

    pub fn is_frame_new_video(&self) -> bool {
        self.shared.is_frame_new_video()
    }

    pub fn is_frame_new_depth(&self) -> bool {
        self.shared.is_frame_new_depth()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Devices visible to this session's driver
    ///
    /// Answered by the process-wide context when this session initialized
    /// it. Otherwise that context may belong to another driver, and a
    /// short-lived context of the session's own driver is asked instead.
    pub fn num_devices(&self) -> usize {
        if self.owns_shared_context {
            return DeviceContext::shared().num_devices();
        }
        match self.driver.init() {
            Ok(context) => context.num_devices().unwrap_or_else(|e| {
                error!(error = %e, "Failed to query device count");
                0
            }),
            Err(e) => {
                error!(driver = self.driver.name(), error = %e, "Failed to initialize driver for device count");
                0
            }
        }
    }

    // ===== Frames =====

    pub fn video_mode(&self) -> Option<FrameMode> {
        self.shared.modes().0
    }

    pub fn depth_mode(&self) -> Option<FrameMode> {
        self.shared.modes().1
    }

    /// Width of the video stream, 0 before the first device was opened
    pub fn width(&self) -> u32 {
        self.video_mode().map(|m| m.width).unwrap_or(0)
    }

    /// Height of the video stream, 0 before the first device was opened
    pub fn height(&self) -> u32 {
        self.video_mode().map(|m| m.height).unwrap_or(0)
    }

    /// Last published RGB frame
    pub fn pixels(&self) -> &PixelBuffer<u8> {
        &self.published_video
    }

    /// Last published depth frame, already run through the lookup table
    pub fn depth_pixels(&self) -> &PixelBuffer<u16> {
        &self.published_depth
    }

    pub fn video_surface(&self) -> &S {
        &self.video_surface
    }

    pub fn depth_surface(&self) -> &S {
        &self.depth_surface
    }

    // ===== Drawing =====

    /// Draw the video surface at its native size
    pub fn draw(&mut self, x: f32, y: f32) {
        let (w, h) = (self.video_surface.width(), self.video_surface.height());
        self.draw_sized(x, y, w as f32, h as f32);
    }

    pub fn draw_sized(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.video_surface.draw(DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    /// Draw the depth surface at its native size
    pub fn draw_depth(&mut self, x: f32, y: f32) {
        let (w, h) = (self.depth_surface.width(), self.depth_surface.height());
        self.draw_depth_sized(x, y, w as f32, h as f32);
    }

    pub fn draw_depth_sized(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.depth_surface.draw(DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    // ===== Settings =====

    /// Queue a device flag change for the background task
    ///
    /// Changes queued before the task drains them collapse to the last
    /// value per flag. Nothing is applied while no device is open; the
    /// change then waits for the next open.
    pub fn apply_flag(&self, flag: DeviceFlag, enabled: bool) {
        self.shared.queue_flag(flag, enabled);
    }

    /// Handle for queueing flag changes from other threads
    pub fn flag_sender(&self) -> FlagSender {
        FlagSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn depth_table(&self) -> &DepthLookupTable {
        &self.depth_table
    }

    /// Replace the depth transform used by subsequent updates
    pub fn set_depth_table(&mut self, table: DepthLookupTable) {
        self.depth_table = table;
    }
}

impl<S: Surface> Drop for DeviceSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable, thread-safe handle for [`DeviceSession::apply_flag`]
#[derive(Clone)]
pub struct FlagSender {
    shared: Arc<SessionShared>,
}

impl FlagSender {
    pub fn apply_flag(&self, flag: DeviceFlag, enabled: bool) {
        self.shared.queue_flag(flag, enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::driver::{SimulatedDriver, SimulatorConfig};
    use std::time::{Duration, Instant};

    fn fast_config() -> SessionConfig {
        SessionConfig {
            retry_delay_ms: 20,
            settle_delay_ms: 1,
            stop_poll_interval_ms: 1,
            ..SessionConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_new_session_is_idle() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let session = DeviceSession::new(Arc::new(driver), fast_config());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_open());
        assert!(!session.is_frame_new());
        assert_eq!(session.width(), 0);
        assert!(session.pixels().is_empty());
    }

    #[test]
    fn test_update_allocates_surfaces_and_publishes() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let mut session = DeviceSession::new(Arc::new(driver), fast_config());
        session.open();
        assert!(wait_until(|| session.is_open()));

        assert!(wait_until(|| {
            session.update();
            session.is_frame_new_video()
        }));
        assert_eq!(session.width(), 32);
        assert_eq!(session.height(), 24);
        assert_eq!(session.video_surface().format(), Some(SurfaceFormat::Rgb8));
        assert_eq!(session.depth_surface().format(), Some(SurfaceFormat::Gray16));
        assert_eq!(session.pixels().len(), 32 * 24 * 3);

        session.draw(1.0, 2.0);
        let rect = session.video_surface().last_draw().unwrap();
        assert_eq!((rect.width, rect.height), (32.0, 24.0));

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());
    }

    #[test]
    fn test_depth_published_through_table() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let mut session = DeviceSession::new(Arc::new(driver), fast_config());
        session.set_depth_table(DepthLookupTable::with_curve(
            crate::depth_table::DepthCurve::Linear,
        ));
        session.open();
        assert!(wait_until(|| {
            session.update();
            session.is_frame_new_depth()
        }));
        session.close();

        let table = session.depth_table();
        let first = session.depth_pixels().as_slice()[0];
        assert!(table.as_slice().contains(&first));
        assert!(session.depth_pixels().as_slice().iter().all(|&d| d == first));
    }

    #[test]
    fn test_flag_sender_queues_on_session() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let session = DeviceSession::new(Arc::new(driver), fast_config());
        let sender = session.flag_sender();
        thread::spawn(move || sender.apply_flag(DeviceFlag::MirrorVideo, true))
            .join()
            .unwrap();
        let pending = session.shared.take_pending_flags();
        assert_eq!(pending.get(&DeviceFlag::MirrorVideo), Some(&true));
    }
}
