// SPDX-License-Identifier: GPL-3.0-only

//! Background acquisition task
//!
//! One iteration of the outer loop looks for a device, opens it, streams
//! until the stop signal or a fatal event-processing error, then tears the
//! device down again. Transient failures (no device, open failure, stream
//! start failure) back off for the configured retry delay and try again.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use super::shared::{self, SessionShared};
use super::state::SessionState;
use crate::backends::driver::{Driver, DriverContext, DriverDevice};
use crate::backends::frame_loop::{CaptureLoopController, LoopAction, StopSignal};
use crate::config::SessionConfig;
use crate::constants::WORKER_THREAD_NAME;

/// Spawn the background task for a session
pub(crate) fn spawn(
    driver: Arc<dyn Driver>,
    shared: Arc<SessionShared>,
    config: SessionConfig,
) -> std::io::Result<CaptureLoopController> {
    let init_shared = Arc::clone(&shared);
    let mut worker = Worker { shared, config };

    CaptureLoopController::start_with_init(
        WORKER_THREAD_NAME,
        move || {
            driver.init().map_err(|e| {
                error!(driver = driver.name(), error = %e, "Driver init failed, session cannot stream");
                init_shared.set_state(SessionState::Closed);
                e
            })
        },
        move |context: &mut Box<dyn DriverContext>, stop: &StopSignal| {
            worker.poll(context.as_mut(), stop)
        },
    )
}

struct Worker {
    shared: Arc<SessionShared>,
    config: SessionConfig,
}

impl Worker {
    /// One pass of the outer loop
    fn poll(&mut self, context: &mut dyn DriverContext, stop: &StopSignal) -> LoopAction {
        self.shared.set_state(SessionState::Opening);

        let count = context.num_devices().unwrap_or_else(|e| {
            error!(error = %e, "Failed to query device count");
            0
        });
        if count == 0 {
            info!("No devices found");
            return self.back_off(stop);
        }

        let index = self.config.device_index;
        let device = match context.open_device(index) {
            Ok(device) => device,
            Err(e) => {
                error!(device = index, error = %e, "Failed to open device");
                return self.back_off(stop);
            }
        };

        info!(device = index, devices = count, "Device opened");
        self.shared.record_open();

        if !self.stream(context, device, stop) {
            return self.back_off(stop);
        }

        if stop.is_stopped() {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    }

    /// Sleep for the retry delay, stopping early on request
    fn back_off(&self, stop: &StopSignal) -> LoopAction {
        if stop.sleep(self.config.retry_delay(), self.config.stop_poll_interval()) {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    }

    /// Stream from an open device until stopped or the driver fails
    ///
    /// Returns false when the streams could not be started.
    fn stream(
        &mut self,
        context: &mut dyn DriverContext,
        mut device: Box<dyn DriverDevice>,
        stop: &StopSignal,
    ) -> bool {
        self.shared.set_open(true);

        if let Err(e) = device.set_led(self.config.led) {
            warn!(led = ?self.config.led, error = %e, "Failed to set LED");
        }

        let video_mode = device.current_video_mode();
        let depth_mode = device.current_depth_mode();
        let (video_back, depth_back) = self.shared.prepare_buffers(video_mode, depth_mode);
        device.set_video_buffer(video_back);
        device.set_depth_buffer(depth_back);
        device.set_video_callback(shared::video_callback(Arc::downgrade(&self.shared)));
        device.set_depth_callback(shared::depth_callback(Arc::downgrade(&self.shared)));

        if let Err(e) = device.start_video() {
            error!(error = %e, "Failed to start video stream");
            self.shut_down(device, false, false);
            return false;
        }

        if stop.sleep(self.config.settle_delay(), self.config.stop_poll_interval()) {
            self.shut_down(device, true, false);
            return true;
        }

        if let Err(e) = device.start_depth() {
            error!(error = %e, "Failed to start depth stream");
            self.shut_down(device, true, false);
            return false;
        }

        self.shared.set_state(SessionState::Streaming);
        info!(video = %video_mode, depth = %depth_mode, "Streaming started");

        let mut iterations = 0u64;
        while !stop.is_stopped() {
            if let Err(e) = context.process_events() {
                error!(error = %e, "Event processing failed, closing device");
                break;
            }
            self.apply_pending_flags(device.as_mut());
            iterations += 1;
        }
        debug!(iterations, "Event loop finished");

        self.shut_down(device, true, true);
        true
    }

    /// Apply queued flag settings, logging failures one by one
    fn apply_pending_flags(&self, device: &mut dyn DriverDevice) {
        for (flag, enabled) in self.shared.take_pending_flags() {
            match device.set_flag(flag, enabled) {
                Ok(()) => debug!(?flag, enabled, "Device flag applied"),
                Err(e) => warn!(?flag, enabled, error = %e, "Failed to apply device flag"),
            }
        }
    }

    fn shut_down(&self, mut device: Box<dyn DriverDevice>, video: bool, depth: bool) {
        self.shared.set_state(SessionState::Stopping);
        self.shared.set_open(false);

        if depth && let Err(e) = device.stop_depth() {
            warn!(error = %e, "Failed to stop depth stream");
        }
        let settle = self.config.stop_settle_delay();
        if depth && video && !settle.is_zero() {
            thread::sleep(settle);
        }
        if video && let Err(e) = device.stop_video() {
            warn!(error = %e, "Failed to stop video stream");
        }
        device.close();

        let stats = self.shared.stats();
        info!(
            video_frames = stats.video_frames,
            depth_frames = stats.depth_frames,
            video_dropped = stats.video_dropped,
            depth_dropped = stats.depth_dropped,
            "Device closed"
        );
    }
}
