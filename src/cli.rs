// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for depth camera sessions
//!
//! This module provides command-line functionality for:
//! - Listing attached devices
//! - Probing a session and reporting frame statistics

use kinect_session::{DeviceContext, DeviceSession, Driver, SessionConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Consumer cycle of the probe, roughly a 60 Hz display
const PROBE_CYCLE: Duration = Duration::from_millis(16);

/// Print the number of attached devices
pub fn list_devices(driver: &dyn Driver) -> Result<(), Box<dyn std::error::Error>> {
    let context = DeviceContext::shared();
    context.init(driver);
    if !context.is_initialized() {
        return Err(format!("Failed to initialize {} driver", driver.name()).into());
    }

    let count = context.num_devices();
    if count == 0 {
        println!("No devices found.");
        return Ok(());
    }

    println!("Devices ({} driver):", driver.name());
    for index in 0..count {
        println!("  [{}]", index);
    }
    Ok(())
}

/// Open a session, publish frames for `seconds` and print statistics
pub fn probe(
    driver: Arc<dyn Driver>,
    config: SessionConfig,
    seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let mut session = DeviceSession::new(driver, config);
    session.open();
    println!("Probing for {}s (Ctrl+C to stop)...", seconds);

    let start = Instant::now();
    let deadline = start + Duration::from_secs(seconds);
    let mut video_updates = 0u64;
    let mut depth_updates = 0u64;
    let mut last_timestamp = None;

    while Instant::now() < deadline && !interrupted.load(Ordering::SeqCst) {
        session.update();
        if session.is_frame_new_video() {
            video_updates += 1;
            last_timestamp = Some(session.pixels().timestamp);
        }
        if session.is_frame_new_depth() {
            depth_updates += 1;
        }
        thread::sleep(PROBE_CYCLE);
    }

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    let was_open = session.is_open();
    let state = session.state();
    session.close();
    let stats = session.stats();

    println!();
    println!("State:          {} (open: {})", state, was_open);
    if let (Some(video), Some(depth)) = (session.video_mode(), session.depth_mode()) {
        println!("Video mode:     {}", video);
        println!("Depth mode:     {}", depth);
    }
    println!("Device opens:   {}", stats.device_opens);
    println!(
        "Video frames:   {} received, {} dropped, {} published ({:.1} fps)",
        stats.video_frames,
        stats.video_dropped,
        video_updates,
        video_updates as f64 / elapsed
    );
    println!(
        "Depth frames:   {} received, {} dropped, {} published ({:.1} fps)",
        stats.depth_frames,
        stats.depth_dropped,
        depth_updates,
        depth_updates as f64 / elapsed
    );
    if let Some(ts) = last_timestamp {
        println!("Last timestamp: {}", ts);
    }

    Ok(())
}
