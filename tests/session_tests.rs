// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the device session against the simulated sensor

use kinect_session::{
    DeviceFlag, DeviceSession, Led, SessionConfig, SessionState, SimulatedDriver,
    SimulatorConfig, Surface,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config() -> SessionConfig {
    SessionConfig {
        retry_delay_ms: 20,
        settle_delay_ms: 1,
        stop_poll_interval_ms: 1,
        ..SessionConfig::default()
    }
}

fn session_with(driver: &SimulatedDriver, config: SessionConfig) -> DeviceSession {
    DeviceSession::new(Arc::new(driver.clone()), config)
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

fn all_equal<T: PartialEq>(samples: &[T]) -> bool {
    samples.windows(2).all(|pair| pair[0] == pair[1])
}

#[test]
fn test_no_devices_keeps_polling_at_retry_rate() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    driver.set_device_count(0);
    let config = SessionConfig {
        retry_delay_ms: 50,
        ..fast_config()
    };
    let mut session = session_with(&driver, config);

    session.open();
    thread::sleep(Duration::from_millis(300));

    assert!(!session.is_open());
    assert_eq!(session.state(), SessionState::Opening);
    let stats = driver.stats();
    assert_eq!(stats.open_calls, 0);
    assert!(stats.num_devices_calls >= 1);
    // One query per retry delay, plus slack for scheduling
    assert!(
        stats.num_devices_calls <= 300 / 50 + 2,
        "polled {} times",
        stats.num_devices_calls
    );

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_device_plugged_in_later_is_opened() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    driver.set_device_count(0);
    let mut session = session_with(&driver, fast_config());

    session.open();
    thread::sleep(Duration::from_millis(50));
    assert!(!session.is_open());

    driver.set_device_count(1);
    assert!(wait_until(|| session.is_open()));
    assert_eq!(driver.stats().last_led, Some(Led::Green));
}

#[test]
fn test_duplicate_open_is_ignored() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    let mut session = session_with(&driver, fast_config());

    session.open();
    assert!(wait_until(|| session.state() == SessionState::Streaming));
    let before = driver.stats();

    session.open();
    thread::sleep(Duration::from_millis(50));

    let after = driver.stats();
    assert_eq!(after.init_calls, before.init_calls);
    assert_eq!(after.open_calls, before.open_calls);
    assert_eq!(session.stats().device_opens, 1);
    assert_eq!(session.state(), SessionState::Streaming);
    // The first task keeps streaming
    assert!(after.video_frames > before.video_frames);
}

#[test]
fn test_published_frames_are_never_torn() {
    let mut sim = SimulatorConfig::small();
    sim.frame_interval = Duration::ZERO;
    let driver = SimulatedDriver::new(sim);
    let config = SessionConfig {
        callback_lock_attempts: 4,
        ..fast_config()
    };
    let mut session = session_with(&driver, config);
    session.open();

    let mut video_checked = 0;
    let mut depth_checked = 0;
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        session.update();
        if session.is_frame_new_video() {
            assert!(all_equal(session.pixels().as_slice()), "torn video frame");
            video_checked += 1;
        }
        if session.is_frame_new_depth() {
            assert!(all_equal(session.depth_pixels().as_slice()), "torn depth frame");
            depth_checked += 1;
        }
    }
    session.close();

    assert!(video_checked > 0);
    assert!(depth_checked > 0);
}

#[test]
fn test_frame_new_is_a_single_cycle_pulse() {
    let mut sim = SimulatorConfig::small();
    sim.manual_frames = true;
    let driver = SimulatedDriver::new(sim);
    let mut session = session_with(&driver, fast_config());
    session.open();
    assert!(wait_until(|| session.state() == SessionState::Streaming));

    session.update();
    assert!(!session.is_frame_new());

    driver.queue_frames(1, 0);
    assert!(wait_until(|| session.stats().video_frames == 1));

    session.update();
    assert!(session.is_frame_new_video());
    assert!(!session.is_frame_new_depth());
    assert!(session.is_frame_new());

    session.update();
    assert!(!session.is_frame_new_video());
    assert!(!session.is_frame_new());

    driver.queue_frames(0, 1);
    assert!(wait_until(|| session.stats().depth_frames == 1));
    session.update();
    assert!(session.is_frame_new_depth());
    assert!(!session.is_frame_new_video());
    session.update();
    assert!(!session.is_frame_new_depth());
}

#[test]
fn test_flags_last_write_wins_and_failures_are_isolated() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    driver.fail_flag(DeviceFlag::RawColor);
    let mut session = session_with(&driver, fast_config());

    // Queued before the task exists, drained after the device opens
    session.apply_flag(DeviceFlag::MirrorDepth, true);
    session.apply_flag(DeviceFlag::RawColor, true);
    session.apply_flag(DeviceFlag::MirrorDepth, false);
    session.apply_flag(DeviceFlag::NearMode, true);

    session.open();
    assert!(wait_until(|| driver.stats().applied_flags.len() >= 2));
    thread::sleep(Duration::from_millis(20));

    assert_eq!(
        driver.stats().applied_flags,
        vec![(DeviceFlag::MirrorDepth, false), (DeviceFlag::NearMode, true)]
    );
    assert!(session.is_open());
}

#[test]
fn test_flag_sender_from_another_thread() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    let mut session = session_with(&driver, fast_config());
    session.open();
    assert!(wait_until(|| session.state() == SessionState::Streaming));

    let sender = session.flag_sender();
    thread::spawn(move || sender.apply_flag(DeviceFlag::AutoExposure, false))
        .join()
        .unwrap();

    assert!(wait_until(|| {
        driver
            .stats()
            .applied_flags
            .contains(&(DeviceFlag::AutoExposure, false))
    }));
}

#[test]
fn test_close_stops_callbacks_across_reopen_cycles() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    let mut session = session_with(&driver, fast_config());

    for cycle in 0..5u64 {
        let frames_before = session.stats().video_frames;
        session.open();
        assert!(wait_until(|| session.stats().video_frames > frames_before));

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());

        let driver_after_close = driver.stats();
        let session_after_close = session.stats();
        assert!(!driver_after_close.video_streaming);
        assert!(!driver_after_close.depth_streaming);
        assert_eq!(driver_after_close.close_calls, cycle + 1);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(driver.stats().video_frames, driver_after_close.video_frames);
        assert_eq!(driver.stats().depth_frames, driver_after_close.depth_frames);
        assert_eq!(session.stats(), session_after_close);
    }
}

#[test]
fn test_drop_stops_the_task() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    {
        let mut session = session_with(&driver, fast_config());
        session.open();
        assert!(wait_until(|| driver.stats().video_frames > 0));
    }
    let frames = driver.stats().video_frames;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(driver.stats().video_frames, frames);
    assert_eq!(driver.stats().close_calls, 1);
}

#[test]
fn test_num_devices_follows_the_sessions_own_driver() {
    let first = SimulatedDriver::new(SimulatorConfig::small());
    first.set_device_count(3);
    let second = SimulatedDriver::new(SimulatorConfig::small());
    second.set_device_count(5);

    let mut first_session = session_with(&first, fast_config());
    let second_session = session_with(&second, fast_config());
    first_session.open();

    assert_eq!(first_session.num_devices(), 3);
    assert_eq!(second_session.num_devices(), 5);

    second.set_device_count(0);
    assert_eq!(second_session.num_devices(), 0);
    assert_eq!(first_session.num_devices(), 3);
}

#[test]
fn test_open_failures_are_retried() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    driver.fail_next_opens(2);
    let mut session = session_with(&driver, fast_config());

    session.open();
    assert!(wait_until(|| session.is_open()));

    let stats = driver.stats();
    assert_eq!(stats.open_calls, 3);
    assert_eq!(stats.open_successes, 1);
    assert_eq!(session.stats().device_opens, 1);
}

#[test]
fn test_event_failure_reopens_device() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    let mut session = session_with(&driver, fast_config());
    session.open();
    assert!(wait_until(|| session.state() == SessionState::Streaming));

    driver.fail_next_events();
    assert!(wait_until(|| session.stats().device_opens == 2));
    assert!(driver.stats().close_calls >= 1);
    assert!(wait_until(|| session.is_open()));
}

#[test]
fn test_init_failure_closes_session_until_reopened() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    driver.set_fail_init(true);
    let mut session = session_with(&driver, fast_config());

    session.open();
    assert!(wait_until(|| session.state() == SessionState::Closed));
    thread::sleep(Duration::from_millis(20));
    assert!(!session.is_open());
    assert_eq!(driver.stats().open_calls, 0);

    driver.set_fail_init(false);
    session.open();
    assert!(wait_until(|| session.is_open()));
}

#[test]
fn test_surfaces_follow_negotiated_modes() {
    let driver = SimulatedDriver::new(SimulatorConfig::small());
    let mut session = session_with(&driver, fast_config());
    assert_eq!(session.width(), 0);

    session.open();
    assert!(wait_until(|| {
        session.update();
        session.video_surface().uploads() > 0 && session.depth_surface().uploads() > 0
    }));

    assert_eq!((session.width(), session.height()), (32, 24));
    assert_eq!(session.video_surface().width(), 32);
    assert_eq!(session.depth_surface().height(), 24);

    session.draw_depth_sized(0.0, 0.0, 64.0, 48.0);
    let rect = session.depth_surface().last_draw().unwrap();
    assert_eq!((rect.width, rect.height), (64.0, 48.0));
}
