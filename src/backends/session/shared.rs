// SPDX-License-Identifier: GPL-3.0-only

//! State shared between the driver callbacks, the background task and the
//! consumer
//!
//! One mutex guards the front buffers, the pending-update flags and the
//! pending flag settings. Every critical section is O(1): buffers change
//! hands with `mem::replace`/`mem::swap`, never by copying pixels.
//!
//! Each stream cycles three buffers:
//!
//! ```text
//!   driver ──fills── back ──callback swap──▶ front ──update() swap──▶ published
//!      ▲                                       │                         │
//!      └──────────── old front (returned) ◀────┘◀── old published ───────┘
//! ```
//!
//! The driver owns the back buffer, the lock owns the front buffer and the
//! consumer owns the published buffer, so nobody ever reads a buffer while
//! another thread writes it.

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread;

use tracing::trace;

use super::state::{AtomicSessionState, SessionState};
use crate::backends::driver::{
    DepthCallback, DeviceFlag, FrameCallback, FrameMode, PixelBuffer, VideoCallback,
};

/// Front buffer and pending flag of one stream
pub(crate) struct StreamSlot<T> {
    front: PixelBuffer<T>,
    needs_update: bool,
}

impl<T: Copy + Default> StreamSlot<T> {
    fn empty() -> Self {
        Self {
            front: PixelBuffer::new(0, 0, 0),
            needs_update: false,
        }
    }

    /// Install a new front buffer and forget any pending frame
    fn reset(&mut self, front: PixelBuffer<T>) {
        self.front = front;
        self.needs_update = false;
    }

    /// Accept a filled buffer from the driver, returning the next write target
    ///
    /// After a mode change the returned buffer may still have the old shape;
    /// see [`fit_write_target`].
    fn swap_in(&mut self, filled: PixelBuffer<T>) -> PixelBuffer<T> {
        let back = mem::replace(&mut self.front, filled);
        self.needs_update = true;
        back
    }

    /// Swap the pending front buffer with `published`
    ///
    /// Returns false when there is nothing new. When the consumer's buffer
    /// predates a mode change it lands in the front slot with the old shape,
    /// and the next callback replaces it outside the lock.
    fn take_pending(&mut self, published: &mut PixelBuffer<T>) -> bool {
        if !self.needs_update {
            return false;
        }
        mem::swap(&mut self.front, published);
        self.needs_update = false;
        true
    }
}

/// Make sure the driver never writes into a buffer shaped for another mode
///
/// Runs after the session lock is released, so the allocation for the first
/// frame of a new mode happens on the driver thread without blocking the
/// consumer.
fn fit_write_target<T: Copy + Default>(
    back: PixelBuffer<T>,
    width: u32,
    height: u32,
    channels: usize,
) -> PixelBuffer<T> {
    if back.width == width && back.height == height && back.channels == channels {
        back
    } else {
        trace!(width, height, channels, "Replacing write target left over from a previous mode");
        PixelBuffer::new(width, height, channels)
    }
}

/// Everything guarded by the session lock
pub(crate) struct FrameState {
    video: StreamSlot<u8>,
    depth: StreamSlot<u16>,
    video_mode: Option<FrameMode>,
    depth_mode: Option<FrameMode>,
    pending_flags: BTreeMap<DeviceFlag, bool>,
}

/// Counters reported through [`SessionStats`]
#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    depth_frames: AtomicU64,
    video_dropped: AtomicU64,
    depth_dropped: AtomicU64,
    device_opens: AtomicU64,
}

/// Snapshot of session activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames swapped in by the video callback
    pub video_frames: u64,
    /// Frames swapped in by the depth callback
    pub depth_frames: u64,
    /// Video frames dropped because the lock stayed busy
    pub video_dropped: u64,
    /// Depth frames dropped because the lock stayed busy
    pub depth_dropped: u64,
    /// Successful device opens
    pub device_opens: u64,
}

pub(crate) struct SessionShared {
    frames: Mutex<FrameState>,
    state: AtomicSessionState,
    is_open: AtomicBool,
    is_new_video: AtomicBool,
    is_new_depth: AtomicBool,
    counters: Counters,
    lock_attempts: u32,
}

/// Result of one `update()` critical section
pub(crate) struct Published {
    pub video: bool,
    pub depth: bool,
}

impl SessionShared {
    pub(crate) fn new(lock_attempts: u32) -> Self {
        Self {
            frames: Mutex::new(FrameState {
                video: StreamSlot::empty(),
                depth: StreamSlot::empty(),
                video_mode: None,
                depth_mode: None,
                pending_flags: BTreeMap::new(),
            }),
            state: AtomicSessionState::new(SessionState::Idle),
            is_open: AtomicBool::new(false),
            is_new_video: AtomicBool::new(false),
            is_new_depth: AtomicBool::new(false),
            counters: Counters::default(),
            lock_attempts: lock_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bounded wait for the lock, used from the driver's thread
    fn try_lock_bounded(&self) -> Option<MutexGuard<'_, FrameState>> {
        for _ in 0..self.lock_attempts {
            match self.frames.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => thread::yield_now(),
            }
        }
        None
    }

    // ===== Lifecycle =====

    pub(crate) fn state(&self) -> SessionState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        trace!(%state, "Session state");
        self.state.store(state);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.is_open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn record_open(&self) {
        self.counters.device_opens.fetch_add(1, Ordering::SeqCst);
    }

    // ===== Background task side =====

    /// Size the front buffers for freshly negotiated modes and hand back the
    /// matching back buffers for the driver
    pub(crate) fn prepare_buffers(
        &self,
        video_mode: FrameMode,
        depth_mode: FrameMode,
    ) -> (PixelBuffer<u8>, PixelBuffer<u16>) {
        let video_front = PixelBuffer::for_mode(&video_mode);
        let depth_front = PixelBuffer::for_mode(&depth_mode);
        {
            let mut frames = self.lock();
            frames.video_mode = Some(video_mode);
            frames.depth_mode = Some(depth_mode);
            frames.video.reset(video_front);
            frames.depth.reset(depth_front);
        }
        (
            PixelBuffer::for_mode(&video_mode),
            PixelBuffer::for_mode(&depth_mode),
        )
    }

    /// Take all queued flag settings
    pub(crate) fn take_pending_flags(&self) -> BTreeMap<DeviceFlag, bool> {
        mem::take(&mut self.lock().pending_flags)
    }

    // ===== Driver callback side =====

    fn on_video_frame(&self, filled: PixelBuffer<u8>) -> PixelBuffer<u8> {
        let (width, height, channels) = (filled.width, filled.height, filled.channels);
        match self.try_lock_bounded() {
            Some(mut frames) => {
                let back = frames.video.swap_in(filled);
                self.is_new_video.store(false, Ordering::SeqCst);
                drop(frames);
                self.counters.video_frames.fetch_add(1, Ordering::Relaxed);
                fit_write_target(back, width, height, channels)
            }
            None => {
                self.counters.video_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Session lock busy, video frame dropped");
                filled
            }
        }
    }

    fn on_depth_frame(&self, filled: PixelBuffer<u16>) -> PixelBuffer<u16> {
        let (width, height, channels) = (filled.width, filled.height, filled.channels);
        match self.try_lock_bounded() {
            Some(mut frames) => {
                let back = frames.depth.swap_in(filled);
                self.is_new_depth.store(false, Ordering::SeqCst);
                drop(frames);
                self.counters.depth_frames.fetch_add(1, Ordering::Relaxed);
                fit_write_target(back, width, height, channels)
            }
            None => {
                self.counters.depth_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Session lock busy, depth frame dropped");
                filled
            }
        }
    }

    // ===== Consumer side =====

    pub(crate) fn modes(&self) -> (Option<FrameMode>, Option<FrameMode>) {
        let frames = self.lock();
        (frames.video_mode, frames.depth_mode)
    }

    /// Move pending front buffers into the consumer's published buffers and
    /// set the freshness flags for this cycle
    pub(crate) fn publish(
        &self,
        video: &mut PixelBuffer<u8>,
        depth: &mut PixelBuffer<u16>,
    ) -> Published {
        let mut frames = self.lock();
        let video_new = frames.video.take_pending(video);
        let depth_new = frames.depth.take_pending(depth);
        self.is_new_video.store(video_new, Ordering::SeqCst);
        self.is_new_depth.store(depth_new, Ordering::SeqCst);
        Published {
            video: video_new,
            depth: depth_new,
        }
    }

    pub(crate) fn is_frame_new_video(&self) -> bool {
        self.is_new_video.load(Ordering::SeqCst)
    }

    pub(crate) fn is_frame_new_depth(&self) -> bool {
        self.is_new_depth.load(Ordering::SeqCst)
    }

    /// Queue a flag setting; a later value for the same flag replaces it
    pub(crate) fn queue_flag(&self, flag: DeviceFlag, enabled: bool) {
        self.lock().pending_flags.insert(flag, enabled);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            video_frames: c.video_frames.load(Ordering::Relaxed),
            depth_frames: c.depth_frames.load(Ordering::Relaxed),
            video_dropped: c.video_dropped.load(Ordering::Relaxed),
            depth_dropped: c.depth_dropped.load(Ordering::Relaxed),
            device_opens: c.device_opens.load(Ordering::SeqCst),
        }
    }
}

/// Build a stream callback that routes frames to the owning session
///
/// The callback holds only a weak reference: once the session is gone the
/// driver's buffer is handed straight back.
fn stream_callback<T, F>(shared: Weak<SessionShared>, on_frame: F) -> FrameCallback<T>
where
    T: Send + 'static,
    F: Fn(&SessionShared, PixelBuffer<T>) -> PixelBuffer<T> + Send + 'static,
{
    Box::new(move |mut filled: PixelBuffer<T>, timestamp: u32| {
        filled.timestamp = timestamp;
        match shared.upgrade() {
            Some(shared) => on_frame(&*shared, filled),
            None => filled,
        }
    })
}

pub(crate) fn video_callback(shared: Weak<SessionShared>) -> VideoCallback {
    stream_callback(shared, SessionShared::on_video_frame)
}

pub(crate) fn depth_callback(shared: Weak<SessionShared>) -> DepthCallback {
    stream_callback(shared, SessionShared::on_depth_frame)
}
