// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::driver::Led;
use crate::constants::{
    DEFAULT_CALLBACK_LOCK_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_SETTLE_DELAY,
    DEFAULT_STOP_POLL_INTERVAL, DEFAULT_STOP_SETTLE_DELAY,
};
use crate::depth_table::DepthCurve;
use crate::errors::ConfigResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Application directory under the user config dir
const CONFIG_DIR: &str = "kinect-session";
const CONFIG_FILE: &str = "config.json";

/// Settings of one device session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Index of the device to open
    pub device_index: usize,
    /// Back-off after "no devices" or a failed open (ms)
    pub retry_delay_ms: u64,
    /// Pause between starting the video and the depth stream (ms)
    pub settle_delay_ms: u64,
    /// Pause between stopping the depth and the video stream (ms, 0 = none)
    pub stop_settle_delay_ms: u64,
    /// Granularity at which sleeping background work notices a stop (ms)
    pub stop_poll_interval_ms: u64,
    /// How often a driver callback retries the session lock before dropping
    /// its frame
    pub callback_lock_attempts: u32,
    /// LED colour set when the device opens
    pub led: Led,
    /// Raw depth to display range transform
    pub depth_curve: DepthCurve,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            stop_settle_delay_ms: DEFAULT_STOP_SETTLE_DELAY.as_millis() as u64,
            stop_poll_interval_ms: DEFAULT_STOP_POLL_INTERVAL.as_millis() as u64,
            callback_lock_attempts: DEFAULT_CALLBACK_LOCK_ATTEMPTS,
            led: Led::default(),
            depth_curve: DepthCurve::default(),
        }
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stop_settle_delay(&self) -> Duration {
        Duration::from_millis(self.stop_settle_delay_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    /// Default location of the config file, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Read a config file; missing keys take their defaults
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded session config");
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "Saved session config");
        Ok(())
    }

    /// Load from `path` (or the default location), falling back to defaults
    ///
    /// A missing file is silent; an unreadable or malformed one is logged.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Using default session config");
            Self::default()
        })
    }
}
