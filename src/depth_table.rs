// SPDX-License-Identifier: GPL-3.0-only

//! Raw depth to display range lookup
//!
//! The sensor reports 11-bit disparity values. Before a depth frame is
//! published it is rewritten through a 2048-entry table that maps every raw
//! value into the full 16-bit range. The last entry (2047) is the sensor's
//! "no data" marker and always maps to 0, whatever curve fills the rest.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CURVE_MULTIPLY, DEFAULT_CURVE_POWER, DEPTH_NO_DATA, DEPTH_TABLE_MAX, DEPTH_TABLE_SIZE,
};

/// Shape of the curve used to fill a [`DepthLookupTable`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DepthCurve {
    /// Uniform ramp from 0 to 65535
    Linear,
    /// `((i / 2047) ^ power) * multiply * 65535`, clamped to 65535
    Exponential { power: f32, multiply: f32 },
}

impl Default for DepthCurve {
    fn default() -> Self {
        DepthCurve::Exponential {
            power: DEFAULT_CURVE_POWER,
            multiply: DEFAULT_CURVE_MULTIPLY,
        }
    }
}

/// Precomputed raw-depth lookup table
#[derive(Clone)]
pub struct DepthLookupTable {
    table: Box<[u16; DEPTH_TABLE_SIZE]>,
}

impl DepthLookupTable {
    /// Build a table filled with the given curve
    pub fn with_curve(curve: DepthCurve) -> Self {
        let mut table = Self {
            table: Box::new([0; DEPTH_TABLE_SIZE]),
        };
        table.generate(curve);
        table
    }

    /// Refill the table with the given curve
    pub fn generate(&mut self, curve: DepthCurve) {
        match curve {
            DepthCurve::Linear => self.generate_linear(),
            DepthCurve::Exponential { power, multiply } => {
                self.generate_exponential(power, multiply)
            }
        }
    }

    /// Fill with a uniform ramp: `table[i] = round(i * 65535 / 2047)`
    pub fn generate_linear(&mut self) {
        let last = (DEPTH_TABLE_SIZE - 1) as u32;
        for (i, entry) in self.table.iter_mut().enumerate() {
            let scaled = i as u32 * DEPTH_TABLE_MAX as u32;
            *entry = ((scaled + last / 2) / last) as u16;
        }
        self.table[DEPTH_NO_DATA as usize] = 0;
    }

    /// Fill with `round(((i / 2047) ^ power) * multiply * 65535)`
    ///
    /// Values past 65535 saturate, so with `multiply > 1` the far end of the
    /// range flattens out at full scale.
    pub fn generate_exponential(&mut self, power: f32, multiply: f32) {
        let last = (DEPTH_TABLE_SIZE - 1) as f64;
        let power = power as f64;
        let scale = multiply as f64 * DEPTH_TABLE_MAX as f64;
        for (i, entry) in self.table.iter_mut().enumerate() {
            let v = (i as f64 / last).powf(power) * scale;
            *entry = v.round().clamp(0.0, DEPTH_TABLE_MAX as f64) as u16;
        }
        self.table[DEPTH_NO_DATA as usize] = 0;
    }

    /// Rewrite every sample in place through the table
    ///
    /// Samples must lie in `0..=2047`. Anything larger indexes past the table
    /// and panics; callers hand in raw sensor data only.
    pub fn apply(&self, samples: &mut [u16]) {
        for sample in samples.iter_mut() {
            *sample = self.table[*sample as usize];
        }
    }

    /// Look up a single raw sample
    pub fn get(&self, raw: u16) -> u16 {
        self.table[raw as usize]
    }

    /// The full table
    pub fn as_slice(&self) -> &[u16] {
        &self.table[..]
    }
}

impl Default for DepthLookupTable {
    fn default() -> Self {
        Self::with_curve(DepthCurve::default())
    }
}

impl std::fmt::Debug for DepthLookupTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DepthLookupTable([{}, {}, .., {}, {}])",
            self.table[0],
            self.table[1],
            self.table[DEPTH_TABLE_SIZE - 2],
            self.table[DEPTH_TABLE_SIZE - 1]
        )
    }
}
