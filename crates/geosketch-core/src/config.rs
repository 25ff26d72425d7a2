//! Session configuration.
//!
//! Every tunable of an interaction session lives here so hosts can adjust
//! thresholds (selection capacity, debounce delay, snap radii, minimum vertex
//! counts) without touching the state machine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of features that can be selected at once.
pub const DEFAULT_MAX_SELECTION_SIZE: usize = 1;

/// Default quiet period before a pending save is executed, in milliseconds.
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1000;

/// Pointer device the session is driven by. Touch input gets larger snap radii.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDevice {
    #[default]
    Mouse,
    Touch,
}

/// Minimum number of distinct vertices per geometry family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinPoints {
    pub point: usize,
    pub line: usize,
    pub polygon: usize,
}

impl Default for MinPoints {
    fn default() -> Self {
        Self {
            point: 1,
            line: 2,
            polygon: 3,
        }
    }
}

/// Configuration of one interaction session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound of the selection set.
    pub max_selection_size: usize,
    /// Debounce delay for persistence, in milliseconds.
    pub save_debounce_ms: u64,
    /// Snap radius in pixels for mouse input.
    pub snap_tolerance_mouse_px: f64,
    /// Snap radius in pixels for touch input.
    pub snap_tolerance_touch_px: f64,
    /// Radius in pixels used to find features under the pointer.
    pub hit_tolerance_px: f64,
    /// Minimum on-screen length of one partition step of a measurement.
    pub partition_min_pixels: f64,
    /// Active pointer device.
    pub device: InputDevice,
    /// Allow selecting and modifying existing features.
    pub modify_enabled: bool,
    /// Validity thresholds per geometry family.
    pub min_points: MinPoints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_selection_size: DEFAULT_MAX_SELECTION_SIZE,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            snap_tolerance_mouse_px: 12.0,
            snap_tolerance_touch_px: 24.0,
            hit_tolerance_px: 5.0,
            partition_min_pixels: 20.0,
            device: InputDevice::Mouse,
            modify_enabled: true,
            min_points: MinPoints::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Debounce delay as a [`Duration`].
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Snap radius for the configured input device.
    pub fn snap_tolerance(&self) -> f64 {
        match self.device {
            InputDevice::Mouse => self.snap_tolerance_mouse_px,
            InputDevice::Touch => self.snap_tolerance_touch_px,
        }
    }
}
