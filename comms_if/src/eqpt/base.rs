//! # Base velocity commands

use serde::{Deserialize, Serialize};

/// Velocity command for a differential drive base.
///
/// Published fire-and-forget, the base keeps executing the last command it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelCmd {
    /// Forward speed in meters/second, negative is backwards
    pub linear_ms: f64,

    /// Turn rate about the base's Z+ (upwards) axis in radians/second
    pub angular_rads: f64,
}

impl VelCmd {
    /// Command which stops the base.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Straight line motion at the given speed.
    pub fn linear(linear_ms: f64) -> Self {
        Self {
            linear_ms,
            angular_rads: 0.0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear_ms == 0.0 && self.angular_rads == 0.0
    }
}
