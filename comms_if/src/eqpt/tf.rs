//! # Transform and pose messages
//!
//! Messages carried by the transform stream and the dock pose sensor stream. Rotations are unit
//! quaternions stored as `[x, y, z, w]`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A position and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseMsg {
    /// Position in meters
    pub position_m: [f64; 3],

    /// Orientation quaternion, `[x, y, z, w]`
    pub orientation_q: [f64; 4],
}

/// A pose expressed in a named frame at a given time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStampedMsg {
    /// Frame the pose is expressed in
    pub frame_id: String,

    /// Time at which the pose is valid
    pub stamp: DateTime<Utc>,

    pub pose: PoseMsg,
}

/// The transform of `child_frame` relative to `parent_frame`.
///
/// Equivalently, the pose of the child frame's origin expressed in the parent frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStampedMsg {
    pub parent_frame: String,

    pub child_frame: String,

    /// Time at which the transform is valid. Ignored for static transforms.
    pub stamp: DateTime<Utc>,

    pub translation_m: [f64; 3],

    /// Rotation quaternion, `[x, y, z, w]`
    pub rotation_q: [f64; 4],

    /// Static transforms never change and are valid at any time
    #[serde(default)]
    pub is_static: bool,
}

/// A batch of transforms published together on the transform stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TfMsg {
    pub transforms: Vec<TransformStampedMsg>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PoseMsg {
    /// The origin with no rotation.
    pub fn identity() -> Self {
        Self {
            position_m: [0.0; 3],
            orientation_q: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Default for PoseMsg {
    fn default() -> Self {
        Self::identity()
    }
}
