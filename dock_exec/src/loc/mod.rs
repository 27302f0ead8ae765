//! # Localisation module
//!
//! Pose types used throughout the dock executable, and conversions to and from the wire format.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::tf::{PoseMsg, PoseStampedMsg};
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Quaternions with a norm below this are treated as unset.
const MIN_QUAT_NORM: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A position and attitude of one frame expressed in another.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// The position in the parent frame
    pub position_m: Vector3<f64>,

    /// The attitude in the parent frame. This is a quaternion that will rotate an object from the
    /// parent frame into the child frame.
    pub attitude_q: UnitQuaternion<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(position_m: Vector3<f64>, attitude_q: UnitQuaternion<f64>) -> Self {
        Self {
            position_m,
            attitude_q,
        }
    }

    /// A pose at the given position with no rotation.
    pub fn from_position(x: f64, y: f64, z: f64) -> Self {
        Self::new(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    /// Build a pose from a wire message.
    ///
    /// The quaternion is normalised. An all-zero quaternion, which an unset message contains, is
    /// read as no rotation.
    pub fn from_msg(msg: &PoseMsg) -> Self {
        let [x, y, z, w] = msg.orientation_q;
        let q = Quaternion::new(w, x, y, z);

        let attitude_q = if q.norm() < MIN_QUAT_NORM {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_quaternion(q)
        };

        Self {
            position_m: Vector3::from(msg.position_m),
            attitude_q,
        }
    }

    pub fn to_msg(&self) -> PoseMsg {
        let c = self.attitude_q.quaternion().coords;

        PoseMsg {
            position_m: [self.position_m.x, self.position_m.y, self.position_m.z],
            orientation_q: [c[0], c[1], c[2], c[3]],
        }
    }

    /// Build a stamped message placing this pose in the given frame.
    pub fn to_stamped_msg(&self, frame_id: &str, stamp: DateTime<Utc>) -> PoseStampedMsg {
        PoseStampedMsg {
            frame_id: frame_id.to_string(),
            stamp,
            pose: self.to_msg(),
        }
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position_m), self.attitude_q)
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self {
            position_m: iso.translation.vector,
            attitude_q: iso.rotation,
        }
    }

    /// Straight line distance between the positions of the two poses.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.position_m - other.position_m).norm()
    }

    /// Return the heading (angle to the positive X axis) in radians.
    pub fn get_heading(&self) -> f64 {
        self.attitude_q.euler_angles().2
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }
}

impl From<&PoseMsg> for Pose {
    fn from(msg: &PoseMsg) -> Self {
        Self::from_msg(msg)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_msg_conversion() {
        let pose = Pose::new(
            Vector3::new(1.0, -2.0, 0.5),
            UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
        );

        let back = Pose::from_msg(&pose.to_msg());

        assert!((back.position_m - pose.position_m).norm() < 1e-12);
        assert!(back.attitude_q.angle_to(&pose.attitude_q) < 1e-12);
        assert!((back.get_heading() - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_unset_quaternion() {
        let msg = PoseMsg {
            position_m: [0.0; 3],
            orientation_q: [0.0; 4],
        };

        assert_eq!(Pose::from_msg(&msg).attitude_q, UnitQuaternion::identity());
    }

    #[test]
    fn test_distance() {
        let a = Pose::from_position(0.0, 0.0, 0.0);
        let b = Pose::from_position(3.0, 4.0, 12.0);

        assert!((a.distance_to(&b) - 13.0).abs() < 1e-12);
    }
}
