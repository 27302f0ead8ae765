//! # Pose Resolver
//!
//! Resolves the robot's pose in the named frames of the transform tree, and keeps track of the
//! DockReady2 pose computed from the live dock detection.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use log::warn;
use nalgebra::{UnitQuaternion, Vector3};

use crate::{
    loc::Pose,
    params::FrameParams,
    tf::{LookupTime, TransformError, TransformLookup},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pose lookups on top of a transform source, using the configured frame names.
#[derive(Clone)]
pub struct PoseResolver {
    tf: Arc<dyn TransformLookup>,

    frames: FrameParams,
}

/// The DockReady2 pose in the map frame, as last computed from the dock detection.
///
/// `None` means the pose could not be resolved from the last detection, or that no detection was
/// received yet.
#[derive(Debug, Default)]
pub struct SensedDockPose {
    cell: Mutex<Option<SensedSample>>,

    max_age: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct SensedSample {
    pose: Pose,

    received: Instant,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PoseResolver {
    pub fn new(tf: Arc<dyn TransformLookup>, frames: FrameParams) -> Self {
        Self { tf, frames }
    }

    pub fn frames(&self) -> &FrameParams {
        &self.frames
    }

    /// Get the pose of `source_frame` expressed in `target_frame`.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: LookupTime,
    ) -> Result<Pose, TransformError> {
        self.tf
            .lookup(target_frame, source_frame, time)
            .map(|iso| Pose::from_isometry(&iso))
    }

    /// Get the latest pose of the robot base in the given frame.
    pub fn robot_pose(&self, frame: &str) -> Result<Pose, TransformError> {
        self.lookup(frame, &self.frames.base, LookupTime::Latest)
    }

    /// Re-express a pose given in `from_frame` in `to_frame`, using the latest transforms.
    pub fn reproject(
        &self,
        pose: &Pose,
        from_frame: &str,
        to_frame: &str,
    ) -> Result<Pose, TransformError> {
        let to_from = self.tf.lookup(to_frame, from_frame, LookupTime::Latest)?;

        Ok(Pose::from_isometry(&(to_from * pose.to_isometry())))
    }

    /// Compute the DockReady2 pose in the map frame.
    ///
    /// This is the point `offset_m` along the dock frame's X axis, facing the same way as the dock
    /// frame and projected onto the ground (z = 0).
    pub fn dock_ready_pose(&self, offset_m: f64) -> Result<Pose, TransformError> {
        let offset = Pose::new(Vector3::new(offset_m, 0.0, 0.0), UnitQuaternion::identity());

        let mut pose = self.reproject(&offset, &self.frames.dock, &self.frames.map)?;
        pose.position_m.z = 0.0;

        Ok(pose)
    }
}

impl SensedDockPose {
    /// Create an empty cell. Values older than `max_age` are ignored when read.
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            cell: Mutex::new(None),
            max_age,
        }
    }

    /// Replace the stored pose.
    pub fn set(&self, pose: Option<Pose>) {
        let sample = pose.map(|pose| SensedSample {
            pose,
            received: Instant::now(),
        });

        match self.cell.lock() {
            Ok(mut c) => *c = sample,
            Err(_) => warn!("SensedDockPose lock is poisoned, pose not updated"),
        }
    }

    /// Take a copy of the current pose, if there is a fresh one.
    pub fn snapshot(&self) -> Option<Pose> {
        let sample = match self.cell.lock() {
            Ok(c) => (*c)?,
            Err(_) => {
                warn!("SensedDockPose lock is poisoned");
                return None;
            }
        };

        match self.max_age {
            Some(max) if sample.received.elapsed() > max => None,
            _ => Some(sample.pose),
        }
    }

    /// Recompute the stored pose from the transform tree.
    ///
    /// On failure the stored pose is cleared so a stale detection is never used.
    pub fn update_from(&self, resolver: &PoseResolver, offset_m: f64) -> Result<Pose, TransformError> {
        match resolver.dock_ready_pose(offset_m) {
            Ok(p) => {
                self.set(Some(p));
                Ok(p)
            }
            Err(e) => {
                warn!("Could not resolve the DockReady2 pose: {}", e);
                self.set(None);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tf::TfBuffer;
    use chrono::Utc;
    use comms_if::eqpt::tf::TransformStampedMsg;
    use std::f64::consts::FRAC_PI_2;

    fn static_tf(parent: &str, child: &str, xyz: [f64; 3], yaw: f64) -> TransformStampedMsg {
        let c = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw)
            .quaternion()
            .coords;
        TransformStampedMsg {
            parent_frame: parent.into(),
            child_frame: child.into(),
            stamp: Utc::now(),
            translation_m: xyz,
            rotation_q: [c[0], c[1], c[2], c[3]],
            is_static: true,
        }
    }

    fn resolver(buf: Arc<TfBuffer>) -> PoseResolver {
        PoseResolver::new(buf, FrameParams::default())
    }

    #[test]
    fn test_robot_pose() {
        let buf = Arc::new(TfBuffer::new(10));
        buf.insert(&static_tf("map", "base_footprint", [1.0, 2.0, 0.0], 0.0)).unwrap();

        let r = resolver(buf);
        let p = r.robot_pose("map").unwrap();
        assert!((p.position_m - Vector3::new(1.0, 2.0, 0.0)).norm() < 1e-9);

        assert_eq!(
            r.robot_pose("odom"),
            Err(TransformError::UnknownFrame("odom".into()))
        );
    }

    #[test]
    fn test_dock_ready_pose() {
        let buf = Arc::new(TfBuffer::new(10));

        // Dock 3 m ahead of the robot, raised 0.2 m, facing along map Y
        buf.insert(&static_tf("map", "base_footprint", [1.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&static_tf("base_footprint", "dock", [3.0, 0.0, 0.2], FRAC_PI_2)).unwrap();

        let r = resolver(buf);
        let p = r.dock_ready_pose(-0.8).unwrap();

        // -0.8 along dock X is -0.8 along map Y, and z is projected to the ground
        assert!((p.position_m - Vector3::new(4.0, -0.8, 0.0)).norm() < 1e-9);
        assert!((p.get_heading() - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_sensed_pose_update() {
        let buf = Arc::new(TfBuffer::new(10));
        let r = resolver(buf.clone());
        let sensed = SensedDockPose::new(None);

        // No dock frame yet
        assert!(sensed.update_from(&r, -0.8).is_err());
        assert!(sensed.snapshot().is_none());

        buf.insert(&static_tf("map", "dock", [2.0, 0.0, 0.0], 0.0)).unwrap();
        sensed.update_from(&r, -0.8).unwrap();
        let p = sensed.snapshot().unwrap();
        assert!((p.position_m - Vector3::new(1.2, 0.0, 0.0)).norm() < 1e-9);

        // A failed update clears the previous pose
        let other = PoseResolver::new(
            buf,
            FrameParams {
                dock: "missing".into(),
                ..FrameParams::default()
            },
        );
        assert!(sensed.update_from(&other, -0.8).is_err());
        assert!(sensed.snapshot().is_none());
    }

    #[test]
    fn test_sensed_pose_max_age() {
        let sensed = SensedDockPose::new(Some(Duration::from_millis(20)));
        sensed.set(Some(Pose::default()));
        assert!(sensed.snapshot().is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(sensed.snapshot().is_none());
    }
}
