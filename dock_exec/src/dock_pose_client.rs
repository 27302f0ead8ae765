//! # Dock Pose Client
//!
//! Receives dock detections from the dock sensor. Each detection gives the pose of the dock in
//! one of the sensor frames. The detection is added to the transform tree as the parent link of
//! the dock frame, then the DockReady2 pose is recomputed from the tree.
//!
//! A detection expressed in the dock frame itself carries no new transform and just triggers the
//! recomputation, for setups where the dock frame is published on the transform stream.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::{
    eqpt::tf::{PoseStampedMsg, TransformStampedMsg},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, warn};

use crate::{
    pose_resolver::{PoseResolver, SensedDockPose},
    tf::TfBuffer,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Applies dock detections to the transform tree and the sensed dock pose.
pub struct DockPoseTracker {
    buffer: Arc<TfBuffer>,

    resolver: PoseResolver,

    sensed: Arc<SensedDockPose>,

    ready_offset_m: f64,
}

/// Dock detection stream client
pub struct DockPoseClient {
    socket: MonitoredSocket,

    tracker: DockPoseTracker,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DockPoseClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DockPoseTracker {
    pub fn new(
        buffer: Arc<TfBuffer>,
        resolver: PoseResolver,
        sensed: Arc<SensedDockPose>,
        ready_offset_m: f64,
    ) -> Self {
        Self {
            buffer,
            resolver,
            sensed,
            ready_offset_m,
        }
    }

    /// Handle one dock detection.
    pub fn handle(&self, msg: &PoseStampedMsg) {
        let dock_frame = &self.resolver.frames().dock;

        if &msg.frame_id != dock_frame {
            let link = TransformStampedMsg {
                parent_frame: msg.frame_id.clone(),
                child_frame: dock_frame.clone(),
                stamp: msg.stamp,
                translation_m: msg.pose.position_m,
                rotation_q: msg.pose.orientation_q,
                is_static: false,
            };

            if let Err(e) = self.buffer.insert(&link) {
                warn!("Could not add dock detection to the transform tree: {}", e);
            }
        }

        if let Ok(p) = self.sensed.update_from(&self.resolver, self.ready_offset_m) {
            debug!(
                "DockReady2 pose updated: ({:.3}, {:.3})",
                p.position_m.x, p.position_m.y
            );
        }
    }
}

impl DockPoseClient {
    /// Create a new instance of the dock pose client.
    ///
    /// This function will not block until the sensor connects.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        tracker: DockPoseTracker,
    ) -> Result<Self, DockPoseClientError> {
        // Only the newest detection is of interest
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::sub_client(true),
            &params.dock_pose_endpoint,
        )
        .map_err(DockPoseClientError::SocketError)?;

        Ok(Self { socket, tracker })
    }

    /// Receive and handle all pending detections, returning how many were handled.
    pub fn receive_all(&self) -> Result<usize, DockPoseClientError> {
        let mut num_handled = 0;

        loop {
            let msg = match self.socket.recv_string(0) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    warn!("Non UTF-8 message on the dock pose stream");
                    continue;
                }
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(DockPoseClientError::RecvError(e)),
            };

            match serde_json::from_str::<PoseStampedMsg>(&msg) {
                Ok(p) => {
                    self.tracker.handle(&p);
                    num_handled += 1;
                }
                Err(e) => warn!("Could not deserialize dock pose message: {}", e),
            }
        }

        Ok(num_handled)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::FrameParams;
    use chrono::Utc;
    use comms_if::eqpt::tf::PoseMsg;
    use nalgebra::Vector3;

    fn tracker() -> (Arc<TfBuffer>, Arc<SensedDockPose>, DockPoseTracker) {
        let buffer = Arc::new(TfBuffer::new(10));
        let sensed = Arc::new(SensedDockPose::new(None));
        let resolver = PoseResolver::new(buffer.clone(), FrameParams::default());

        let tracker = DockPoseTracker::new(buffer.clone(), resolver, sensed.clone(), -0.8);

        (buffer, sensed, tracker)
    }

    fn detection(frame_id: &str, x: f64) -> PoseStampedMsg {
        PoseStampedMsg {
            frame_id: frame_id.into(),
            stamp: Utc::now(),
            pose: PoseMsg {
                position_m: [x, 0.0, 0.0],
                orientation_q: [0.0, 0.0, 0.0, 1.0],
            },
        }
    }

    #[test]
    fn test_detection_in_sensor_frame() {
        let (buffer, sensed, tracker) = tracker();

        buffer
            .insert(&TransformStampedMsg {
                parent_frame: "map".into(),
                child_frame: "laser".into(),
                stamp: Utc::now(),
                translation_m: [1.0, 0.0, 0.0],
                rotation_q: [0.0, 0.0, 0.0, 1.0],
                is_static: true,
            })
            .unwrap();

        tracker.handle(&detection("laser", 2.0));

        let p = sensed.snapshot().unwrap();
        assert!((p.position_m - Vector3::new(2.2, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_unresolvable_detection() {
        let (_, sensed, tracker) = tracker();

        // The sensor frame isn't connected to the map
        tracker.handle(&detection("laser", 2.0));
        assert!(sensed.snapshot().is_none());

        // Trigger with no dock frame in the tree
        tracker.handle(&detection("dock", 0.0));
        assert!(sensed.snapshot().is_none());
    }
}
