//! # Dock Executable Parameters
//!
//! This module provides parameters for the dock executable, loaded from `dock_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::tf::PoseMsg;
use serde::{Deserialize, Serialize};

use crate::dock_seq::RobotDockState;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockExecParams {
    /// Target period of one main loop cycle
    pub cycle_period_s: f64,

    pub frames: FrameParams,

    pub dock: DockParams,

    pub approach: ApproachParams,

    pub nav: NavClientParams,

    pub relay: RelayParams,

    pub tf: TfParams,
}

/// Names of the frames in the transform tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameParams {
    /// Fixed world frame navigation goals are expressed in
    pub map: String,

    /// Frame the approach distance is measured in
    pub odom: String,

    /// Frame attached to the robot base
    pub base: String,

    /// Frame of the detected dock
    pub dock: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockParams {
    /// Speed of the final approach and of the retreat, meters/second
    pub speed_ms: f64,

    /// Distance driven on the final approach and on the retreat, meters
    pub distance_m: f64,

    /// The DockReady pose in the map frame, the first navigation target of the dock sequence
    pub approach_pose: PoseMsg,

    /// Offset along the dock frame's X axis of the DockReady2 pose, meters
    pub ready_offset_m: f64,

    /// How long the robot waits at DockReady for the dock pose to settle
    pub settle_time_s: f64,

    /// Sensed dock poses older than this are ignored. `None` disables the check.
    #[serde(default)]
    pub sensed_pose_max_age_s: Option<f64>,

    /// Dock state assumed at startup
    #[serde(default)]
    pub initial_state: RobotDockState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproachParams {
    /// Rate of the approach control loop
    pub rate_hz: f64,

    /// Maximum time the approach loop may run without a valid robot pose
    pub pose_timeout_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavClientParams {
    /// Maximum time to wait for a navigation goal to complete
    pub timeout_s: f64,

    /// Rate at which the goal status is polled
    pub poll_rate_hz: f64,

    /// Receive timeout on the navigation server socket
    pub recv_timeout_ms: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayParams {
    /// Digital output channel wired to the charge relay
    pub charge_channel: u8,

    /// Maximum time to wait for the relay service
    pub timeout_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfParams {
    /// Number of transforms kept per frame
    pub history_len: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DockExecParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.02,
            frames: FrameParams::default(),
            dock: DockParams::default(),
            approach: ApproachParams {
                rate_hz: 20.0,
                pose_timeout_s: 1.0,
            },
            nav: NavClientParams {
                timeout_s: 300.0,
                poll_rate_hz: 5.0,
                recv_timeout_ms: 1000,
            },
            relay: RelayParams {
                charge_channel: 4,
                timeout_s: 5.0,
            },
            tf: TfParams { history_len: 100 },
        }
    }
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            map: "map".into(),
            odom: "map".into(),
            base: "base_footprint".into(),
            dock: "dock".into(),
        }
    }
}

impl Default for DockParams {
    fn default() -> Self {
        Self {
            speed_ms: 0.05,
            distance_m: 1.0,
            approach_pose: PoseMsg::identity(),
            ready_offset_m: -0.8,
            settle_time_s: 2.0,
            sensed_pose_max_age_s: None,
            initial_state: RobotDockState::Undocked,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_params() {
        let params: DockExecParams = util::params::from_str(
            r#"
            cycle_period_s = 0.05

            [frames]
            map = "map"
            odom = "odom"
            base = "base_link"
            dock = "dock"

            [dock]
            speed_ms = 0.1
            distance_m = 0.5
            ready_offset_m = -0.8
            settle_time_s = 2.0
            initial_state = "Docked"

            [dock.approach_pose]
            position_m = [1.0, 2.0, 0.0]
            orientation_q = [0.0, 0.0, 0.0, 1.0]

            [approach]
            rate_hz = 20.0
            pose_timeout_s = 1.0

            [nav]
            timeout_s = 60.0
            poll_rate_hz = 2.0
            recv_timeout_ms = 500

            [relay]
            charge_channel = 4
            timeout_s = 3.0

            [tf]
            history_len = 50
            "#,
        )
        .unwrap();

        assert_eq!(params.frames.odom, "odom");
        assert_eq!(params.dock.initial_state, RobotDockState::Docked);
        assert_eq!(params.dock.sensed_pose_max_age_s, None);
        assert_eq!(params.dock.approach_pose.position_m, [1.0, 2.0, 0.0]);
        assert_eq!(params.relay.charge_channel, 4);
    }
}
