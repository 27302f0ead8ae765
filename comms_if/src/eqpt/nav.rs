//! # Navigation Server Commands
//!
//! Request/reply protocol spoken between the dock executable and the external navigation
//! (path planning) server. The server owns path planning and obstacle avoidance, we only hand it
//! target poses and watch the goal status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::tf::PoseStampedMsg;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier the navigation server assigns to an accepted goal.
pub type NavGoalId = u64;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request sent to the navigation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavRequest {
    /// Start navigating to the target pose.
    SendGoal { target: PoseStampedMsg },

    /// Query the status of a previously sent goal.
    GoalStatus { goal_id: NavGoalId },

    /// Cancel every goal the server is pursuing.
    CancelAll,
}

/// Reply from the navigation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavResponse {
    GoalAccepted { goal_id: NavGoalId },

    Status { goal_id: NavGoalId, status: NavGoalStatus },

    AllCancelled,

    /// The request could not be handled.
    Error { reason: String },
}

/// Lifecycle status of a navigation goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavGoalStatus {
    /// Goal received but not yet being pursued
    Pending,

    /// Goal is being pursued
    Active,

    /// Goal reached
    Succeeded,

    /// The server gave up on the goal
    Aborted,

    /// Goal was cancelled before completion
    Preempted,

    /// The server refused the goal
    Rejected,

    /// The server doesn't know the goal id
    Lost,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavGoalStatus {
    /// True if the goal will not change status again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NavGoalStatus::Pending | NavGoalStatus::Active)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let s = serde_json::to_string(&NavRequest::GoalStatus { goal_id: 7 }).unwrap();
        assert_eq!(s, r#"{"type":"GOAL_STATUS","goal_id":7}"#);

        let r: NavResponse = serde_json::from_str(
            r#"{"type":"STATUS","goal_id":7,"status":"PREEMPTED"}"#
        ).unwrap();
        assert_eq!(r, NavResponse::Status { goal_id: 7, status: NavGoalStatus::Preempted });
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!NavGoalStatus::Pending.is_terminal());
        assert!(!NavGoalStatus::Active.is_terminal());
        assert!(NavGoalStatus::Succeeded.is_terminal());
        assert!(NavGoalStatus::Aborted.is_terminal());
        assert!(NavGoalStatus::Lost.is_terminal());
    }
}
