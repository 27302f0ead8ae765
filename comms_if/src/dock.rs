//! # Dock action interface
//!
//! Requests accepted by the dock server, the responses it sends back, and the feedback/result
//! events it publishes while a dock or undock sequence runs.
//!
//! Requests are JSON objects tagged by a `"type"` field:
//!
//! ```json
//! {"type": "GOAL", "dock": true}
//! {"type": "CANCEL", "goal_id": 3}
//! {"type": "STATUS"}
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier of a dock goal, assigned by the dock server in increasing order.
pub type GoalId = u64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The intent of a dock goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockGoal {
    /// `true` to dock, `false` to undock
    pub dock: bool,
}

/// Final result of a dock goal, sent exactly once per goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockResult {
    pub outcome: DockOutcome,

    /// Human readable description of the outcome
    pub message: String,
}

/// Snapshot of the dock server state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockStatusMsg {
    /// Whether the robot is currently on the charger
    pub docked: bool,

    /// The goal currently in progress, if any
    pub active_goal: Option<GoalId>,

    /// The phase of the active sequence
    pub phase: DockPhase,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request sent to the dock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockRequest {
    /// Start a new dock or undock sequence
    Goal { dock: bool },

    /// Cancel the goal with the given id
    Cancel { goal_id: GoalId },

    /// Query the dock state and the active goal
    Status,
}

/// Response to a [`DockRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockResponse {
    /// The goal was accepted and its sequence is starting
    Accepted { goal_id: GoalId },

    /// The goal was rejected, its result has also been published with outcome `Rejected`
    Rejected { goal_id: GoalId, reason: String },

    /// Cancellation of the goal has been requested
    CancelRequested { goal_id: GoalId },

    /// The goal id given in a cancel request is not the active goal
    UnknownGoal { goal_id: GoalId },

    Status { status: DockStatusMsg },

    /// The request could not be parsed
    Invalid { reason: String },
}

/// Events published by the dock server while goals are running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockEvent {
    /// Progress text for the given goal
    Feedback { goal_id: GoalId, text: String },

    /// The goal has resolved
    Result { goal_id: GoalId, result: DockResult },
}

/// How a dock goal resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockOutcome {
    /// The sequence completed and the dock state changed
    Succeeded,

    /// The goal was refused before any motion
    Rejected,

    /// The sequence failed part way through, dock state is unchanged
    Aborted,

    /// The goal was cancelled by the requester, dock state is unchanged
    Cancelled,
}

/// Phases of the dock and undock sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DockPhase {
    Idle,
    NavigatingToReady,
    Settling,
    NavigatingToReady2,
    Approaching,
    EngagingRelay,
    Retreating,
    DisengagingRelay,
}

/// Errors that can occur while parsing a [`DockRequest`].
#[derive(Debug, Error)]
pub enum DockRequestParseError {
    #[error("Request contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Request has an invalid type ({0})")]
    InvalidType(String),

    #[error("unknown dock request, should be true or false")]
    InvalidIntent,

    #[error("Request of type {0} is missing the {1} field")]
    MissingField(&'static str, &'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DockRequest {
    /// Parse a request from a JSON string.
    ///
    /// Parsing is done by hand rather than through serde so that a goal with a non-boolean intent
    /// can be reported with a specific error.
    pub fn from_json(json_str: &str) -> Result<Self, DockRequestParseError> {
        let val: Value = serde_json::from_str(json_str)
            .map_err(DockRequestParseError::InvalidJson)?;

        let req_type = match val["type"].as_str() {
            Some(s) => s,
            None => return Err(DockRequestParseError::InvalidType(String::from(
                "Expected \"type\" to be a string"
            )))
        };

        match req_type {
            "GOAL" => match &val["dock"] {
                Value::Bool(b) => Ok(DockRequest::Goal { dock: *b }),
                _ => Err(DockRequestParseError::InvalidIntent)
            },
            "CANCEL" => match val["goal_id"].as_u64() {
                Some(goal_id) => Ok(DockRequest::Cancel { goal_id }),
                None => Err(DockRequestParseError::MissingField("CANCEL", "goal_id"))
            },
            "STATUS" => Ok(DockRequest::Status),
            t => Err(DockRequestParseError::InvalidType(
                format!("{} is not a recognised request type", t)
            ))
        }
    }
}

impl DockGoal {
    pub fn dock() -> Self {
        Self { dock: true }
    }

    pub fn undock() -> Self {
        Self { dock: false }
    }
}

impl DockResult {
    pub fn new<S: Into<String>>(outcome: DockOutcome, message: S) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}

impl Default for DockPhase {
    fn default() -> Self {
        DockPhase::Idle
    }
}

impl std::fmt::Display for DockPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DockPhase::Idle => "idle",
            DockPhase::NavigatingToReady => "navigating to DockReady",
            DockPhase::Settling => "settling",
            DockPhase::NavigatingToReady2 => "navigating to DockReady2",
            DockPhase::Approaching => "approaching dock",
            DockPhase::EngagingRelay => "engaging charge relay",
            DockPhase::Retreating => "retreating from dock",
            DockPhase::DisengagingRelay => "disengaging charge relay",
        };

        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_goal() {
        assert_eq!(
            DockRequest::from_json(r#"{"type": "GOAL", "dock": true}"#).unwrap(),
            DockRequest::Goal { dock: true }
        );
        assert_eq!(
            DockRequest::from_json(r#"{"type": "GOAL", "dock": false}"#).unwrap(),
            DockRequest::Goal { dock: false }
        );
    }

    #[test]
    fn test_parse_invalid_intent() {
        for s in &[
            r#"{"type": "GOAL", "dock": 1}"#,
            r#"{"type": "GOAL", "dock": "yes"}"#,
            r#"{"type": "GOAL"}"#,
        ] {
            match DockRequest::from_json(s) {
                Err(e @ DockRequestParseError::InvalidIntent) => assert_eq!(
                    e.to_string(),
                    "unknown dock request, should be true or false"
                ),
                r => panic!("Expected invalid intent for {}, got {:?}", s, r)
            }
        }
    }

    #[test]
    fn test_parse_other_requests() {
        assert_eq!(
            DockRequest::from_json(r#"{"type": "CANCEL", "goal_id": 4}"#).unwrap(),
            DockRequest::Cancel { goal_id: 4 }
        );
        assert_eq!(
            DockRequest::from_json(r#"{"type": "STATUS"}"#).unwrap(),
            DockRequest::Status
        );

        assert!(matches!(
            DockRequest::from_json(r#"{"type": "CANCEL"}"#),
            Err(DockRequestParseError::MissingField(_, "goal_id"))
        ));
        assert!(matches!(
            DockRequest::from_json(r#"{"type": "PARK"}"#),
            Err(DockRequestParseError::InvalidType(_))
        ));
        assert!(matches!(
            DockRequest::from_json("not json"),
            Err(DockRequestParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_serialised_requests_parse() {
        // Whatever the client serialises the server must be able to parse
        for req in &[
            DockRequest::Goal { dock: true },
            DockRequest::Cancel { goal_id: 12 },
            DockRequest::Status,
        ] {
            let s = serde_json::to_string(req).unwrap();
            assert_eq!(&DockRequest::from_json(&s).unwrap(), req);
        }
    }

    #[test]
    fn test_event_format() {
        let e = DockEvent::Result {
            goal_id: 2,
            result: DockResult::new(DockOutcome::Rejected, "already docked"),
        };
        let v: Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "RESULT");
        assert_eq!(v["result"]["outcome"], "REJECTED");
        assert_eq!(v["result"]["message"], "already docked");
    }
}
