//! # Dock Server
//!
//! The network face of the dock executable. Requests arrive on a REP socket and are dispatched to
//! the [`DockSequencer`], while goal feedback and results are published on a PUB socket by the
//! [`DockEventPublisher`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, PoisonError};

use comms_if::{
    dock::{
        DockEvent, DockGoal, DockRequest, DockRequestParseError, DockResponse, DockResult, GoalId,
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, info, warn};

use crate::dock_seq::{CancelResponse, DockSeqError, DockSequencer, GoalReporter, GoalResponse};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the request socket. Keeps [`DockServer::serve`] from blocking the main
/// loop.
const REQUEST_RECV_TIMEOUT_MS: i32 = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Accepts dock requests from clients.
pub struct DockServer {
    socket: MonitoredSocket,
}

/// Publishes goal feedback and results.
pub struct DockEventPublisher {
    socket: Mutex<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DockServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not recieve a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send a response: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error),

    #[error("The sequencer could not handle a request: {0}")]
    SequencerError(DockSeqError),

    #[error("The publisher's socket lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DockServer {
    /// Create a new instance of the dock server.
    ///
    /// This function will not block until a client connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, DockServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            SocketOptions::server(REQUEST_RECV_TIMEOUT_MS),
            &params.dock_request_endpoint,
        )
        .map_err(DockServerError::SocketError)?;

        Ok(Self { socket })
    }

    /// Handle every request currently waiting on the socket, returning the number handled.
    pub fn serve(&mut self, sequencer: &DockSequencer) -> Result<usize, DockServerError> {
        let mut num_handled = 0;

        loop {
            let msg = match self.socket.recv_msg(0) {
                Ok(m) => m,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(DockServerError::RecvError(e)),
            };

            let (response, seq_error) = match msg.as_str() {
                Some(s) => match handle_request(s, sequencer) {
                    Ok(r) => (r, None),
                    Err(e) => (
                        DockResponse::Invalid {
                            reason: e.to_string(),
                        },
                        Some(e),
                    ),
                },
                None => (
                    DockResponse::Invalid {
                        reason: String::from("Request is not valid UTF-8"),
                    },
                    None,
                ),
            };

            // REP sockets must always answer before the next request can be received
            let rep_str =
                serde_json::to_string(&response).map_err(DockServerError::SerializationError)?;
            self.socket
                .send(&rep_str, 0)
                .map_err(DockServerError::SendError)?;

            num_handled += 1;

            if let Some(e) = seq_error {
                return Err(DockServerError::SequencerError(e));
            }
        }

        Ok(num_handled)
    }
}

impl DockEventPublisher {
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, DockServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::server(0),
            &params.dock_event_endpoint,
        )
        .map_err(DockServerError::SocketError)?;

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    fn publish(&self, event: &DockEvent) -> Result<(), DockServerError> {
        let event_str =
            serde_json::to_string(event).map_err(DockServerError::SerializationError)?;

        self.socket
            .lock()?
            .send(&event_str, 0)
            .map_err(DockServerError::SendError)
    }
}

impl GoalReporter for DockEventPublisher {
    fn feedback(&self, goal_id: GoalId, text: &str) {
        let event = DockEvent::Feedback {
            goal_id,
            text: text.to_string(),
        };

        if let Err(e) = self.publish(&event) {
            warn!("Could not publish feedback for goal {}: {}", goal_id, e);
        }
    }

    fn result(&self, goal_id: GoalId, result: &DockResult) {
        info!(
            "Goal {} resolved {:?}: {}",
            goal_id, result.outcome, result.message
        );

        let event = DockEvent::Result {
            goal_id,
            result: result.clone(),
        };

        if let Err(e) = self.publish(&event) {
            warn!("Could not publish result for goal {}: {}", goal_id, e);
        }
    }
}

impl<G> From<PoisonError<G>> for DockServerError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse a request and pass it to the sequencer.
pub fn handle_request(
    request_str: &str,
    sequencer: &DockSequencer,
) -> Result<DockResponse, DockSeqError> {
    let request = match DockRequest::from_json(request_str) {
        Ok(r) => r,
        Err(DockRequestParseError::InvalidIntent) => {
            return sequencer
                .reject_invalid(&DockRequestParseError::InvalidIntent.to_string())
                .map(goal_response)
        }
        Err(e) => {
            warn!("Invalid dock request: {}", e);
            return Ok(DockResponse::Invalid {
                reason: e.to_string(),
            });
        }
    };

    debug!("Dock request: {:?}", request);

    match request {
        DockRequest::Goal { dock } => sequencer.submit(DockGoal { dock }).map(goal_response),
        DockRequest::Cancel { goal_id } => sequencer.cancel(goal_id).map(|r| match r {
            CancelResponse::CancelRequested(goal_id) => DockResponse::CancelRequested { goal_id },
            CancelResponse::UnknownGoal(goal_id) => DockResponse::UnknownGoal { goal_id },
        }),
        DockRequest::Status => sequencer
            .status()
            .map(|status| DockResponse::Status { status }),
    }
}

fn goal_response(response: GoalResponse) -> DockResponse {
    match response {
        GoalResponse::Accepted(goal_id) => DockResponse::Accepted { goal_id },
        GoalResponse::Rejected { goal_id, reason } => DockResponse::Rejected { goal_id, reason },
    }
}
