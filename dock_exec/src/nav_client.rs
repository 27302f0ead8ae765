//! # Navigation Client
//!
//! Delegates long distance motion to the external navigation server. The sequencer only talks to
//! the [`NavDelegate`] trait so that the server can be replaced in tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::{
        nav::{NavGoalId, NavGoalStatus, NavRequest, NavResponse},
        tf::PoseStampedMsg,
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, warn};

use crate::params::NavClientParams;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Interface to a navigation server.
pub trait NavDelegate: Send + Sync {
    /// Send a new goal to the server, returning the id the server assigned to it.
    fn send_goal(&self, target: &PoseStampedMsg) -> Result<NavGoalId, NavError>;

    /// Get the current status of a goal.
    fn goal_status(&self, goal_id: NavGoalId) -> Result<NavGoalStatus, NavError>;

    /// Cancel every goal the server is pursuing.
    fn cancel_all(&self) -> Result<(), NavError>;

    /// Send a goal and block until it reaches a terminal status.
    ///
    /// `on_poll` is called once per poll period while the goal is running. If it returns `false`
    /// the wait is abandoned, all goals are cancelled and `Preempted` is returned. If the goal
    /// hasn't finished after `timeout` all goals are cancelled and [`NavError::Timeout`] is
    /// returned.
    fn send_goal_and_wait(
        &self,
        target: &PoseStampedMsg,
        timeout: Duration,
        poll_period: Duration,
        on_poll: &mut dyn FnMut() -> bool,
    ) -> Result<TerminalStatus, NavError> {
        let goal_id = self.send_goal(target)?;
        let start = Instant::now();

        loop {
            if !on_poll() {
                self.cancel_all()?;
                return Ok(TerminalStatus::Preempted);
            }

            let status = self.goal_status(goal_id)?;
            if status.is_terminal() {
                debug!("Navigation goal {} finished with {:?}", goal_id, status);
                return Ok(TerminalStatus::from(status));
            }

            if start.elapsed() >= timeout {
                warn!("Navigation goal {} timed out, cancelling", goal_id);
                self.cancel_all()?;
                return Err(NavError::Timeout(timeout));
            }

            thread::sleep(poll_period);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client for the navigation server
pub struct NavClient {
    socket: Mutex<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Final status of a navigation goal as seen by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,

    /// Includes goals the server rejected or lost track of
    Aborted,

    Preempted,
}

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server sent a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("The server returned an error: {0}")]
    ServerError(String),

    #[error("Unexpected response from the server: {0:?}")]
    UnexpectedResponse(NavResponse),

    #[error("Navigation goal did not complete within {0:?}")]
    Timeout(Duration),

    #[error("The client's socket lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavClient {
    /// Create a new instance of the navigation client.
    ///
    /// This function will not block until the server connects.
    pub fn new(
        ctx: &zmq::Context,
        net_params: &NetParams,
        params: &NavClientParams,
    ) -> Result<Self, NavError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions::req_client(params.recv_timeout_ms),
            &net_params.nav_endpoint,
        )
        .map_err(NavError::SocketError)?;

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Check if the client is connected to the server
    pub fn is_connected(&self) -> bool {
        match self.socket.lock() {
            Ok(s) => s.connected(),
            Err(_) => false,
        }
    }

    /// Send a request and wait for the response.
    fn request(&self, request: &NavRequest) -> Result<NavResponse, NavError> {
        let socket = self.socket.lock()?;

        if !socket.connected() {
            return Err(NavError::NotConnected);
        }

        let req_str = serde_json::to_string(request).map_err(NavError::SerializationError)?;

        socket.send(&req_str, 0).map_err(NavError::SendError)?;

        let rep_str = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(NavError::NonUtf8Response),
            Err(e) => return Err(NavError::RecvError(e)),
        };

        match serde_json::from_str::<NavResponse>(&rep_str).map_err(NavError::DeserializeError)? {
            NavResponse::Error { reason } => Err(NavError::ServerError(reason)),
            r => Ok(r),
        }
    }
}

impl NavDelegate for NavClient {
    fn send_goal(&self, target: &PoseStampedMsg) -> Result<NavGoalId, NavError> {
        match self.request(&NavRequest::SendGoal {
            target: target.clone(),
        })? {
            NavResponse::GoalAccepted { goal_id } => Ok(goal_id),
            r => Err(NavError::UnexpectedResponse(r)),
        }
    }

    fn goal_status(&self, goal_id: NavGoalId) -> Result<NavGoalStatus, NavError> {
        match self.request(&NavRequest::GoalStatus { goal_id })? {
            NavResponse::Status { goal_id: id, status } if id == goal_id => Ok(status),
            r => Err(NavError::UnexpectedResponse(r)),
        }
    }

    fn cancel_all(&self) -> Result<(), NavError> {
        match self.request(&NavRequest::CancelAll)? {
            NavResponse::AllCancelled => Ok(()),
            r => Err(NavError::UnexpectedResponse(r)),
        }
    }
}

impl From<NavGoalStatus> for TerminalStatus {
    /// Convert a terminal goal status. Non-terminal statuses should not be converted, they are
    /// read as `Aborted`.
    fn from(status: NavGoalStatus) -> Self {
        match status {
            NavGoalStatus::Succeeded => TerminalStatus::Succeeded,
            NavGoalStatus::Preempted => TerminalStatus::Preempted,
            _ => TerminalStatus::Aborted,
        }
    }
}

impl<G> From<PoisonError<G>> for NavError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use comms_if::eqpt::tf::PoseMsg;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Server which reports `Active` for a number of polls then the given status.
    struct ScriptedNav {
        active_polls: usize,
        final_status: NavGoalStatus,
        polls: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl ScriptedNav {
        fn new(active_polls: usize, final_status: NavGoalStatus) -> Self {
            Self {
                active_polls,
                final_status,
                polls: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            }
        }
    }

    impl NavDelegate for ScriptedNav {
        fn send_goal(&self, _: &PoseStampedMsg) -> Result<NavGoalId, NavError> {
            Ok(1)
        }

        fn goal_status(&self, _: NavGoalId) -> Result<NavGoalStatus, NavError> {
            match self.polls.fetch_add(1, Ordering::SeqCst) {
                n if n < self.active_polls => Ok(NavGoalStatus::Active),
                _ => Ok(self.final_status),
            }
        }

        fn cancel_all(&self) -> Result<(), NavError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target() -> PoseStampedMsg {
        PoseStampedMsg {
            frame_id: "map".into(),
            stamp: Utc::now(),
            pose: PoseMsg::identity(),
        }
    }

    #[test]
    fn test_wait_for_terminal_status() {
        for (status, expected) in [
            (NavGoalStatus::Succeeded, TerminalStatus::Succeeded),
            (NavGoalStatus::Aborted, TerminalStatus::Aborted),
            (NavGoalStatus::Rejected, TerminalStatus::Aborted),
            (NavGoalStatus::Preempted, TerminalStatus::Preempted),
        ]
        .iter()
        {
            let nav = ScriptedNav::new(3, *status);
            let mut num_polls = 0;

            let result = nav
                .send_goal_and_wait(
                    &target(),
                    Duration::from_secs(5),
                    Duration::from_millis(1),
                    &mut || {
                        num_polls += 1;
                        true
                    },
                )
                .unwrap();

            assert_eq!(result, *expected);
            assert_eq!(num_polls, 4);
            assert_eq!(nav.cancels.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_wait_abandoned() {
        let nav = ScriptedNav::new(100, NavGoalStatus::Succeeded);
        let mut num_polls = 0;

        let result = nav
            .send_goal_and_wait(
                &target(),
                Duration::from_secs(5),
                Duration::from_millis(1),
                &mut || {
                    num_polls += 1;
                    num_polls < 3
                },
            )
            .unwrap();

        assert_eq!(result, TerminalStatus::Preempted);
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_timeout() {
        let nav = ScriptedNav::new(usize::MAX, NavGoalStatus::Succeeded);

        let result = nav.send_goal_and_wait(
            &target(),
            Duration::from_millis(20),
            Duration::from_millis(1),
            &mut || true,
        );

        assert!(matches!(result, Err(NavError::Timeout(_))));
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 1);
    }

    fn client(ctx: &zmq::Context, endpoint: &str) -> NavClient {
        let net_params = NetParams {
            dock_request_endpoint: String::new(),
            dock_event_endpoint: String::new(),
            nav_endpoint: endpoint.into(),
            relay_endpoint: String::new(),
            vel_endpoint: String::new(),
            tf_endpoint: String::new(),
            dock_pose_endpoint: String::new(),
        };

        NavClient::new(
            ctx,
            &net_params,
            &NavClientParams {
                timeout_s: 1.0,
                poll_rate_hz: 10.0,
                recv_timeout_ms: 500,
            },
        )
        .unwrap()
    }

    /// Bind a navigation server which answers each request in turn with the given responses.
    fn serve(
        ctx: &zmq::Context,
        endpoint: &str,
        responses: Vec<NavResponse>,
    ) -> thread::JoinHandle<Vec<NavRequest>> {
        let socket = ctx.socket(zmq::REP).unwrap();
        socket.bind(endpoint).unwrap();

        thread::spawn(move || {
            let mut requests = vec![];
            for rep in responses {
                let req = socket.recv_string(0).unwrap().unwrap();
                requests.push(serde_json::from_str(&req).unwrap());
                socket.send(&serde_json::to_string(&rep).unwrap(), 0).unwrap();
            }
            requests
        })
    }

    fn connect(nav: &NavClient) {
        assert!(nav
            .socket
            .lock()
            .unwrap()
            .wait_connected(Duration::from_secs(2), Duration::from_millis(1)));
        assert!(nav.is_connected());
    }

    #[test]
    fn test_not_connected() {
        let ctx = zmq::Context::new();
        let nav = client(&ctx, "tcp://127.0.0.1:55720");

        assert!(!nav.is_connected());
        assert!(matches!(nav.cancel_all(), Err(NavError::NotConnected)));
        assert!(matches!(nav.send_goal(&target()), Err(NavError::NotConnected)));
    }

    #[test]
    fn test_requests_over_socket() {
        let ctx = zmq::Context::new();
        let endpoint = "tcp://127.0.0.1:55721";
        let server = serve(
            &ctx,
            endpoint,
            vec![
                NavResponse::GoalAccepted { goal_id: 12 },
                NavResponse::Status {
                    goal_id: 12,
                    status: NavGoalStatus::Active,
                },
                NavResponse::AllCancelled,
            ],
        );
        let nav = client(&ctx, endpoint);
        connect(&nav);

        assert_eq!(nav.send_goal(&target()).unwrap(), 12);
        assert_eq!(nav.goal_status(12).unwrap(), NavGoalStatus::Active);
        nav.cancel_all().unwrap();

        let requests = server.join().unwrap();
        assert!(matches!(requests[0], NavRequest::SendGoal { .. }));
        assert_eq!(requests[1], NavRequest::GoalStatus { goal_id: 12 });
        assert_eq!(requests[2], NavRequest::CancelAll);
    }

    #[test]
    fn test_server_error() {
        let ctx = zmq::Context::new();
        let endpoint = "tcp://127.0.0.1:55722";
        let server = serve(
            &ctx,
            endpoint,
            vec![
                NavResponse::Error {
                    reason: "no map".into(),
                },
                NavResponse::Status {
                    goal_id: 3,
                    status: NavGoalStatus::Active,
                },
            ],
        );
        let nav = client(&ctx, endpoint);
        connect(&nav);

        match nav.send_goal(&target()) {
            Err(NavError::ServerError(reason)) => assert_eq!(reason, "no map"),
            r => panic!("Expected a server error, got {:?}", r),
        }

        // A status for another goal is not an answer to this query
        assert!(matches!(
            nav.goal_status(4),
            Err(NavError::UnexpectedResponse(_))
        ));
        server.join().unwrap();
    }
}
