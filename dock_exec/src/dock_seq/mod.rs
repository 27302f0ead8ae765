//! # Dock Sequencer
//!
//! Owns the robot's dock state and runs the dock and undock sequences. Only one goal may be
//! active at once, and that goal has exclusive control of the robot's motion until it resolves.
//!
//! Goals are accepted or rejected immediately on the caller's thread, under the same lock that
//! guards the dock state and the active goal. Accepted goals are handed to a worker thread which
//! runs the sequence to completion, publishing feedback as it goes, and finally resolves the goal
//! with a single result.
//!
//! ## Dock sequence
//!
//! 1. Navigate to the configured DockReady pose.
//! 2. Settle, giving the dock detection time to update.
//! 3. Navigate to the DockReady2 pose computed from the dock detection.
//! 4. Drive forward onto the charger.
//! 5. Engage the charge relay, the robot is now docked.
//!
//! ## Undock sequence
//!
//! 1. Drive backward off the charger.
//! 2. Disengage the charge relay, the robot is now undocked.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod worker;
pub use worker::SeqError;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        mpsc::{channel, SendError, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::{
    dock::{DockGoal, DockOutcome, DockPhase, DockResult, DockStatusMsg, GoalId},
    eqpt::base::VelCmd,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use util::session;

use crate::{
    approach::ApproachController,
    cancel::CancelToken,
    nav_client::NavDelegate,
    params::DockExecParams,
    pose_resolver::{PoseResolver, SensedDockPose},
    relay_client::RelayCtrl,
    vel_pub::VelocitySink,
};

use self::worker::{worker_thread, WorkerSignal};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const REJECT_ALREADY_DOCKED: &str = "already docked";
pub const REJECT_NOT_CHARGING: &str = "robot is not on charging";
pub const REJECT_BUSY: &str = "dock sequence already in progress";

/// Period used when polling for the sequencer to become idle.
const IDLE_POLL_PERIOD: Duration = Duration::from_millis(5);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receives the feedback and results of dock goals.
pub trait GoalReporter: Send + Sync {
    fn feedback(&self, goal_id: GoalId, text: &str);

    fn result(&self, goal_id: GoalId, result: &DockResult);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The sequencer's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub nav: Arc<dyn NavDelegate>,

    pub relay: Arc<dyn RelayCtrl>,

    pub vel: Arc<dyn VelocitySink>,

    pub resolver: Arc<PoseResolver>,

    pub sensed_dock_pose: Arc<SensedDockPose>,

    pub reporter: Arc<dyn GoalReporter>,
}

pub struct DockSequencer {
    shared: Arc<Shared>,

    worker_sender: Mutex<Sender<WorkerSignal>>,

    worker_jh: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    params: DockExecParams,

    state: Mutex<SeqState>,

    collab: Collaborators,

    approach: ApproachController,
}

#[derive(Debug)]
struct SeqState {
    dock_state: RobotDockState,

    active: Option<ActiveGoal>,

    phase: DockPhase,

    next_goal_id: GoalId,
}

/// The goal currently owning the robot's motion.
#[derive(Debug, Clone)]
struct ActiveGoal {
    id: GoalId,

    goal: DockGoal,

    cancel: CancelToken,
}

/// Record of a resolved goal, saved in the session archive.
#[derive(Debug, Clone, Serialize)]
struct GoalRecord {
    goal_id: GoalId,

    goal: Option<DockGoal>,

    result: DockResult,

    elapsed_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Whether the robot is on the charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotDockState {
    Undocked,
    Docked,
}

/// Immediate answer to a goal submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalResponse {
    Accepted(GoalId),

    Rejected { goal_id: GoalId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResponse {
    /// The goal is active and has been told to stop
    CancelRequested(GoalId),

    /// The goal is not the active goal
    UnknownGoal(GoalId),
}

#[derive(Debug, thiserror::Error)]
pub enum DockSeqError {
    #[error("The sequencer state lock is poisoned")]
    PoisonError,

    #[error("The sequencer worker thread has stopped")]
    WorkerStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DockSequencer {
    /// Create the sequencer and start its worker thread.
    pub fn new(params: DockExecParams, collab: Collaborators) -> Self {
        let approach = ApproachController::new(
            collab.resolver.clone(),
            collab.vel.clone(),
            &params.approach,
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(SeqState {
                dock_state: params.dock.initial_state,
                active: None,
                phase: DockPhase::Idle,
                next_goal_id: 1,
            }),
            params,
            collab,
            approach,
        });

        let (worker_sender, worker_reciever) = channel();

        let shared_clone = shared.clone();
        let worker_jh = thread::spawn(move || worker_thread(shared_clone, worker_reciever));

        info!(
            "DockSequencer started, robot is {:?}",
            shared.params.dock.initial_state
        );

        Self {
            shared,
            worker_sender: Mutex::new(worker_sender),
            worker_jh: Mutex::new(Some(worker_jh)),
        }
    }

    /// Submit a new goal.
    ///
    /// The goal is accepted or rejected immediately. A rejected goal is also resolved with a
    /// `Rejected` result through the reporter.
    pub fn submit(&self, goal: DockGoal) -> Result<GoalResponse, DockSeqError> {
        let mut state = self.shared.state.lock()?;

        let goal_id = state.next_goal_id;
        state.next_goal_id += 1;

        let mut stop = false;

        let rejection = if goal.dock && state.dock_state == RobotDockState::Docked {
            Some(REJECT_ALREADY_DOCKED)
        } else if !goal.dock && state.dock_state == RobotDockState::Undocked {
            // Undocking while undocked acts as a stop: whatever is moving the robot is cancelled
            if let Some(ref active) = state.active {
                warn!("Undock requested while undocked, cancelling goal {}", active.id);
                active.cancel.cancel();
            }
            stop = true;

            Some(REJECT_NOT_CHARGING)
        } else if state.active.is_some() {
            Some(REJECT_BUSY)
        } else {
            None
        };

        if let Some(reason) = rejection {
            drop(state);

            // Stopping talks to the navigation server, the state lock must not be held
            if stop {
                self.shared.stop_motion();
            }

            warn!("Goal {} ({:?}) rejected: {}", goal_id, goal, reason);
            self.shared.resolve(
                goal_id,
                Some(goal),
                DockResult::new(DockOutcome::Rejected, reason),
            );

            return Ok(GoalResponse::Rejected {
                goal_id,
                reason: reason.to_string(),
            });
        }

        let active = ActiveGoal {
            id: goal_id,
            goal,
            cancel: CancelToken::new(),
        };

        self.worker_sender
            .lock()?
            .send(WorkerSignal::Start(active.clone()))?;

        state.active = Some(active);
        state.phase = DockPhase::Idle;

        info!(
            "Goal {} accepted: {}",
            goal_id,
            if goal.dock { "Docking" } else { "Start undock" }
        );

        Ok(GoalResponse::Accepted(goal_id))
    }

    /// Reject a request whose intent could not be understood.
    ///
    /// The request still consumes a goal id so that its rejection can be reported.
    pub fn reject_invalid(&self, reason: &str) -> Result<GoalResponse, DockSeqError> {
        let goal_id = {
            let mut state = self.shared.state.lock()?;
            let id = state.next_goal_id;
            state.next_goal_id += 1;
            id
        };

        warn!("Goal {} rejected: {}", goal_id, reason);
        self.shared
            .resolve(goal_id, None, DockResult::new(DockOutcome::Rejected, reason));

        Ok(GoalResponse::Rejected {
            goal_id,
            reason: reason.to_string(),
        })
    }

    /// Cancel the given goal if it is the active one.
    ///
    /// The goal resolves as `Cancelled` once the worker has stopped the robot.
    pub fn cancel(&self, goal_id: GoalId) -> Result<CancelResponse, DockSeqError> {
        let token = {
            let state = self.shared.state.lock()?;

            match state.active {
                Some(ref a) if a.id == goal_id => a.cancel.clone(),
                _ => return Ok(CancelResponse::UnknownGoal(goal_id)),
            }
        };

        info!("Cancelling goal {}", goal_id);
        token.cancel();

        if let Err(e) = self.shared.collab.nav.cancel_all() {
            warn!("Could not cancel navigation goals: {}", e);
        }

        Ok(CancelResponse::CancelRequested(goal_id))
    }

    /// Get the current dock state, active goal and phase.
    pub fn status(&self) -> Result<DockStatusMsg, DockSeqError> {
        let state = self.shared.state.lock()?;

        Ok(DockStatusMsg {
            docked: state.dock_state == RobotDockState::Docked,
            active_goal: state.active.as_ref().map(|a| a.id),
            phase: state.phase,
        })
    }

    pub fn dock_state(&self) -> Result<RobotDockState, DockSeqError> {
        Ok(self.shared.state.lock()?.dock_state)
    }

    /// Block until no goal is active, or the timeout expires. Returns whether the sequencer is
    /// idle.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, DockSeqError> {
        let start = Instant::now();

        loop {
            if self.shared.state.lock()?.active.is_none() {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            thread::sleep(IDLE_POLL_PERIOD);
        }
    }

    /// Cancel any active goal and stop the worker thread.
    pub fn stop(&self) -> Result<(), DockSeqError> {
        let active_id = self.shared.state.lock()?.active.as_ref().map(|a| a.id);
        if let Some(id) = active_id {
            self.cancel(id)?;
        }

        // The worker may already be gone, which is fine
        self.worker_sender.lock()?.send(WorkerSignal::Stop).ok();

        if let Some(jh) = self.worker_jh.lock()?.take() {
            jh.join().map_err(|_| DockSeqError::WorkerStopped)?;
        }

        debug!("DockSequencer stopped");

        Ok(())
    }
}

impl Drop for DockSequencer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping the DockSequencer: {}", e);
        }
    }
}

impl Shared {
    fn set_phase(&self, phase: DockPhase) -> Result<(), SeqError> {
        self.state.lock()?.phase = phase;
        debug!("Dock phase: {}", phase);
        Ok(())
    }

    fn feedback(&self, goal_id: GoalId, text: &str) {
        info!("[goal {}] {}", goal_id, text);
        self.collab.reporter.feedback(goal_id, text);
    }

    /// Cancel all navigation and command the base to stop.
    fn stop_motion(&self) {
        if let Err(e) = self.collab.nav.cancel_all() {
            warn!("Could not cancel navigation goals: {}", e);
        }
        if let Err(e) = self.collab.vel.publish(VelCmd::zero()) {
            warn!("Could not publish zero velocity: {}", e);
        }
    }

    /// Report the result of a goal and archive it.
    fn resolve(&self, goal_id: GoalId, goal: Option<DockGoal>, result: DockResult) {
        self.collab.reporter.result(goal_id, &result);

        session::save_with_timestamp(
            "dock_goals/goal.json",
            GoalRecord {
                goal_id,
                goal,
                result,
                elapsed_s: session::get_elapsed_seconds(),
            },
        );
    }
}

impl Default for RobotDockState {
    fn default() -> Self {
        RobotDockState::Undocked
    }
}

impl<G> From<PoisonError<G>> for DockSeqError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

impl<T> From<SendError<T>> for DockSeqError {
    fn from(_: SendError<T>) -> Self {
        Self::WorkerStopped
    }
}
