//! Worker thread which runs accepted dock and undock sequences.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{mpsc::Receiver, Arc, PoisonError},
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use comms_if::dock::{DockOutcome, DockPhase, DockResult};
use log::{debug, error, info, warn};
use util::time::{period_from_hz, seconds_to_std};

use crate::{
    approach::{ApproachError, ApproachOutcome, Direction},
    loc::Pose,
    nav_client::{NavError, TerminalStatus},
    relay_client::RelayError,
};

use super::{ActiveGoal, RobotDockState, Shared};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(super) enum WorkerSignal {
    /// Stop the worker once the current sequence has finished
    Stop,

    /// Run the sequence for a newly accepted goal
    Start(ActiveGoal),
}

/// Reasons a sequence did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SeqError {
    #[error("The goal was cancelled")]
    Cancelled,

    #[error("Navigation to {0} ended with {1:?}")]
    NavFailed(&'static str, TerminalStatus),

    #[error("Navigation to {0} failed: {1}")]
    Nav(&'static str, NavError),

    #[error("No dock pose has been sensed")]
    DockPoseUnavailable,

    #[error("Approach failed: {0}")]
    Approach(ApproachError),

    #[error("Could not switch the charge relay: {0}")]
    Relay(RelayError),

    #[error("The sequencer state lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub(super) fn worker_thread(shared: Arc<Shared>, main_reciever: Receiver<WorkerSignal>) {
    while let Ok(signal) = main_reciever.recv() {
        match signal {
            WorkerSignal::Stop => break,
            WorkerSignal::Start(goal) => run_goal(&shared, &goal),
        }
    }

    debug!("Sequencer worker exiting");
}

/// Run the goal's sequence and resolve it.
fn run_goal(shared: &Shared, goal: &ActiveGoal) {
    let result = if goal.goal.dock {
        shared.feedback(goal.id, "Docking");
        dock_sequence(shared, goal)
    } else {
        shared.feedback(goal.id, "Start undock");
        undock_sequence(shared, goal)
    };

    let result = match result {
        Ok(new_state) => {
            let message = match new_state {
                RobotDockState::Docked => "Docked",
                RobotDockState::Undocked => "Undocked",
            };
            info!("Goal {} succeeded: {}", goal.id, message);
            DockResult::new(DockOutcome::Succeeded, message)
        }
        Err(_) if goal.cancel.is_cancelled() => {
            info!("Goal {} cancelled", goal.id);
            DockResult::new(DockOutcome::Cancelled, "Cancelled")
        }
        Err(e) => {
            warn!("Goal {} aborted: {}", goal.id, e);
            DockResult::new(DockOutcome::Aborted, e.to_string())
        }
    };

    // Goal slot is free before the result goes out
    match shared.state.lock() {
        Ok(mut state) => {
            if result.outcome == DockOutcome::Succeeded {
                state.dock_state = match goal.goal.dock {
                    true => RobotDockState::Docked,
                    false => RobotDockState::Undocked,
                };
            }
            state.active = None;
            state.phase = DockPhase::Idle;
        }
        Err(_) => error!("Sequencer state lock is poisoned, goal {} not released", goal.id),
    }

    shared.resolve(goal.id, Some(goal.goal), result);
}

fn dock_sequence(shared: &Shared, goal: &ActiveGoal) -> Result<RobotDockState, SeqError> {
    let params = &shared.params.dock;

    // DockReady
    shared.set_phase(DockPhase::NavigatingToReady)?;
    let approach_pose = Pose::from_msg(&params.approach_pose);
    navigate(shared, goal, "DockReady", &approach_pose)?;
    shared.feedback(goal.id, "DockReady arrived");

    // Wait for the dock detection to settle now the dock is in view
    shared.set_phase(DockPhase::Settling)?;
    cancellable_sleep(shared, goal, seconds_to_std(params.settle_time_s))?;

    // DockReady2
    let ready_2_pose = match shared.collab.sensed_dock_pose.snapshot() {
        Some(p) => p,
        None => {
            shared.feedback(goal.id, "ready 2 failed");
            return Err(SeqError::DockPoseUnavailable);
        }
    };

    shared.set_phase(DockPhase::NavigatingToReady2)?;
    navigate(shared, goal, "DockReady2", &ready_2_pose)?;
    shared.feedback(goal.id, "DockReady2 arrived");

    // Onto the charger
    shared.set_phase(DockPhase::Approaching)?;
    approach(shared, goal, Direction::Forward, "Moving to Dock")?;
    shared.feedback(goal.id, "Stop on Dock");

    check_cancelled(goal)?;

    shared.set_phase(DockPhase::EngagingRelay)?;
    shared
        .collab
        .relay
        .set_relay(shared.params.relay.charge_channel, true)
        .map_err(SeqError::Relay)?;

    Ok(RobotDockState::Docked)
}

fn undock_sequence(shared: &Shared, goal: &ActiveGoal) -> Result<RobotDockState, SeqError> {
    shared.set_phase(DockPhase::Retreating)?;
    approach(shared, goal, Direction::Backward, "Undock")?;
    shared.feedback(goal.id, "Stop on DockReady");

    check_cancelled(goal)?;

    shared.set_phase(DockPhase::DisengagingRelay)?;
    shared
        .collab
        .relay
        .set_relay(shared.params.relay.charge_channel, false)
        .map_err(SeqError::Relay)?;

    Ok(RobotDockState::Undocked)
}

/// Delegate motion to `target` (in the map frame) to the navigation server, blocking until it
/// finishes.
fn navigate(
    shared: &Shared,
    goal: &ActiveGoal,
    stage: &'static str,
    target: &Pose,
) -> Result<(), SeqError> {
    check_cancelled(goal)?;

    let map_frame = shared.collab.resolver.frames().map.clone();
    let target_msg = target.to_stamped_msg(&map_frame, Utc::now());

    info!("Navigating to {} at {:?}", stage, target.position_m.as_slice());

    let mut on_poll = || {
        if goal.cancel.is_cancelled() {
            return false;
        }

        match shared.collab.resolver.robot_pose(&map_frame) {
            Ok(p) => shared.feedback(
                goal.id,
                &format!("Moving to {}, {:.6}m left", stage, p.distance_to(target)),
            ),
            Err(e) => warn!("Robot pose unavailable while navigating: {}", e),
        }

        true
    };

    let status = shared
        .collab
        .nav
        .send_goal_and_wait(
            &target_msg,
            seconds_to_std(shared.params.nav.timeout_s),
            period_from_hz(shared.params.nav.poll_rate_hz),
            &mut on_poll,
        )
        .map_err(|e| SeqError::Nav(stage, e))?;

    match status {
        TerminalStatus::Succeeded => Ok(()),
        _ if goal.cancel.is_cancelled() => Err(SeqError::Cancelled),
        s => Err(SeqError::NavFailed(stage, s)),
    }
}

/// Drive the configured dock distance in the given direction.
fn approach(
    shared: &Shared,
    goal: &ActiveGoal,
    direction: Direction,
    label: &str,
) -> Result<(), SeqError> {
    let params = &shared.params.dock;

    let outcome = shared
        .approach
        .run(
            direction,
            params.distance_m,
            params.speed_ms,
            &goal.cancel,
            &mut |remaining_m: f64| {
                shared.feedback(goal.id, &format!("{}, {:.6}m left", label, remaining_m))
            },
        )
        .map_err(SeqError::Approach)?;

    match outcome {
        ApproachOutcome::Completed { .. } => Ok(()),
        ApproachOutcome::Cancelled => Err(SeqError::Cancelled),
    }
}

/// Sleep for the given duration, waking early if the goal is cancelled.
fn cancellable_sleep(
    shared: &Shared,
    goal: &ActiveGoal,
    duration: Duration,
) -> Result<(), SeqError> {
    let tick = period_from_hz(shared.params.approach.rate_hz);
    let start = Instant::now();

    loop {
        check_cancelled(goal)?;

        let elapsed = start.elapsed();
        if elapsed >= duration {
            return Ok(());
        }

        thread::sleep(tick.min(duration - elapsed));
    }
}

fn check_cancelled(goal: &ActiveGoal) -> Result<(), SeqError> {
    match goal.cancel.is_cancelled() {
        true => Err(SeqError::Cancelled),
        false => Ok(()),
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<G> From<PoisonError<G>> for SeqError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}
