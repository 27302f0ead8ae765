//! # Approach Controller
//!
//! Drives the base in a straight line at constant speed until it has travelled a given distance,
//! measured in the odometry frame. Used for the final approach onto the charger and for the
//! retreat off it.
//!
//! Each tick of the loop:
//! 1. checks for cancellation,
//! 2. publishes the velocity command,
//! 3. samples the robot pose and computes the distance travelled from the baseline,
//! 4. reports the remaining distance and stops once the target is reached.
//!
//! A zero velocity command is published exactly once whenever the loop exits, whatever the
//! reason.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::base::VelCmd;
use log::{debug, info, warn};
use util::time::{period_from_hz, seconds_to_std};

use crate::{
    cancel::CancelToken,
    loc::Pose,
    params::ApproachParams,
    pose_resolver::PoseResolver,
    tf::TransformError,
    vel_pub::VelocitySink,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ApproachController {
    resolver: Arc<PoseResolver>,

    vel: Arc<dyn VelocitySink>,

    period: Duration,

    pose_timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApproachOutcome {
    /// The target distance was reached
    Completed { travelled_m: f64 },

    /// The cancel token was set before the target was reached
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApproachError {
    #[error("Could not get the robot's starting pose: {0}")]
    BaselineUnavailable(TransformError),

    #[error("No robot pose received for {timeout:?}, last error: {error}")]
    PoseTimeout {
        timeout: Duration,
        error: TransformError,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ApproachController {
    pub fn new(
        resolver: Arc<PoseResolver>,
        vel: Arc<dyn VelocitySink>,
        params: &ApproachParams,
    ) -> Self {
        Self {
            resolver,
            vel,
            period: period_from_hz(params.rate_hz),
            pose_timeout: seconds_to_std(params.pose_timeout_s),
        }
    }

    /// Drive `target_m` meters in the given direction at `speed_ms`.
    ///
    /// `feedback` is called with the remaining distance each time a new pose is sampled.
    pub fn run(
        &self,
        direction: Direction,
        target_m: f64,
        speed_ms: f64,
        cancel: &CancelToken,
        feedback: &mut dyn FnMut(f64),
    ) -> Result<ApproachOutcome, ApproachError> {
        info!(
            "Starting {:?} approach of {:.3} m at {:.3} m/s",
            direction, target_m, speed_ms
        );

        let result = self.drive(direction, target_m, speed_ms, cancel, feedback);

        self.stop();

        match result {
            Ok(ApproachOutcome::Completed { travelled_m }) => {
                info!("Approach complete, travelled {:.3} m", travelled_m)
            }
            Ok(ApproachOutcome::Cancelled) => info!("Approach cancelled"),
            Err(ref e) => warn!("Approach failed: {}", e),
        }

        result
    }

    fn drive(
        &self,
        direction: Direction,
        target_m: f64,
        speed_ms: f64,
        cancel: &CancelToken,
        feedback: &mut dyn FnMut(f64),
    ) -> Result<ApproachOutcome, ApproachError> {
        let odom_frame = self.resolver.frames().odom.clone();

        let baseline = match self.baseline(&odom_frame, cancel)? {
            Some(b) => b,
            None => return Ok(ApproachOutcome::Cancelled),
        };

        let cmd = VelCmd::linear(direction.sign() * speed_ms.abs());
        let mut last_pose_instant = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(ApproachOutcome::Cancelled);
            }

            if let Err(e) = self.vel.publish(cmd) {
                warn!("Could not publish approach velocity: {}", e);
            }

            match self.resolver.robot_pose(&odom_frame) {
                Ok(pose) => {
                    last_pose_instant = Instant::now();

                    let travelled_m = pose.distance_to(&baseline);
                    feedback((target_m - travelled_m).max(0.0));

                    if travelled_m >= target_m {
                        return Ok(ApproachOutcome::Completed { travelled_m });
                    }
                }
                Err(e) => {
                    debug!("Robot pose unavailable during approach: {}", e);

                    if last_pose_instant.elapsed() > self.pose_timeout {
                        return Err(ApproachError::PoseTimeout {
                            timeout: self.pose_timeout,
                            error: e,
                        });
                    }
                }
            }

            thread::sleep(self.period);
        }
    }

    /// Get the starting pose, retrying until the pose timeout. `None` if cancelled while waiting.
    fn baseline(
        &self,
        odom_frame: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Pose>, ApproachError> {
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            match self.resolver.robot_pose(odom_frame) {
                Ok(p) => return Ok(Some(p)),
                Err(e) if start.elapsed() > self.pose_timeout => {
                    return Err(ApproachError::BaselineUnavailable(e))
                }
                Err(_) => thread::sleep(self.period),
            }
        }
    }

    fn stop(&self) {
        if let Err(e) = self.vel.publish(VelCmd::zero()) {
            warn!("Could not publish zero velocity: {}", e);
        }
    }
}

impl Direction {
    fn sign(&self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        params::FrameParams,
        tf::{LookupTime, TransformLookup},
        vel_pub::VelPubError,
    };
    use nalgebra::{Isometry3, Translation3, UnitQuaternion};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Robot moving along X by `step_m` on each lookup, up to `max_m`. The first `num_failures`
    /// lookups fail.
    struct MovingRobot {
        step_m: f64,
        max_m: f64,
        num_failures: usize,
        calls: AtomicUsize,
    }

    impl TransformLookup for MovingRobot {
        fn lookup(&self, _: &str, _: &str, _: LookupTime) -> Result<Isometry3<f64>, TransformError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);

            if n < self.num_failures {
                return Err(TransformError::UnknownFrame("base_footprint".into()));
            }

            let x = (((n - self.num_failures) as f64) * self.step_m).min(self.max_m);
            Ok(Isometry3::from_parts(
                Translation3::new(x, 0.0, 0.0),
                UnitQuaternion::identity(),
            ))
        }
    }

    /// Robot whose pose is never available.
    struct Lost;

    /// Robot whose pose is available once, for the baseline, then lost.
    #[derive(Default)]
    struct Vanishing {
        calls: AtomicUsize,
    }

    impl TransformLookup for Vanishing {
        fn lookup(&self, _: &str, _: &str, _: LookupTime) -> Result<Isometry3<f64>, TransformError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(Isometry3::identity()),
                _ => Err(TransformError::UnknownFrame("odom".into())),
            }
        }
    }

    impl TransformLookup for Lost {
        fn lookup(&self, _: &str, _: &str, _: LookupTime) -> Result<Isometry3<f64>, TransformError> {
            Err(TransformError::UnknownFrame("odom".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        cmds: Mutex<Vec<VelCmd>>,
        times: Mutex<Vec<Instant>>,
    }

    impl VelocitySink for RecordingSink {
        fn publish(&self, cmd: VelCmd) -> Result<(), VelPubError> {
            self.cmds.lock().unwrap().push(cmd);
            self.times.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    fn controller(
        tf: Arc<dyn TransformLookup>,
        pose_timeout_s: f64,
    ) -> (ApproachController, Arc<RecordingSink>) {
        controller_at(tf, pose_timeout_s, 1000.0)
    }

    fn controller_at(
        tf: Arc<dyn TransformLookup>,
        pose_timeout_s: f64,
        rate_hz: f64,
    ) -> (ApproachController, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let resolver = Arc::new(PoseResolver::new(tf, FrameParams::default()));

        let ctrl = ApproachController::new(
            resolver,
            sink.clone(),
            &ApproachParams {
                rate_hz,
                pose_timeout_s,
            },
        );

        (ctrl, sink)
    }

    fn moving(step_m: f64, max_m: f64, num_failures: usize) -> Arc<MovingRobot> {
        Arc::new(MovingRobot {
            step_m,
            max_m,
            num_failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn num_zero(sink: &RecordingSink) -> usize {
        sink.cmds.lock().unwrap().iter().filter(|c| c.is_zero()).count()
    }

    #[test]
    fn test_completes_at_target_distance() {
        let (ctrl, sink) = controller(moving(0.1, 100.0, 0), 1.0);
        let mut remaining = vec![];

        let outcome = ctrl
            .run(Direction::Forward, 1.0, 0.05, &CancelToken::new(), &mut |r| {
                remaining.push(r)
            })
            .unwrap();

        match outcome {
            ApproachOutcome::Completed { travelled_m } => assert!(travelled_m >= 1.0),
            o => panic!("Expected completion, got {:?}", o),
        }

        // Remaining distance decreases to zero
        assert!(remaining.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*remaining.last().unwrap(), 0.0);

        // Constant forward speed then exactly one stop, which is the last command
        assert_eq!(num_zero(&sink), 1);
        let cmds = sink.cmds.lock().unwrap();
        assert!(cmds.last().unwrap().is_zero());
        assert!(cmds[..cmds.len() - 1]
            .iter()
            .all(|c| (c.linear_ms - 0.05).abs() < 1e-12 && c.angular_rads == 0.0));
    }

    #[test]
    fn test_backward_direction() {
        let (ctrl, sink) = controller(moving(0.25, 100.0, 0), 1.0);

        ctrl.run(Direction::Backward, 0.5, 0.05, &CancelToken::new(), &mut |_| ())
            .unwrap();

        let cmds = sink.cmds.lock().unwrap();
        assert!((cmds[0].linear_ms + 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_never_completes_short_of_target() {
        // The robot stalls at 0.5 m, the loop must keep going until cancelled
        let (ctrl, sink) = controller(moving(0.1, 0.5, 0), 1.0);
        let cancel = CancelToken::new();

        let cancel_clone = cancel.clone();
        let jh = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel_clone.cancel();
        });

        let outcome = ctrl
            .run(Direction::Forward, 1.0, 0.05, &cancel, &mut |_| ())
            .unwrap();
        jh.join().unwrap();

        assert_eq!(outcome, ApproachOutcome::Cancelled);
        assert_eq!(num_zero(&sink), 1);
        assert!(sink.cmds.lock().unwrap().last().unwrap().is_zero());
    }

    #[test]
    fn test_cancel_exits_within_one_tick() {
        let period = Duration::from_millis(50);
        let (ctrl, sink) = controller_at(moving(0.01, 0.2, 0), 1.0, 20.0);
        let cancel = CancelToken::new();

        let cancel_clone = cancel.clone();
        let jh = thread::spawn(move || {
            thread::sleep(Duration::from_millis(175));
            let cancel_instant = Instant::now();
            cancel_clone.cancel();
            cancel_instant
        });

        let outcome = ctrl
            .run(Direction::Forward, 1.0, 0.05, &cancel, &mut |_| ())
            .unwrap();
        let end_instant = Instant::now();
        let cancel_instant = jh.join().unwrap();

        assert_eq!(outcome, ApproachOutcome::Cancelled);
        assert!(end_instant.duration_since(cancel_instant) < 2 * period);

        // At most the command of the tick in progress goes out after the cancel, then the stop
        let cmds = sink.cmds.lock().unwrap();
        let times = sink.times.lock().unwrap();
        let num_moving_after = cmds
            .iter()
            .zip(times.iter())
            .filter(|(c, t)| !c.is_zero() && **t > cancel_instant)
            .count();
        assert!(num_moving_after <= 1);
        assert!(cmds.last().unwrap().is_zero());
        assert_eq!(cmds.iter().filter(|c| c.is_zero()).count(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (ctrl, sink) = controller(moving(0.1, 100.0, 0), 1.0);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = ctrl
            .run(Direction::Forward, 1.0, 0.05, &cancel, &mut |_| ())
            .unwrap();

        assert_eq!(outcome, ApproachOutcome::Cancelled);
        assert_eq!(*sink.cmds.lock().unwrap(), vec![VelCmd::zero()]);
    }

    #[test]
    fn test_transient_pose_failures_tolerated() {
        // Baseline is retried, then the loop recovers once poses come back
        let (ctrl, sink) = controller(moving(0.2, 100.0, 5), 1.0);

        let outcome = ctrl
            .run(Direction::Forward, 1.0, 0.05, &CancelToken::new(), &mut |_| ())
            .unwrap();

        assert!(matches!(outcome, ApproachOutcome::Completed { .. }));
        assert_eq!(num_zero(&sink), 1);
    }

    #[test]
    fn test_pose_lost_during_approach() {
        let (ctrl, sink) = controller(Arc::new(Vanishing::default()), 0.02);

        let result = ctrl.run(Direction::Forward, 1.0, 0.05, &CancelToken::new(), &mut |_| ());

        assert!(matches!(result, Err(ApproachError::PoseTimeout { .. })));

        // Velocity kept being commanded while waiting for the pose, then a single stop
        let cmds = sink.cmds.lock().unwrap();
        assert!(cmds.len() > 2);
        assert_eq!(cmds.iter().filter(|c| c.is_zero()).count(), 1);
        assert!(cmds.last().unwrap().is_zero());
    }

    #[test]
    fn test_baseline_timeout() {
        let (ctrl, sink) = controller(Arc::new(Lost), 0.02);

        let result = ctrl.run(Direction::Forward, 1.0, 0.05, &CancelToken::new(), &mut |_| ());

        assert!(matches!(result, Err(ApproachError::BaselineUnavailable(_))));
        assert_eq!(*sink.cmds.lock().unwrap(), vec![VelCmd::zero()]);
    }
}
