//! # Transform tree
//!
//! Keeps track of the relationships between the coordinate frames of the system. Each frame has a
//! single parent and a bounded, time ordered history of its transform relative to that parent.
//! Static transforms (fixed sensor mounts, the map origin) hold a single sample which is valid at
//! any time.
//!
//! A lookup walks both frames up to their closest common ancestor and composes the links on the
//! way. Lookups at a specific time interpolate each link between the two samples bracketing that
//! time (linearly for the translation, slerp for the rotation), and fail with
//! [`TransformError::Extrapolation`] if the time falls outside the stored history.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod client;
pub use client::{TfClient, TfClientError};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{HashMap, VecDeque},
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use comms_if::eqpt::tf::{PoseMsg, TfMsg, TransformStampedMsg};
use log::warn;
use nalgebra::{Isometry3, Translation3};
use util::{maths::interp_fraction, time::duration_to_seconds};

use crate::loc::Pose;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of transforms between named frames.
pub trait TransformLookup: Send + Sync {
    /// Get the transform taking points in `source_frame` into `target_frame`.
    ///
    /// Equivalently this is the pose of `source_frame` expressed in `target_frame`.
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: LookupTime,
    ) -> Result<Isometry3<f64>, TransformError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// In-process transform tree.
#[derive(Debug)]
pub struct TfBuffer {
    links: RwLock<HashMap<String, FrameLink>>,

    history_len: usize,
}

/// The link between a frame and its parent.
#[derive(Debug)]
struct FrameLink {
    parent: String,

    is_static: bool,

    /// Samples ordered by increasing stamp, never empty
    history: VecDeque<StampedTransform>,
}

#[derive(Debug, Clone, Copy)]
struct StampedTransform {
    stamp: DateTime<Utc>,

    /// Transform of the child frame in the parent frame
    transform: Isometry3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Time at which a transform is looked up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LookupTime {
    /// Newest available sample of every link
    Latest,

    /// Interpolated at the given time
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Frame \"{0}\" does not exist in the transform tree")]
    UnknownFrame(String),

    #[error("Frames \"{0}\" and \"{1}\" are not connected by the transform tree")]
    Disconnected(String, String),

    #[error(
        "Lookup of \"{frame}\" at {requested} would require extrapolation, history covers {oldest} \
         to {newest}"
    )]
    Extrapolation {
        frame: String,
        requested: DateTime<Utc>,
        oldest: DateTime<Utc>,
        newest: DateTime<Utc>,
    },

    #[error("Adding a parent to frame \"{0}\" would create a loop in the transform tree")]
    Loop(String),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("The transform tree lock is poisoned")]
    Poisoned,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TfBuffer {
    /// Create an empty tree keeping up to `history_len` samples per frame.
    pub fn new(history_len: usize) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            history_len: history_len.max(1),
        }
    }

    /// Add a transform to the tree.
    ///
    /// A frame reported with a different parent (or a change between static and dynamic) than
    /// before has its history replaced.
    pub fn insert(&self, msg: &TransformStampedMsg) -> Result<(), TransformError> {
        if msg.parent_frame.is_empty() || msg.child_frame.is_empty() {
            return Err(TransformError::InvalidTransform("empty frame id".into()));
        }
        if msg.parent_frame == msg.child_frame {
            return Err(TransformError::InvalidTransform(format!(
                "frame \"{}\" cannot be its own parent",
                msg.child_frame
            )));
        }
        if !msg
            .translation_m
            .iter()
            .chain(msg.rotation_q.iter())
            .all(|v| v.is_finite())
        {
            return Err(TransformError::InvalidTransform(format!(
                "non-finite transform from \"{}\" to \"{}\"",
                msg.parent_frame, msg.child_frame
            )));
        }

        let transform = Pose::from_msg(&PoseMsg {
            position_m: msg.translation_m,
            orientation_q: msg.rotation_q,
        })
        .to_isometry();
        let sample = StampedTransform {
            stamp: msg.stamp,
            transform,
        };

        let mut links = self.links.write()?;

        // Walk up from the new parent, if we meet the child the new link would close a loop
        let mut frame = msg.parent_frame.as_str();
        for _ in 0..=links.len() {
            if frame == msg.child_frame {
                return Err(TransformError::Loop(msg.child_frame.clone()));
            }
            match links.get(frame) {
                Some(l) => frame = l.parent.as_str(),
                None => break,
            }
        }

        let link = links
            .entry(msg.child_frame.clone())
            .or_insert_with(|| FrameLink {
                parent: msg.parent_frame.clone(),
                is_static: msg.is_static,
                history: VecDeque::new(),
            });

        if link.parent != msg.parent_frame || link.is_static != msg.is_static {
            warn!(
                "Frame \"{}\" changed parent from \"{}\" to \"{}\" (static: {})",
                msg.child_frame, link.parent, msg.parent_frame, msg.is_static
            );
            link.parent = msg.parent_frame.clone();
            link.is_static = msg.is_static;
            link.history.clear();
        }

        if link.is_static {
            link.history.clear();
            link.history.push_back(sample);
            return Ok(());
        }

        let idx = link
            .history
            .iter()
            .position(|s| s.stamp >= sample.stamp)
            .unwrap_or_else(|| link.history.len());

        let same_stamp = link
            .history
            .get(idx)
            .map(|s| s.stamp == sample.stamp)
            .unwrap_or(false);

        if same_stamp {
            link.history[idx] = sample;
        } else {
            link.history.insert(idx, sample);
        }

        while link.history.len() > self.history_len {
            link.history.pop_front();
        }

        Ok(())
    }

    /// Add every transform in the message, returning how many were accepted.
    ///
    /// Rejected transforms are logged and skipped.
    pub fn insert_all(&self, msg: &TfMsg) -> usize {
        let mut num_accepted = 0;

        for t in msg.transforms.iter() {
            match self.insert(t) {
                Ok(()) => num_accepted += 1,
                Err(e) => warn!(
                    "Rejected transform \"{}\" -> \"{}\": {}",
                    t.parent_frame, t.child_frame, e
                ),
            }
        }

        num_accepted
    }
}

impl TransformLookup for TfBuffer {
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: LookupTime,
    ) -> Result<Isometry3<f64>, TransformError> {
        let links = self.links.read()?;

        for f in [target_frame, source_frame].iter() {
            if !frame_known(&links, f) {
                return Err(TransformError::UnknownFrame(f.to_string()));
            }
        }

        if target_frame == source_frame {
            return Ok(Isometry3::identity());
        }

        let target_chain = ancestry(&links, target_frame)?;
        let source_chain = ancestry(&links, source_frame)?;

        let ancestor = match source_chain.iter().find(|f| target_chain.contains(*f)) {
            Some(a) => *a,
            None => {
                return Err(TransformError::Disconnected(
                    target_frame.to_string(),
                    source_frame.to_string(),
                ))
            }
        };

        let anc_from_source = compose_to(&links, &source_chain, ancestor, time)?;
        let anc_from_target = compose_to(&links, &target_chain, ancestor, time)?;

        Ok(anc_from_target.inverse() * anc_from_source)
    }
}

impl FrameLink {
    /// Get the transform of this link at the given time.
    fn sample(&self, frame: &str, time: LookupTime) -> Result<Isometry3<f64>, TransformError> {
        let (oldest, newest) = match (self.history.front(), self.history.back()) {
            (Some(o), Some(n)) => (o, n),
            _ => return Err(TransformError::UnknownFrame(frame.to_string())),
        };

        let t = match time {
            _ if self.is_static => return Ok(newest.transform),
            LookupTime::Latest => return Ok(newest.transform),
            LookupTime::At(t) => t,
        };

        if t < oldest.stamp || t > newest.stamp {
            return Err(TransformError::Extrapolation {
                frame: frame.to_string(),
                requested: t,
                oldest: oldest.stamp,
                newest: newest.stamp,
            });
        }

        let idx = self
            .history
            .iter()
            .position(|s| s.stamp >= t)
            .unwrap_or(self.history.len() - 1);

        let after = &self.history[idx];
        if after.stamp == t || idx == 0 {
            return Ok(after.transform);
        }
        let before = &self.history[idx - 1];

        let span_s = duration_to_seconds(after.stamp - before.stamp).unwrap_or(0.0);
        let offset_s = duration_to_seconds(t - before.stamp).unwrap_or(0.0);
        let frac = interp_fraction(0.0, span_s, offset_s);

        Ok(interpolate(&before.transform, &after.transform, frac))
    }
}

impl<G> From<PoisonError<G>> for TransformError {
    fn from(_: PoisonError<G>) -> Self {
        Self::Poisoned
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn frame_known(links: &HashMap<String, FrameLink>, frame: &str) -> bool {
    links.contains_key(frame) || links.values().any(|l| l.parent == frame)
}

/// List the frame and all of its ancestors, ending with the root of its tree.
fn ancestry<'a>(
    links: &'a HashMap<String, FrameLink>,
    frame: &'a str,
) -> Result<Vec<&'a str>, TransformError> {
    let mut chain = vec![frame];
    let mut current = frame;

    while let Some(link) = links.get(current) {
        if chain.len() > links.len() {
            return Err(TransformError::Loop(frame.to_string()));
        }
        current = link.parent.as_str();
        chain.push(current);
    }

    Ok(chain)
}

/// Compose the links from the first frame of `chain` up to `ancestor`, giving the pose of the
/// first frame in the ancestor.
fn compose_to(
    links: &HashMap<String, FrameLink>,
    chain: &[&str],
    ancestor: &str,
    time: LookupTime,
) -> Result<Isometry3<f64>, TransformError> {
    let mut acc = Isometry3::identity();

    for frame in chain.iter().take_while(|f| **f != ancestor) {
        let link = links
            .get(*frame)
            .ok_or_else(|| TransformError::UnknownFrame(frame.to_string()))?;

        acc = link.sample(frame, time)? * acc;
    }

    Ok(acc)
}

fn interpolate(a: &Isometry3<f64>, b: &Isometry3<f64>, frac: f64) -> Isometry3<f64> {
    let ta = a.translation.vector;
    let tb = b.translation.vector;
    let translation = ta + (tb - ta) * frac;

    // Opposite rotations have no unique slerp, fall back to the nearest sample
    let rotation = a
        .rotation
        .try_slerp(&b.rotation, frac, 1e-9)
        .unwrap_or(if frac < 0.5 { a.rotation } else { b.rotation });

    Isometry3::from_parts(Translation3::from(translation), rotation)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};
    use nalgebra::{UnitQuaternion, Vector3};
    use std::f64::consts::FRAC_PI_2;

    fn t0() -> DateTime<Utc> {
        Utc.ymd(2021, 6, 1).and_hms(12, 0, 0)
    }

    fn tf(parent: &str, child: &str, stamp: DateTime<Utc>, xyz: [f64; 3], yaw: f64) -> TransformStampedMsg {
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw);
        let c = q.quaternion().coords;
        TransformStampedMsg {
            parent_frame: parent.into(),
            child_frame: child.into(),
            stamp,
            translation_m: xyz,
            rotation_q: [c[0], c[1], c[2], c[3]],
            is_static: false,
        }
    }

    fn static_tf(parent: &str, child: &str, xyz: [f64; 3], yaw: f64) -> TransformStampedMsg {
        TransformStampedMsg {
            is_static: true,
            ..tf(parent, child, t0(), xyz, yaw)
        }
    }

    fn assert_vec_eq(a: &Vector3<f64>, b: [f64; 3]) {
        assert!(
            (a - Vector3::from(b)).norm() < 1e-9,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_chain_lookup() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("map", "odom", [1.0, 0.0, 0.0], FRAC_PI_2)).unwrap();
        buf.insert(&tf("odom", "base_footprint", t0(), [2.0, 0.0, 0.0], 0.0)).unwrap();

        // base is 2 m along odom's x, which points along map's y
        let t = buf.lookup("map", "base_footprint", LookupTime::Latest).unwrap();
        assert_vec_eq(&t.translation.vector, [1.0, 2.0, 0.0]);
        assert!((t.rotation.euler_angles().2 - FRAC_PI_2).abs() < 1e-9);

        // And the reverse
        let inv = buf.lookup("base_footprint", "map", LookupTime::Latest).unwrap();
        assert_vec_eq(&(inv * t).translation.vector, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sibling_lookup() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("map", "odom", [0.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&tf("odom", "base_footprint", t0(), [1.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&static_tf("base_footprint", "laser", [0.2, 0.0, 0.3], 0.0)).unwrap();
        buf.insert(&tf("laser", "dock", t0(), [1.0, 0.5, 0.0], 0.0)).unwrap();
        buf.insert(&static_tf("base_footprint", "camera", [0.0, 0.1, 0.5], 0.0)).unwrap();

        let t = buf.lookup("camera", "dock", LookupTime::Latest).unwrap();
        assert_vec_eq(&t.translation.vector, [1.2, 0.4, -0.2]);

        let t = buf.lookup("map", "dock", LookupTime::Latest).unwrap();
        assert_vec_eq(&t.translation.vector, [2.2, 0.5, 0.3]);
    }

    #[test]
    fn test_same_frame_is_identity() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("map", "odom", [3.0, 0.0, 0.0], 0.0)).unwrap();

        let t = buf.lookup("map", "map", LookupTime::Latest).unwrap();
        assert_eq!(t, Isometry3::identity());
    }

    #[test]
    fn test_unknown_and_disconnected() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("map", "odom", [0.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&static_tf("world", "dock", [0.0, 0.0, 0.0], 0.0)).unwrap();

        assert_eq!(
            buf.lookup("map", "base_footprint", LookupTime::Latest),
            Err(TransformError::UnknownFrame("base_footprint".into()))
        );
        assert_eq!(
            buf.lookup("odom", "dock", LookupTime::Latest),
            Err(TransformError::Disconnected("odom".into(), "dock".into()))
        );
    }

    #[test]
    fn test_interpolation() {
        let buf = TfBuffer::new(10);
        buf.insert(&tf("odom", "base_footprint", t0(), [0.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&tf(
            "odom",
            "base_footprint",
            t0() + Duration::seconds(2),
            [2.0, 4.0, 0.0],
            FRAC_PI_2,
        ))
        .unwrap();

        let t = buf
            .lookup("odom", "base_footprint", LookupTime::At(t0() + Duration::seconds(1)))
            .unwrap();
        assert_vec_eq(&t.translation.vector, [1.0, 2.0, 0.0]);
        assert!((t.rotation.euler_angles().2 - FRAC_PI_2 / 2.0).abs() < 1e-9);

        // Exact sample times need no interpolation
        let t = buf
            .lookup("odom", "base_footprint", LookupTime::At(t0()))
            .unwrap();
        assert_vec_eq(&t.translation.vector, [0.0, 0.0, 0.0]);

        // Latest takes the newest
        let t = buf.lookup("odom", "base_footprint", LookupTime::Latest).unwrap();
        assert_vec_eq(&t.translation.vector, [2.0, 4.0, 0.0]);
    }

    #[test]
    fn test_extrapolation() {
        let buf = TfBuffer::new(10);
        buf.insert(&tf("odom", "base_footprint", t0(), [0.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&tf("odom", "base_footprint", t0() + Duration::seconds(1), [1.0, 0.0, 0.0], 0.0))
            .unwrap();

        for t in [t0() - Duration::milliseconds(1), t0() + Duration::seconds(2)].iter() {
            match buf.lookup("odom", "base_footprint", LookupTime::At(*t)) {
                Err(TransformError::Extrapolation { frame, .. }) => {
                    assert_eq!(frame, "base_footprint")
                }
                r => panic!("Expected extrapolation error, got {:?}", r),
            }
        }
    }

    #[test]
    fn test_static_valid_at_any_time() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("base_footprint", "laser", [0.2, 0.0, 0.0], 0.0)).unwrap();

        let t = buf
            .lookup(
                "base_footprint",
                "laser",
                LookupTime::At(t0() + Duration::days(365)),
            )
            .unwrap();
        assert_vec_eq(&t.translation.vector, [0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_history_bounded_and_ordered() {
        let buf = TfBuffer::new(3);

        // Insert out of order
        for i in [4, 0, 3, 1, 2].iter() {
            buf.insert(&tf(
                "odom",
                "base_footprint",
                t0() + Duration::seconds(*i),
                [*i as f64, 0.0, 0.0],
                0.0,
            ))
            .unwrap();
        }

        // Only the newest 3 (2, 3, 4) remain
        assert!(buf
            .lookup("odom", "base_footprint", LookupTime::At(t0() + Duration::seconds(1)))
            .is_err());
        let t = buf
            .lookup(
                "odom",
                "base_footprint",
                LookupTime::At(t0() + Duration::milliseconds(3500)),
            )
            .unwrap();
        assert_vec_eq(&t.translation.vector, [3.5, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_transforms() {
        let buf = TfBuffer::new(10);
        buf.insert(&static_tf("map", "odom", [0.0, 0.0, 0.0], 0.0)).unwrap();
        buf.insert(&static_tf("odom", "base_footprint", [0.0, 0.0, 0.0], 0.0)).unwrap();

        assert_eq!(
            buf.insert(&static_tf("base_footprint", "map", [0.0, 0.0, 0.0], 0.0)),
            Err(TransformError::Loop("map".into()))
        );
        assert!(matches!(
            buf.insert(&static_tf("map", "map", [0.0, 0.0, 0.0], 0.0)),
            Err(TransformError::InvalidTransform(_))
        ));
        assert!(matches!(
            buf.insert(&static_tf("map", "laser", [std::f64::NAN, 0.0, 0.0], 0.0)),
            Err(TransformError::InvalidTransform(_))
        ));

        // The rejected inserts didn't change the tree
        let msg = TfMsg {
            transforms: vec![
                static_tf("map", "map", [0.0; 3], 0.0),
                static_tf("base_footprint", "laser", [0.1, 0.0, 0.0], 0.0),
            ],
        };
        assert_eq!(buf.insert_all(&msg), 1);
        let t = buf.lookup("map", "laser", LookupTime::Latest).unwrap();
        assert_vec_eq(&t.translation.vector, [0.1, 0.0, 0.0]);
    }
}
