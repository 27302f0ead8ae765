//! # Dock library.
//!
//! This library allows other crates in the workspace (and the integration tests) to access items
//! defined inside the dock executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Approach controller - drives the base in a straight line for a fixed distance
pub mod approach;

/// Cancellation token shared between the sequencer, navigation waits and the approach loop
pub mod cancel;

/// Dock pose client - receives dock pose reports from the dock detection sensor
pub mod dock_pose_client;

/// Dock sequencer - owns the dock state and runs the dock and undock sequences
pub mod dock_seq;

/// Dock server - accepts dock requests and publishes feedback and results
pub mod dock_server;

/// Localisation types - poses and conversions to and from the wire format
pub mod loc;

/// Navigation client - delegates long distance motion to the navigation server
pub mod nav_client;

/// Dock executable parameters
pub mod params;

/// Pose resolution on top of the transform tree
pub mod pose_resolver;

/// Relay client - toggles the charge relay via the base's digital outputs
pub mod relay_client;

/// Transform tree and its network feed
pub mod tf;

/// Velocity publisher - sends velocity commands to the base
pub mod vel_pub;
