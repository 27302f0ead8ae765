//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the docking software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Dock action requests, responses and events exchanged with the dock server
pub mod dock;

/// Command and response definitions for equipment (navigation, relay, base, transforms)
pub mod eqpt;

/// Network module
pub mod net;
