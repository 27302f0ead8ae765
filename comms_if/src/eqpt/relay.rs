//! # Digital Output (Relay) Commands
//!
//! The robot base exposes its digital outputs as a request/reply service. The charge relay is one
//! of these outputs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demand sent to the base to drive one digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalOutputDems {
    /// Output channel on the base
    pub channel: u8,

    /// `true` energises the output
    pub state: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Response from the base based on the demands sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitalOutputResponse {
    /// Demand was valid and the output has been set
    DemsOk,

    /// The channel does not exist on this base
    InvalidChannel,

    /// Equipment is invalid so the output cannot be driven
    EqptInvalid,
}
