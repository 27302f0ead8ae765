//! # Velocity Publisher
//!
//! Publishes velocity commands to the base. Commands are fire and forget, the base keeps
//! executing the last command it received.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, PoisonError};

use comms_if::{
    eqpt::base::VelCmd,
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Destination for velocity commands.
pub trait VelocitySink: Send + Sync {
    fn publish(&self, cmd: VelCmd) -> Result<(), VelPubError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct VelPublisher {
    socket: Mutex<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VelPubError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the command: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),

    #[error("The publisher's socket lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VelPublisher {
    /// Create a new instance of the velocity publisher.
    ///
    /// This function will not block until the base connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, VelPubError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::server(0),
            &params.vel_endpoint,
        )
        .map_err(VelPubError::SocketError)?;

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

impl VelocitySink for VelPublisher {
    fn publish(&self, cmd: VelCmd) -> Result<(), VelPubError> {
        let cmd_str = serde_json::to_string(&cmd).map_err(VelPubError::SerializationError)?;

        self.socket
            .lock()?
            .send(&cmd_str, 0)
            .map_err(VelPubError::SendError)
    }
}

impl<G> From<PoisonError<G>> for VelPubError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}
