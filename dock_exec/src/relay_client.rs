//! # Relay Client
//!
//! Drives the charge relay through the base's digital output service.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    convert::TryFrom,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use comms_if::{
    eqpt::relay::{DigitalOutputDems, DigitalOutputResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::info;
use util::time::seconds_to_std;

use crate::params::RelayParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How often the connection state is checked while waiting for the service.
const CONNECT_POLL_PERIOD: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something that can switch a digital output.
pub trait RelayCtrl: Send + Sync {
    /// Set the given output channel on or off.
    ///
    /// Blocks until the service acknowledges the demand, or the configured timeout expires.
    fn set_relay(&self, channel: u8, on: bool) -> Result<(), RelayError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client for the base's digital output service
pub struct RelayClient {
    socket: Mutex<MonitoredSocket>,

    timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The relay service did not respond within {0:?}")]
    Unreachable(Duration),

    #[error("The relay service rejected the demand: {0:?}")]
    Rejected(DigitalOutputResponse),

    #[error("Could not send demands to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the demands: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server sent a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("The client's socket lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RelayClient {
    /// Create a new instance of the relay client.
    ///
    /// This function will not block until the server connects.
    pub fn new(
        ctx: &zmq::Context,
        net_params: &NetParams,
        params: &RelayParams,
    ) -> Result<Self, RelayError> {
        let timeout = seconds_to_std(params.timeout_s);

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions::req_client(recv_timeout_ms(timeout)),
            &net_params.relay_endpoint,
        )
        .map_err(RelayError::SocketError)?;

        Ok(Self {
            socket: Mutex::new(socket),
            timeout,
        })
    }
}

/// Socket receive timeout for the given wait. Saturates, since a negative timeout means waiting
/// forever.
fn recv_timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

impl RelayCtrl for RelayClient {
    fn set_relay(&self, channel: u8, on: bool) -> Result<(), RelayError> {
        let socket = self.socket.lock()?;

        if !socket.wait_connected(self.timeout, CONNECT_POLL_PERIOD) {
            return Err(RelayError::Unreachable(self.timeout));
        }

        let dems_str = serde_json::to_string(&DigitalOutputDems { channel, state: on })
            .map_err(RelayError::SerializationError)?;

        socket.send(&dems_str, 0).map_err(RelayError::SendError)?;

        let rep_str = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(RelayError::NonUtf8Response),
            Err(zmq::Error::EAGAIN) => return Err(RelayError::Unreachable(self.timeout)),
            Err(e) => return Err(RelayError::RecvError(e)),
        };

        match serde_json::from_str::<DigitalOutputResponse>(&rep_str)
            .map_err(RelayError::DeserializeError)?
        {
            DigitalOutputResponse::DemsOk => {
                info!("Relay channel {} set {}", channel, if on { "on" } else { "off" });
                Ok(())
            }
            r => Err(RelayError::Rejected(r)),
        }
    }
}

impl<G> From<PoisonError<G>> for RelayError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}
