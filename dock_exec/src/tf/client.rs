//! # Transform Client
//!
//! Subscribes to the transform stream and feeds every received transform into a [`TfBuffer`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::tf::TfMsg,
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::warn;

use super::TfBuffer;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Transform stream client
pub struct TfClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TfClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TfClient {
    /// Create a new instance of the transform client.
    ///
    /// This function will not block until the publisher connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TfClientError> {
        // Transforms must not be conflated, every frame's history matters
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::sub_client(false),
            &params.tf_endpoint,
        )
        .map_err(TfClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Check if the client is connected to the transform publisher
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Receive all pending transform messages and add them to the buffer.
    ///
    /// Returns the number of transforms accepted by the buffer. Malformed messages are logged and
    /// skipped.
    pub fn receive_all(&self, buffer: &TfBuffer) -> Result<usize, TfClientError> {
        let mut num_accepted = 0;

        loop {
            let msg = match self.socket.recv_string(0) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    warn!("Non UTF-8 message on the transform stream");
                    continue;
                }
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(TfClientError::RecvError(e)),
            };

            match serde_json::from_str::<TfMsg>(&msg) {
                Ok(tf) => num_accepted += buffer.insert_all(&tf),
                Err(e) => warn!("Could not deserialize transform message: {}", e),
            }
        }

        Ok(num_accepted)
    }
}
