//! # Network Module
//!
//! Networking for the docking software is built on ZMQ. Every socket is wrapped in a
//! [`MonitoredSocket`] so that the owner can tell whether a peer is actually connected, which
//! plain ZMQ sockets hide.
//!
//! Servers bind, clients connect. Endpoints are configured in `net.toml`, loaded into
//! [`NetParams`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod monitored_socket;

pub use monitored_socket::{MonitoredSocket, MonitoredSocketError, SocketOptions};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network endpoints used by the docking software.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParams {
    /// Endpoint the dock server binds its request (REP) socket to
    pub dock_request_endpoint: String,

    /// Endpoint the dock server binds its feedback/result (PUB) socket to
    pub dock_event_endpoint: String,

    /// Endpoint of the navigation server (REP)
    pub nav_endpoint: String,

    /// Endpoint of the base's digital output service (REP)
    pub relay_endpoint: String,

    /// Endpoint the velocity command publisher binds to (PUB)
    pub vel_endpoint: String,

    /// Endpoint of the transform stream (PUB)
    pub tf_endpoint: String,

    /// Endpoint of the dock pose sensor stream (PUB)
    pub dock_pose_endpoint: String,
}
