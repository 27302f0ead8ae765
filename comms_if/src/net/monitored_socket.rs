//! # Monitored Socket
//!
//! A ZMQ socket paired with a monitor thread. The thread follows the socket's connection events
//! and keeps a count of connected peers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the monitor socket, in milliseconds.
///
/// Bounds how long the monitor thread takes to notice a shutdown request.
const MONITOR_RECV_TIMEOUT_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Used to give each monitor a unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket whose connection state is tracked in the background.
///
/// Derefs to the underlying [`zmq::Socket`] for sending and receiving.
pub struct MonitoredSocket {
    socket: Socket,

    monitor_jh: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    /// Number of peers currently connected
    peers: Arc<AtomicUsize>,
}

/// Options applied to a monitored socket.
///
/// Most options here correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) documentation. Prefer the
/// [`SocketOptions::req_client`], [`SocketOptions::sub_client`] and [`SocketOptions::server`]
/// presets.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Bind to the endpoint rather than connect to it. Servers bind, clients connect.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// If true [`MonitoredSocket::new`] blocks until a peer connects, or `connect_timeout`
    /// elapses, in which case `CouldNotConnect` is returned.
    ///
    /// The default value is `true`.
    pub block_on_first_connect: bool,

    /// `ZMQ_REQ_CORRELATE`: Match replies with requests
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`: relax strict alternation between request and reply
    pub req_relaxed: bool,

    /// `ZMQ_CONFLATE`: Keep only last message. Only applied to SUB sockets.
    pub conflate: bool,

    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`: Set reconnection interval
    pub reconnect_ivl: i32,

    /// `ZMQ_RECONNECT_IVL_MAX`: Set maximum reconnection interval
    pub reconnect_ivl_max: i32,

    /// `ZMQ_CONNECT_TIMEOUT`: Set `connect()` timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`: Maximum time before a recv operation returns with `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL (time to live) value for ZMTP heartbeats
    pub heartbeat_ttl: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket and bind or connect it to `endpoint`.
    ///
    /// SUB sockets are subscribed to all messages.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        // The monitor must be connected before the socket so no event is missed
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .set_rcvtimeo(MONITOR_RECV_TIMEOUT_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        options.set(&socket)?;

        match options.bind {
            true => socket.bind(endpoint),
            false => socket.connect(endpoint),
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        let peers = Arc::new(AtomicUsize::new(0));

        if options.block_on_first_connect {
            wait_first_connect(&monitor, options.connect_timeout)?;
            peers.store(1, Ordering::Relaxed);
        }

        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown_clone = shutdown.clone();
        let peers_clone = peers.clone();
        let monitor_jh = thread::spawn(move || {
            monitor_thread(monitor, monitor_endpoint, shutdown_clone, peers_clone)
        });

        debug!(
            "Socket {} {}",
            if options.bind { "bound to" } else { "connecting to" },
            endpoint
        );

        Ok(Self {
            socket,
            monitor_jh: Some(monitor_jh),
            shutdown,
            peers,
        })
    }

    /// Whether at least one peer is connected.
    pub fn connected(&self) -> bool {
        self.num_peers() > 0
    }

    pub fn num_peers(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }

    /// Block until a peer is connected, or the timeout expires.
    ///
    /// Returns whether the socket is connected.
    pub fn wait_connected(&self, timeout: Duration, poll_period: Duration) -> bool {
        let start = Instant::now();

        while !self.connected() {
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(poll_period);
        }

        true
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.monitor_jh.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_reconnect_ivl_max, self.reconnect_ivl_max),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        match socket.get_socket_type() {
            Ok(SocketType::REQ) => {
                set_sockopts!(
                    socket,
                    (set_req_correlate, self.req_correlate),
                    (set_req_relaxed, self.req_relaxed)
                );
            }
            Ok(SocketType::SUB) => {
                // Conflate must be set before subscribing
                set_sockopts!(
                    socket,
                    (set_conflate, self.conflate),
                    (set_subscribe, b"")
                );
            }
            _ => (),
        }

        Ok(())
    }

    /// Options for a client REQ socket talking to an equipment server.
    ///
    /// The client doesn't wait for the server to come up, instead callers check
    /// [`MonitoredSocket::connected`] or use [`MonitoredSocket::wait_connected`]. Relaxed,
    /// correlated requests let the client send a new request after a timed out one.
    pub fn req_client(recv_timeout_ms: i32) -> Self {
        Self {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: recv_timeout_ms,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        }
    }

    /// Options for a non-blocking SUB socket listening to a data stream.
    pub fn sub_client(conflate: bool) -> Self {
        Self {
            block_on_first_connect: false,
            linger: 1,
            recv_timeout: 0,
            conflate,
            ..Default::default()
        }
    }

    /// Options for a server socket (REP or PUB) which binds to its endpoint.
    pub fn server(recv_timeout_ms: i32) -> Self {
        Self {
            bind: true,
            block_on_first_connect: false,
            linger: 1,
            recv_timeout: recv_timeout_ms,
            send_timeout: 10,
            ..Default::default()
        }
    }
}

impl Default for SocketOptions {
    /// zmq's own defaults, see http://api.zeromq.org/4-2:zmq-setsockopt
    fn default() -> Self {
        Self {
            bind: false,
            block_on_first_connect: true,
            conflate: false,
            connect_timeout: 0,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            reconnect_ivl_max: 0,
            recv_timeout: -1,
            req_correlate: false,
            req_relaxed: false,
            send_timeout: -1,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Block until the monitor reports the first connection. A `connect_timeout_ms` of zero or less
/// waits forever.
fn wait_first_connect(monitor: &Socket, connect_timeout_ms: i32) -> Result<(), MonitoredSocketError> {
    let deadline = match connect_timeout_ms {
        t if t > 0 => Some(Instant::now() + Duration::from_millis(t as u64)),
        _ => None,
    };

    loop {
        if let Some(d) = deadline {
            if Instant::now() > d {
                return Err(MonitoredSocketError::CouldNotConnect(None));
            }
        }

        match read_event(monitor) {
            Ok(SocketEvent::CONNECTED) => return Ok(()),
            Ok(SocketEvent::CONNECT_DELAYED) | Ok(SocketEvent::CONNECT_RETRIED) => continue,
            Ok(_) => return Err(MonitoredSocketError::CouldNotConnect(None)),
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => return Err(MonitoredSocketError::EventReadError(e)),
        }
    }
}

/// Read one event from a monitor socket.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = monitor.recv_msg(0)?;

    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL);
    }
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Each event is followed by the peer's address, which isn't needed
    if monitor.get_rcvmore()? {
        monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

/// Peer count after the given event.
fn apply_event(peers: usize, event: SocketEvent) -> usize {
    match event {
        SocketEvent::CONNECTED | SocketEvent::ACCEPTED => peers + 1,
        SocketEvent::DISCONNECTED => peers.saturating_sub(1),
        _ => peers,
    }
}

fn monitor_thread(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    peers: Arc<AtomicUsize>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Error reading event from monitor {}: {}", monitor_endpoint, e);
                break;
            }
        };

        let num = apply_event(peers.load(Ordering::Relaxed), event);
        peers.store(num, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_peer_count() {
        let mut peers = 0;

        for event in [
            SocketEvent::ACCEPTED,
            SocketEvent::ACCEPTED,
            SocketEvent::HANDSHAKE_SUCCEEDED,
            SocketEvent::DISCONNECTED,
        ]
        .iter()
        {
            peers = apply_event(peers, *event);
        }
        assert_eq!(peers, 1);

        // Spurious disconnects never underflow
        assert_eq!(apply_event(0, SocketEvent::DISCONNECTED), 0);
        assert_eq!(apply_event(0, SocketEvent::CONNECTED), 1);
    }

    #[test]
    fn test_presets() {
        let server = SocketOptions::server(10);
        assert!(server.bind);
        assert!(!server.block_on_first_connect);
        assert_eq!(server.recv_timeout, 10);

        let sub = SocketOptions::sub_client(true);
        assert!(!sub.bind);
        assert!(sub.conflate);
        assert_eq!(sub.recv_timeout, 0);

        let req = SocketOptions::req_client(500);
        assert!(req.req_relaxed && req.req_correlate);
        assert_eq!(req.recv_timeout, 500);
    }

    #[test]
    fn test_server_socket_starts_unconnected() {
        let ctx = zmq::Context::new();
        let socket = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            SocketOptions::server(0),
            "inproc://test_server_socket",
        )
        .unwrap();

        assert!(!socket.connected());
        assert!(!socket.wait_connected(Duration::from_millis(20), Duration::from_millis(1)));
    }
}
