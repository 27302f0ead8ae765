//! # Dock Command Line Interface
//!
//! Sends requests to the dock executable and follows the goals it starts, printing their feedback
//! until they resolve.
//!
//! Run with a subcommand for a single request, or without one for an interactive prompt:
//!
//! ```text
//! Dock $ dock
//! Dock $ status
//! Dock $ cancel 3
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use comms_if::{
    dock::{DockEvent, DockRequest, DockResponse, DockResult, GoalId},
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
};
use rustyline::{error::ReadlineError, DefaultEditor};
use structopt::StructOpt;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "Dock $ ";
const HISTORY_PATH: &str = "data/dock_cli_history.txt";

/// Period at which the event socket is polled while following a goal.
const EVENT_POLL_PERIOD: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "dock_cli", about = "Issue dock and undock requests to the dock executable")]
struct Opts {
    /// Network parameter file, relative to `$DOCK_SW_ROOT/params`
    #[structopt(long, default_value = "net.toml")]
    net_params: String,

    /// Host running the dock executable
    #[structopt(long, default_value = "localhost")]
    host: String,

    /// How long to wait for a response to a request
    #[structopt(long, default_value = "2000")]
    timeout_ms: i32,

    /// How long to follow a goal before giving up on its result
    #[structopt(long, default_value = "600")]
    follow_timeout_s: u64,

    #[structopt(subcommand)]
    cmd: Option<Command>,
}

/// A line typed at the interactive prompt.
#[derive(Debug, StructOpt)]
#[structopt(name = "")]
struct ReplLine {
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Dock onto the charger
    Dock,

    /// Back off the charger
    Undock,

    /// Cancel a running goal
    Cancel { goal_id: GoalId },

    /// Print the dock state and any active goal
    Status,

    /// Print every event published by the dock executable
    Watch,
}

struct DockClient {
    req_socket: MonitoredSocket,

    event_socket: MonitoredSocket,

    timeout: Duration,

    follow_timeout: Duration,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    let net_params: NetParams =
        util::params::load(&opts.net_params).wrap_err("Could not load net params")?;

    let ctx = zmq::Context::new();
    let client = DockClient::new(&ctx, &net_params, &opts)?;

    match opts.cmd {
        Some(ref cmd) => client.execute(cmd),
        None => repl(&client),
    }
}

/// Run the interactive prompt until the user exits.
fn repl(client: &DockClient) -> Result<(), Report> {
    let mut rl = DefaultEditor::new().wrap_err("Could not start the prompt")?;

    let history_path = history_path();
    if rl.load_history(&history_path).is_err() {
        println!("No history detected");
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).wrap_err("Could not read from the prompt"),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line).ok();

        if line == "exit" || line == "quit" {
            break;
        }

        let args = std::iter::once("dock_cli").chain(line.split_whitespace());
        match ReplLine::from_iter_safe(args) {
            Ok(l) => {
                if let Err(e) = client.execute(&l.cmd) {
                    println!("Error: {:?}", e);
                }
            }
            Err(e) => println!("{}", e.message),
        }
    }

    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    if let Err(e) = rl.save_history(&history_path) {
        println!("Could not save history: {}", e);
    }

    println!("Exiting...");

    Ok(())
}

fn history_path() -> PathBuf {
    match util::host::get_dock_sw_root() {
        Ok(root) => root.join(HISTORY_PATH),
        Err(_) => PathBuf::from(HISTORY_PATH),
    }
}

/// Get an endpoint a client can connect to from one a server binds to, replacing the wildcard
/// interface with `host`.
fn client_endpoint(endpoint: &str, host: &str) -> String {
    endpoint.replacen('*', host, 1)
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DockClient {
    fn new(ctx: &zmq::Context, net_params: &NetParams, opts: &Opts) -> Result<Self, Report> {
        let req_socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions::req_client(opts.timeout_ms),
            &client_endpoint(&net_params.dock_request_endpoint, &opts.host),
        )
        .wrap_err("Could not create the request socket")?;

        let event_socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::sub_client(false),
            &client_endpoint(&net_params.dock_event_endpoint, &opts.host),
        )
        .wrap_err("Could not create the event socket")?;

        Ok(Self {
            req_socket,
            event_socket,
            timeout: Duration::from_millis(opts.timeout_ms.max(0) as u64),
            follow_timeout: Duration::from_secs(opts.follow_timeout_s),
        })
    }

    fn execute(&self, cmd: &Command) -> Result<(), Report> {
        match cmd {
            Command::Dock => self.goal(true),
            Command::Undock => self.goal(false),
            Command::Cancel { goal_id } => {
                match self.request(&DockRequest::Cancel { goal_id: *goal_id })? {
                    DockResponse::CancelRequested { goal_id } => {
                        println!("Cancellation of goal {} requested", goal_id)
                    }
                    DockResponse::UnknownGoal { goal_id } => {
                        println!("Goal {} is not running", goal_id)
                    }
                    r => print_unexpected(&r),
                }
                Ok(())
            }
            Command::Status => {
                match self.request(&DockRequest::Status)? {
                    DockResponse::Status { status } => {
                        println!(
                            "{} | phase: {} | active goal: {}",
                            if status.docked { "DOCKED" } else { "UNDOCKED" },
                            status.phase,
                            status
                                .active_goal
                                .map(|id| id.to_string())
                                .unwrap_or_else(|| String::from("none"))
                        );
                    }
                    r => print_unexpected(&r),
                }
                Ok(())
            }
            Command::Watch => self.watch(),
        }
    }

    /// Submit a goal and follow it until it resolves.
    fn goal(&self, dock: bool) -> Result<(), Report> {
        // Events published before the subscription connects are lost
        if !self
            .event_socket
            .wait_connected(self.timeout, EVENT_POLL_PERIOD)
        {
            println!("Warning: not connected to the event stream, feedback may be missed");
        }

        match self.request(&DockRequest::Goal { dock })? {
            DockResponse::Accepted { goal_id } => {
                println!("Goal {} accepted", goal_id);
                let result = self.follow(goal_id)?;
                println!("Goal {} {:?}: {}", goal_id, result.outcome, result.message);
            }
            DockResponse::Rejected { goal_id, reason } => {
                println!("Goal {} rejected: {}", goal_id, reason)
            }
            r => print_unexpected(&r),
        }

        Ok(())
    }

    fn request(&self, request: &DockRequest) -> Result<DockResponse, Report> {
        let req_str = serde_json::to_string(request)?;

        self.req_socket
            .send(&req_str, 0)
            .wrap_err("Could not send the request")?;

        let rep_str = match self.req_socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(eyre!("The response was not valid UTF-8")),
            Err(zmq::Error::EAGAIN) => {
                return Err(eyre!(
                    "No response from the dock executable within {:?}",
                    self.timeout
                ))
            }
            Err(e) => return Err(e).wrap_err("Could not receive the response"),
        };

        serde_json::from_str(&rep_str).wrap_err("Could not parse the response")
    }

    /// Print the goal's feedback until its result arrives.
    fn follow(&self, goal_id: GoalId) -> Result<DockResult, Report> {
        let start = Instant::now();

        loop {
            match self.recv_event()? {
                Some(DockEvent::Feedback { goal_id: id, text }) if id == goal_id => {
                    println!("    {}", text)
                }
                Some(DockEvent::Result { goal_id: id, result }) if id == goal_id => {
                    return Ok(result)
                }
                Some(_) => (),
                None => {
                    if start.elapsed() > self.follow_timeout {
                        return Err(eyre!(
                            "Goal {} did not resolve within {:?}",
                            goal_id,
                            self.follow_timeout
                        ));
                    }
                    thread::sleep(EVENT_POLL_PERIOD);
                }
            }
        }
    }

    fn watch(&self) -> Result<(), Report> {
        println!("Watching dock events, Ctrl-C to stop");

        loop {
            match self.recv_event()? {
                Some(DockEvent::Feedback { goal_id, text }) => {
                    println!("[goal {}] {}", goal_id, text)
                }
                Some(DockEvent::Result { goal_id, result }) => println!(
                    "[goal {}] {:?}: {}",
                    goal_id, result.outcome, result.message
                ),
                None => thread::sleep(EVENT_POLL_PERIOD),
            }
        }
    }

    /// Get the next event, if there is one waiting.
    fn recv_event(&self) -> Result<Option<DockEvent>, Report> {
        let msg = match self.event_socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Ok(None),
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e).wrap_err("Could not receive from the event stream"),
        };

        serde_json::from_str(&msg)
            .map(Some)
            .wrap_err("Could not parse a dock event")
    }
}

fn print_unexpected(response: &DockResponse) {
    match response {
        DockResponse::Invalid { reason } => println!("Request refused: {}", reason),
        r => println!("Unexpected response: {:?}", r),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_client_endpoint() {
        assert_eq!(
            client_endpoint("tcp://*:5100", "robot.local"),
            "tcp://robot.local:5100"
        );
        assert_eq!(
            client_endpoint("tcp://localhost:5200", "robot.local"),
            "tcp://localhost:5200"
        );
    }

    #[test]
    fn test_parse_repl_line() {
        let parse = |line: &str| {
            ReplLine::from_iter_safe(std::iter::once("dock_cli").chain(line.split_whitespace()))
        };

        assert!(matches!(parse("dock").unwrap().cmd, Command::Dock));
        assert!(matches!(
            parse("cancel 3").unwrap().cmd,
            Command::Cancel { goal_id: 3 }
        ));
        assert!(parse("cancel three").is_err());
        assert!(parse("launch").is_err());
    }
}
