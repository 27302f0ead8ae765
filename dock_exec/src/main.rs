//! Main dock executable entry point.
//!
//! # Architecture
//!
//! The executable is split between a cyclic main thread and the sequencer's worker thread.
//!
//! The main thread:
//!     - Receives transforms into the transform buffer
//!     - Receives dock detections, updating the sensed DockReady2 pose
//!     - Serves dock requests (goals, cancellations, status queries)
//!
//! The worker thread runs accepted dock and undock sequences to completion, delegating navigation
//! and driving the base and charge relay.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{error, info, warn};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use comms_if::net::{zmq, NetParams};
use dock_lib::{
    dock_pose_client::{DockPoseClient, DockPoseTracker},
    dock_seq::{Collaborators, DockSequencer},
    dock_server::{DockEventPublisher, DockServer},
    nav_client::NavClient,
    params::DockExecParams,
    pose_resolver::{PoseResolver, SensedDockPose},
    relay_client::RelayClient,
    tf::{TfBuffer, TfClient},
    vel_pub::VelPublisher,
};
use util::{
    host,
    logger::{logger_init, parse_level},
    session::Session,
    time::seconds_to_std,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "dock_exec", about = "Docking sequencer for the charging station")]
struct Opts {
    /// Exec parameter file, relative to `$DOCK_SW_ROOT/params`
    #[structopt(long, default_value = "dock_exec.toml")]
    params: String,

    /// Network parameter file, relative to `$DOCK_SW_ROOT/params`
    #[structopt(long, default_value = "net.toml")]
    net_params: String,

    /// Minimum log level (info, debug or trace)
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("dock_exec", "sessions").wrap_err("Failed to create the session")?;

    let level = parse_level(&opts.log_level)
        .ok_or_else(|| eyre!("Unknown log level \"{}\"", opts.log_level))?;
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("Dock Executable\n");
    info!(
        "Running on: {}",
        host::get_hostname().unwrap_or_else(|| String::from("unknown host"))
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: DockExecParams =
        util::params::load(&opts.params).wrap_err("Could not load dock_exec params")?;
    let net_params: NetParams =
        util::params::load(&opts.net_params).wrap_err("Could not load net params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE NETWORK ----

    let zmq_ctx = zmq::Context::new();

    let tf_buffer = Arc::new(TfBuffer::new(params.tf.history_len));
    let tf_client =
        TfClient::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the TfClient")?;

    let nav = Arc::new(
        NavClient::new(&zmq_ctx, &net_params, &params.nav)
            .wrap_err("Failed to initialise the NavClient")?,
    );
    let relay = Arc::new(
        RelayClient::new(&zmq_ctx, &net_params, &params.relay)
            .wrap_err("Failed to initialise the RelayClient")?,
    );
    let vel = Arc::new(
        VelPublisher::new(&zmq_ctx, &net_params)
            .wrap_err("Failed to initialise the VelPublisher")?,
    );
    let reporter = Arc::new(
        DockEventPublisher::new(&zmq_ctx, &net_params)
            .wrap_err("Failed to initialise the DockEventPublisher")?,
    );
    let mut server =
        DockServer::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the DockServer")?;

    info!("Network initialised");

    // ---- INITIALISE MODULES ----

    let resolver = PoseResolver::new(tf_buffer.clone(), params.frames.clone());
    let sensed_dock_pose = Arc::new(SensedDockPose::new(
        params.dock.sensed_pose_max_age_s.map(seconds_to_std),
    ));

    let dock_pose_client = DockPoseClient::new(
        &zmq_ctx,
        &net_params,
        DockPoseTracker::new(
            tf_buffer.clone(),
            resolver.clone(),
            sensed_dock_pose.clone(),
            params.dock.ready_offset_m,
        ),
    )
    .wrap_err("Failed to initialise the DockPoseClient")?;

    let cycle_period = seconds_to_std(params.cycle_period_s);

    let sequencer = DockSequencer::new(
        params,
        Collaborators {
            nav: nav.clone(),
            relay,
            vel,
            resolver: Arc::new(resolver),
            sensed_dock_pose,
            reporter,
        },
    );

    info!("Initialisation complete, entering main loop\n");

    // ---- MAIN LOOP ----

    let mut nav_connected = None;
    let mut tf_connected = None;

    let result = loop {
        let cycle_start_instant = Instant::now();

        check_connection("navigation server", nav.is_connected(), &mut nav_connected);
        check_connection("transform stream", tf_client.is_connected(), &mut tf_connected);

        match tf_client.receive_all(&tf_buffer) {
            Ok(_) => (),
            Err(e) => warn!("TfClient error: {}", e),
        }

        match dock_pose_client.receive_all() {
            Ok(_) => (),
            Err(e) => warn!("DockPoseClient error: {}", e),
        }

        if let Err(e) = server.serve(&sequencer) {
            error!("DockServer error: {}", e);
            break Err(e).wrap_err("Dock server failed");
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
            ),
        }
    };

    // ---- SHUTDOWN ----

    info!("Stopping the sequencer");
    if let Err(e) = sequencer.stop() {
        warn!("Could not stop the sequencer cleanly: {}", e);
    }

    // Give the publishers a moment to flush the final events
    thread::sleep(Duration::from_millis(100));

    session.exit();

    info!("End of execution");

    result
}

/// Log changes in a client's connection state.
fn check_connection(name: &str, connected: bool, last: &mut Option<bool>) {
    if *last == Some(connected) {
        return;
    }

    match connected {
        true => info!("Connected to the {}", name),
        false => warn!("Not connected to the {}", name),
    }

    *last = Some(connected);
}
