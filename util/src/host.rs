//! Host platform utility functions

use std::env;
use std::path::PathBuf;

/// Environment variable pointing at the root of the docking software checkout.
///
/// Parameter files are read from `$DOCK_SW_ROOT/params` and sessions are created under
/// `$DOCK_SW_ROOT/sessions`.
pub const SW_ROOT_ENV_VAR: &str = "DOCK_SW_ROOT";

/// Get the software root directory from the environment.
pub fn get_dock_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Name of the machine we're running on, if it can be found.
pub fn get_hostname() -> Option<String> {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}
