//! Host bootstrap: shell generated for each step after a server boots.
//!
//! Steps run in order on the new host:
//! 1. install the cluster-membership key
//! 2. point fleet at etcd and the key
//! 3. restart fleet

pub mod fleet;
pub mod key;

use crate::core::parser::split_host_port;
use fleet::FleetOptions;
use key::ClusterKey;
use std::fmt;

/// Preamble shared by every bootstrap script. Escalates through sudo when
/// not already root (CoreOS logs in as `core`).
pub const PREAMBLE: &str = "set -euo pipefail\n\
SUDO=\"\"\n\
if [ \"$(id -u)\" -ne 0 ]; then SUDO=\"sudo\"; fi";

/// One bootstrap step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    InstallKey,
    ConfigureFleet,
    RestartFleet,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallKey => write!(f, "install-key"),
            Self::ConfigureFleet => write!(f, "configure-fleet"),
            Self::RestartFleet => write!(f, "restart-fleet"),
        }
    }
}

/// Split the configured etcd endpoint into the host and port fleet needs.
pub fn split_etcd_host(etcd_host: &str) -> Result<(String, u16), String> {
    split_host_port(etcd_host)
        .map(|(host, port)| (host.to_string(), port))
        .ok_or_else(|| format!("etcd_host must be host:port, got \"{}\"", etcd_host))
}

/// Scripts for every step, in execution order.
pub fn bootstrap_scripts(key: &ClusterKey, opts: &FleetOptions) -> Vec<(BootstrapStep, String)> {
    vec![
        (BootstrapStep::InstallKey, key::install_key_script(key)),
        (BootstrapStep::ConfigureFleet, fleet::fleet_config_script(opts)),
        (BootstrapStep::RestartFleet, fleet::restart_script(fleet::FLEET_UNIT)),
    ]
}
