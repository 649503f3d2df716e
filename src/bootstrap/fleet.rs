//! fleet configuration and restart.

use super::key::REMOTE_KEY_PATH;
use super::PREAMBLE;

/// fleet's configuration file.
pub const FLEET_CONFIG_PATH: &str = "/etc/fleet/fleet.conf";

/// systemd unit restarted after reconfiguration.
pub const FLEET_UNIT: &str = "fleet";

/// Values written into fleet.conf.
#[derive(Debug, Clone)]
pub struct FleetOptions<'a> {
    pub service: &'a str,
    pub public_ip: &'a str,
    pub etcd_host: &'a str,
    pub etcd_port: u16,
}

/// fleet.conf contents.
pub fn render_fleet_config(opts: &FleetOptions) -> String {
    format!(
        "etcd_servers=[\"http://{}:{}\"]\n\
         etcd_keyfile=\"{}\"\n\
         public_ip=\"{}\"\n\
         metadata=\"service={}\"\n",
        opts.etcd_host, opts.etcd_port, REMOTE_KEY_PATH, opts.public_ip, opts.service
    )
}

/// Shell that writes fleet.conf.
pub fn fleet_config_script(opts: &FleetOptions) -> String {
    let dir = FLEET_CONFIG_PATH
        .rsplit_once('/')
        .map(|(d, _)| d)
        .unwrap_or("/etc/fleet");
    format!(
        "{}\n$SUDO mkdir -p '{}'\n$SUDO tee '{}' >/dev/null <<'STRETCH_EOF'\n{}STRETCH_EOF",
        PREAMBLE,
        dir,
        FLEET_CONFIG_PATH,
        render_fleet_config(opts)
    )
}

/// Shell that reloads units and restarts one, failing if it does not come up.
pub fn restart_script(unit: &str) -> String {
    format!(
        "{}\n$SUDO systemctl daemon-reload\n$SUDO systemctl restart '{}'\n$SUDO systemctl is-active --quiet '{}'",
        PREAMBLE, unit, unit
    )
}
