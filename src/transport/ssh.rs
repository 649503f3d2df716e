//! SSH execution through the `ssh` binary.
//!
//! The script is piped to stdin (not passed as an argument) to avoid
//! argument length limits and quoting problems.

use super::{run_piped, ExecOutput, HostTarget};
use std::process::Command;

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

/// Arguments passed to `ssh`, excluding the script.
pub fn ssh_args(target: &HostTarget) -> Vec<String> {
    let mut args: Vec<String> = [
        "-o",
        "BatchMode=yes",
        "-o",
        "ConnectTimeout=10",
        "-o",
        "StrictHostKeyChecking=accept-new",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(key) = &target.ssh_key {
        args.push("-i".to_string());
        args.push(expand_home(key));
    }

    args.push(format!("{}@{}", target.user, target.addr));
    args.push("bash".to_string());
    args
}

/// Execute a shell script on a remote host via SSH.
pub fn exec_ssh(target: &HostTarget, script: &str) -> Result<ExecOutput, String> {
    let mut command = Command::new("ssh");
    command.args(ssh_args(target));
    run_piped(command, script, &format!("ssh to {}", target.addr))
}
