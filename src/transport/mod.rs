//! Script execution on provisioned hosts: local bash or ssh.

pub mod local;
pub mod ssh;

use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Output from executing a script on a host.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A process killed by a signal has no exit code and reports -1.
impl From<Output> for ExecOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Spawn `command`, write `script` to its stdin, close it and collect the
/// output. `program` names the process in error messages.
fn run_piped(mut command: Command, script: &str, program: &str) -> Result<ExecOutput, String> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| format!("{} has no stdin", program))?;
    stdin
        .write_all(script.as_bytes())
        .map_err(|e| format!("cannot send script to {}: {}", program, e))?;
    // closing stdin ends the script
    drop(stdin);

    child
        .wait_with_output()
        .map(ExecOutput::from)
        .map_err(|e| format!("{} did not finish: {}", program, e))
}

/// Where and as whom a script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Network address (IP or DNS)
    pub addr: String,
    /// SSH user
    pub user: String,
    /// Path to SSH private key
    pub ssh_key: Option<String>,
}

/// Runs scripts on hosts. Implementations block; async callers wrap them in
/// `spawn_blocking`.
pub trait Executor: Send + Sync {
    fn exec(&self, target: &HostTarget, script: &str) -> Result<ExecOutput, String>;
}

/// Dispatches to local bash for loopback addresses, ssh otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl Executor for ShellExecutor {
    fn exec(&self, target: &HostTarget, script: &str) -> Result<ExecOutput, String> {
        if is_local_addr(&target.addr) {
            local::exec_local(script)
        } else {
            ssh::exec_ssh(target, script)
        }
    }
}

/// Check if an address is this machine.
fn is_local_addr(addr: &str) -> bool {
    matches!(addr, "127.0.0.1" | "localhost" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_target(addr: &str) -> HostTarget {
        HostTarget {
            addr: addr.to_string(),
            user: "core".to_string(),
            ssh_key: None,
        }
    }

    #[test]
    fn test_transport_local_detection() {
        assert!(is_local_addr("127.0.0.1"));
        assert!(is_local_addr("localhost"));
        assert!(is_local_addr("::1"));
        assert!(!is_local_addr("192.168.1.100"));
        assert!(!is_local_addr("10.0.0.1"));
    }

    #[test]
    fn test_transport_exec_local_127() {
        let out = ShellExecutor
            .exec(&local_target("127.0.0.1"), "echo ok")
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "ok");
    }

    #[test]
    fn test_transport_exec_localhost() {
        let out = ShellExecutor
            .exec(&local_target("localhost"), "echo local")
            .unwrap();
        assert_eq!(out.stdout.trim(), "local");
    }

    #[test]
    fn test_transport_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, stdout: "ok".into(), stderr: "".into() };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 1, stdout: "".into(), stderr: "err".into() };
        assert!(!fail.success());
    }
}
