//! Local execution for hosts that are this machine.

use super::{run_piped, ExecOutput};
use std::process::Command;

/// `bash` reading the script from stdin. Profile and rc files are skipped so
/// a bootstrap run does not depend on the operator's shell setup; bash rather
/// than sh because the scripts use `set -o pipefail`.
pub fn local_command() -> Command {
    let mut command = Command::new("bash");
    command.args(["--noprofile", "--norc", "-s"]);
    command
}

/// Run a bootstrap script on this machine.
pub fn exec_local(script: &str) -> Result<ExecOutput, String> {
    run_piped(local_command(), script, "bash")
}
