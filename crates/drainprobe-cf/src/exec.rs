//! Bounded execution of external commands.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::process::Command;

/// Short description of an invocation for logs and errors. Only the first
/// two arguments are shown; later ones may carry credentials.
pub(crate) fn describe(bin: &str, args: &[String]) -> String {
    let shown: Vec<&str> = args.iter().take(2).map(String::as_str).collect();
    if args.len() > 2 {
        format!("{bin} {} ...", shown.join(" "))
    } else {
        format!("{bin} {}", shown.join(" "))
    }
}

/// Run `bin args...` to completion within `limit`, returning stdout.
///
/// A non-zero exit is an error carrying the trimmed stderr. The child is
/// killed if the limit expires.
pub(crate) async fn run(bin: &str, args: &[String], limit: Duration) -> anyhow::Result<String> {
    let what = describe(bin, args);
    tracing::debug!(command = %what, timeout_s = limit.as_secs(), "running command");

    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(limit, cmd.output()).await {
        Ok(result) => result.with_context(|| format!("failed to run {what}"))?,
        Err(_) => bail!("{what} timed out after {limit:?}"),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // cf prints most failures on stdout.
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        bail!("{what} exited with {}: {detail}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
