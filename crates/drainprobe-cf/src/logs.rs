//! Live log following through `cf logs`.

use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use drainprobe_harness::platform::LogFollower;
use drainprobe_harness::{LogBuffer, LogStream};

#[derive(Debug, Clone)]
pub struct CfLogFollower {
    bin: String,
}

impl CfLogFollower {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

/// Copy `reader` into `buffer` line by line until EOF.
///
/// Lines are appended as raw bytes; invalid UTF-8 in one line does not stop
/// the lines after it.
pub(crate) async fn pump_lines<R>(reader: R, buffer: LogBuffer, app: String) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut count = 0u64;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                buffer.append(&line);
                count += 1;
            }
            Err(e) => {
                tracing::warn!(app = %app, error = %e, "log stream read failed");
                break;
            }
        }
    }
    tracing::debug!(app = %app, lines = count, "log stream ended");
    count
}

#[async_trait]
impl LogFollower for CfLogFollower {
    async fn follow(&self, app: &str) -> anyhow::Result<LogStream> {
        let mut child = Command::new(&self.bin)
            .args(["logs", app])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to run {} logs {app}", self.bin))?;
        let stdout = child
            .stdout
            .take()
            .context("cf logs stdout was not captured")?;

        let buffer = LogBuffer::new();
        let task_buffer = buffer.clone();
        let task_app = app.to_string();
        // The task owns the child; aborting it drops the child, which kills it.
        let task = tokio::spawn(async move {
            let _child = child;
            pump_lines(stdout, task_buffer, task_app).await
        });

        tracing::info!(app, "following app logs");
        Ok(LogStream::new(app, buffer, move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_appended_in_order() {
        let input: &[u8] = b"[APP/PROC/WEB/0] OUT first\n[APP/PROC/WEB/0] OUT second\npartial";
        let buffer = LogBuffer::new();
        let n = pump_lines(input, buffer.clone(), "listener".into()).await;

        assert_eq!(n, 3);
        let text = String::from_utf8(buffer.contents()).unwrap();
        assert!(text.find("first").unwrap() < text.find("second").unwrap());
        assert!(buffer.contains("partial"));
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_end_the_stream() {
        let input: &[u8] = b"OUT first\n\xff\xfe garbage\nOUT RANDOM-MESSAGE-A after\n";
        let buffer = LogBuffer::new();
        let n = pump_lines(input, buffer.clone(), "listener".into()).await;

        assert_eq!(n, 3);
        assert!(buffer.contains("RANDOM-MESSAGE-A after"));
        assert_eq!(buffer.contents(), input);
    }

    #[tokio::test]
    async fn missing_cli_fails_to_follow() {
        let follower = CfLogFollower::new("drainprobe-no-such-cf");
        let err = follower.follow("listener").await.unwrap_err();
        assert!(err.to_string().contains("failed to run"), "{err}");
    }
}
