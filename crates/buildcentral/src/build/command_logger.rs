//! Command execution with log capture and cancellation
//!
//! Runs one build command, forwarding each line of its stdout and stderr as
//! soon as it arrives. A pending cancellation kills the child and waits for
//! it before returning.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::Result;

use super::session::CancelHandle;

/// Callback for log lines
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// How a supervised command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Exited(ExitStatus),
    /// Killed after a cancellation request
    Cancelled,
}

/// Run a command with log capture
///
/// `on_spawn` receives the child's pid once it is running. `on_line` is
/// called for every output line, in arrival order; the cancellation flag is
/// checked after each one and also watched while the child is silent.
pub async fn run_command_with_logging(
    command: &mut Command,
    package_name: &str,
    operation: &str,
    cancel: &CancelHandle,
    on_spawn: impl FnOnce(Option<u32>),
    mut on_line: impl FnMut(&str),
) -> Result<CommandOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("Running command: {:?}", command);

    let mut child = command.spawn().map_err(|e| {
        crate::Error::build(
            format!("{} failed to start for {}", operation, package_name),
            e.to_string(),
        )
    })?;
    on_spawn(child.id());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
    }
    drop(tx);

    let mut cancelled = cancel.is_cancelled();
    while !cancelled {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    tracing::debug!(target: "build_output", package = %package_name, "{}", line);
                    on_line(&line);
                    cancelled = cancel.is_cancelled();
                }
                None => break,
            },
            _ = cancel.cancelled() => cancelled = true,
        }
    }

    if !cancelled {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    crate::Error::build(
                        format!("{} failed for {}", operation, package_name),
                        e.to_string(),
                    )
                })?;
                return Ok(CommandOutcome::Exited(status));
            }
            _ = cancel.cancelled() => {}
        }
    }

    tracing::info!("Cancelling {} of {}", operation, package_name);
    if let Err(e) = child.start_kill() {
        tracing::debug!("Kill of {} failed: {}", package_name, e);
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap {} of {}: {}", operation, package_name, e);
    }
    for reader in readers {
        reader.abort();
    }
    Ok(CommandOutcome::Cancelled)
}

/// Send each line of `stream` to `tx`, tolerating invalid UTF-8
async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}
