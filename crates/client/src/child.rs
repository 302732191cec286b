//! Bridge a worker running in a child process into the channel pair.
//!
//! The child reads `WorkerMessage` frames on stdin and writes
//! `WorkerResponse` frames on stdout, one JSON document per line.

use std::process::{ExitStatus, Stdio};

use localstore_core::{Result, StoreError, WorkerMessage, WorkerResponse, decode_frame, encode_frame};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub struct ChildWorker {
    pub sender: UnboundedSender<WorkerMessage>,
    pub receiver: UnboundedReceiver<WorkerResponse>,
    pub process: ChildProcess,
}

/// The spawned process; killed if dropped while still running.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit. It exits once its stdin closes, which
    /// happens when every sender for it is dropped.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }
}

/// Spawn `command` with piped stdin/stdout and start the framing tasks.
///
/// Must be called inside a tokio runtime. The child's stderr is inherited.
pub fn spawn_child(mut command: Command) -> Result<ChildWorker> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| StoreError::ChannelClosed("child stdin unavailable".to_owned()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StoreError::ChannelClosed("child stdout unavailable".to_owned()))?;
    tracing::debug!(pid = ?child.id(), "Spawned worker process");

    let (sender, mut outbound) = mpsc::unbounded_channel::<WorkerMessage>();
    let (inbound, receiver) = mpsc::unbounded_channel::<WorkerResponse>();

    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = match encode_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Cannot encode message for worker: {}", e);
                    continue;
                },
            };
            let written = async {
                stdin.write_all(frame.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };
            if let Err(e) = written.await {
                tracing::warn!("Worker stdin closed: {}", e);
                break;
            }
        }
        // Dropping stdin here is the child's shutdown signal.
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {},
                Ok(Some(line)) => match decode_frame::<WorkerResponse>(&line) {
                    Ok(response) => {
                        if inbound.send(response).is_err() {
                            break;
                        }
                    },
                    Err(e) => tracing::warn!("Dropping malformed worker frame: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Worker stdout failed: {}", e);
                    break;
                },
            }
        }
    });

    Ok(ChildWorker { sender, receiver, process: ChildProcess { child } })
}
