//! Newline-delimited JSON framing for a worker hosted in its own process.

use std::io::{self, BufRead, Write};

use localstore_core::{MigrationConfig, Result, WorkerMessage, decode_frame, encode_frame};

use crate::probe::Host;
use crate::{WorkerConfig, WorkerHandle, spawn_worker};

/// Serve the worker over this process's stdin and stdout.
pub fn serve_stdio(config: WorkerConfig) -> Result<()> {
    let host = crate::NativeHost::new(config.host);
    serve_lines(host, config.migrations, io::BufReader::new(io::stdin()), io::stdout().lock())
}

/// Read `WorkerMessage` frames from `input`, write `WorkerResponse` frames to
/// `output`. Returns once `input` is exhausted and the worker has answered
/// everything it read.
pub fn serve_lines<H, R, W>(host: H, migrations: MigrationConfig, input: R, mut output: W) -> Result<()>
where
    H: Host + 'static,
    R: BufRead + Send + 'static,
    W: Write,
{
    let WorkerHandle { sender, mut receiver, thread } = spawn_worker(host, migrations)?;

    let reader = std::thread::Builder::new().name("localstore-stdin".to_owned()).spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Input stream failed: {}", e);
                    break;
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_frame::<WorkerMessage>(&line) {
                Ok(message) => {
                    if sender.send(message).is_err() {
                        break;
                    }
                },
                Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
            }
        }
    })?;

    while let Some(response) = receiver.blocking_recv() {
        writeln!(output, "{}", encode_frame(&response)?)?;
        output.flush()?;
    }

    for (name, handle) in [("reader", reader), ("worker", thread)] {
        if handle.join().is_err() {
            tracing::error!(thread = name, "Thread panicked");
        }
    }
    Ok(())
}
