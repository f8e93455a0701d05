//! Process orchestration inside the runtime.
//!
//! Spawns commands, pipes every output chunk to a log sink as it arrives,
//! and resolves exit codes. Two policies sit on top:
//! - gating commands (dependency install) turn a nonzero exit into
//!   `AppError::Install` and abort the run;
//! - long-running commands (the dev server) are only logged when they exit.

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{info, info_span, warn, Instrument};

use crate::models::{CommandSpec, ManagedProcess};
use crate::runtime::SandboxRuntime;
use crate::{AppError, Result};

/// Start `spec` inside `runtime`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the runtime cannot start the process.
pub async fn spawn_process(
    runtime: &dyn SandboxRuntime,
    spec: CommandSpec,
) -> Result<ManagedProcess> {
    let label = spec.to_string();
    runtime.spawn(spec).await.map_err(|err| match err {
        AppError::Spawn(_) => err,
        other => AppError::Spawn(format!("failed to start `{label}`: {other}")),
    })
}

/// Pipe every output chunk of `process` to `sink`, then return its exit code.
///
/// Chunks reach the sink one at a time in arrival order; the next chunk is
/// not pulled until the sink has returned. Output draining and the exit
/// wait run concurrently, but the exit code is only returned once the
/// output stream has ended.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the exit status cannot be collected.
pub async fn run_to_exit<F>(process: ManagedProcess, mut sink: F) -> Result<i32>
where
    F: FnMut(Bytes) + Send,
{
    let ManagedProcess {
        spec,
        mut output,
        exit,
    } = process;

    let span = info_span!("process", command = %spec);
    let drain = async {
        let mut chunks = 0usize;
        while let Some(chunk) = output.next().await {
            chunks += 1;
            sink(chunk);
        }
        chunks
    };

    let (chunks, code) = async { tokio::join!(drain, exit) }
        .instrument(span.clone())
        .await;
    let code = code?;
    span.in_scope(|| info!(exit_code = code, chunks, "process exited"));
    Ok(code)
}

/// Spawn and drain `spec`; convenience over [`spawn_process`] and
/// [`run_to_exit`].
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be started or awaited.
pub async fn run<F>(runtime: &dyn SandboxRuntime, spec: CommandSpec, sink: F) -> Result<i32>
where
    F: FnMut(Bytes) + Send,
{
    let process = spawn_process(runtime, spec).await?;
    run_to_exit(process, sink).await
}

/// Run a gating command to completion.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the command cannot be started, and
/// `AppError::Install` if it exits with a nonzero code.
pub async fn run_gating<F>(runtime: &dyn SandboxRuntime, spec: CommandSpec, sink: F) -> Result<()>
where
    F: FnMut(Bytes) + Send,
{
    let label = spec.to_string();
    let code = run(runtime, spec, sink).await?;
    if code == 0 {
        Ok(())
    } else {
        warn!(command = %label, exit_code = code, "gating command failed");
        Err(AppError::Install(format!(
            "`{label}` exited with code {code}"
        )))
    }
}
