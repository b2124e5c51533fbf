/// Backfill collaborator run as an external command
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::BackfillJob;

/// Build a backfill job that runs `command` (program followed by its
/// arguments) and succeeds only if it exits zero within `timeout`. An empty
/// command means there is nothing to backfill.
pub fn command_backfill(command: Vec<String>, timeout: Duration) -> BackfillJob {
    Box::pin(run_backfill(command, timeout))
}

async fn run_backfill(command: Vec<String>, timeout: Duration) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        warn!("No backfill command configured, assuming today's rows are already on disk");
        return Ok(());
    };

    info!("Downloading today's 1Min data using {}", program);
    let started = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(PipelineError::BackfillFailed(format!(
                "{} did not finish within {:?}",
                program, timeout
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        warn!("<backfill output> {} </backfill output>", stdout.trim());
    }
    if !output.status.success() {
        return Err(PipelineError::BackfillFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    info!("Finished downloading today's 1Min data, took {:?}", started.elapsed());
    Ok(())
}
