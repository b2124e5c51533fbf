/// Consumer of aggregation requests: runs the downstream command in the
/// background so sweeps never wait for it.
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::pipeline::AggregationRequest;

pub fn spawn_aggregation_runner(
    command: Vec<String>,
    mut requests: mpsc::Receiver<AggregationRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut running = JoinSet::new();

        while let Some(request) = requests.recv().await {
            // Reap whatever finished since the last request
            while running.try_join_next().is_some() {}

            let Some((program, args)) = command.split_first() else {
                debug!(
                    "No aggregation command configured, skipping sweep {}",
                    request.sweep
                );
                continue;
            };

            let child = Command::new(program)
                .args(args)
                .env("LIVE_CANDLES_SWEEP", request.sweep.to_string())
                .env("LIVE_CANDLES_INSTRUMENTS", request.instruments.join(","))
                .stdin(Stdio::null())
                .spawn();

            match child {
                Ok(mut child) => {
                    info!(
                        "Scheduled {} for finalizing live data (sweep {}, {} instruments)",
                        program,
                        request.sweep,
                        request.instruments.len()
                    );
                    let program = program.clone();
                    running.spawn(async move {
                        match child.wait().await {
                            Ok(status) if status.success() => {
                                debug!("{} finished for sweep {}", program, request.sweep)
                            }
                            Ok(status) => warn!(
                                "{} exited with {} for sweep {}",
                                program, status, request.sweep
                            ),
                            Err(e) => error!("Failed to wait for {}: {}", program, e),
                        }
                    });
                }
                Err(e) => warn!("Failed to start {}: {}", program, e),
            }
        }

        while running.join_next().await.is_some() {}
        debug!("Aggregation runner stopped");
    })
}
