//! # Test Step Runner
//!
//! Drives one load test step end to end:
//!
//! 1. validate the configuration and derive the request template and rate plan
//! 2. dial every connection concurrently; one failed dial aborts the step
//! 3. start the scheduler and spawn one [`Worker`] per connection
//! 4. record result latencies until the step duration elapses, `shutdown`
//!    resolves or every worker has exited
//! 5. raise the stop signal, close the scheduler and drain the remaining results
//! 6. build the [`Report`]
//!
//! The runner performs no protocol I/O of its own.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::LoadTestConfig;
use crate::engine::ModbusEngine;
use crate::error::{ModbusError, ModbusResult};
use crate::report::Report;
use crate::scheduler::Scheduler;
use crate::stats::{Counters, Histogram};
use crate::worker::{Worker, WorkerExit};

/// Results buffered per worker before senders wait on the collector
const RESULT_BUFFER_PER_WORKER: usize = 64;

/// A scheduler that closed before the runner shut it down ran out of ramp steps
fn plan_exhausted(scheduler: &Scheduler) -> bool {
    scheduler.is_closed()
}

/// Run one test step and return its report
///
/// `shutdown` ends result collection early (e.g. Ctrl+C); the report still covers
/// everything measured up to that point.
pub async fn run_load_test<F>(config: &LoadTestConfig, shutdown: F) -> ModbusResult<Report>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    let request = config.read_request()?;
    let plan = config.rate_plan();
    let test_duration = config.test_duration();

    info!(
        "Dialing {} connections to {} ({})",
        config.workers, config.target, request.function
    );
    let dials = (0..config.workers).map(|id| async move {
        ModbusEngine::connect(&config.target, config.timeout(), config.framing)
            .await
            .map_err(|e| {
                warn!("Worker {} failed to connect to {}: {}", id, config.target, e);
                ModbusError::connection(format!(
                    "worker {} could not connect to {}: {}",
                    id, config.target, e
                ))
            })
    });
    let engines = join_all(dials)
        .await
        .into_iter()
        .collect::<ModbusResult<Vec<_>>>()?;

    let scheduler = Arc::new(Scheduler::start(plan));
    let counters = Arc::new(Counters::new());
    let (stop_tx, stop_rx) = watch::channel(false);
    let (results_tx, mut results_rx) =
        mpsc::channel(config.workers * RESULT_BUFFER_PER_WORKER);

    let start = Instant::now();
    let handles: Vec<_> = engines
        .into_iter()
        .enumerate()
        .map(|(id, mut engine)| {
            engine.set_packet_logging(config.packet_logging);
            let worker = Worker::new(
                id,
                engine,
                request.clone(),
                Arc::clone(&scheduler),
                Arc::clone(&counters),
            );
            tokio::spawn(worker.run(stop_rx.clone(), results_tx.clone()))
        })
        .collect();
    drop(results_tx);
    info!("Started {} workers for {:?}", handles.len(), test_duration);

    let mut histogram = Histogram::new();
    let deadline = sleep(test_duration);
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Step duration elapsed");
                break;
            }
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping workers");
                break;
            }
            result = results_rx.recv() => match result {
                Some(result) => histogram.record(result.latency),
                None => {
                    if plan_exhausted(&scheduler) {
                        debug!("Ramp exhausted, all workers finished");
                    } else {
                        warn!("All workers exited before the step ended");
                    }
                    break;
                }
            }
        }
    }

    let elapsed = start.elapsed();
    stop_tx.send_replace(true);
    scheduler.shutdown();

    // In-flight requests finish within their own deadlines
    while let Some(result) = results_rx.recv().await {
        histogram.record(result.latency);
    }

    let mut lost = 0usize;
    for exit in join_all(handles).await {
        match exit {
            Ok(WorkerExit::ConnectionLost) => lost += 1,
            Ok(_) => {}
            Err(e) => warn!("Worker task failed: {}", e),
        }
    }
    if lost > 0 {
        warn!("{} of {} connections were lost during the step", lost, config.workers);
    }

    Ok(Report::build(elapsed, &counters, &histogram.snapshot()))
}
