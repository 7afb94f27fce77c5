//! # Worker
//!
//! One worker drives one connection. Each loop iteration:
//!
//! 1. checks the stop signal,
//! 2. waits for a scheduler token,
//! 3. executes exactly one request and forwards its [`ExecutionResult`].
//!
//! Connection-fatal failures (write, header read, deadline) are reported once and
//! end the worker; the connection is never re-dialed. Parse errors and exception
//! responses are reported and the loop continues on the same connection.
//!
//! Continuing after a parse error assumes the parser consumed exactly the bytes
//! the device sent. A truncated or misjudged response can leave bytes in the
//! socket that desynchronize every later response on that connection; such a
//! worker keeps reporting parse errors until the step ends.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::{ExecutionResult, Outcome, RequestEngine};
use crate::protocol::ReadRequest;
use crate::scheduler::{Acquire, Scheduler};
use crate::stats::Counters;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop signal observed
    Stopped,
    /// Scheduler shut down or plan exhausted
    SchedulerClosed,
    /// Connection-fatal error after reporting its result
    ConnectionLost,
    /// Nobody is receiving results anymore
    SinkClosed,
}

/// Request loop bound to a single engine
pub struct Worker<E> {
    id: usize,
    engine: E,
    request: ReadRequest,
    scheduler: Arc<Scheduler>,
    counters: Arc<Counters>,
}

impl<E: RequestEngine> Worker<E> {
    pub fn new(
        id: usize,
        engine: E,
        request: ReadRequest,
        scheduler: Arc<Scheduler>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            engine,
            request,
            scheduler,
            counters,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until stopped, out of tokens, disconnected or without a receiver
    ///
    /// The stop signal is checked once per iteration; a request already in flight
    /// completes first. The engine is closed before returning.
    pub async fn run(
        mut self,
        stop: watch::Receiver<bool>,
        results: mpsc::Sender<ExecutionResult>,
    ) -> WorkerExit {
        debug!("Worker {} started", self.id);

        let exit = loop {
            let stopped = *stop.borrow();
            if stopped {
                break WorkerExit::Stopped;
            }

            if self.scheduler.acquire().await == Acquire::Closed {
                break WorkerExit::SchedulerClosed;
            }

            self.counters.record_request();
            let result = self.engine.execute(&self.request).await;
            self.counters.record_outcome(&result.outcome);

            let fatal = result.outcome.is_connection_fatal();
            if let Outcome::Failed(e) = &result.outcome {
                if fatal {
                    warn!("Worker {} connection lost: {}", self.id, e);
                } else {
                    debug!("Worker {} bad response: {}", self.id, e);
                }
            }

            if results.send(result).await.is_err() {
                break WorkerExit::SinkClosed;
            }
            if fatal {
                break WorkerExit::ConnectionLost;
            }
        };

        if let Err(e) = self.engine.close().await {
            debug!("Worker {} close failed: {}", self.id, e);
        }
        debug!("Worker {} exited: {:?}", self.id, exit);
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModbusError, ModbusResult};
    use crate::protocol::{ExceptionResponse, ModbusFunction, ResponsePdu};
    use crate::scheduler::RatePlan;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Replays scripted outcomes, then keeps succeeding
    struct ScriptedEngine {
        script: VecDeque<Outcome>,
        executed: usize,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Outcome>) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            let engine = Self {
                script: script.into(),
                executed: 0,
                closed: Arc::clone(&closed),
            };
            (engine, closed)
        }
    }

    #[async_trait]
    impl RequestEngine for ScriptedEngine {
        async fn execute(&mut self, _request: &ReadRequest) -> ExecutionResult {
            self.executed += 1;
            let outcome = self
                .script
                .pop_front()
                .unwrap_or_else(|| Outcome::Success(ResponsePdu::new(Bytes::new(), 0)));
            ExecutionResult::new(Duration::from_micros(250), outcome)
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request() -> ReadRequest {
        ReadRequest::new(1, ModbusFunction::ReadHoldingRegisters, 0, 2)
    }

    #[tokio::test]
    async fn test_parse_errors_continue_fatal_errors_stop() {
        let (engine, closed) = ScriptedEngine::new(vec![
            Outcome::Failed(ModbusError::transaction_mismatch(1, 2)),
            Outcome::Exception(ExceptionResponse::from_wire(0x83, 0x02)),
            Outcome::Success(ResponsePdu::new(Bytes::new(), 0)),
            Outcome::Failed(ModbusError::timeout("read header", 100)),
        ]);
        let scheduler = Arc::new(Scheduler::start(RatePlan::Fixed { rate: 0 }));
        let counters = Arc::new(Counters::new());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(16);

        let worker = Worker::new(0, engine, request(), scheduler, Arc::clone(&counters));
        let exit = worker.run(stop_rx, tx).await;

        assert_eq!(exit, WorkerExit::ConnectionLost);
        assert!(closed.load(Ordering::SeqCst));

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 4);
        assert!(results[3].outcome.is_connection_fatal());

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.requests, 4);
        assert_eq!(snapshot.ok, 1);
        assert_eq!(snapshot.exceptions, 1);
        assert_eq!(snapshot.other_errors, 2);
    }

    #[tokio::test]
    async fn test_stop_signal_checked_before_each_request() {
        let (engine, closed) = ScriptedEngine::new(Vec::new());
        let scheduler = Arc::new(Scheduler::start(RatePlan::Fixed { rate: 0 }));
        let counters = Arc::new(Counters::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel(16);

        stop_tx.send(true).unwrap();
        let exit = Worker::new(1, engine, request(), scheduler, Arc::clone(&counters))
            .run(stop_rx, tx)
            .await;

        assert_eq!(exit, WorkerExit::Stopped);
        assert_eq!(counters.snapshot().requests, 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_scheduler_shutdown_ends_worker() {
        let (engine, _closed) = ScriptedEngine::new(Vec::new());
        let scheduler = Arc::new(Scheduler::start(RatePlan::Fixed { rate: 1 }));
        let counters = Arc::new(Counters::new());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel(16);

        let handle = tokio::spawn(
            Worker::new(2, engine, request(), Arc::clone(&scheduler), counters).run(stop_rx, tx),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.shutdown();

        assert_eq!(handle.await.unwrap(), WorkerExit::SchedulerClosed);
    }

    #[tokio::test]
    async fn test_closed_sink_ends_worker() {
        let (engine, _closed) = ScriptedEngine::new(Vec::new());
        let scheduler = Arc::new(Scheduler::start(RatePlan::Fixed { rate: 0 }));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let exit = Worker::new(3, engine, request(), scheduler, Arc::new(Counters::new()))
            .run(stop_rx, tx)
            .await;
        assert_eq!(exit, WorkerExit::SinkClosed);
    }
}
