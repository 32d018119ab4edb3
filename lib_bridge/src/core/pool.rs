//! # Fixed-Size Dispatch Pool
//!
//! The pool decouples the inbound message arrival rate from per-client send
//! latency. The broadcast server submits one [`BroadcastTask`] per (message,
//! connection) pair; a fixed set of worker tasks performs the actual writes.
//!
//! ## Invariants:
//!
//! 1.  **Zero-copy fan-out**: the payload is wrapped in an `Arc<Frame>` once
//!     per message. Each task carries a pointer to the same text body, never
//!     a copy of it.
//!
//! 2.  **Per-connection ordering**: a task is routed to its worker by
//!     `connection id % worker count`. All tasks for one connection therefore
//!     share one FIFO queue and one worker, so a client observes frames in
//!     exactly the order `accept` was called. No ordering exists across
//!     different connections.
//!
//! 3.  **Back-pressure**: every worker queue is bounded. `submit` awaits
//!     queue capacity, which blocks the dispatch loop and, through it, the
//!     upstream adapter. Nothing is buffered without bound and nothing is
//!     dropped silently.
//!
//! 4.  **Failure absorption**: a failed send removes that connection from the
//!     registry and the worker moves on. Failures never cross the worker
//!     boundary into `accept` or into other connections' deliveries.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::connection::Connection;
use crate::core::registry::ConnectionRegistry;
use crate::core::sender::FrameSender;

/// One inbound message, prepared for fan-out: arrival sequence number plus
/// the payload decoded as UTF-8 text. Lives only for the duration of its
/// broadcast.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    text: Utf8Bytes,
}

impl Frame {
    pub fn new(seq: u64, payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload).into_owned();
        Self {
            seq,
            text: text.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn text(&self) -> &Utf8Bytes {
        &self.text
    }
}

/// Unit of work for the pool: deliver one frame to one connection.
pub struct BroadcastTask {
    pub frame: Arc<Frame>,
    pub connection: Arc<Connection>,
}

/// The pool was already shut down; its queues are gone.
pub(crate) struct PoolClosed;

pub struct DispatchPool {
    shards: Mutex<Vec<mpsc::Sender<BroadcastTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchPool {
    /// Spawns `workers` worker tasks, each with a bounded queue of
    /// `queue_depth` tasks.
    pub fn spawn(
        workers: usize,
        queue_depth: usize,
        sender: FrameSender,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_depth);
            shards.push(tx);
            handles.push(tokio::spawn(Self::worker_loop(
                worker_id,
                rx,
                sender.clone(),
                Arc::clone(&registry),
            )));
        }

        log::info!("Dispatch pool started with {} worker(s)", workers);
        Self {
            shards: Mutex::new(shards),
            handles: Mutex::new(handles),
        }
    }

    /// Enqueues a task on the worker owning the target connection. Awaits
    /// queue capacity; this is where back-pressure is applied.
    pub(crate) async fn submit(&self, task: BroadcastTask) -> Result<(), PoolClosed> {
        let shard = {
            let shards = self.shards.lock().expect("Dispatch pool lock poisoned");
            if shards.is_empty() {
                return Err(PoolClosed);
            }
            let index = (task.connection.id() % shards.len() as u64) as usize;
            shards[index].clone()
        };
        shard.send(task).await.map_err(|_| PoolClosed)
    }

    async fn worker_loop(
        worker_id: usize,
        mut rx: mpsc::Receiver<BroadcastTask>,
        sender: FrameSender,
        registry: Arc<ConnectionRegistry>,
    ) {
        while let Some(task) = rx.recv().await {
            let BroadcastTask { frame, connection } = task;
            match sender.send(&connection, &frame).await {
                Ok(()) => {
                    log::trace!(
                        "Worker {}: frame {} delivered to client {}",
                        worker_id,
                        frame.seq(),
                        connection.id()
                    );
                }
                Err(failure) => {
                    // A failed send is the canonical disconnect signal; the
                    // client is not always kind enough to send a close frame.
                    if registry.remove(connection.id()).is_some() {
                        log::warn!(
                            "Worker {}: dropping client {} after failed send of frame {}: {}",
                            worker_id,
                            connection.id(),
                            frame.seq(),
                            failure
                        );
                    } else {
                        log::debug!(
                            "Worker {}: frame {} skipped, client {} already gone",
                            worker_id,
                            frame.seq(),
                            connection.id()
                        );
                    }
                }
            }
        }
        log::debug!("Worker {} drained and exiting", worker_id);
    }

    /// Closes the queues, lets the workers drain in-flight tasks within
    /// `timeout`, and aborts any worker still running after that.
    pub(crate) async fn shutdown(&self, timeout: Duration) {
        self.shards
            .lock()
            .expect("Dispatch pool lock poisoned")
            .clear();
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().expect("Dispatch pool lock poisoned");
            handles.drain(..).collect()
        };

        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                log::warn!("Dispatch worker exceeded shutdown timeout, aborting");
                handle.abort();
            }
        }
        log::info!("Dispatch pool stopped");
    }
}
