//! Cooperative rate-limit queue (§4.5).
//!
//! The reference client never paced its writes — `connect_and_listen` wrote
//! straight to the `TcpStream` as soon as an action arrived. Twitch's own
//! rate limits (20 JOINs per 10s, 20 PRIVMSGs per 30s for unverified bots,
//! one moderation command roughly every 150ms) make that unsafe once real
//! traffic volume shows up, so each class of outgoing command gets its own
//! queue here, enforcing a minimum spacing between consecutive sends.
//!
//! Grounded on the worker-loop shape in `rust-srec`'s `start_message_task`
//! (a `tokio::select!` between a shutdown signal and work), adapted from a
//! read loop into a drain-with-delay write loop. The shutdown signal itself
//! is a `tokio_util::sync::CancellationToken`, the same mechanism
//! [`crate::connection`]'s reader loop uses, so `stop()` wakes an idle
//! worker immediately instead of waiting for its next `recv()`.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type JobFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A queued job plus an optional per-item spacing override (§4.5's
/// `add(callable, delay=None)`) — `None` falls back to the queue's
/// configured `interval`.
struct Job {
    run: JobFn,
    delay: Option<Duration>,
}

/// A single named outbound queue enforcing `interval` between job starts.
///
/// Jobs are plain closures (typically "write this line to the socket") run
/// on a dedicated background task, so callers never block the caller's own
/// task waiting for queue spacing — they `add` a job and move on.
pub struct MessageQueue {
    tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MessageQueue {
    /// Spawn a queue that enforces at least `interval` between job starts.
    pub fn spawn(interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        let worker = tokio::spawn(async move {
            let mut last_sent: Option<Instant> = None;
            loop {
                let job = tokio::select! {
                    biased;
                    _ = worker_cancel.cancelled() => break,
                    job = rx.recv() => job,
                };
                let Some(job) = job else { break };
                let spacing = job.delay.unwrap_or(interval);
                if let Some(last) = last_sent {
                    let elapsed = last.elapsed();
                    if elapsed < spacing {
                        tokio::select! {
                            biased;
                            _ = worker_cancel.cancelled() => break,
                            _ = tokio::time::sleep(spacing - elapsed) => {}
                        }
                    }
                }
                last_sent = Some(Instant::now());
                if let Err(err) = (job.run)() {
                    tracing::warn!(error = %err, "queued send failed");
                }
            }
        });

        MessageQueue {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a job, spaced by the queue's configured interval. Returns an
    /// error only if the queue has already been stopped and its worker torn
    /// down.
    pub fn add<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.add_with_delay(job, None)
    }

    /// Enqueue a job with a per-item spacing override (§4.5's
    /// `add(callable, delay=None)`), taking effect in place of the queue's
    /// configured interval for this one item.
    pub fn add_with_delay<F>(&self, job: F, delay: Option<Duration>) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tx
            .send(Job { run: Box::new(job), delay })
            .map_err(|_| Error::NotConnected)
    }

    /// Cancel the worker immediately, even if it's idle awaiting a job or
    /// mid-spacing-delay; any already-enqueued job that hasn't started yet
    /// is discarded. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker task to finish (after the channel is dropped).
    pub async fn join(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc as std_mpsc;

    #[tokio::test]
    async fn enforces_minimum_spacing_between_jobs() {
        let queue = MessageQueue::spawn(Duration::from_millis(50));
        let (tx, mut rx) = std_mpsc::unbounded_channel::<Instant>();

        for _ in 0..3 {
            let tx = tx.clone();
            queue
                .add(move || {
                    let _ = tx.send(Instant::now());
                    Ok(())
                })
                .unwrap();
        }
        drop(tx);

        let mut timestamps = Vec::new();
        while let Some(t) = rx.recv().await {
            timestamps.push(t);
            if timestamps.len() == 3 {
                break;
            }
        }

        assert_eq!(timestamps.len(), 3);
        for pair in timestamps.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(45), "gap was {gap:?}");
        }
    }

    #[tokio::test]
    async fn jobs_run_in_order() {
        let queue = MessageQueue::spawn(Duration::from_millis(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = std_mpsc::unbounded_channel::<usize>();

        for i in 0..5 {
            let tx = tx.clone();
            let counter = counter.clone();
            queue
                .add(move || {
                    let seq = counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(seq);
                    let _ = i;
                    Ok(())
                })
                .unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await {
            seen.push(v);
            if seen.len() == 5 {
                break;
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
