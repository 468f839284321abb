//! Bounded worker pool.
//!
//! A counting semaphore caps in-flight workers. The dispatcher suspends only
//! while acquiring a slot, and that wait is raced against cancellation.
//! Workers run as tasks in a [`JoinSet`] that is drained at the end of the
//! batch.

use crate::cancel::CancellationToken;
use crate::error::{Result, SdcmError};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Counters shared between the pool and its running workers.
#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Held by a running worker; releases its slot on drop.
struct Slot {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit, gauge: Arc<Gauge>) -> Self {
        let now = gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            _permit: permit,
            gauge,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Totals reported once a pool has been drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub dispatched: usize,
    pub peak_in_flight: usize,
    /// Workers that panicked instead of finishing.
    pub panicked: usize,
}

/// Runs at most `capacity` workers at once.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    gauge: Arc<Gauge>,
    tasks: JoinSet<()>,
    dispatched: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            gauge: Arc::new(Gauge::default()),
            tasks: JoinSet::new(),
            dispatched: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running workers so far.
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Wait for a free slot, then run `worker` on it.
    ///
    /// Returns [`SdcmError::Cancelled`] if `cancel` fires first; workers
    /// already running are left alone.
    pub async fn spawn<F>(&mut self, cancel: &CancellationToken, worker: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SdcmError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| SdcmError::Cancelled)?
            }
        };

        let slot = Slot::new(permit, self.gauge.clone());
        self.dispatched += 1;
        self.tasks.spawn(async move {
            let _slot = slot;
            worker.await;
        });
        Ok(())
    }

    /// Wait for every dispatched worker to finish.
    pub async fn join(mut self) -> PoolStats {
        let mut panicked = 0;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Worker task failed: {}", e);
                panicked += 1;
            }
        }
        PoolStats {
            dispatched: self.dispatched,
            peak_in_flight: self.gauge.peak.load(Ordering::SeqCst),
            panicked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peak_never_exceeds_capacity() {
        let capacity = 3;
        let mut pool = WorkerPool::new(capacity);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for i in 0..(capacity + 12) {
            let finished = finished.clone();
            pool.spawn(&cancel, async move {
                tokio::time::sleep(Duration::from_millis(5 + (i % 4) as u64)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
            assert!(pool.in_flight() <= capacity);
        }

        let stats = pool.join().await;
        assert_eq!(stats.dispatched, capacity + 12);
        assert_eq!(finished.load(Ordering::SeqCst), capacity + 12);
        assert!(stats.peak_in_flight <= capacity);
        assert!(stats.peak_in_flight >= 1);
        assert_eq!(stats.panicked, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let mut pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let done = Arc::new(AtomicUsize::new(0));

        let worker_done = done.clone();
        pool.spawn(&cancel, async move {
            let _ = release_rx.await;
            worker_done.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = pool.spawn(&cancel, async {}).await;
        assert!(matches!(result, Err(SdcmError::Cancelled)));

        // The running worker is not preempted.
        release_tx.send(()).unwrap();
        let stats = pool.join().await;
        assert_eq!(stats.dispatched, 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_dispatches_nothing() {
        let mut pool = WorkerPool::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pool.spawn(&cancel, async {}).await.is_err());
        assert_eq!(pool.join().await.dispatched, 0);
    }
}
