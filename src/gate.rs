//! Concurrency gate for upstream generation.
//!
//! One gate is shared by interactive resolves and the warm pass, so the number of generation
//! calls in flight never exceeds its capacity no matter where they come from. Unlike a
//! rejecting bulkhead, callers over capacity wait for a permit.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default capacity; equal to the warm pass batch size.
pub const DEFAULT_CAPACITY: usize = 5;

/// The gate was closed by shutdown; no further permits are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held while a generation is in flight; dropping it frees the slot, including when the
/// holding future is cancelled.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Run `operation` while holding a permit.
    pub async fn run<T, Fut>(&self, operation: Fut) -> Result<T, GateClosed>
    where
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(operation.await)
    }

    /// Stop issuing permits. Waiters and later callers get [`GateClosed`]; permits already held
    /// stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let gate = ConcurrencyGate::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                gate.run(async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in futures::future::join_all(handles).await {
            assert_eq!(handle.unwrap(), Ok(()));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn permit_released_on_cancellation() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 1);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.run(std::future::pending::<()>()).await })
        };
        drop(held);
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        let again = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(again.expect("permit should be free").is_ok());
    }

    #[tokio::test]
    async fn closed_gate_rejects() {
        let gate = ConcurrencyGate::new(2);
        gate.close();
        assert!(gate.is_closed());
        assert_eq!(gate.acquire().await.unwrap_err(), GateClosed);
        assert_eq!(gate.run(async { 1 }).await, Err(GateClosed));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
