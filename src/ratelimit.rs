//! Provider rate-limit gate
//!
//! External providers share credentials and rate limits across the roster,
//! so calls are funneled through a concurrency-1 gate with a minimum
//! spacing between admissions. This replaces implicit sleep-based pacing
//! with a policy that is visible and testable on its own.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct ProviderGate {
    permit: Semaphore,
    min_spacing: Duration,
    last_admitted: Mutex<Option<Instant>>,
}

/// Held for the duration of one provider call. Dropping it releases the
/// gate for the next caller.
pub struct GatePass<'a> {
    _permit: SemaphorePermit<'a>,
}

impl ProviderGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            permit: Semaphore::new(1),
            min_spacing,
            last_admitted: Mutex::new(None),
        }
    }

    /// Wait for the single permit, then for the spacing window, and admit.
    pub async fn acquire(&self) -> GatePass<'_> {
        // Semaphore::acquire only errors after close(), which we never call.
        let permit = self
            .permit
            .acquire()
            .await
            .expect("provider gate semaphore closed");

        let wait = {
            let last = self.last_admitted.lock().expect("gate clock poisoned");
            last.map(|t| self.min_spacing.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        *self.last_admitted.lock().expect("gate clock poisoned") = Some(Instant::now());
        GatePass { _permit: permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_admissions_are_spaced() {
        let gate = ProviderGate::new(Duration::from_millis(50));

        let start = Instant::now();
        drop(gate.acquire().await);
        drop(gate.acquire().await);
        drop(gate.acquire().await);

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_single_caller_admitted_at_a_time() {
        let gate = Arc::new(ProviderGate::new(Duration::ZERO));
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let _pass = gate.acquire().await;
                let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                assert_eq!(now, 1, "gate admitted concurrent callers");
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
