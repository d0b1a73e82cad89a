//! Admission gate bounding how many part uploads run at once.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate over a FIFO-fair semaphore. Waiters are admitted in arrival
/// order; a slot is freed when the returned permit is dropped.
#[derive(Clone, Debug)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl UploadLimiter {
    pub fn new(max_concurrency: usize) -> Self {
        let max = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition cannot fail.
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("upload limiter semaphore closed"),
        }
    }

    pub fn in_use(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_admits_more_than_max() {
        let limiter = UploadLimiter::new(5);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn waiters_are_admitted_in_order() {
        let limiter = UploadLimiter::new(1);
        let first = limiter.acquire().await;
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next one.
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(first);
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
