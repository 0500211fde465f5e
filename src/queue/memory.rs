use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{JobQueue, QueueError, Result};
use crate::job::JobId;

/// Process-local FIFO queue.
///
/// Delayed pushes are held by a timer task; a closed queue keeps handing
/// out ids until both the deque and the outstanding timers are exhausted.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct State {
    ready: VecDeque<JobId>,
    /// Ids whose timer has not fired yet
    scheduled: HashSet<JobId>,
}

impl Inner {
    async fn enqueue(&self, id: JobId, front: bool) {
        let mut state = self.state.lock().await;
        if front {
            state.ready.push_front(id);
        } else {
            state.ready.push_back(id);
        }
        drop(state);
        self.notify.notify_one();
    }

    async fn fire(&self, id: JobId) {
        let mut state = self.state.lock().await;
        if state.scheduled.remove(&id) {
            debug!(job_id = %id, "Delayed job due");
            state.ready.push_back(id);
        }
        drop(state);
        // Also wakes consumers of a closed queue waiting on the last timer
        self.notify.notify_waiters();
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, id: &JobId) -> Result<()> {
        self.ensure_open()?;
        self.inner.enqueue(id.clone(), false).await;
        Ok(())
    }

    async fn push_front(&self, id: &JobId) -> Result<()> {
        // Returned work must survive a concurrent close
        self.inner.enqueue(id.clone(), true).await;
        Ok(())
    }

    async fn push_delayed(&self, id: &JobId, delay: Duration) -> Result<()> {
        // Retries of accepted work are still taken after close; drain waits for them
        if delay.is_zero() {
            self.inner.enqueue(id.clone(), false).await;
            return Ok(());
        }

        self.inner.state.lock().await.scheduled.insert(id.clone());
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(id).await;
        });
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobId>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if let Some(id) = state.ready.pop_front() {
                    return Ok(Some(id));
                }
                if self.inner.closed.load(Ordering::Acquire) && state.scheduled.is_empty() {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn remove(&self, id: &JobId) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let before = state.ready.len();
        state.ready.retain(|queued| queued != id);
        let withdrawn = state.scheduled.remove(id);
        let removed = withdrawn || state.ready.len() != before;
        drop(state);

        if withdrawn {
            self.inner.notify.notify_waiters();
        }
        Ok(removed)
    }

    async fn contains(&self, id: &JobId) -> Result<bool> {
        let state = self.inner.state.lock().await;
        Ok(state.ready.contains(id) || state.scheduled.contains(id))
    }

    async fn len(&self) -> Result<usize> {
        let state = self.inner.state.lock().await;
        Ok(state.ready.len() + state.scheduled.len())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> JobId {
        JobId::from(value)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push(&id("a")).await.unwrap();
        queue.push(&id("b")).await.unwrap();
        queue.push_front(&id("c")).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.pop().await.unwrap(), Some(id("c")));
        assert_eq!(queue.pop().await.unwrap(), Some(id("a")));
        assert_eq!(queue.pop().await.unwrap(), Some(id("b")));
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = MemoryQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&id("late")).await.unwrap();

        assert_eq!(consumer.await.unwrap(), Some(id("late")));
    }

    #[tokio::test]
    async fn test_close_wakes_consumers() {
        let queue = MemoryQueue::new();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await.unwrap() })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;

        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), None);
        }
        assert!(matches!(queue.push(&id("x")).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_queue_drains_remaining() {
        let queue = MemoryQueue::new();
        queue.push(&id("a")).await.unwrap();
        queue.close().await;

        assert_eq!(queue.pop().await.unwrap(), Some(id("a")));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_push() {
        let queue = MemoryQueue::new();
        queue.push_delayed(&id("later"), Duration::from_secs(5)).await.unwrap();
        queue.push(&id("now")).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert!(queue.contains(&id("later")).await.unwrap());
        assert_eq!(queue.pop().await.unwrap(), Some(id("now")));

        // Closing does not lose the pending timer
        queue.close().await;
        assert_eq!(queue.pop().await.unwrap(), Some(id("later")));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_withdraws_delayed() {
        let queue = MemoryQueue::new();
        queue.push_delayed(&id("later"), Duration::from_secs(5)).await.unwrap();

        assert!(queue.remove(&id("later")).await.unwrap());
        queue.close().await;
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove() {
        let queue = MemoryQueue::new();
        queue.push(&id("a")).await.unwrap();
        queue.push(&id("b")).await.unwrap();

        assert!(queue.remove(&id("a")).await.unwrap());
        assert!(!queue.remove(&id("a")).await.unwrap());
        assert!(!queue.contains(&id("a")).await.unwrap());
        assert_eq!(queue.pop().await.unwrap(), Some(id("b")));
    }
}
