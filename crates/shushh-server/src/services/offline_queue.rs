//! Per-identity queue of chat envelopes awaiting delivery
//!
//! Envelopes are stored already wrapped under the recipient's transport key
//! and are handed back untouched, in enqueue order.

use dashmap::DashMap;
use shushh_types::{ServerMessage, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often the sweeper drops expired envelopes
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct QueuedEnvelope {
    message: ServerMessage,
    queued_at: Instant,
}

#[derive(Clone)]
pub struct OfflineQueue {
    queues: Arc<DashMap<UserId, VecDeque<QueuedEnvelope>>>,
    ttl: Option<Duration>,
}

impl OfflineQueue {
    /// `ttl` of `None` keeps envelopes until their recipient connects
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn push(&self, user_id: &str, message: ServerMessage) {
        let mut queue = self.queues.entry(user_id.to_string()).or_default();
        queue.push_back(QueuedEnvelope {
            message,
            queued_at: Instant::now(),
        });
        debug!("Queued envelope for {} ({} pending)", user_id, queue.len());
    }

    /// Take every unexpired envelope for `user_id`, oldest first, leaving the
    /// queue empty
    pub fn drain(&self, user_id: &str) -> Vec<ServerMessage> {
        let Some((_, queue)) = self.queues.remove(user_id) else {
            return Vec::new();
        };

        let now = Instant::now();
        let total = queue.len();
        let live: Vec<ServerMessage> = queue
            .into_iter()
            .filter(|envelope| !self.is_expired(envelope, now))
            .map(|envelope| envelope.message)
            .collect();

        if live.len() < total {
            info!(
                "Discarded {} expired envelopes for {}",
                total - live.len(),
                user_id
            );
        }
        live
    }

    #[cfg(test)]
    pub fn len(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map(|queue| queue.len()).unwrap_or(0)
    }

    /// Drop expired envelopes everywhere, returning how many were removed
    pub fn sweep(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }

        let now = Instant::now();
        let mut removed = 0;
        self.queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|envelope| !self.is_expired(envelope, now));
            removed += before - queue.len();
            !queue.is_empty()
        });
        removed
    }

    /// Run [`sweep`](Self::sweep) periodically in the background
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;

                let removed = queue.sweep();
                if removed > 0 {
                    info!("Offline queue sweep discarded {} envelopes", removed);
                }
            }
        })
    }

    fn is_expired(&self, envelope: &QueuedEnvelope, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.duration_since(envelope.queued_at) > ttl)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(n: u8) -> ServerMessage {
        ServerMessage::Message {
            from: "1".to_string(),
            data: vec![n; 32],
        }
    }

    #[tokio::test]
    async fn test_fifo_and_cleared() {
        let queue = OfflineQueue::new(None);
        for n in 0..3 {
            queue.push("2", envelope(n));
        }
        assert_eq!(queue.len("2"), 3);

        assert_eq!(
            queue.drain("2"),
            vec![envelope(0), envelope(1), envelope(2)]
        );
        assert_eq!(queue.len("2"), 0);
        assert!(queue.drain("2").is_empty());
    }

    #[tokio::test]
    async fn test_queues_are_per_identity() {
        let queue = OfflineQueue::new(None);
        queue.push("2", envelope(1));
        queue.push("3", envelope(2));

        assert_eq!(queue.drain("3"), vec![envelope(2)]);
        assert_eq!(queue.len("2"), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_at_drain() {
        let queue = OfflineQueue::new(Some(Duration::from_millis(10)));
        queue.push("2", envelope(1));

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("2", envelope(2));

        assert_eq!(queue.drain("2"), vec![envelope(2)]);
    }

    #[tokio::test]
    async fn test_sweep() {
        let queue = OfflineQueue::new(Some(Duration::from_millis(10)));
        queue.push("2", envelope(1));
        queue.push("3", envelope(2));

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("3", envelope(3));

        assert_eq!(queue.sweep(), 2);
        assert_eq!(queue.len("2"), 0);
        assert_eq!(queue.len("3"), 1);
    }

    #[tokio::test]
    async fn test_no_ttl_never_sweeps() {
        let queue = OfflineQueue::new(None);
        queue.push("2", envelope(1));
        assert_eq!(queue.sweep(), 0);
        assert_eq!(queue.len("2"), 1);
    }
}
