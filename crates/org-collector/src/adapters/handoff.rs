//! Hand-off queue - synchronous bridge between HTTP handlers and the consumer.
//!
//! Flow:
//! 1. The HTTP handler calls `submit()` with the message
//! 2. The message travels through a single-slot queue together with a oneshot
//!    ack sender; the handler keeps the receiver
//! 3. The consumer `pull()`s the message and an [`AckHandle`]
//! 4. `AckHandle::ack()` completes the oneshot and the handler answers
//!
//! Cancellation is by drop. A handler dropped while waiting for the consumer
//! leaves a pending request whose ack receiver is closed; `pull()` discards
//! those, so the consumer never sees a message nobody is waiting for. A
//! handler dropped while waiting for the ack makes the later `ack()` a no-op.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::domain::{AckError, BridgeError, CorrelationId, Message, RejectReason};
use crate::ports::MessageSource;

type AckResult = Result<(), AckError>;

/// A message waiting for the consumer, paired with its single-use ack slot
struct PendingRequest {
    id: CorrelationId,
    message: Message,
    ack: oneshot::Sender<AckResult>,
    created_at: Instant,
}

/// Statistics for the hand-off queue
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Messages submitted by HTTP handlers
    pub received: AtomicU64,
    /// Messages handed to the consumer
    pub delivered: AtomicU64,
    /// Acks carrying success
    pub acked_ok: AtomicU64,
    /// Acks carrying an error
    pub acked_err: AtomicU64,
    /// Submissions whose caller went away before the ack
    pub abandoned: AtomicU64,
}

/// Create a connected producer/consumer pair
pub fn handoff_channel() -> (HandoffProducer, HandoffConsumer) {
    let (tx, rx) = mpsc::channel(1);
    let stats = Arc::new(BridgeStats::default());
    (
        HandoffProducer {
            tx,
            stats: Arc::clone(&stats),
        },
        HandoffConsumer {
            rx: Mutex::new(rx),
            stats,
        },
    )
}

/// Producer side, cloned into every HTTP handler
#[derive(Clone)]
pub struct HandoffProducer {
    tx: mpsc::Sender<PendingRequest>,
    stats: Arc<BridgeStats>,
}

impl HandoffProducer {
    /// Hand `message` to the consumer and wait for its ack.
    ///
    /// Resolves once the consumer acks or drops its handle. Dropping the
    /// returned future abandons the message.
    pub async fn submit(&self, message: Message) -> Result<(), RejectReason> {
        self.submit_as(CorrelationId::new(), message).await
    }

    /// [`submit`](Self::submit) under an id chosen by the caller
    pub async fn submit_as(&self, id: CorrelationId, message: Message) -> Result<(), RejectReason> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let pending = PendingRequest {
            id,
            message,
            ack: ack_tx,
            created_at: Instant::now(),
        };
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let mut guard = AbandonGuard {
            stats: &self.stats,
            id,
            armed: true,
        };

        if self.tx.send(pending).await.is_err() {
            guard.armed = false;
            warn!(correlation_id = %id, "Hand-off queue closed");
            return Err(RejectReason::Unavailable);
        }
        debug!(correlation_id = %id, "Message queued for consumer");

        let outcome = ack_rx.await;
        guard.armed = false;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RejectReason::Ack(e)),
            Err(_) => Err(RejectReason::Ack(AckError::dropped())),
        }
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }
}

/// Counts a submission as abandoned if its future is dropped mid-flight
struct AbandonGuard<'a> {
    stats: &'a BridgeStats,
    id: CorrelationId,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %self.id, "Caller abandoned request");
        }
    }
}

/// Consumer side, owned by the bridge
pub struct HandoffConsumer {
    rx: Mutex<mpsc::Receiver<PendingRequest>>,
    stats: Arc<BridgeStats>,
}

impl HandoffConsumer {
    /// Wait for the next message.
    ///
    /// Cancel-safe: dropping the future loses nothing. Fails with
    /// [`BridgeError::Closed`] once every producer is gone.
    pub async fn pull(&self) -> Result<(Message, AckHandle), BridgeError> {
        let mut rx = self.rx.lock().await;
        loop {
            let pending = rx.recv().await.ok_or(BridgeError::Closed)?;

            if pending.ack.is_closed() {
                debug!(
                    correlation_id = %pending.id,
                    "Discarding message abandoned before delivery"
                );
                continue;
            }

            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %pending.id,
                wait_ms = pending.created_at.elapsed().as_millis() as u64,
                "Message delivered to consumer"
            );

            let handle = AckHandle {
                id: pending.id,
                sender: pending.ack,
                stats: Arc::clone(&self.stats),
            };
            return Ok((pending.message, handle));
        }
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }
}

#[async_trait]
impl MessageSource for HandoffConsumer {
    async fn pull(&self) -> Result<(Message, AckHandle), BridgeError> {
        HandoffConsumer::pull(self).await
    }
}

/// Single-use acknowledgment for a pulled message
pub struct AckHandle {
    id: CorrelationId,
    sender: oneshot::Sender<AckResult>,
    stats: Arc<BridgeStats>,
}

impl AckHandle {
    /// Report the outcome to the original caller.
    ///
    /// Never blocks. Returns false if the caller already went away.
    pub fn ack(self, outcome: Result<(), AckError>) -> bool {
        let counter = if outcome.is_ok() {
            &self.stats.acked_ok
        } else {
            &self.stats.acked_err
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(outcome) {
            Ok(()) => true,
            Err(_) => {
                debug!(correlation_id = %self.id, "Ack for a caller that is gone");
                false
            }
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_test::{assert_pending, task};

    fn message(body: &'static str) -> Message {
        Message::new(Bytes::from_static(body.as_bytes())).with_meta("Organization", "org1")
    }

    #[tokio::test]
    async fn test_submit_and_ack() {
        let (producer, consumer) = handoff_channel();

        let submit = tokio::spawn(async move { producer.submit(message("{\"a\":1}")).await });

        let (msg, ack) = consumer.pull().await.unwrap();
        assert_eq!(msg.payload().as_ref(), b"{\"a\":1}");
        assert_eq!(msg.organization(), Some("org1"));
        assert!(ack.ack(Ok(())));

        assert!(submit.await.unwrap().is_ok());
        assert_eq!(consumer.stats().delivered.load(Ordering::Relaxed), 1);
        assert_eq!(consumer.stats().acked_ok.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ack_error_reaches_caller() {
        let (producer, consumer) = handoff_channel();
        let submit = tokio::spawn(async move { producer.submit(message("x")).await });

        let (_, ack) = consumer.pull().await.unwrap();
        ack.ack(Err(AckError::new("sink rejected")));

        match submit.await.unwrap() {
            Err(RejectReason::Ack(e)) => assert_eq!(e.message(), "sink rejected"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_ack_handle_fails_caller() {
        let (producer, consumer) = handoff_channel();
        let submit = tokio::spawn(async move { producer.submit(message("x")).await });

        let (_, ack) = consumer.pull().await.unwrap();
        drop(ack);

        assert!(matches!(
            submit.await.unwrap(),
            Err(RejectReason::Ack(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_waits_for_ack() {
        let (producer, consumer) = handoff_channel();
        let mut submit = task::spawn(producer.submit(message("x")));

        // Queued but not acked
        assert_pending!(submit.poll());

        let (_, ack) = consumer.pull().await.unwrap();
        assert_pending!(submit.poll());

        ack.ack(Ok(()));
        assert!(submit.is_woken());
        assert!(submit.await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_before_delivery_is_discarded() {
        let (producer, consumer) = handoff_channel();

        let mut abandoned = task::spawn(producer.submit(message("stale")));
        assert_pending!(abandoned.poll());
        drop(abandoned);

        let live_producer = producer.clone();
        let live = tokio::spawn(async move { live_producer.submit(message("fresh")).await });

        let (msg, ack) = consumer.pull().await.unwrap();
        assert_eq!(msg.payload().as_ref(), b"fresh");
        ack.ack(Ok(()));
        assert!(live.await.unwrap().is_ok());

        assert_eq!(producer.stats().abandoned.load(Ordering::Relaxed), 1);
        assert_eq!(producer.stats().delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ack_after_caller_left_does_not_block() {
        let (producer, consumer) = handoff_channel();
        let submit = tokio::spawn(async move { producer.submit(message("x")).await });

        let (_, ack) = consumer.pull().await.unwrap();
        submit.abort();
        let _ = submit.await;

        assert!(!ack.ack(Ok(())));
    }

    #[tokio::test]
    async fn test_pull_without_producer_waits() {
        let (_producer, consumer) = handoff_channel();
        let pulled = tokio::time::timeout(Duration::from_millis(50), consumer.pull()).await;
        assert!(pulled.is_err());
    }

    #[tokio::test]
    async fn test_pull_after_producers_dropped() {
        let (producer, consumer) = handoff_channel();
        drop(producer);
        assert!(matches!(consumer.pull().await, Err(BridgeError::Closed)));
    }
}
