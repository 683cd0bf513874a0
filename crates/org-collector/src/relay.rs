//! Relay - moves messages from the ingress bridge to the egress writer.
//!
//! Up to `max_in_flight` writes run concurrently. Each message is acked with
//! the outcome of its write, so the original HTTP caller sees the downstream
//! result. On shutdown the relay stops pulling and waits for in-flight writes
//! before closing the writer.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::domain::{AckError, BridgeError, EgressError};
use crate::ports::{MessageSource, MessageWriter};

/// Why the relay stopped
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("writer failed to connect: {0}")]
    Connect(#[source] EgressError),

    #[error("source failed: {0}")]
    Source(#[source] BridgeError),

    #[error("max_in_flight must be at least 1")]
    NoCapacity,
}

/// Run until `shutdown` resolves or the source closes
pub async fn run<S, W>(
    source: Arc<S>,
    writer: Arc<W>,
    max_in_flight: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RelayError>
where
    S: MessageSource + ?Sized,
    W: MessageWriter + ?Sized + 'static,
{
    let capacity = u32::try_from(max_in_flight)
        .ok()
        .filter(|&n| n > 0)
        .ok_or(RelayError::NoCapacity)?;
    let permits = Arc::new(Semaphore::new(capacity as usize));

    writer.connect().await.map_err(RelayError::Connect)?;
    info!(max_in_flight, "Relay started");

    tokio::pin!(shutdown);
    let outcome = loop {
        let permit = tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let pulled = tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            pulled = source.pull() => pulled,
        };

        let (message, ack) = match pulled {
            Ok(pulled) => pulled,
            Err(BridgeError::Closed) => {
                info!("Source closed");
                break Ok(());
            }
            Err(e) => break Err(RelayError::Source(e)),
        };

        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let id = ack.correlation_id();
            let result = writer.write(&message).await;
            let outcome = match result {
                Ok(()) => {
                    debug!(correlation_id = %id, "Message written");
                    Ok(())
                }
                Err(e) => {
                    warn!(correlation_id = %id, error = %e, "Write failed");
                    Err(AckError::new(e.to_string()))
                }
            };
            ack.ack(outcome);
            drop(permit);
        });
    };

    // Every permit back means every write finished
    let drained = permits.acquire_many(capacity).await;
    drop(drained);

    if let Err(e) = writer.close().await {
        warn!(error = %e, "Writer close failed");
    }
    info!("Relay stopped");
    outcome
}
