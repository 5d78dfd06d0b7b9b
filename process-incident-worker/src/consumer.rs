//! IncidentConsumer feeds payloads to the controller one at a time.
//!
//! Messages are processed strictly in arrival order. A `Failed` outcome is
//! redelivered in place (later messages wait) with exponential backoff; once
//! the redelivery budget is spent the consumer stops with an error rather
//! than skipping the message.
//!
//! Shutdown is cooperative: flipping the watch to `true` aborts the
//! in-flight message (it counts as received only) and returns the stats so far.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use process_incident_core::{ControllerError, IncidentController, MessageOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub max_redeliveries: u32,
    /// Delay before the first redelivery; doubles on each further attempt.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RedeliveryPolicy {
    /// Delay before redelivery number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub handled: u64,
    pub ignored: u64,
    pub redelivered: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("message #{offset} still failing after {attempts} attempts: {source}")]
    RedeliveryExhausted {
        /// 1-based position of the message in the input.
        offset: u64,
        attempts: u32,
        source: ControllerError,
    },
}

pub struct IncidentConsumer {
    controller: Arc<IncidentController>,
    policy: RedeliveryPolicy,
}

impl IncidentConsumer {
    pub fn new(controller: Arc<IncidentController>, policy: RedeliveryPolicy) -> Self {
        Self { controller, policy }
    }

    /// Consume until `rx` closes or shutdown is signalled.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<Vec<u8>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerStats, ConsumerError> {
        tracing::info!("IncidentConsumer started");
        let mut stats = ConsumerStats::default();

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown_requested(&shutdown) => {
                    tracing::info!("IncidentConsumer shutting down");
                    break;
                }
                next = rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            stats.received += 1;
            let offset = stats.received;

            if !self.deliver(&payload, offset, &mut stats, &shutdown).await? {
                tracing::info!("IncidentConsumer shutting down (in flight)");
                break;
            }
        }

        tracing::info!(
            received = stats.received,
            handled = stats.handled,
            ignored = stats.ignored,
            redelivered = stats.redelivered,
            "IncidentConsumer stopped"
        );
        Ok(stats)
    }

    /// Deliver one payload until it settles. Returns `false` if shutdown
    /// interrupted it.
    async fn deliver(
        &self,
        payload: &[u8],
        offset: u64,
        stats: &mut ConsumerStats,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<bool, ConsumerError> {
        let mut attempt = 0u32;
        loop {
            match self
                .controller
                .handle_message_with_shutdown(payload, shutdown)
                .await
            {
                MessageOutcome::Handled => {
                    stats.handled += 1;
                    return Ok(true);
                }
                MessageOutcome::Ignored(_) => {
                    stats.ignored += 1;
                    return Ok(true);
                }
                MessageOutcome::Failed(e) if e.is_cancelled() => return Ok(false),
                MessageOutcome::Failed(e) => {
                    if attempt >= self.policy.max_redeliveries {
                        return Err(ConsumerError::RedeliveryExhausted {
                            offset,
                            attempts: attempt + 1,
                            source: e,
                        });
                    }
                    attempt += 1;
                    stats.redelivered += 1;

                    let backoff = self.policy.backoff(attempt);
                    tracing::warn!(
                        offset,
                        attempt,
                        max = self.policy.max_redeliveries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Redelivering failed incident message"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(shutdown) => return Ok(false),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

async fn shutdown_requested(shutdown: &watch::Receiver<bool>) {
    let mut rx = shutdown.clone();
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RedeliveryPolicy {
            max_redeliveries: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(4), Duration::from_secs(2));
        assert_eq!(policy.backoff(40), Duration::from_secs(2));
    }
}
