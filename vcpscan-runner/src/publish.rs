//! Publish gate, tagging and the retrying write path into the store.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use vcpscan_core::config::PublishConfig;
use vcpscan_core::domain::{LiquidityBucket, SignalEvent};

use crate::store::{DuplicateReason, SignalStore, StoreError, StoreOutcome};

/// Tag added when a signal outside the allowed buckets was admitted on score.
pub const LIQUIDITY_EXCEPTION_TAG: &str = "liquidity_exception";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("store write failed after {attempts} attempt(s): {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Why the gate dropped a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateRejection {
    /// APPROACHING is informational only.
    NotPublishable,
    BelowMinScore { score: u8, min_score: u8 },
    Liquidity { bucket: LiquidityBucket, score: u8 },
}

/// Gate verdict for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass { liquidity_exception: bool },
    Reject(GateRejection),
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        matches!(self, GateDecision::Pass { .. })
    }
}

/// What happened to a signal handed to [`Publisher::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { tags: Vec<String> },
    GateRejected(GateRejection),
    Duplicate(DuplicateReason),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Applies the score/liquidity gate and writes accepted signals.
#[derive(Debug, Clone)]
pub struct Publisher {
    config: PublishConfig,
}

impl Publisher {
    pub fn new(config: PublishConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// score >= min_score(timeframe) AND (bucket allowed OR score > exception).
    pub fn gate(&self, event: &SignalEvent) -> GateDecision {
        if !event.signal_type().is_publishable() {
            return GateDecision::Reject(GateRejection::NotPublishable);
        }
        let min_score = self.config.min_score(event.timeframe);
        if event.score < min_score {
            return GateDecision::Reject(GateRejection::BelowMinScore {
                score: event.score,
                min_score,
            });
        }
        let bucket = event.setup.liquidity;
        if self.config.allowed_buckets.contains(&bucket) {
            GateDecision::Pass {
                liquidity_exception: false,
            }
        } else if event.score > self.config.liquidity_exception_score {
            GateDecision::Pass {
                liquidity_exception: true,
            }
        } else {
            GateDecision::Reject(GateRejection::Liquidity {
                bucket,
                score: event.score,
            })
        }
    }

    /// Gate, then persist through the dedup store.
    ///
    /// Busy/locked writes are retried `write_retries` times with exponential
    /// backoff; any other store error, or exhausting the retries, is returned.
    pub fn publish(
        &self,
        store: &mut SignalStore,
        event: &SignalEvent,
        now_ms: i64,
    ) -> Result<PublishOutcome, PublishError> {
        let liquidity_exception = match self.gate(event) {
            GateDecision::Pass {
                liquidity_exception,
            } => liquidity_exception,
            GateDecision::Reject(reason) => {
                debug!(symbol = %event.symbol, score = event.score, ?reason, "gate rejected");
                return Ok(PublishOutcome::GateRejected(reason));
            }
        };

        let tags = tags_for(event, liquidity_exception);
        let cooldown = self.config.cooldown_hours(event.signal_type());
        let max_attempts = self.config.write_retries.max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match store.try_publish(event, &tags, now_ms, cooldown) {
                Ok(StoreOutcome::Inserted) => {
                    info!(
                        symbol = %event.symbol,
                        timeframe = %event.timeframe,
                        signal_type = %event.signal_type(),
                        score = event.score,
                        event_id = %event.event_id,
                        "published"
                    );
                    return Ok(PublishOutcome::Published { tags });
                }
                Ok(StoreOutcome::Duplicate(reason)) => {
                    debug!(symbol = %event.symbol, dedupe_key = %event.dedupe_key, ?reason, "duplicate suppressed");
                    return Ok(PublishOutcome::Duplicate(reason));
                }
                Err(e) if e.is_busy() && attempt < max_attempts => {
                    let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "store busy, retrying");
                    thread::sleep(backoff);
                }
                Err(source) => {
                    return Err(PublishError::Persistence {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`, saturating.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Timeframe, signal type, grade, benchmark regime, liquidity bucket and, when
/// the exception path admitted the signal, `liquidity_exception`.
pub fn tags_for(event: &SignalEvent, liquidity_exception: bool) -> Vec<String> {
    let mut tags = vec![
        event.timeframe.to_string(),
        event.signal_type().to_string(),
        format!("grade_{}", event.setup.grade()),
        event.setup.regime.benchmark.to_string(),
        format!("liquidity_{}", event.setup.liquidity),
    ];
    if liquidity_exception {
        tags.push(LIQUIDITY_EXCEPTION_TAG.to_string());
    }
    tags
}
