//! Media acquisition chain: an ordered list of independent strategies tried
//! until one produces a plausibly-sized video file at the destination.

pub mod frontend;
pub mod proxy;
pub mod synthetic;
pub mod ytdlp;

use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

/// Closed failure taxonomy returned by strategies. Chain advancement never
/// depends on parsing human-readable messages.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("asset not ready: {0}")]
    AssetUnready(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StrategyError {
    /// Only transient conditions and not-yet-ready assets are worth another
    /// attempt within the same strategy.
    pub fn retryable(&self) -> bool {
        matches!(self, StrategyError::Transient(_) | StrategyError::AssetUnready(_))
    }
}

/// What the chain is asked to produce: a content reference (absent when the
/// metadata provider had no trailer), a title for synthetic fallback text,
/// and the duration the composition step will trim to.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub reference: Option<String>,
    pub title: String,
    pub target_duration: f64,
}

/// One independent way of obtaining the content clip.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Strategies that need the platform video id are skipped outright when
    /// it is absent, not attempted-and-failed.
    fn requires_reference(&self) -> bool {
        true
    }

    /// Byte floor below which an otherwise-successful download is discarded;
    /// hosting platforms sometimes return small error pages with a 200.
    fn min_valid_bytes(&self) -> u64;

    fn attempts(&self) -> u32;

    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        dest: &Path,
    ) -> Result<(), StrategyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
}

/// Ephemeral per-strategy record; logged, never persisted.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub strategy: String,
    pub outcome: Outcome,
    pub attempts_made: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub records: Vec<AttemptRecord>,
    pub winner: Option<String>,
}

impl AcquisitionReport {
    pub fn succeeded(&self) -> bool {
        self.winner.is_some()
    }
}

pub struct AcquisitionChain {
    strategies: Vec<Box<dyn Strategy>>,
    backoff_base: Duration,
}

impl AcquisitionChain {
    pub fn new(backoff_base: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            backoff_base,
        }
    }

    pub fn push(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try strategies in priority order; first one that leaves a valid file
    /// at `dest` wins and the rest are never invoked.
    pub async fn acquire(&self, request: &AcquisitionRequest, dest: &Path) -> AcquisitionReport {
        let mut report = AcquisitionReport::default();

        for strategy in &self.strategies {
            if strategy.requires_reference() && request.reference.is_none() {
                info!("strategy {}: skipped (no content reference)", strategy.name());
                report.records.push(AttemptRecord {
                    strategy: strategy.name().to_string(),
                    outcome: Outcome::Skipped,
                    attempts_made: 0,
                    reason: Some("no content reference".to_string()),
                });
                continue;
            }

            let (won, attempts_made, reason) = self.run_strategy(strategy.as_ref(), request, dest).await;
            report.records.push(AttemptRecord {
                strategy: strategy.name().to_string(),
                outcome: if won { Outcome::Success } else { Outcome::Failure },
                attempts_made,
                reason,
            });

            if won {
                report.winner = Some(strategy.name().to_string());
                return report;
            }
        }

        report
    }

    async fn run_strategy(
        &self,
        strategy: &dyn Strategy,
        request: &AcquisitionRequest,
        dest: &Path,
    ) -> (bool, u32, Option<String>) {
        let max_attempts = strategy.attempts().max(1);
        let mut last_reason = None;

        for attempt in 1..=max_attempts {
            // stale partial output from a previous attempt must not pass the
            // size check
            let _ = fs::remove_file(dest).await;

            info!(
                "strategy {}: attempt {}/{}",
                strategy.name(),
                attempt,
                max_attempts
            );

            match strategy.attempt(request, dest).await {
                Ok(()) => {
                    let size = fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
                    if size >= strategy.min_valid_bytes() {
                        info!("strategy {}: success ({} bytes)", strategy.name(), size);
                        return (true, attempt, None);
                    }
                    let reason = format!(
                        "undersized output ({} bytes < {})",
                        size,
                        strategy.min_valid_bytes()
                    );
                    warn!("strategy {}: {}", strategy.name(), reason);
                    last_reason = Some(reason);
                }
                Err(err) => {
                    warn!("strategy {}: {}", strategy.name(), err);
                    let retryable = err.retryable();
                    last_reason = Some(err.to_string());
                    if !retryable {
                        return (false, attempt, last_reason);
                    }
                }
            }

            if attempt < max_attempts {
                self.backoff(attempt).await;
            }
        }

        (false, max_attempts, last_reason)
    }

    /// Linearly increasing delay with a little jitter to avoid hammering a
    /// recovering provider in lockstep.
    async fn backoff(&self, attempt: u32) {
        if self.backoff_base.is_zero() {
            return;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..500);
        let delay = self.backoff_base * attempt + Duration::from_millis(jitter_ms);
        tokio::time::sleep(delay).await;
    }
}
