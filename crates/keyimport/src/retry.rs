//! Endpoint rotation with bounded exponential backoff, used by the classification client.

use crate::config::ClassifierConfig;
use std::{future::Future, time::Duration};

const JITTER_MAX_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Passes over the endpoint list. A pass ends only after every endpoint failed.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_max_ms: u64,
}

impl From<&ClassifierConfig> for BackoffConfig {
    fn from(cfg: &ClassifierConfig) -> Self {
        Self {
            rounds: cfg.rounds.max(1),
            base_delay: Duration::from_millis(cfg.backoff_base_ms),
            max_delay: Duration::from_millis(cfg.backoff_max_ms),
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl BackoffConfig {
    /// Pause after failed pass `round` (0-based): `base * 2^round`, capped, plus jitter.
    fn delay_after(&self, round: usize) -> Duration {
        let factor = u32::try_from(round)
            .ok()
            .and_then(|r| 2_u32.checked_pow(r))
            .unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        capped.saturating_add(Duration::from_millis(self.jitter()))
    }

    fn jitter(&self) -> u64 {
        if self.jitter_max_ms == 0 {
            return 0;
        }
        // Thread-local RNG is not Send; draw the value before any await.
        rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
    }
}

/// Run `op` against each endpoint in order until one succeeds, repeating the whole list up to
/// `cfg.rounds` times. The last error is returned wrapped in `label`.
pub async fn try_all_with_backoff<I, T, Fut>(
    endpoints: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{label}: no endpoints configured");
    }

    let mut last_err = eyre::eyre!("{label}: no attempt made");
    for round in 0..cfg.rounds.max(1) {
        if round > 0 {
            tokio::time::sleep(cfg.delay_after(round - 1)).await;
        }
        for (idx, endpoint) in endpoints.iter().enumerate() {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(round, endpoint = idx, error = %format!("{e:#}"), "{label} attempt failed");
                    last_err = e;
                }
            }
        }
    }
    Err(last_err.wrap_err(label))
}
