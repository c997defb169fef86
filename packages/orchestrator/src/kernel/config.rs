//! Environment-driven settings.
//!
//! Library code never reads the environment directly; the binary loads a
//! [`Settings`] once and passes it down.

use std::time::Duration;

use anyhow::{Context, Result};

use super::tasks::TaskStoreConfig;

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upstream API key (`WEBSETS_API_KEY`).
    pub api_key: String,
    pub task_store: TaskStoreConfig,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `WEBSETS_API_KEY` is required; everything else has defaults:
    /// `TASK_MAX_CONCURRENT` (20), `TASK_TTL_SECS` (3600),
    /// `TASK_SWEEP_INTERVAL_SECS` (300).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("WEBSETS_API_KEY")
            .context("WEBSETS_API_KEY environment variable is required")?;

        let mut task_store = TaskStoreConfig::default();
        if let Some(cap) = read_u64("TASK_MAX_CONCURRENT")? {
            task_store.max_concurrent = cap as usize;
        }
        if let Some(secs) = read_u64("TASK_TTL_SECS")? {
            task_store.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("TASK_SWEEP_INTERVAL_SECS")? {
            task_store.sweep_interval = Duration::from_secs(secs);
        }

        Ok(Self {
            api_key,
            task_store,
        })
    }
}

fn read_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<u64>()
                .with_context(|| format!("{name} must be a non-negative integer, got {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
