//! Resetting a host between configuration attempts.

use async_trait::async_trait;

use crate::error::ConfigResult;

/// Puts a host back into a known state before a retried configuration run.
#[async_trait]
pub trait HostReset: Send + Sync {
    async fn reset(&self, host: &str) -> ConfigResult<()>;
}
