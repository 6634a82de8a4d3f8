//! Shared ARM configuration context
//!
//! Provides `ArmContext` for building the HTTP client once and creating
//! multiple service clients from the same settings.

use crate::config::ArmConfig;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Shared ARM context for creating service clients.
///
/// Holds the HTTP client, the management endpoint, the subscription and the
/// bearer token. Cloning is cheap.
///
/// # Example
/// ```ignore
/// let arm = ArmContext::new(&config.arm)?;
///
/// let client = ArmClient::from_context(&arm);
/// let blobs = BlobClientFactory::from_context(&arm);
/// ```
#[derive(Clone)]
pub struct ArmContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    access_token: String,
    retry: RetryPolicy,
}

impl ArmContext {
    /// Build the HTTP client and context from configuration
    pub fn new(config: &ArmConfig) -> Result<Self> {
        if config.subscription_id.is_empty() {
            anyhow::bail!("subscription id cannot be empty");
        }
        if config.access_token.is_empty() {
            anyhow::bail!("access token cannot be empty");
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("armsweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                http,
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                subscription_id: config.subscription_id.clone(),
                access_token: config.access_token.clone(),
                retry: config.retry,
            }),
        })
    }

    /// Get the shared HTTP client
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Management endpoint without trailing slash
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn subscription_id(&self) -> &str {
        &self.inner.subscription_id
    }

    pub(crate) fn access_token(&self) -> &str {
        &self.inner.access_token
    }

    /// Retry policy for throttled and transient requests
    pub fn retry(&self) -> &RetryPolicy {
        &self.inner.retry
    }
}

impl std::fmt::Debug for ArmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmContext")
            .field("endpoint", &self.inner.endpoint)
            .field("subscription_id", &self.inner.subscription_id)
            .finish_non_exhaustive()
    }
}

/// Trait for types that can be constructed from an [`ArmContext`].
pub trait FromArmContext {
    fn from_context(ctx: &ArmContext) -> Self;
}
