//! Configuration types for armsweep

use crate::retry::RetryPolicy;
use crate::wait::WaitConfig;
use armsweep_common::defaults::{DEFAULT_ARM_ENDPOINT, DEFAULT_GROUP_PREFIX, VHD_CONTAINER};
use std::time::Duration;

/// ARM connection settings
#[derive(Clone)]
pub struct ArmConfig {
    /// Management endpoint (e.g., "https://management.azure.com")
    pub endpoint: String,
    /// Subscription owning the resource groups
    pub subscription_id: String,
    /// Bearer token for the management endpoint
    pub access_token: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Retry policy for throttled and transient requests
    pub retry: RetryPolicy,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ARM_ENDPOINT.to_string(),
            subscription_id: String::new(),
            access_token: String::new(),
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl std::fmt::Debug for ArmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmConfig")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Teardown behaviour
#[derive(Debug, Clone)]
pub struct TeardownConfig {
    /// Resource groups are named `{group_prefix}-{region}`
    pub group_prefix: String,
    /// Container holding VM disks in the storage account
    pub vhd_container: String,
    /// Backoff and deadline when waiting for deletions
    pub wait: WaitConfig,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            vhd_container: VHD_CONTAINER.to_string(),
            wait: WaitConfig::default(),
        }
    }
}

/// Complete configuration for a CLI invocation
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub arm: ArmConfig,
    pub teardown: TeardownConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.arm.endpoint, "https://management.azure.com");
        assert_eq!(config.teardown.group_prefix, "armsweep");
        assert_eq!(config.teardown.vhd_container, "vhds");
        assert_eq!(config.teardown.wait.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_debug_hides_token() {
        let config = ArmConfig {
            access_token: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
