//! Teardown failures

use crate::arm::error::{ArmError, classify_anyhow_error};
use crate::wait::WaitError;
use armsweep_common::ResourceIdError;
use std::time::Duration;
use thiserror::Error;

/// Why a teardown stopped before reaching the end of its sequence
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("invalid resource id")]
    InvalidId(#[from] ResourceIdError),

    /// A control-plane call failed
    #[error("{action} failed")]
    Api {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out after {timeout:?} waiting for {resource}")]
    Timeout { resource: String, timeout: Duration },

    #[error("cancelled while waiting for {resource}")]
    Cancelled { resource: String },

    /// ARM reported the asynchronous delete as failed
    #[error("deletion of {resource} failed")]
    DeletionFailed { resource: String },

    /// Storage keys or blob access failed
    #[error("storage account {account}: {action} failed")]
    Storage {
        account: String,
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl TeardownError {
    pub(crate) fn api(action: impl Into<String>, source: anyhow::Error) -> Self {
        TeardownError::Api {
            action: action.into(),
            source,
        }
    }

    /// The classified ARM error behind this failure, if any
    pub fn arm_error(&self) -> Option<&ArmError> {
        match self {
            TeardownError::Api { source, .. } | TeardownError::Storage { source, .. } => {
                classify_anyhow_error(source)
            }
            _ => None,
        }
    }
}

impl From<WaitError> for TeardownError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout {
                resource, timeout, ..
            } => TeardownError::Timeout { resource, timeout },
            WaitError::Cancelled { resource } => TeardownError::Cancelled { resource },
            WaitError::Check { resource, source } => {
                TeardownError::api(format!("polling deletion of {resource}"), source)
            }
        }
    }
}
