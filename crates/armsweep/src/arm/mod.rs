//! Azure Resource Manager client modules
//!
//! This module provides:
//! - types: Serde models of the ARM payloads a teardown reads
//! - error: Classification of ARM error responses
//! - operations: The `ArmOperations` trait the teardown runs against
//! - context: Shared HTTP client and credentials
//! - client: REST implementation of `ArmOperations`

pub mod client;
pub mod context;
pub mod error;
pub mod operations;
pub mod types;

pub use client::ArmClient;
pub use context::{ArmContext, FromArmContext};
pub use operations::ArmOperations;
pub use types::{
    DeletionOutcome, IdReference, NetworkInterfaceCard, OperationHandle, OperationStatus,
    StorageProfile, StorageServiceKeys, VirtualMachine,
};

// Error handling
pub use error::{
    ArmError, classify_anyhow_error, classify_arm_error, ignore_not_found, is_not_found,
    is_transient_transport_error,
};

#[cfg(test)]
pub use operations::MockArmOperations;
