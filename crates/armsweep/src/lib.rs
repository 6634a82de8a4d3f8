//! armsweep - ordered teardown of Azure Resource Manager virtual machines
//!
//! This crate deletes a VM together with the resources it owns: network
//! interfaces, their public IPs, the disk container in the VM's storage
//! account, the storage account itself when it holds no captured images,
//! and finally the resource group once it is empty.
//!
//! ## Modules
//!
//! - [`arm`]: ARM REST client and the `ArmOperations` trait
//! - [`storage`]: SharedKey-signed blob access
//! - [`teardown`]: The teardown sequence
//! - [`wait`]: Polling with backoff, deadline and cancellation
//! - [`retry`]: Bounded retry policy
//! - [`lock`]: Scoped machine locks
//! - [`testing`]: In-memory fakes of the ARM and blob services

pub mod arm;
pub mod config;
pub mod lock;
pub mod retry;
pub mod storage;
pub mod teardown;
pub mod testing;
pub mod wait;
