//! armsweep-common - Shared types and defaults
//!
//! This crate provides the identifiers and constants shared by the armsweep
//! library and CLI, without any HTTP or runtime dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`resource_id`]: Slash-encoded `region/id` compound identifiers
//! - [`resource_kind`]: ARM resource kinds tracked during teardown

pub mod defaults;
pub mod resource_id;
pub mod resource_kind;

// Re-export commonly used types
pub use resource_id::{RegionAndId, ResourceIdError};
pub use resource_kind::ResourceKind;
