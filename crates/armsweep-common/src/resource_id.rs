//! Slash-encoded compound identifiers
//!
//! A node is referenced externally as `region/name`. The region selects the
//! resource group the node lives in, the name identifies the virtual machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when building or decoding a [`RegionAndId`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceIdError {
    /// The encoded string did not have exactly two parts
    #[error("id must be in format regionId/id, got: {0}")]
    Malformed(String),

    /// A component was empty
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// A component contained the separator
    #[error("{field} cannot contain '/': {value}")]
    ContainsSeparator { field: &'static str, value: String },
}

/// Region plus local identifier, reversibly encoded as `region/id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionAndId {
    region: String,
    id: String,
}

impl RegionAndId {
    /// Build an id from its parts, rejecting values that would not round-trip
    pub fn new(region: impl Into<String>, id: impl Into<String>) -> Result<Self, ResourceIdError> {
        let region = region.into();
        let id = id.into();
        validate("region", &region)?;
        validate("id", &id)?;
        Ok(Self { region, id })
    }

    /// Decode a `region/id` string
    pub fn from_slash_encoded(encoded: &str) -> Result<Self, ResourceIdError> {
        let mut parts = encoded.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(region), Some(id), None) => Self::new(region, id),
            _ => Err(ResourceIdError::Malformed(encoded.to_string())),
        }
    }

    /// Encode as `region/id`
    pub fn slash_encode(&self) -> String {
        format!("{}/{}", self.region, self.id)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

fn validate(field: &'static str, value: &str) -> Result<(), ResourceIdError> {
    if value.is_empty() {
        return Err(ResourceIdError::Empty(field));
    }
    if value.contains('/') {
        return Err(ResourceIdError::ContainsSeparator {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for RegionAndId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.id)
    }
}

impl FromStr for RegionAndId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slash_encoded(s)
    }
}

impl TryFrom<String> for RegionAndId {
    type Error = ResourceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_slash_encoded(&value)
    }
}

impl From<RegionAndId> for String {
    fn from(value: RegionAndId) -> Self {
        value.slash_encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let id = RegionAndId::from_slash_encoded("eastus/vm1").unwrap();
        assert_eq!(id.region(), "eastus");
        assert_eq!(id.id(), "vm1");
        assert_eq!(id.slash_encode(), "eastus/vm1");
        assert_eq!(id.to_string(), "eastus/vm1");
    }

    #[test]
    fn test_malformed_ids() {
        for bad in ["vm1", "eastus/vm1/extra", ""] {
            assert!(
                matches!(
                    RegionAndId::from_slash_encoded(bad),
                    Err(ResourceIdError::Malformed(_)) | Err(ResourceIdError::Empty(_))
                ),
                "Expected error for: {bad:?}"
            );
        }
        assert_eq!(
            RegionAndId::from_slash_encoded("/vm1"),
            Err(ResourceIdError::Empty("region"))
        );
        assert_eq!(
            RegionAndId::from_slash_encoded("eastus/"),
            Err(ResourceIdError::Empty("id"))
        );
    }

    #[test]
    fn test_new_rejects_separator() {
        let err = RegionAndId::new("east/us", "vm1").unwrap_err();
        assert!(matches!(
            err,
            ResourceIdError::ContainsSeparator { field: "region", .. }
        ));
    }

    #[test]
    fn test_serde_uses_slash_encoding() {
        let id = RegionAndId::new("westeurope", "node-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"westeurope/node-7\"");

        let back: RegionAndId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<RegionAndId>("\"no-slash\"").is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Encoding then decoding yields the original id
            #[test]
            fn slash_encoding_round_trips(
                region in "[a-z0-9]{1,16}",
                id in "[A-Za-z0-9._-]{1,40}"
            ) {
                let original = RegionAndId::new(region, id).unwrap();
                let decoded = RegionAndId::from_slash_encoded(&original.slash_encode()).unwrap();
                prop_assert_eq!(decoded, original);
            }

            /// Decoding arbitrary input never panics
            #[test]
            fn decode_never_panics(input in ".*") {
                let _ = RegionAndId::from_slash_encoded(&input);
            }
        }
    }
}
