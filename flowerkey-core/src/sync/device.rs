//! Device identity used in batch names, change records and the remote lock.

use crate::{FlowerKeyError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Config key under which the local device id is persisted.
pub const DEVICE_ID_KEY: &str = "deviceId";

/// Opaque per-install device identifier.
///
/// Generated ids are 16 lowercase hex characters. Any non-empty id without
/// `_` or `/` is accepted so batch names stay parseable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random device id.
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(HEXLOWER.encode(&bytes))
    }

    /// Validate an id read from storage or from a remote object.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.contains('_') || s.contains('/') || s.contains('.') {
            return Err(FlowerKeyError::InvalidInput(format!(
                "Invalid device id: {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = FlowerKeyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
