use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Cached result of a list/search query: the matching IDs and the total count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiResponse {
    pub ids: Vec<u64>,
    pub count: u64,
}

impl MultiResponse {
    pub fn new(ids: Vec<u64>, count: u64) -> Self {
        Self { ids, count }
    }

    /// Decodes a cached payload stored under `key`.
    pub fn from_bytes(key: &str, bytes: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!(
                key = %key,
                payload = %String::from_utf8_lossy(bytes),
                error = %e,
                "invalid multi response payload"
            );
            CacheError::decode(key, e)
        })
    }

    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
