//! Legacy generic payload encoding.
//!
//! Early datasets stored each octant's records as a plain serialized list.
//! Only reading is supported; new datasets always use the compact encoding.

use crate::ParticleRecord;
use crate::error::{DecodeError, DecodeResult};

/// Decode a legacy payload.
pub fn decode_legacy(data: &[u8]) -> DecodeResult<Vec<ParticleRecord>> {
    serde_json::from_slice(data).map_err(|e| DecodeError::InvalidFormat {
        context: "legacy particles",
        detail: e.to_string(),
    })
}
