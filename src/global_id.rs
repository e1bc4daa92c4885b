//! Global identifier codec
//!
//! Entities from unrelated collections share one external identifier scheme:
//! base64 of `"{type_name}:{id}"`. Encoding is pure and total; decoding
//! recovers exactly the pair that was encoded or fails with
//! [`Error::InvalidGlobalId`](crate::Error::InvalidGlobalId).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::store::StoreId;
use crate::{Error, Result};

/// A decoded external identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalId {
    pub type_name: String,
    pub id: StoreId,
}

/// Encode a `(type_name, id)` pair into an opaque external identifier.
///
/// Type names must not contain `:`; the separator is what makes decoding
/// unambiguous.
pub fn encode(type_name: &str, id: StoreId) -> String {
    debug_assert!(!type_name.contains(':'), "type name must not contain ':'");
    BASE64.encode(format!("{}:{}", type_name, id.to_hex()))
}

/// Decode an external identifier back into its `(type_name, id)` pair.
pub fn decode(global_id: &str) -> Result<GlobalId> {
    let bytes = BASE64
        .decode(global_id.as_bytes())
        .map_err(|e| Error::InvalidGlobalId(e.to_string()))?;
    let payload =
        String::from_utf8(bytes).map_err(|e| Error::InvalidGlobalId(e.to_string()))?;
    let (type_name, id) = payload
        .split_once(':')
        .ok_or_else(|| Error::InvalidGlobalId("missing ':' separator".to_string()))?;
    let id = StoreId::from_hex(id).map_err(|e| Error::InvalidGlobalId(e.to_string()))?;
    Ok(GlobalId { type_name: type_name.to_string(), id })
}
