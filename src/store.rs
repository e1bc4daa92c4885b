//! Storage read port
//!
//! The core never talks to a concrete database. Everything it needs from
//! storage is behind [`ReadStore`]: point lookups by id, foreign-key lookups,
//! ordered window fetches and window counts. Records cross the port as
//! `serde_json::Value` objects carrying their id in an `_id` field.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Internal store identifier: 12 bytes, written as a 24-hex-character literal.
///
/// Ids are store-assigned by a monotonically increasing allocator, so their
/// byte order doubles as insertion order. Cursors and global ids are both
/// derived from this value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId([u8; 12]);

/// Failure to parse a 24-hex-character id literal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid store id literal: {0:?}")]
pub struct ParseIdError(pub String);

impl StoreId {
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseIdError(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16).ok_or_else(|| ParseIdError(s.to_string()))?;
            let lo = (chunk[1] as char).to_digit(16).ok_or_else(|| ParseIdError(s.to_string()))?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(24);
        for b in self.0 {
            out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
            out.push(char::from_digit((b & 0xf) as u32, 16).unwrap_or('0'));
        }
        out
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.to_hex())
    }
}

impl FromStr for StoreId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for StoreId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StoreId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Half-open id range used by window queries. Both bounds are strict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdWindow {
    pub after: Option<StoreId>,
    pub before: Option<StoreId>,
}

impl IdWindow {
    pub fn contains(&self, id: StoreId) -> bool {
        if let Some(after) = self.after {
            if id <= after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if id >= before {
                return false;
            }
        }
        true
    }
}

/// Storage-level failure. Cloneable so a single failed batch query can be
/// shared with every caller waiting on that batch.
#[derive(Error, Debug, Clone)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Read-only storage port consumed by loaders and the pagination engine.
///
/// Implementations must not retry (retrying is their own concern, not the
/// core's) and must not hold a pooled connection beyond the single query
/// each method issues.
#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Fetch entities of `kind` whose id is in `ids`. Result order and
    /// completeness are unspecified; callers match rows back by `_id`.
    async fn find_by_id(&self, kind: &str, ids: &[StoreId]) -> Result<Vec<Value>, StoreError>;

    /// Fetch entities of `kind` whose `fk_field` matches any of `values`.
    async fn find_by_foreign_key(
        &self,
        kind: &str,
        fk_field: &str,
        values: &[StoreId],
    ) -> Result<Vec<Value>, StoreError>;

    /// Fetch a window of entities of `kind` inside `window`, ordered by id
    /// ascending, skipping `skip` rows and returning at most `limit` rows
    /// (all remaining rows when `limit` is `None`).
    async fn find_window(
        &self,
        kind: &str,
        window: IdWindow,
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Count entities of `kind` inside `window`.
    async fn count(&self, kind: &str, window: IdWindow) -> Result<u64, StoreError>;
}

/// Read the `_id` field out of a record returned by the port.
pub fn record_id(record: &Value) -> Result<StoreId, StoreError> {
    record
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError("record has no _id field".to_string()))
        .and_then(|s| StoreId::from_hex(s).map_err(|e| StoreError(e.to_string())))
}

/// In-process [`ReadStore`] keyed by entity kind.
///
/// Backs tests and local demos. Every port call increments a query counter so
/// batching behavior is observable from the outside.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<StoreId, Value>>>,
    queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; its id is read from the `_id` field.
    pub fn insert(&self, kind: &str, record: Value) -> Result<(), StoreError> {
        let id = record_id(&record)?;
        let mut collections = self.collections.lock().unwrap();
        collections.entry(kind.to_string()).or_default().insert(id, record);
        Ok(())
    }

    /// Number of port queries issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReadStore for MemoryStore {
    async fn find_by_id(&self, kind: &str, ids: &[StoreId]) -> Result<Vec<Value>, StoreError> {
        self.tick();
        let wanted: HashSet<StoreId> = ids.iter().copied().collect();
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(kind)
            .map(|records| {
                records
                    .iter()
                    .filter(|(id, _)| wanted.contains(id))
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_foreign_key(
        &self,
        kind: &str,
        fk_field: &str,
        values: &[StoreId],
    ) -> Result<Vec<Value>, StoreError> {
        self.tick();
        let wanted: HashSet<String> = values.iter().map(StoreId::to_hex).collect();
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(kind)
            .map(|records| {
                records
                    .values()
                    .filter(|record| {
                        record
                            .get(fk_field)
                            .and_then(Value::as_str)
                            .is_some_and(|fk| wanted.contains(fk))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_window(
        &self,
        kind: &str,
        window: IdWindow,
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, StoreError> {
        self.tick();
        let collections = self.collections.lock().unwrap();
        let rows = collections
            .get(kind)
            .map(|records| {
                records
                    .iter()
                    .filter(|(id, _)| window.contains(**id))
                    .skip(skip as usize)
                    .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn count(&self, kind: &str, window: IdWindow) -> Result<u64, StoreError> {
        self.tick();
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(kind)
            .map(|records| records.keys().filter(|id| window.contains(**id)).count() as u64)
            .unwrap_or(0))
    }
}
