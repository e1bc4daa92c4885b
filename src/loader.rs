//! Batched entity loading
//!
//! Resolvers ask for entities one id at a time; the store wants one query per
//! entity kind. [`Batcher`] bridges the two: every `load` issued before the
//! first caller reaches its yield point joins one batch, the batch is
//! deduplicated and dispatched as a single port query, and the results are
//! re-expanded to every caller in its original position.
//!
//! Batchers are per-request state. There is no cache: the same id requested
//! in two different scheduling rounds hits the store twice. Loaders here are
//! deliberately cache-disabled so a request never sees stale rows.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value as Record;
use tokio::sync::oneshot;

use crate::store::{record_id, ReadStore, StoreError, StoreId};
use crate::{Error, Result};

/// One store round-trip for a deduplicated key set.
///
/// `fetch_batch` returns only the keys it found; the batcher substitutes
/// [`absent`](BatchFetch::absent) for the rest, so a missing row is a value
/// and never an error.
#[async_trait]
pub trait BatchFetch: Send + Sync {
    type Value: Clone + Send + 'static;

    /// Label for logging, usually the entity kind.
    fn name(&self) -> &str;

    async fn fetch_batch(&self, keys: &[StoreId]) -> std::result::Result<HashMap<StoreId, Self::Value>, StoreError>;

    /// Value handed to callers whose key had no row.
    fn absent(&self) -> Self::Value;
}

struct OpenBatch<V> {
    generation: u64,
    waiters: Vec<(StoreId, oneshot::Sender<Result<V>>)>,
}

struct BatchSlot<V> {
    next_generation: u64,
    open: Option<OpenBatch<V>>,
}

/// Coalesces same-kind `load` calls issued within one scheduling round into
/// a single [`BatchFetch::fetch_batch`] call.
pub struct Batcher<F: BatchFetch> {
    fetch: F,
    slot: Mutex<BatchSlot<F::Value>>,
}

impl<F: BatchFetch> Batcher<F> {
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            slot: Mutex::new(BatchSlot { next_generation: 0, open: None }),
        }
    }

    /// Load one value. Resolves to `absent()` for keys with no row.
    ///
    /// The first caller to open a batch becomes its dispatcher: it yields
    /// once so every sibling resolver in the current round can register its
    /// key, then issues the store query and fans results back out.
    pub async fn load(&self, key: StoreId) -> Result<F::Value> {
        let (tx, rx) = oneshot::channel();
        let dispatch = {
            let mut slot = self.slot.lock().unwrap();
            match slot.open.as_mut() {
                Some(batch) => {
                    batch.waiters.push((key, tx));
                    None
                }
                None => {
                    let generation = slot.next_generation;
                    slot.next_generation += 1;
                    slot.open = Some(OpenBatch { generation, waiters: vec![(key, tx)] });
                    Some(generation)
                }
            }
        };

        if let Some(generation) = dispatch {
            // If this future is dropped before dispatch, the guard closes
            // the batch so waiters fail instead of hanging.
            let _guard = AbortGuard { batcher: self, generation };
            tokio::task::yield_now().await;
            let batch = {
                let mut slot = self.slot.lock().unwrap();
                let ours = slot.open.as_ref().is_some_and(|open| open.generation == generation);
                if ours {
                    slot.open.take()
                } else {
                    None
                }
            };
            if let Some(batch) = batch {
                self.dispatch(batch).await;
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreUnavailable("batch aborted".to_string())),
        }
    }

    /// Load many values in input order. Duplicate keys are allowed and each
    /// occurrence gets its own slot in the output; all keys share one batch.
    pub async fn load_many(&self, keys: &[StoreId]) -> Result<Vec<F::Value>> {
        try_join_all(keys.iter().map(|key| self.load(*key))).await
    }

    async fn dispatch(&self, batch: OpenBatch<F::Value>) {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(batch.waiters.len());
        for (key, _) in &batch.waiters {
            if seen.insert(*key) {
                keys.push(*key);
            }
        }

        tracing::debug!(
            kind = self.fetch.name(),
            requested = batch.waiters.len(),
            unique = keys.len(),
            "dispatching loader batch"
        );

        match self.fetch.fetch_batch(&keys).await {
            Ok(found) => {
                for (key, tx) in batch.waiters {
                    let value = found.get(&key).cloned().unwrap_or_else(|| self.fetch.absent());
                    let _ = tx.send(Ok(value));
                }
            }
            Err(error) => {
                // One failed query fails every caller in this batch alike.
                for (_, tx) in batch.waiters {
                    let _ = tx.send(Err(Error::StoreUnavailable(error.0.clone())));
                }
            }
        }
    }
}

struct AbortGuard<'a, F: BatchFetch> {
    batcher: &'a Batcher<F>,
    generation: u64,
}

impl<F: BatchFetch> Drop for AbortGuard<'_, F> {
    fn drop(&mut self) {
        let mut slot = self.batcher.slot.lock().unwrap();
        if slot.open.as_ref().is_some_and(|open| open.generation == self.generation) {
            slot.open = None;
        }
    }
}

/// Primary-key lookups for one entity kind.
pub struct EntityFetch {
    kind: String,
    store: Arc<dyn ReadStore>,
}

#[async_trait]
impl BatchFetch for EntityFetch {
    type Value = Option<Record>;

    fn name(&self) -> &str {
        &self.kind
    }

    async fn fetch_batch(&self, keys: &[StoreId]) -> std::result::Result<HashMap<StoreId, Self::Value>, StoreError> {
        let rows = self.store.find_by_id(&self.kind, keys).await?;
        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id = record_id(&row)?;
            found.insert(id, Some(row));
        }
        Ok(found)
    }

    fn absent(&self) -> Self::Value {
        None
    }
}

/// Foreign-key lookups: all rows of `kind` pointing at a parent id.
pub struct RelationFetch {
    kind: String,
    fk_field: String,
    store: Arc<dyn ReadStore>,
}

#[async_trait]
impl BatchFetch for RelationFetch {
    type Value = Vec<Record>;

    fn name(&self) -> &str {
        &self.kind
    }

    async fn fetch_batch(&self, keys: &[StoreId]) -> std::result::Result<HashMap<StoreId, Self::Value>, StoreError> {
        let rows = self.store.find_by_foreign_key(&self.kind, &self.fk_field, keys).await?;
        let mut grouped: HashMap<StoreId, Vec<Record>> = HashMap::new();
        for row in rows {
            let fk = row
                .get(&self.fk_field)
                .and_then(Record::as_str)
                .ok_or_else(|| StoreError(format!("row missing foreign key {:?}", self.fk_field)))?;
            let fk = StoreId::from_hex(fk).map_err(|e| StoreError(e.to_string()))?;
            grouped.entry(fk).or_default().push(row);
        }
        Ok(grouped)
    }

    /// Parents with no matching rows get an empty list, never null.
    fn absent(&self) -> Self::Value {
        Vec::new()
    }
}

/// Loader for entities of one kind, keyed by primary id.
pub type EntityLoader = Batcher<EntityFetch>;

/// Loader for relationship rows of one kind, keyed by a foreign-key field.
pub type RelationLoader = Batcher<RelationFetch>;

impl Batcher<EntityFetch> {
    pub fn entities(kind: impl Into<String>, store: Arc<dyn ReadStore>) -> Self {
        Self::new(EntityFetch { kind: kind.into(), store })
    }
}

impl Batcher<RelationFetch> {
    pub fn relations(
        kind: impl Into<String>,
        fk_field: impl Into<String>,
        store: Arc<dyn ReadStore>,
    ) -> Self {
        Self::new(RelationFetch { kind: kind.into(), fk_field: fk_field.into(), store })
    }
}
