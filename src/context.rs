//! Per-request resolution context
//!
//! One [`RequestContext`] is built at request entry and shared by `Arc`
//! across the whole resolver tree. It owns the request's loaders, created
//! lazily per entity kind, so coalescing happens within a request and never
//! across requests. Two concurrent requests cannot observe each other's
//! in-flight batches because they never share a context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::auth::AccessContext;
use crate::loader::{EntityLoader, RelationLoader};
use crate::store::ReadStore;

pub struct RequestContext {
    access: AccessContext,
    store: Arc<dyn ReadStore>,
    entity_loaders: Mutex<HashMap<String, Arc<EntityLoader>>>,
    relation_loaders: Mutex<HashMap<(String, String), Arc<RelationLoader>>>,
}

impl RequestContext {
    pub fn new(store: Arc<dyn ReadStore>, access: AccessContext) -> Arc<Self> {
        Arc::new(Self {
            access,
            store,
            entity_loaders: Mutex::new(HashMap::new()),
            relation_loaders: Mutex::new(HashMap::new()),
        })
    }

    pub fn access(&self) -> &AccessContext {
        &self.access
    }

    pub fn store(&self) -> &dyn ReadStore {
        self.store.as_ref()
    }

    /// Loader for entities of `kind`, created on first use.
    pub fn entity_loader(&self, kind: &str) -> Arc<EntityLoader> {
        let mut loaders = self.entity_loaders.lock().unwrap();
        loaders
            .entry(kind.to_string())
            .or_insert_with(|| Arc::new(EntityLoader::entities(kind, self.store.clone())))
            .clone()
    }

    /// Loader for rows of `kind` grouped by `fk_field`, created on first use.
    pub fn relation_loader(&self, kind: &str, fk_field: &str) -> Arc<RelationLoader> {
        let mut loaders = self.relation_loaders.lock().unwrap();
        loaders
            .entry((kind.to_string(), fk_field.to_string()))
            .or_insert_with(|| {
                Arc::new(RelationLoader::relations(kind, fk_field, self.store.clone()))
            })
            .clone()
    }
}
