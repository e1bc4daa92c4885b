//! Field-resolution pipeline
//!
//! Every annotated field gets its resolver wrapped once, at schema-build
//! time, by [`compose`]: an explicit middleware chain instead of runtime
//! introspection. Whatever subset of annotations a field carries, the
//! effective order is fixed: the auth gate runs first, then data acquisition
//! (loader or pagination), then the base resolver's own shaping, and the
//! result flows back out through locale projection and id encoding.
//!
//! Resolvers are plain `Arc` closures over a raw value shape, so the chain
//! composes associatively and a field with only one annotation pays for
//! nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::auth::Tier;
use crate::context::RequestContext;
use crate::global_id;
use crate::locale::project_json;
use crate::pagination::{paginate, PaginationArgs};
use crate::store::StoreId;
use crate::{Error, Result};

/// Input flowing into a field resolver: the request context, the parent
/// value the field hangs off, and any windowing arguments.
pub struct FieldInput {
    pub ctx: Arc<RequestContext>,
    pub parent: Value,
    pub page: Option<PaginationArgs>,
}

/// A ready-to-execute field resolver.
pub type Resolver = Arc<dyn Fn(FieldInput) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// One annotation on a field, in descriptor form.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Require an authorization tier before anything else runs.
    Gate(Tier),
    /// Resolve a connection over entities of `kind`.
    Paginate { kind: String },
    /// Load the entity (or entities) referenced by an id field on the parent.
    Load { kind: String, source_field: String },
    /// Load all rows of `kind` whose `foreign_key` points at the parent.
    LoadRelated { kind: String, foreign_key: String },
    /// Project multilingual content to the caller's primary language.
    Localize,
    /// Replace internal ids in the result with external global ids.
    EncodeId { type_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Gate,
    Data,
    Localize,
    Encode,
}

impl Transform {
    fn stage(&self) -> Stage {
        match self {
            Transform::Gate(_) => Stage::Gate,
            Transform::Paginate { .. }
            | Transform::Load { .. }
            | Transform::LoadRelated { .. } => Stage::Data,
            Transform::Localize => Stage::Localize,
            Transform::EncodeId { .. } => Stage::Encode,
        }
    }
}

/// Base resolver that returns its input unchanged. Fields whose whole job
/// is done by their transforms terminate here.
pub fn identity() -> Resolver {
    Arc::new(|input: FieldInput| Box::pin(async move { Ok(input.parent) }))
}

/// Base resolver reading one field off the parent record.
pub fn field_of(name: impl Into<String>) -> Resolver {
    let name = name.into();
    Arc::new(move |input: FieldInput| {
        let name = name.clone();
        Box::pin(async move { Ok(input.parent.get(&name).cloned().unwrap_or(Value::Null)) })
    })
}

/// Compose a field's transforms around its base resolver.
///
/// Descriptors may arrive in any order; they are staged before wrapping so
/// composition is deterministic. Gate and data transforms act on the way in
/// (gate outermost), locale projection and id encoding act on the way out
/// (projection before encoding).
pub fn compose(transforms: &[Transform], base: Resolver) -> Resolver {
    let mut ordered = transforms.to_vec();
    ordered.sort_by_key(Transform::stage);
    let (inbound, outbound): (Vec<_>, Vec<_>) =
        ordered.into_iter().partition(|transform| transform.stage() <= Stage::Data);

    let mut resolver = base;
    // Localize wraps closer to the base than EncodeId, so it transforms the
    // result first.
    for transform in outbound {
        resolver = wrap(transform, resolver);
    }
    for transform in inbound.into_iter().rev() {
        resolver = wrap(transform, resolver);
    }
    resolver
}

fn wrap(transform: Transform, next: Resolver) -> Resolver {
    match transform {
        Transform::Gate(tier) => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            Box::pin(async move {
                tier.check(input.ctx.access())?;
                next(input).await
            })
        }),
        Transform::Paginate { kind } => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            let kind = kind.clone();
            Box::pin(async move {
                let args = input.page.clone().unwrap_or_default();
                let connection = paginate(input.ctx.store(), &kind, &args).await?;
                next(FieldInput { parent: connection.into_value(), ..input }).await
            })
        }),
        Transform::Load { kind, source_field } => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            let kind = kind.clone();
            let source_field = source_field.clone();
            Box::pin(async move {
                let loaded = match input.parent.get(&source_field) {
                    None | Some(Value::Null) => Value::Null,
                    Some(Value::String(reference)) => {
                        let id = parse_id(reference)?;
                        input
                            .ctx
                            .entity_loader(&kind)
                            .load(id)
                            .await?
                            .unwrap_or(Value::Null)
                    }
                    Some(Value::Array(references)) => {
                        let ids = references
                            .iter()
                            .map(|reference| {
                                reference
                                    .as_str()
                                    .ok_or_else(|| {
                                        Error::MalformedRecord(
                                            "id reference is not a string".to_string(),
                                        )
                                    })
                                    .and_then(parse_id)
                            })
                            .collect::<Result<Vec<_>>>()?;
                        let rows = input.ctx.entity_loader(&kind).load_many(&ids).await?;
                        Value::Array(rows.into_iter().map(|row| row.unwrap_or(Value::Null)).collect())
                    }
                    Some(_) => {
                        return Err(Error::MalformedRecord(format!(
                            "field {:?} is not an id reference",
                            source_field
                        )))
                    }
                };
                next(FieldInput { parent: loaded, ..input }).await
            })
        }),
        Transform::LoadRelated { kind, foreign_key } => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            let kind = kind.clone();
            let foreign_key = foreign_key.clone();
            Box::pin(async move {
                let parent_id = input
                    .parent
                    .get("_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::MalformedRecord("parent has no _id".to_string()))
                    .and_then(parse_id)?;
                let rows = input
                    .ctx
                    .relation_loader(&kind, &foreign_key)
                    .load(parent_id)
                    .await?;
                next(FieldInput { parent: Value::Array(rows), ..input }).await
            })
        }),
        Transform::Localize => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            Box::pin(async move {
                let language = input.ctx.access().primary_language();
                let value = next(input).await?;
                Ok(project_json(&value, language))
            })
        }),
        Transform::EncodeId { type_name } => Arc::new(move |input: FieldInput| {
            let next = next.clone();
            let type_name = type_name.clone();
            Box::pin(async move {
                let value = next(input).await?;
                encode_ids(value, &type_name)
            })
        }),
    }
}

fn parse_id(reference: &str) -> Result<StoreId> {
    StoreId::from_hex(reference).map_err(|e| Error::MalformedRecord(e.to_string()))
}

/// Rewrite internal ids in a resolved value as external global ids.
///
/// Scalars encode directly; records trade their `_id` for an external `id`;
/// connections encode each edge's node, leaving cursors alone.
fn encode_ids(value: Value, type_name: &str) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(reference) => {
            let id = parse_id(&reference)?;
            Ok(Value::String(global_id::encode(type_name, id)))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| encode_ids(item, type_name))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(mut map) => {
            if map.contains_key("edges") {
                if let Some(Value::Array(edges)) = map.get_mut("edges") {
                    for edge in edges.iter_mut() {
                        if let Some(node) = edge.get_mut("node") {
                            let encoded = encode_ids(node.take(), type_name)?;
                            *node = encoded;
                        }
                    }
                }
                return Ok(Value::Object(map));
            }
            match map.remove("_id") {
                Some(Value::String(reference)) => {
                    let id = parse_id(&reference)?;
                    map.insert(
                        "id".to_string(),
                        Value::String(global_id::encode(type_name, id)),
                    );
                    Ok(Value::Object(map))
                }
                _ => Err(Error::MalformedRecord("record has no _id field".to_string())),
            }
        }
        other => Err(Error::MalformedRecord(format!("cannot encode {} as an id", other))),
    }
}

struct FieldPlan {
    transforms: Vec<Transform>,
    base: Resolver,
}

/// Build-time registry of field annotations.
///
/// Wrapping happens exactly once, in [`build`](PipelineBuilder::build); the
/// resulting [`ResolverTree`] hands out ready-made resolvers per field.
#[derive(Default)]
pub struct PipelineBuilder {
    fields: HashMap<String, FieldPlan>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate a field whose base resolver is the identity.
    pub fn field(self, name: impl Into<String>, transforms: Vec<Transform>) -> Self {
        self.field_with(name, transforms, identity())
    }

    /// Annotate a field with an explicit base resolver.
    pub fn field_with(
        mut self,
        name: impl Into<String>,
        transforms: Vec<Transform>,
        base: Resolver,
    ) -> Self {
        self.fields.insert(name.into(), FieldPlan { transforms, base });
        self
    }

    pub fn build(self) -> ResolverTree {
        let fields = self
            .fields
            .into_iter()
            .map(|(name, plan)| (name, compose(&plan.transforms, plan.base)))
            .collect();
        ResolverTree { fields }
    }
}

/// The composed resolvers for one schema build.
pub struct ResolverTree {
    fields: HashMap<String, Resolver>,
}

impl ResolverTree {
    pub fn resolver(&self, field: &str) -> Option<&Resolver> {
        self.fields.get(field)
    }

    /// Resolve one field. Failures are field-local: the caller decides what
    /// else in the query still resolves.
    pub async fn resolve(&self, field: &str, input: FieldInput) -> Result<Value> {
        let resolver = self
            .fields
            .get(field)
            .ok_or_else(|| Error::UnknownField(field.to_string()))?;
        resolver(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessContext, Caller, Permission, Session};
    use crate::locale::Language;
    use crate::store::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    fn id(n: u8) -> StoreId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        StoreId::from_bytes(bytes)
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (n, ru, en) in [(1u8, "Диего", "Diego"), (2, "Горн", "Gorn"), (3, "Мильтен", "Milten")]
        {
            store
                .insert(
                    "persons",
                    json!({ "_id": id(n).to_hex(), "name": { "ru": ru, "en": en } }),
                )
                .unwrap();
        }
        store
            .insert(
                "relations",
                json!({ "_id": id(10).to_hex(), "person": id(1).to_hex(), "kind": "friend" }),
            )
            .unwrap();
        store
    }

    fn ctx_with(store: Arc<MemoryStore>, access: AccessContext) -> Arc<RequestContext> {
        RequestContext::new(store, access)
    }

    fn english_ctx(store: Arc<MemoryStore>) -> Arc<RequestContext> {
        ctx_with(store, AccessContext::new(vec![Language::En], Caller::Anonymous))
    }

    fn editor_access() -> AccessContext {
        AccessContext::new(
            vec![Language::En],
            Caller::User(Session {
                user_id: Uuid::new_v4(),
                permissions: [Permission::Editor].into_iter().collect(),
            }),
        )
    }

    fn input(ctx: &Arc<RequestContext>, parent: Value) -> FieldInput {
        FieldInput { ctx: ctx.clone(), parent, page: None }
    }

    #[tokio::test]
    async fn test_gate_short_circuits_before_any_store_work() {
        let store = seeded_store();
        let resolver = compose(
            &[
                Transform::Localize,
                Transform::Gate(Tier::Admin),
                Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() },
            ],
            identity(),
        );

        let ctx = ctx_with(store.clone(), editor_access());
        let result = resolver(input(&ctx, json!({ "person": id(1).to_hex() }))).await;

        assert!(matches!(result, Err(Error::Forbidden)));
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_load_transform_fetches_entity() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() }],
            identity(),
        );

        let value = resolver(input(&ctx, json!({ "person": id(2).to_hex() }))).await.unwrap();
        assert_eq!(value["name"]["en"], "Gorn");
    }

    #[tokio::test]
    async fn test_load_transform_preserves_list_positions() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::Load { kind: "persons".to_string(), source_field: "members".to_string() }],
            identity(),
        );

        let parent = json!({ "members": [id(1).to_hex(), id(99).to_hex(), id(3).to_hex()] });
        let value = resolver(input(&ctx, parent)).await.unwrap();
        let members = value.as_array().unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0]["name"]["en"], "Diego");
        assert!(members[1].is_null());
        assert_eq!(members[2]["name"]["en"], "Milten");
    }

    #[tokio::test]
    async fn test_load_transform_null_reference_resolves_null() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() }],
            identity(),
        );

        let value = resolver(input(&ctx, json!({ "person": null }))).await.unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_load_related_returns_rows_or_empty_list() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::LoadRelated {
                kind: "relations".to_string(),
                foreign_key: "person".to_string(),
            }],
            identity(),
        );

        let with_rows =
            resolver(input(&ctx, json!({ "_id": id(1).to_hex() }))).await.unwrap();
        assert_eq!(with_rows.as_array().unwrap().len(), 1);

        let without_rows =
            resolver(input(&ctx, json!({ "_id": id(2).to_hex() }))).await.unwrap();
        assert_eq!(without_rows, json!([]));
    }

    #[tokio::test]
    async fn test_localize_projects_base_output() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(&[Transform::Localize], field_of("name"));

        let parent = json!({ "name": { "ru": "Лестер", "en": "Lester" } });
        let value = resolver(input(&ctx, parent)).await.unwrap();
        assert_eq!(value, json!("Lester"));
    }

    #[tokio::test]
    async fn test_localize_missing_language_is_null() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(&[Transform::Localize], field_of("name"));

        let value = resolver(input(&ctx, json!({ "name": { "ru": "Кор Ангар" } }))).await.unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_localize_composes_with_load() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[
                Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() },
                Transform::Localize,
            ],
            identity(),
        );

        // The loaded record survives projection: only its multilingual
        // fields collapse, the rest stays intact.
        let value = resolver(input(&ctx, json!({ "person": id(1).to_hex() }))).await.unwrap();
        assert_eq!(value["name"], json!("Diego"));
        assert_eq!(value["_id"], json!(id(1).to_hex()));
    }

    #[tokio::test]
    async fn test_localize_composes_with_paginate() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::Paginate { kind: "persons".to_string() }, Transform::Localize],
            identity(),
        );

        let value = resolver(FieldInput {
            ctx: ctx.clone(),
            parent: Value::Null,
            page: Some(PaginationArgs { first: Some(2), ..Default::default() }),
        })
        .await
        .unwrap();

        let edges = value["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0]["node"]["name"], json!("Diego"));
        assert_eq!(edges[1]["node"]["name"], json!("Gorn"));
        assert!(edges[0]["cursor"].is_string());
        assert_eq!(value["pageInfo"]["hasNextPage"], json!(true));
    }

    #[tokio::test]
    async fn test_encode_id_rewrites_record_ids() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[
                Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() },
                Transform::EncodeId { type_name: "Person".to_string() },
            ],
            identity(),
        );

        let value = resolver(input(&ctx, json!({ "person": id(1).to_hex() }))).await.unwrap();
        assert!(value.get("_id").is_none());
        let decoded = global_id::decode(value["id"].as_str().unwrap()).unwrap();
        assert_eq!(decoded.type_name, "Person");
        assert_eq!(decoded.id, id(1));
    }

    #[tokio::test]
    async fn test_encode_id_on_scalar_reference() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[Transform::EncodeId { type_name: "Person".to_string() }],
            field_of("person"),
        );

        let value = resolver(input(&ctx, json!({ "person": id(2).to_hex() }))).await.unwrap();
        assert_eq!(global_id::decode(value.as_str().unwrap()).unwrap().id, id(2));
    }

    #[tokio::test]
    async fn test_malformed_records_are_not_global_id_errors() {
        let store = seeded_store();
        let ctx = english_ctx(store);

        // A record missing its `_id` is a storage-shape problem, distinct
        // from a caller handing in a bad external id.
        let encode = compose(
            &[Transform::EncodeId { type_name: "Person".to_string() }],
            identity(),
        );
        let result = encode(input(&ctx, json!({ "name": "stray" }))).await;
        assert!(matches!(result, Err(Error::MalformedRecord(_))));

        // Same for a reference field that is not a string.
        let load = compose(
            &[Transform::Load { kind: "persons".to_string(), source_field: "person".to_string() }],
            identity(),
        );
        let result = load(input(&ctx, json!({ "person": 7 }))).await;
        assert!(matches!(result, Err(Error::MalformedRecord(_))));
    }

    #[tokio::test]
    async fn test_paginate_transform_builds_connection() {
        let store = seeded_store();
        let ctx = english_ctx(store);
        let resolver = compose(
            &[
                Transform::Paginate { kind: "persons".to_string() },
                Transform::EncodeId { type_name: "Person".to_string() },
            ],
            identity(),
        );

        let value = resolver(FieldInput {
            ctx: ctx.clone(),
            parent: Value::Null,
            page: Some(PaginationArgs { first: Some(2), ..Default::default() }),
        })
        .await
        .unwrap();

        let edges = value["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(value["pageInfo"]["hasNextPage"], json!(true));
        assert_eq!(value["totalCount"], json!(3));
        // Nodes carry external ids, cursors stay internal to pagination.
        assert!(edges[0]["node"]["id"].is_string());
        assert!(edges[0]["node"].get("_id").is_none());
        assert!(edges[0]["cursor"].is_string());
    }

    #[tokio::test]
    async fn test_transform_order_is_independent_of_registration_order() {
        let store = seeded_store();
        let scrambled = [
            Transform::EncodeId { type_name: "Person".to_string() },
            Transform::Gate(Tier::Admin),
        ];
        let resolver = compose(&scrambled, field_of("person"));

        // The gate must win over the encoding error the bad parent would cause.
        let ctx = ctx_with(store.clone(), editor_access());
        let result = resolver(input(&ctx, json!({ "person": "not-an-id" }))).await;
        assert!(matches!(result, Err(Error::Forbidden)));
    }

    #[tokio::test]
    async fn test_resolver_tree_builds_once_and_serves_fields() {
        let store = seeded_store();
        let tree = PipelineBuilder::new()
            .field_with("person_name", vec![Transform::Localize], field_of("name"))
            .field(
                "persons",
                vec![
                    Transform::Gate(Tier::Public),
                    Transform::Paginate { kind: "persons".to_string() },
                ],
            )
            .build();

        let ctx = english_ctx(store);
        let parent = json!({ "name": { "en": "Xardas", "ru": "Ксардас" } });
        let name = tree
            .resolve("person_name", input(&ctx, parent))
            .await
            .unwrap();
        assert_eq!(name, json!("Xardas"));

        let missing = tree.resolve("nope", input(&ctx, Value::Null)).await;
        assert!(matches!(missing, Err(Error::UnknownField(_))));
    }

    #[tokio::test]
    async fn test_sibling_fields_share_one_loader_batch() {
        let store = seeded_store();
        let ctx = english_ctx(store.clone());
        let load = |field: &str| {
            compose(
                &[Transform::Load {
                    kind: "persons".to_string(),
                    source_field: field.to_string(),
                }],
                identity(),
            )
        };
        let left = load("a");
        let right = load("b");

        let parent = json!({ "a": id(1).to_hex(), "b": id(2).to_hex() });
        let (a, b) = tokio::join!(
            left(input(&ctx, parent.clone())),
            right(input(&ctx, parent))
        );

        assert_eq!(a.unwrap()["name"]["en"], "Diego");
        assert_eq!(b.unwrap()["name"]["en"], "Gorn");
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_gate_failure_leaves_sibling_fields_alone() {
        let store = seeded_store();
        let tree = PipelineBuilder::new()
            .field_with(
                "secret",
                vec![Transform::Gate(Tier::Admin)],
                field_of("secret"),
            )
            .field_with("name", vec![Transform::Localize], field_of("name"))
            .build();

        let ctx = english_ctx(store);
        let parent = json!({ "secret": "x", "name": { "en": "Lares" } });

        let secret = tree.resolve("secret", input(&ctx, parent.clone())).await;
        assert!(matches!(secret, Err(Error::Unauthenticated)));

        let name = tree.resolve("name", input(&ctx, parent)).await.unwrap();
        assert_eq!(name, json!("Lares"));
    }
}
