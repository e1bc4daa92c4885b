//! Authorization tiers and GraphQL request-context extraction
//!
//! Provides helpers for:
//! - The four-tier authorization gate (public / authenticated / editor / admin)
//! - Extracting the bearer token and accepted languages from HTTP headers
//! - Building the per-request [`AccessContext`] and injecting it into a
//!   GraphQL request via a standard Axum handler

use std::collections::HashSet;

use async_graphql::{Context, Request, Response, Schema};
use axum::{extract::Extension, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::locale::Language;
use crate::session::{SessionDecoder, SessionError};
use crate::{Error, Result};

/// Capability tag carried by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Editor,
    Admin,
}

/// Required authorization level for a field, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Public,
    Authenticated,
    Editor,
    Admin,
}

/// A decoded, non-expired session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub permissions: HashSet<Permission>,
}

impl Session {
    fn satisfies(&self, tier: Tier) -> bool {
        match tier {
            Tier::Public | Tier::Authenticated => true,
            Tier::Editor => {
                self.permissions.contains(&Permission::Editor)
                    || self.permissions.contains(&Permission::Admin)
            }
            Tier::Admin => self.permissions.contains(&Permission::Admin),
        }
    }
}

/// Who is asking. `Expired` is kept distinct from `Anonymous` so gated
/// fields can tell "log in" apart from "log in again".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Expired,
    User(Session),
}

/// Immutable per-request access state: the caller and their accepted
/// languages in preference order. Built once at request entry, passed by
/// reference through the resolver tree, discarded with the request.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub languages: Vec<Language>,
    pub caller: Caller,
}

impl AccessContext {
    pub fn anonymous() -> Self {
        Self { languages: Vec::new(), caller: Caller::Anonymous }
    }

    pub fn new(languages: Vec<Language>, caller: Caller) -> Self {
        Self { languages, caller }
    }

    /// Primary display language; the platform default is `ru`.
    pub fn primary_language(&self) -> Language {
        self.languages.first().copied().unwrap_or(Language::Ru)
    }
}

impl Tier {
    /// Gate check. Runs before any other transform attached to a field, so
    /// rejected callers never reach loaders or projection work.
    pub fn check(&self, access: &AccessContext) -> Result<()> {
        if *self == Tier::Public {
            return Ok(());
        }
        match &access.caller {
            Caller::Anonymous => {
                tracing::debug!(tier = ?self, "rejecting anonymous caller");
                Err(Error::Unauthenticated)
            }
            Caller::Expired => Err(Error::ExpiredSession),
            Caller::User(session) => {
                if session.satisfies(*self) {
                    Ok(())
                } else {
                    tracing::debug!(tier = ?self, user = %session.user_id, "permission denied");
                    Err(Error::Forbidden)
                }
            }
        }
    }
}

/// Extract the bearer token from the Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Parse Accept-Language into an ordered, deduplicated language list.
/// Unsupported tags are skipped; quality weights are ignored beyond the
/// order the client already sent.
pub fn extract_languages(headers: &HeaderMap) -> Vec<Language> {
    let mut languages = Vec::new();
    if let Some(value) = headers.get("Accept-Language").and_then(|value| value.to_str().ok()) {
        for part in value.split(',') {
            let tag = part.split(';').next().unwrap_or("").trim();
            if let Ok(language) = tag.parse::<Language>() {
                if !languages.contains(&language) {
                    languages.push(language);
                }
            }
        }
    }
    languages
}

/// Build the per-request access context from headers and the session port.
pub fn access_from_headers(headers: &HeaderMap, decoder: &dyn SessionDecoder) -> AccessContext {
    let languages = extract_languages(headers);
    let caller = match extract_bearer(headers) {
        None => Caller::Anonymous,
        Some(token) => match decoder.decode(token) {
            Ok(session) => Caller::User(session),
            Err(SessionError::Expired) => Caller::Expired,
            Err(SessionError::Invalid) => Caller::Expired,
        },
    };
    AccessContext::new(languages, caller)
}

/// Standard GraphQL handler with access-context injection
///
/// Decodes the session and accepted languages from headers and injects one
/// [`AccessContext`] into the request before execution.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::post};
/// use codex_graphql_helpers::auth::graphql_handler;
/// # use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
/// # struct Query;
/// # #[Object]
/// # impl Query {
/// #     async fn ping(&self) -> bool { true }
/// # }
///
/// # fn example(schema: Schema<Query, EmptyMutation, EmptySubscription>) {
/// let app: Router = Router::new()
///     .route("/graphql", post(graphql_handler::<Query, EmptyMutation, EmptySubscription>));
/// # }
/// ```
pub async fn graphql_handler<Query, Mutation, Subscription>(
    Extension(schema): Extension<Schema<Query, Mutation, Subscription>>,
    Extension(decoder): Extension<std::sync::Arc<dyn SessionDecoder>>,
    headers: HeaderMap,
    req: Json<Request>,
) -> Json<Response>
where
    Query: async_graphql::ObjectType + 'static,
    Mutation: async_graphql::ObjectType + 'static,
    Subscription: async_graphql::SubscriptionType + 'static,
{
    let access = access_from_headers(&headers, decoder.as_ref());
    let request = req.0.data(access);
    let response = schema.execute(request).await;
    Json(response)
}

/// Get the access context from a GraphQL resolver context.
///
/// Fields resolved outside [`graphql_handler`] fall back to an anonymous
/// context rather than erroring.
pub fn get_access_context(ctx: &Context<'_>) -> AccessContext {
    ctx.data_opt::<AccessContext>().cloned().unwrap_or_else(AccessContext::anonymous)
}
