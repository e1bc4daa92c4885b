//! # codex-graphql-helpers
//!
//! Field-resolution core for Codex platform content services.
//!
//! ## Features
//!
//! - **Global IDs** - reversible type-tagged external identifiers
//! - **Locale Projection** - multilingual content reduced to the caller's language
//! - **Batched Loaders** - per-request batch loading for N+1 prevention
//! - **Cursor Pagination** - Relay-style connections over the storage port
//! - **Auth Gate** - tiered field authorization, checked before anything else
//! - **Pipeline** - build-time middleware composition of all of the above
//!
//! ## Usage
//!
//! ```rust
//! use codex_graphql_helpers::pipeline::{PipelineBuilder, Transform};
//! use codex_graphql_helpers::auth::Tier;
//!
//! let tree = PipelineBuilder::new()
//!     .field("persons", vec![
//!         Transform::Gate(Tier::Public),
//!         Transform::Paginate { kind: "persons".into() },
//!         Transform::EncodeId { type_name: "Person".into() },
//!     ])
//!     .build();
//! ```

pub mod auth;
pub mod context;
pub mod global_id;
pub mod loader;
pub mod locale;
pub mod pagination;
pub mod pipeline;
pub mod session;
pub mod store;

pub use auth::{AccessContext, Caller, Permission, Session, Tier};
pub use context::RequestContext;
pub use global_id::GlobalId;
pub use loader::{BatchFetch, Batcher, EntityLoader, RelationLoader};
pub use locale::{Language, MultilingualValue};
pub use pagination::{paginate, Connection, CursorCodec, Edge, PageInfo, PaginationArgs};
pub use pipeline::{PipelineBuilder, Resolver, ResolverTree, Transform};
pub use session::{JwtSessionDecoder, SessionDecoder, SessionError};
pub use store::{IdWindow, MemoryStore, ReadStore, StoreError, StoreId};

use thiserror::Error as ThisError;

/// Field-resolution errors
///
/// All of these are field-local: one failing field never aborts the rest of
/// the query. A loader miss is not an error at all; it resolves to an absent
/// value.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("invalid global id: {0}")]
    InvalidGlobalId(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("invalid pagination arguments: {0}")]
    MalformedPaginationArgs(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("session expired")]
    ExpiredSession,

    #[error("permission denied")]
    Forbidden,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown field: {0}")]
    UnknownField(String),
}

impl From<store::StoreError> for Error {
    fn from(error: store::StoreError) -> Self {
        Error::StoreUnavailable(error.0)
    }
}

/// Result type for field-resolution operations
pub type Result<T> = std::result::Result<T, Error>;
