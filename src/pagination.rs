//! Relay-style cursor pagination over the storage read port
//!
//! Cursors are base64 of the row's 24-hex store id, so cursor order is id
//! order is insertion order. The window algorithm and the page-info flags
//! reproduce the platform's pinned behavior exactly: `has_next_page` and
//! `has_previous_page` are computed from `first`/`last` against the filtered
//! total, not from whether the fetched slice came back short.

use async_graphql::{InputObject, Object, SimpleObject};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{IdWindow, ReadStore, StoreId};
use crate::{Error, Result};

/// Page information
#[derive(SimpleObject, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// Edge in a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[Object]
impl<T: async_graphql::OutputType> Edge<T> {
    async fn cursor(&self) -> &str {
        &self.cursor
    }

    async fn node(&self) -> &T {
        &self.node
    }
}

/// Connection (paginated result)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub total_count: u64,
}

#[Object]
impl<T: async_graphql::OutputType> Connection<T> {
    async fn edges(&self) -> &[Edge<T>] {
        &self.edges
    }

    async fn page_info(&self) -> &PageInfo {
        &self.page_info
    }

    async fn total_count(&self) -> u64 {
        self.total_count
    }
}

impl<T> Connection<T> {
    /// Create empty connection
    pub fn empty() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo {
                has_next_page: false,
                has_previous_page: false,
                start_cursor: None,
                end_cursor: None,
            },
            total_count: 0,
        }
    }
}

impl Connection<Value> {
    /// Serialize into the raw value shape the resolver pipeline works with.
    pub fn into_value(self) -> Value {
        serde_json::json!({
            "edges": self
                .edges
                .into_iter()
                .map(|edge| serde_json::json!({ "cursor": edge.cursor, "node": edge.node }))
                .collect::<Vec<Value>>(),
            "pageInfo": {
                "hasNextPage": self.page_info.has_next_page,
                "hasPreviousPage": self.page_info.has_previous_page,
                "startCursor": self.page_info.start_cursor,
                "endCursor": self.page_info.end_cursor,
            },
            "totalCount": self.total_count,
        })
    }
}

/// Cursor encoding/decoding
pub struct CursorCodec;

impl CursorCodec {
    /// Encode a store id as an opaque cursor.
    pub fn encode(id: StoreId) -> String {
        BASE64.encode(id.to_hex())
    }

    /// Decode a cursor back into a store id.
    pub fn decode(cursor: &str) -> Result<StoreId> {
        let bytes = BASE64
            .decode(cursor.as_bytes())
            .map_err(|e| Error::InvalidCursor(e.to_string()))?;
        let hex = String::from_utf8(bytes).map_err(|e| Error::InvalidCursor(e.to_string()))?;
        StoreId::from_hex(&hex).map_err(|e| Error::InvalidCursor(e.to_string()))
    }
}

/// Windowing arguments for connection fields
///
/// Follows the Relay Cursor Connections shape:
/// https://relay.dev/graphql/connections.htm
#[derive(InputObject, Debug, Clone, Default)]
pub struct PaginationArgs {
    /// Number of items to return from the head of the window
    pub first: Option<i32>,

    /// Cursor all returned items must come strictly after
    pub after: Option<String>,

    /// Number of items to return from the tail of the window
    pub last: Option<i32>,

    /// Cursor all returned items must come strictly before
    pub before: Option<String>,
}

impl PaginationArgs {
    /// Reject negative counts before any cursor decoding or store work.
    pub fn validate(&self) -> Result<()> {
        if self.first.is_some_and(|first| first < 0) {
            return Err(Error::MalformedPaginationArgs(
                "'first' must be non-negative".to_string(),
            ));
        }
        if self.last.is_some_and(|last| last < 0) {
            return Err(Error::MalformedPaginationArgs(
                "'last' must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    fn window(&self) -> Result<IdWindow> {
        Ok(IdWindow {
            after: self.after.as_deref().map(CursorCodec::decode).transpose()?,
            before: self.before.as_deref().map(CursorCodec::decode).transpose()?,
        })
    }
}

/// Resolve a connection field over entities of `kind`.
///
/// The cursor range filter is applied first, then the filtered total drives
/// the skip/limit computation:
/// - `first` caps the window from the head when the total exceeds it;
/// - `last` on top of `first` keeps the tail of that head window
///   (skip `first - last`, then take `last`);
/// - `last` alone takes the tail of the whole filtered range.
pub async fn paginate(
    store: &dyn ReadStore,
    kind: &str,
    args: &PaginationArgs,
) -> Result<Connection<Value>> {
    args.validate()?;
    let window = args.window()?;

    let total_count = store.count(kind, window).await?;

    let mut skip = 0u64;
    let mut limit: Option<u64> = None;
    if let Some(first) = args.first {
        if total_count > first as u64 {
            limit = Some(first as u64);
        }
    }
    if let Some(last) = args.last {
        let last = last as u64;
        match limit {
            Some(head) if head > last => {
                skip = head - last;
                limit = Some(head - skip);
            }
            None if total_count > last => {
                skip = total_count - last;
            }
            _ => {}
        }
    }

    tracing::debug!(kind, total_count, skip, ?limit, "resolving connection window");

    let rows = store.find_window(kind, window, skip, limit).await?;

    let edges = rows
        .into_iter()
        .map(|node| {
            let id = crate::store::record_id(&node).map_err(Error::from)?;
            Ok(Edge { cursor: CursorCodec::encode(id), node })
        })
        .collect::<Result<Vec<_>>>()?;

    let page_info = PageInfo {
        has_next_page: args.first.is_some_and(|first| total_count > first as u64),
        has_previous_page: args.last.is_some_and(|last| total_count > last as u64),
        start_cursor: edges.first().map(|edge| edge.cursor.clone()),
        end_cursor: edges.last().map(|edge| edge.cursor.clone()),
    };

    Ok(Connection { edges, page_info, total_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn id(n: u8) -> StoreId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        StoreId::from_bytes(bytes)
    }

    fn store_of_ten() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for n in 1..=10u8 {
            store
                .insert("quests", json!({ "_id": id(n).to_hex(), "n": n }))
                .unwrap();
        }
        store
    }

    fn ns(connection: &Connection<Value>) -> Vec<u64> {
        connection
            .edges
            .iter()
            .map(|edge| edge.node["n"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_cursor_codec_round_trip() {
        let original = id(7);
        let encoded = CursorCodec::encode(original);
        assert_eq!(CursorCodec::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_cursor_codec_rejects_garbage() {
        assert!(matches!(CursorCodec::decode("!!"), Err(Error::InvalidCursor(_))));
        let non_id = BASE64.encode("not a store id");
        assert!(matches!(CursorCodec::decode(&non_id), Err(Error::InvalidCursor(_))));
    }

    #[tokio::test]
    async fn test_first_takes_head() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(3), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(ns(&connection), vec![1, 2, 3]);
        assert!(connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
        assert_eq!(connection.total_count, 10);
    }

    #[tokio::test]
    async fn test_last_takes_tail() {
        let store = store_of_ten();
        let args = PaginationArgs { last: Some(3), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(ns(&connection), vec![8, 9, 10]);
        assert!(!connection.page_info.has_next_page);
        assert!(connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_last_within_first_window() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(5), last: Some(2), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        // Last two of the first-five window.
        assert_eq!(ns(&connection), vec![4, 5]);
        assert!(connection.page_info.has_next_page);
        assert!(connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_after_filters_strictly() {
        let store = store_of_ten();
        let args = PaginationArgs {
            first: Some(3),
            after: Some(CursorCodec::encode(id(4))),
            ..Default::default()
        };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(ns(&connection), vec![5, 6, 7]);
        assert_eq!(connection.total_count, 6);
        assert!(connection.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_between_two_cursors() {
        let store = store_of_ten();
        let args = PaginationArgs {
            after: Some(CursorCodec::encode(id(2))),
            before: Some(CursorCodec::encode(id(7))),
            ..Default::default()
        };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(ns(&connection), vec![3, 4, 5, 6]);
        assert!(!connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_first_zero_yields_empty_window() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(0), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert!(connection.edges.is_empty());
        assert!(connection.page_info.has_next_page);
        assert!(connection.page_info.start_cursor.is_none());
        assert!(connection.page_info.end_cursor.is_none());
    }

    #[tokio::test]
    async fn test_no_args_returns_everything() {
        let store = store_of_ten();
        let connection = paginate(store.as_ref(), "quests", &PaginationArgs::default())
            .await
            .unwrap();

        assert_eq!(connection.edges.len(), 10);
        assert!(!connection.page_info.has_next_page);
        assert!(!connection.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_cursors_come_from_window_ends() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(3), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(connection.page_info.start_cursor, Some(CursorCodec::encode(id(1))));
        assert_eq!(connection.page_info.end_cursor, Some(CursorCodec::encode(id(3))));
    }

    #[tokio::test]
    async fn test_negative_counts_rejected() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(-1), ..Default::default() };
        let result = paginate(store.as_ref(), "quests", &args).await;
        assert!(matches!(result, Err(Error::MalformedPaginationArgs(_))));
    }

    #[tokio::test]
    async fn test_first_larger_than_total_has_no_next_page() {
        let store = store_of_ten();
        let args = PaginationArgs { first: Some(20), ..Default::default() };
        let connection = paginate(store.as_ref(), "quests", &args).await.unwrap();

        assert_eq!(connection.edges.len(), 10);
        assert!(!connection.page_info.has_next_page);
    }
}
