//! Parameter-store collaborator.
//!
//! Map clients frequently reference a previously saved query by an opaque
//! id instead of resending the full query text and filter list. The engine
//! only ever reads from the store.

use async_trait::async_trait;

use crate::error::IndexError;

use super::bbox::Envelope;

/// A stored query resolved from an opaque reference id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredQuery {
    /// Query text
    pub q: String,

    /// Filter list
    pub filters: Vec<String>,

    /// Well-known-text geometry restricting the query, if any
    pub wkt: Option<String>,

    /// Bounding box recorded with the query, if any
    pub bbox: Option<Envelope>,
}

/// Read-only access to previously stored queries.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Resolve a reference id.
    ///
    /// Returns `Ok(None)` when the id is unknown; errors are reserved for
    /// store failures.
    async fn get(&self, id: &str) -> Result<Option<StoredQuery>, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapStore {
        entries: HashMap<String, StoredQuery>,
    }

    #[async_trait]
    impl QueryStore for MapStore {
        async fn get(&self, id: &str) -> Result<Option<StoredQuery>, IndexError> {
            Ok(self.entries.get(id).cloned())
        }
    }

    #[tokio::test]
    async fn test_lookup() {
        let mut entries = HashMap::new();
        entries.insert(
            "abc123".to_string(),
            StoredQuery {
                q: "genus:Acacia".to_string(),
                filters: vec!["state:NSW".to_string()],
                wkt: None,
                bbox: Some(Envelope::new(140.0, -38.0, 154.0, -28.0)),
            },
        );
        let store = MapStore { entries };

        let hit = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(hit.q, "genus:Acacia");
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
