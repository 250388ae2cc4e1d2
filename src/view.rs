//! Read-side view storage the projections write into.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Failure accessing a view store. Projections treat these as retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    /// `update_by_id` addressed a row that does not exist.
    #[error("view row not found")]
    NotFound,

    /// The backing store failed.
    #[error("view storage failure: {0}")]
    Storage(String),
}

/// Strongly consistent single-item view storage, keyed by domain ids.
#[async_trait]
pub trait ViewRepository<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Insert or replace a row.
    async fn save(&self, id: K, view: V) -> Result<(), ViewError>;

    /// Apply an in-place update to an existing row.
    async fn update_by_id(
        &self,
        id: &K,
        update: Box<dyn for<'r> FnOnce(&'r mut V) + Send + 'static>,
    ) -> Result<(), ViewError>;

    /// Read a row.
    async fn find(&self, id: &K) -> Result<Option<V>, ViewError>;
}

/// Volatile [`ViewRepository`] used by tests and as the default.
pub struct InMemoryViewRepository<K, V> {
    rows: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryViewRepository<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryViewRepository<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> ViewRepository<K, V> for InMemoryViewRepository<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn save(&self, id: K, view: V) -> Result<(), ViewError> {
        self.rows.write().await.insert(id, view);
        Ok(())
    }

    async fn update_by_id(
        &self,
        id: &K,
        update: Box<dyn for<'r> FnOnce(&'r mut V) + Send + 'static>,
    ) -> Result<(), ViewError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row) => {
                update(row);
                Ok(())
            }
            None => Err(ViewError::NotFound),
        }
    }

    async fn find(&self, id: &K) -> Result<Option<V>, ViewError> {
        Ok(self.rows.read().await.get(id).cloned())
    }
}
