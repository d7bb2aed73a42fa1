//! Operation history: paginated listing, lookup and deletion.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pixcredit_core::{
    AssetRef, OperationCatalog, OperationId, OperationKind, OperationRecord, UserId,
};
use pixcredit_store::{Store, StoreError};

use crate::provider::TransformProvider;

/// Page size when the client does not ask for one.
pub const DEFAULT_PER_PAGE: usize = 10;

/// Largest page a client may request.
pub const MAX_PER_PAGE: usize = 100;

/// Errors returned by the history view.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// No such operation for this user.
    #[error("operation not found")]
    NotFound,

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A normalized page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: usize,
    /// Items per page.
    pub per_page: usize,
}

impl PageRequest {
    /// Normalize client input: pages start at 1, sizes are clamped to
    /// `1..=MAX_PER_PAGE`.
    #[must_use]
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        let page = page
            .and_then(|p| usize::try_from(p).ok())
            .unwrap_or(1)
            .max(1);
        let per_page = per_page.map_or(DEFAULT_PER_PAGE, |n| {
            usize::try_from(n).unwrap_or(1).clamp(1, MAX_PER_PAGE)
        });
        Self { page, per_page }
    }

    fn offset(self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// An operation as shown to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationItem {
    /// Operation ID.
    pub id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Cost under the current catalog.
    pub credit_cost: i64,
    /// The uploaded source image.
    pub source_asset: AssetRef,
    /// The transformed image.
    pub result_asset: AssetRef,
    /// Operation parameters.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the operation ran.
    pub created_at: DateTime<Utc>,
}

/// One page of a user's operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationPage {
    /// Items, newest first.
    pub items: Vec<OperationItem>,
    /// Total operations for the user.
    pub total: usize,
    /// Page size used.
    pub per_page: usize,
    /// Page returned.
    pub current_page: usize,
    /// Last non-empty page (1 when there are no items).
    pub last_page: usize,
    /// Whether pages follow this one.
    pub has_more: bool,
}

/// Read view over operation records, plus ownership-checked deletion.
pub struct OperationHistory {
    store: Arc<dyn Store>,
    catalog: OperationCatalog,
    provider: Option<Arc<dyn TransformProvider>>,
}

impl OperationHistory {
    /// Create a history view. `provider` is used for asset cleanup on delete.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        catalog: OperationCatalog,
        provider: Option<Arc<dyn TransformProvider>>,
    ) -> Self {
        Self {
            store,
            catalog,
            provider,
        }
    }

    fn item(&self, record: OperationRecord) -> OperationItem {
        OperationItem {
            id: record.id,
            kind: record.kind,
            credit_cost: self.catalog.cost(record.kind),
            source_asset: record.source_asset,
            result_asset: record.result_asset,
            metadata: record.metadata,
            created_at: record.created_at,
        }
    }

    fn owned(&self, user_id: UserId, id: &OperationId) -> Result<OperationRecord, HistoryError> {
        self.store
            .get_operation(id)?
            .filter(|record| record.user_id == user_id)
            .ok_or(HistoryError::NotFound)
    }

    /// A page of the user's operations, newest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn list_for_user(
        &self,
        user_id: UserId,
        request: PageRequest,
    ) -> Result<OperationPage, HistoryError> {
        let total = self.store.count_operations_by_user(&user_id)?;
        let records =
            self.store
                .list_operations_by_user(&user_id, request.per_page, request.offset())?;

        let last_page = total.div_ceil(request.per_page).max(1);

        Ok(OperationPage {
            items: records.into_iter().map(|r| self.item(r)).collect(),
            total,
            per_page: request.per_page,
            current_page: request.page,
            last_page,
            has_more: request.page < last_page,
        })
    }

    /// One of the user's operations.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist or belongs to someone else.
    pub fn get(&self, user_id: UserId, id: &OperationId) -> Result<OperationItem, HistoryError> {
        Ok(self.item(self.owned(user_id, id)?))
    }

    /// Delete one of the user's operations.
    ///
    /// Remote assets are removed on a best-effort basis; the local record is
    /// always deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist or belongs to someone else.
    pub async fn delete_operation(
        &self,
        user_id: UserId,
        id: &OperationId,
    ) -> Result<(), HistoryError> {
        let record = self.owned(user_id, id)?;

        if let Some(provider) = &self.provider {
            for asset in [&record.source_asset, &record.result_asset] {
                if let Err(e) = provider.delete_asset(asset).await {
                    tracing::warn!(
                        user_id = %user_id,
                        operation_id = %id,
                        asset_id = %asset.id,
                        error = %e,
                        "Failed to delete remote asset"
                    );
                }
            }
        }

        self.store.delete_operation(id)?;
        tracing::info!(user_id = %user_id, operation_id = %id, "Operation deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, TransformOutput, TransformRequest};
    use async_trait::async_trait;
    use pixcredit_core::OperationParams;
    use pixcredit_store::MemoryStore;

    struct BrokenProvider;

    #[async_trait]
    impl TransformProvider for BrokenProvider {
        async fn transform(
            &self,
            _request: &TransformRequest,
        ) -> Result<TransformOutput, ProviderError> {
            Err(ProviderError::Configuration("unused".into()))
        }

        async fn delete_asset(&self, _asset: &AssetRef) -> Result<(), ProviderError> {
            Err(ProviderError::Status {
                status: 500,
                body: "storage down".into(),
            })
        }
    }

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            id: id.into(),
            url: format!("https://cdn.example/{id}.png"),
        }
    }

    fn seed(store: &MemoryStore, user_id: UserId, count: usize) -> Vec<OperationRecord> {
        (0..count)
            .map(|i| {
                let record = OperationRecord::new(
                    user_id,
                    &OperationParams::Restore,
                    asset(&format!("src-{i}")),
                    asset(&format!("out-{i}")),
                );
                store.put_operation(&record).unwrap();
                record
            })
            .collect()
    }

    fn history(store: &Arc<MemoryStore>) -> OperationHistory {
        OperationHistory::new(
            store.clone(),
            OperationCatalog::default(),
            Some(Arc::new(BrokenProvider)),
        )
    }

    #[test]
    fn page_request_normalization() {
        assert_eq!(
            PageRequest::new(None, None),
            PageRequest {
                page: 1,
                per_page: 10
            }
        );
        assert_eq!(PageRequest::new(Some(0), Some(0)).page, 1);
        assert_eq!(PageRequest::new(Some(-3), Some(0)).per_page, 1);
        assert_eq!(PageRequest::new(Some(2), Some(500)).per_page, 100);
    }

    #[test]
    fn pagination_fields() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let records = seed(&store, user_id, 25);
        let history = history(&store);

        let first = history
            .list_for_user(user_id, PageRequest::new(Some(1), None))
            .unwrap();
        assert_eq!(first.total, 25);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.last_page, 3);
        assert!(first.has_more);
        assert_eq!(first.items[0].id, records[24].id);
        assert_eq!(first.items[0].credit_cost, 1);

        let last = history
            .list_for_user(user_id, PageRequest::new(Some(3), None))
            .unwrap();
        assert_eq!(last.items.len(), 5);
        assert!(!last.has_more);
        assert_eq!(last.items[4].id, records[0].id);
    }

    #[test]
    fn empty_history_has_one_page() {
        let store = Arc::new(MemoryStore::new());
        let page = history(&store)
            .list_for_user(UserId::generate(), PageRequest::new(None, None))
            .unwrap();

        assert_eq!(page.total, 0);
        assert_eq!(page.last_page, 1);
        assert!(!page.has_more);
        assert!(page.items.is_empty());
    }

    #[test]
    fn get_is_owner_only() {
        let store = Arc::new(MemoryStore::new());
        let owner = UserId::generate();
        let records = seed(&store, owner, 1);
        let history = history(&store);

        assert_eq!(history.get(owner, &records[0].id).unwrap().id, records[0].id);
        assert!(matches!(
            history.get(UserId::generate(), &records[0].id),
            Err(HistoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_succeeds_despite_asset_cleanup_failure() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let records = seed(&store, user_id, 3);
        let history = history(&store);

        history
            .delete_operation(user_id, &records[1].id)
            .await
            .unwrap();

        let page = history
            .list_for_user(user_id, PageRequest::new(None, None))
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|item| item.id != records[1].id));
    }

    #[tokio::test]
    async fn delete_by_stranger_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let owner = UserId::generate();
        let records = seed(&store, owner, 1);
        let history = history(&store);

        let result = history
            .delete_operation(UserId::generate(), &records[0].id)
            .await;
        assert!(matches!(result, Err(HistoryError::NotFound)));
        assert_eq!(store.count_operations_by_user(&owner).unwrap(), 1);
    }
}
