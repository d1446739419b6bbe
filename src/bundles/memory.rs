//! In-memory bundle repository.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use jiff::Timestamp;
use rustc_hash::FxHashMap;

use crate::{
    bundles::{
        Bundle, BundleStatus, BundleUuid,
        repository::{BundleRepository, RepositoryError},
    },
    catalog::VariantUuid,
};

type Store = FxHashMap<BundleUuid, Bundle>;

/// Bundle storage held in process memory. Suitable for tests and embedded
/// single-process use; writes are serialized by an interior lock.
#[derive(Debug, Default)]
pub struct InMemoryBundleRepository {
    bundles: RwLock<Store>,
}

impl InMemoryBundleRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bundles.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.bundles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.bundles.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BundleRepository for InMemoryBundleRepository {
    async fn insert(&self, bundle: Bundle) -> Result<(), RepositoryError> {
        let mut bundles = self.write();

        if bundles.values().any(|b| b.slug == bundle.slug) {
            return Err(RepositoryError::DuplicateSlug);
        }

        bundles.insert(bundle.uuid, bundle);

        Ok(())
    }

    async fn get(&self, uuid: BundleUuid) -> Result<Option<Bundle>, RepositoryError> {
        Ok(self.read().get(&uuid).cloned())
    }

    async fn get_by_slug(&self, slug: String) -> Result<Option<Bundle>, RepositoryError> {
        Ok(self.read().values().find(|b| b.slug == slug).cloned())
    }

    async fn update(&self, bundle: Bundle, expected_version: u64) -> Result<(), RepositoryError> {
        let mut bundles = self.write();

        if bundles
            .values()
            .any(|b| b.uuid != bundle.uuid && b.slug == bundle.slug)
        {
            return Err(RepositoryError::DuplicateSlug);
        }

        let Some(stored) = bundles.get_mut(&bundle.uuid) else {
            return Err(RepositoryError::NotFound);
        };

        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                actual: stored.version,
            });
        }

        *stored = bundle;

        Ok(())
    }

    async fn list(&self, status: Option<BundleStatus>) -> Result<Vec<Bundle>, RepositoryError> {
        let mut bundles: Vec<Bundle> = self
            .read()
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();

        bundles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));

        Ok(bundles)
    }

    async fn list_active_expiring_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Bundle>, RepositoryError> {
        let mut bundles: Vec<Bundle> = self
            .read()
            .values()
            .filter(|b| b.status == BundleStatus::Active && b.window.expired_at(cutoff))
            .cloned()
            .collect();

        bundles.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        Ok(bundles)
    }

    async fn list_referencing_variant(
        &self,
        variant: VariantUuid,
    ) -> Result<Vec<Bundle>, RepositoryError> {
        let mut bundles: Vec<Bundle> = self
            .read()
            .values()
            .filter(|b| {
                b.status != BundleStatus::Archived
                    && b.items.iter().any(|item| item.variant == variant)
            })
            .cloned()
            .collect();

        bundles.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        Ok(bundles)
    }
}
