//! Variant catalog seam.
//!
//! Product variants live in the host platform's catalog; this crate only
//! needs to ask whether a referenced variant exists, is enabled, and is not
//! queued for deletion. Hosts implement [`VariantCatalog`] over their own
//! storage; [`InMemoryVariantCatalog`] backs tests and embedded use.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use mockall::automock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ids::TypedUuid;

/// Variant UUID.
pub type VariantUuid = TypedUuid<VariantRecord>;

/// What the integrity validator needs to know about a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    /// Identifier.
    pub uuid: VariantUuid,
    /// Stock keeping unit, for messages.
    pub sku: String,
    /// Disabled variants cannot appear in an ACTIVE bundle.
    pub enabled: bool,
    /// Set while a deletion request is being processed.
    pub pending_deletion: bool,
}

/// Catalog lookup failure, wrapping whatever the host's storage raised.
#[derive(Debug, Error)]
#[error("variant catalog lookup failed")]
pub struct CatalogError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl CatalogError {
    /// Wraps a host storage error.
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self(Box::new(error))
    }
}

/// Read access to the host's variant catalog.
#[automock]
#[async_trait]
pub trait VariantCatalog: Send + Sync {
    /// Looks up a single variant; `None` if it does not exist.
    async fn variant(&self, uuid: VariantUuid) -> Result<Option<VariantRecord>, CatalogError>;
}

/// Catalog held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVariantCatalog {
    variants: RwLock<FxHashMap<VariantUuid, VariantRecord>>,
}

impl InMemoryVariantCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enabled variant and returns its id.
    pub fn add_variant(&self, sku: &str) -> VariantUuid {
        let uuid = VariantUuid::new();

        self.write().insert(
            uuid,
            VariantRecord {
                uuid,
                sku: sku.to_owned(),
                enabled: true,
                pending_deletion: false,
            },
        );

        uuid
    }

    /// Disables a variant. Unknown ids are ignored.
    pub fn disable(&self, uuid: VariantUuid) {
        if let Some(variant) = self.write().get_mut(&uuid) {
            variant.enabled = false;
        }
    }

    /// Flags a variant as pending deletion. Unknown ids are ignored.
    pub fn mark_pending_deletion(&self, uuid: VariantUuid) {
        if let Some(variant) = self.write().get_mut(&uuid) {
            variant.pending_deletion = true;
        }
    }

    /// Removes a variant.
    pub fn remove(&self, uuid: VariantUuid) {
        self.write().remove(&uuid);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, FxHashMap<VariantUuid, VariantRecord>> {
        self.variants.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VariantCatalog for InMemoryVariantCatalog {
    async fn variant(&self, uuid: VariantUuid) -> Result<Option<VariantRecord>, CatalogError> {
        let variants = self.variants.read().unwrap_or_else(PoisonError::into_inner);

        Ok(variants.get(&uuid).cloned())
    }
}
