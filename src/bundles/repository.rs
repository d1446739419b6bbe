//! Bundle storage seam.
//!
//! Hosts implement [`BundleRepository`] over their own ORM and transaction
//! model; each service operation maps to one unit of work here, which the
//! host is expected to wrap in a single database transaction. The crate
//! ships [`crate::bundles::memory::InMemoryBundleRepository`] for tests and
//! embedded use.

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use thiserror::Error;

use crate::{
    bundles::{Bundle, BundleStatus, BundleUuid},
    catalog::VariantUuid,
};

/// Storage failures, mapped from whatever backend the host uses.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The addressed bundle does not exist.
    #[error("bundle not found")]
    NotFound,

    /// Another bundle already owns the slug.
    #[error("bundle slug already in use")]
    DuplicateSlug,

    /// Optimistic-concurrency check failed: the stored version is not the
    /// one the caller read.
    #[error("bundle version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the caller based its edit on.
        expected: u64,
        /// Version actually in storage.
        actual: u64,
    },

    /// Anything else the backend raised.
    #[error("bundle storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persistence operations for the bundle aggregate.
///
/// `update` takes the version the caller read (`expected_version`, the value
/// before the edit bumped it) and must reject the write with
/// [`RepositoryError::VersionConflict`] if storage has moved on. That check
/// is what serializes concurrent edits to the same bundle.
#[automock]
#[async_trait]
pub trait BundleRepository: Send + Sync {
    /// Stores a new bundle.
    async fn insert(&self, bundle: Bundle) -> Result<(), RepositoryError>;

    /// Fetches a bundle by id.
    async fn get(&self, uuid: BundleUuid) -> Result<Option<Bundle>, RepositoryError>;

    /// Fetches a bundle by slug.
    async fn get_by_slug(&self, slug: String) -> Result<Option<Bundle>, RepositoryError>;

    /// Replaces a stored bundle, guarded by `expected_version`.
    async fn update(&self, bundle: Bundle, expected_version: u64) -> Result<(), RepositoryError>;

    /// Lists bundles, optionally filtered by status.
    async fn list(&self, status: Option<BundleStatus>) -> Result<Vec<Bundle>, RepositoryError>;

    /// Lists ACTIVE bundles whose window closes strictly before `cutoff`.
    async fn list_active_expiring_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Bundle>, RepositoryError>;

    /// Lists non-ARCHIVED bundles with a component referencing `variant`.
    async fn list_referencing_variant(
        &self,
        variant: VariantUuid,
    ) -> Result<Vec<Bundle>, RepositoryError>;
}
