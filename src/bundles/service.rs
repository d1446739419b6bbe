//! Bundles service.
//!
//! The admin-facing operations over the bundle aggregate: create, update,
//! the lifecycle transitions, the integrity queries, the variant-deletion
//! guard, lifecycle statistics and the expiry sweep. Each operation is one
//! repository unit of work; the host wraps it in a transaction.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    bundles::{
        Bundle, BundleConfigError, BundleStatus, BundleUpdate, BundleUuid, NewBundle,
        TransitionError,
        repository::{BundleRepository, RepositoryError},
    },
    catalog::{CatalogError, VariantCatalog, VariantUuid},
    integrity::{IntegrityReport, validate_bundle},
};

/// Errors surfaced to the host's API layer as typed results.
#[derive(Debug, Error)]
pub enum BundlesServiceError {
    /// The addressed bundle does not exist.
    #[error("bundle not found")]
    NotFound,

    /// Another bundle already owns the requested slug.
    #[error("bundle slug already in use")]
    SlugTaken,

    /// The bundle's configuration is inconsistent.
    #[error(transparent)]
    Config(#[from] BundleConfigError),

    /// The requested status change is not in the allowed-edge table.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Publish was attempted on a bundle that fails integrity validation.
    #[error("bundle failed integrity validation with {} issue(s)", report.issues.len())]
    IntegrityViolation {
        /// The full validation report, for the admin UI.
        report: IntegrityReport,
    },

    /// The bundle was edited concurrently; retry with fresh data.
    #[error("bundle was modified concurrently: expected version {expected}, found {actual}")]
    ConcurrentModification {
        /// Version the caller based its edit on.
        expected: u64,
        /// Version actually in storage.
        actual: u64,
    },

    /// Variant deletion is blocked by bundles that reference it.
    #[error("variant {variant} is referenced by bundle(s): {}", bundles.join(", "))]
    BlockingDependency {
        /// The variant whose deletion was requested.
        variant: VariantUuid,
        /// Names of the non-ARCHIVED bundles referencing it.
        bundles: Vec<String>,
    },

    /// Restore requires `valid_to` to have been extended into the future.
    #[error("cannot restore: valid_to has not been extended past the current time")]
    WindowNotExtended,

    /// ARCHIVED bundles cannot be edited.
    #[error("bundle is archived and cannot be modified")]
    Archived,

    /// Variant catalog lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Storage failed for a reason other than the mapped ones.
    #[error("bundle storage error")]
    Repository(#[source] RepositoryError),
}

impl From<RepositoryError> for BundlesServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::DuplicateSlug => Self::SlugTaken,
            RepositoryError::VersionConflict { expected, actual } => {
                Self::ConcurrentModification { expected, actual }
            }
            other => Self::Repository(other),
        }
    }
}

/// Bundle counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatistics {
    /// Bundles in DRAFT.
    pub draft: usize,
    /// Bundles in ACTIVE.
    pub active: usize,
    /// Bundles in EXPIRED.
    pub expired: usize,
    /// Bundles in BROKEN.
    pub broken: usize,
    /// Bundles in ARCHIVED.
    pub archived: usize,
    /// ACTIVE bundles whose window closes before the requested cutoff.
    pub expiring_soon: usize,
}

/// What the expiry sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Bundles transitioned ACTIVE -> EXPIRED.
    pub expired: Vec<BundleUuid>,
    /// Bundles that failed to transition; each failure was logged and did
    /// not stop the sweep.
    pub failed: usize,
}

/// Answer to `canDeleteVariant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDeletionCheck {
    /// True when no non-ARCHIVED bundle references the variant.
    pub deletable: bool,
    /// Names of the blocking bundles, when not deletable.
    pub blocking_bundles: Vec<String>,
}

/// The bundle operations consumed by the host's API layer.
#[derive(Debug)]
pub struct BundlesService<R, C> {
    repository: R,
    catalog: C,
}

impl<R, C> BundlesService<R, C>
where
    R: BundleRepository,
    C: VariantCatalog,
{
    /// Builds a service over the given storage and catalog.
    #[must_use]
    pub fn new(repository: R, catalog: C) -> Self {
        Self { repository, catalog }
    }

    /// The underlying repository, for the promotion hook and host wiring.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// The underlying variant catalog.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Creates a bundle in DRAFT at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::Config`] for inconsistent input and
    /// [`BundlesServiceError::SlugTaken`] when the slug is already in use.
    #[tracing::instrument(name = "bundles.service.create_bundle", skip_all, fields(slug = %new.slug), err)]
    pub async fn create_bundle(
        &self,
        new: NewBundle,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let bundle = Bundle::create(new, now)?;

        self.repository.insert(bundle.clone()).await?;

        info!(bundle_uuid = %bundle.uuid, slug = %bundle.slug, "created bundle");

        Ok(bundle)
    }

    /// Fetches a bundle by id.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::NotFound`] for an unknown id.
    pub async fn get_bundle(&self, uuid: BundleUuid) -> Result<Bundle, BundlesServiceError> {
        self.repository
            .get(uuid)
            .await?
            .ok_or(BundlesServiceError::NotFound)
    }

    /// Fetches a bundle by slug.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::NotFound`] for an unknown slug.
    pub async fn get_bundle_by_slug(&self, slug: &str) -> Result<Bundle, BundlesServiceError> {
        self.repository
            .get_by_slug(slug.to_owned())
            .await?
            .ok_or(BundlesServiceError::NotFound)
    }

    /// Lists bundles, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::Repository`] on storage failure.
    pub async fn list_bundles(
        &self,
        status: Option<BundleStatus>,
    ) -> Result<Vec<Bundle>, BundlesServiceError> {
        Ok(self.repository.list(status).await?)
    }

    /// Applies a partial update, serialized by the version counter.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::ConcurrentModification`] when
    /// `expected_version` is stale, [`BundlesServiceError::Archived`] for
    /// ARCHIVED bundles, and the create-time errors for bad input.
    #[tracing::instrument(name = "bundles.service.update_bundle", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn update_bundle(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
        update: BundleUpdate,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let mut bundle = self.checked_out(uuid, expected_version).await?;

        if bundle.status == BundleStatus::Archived {
            return Err(BundlesServiceError::Archived);
        }

        bundle.apply_update(update, now)?;

        self.repository.update(bundle.clone(), expected_version).await?;

        info!(bundle_uuid = %uuid, version = bundle.version, "updated bundle");

        Ok(bundle)
    }

    /// Publishes a DRAFT bundle, gated on integrity validation.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::IntegrityViolation`] with the full
    /// report when validation fails, and
    /// [`BundlesServiceError::InvalidTransition`] when the bundle is not in
    /// DRAFT.
    #[tracing::instrument(name = "bundles.service.publish_bundle", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn publish_bundle(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let mut bundle = self.checked_out(uuid, expected_version).await?;

        let report = validate_bundle(&bundle, &self.catalog).await?;

        if !report.valid {
            return Err(BundlesServiceError::IntegrityViolation { report });
        }

        bundle.publish(now)?;

        self.repository.update(bundle.clone(), expected_version).await?;

        info!(bundle_uuid = %uuid, "published bundle");

        Ok(bundle)
    }

    /// Archives a bundle. Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::InvalidTransition`] when the bundle is
    /// already ARCHIVED.
    #[tracing::instrument(name = "bundles.service.archive_bundle", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn archive_bundle(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let mut bundle = self.checked_out(uuid, expected_version).await?;

        bundle.archive(now)?;

        self.repository.update(bundle.clone(), expected_version).await?;

        info!(bundle_uuid = %uuid, "archived bundle");

        Ok(bundle)
    }

    /// Marks an ACTIVE bundle BROKEN with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::InvalidTransition`] when the bundle is
    /// not ACTIVE.
    #[tracing::instrument(name = "bundles.service.mark_bundle_broken", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn mark_bundle_broken(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
        reason: String,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let mut bundle = self.checked_out(uuid, expected_version).await?;

        bundle.mark_broken(reason, now)?;

        self.repository.update(bundle.clone(), expected_version).await?;

        info!(bundle_uuid = %uuid, "marked bundle broken");

        Ok(bundle)
    }

    /// Returns an EXPIRED bundle to ACTIVE after its window was extended.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::WindowNotExtended`] unless `valid_to`
    /// now lies in the future, and
    /// [`BundlesServiceError::InvalidTransition`] when the bundle is not
    /// EXPIRED.
    #[tracing::instrument(name = "bundles.service.restore_bundle", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn restore_bundle(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
        now: Timestamp,
    ) -> Result<Bundle, BundlesServiceError> {
        let mut bundle = self.checked_out(uuid, expected_version).await?;

        if bundle.window.expired_at(now) {
            return Err(BundlesServiceError::WindowNotExtended);
        }

        bundle.restore(now)?;

        self.repository.update(bundle.clone(), expected_version).await?;

        info!(bundle_uuid = %uuid, "restored bundle");

        Ok(bundle)
    }

    /// The periodic expiry sweep: transitions every ACTIVE bundle whose
    /// window closed before `now` to EXPIRED, one bundle at a time. A
    /// failure on one bundle is logged and does not block the others.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::Repository`] only when listing the due
    /// bundles fails; per-bundle failures are counted in the outcome.
    #[tracing::instrument(name = "bundles.service.expire_due_bundles", skip_all, err)]
    pub async fn expire_due_bundles(
        &self,
        now: Timestamp,
    ) -> Result<SweepOutcome, BundlesServiceError> {
        let due = self.repository.list_active_expiring_before(now).await?;

        let mut outcome = SweepOutcome::default();

        for mut bundle in due {
            let uuid = bundle.uuid;
            let expected_version = bundle.version;

            let result = match bundle.expire(now) {
                Ok(()) => self
                    .repository
                    .update(bundle, expected_version)
                    .await
                    .map_err(BundlesServiceError::from),
                Err(error) => Err(error.into()),
            };

            match result {
                Ok(()) => {
                    info!(bundle_uuid = %uuid, "expired bundle");
                    outcome.expired.push(uuid);
                }
                Err(error) => {
                    warn!(bundle_uuid = %uuid, %error, "sweep failed to expire bundle");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Runs the integrity validator without changing any state.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::NotFound`] for an unknown bundle and
    /// [`BundlesServiceError::Catalog`] when the catalog lookup fails.
    pub async fn validate_bundle_integrity(
        &self,
        uuid: BundleUuid,
    ) -> Result<IntegrityReport, BundlesServiceError> {
        let bundle = self.get_bundle(uuid).await?;

        Ok(validate_bundle(&bundle, &self.catalog).await?)
    }

    /// Re-validates an ACTIVE bundle and marks it BROKEN when validation
    /// fails, using the first issue as the reason.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::NotFound`], catalog and storage
    /// errors. Bundles in other states are returned unchanged with their
    /// report.
    #[tracing::instrument(name = "bundles.service.audit_active_bundle", skip_all, fields(bundle_uuid = %uuid), err)]
    pub async fn audit_active_bundle(
        &self,
        uuid: BundleUuid,
        now: Timestamp,
    ) -> Result<IntegrityReport, BundlesServiceError> {
        let mut bundle = self.get_bundle(uuid).await?;

        let report = validate_bundle(&bundle, &self.catalog).await?;

        if !report.valid && bundle.status == BundleStatus::Active {
            let reason = report
                .issues
                .first()
                .map_or_else(|| "integrity validation failed".to_owned(), |i| i.message.clone());

            let expected_version = bundle.version;
            bundle.mark_broken(reason, now)?;
            self.repository.update(bundle, expected_version).await?;

            warn!(bundle_uuid = %uuid, "active bundle failed audit, marked broken");
        }

        Ok(report)
    }

    /// Whether a variant can be deleted, and which bundles block it.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::Repository`] on storage failure.
    pub async fn can_delete_variant(
        &self,
        variant: VariantUuid,
    ) -> Result<VariantDeletionCheck, BundlesServiceError> {
        let blocking = self.repository.list_referencing_variant(variant).await?;

        Ok(VariantDeletionCheck {
            deletable: blocking.is_empty(),
            blocking_bundles: blocking.into_iter().map(|b| b.name).collect(),
        })
    }

    /// Rejects a variant-deletion request while any non-ARCHIVED bundle
    /// references the variant. Deletion is never silently allowed to orphan
    /// a bundle.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::BlockingDependency`] naming the
    /// blocking bundles.
    pub async fn ensure_variant_deletable(
        &self,
        variant: VariantUuid,
    ) -> Result<(), BundlesServiceError> {
        let check = self.can_delete_variant(variant).await?;

        if check.deletable {
            Ok(())
        } else {
            Err(BundlesServiceError::BlockingDependency {
                variant,
                bundles: check.blocking_bundles,
            })
        }
    }

    /// Counts bundles per lifecycle state, plus ACTIVE bundles whose window
    /// closes before `expiring_before`.
    ///
    /// # Errors
    ///
    /// Returns [`BundlesServiceError::Repository`] on storage failure.
    pub async fn lifecycle_statistics(
        &self,
        expiring_before: Timestamp,
    ) -> Result<LifecycleStatistics, BundlesServiceError> {
        let bundles = self.repository.list(None).await?;

        let mut stats = LifecycleStatistics::default();

        for bundle in &bundles {
            match bundle.status {
                BundleStatus::Draft => stats.draft += 1,
                BundleStatus::Active => {
                    stats.active += 1;

                    if bundle.window.expired_at(expiring_before) {
                        stats.expiring_soon += 1;
                    }
                }
                BundleStatus::Expired => stats.expired += 1,
                BundleStatus::Broken => stats.broken += 1,
                BundleStatus::Archived => stats.archived += 1,
            }
        }

        Ok(stats)
    }

    /// Fetches a bundle and enforces the optimistic-concurrency check.
    async fn checked_out(
        &self,
        uuid: BundleUuid,
        expected_version: u64,
    ) -> Result<Bundle, BundlesServiceError> {
        let bundle = self.get_bundle(uuid).await?;

        if bundle.version != expected_version {
            return Err(BundlesServiceError::ConcurrentModification {
                expected: expected_version,
                actual: bundle.version,
            });
        }

        Ok(bundle)
    }
}
