//! Sheaf prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    allocation::{AllocationError, AllocationOutcome, ComponentLine, LineAllocation, allocate},
    bundles::{
        Bundle, BundleConfigError, BundleItem, BundleStatus, BundleUpdate, BundleUuid,
        DiscountConfig, NewBundle, NewBundleItem, TransitionError, ValidityWindow,
        memory::InMemoryBundleRepository,
        repository::{BundleRepository, RepositoryError},
        service::{
            BundlesService, BundlesServiceError, LifecycleStatistics, SweepOutcome,
            VariantDeletionCheck,
        },
    },
    cart::{CartError, expand_bundle},
    catalog::{CatalogError, InMemoryVariantCatalog, VariantCatalog, VariantRecord, VariantUuid},
    ids::TypedUuid,
    integrity::{IntegrityIssue, IntegrityIssueKind, IntegrityReport, validate_bundle},
    orders::{BundleKey, BundleLineMeta, GroupSummary, OrderLine, OrderLineUuid},
    promotion::{
        AdjustmentRule, BUNDLE_RULE_CODE, InMemoryPromotionRegistry, PromotionRegistry,
        RecalculationError, RecalculationOutcome, RegistryError, apply_bundle_adjustments,
        ensure_bundle_rule,
    },
};
