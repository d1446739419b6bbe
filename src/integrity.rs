//! Integrity validation.
//!
//! A bundle may only go ACTIVE while every referenced variant exists, is
//! enabled and is not queued for deletion, and while its discount and window
//! configuration are internally consistent. The same checks back the
//! variant-deletion guard on the service.
//!
//! A single bundle cannot hold two simultaneously-active configurations:
//! the aggregate owns exactly one discount and one window, so no overlap
//! search is needed.

use serde::{Deserialize, Serialize};

use crate::{
    bundles::Bundle,
    catalog::{CatalogError, VariantCatalog, VariantUuid},
};

/// Classification of an integrity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    /// A referenced variant does not exist in the catalog.
    VariantMissing,
    /// A referenced variant exists but is disabled.
    VariantDisabled,
    /// A referenced variant is queued for deletion.
    VariantPendingDeletion,
    /// The bundle has no components.
    NoComponents,
    /// The discount configuration is internally inconsistent.
    DiscountInvalid,
    /// The validity window is empty.
    WindowInvalid,
}

/// One problem found by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// What kind of problem this is.
    #[serde(rename = "type")]
    pub kind: IntegrityIssueKind,
    /// The offending variant, for variant-scoped issues.
    pub variant: Option<VariantUuid>,
    /// Human-readable description for the admin UI.
    pub message: String,
}

/// The validator's verdict on a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when no issues were found.
    pub valid: bool,
    /// Every problem found, in check order.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Builds a report from the issues found; valid iff there are none.
    #[must_use]
    pub fn from_issues(issues: Vec<IntegrityIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

/// Runs every integrity check against the given bundle.
///
/// # Errors
///
/// Returns [`CatalogError`] only when the catalog lookup itself fails;
/// integrity problems are reported in the [`IntegrityReport`], not as errors.
pub async fn validate_bundle<C: VariantCatalog + ?Sized>(
    bundle: &Bundle,
    catalog: &C,
) -> Result<IntegrityReport, CatalogError> {
    let mut issues = Vec::new();

    if bundle.items.is_empty() {
        issues.push(IntegrityIssue {
            kind: IntegrityIssueKind::NoComponents,
            variant: None,
            message: format!("bundle \"{}\" has no components", bundle.name),
        });
    }

    for item in &bundle.items {
        match catalog.variant(item.variant).await? {
            None => issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::VariantMissing,
                variant: Some(item.variant),
                message: format!("variant {} does not exist", item.variant),
            }),
            Some(variant) if !variant.enabled => issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::VariantDisabled,
                variant: Some(item.variant),
                message: format!("variant {} ({}) is disabled", item.variant, variant.sku),
            }),
            Some(variant) if variant.pending_deletion => issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::VariantPendingDeletion,
                variant: Some(item.variant),
                message: format!(
                    "variant {} ({}) is queued for deletion",
                    item.variant, variant.sku
                ),
            }),
            Some(_) => {}
        }
    }

    if let Err(error) = bundle.discount.validate() {
        issues.push(IntegrityIssue {
            kind: IntegrityIssueKind::DiscountInvalid,
            variant: None,
            message: error.to_string(),
        });
    }

    if let Err(error) = bundle.window.validate() {
        issues.push(IntegrityIssue {
            kind: IntegrityIssueKind::WindowInvalid,
            variant: None,
            message: error.to_string(),
        });
    }

    Ok(IntegrityReport::from_issues(issues))
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use rusty_money::iso;
    use testresult::TestResult;

    use crate::{
        bundles::{Bundle, DiscountConfig, NewBundle, NewBundleItem, ValidityWindow},
        catalog::InMemoryVariantCatalog,
    };

    use super::*;

    fn bundle_with(catalog: &InMemoryVariantCatalog) -> TestResult<(Bundle, VariantUuid)> {
        let variant = catalog.add_variant("SKU-A");

        let bundle = Bundle::create(
            NewBundle {
                name: "Starter Pack".into(),
                slug: "starter-pack".into(),
                discount: DiscountConfig::Fixed { price_minor: 35_00 },
                currency: iso::USD,
                window: ValidityWindow::UNBOUNDED,
                items: vec![NewBundleItem {
                    variant,
                    quantity: 1,
                    unit_price_minor: 40_00,
                    display_order: 0,
                    weight: 0,
                }],
            },
            Timestamp::now(),
        )?;

        Ok((bundle, variant))
    }

    #[tokio::test]
    async fn healthy_bundle_is_valid() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (bundle, _) = bundle_with(&catalog)?;

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(report.valid, "expected a valid report, got {report:?}");
        assert!(report.issues.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn disabled_variant_is_reported() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (bundle, variant) = bundle_with(&catalog)?;

        catalog.disable(variant);

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);

        let issue = report.issues.first();
        assert!(
            issue.is_some_and(|i| i.kind == IntegrityIssueKind::VariantDisabled
                && i.variant == Some(variant)),
            "expected a variant_disabled issue, got {report:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn missing_variant_is_reported() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (bundle, variant) = bundle_with(&catalog)?;

        catalog.remove(variant);

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(
            report
                .issues
                .iter()
                .any(|i| i.kind == IntegrityIssueKind::VariantMissing),
            "expected a variant_missing issue, got {report:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn pending_deletion_variant_is_reported() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (bundle, variant) = bundle_with(&catalog)?;

        catalog.mark_pending_deletion(variant);

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(
            report
                .issues
                .iter()
                .any(|i| i.kind == IntegrityIssueKind::VariantPendingDeletion),
            "expected a variant_pending_deletion issue, got {report:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn empty_component_list_is_reported() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (mut bundle, _) = bundle_with(&catalog)?;

        bundle.items.clear();

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(
            report
                .issues
                .iter()
                .any(|i| i.kind == IntegrityIssueKind::NoComponents),
            "expected a no_components issue, got {report:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn inconsistent_discount_is_reported() -> TestResult {
        let catalog = InMemoryVariantCatalog::new();
        let (mut bundle, _) = bundle_with(&catalog)?;

        // Bypass construction validation to simulate corrupted stored data.
        bundle.discount = DiscountConfig::Fixed { price_minor: -1 };

        let report = validate_bundle(&bundle, &catalog).await?;

        assert!(
            report
                .issues
                .iter()
                .any(|i| i.kind == IntegrityIssueKind::DiscountInvalid),
            "expected a discount_invalid issue, got {report:?}"
        );

        Ok(())
    }

    #[test]
    fn issue_kind_serializes_in_snake_case() {
        let json = serde_json::to_string(&IntegrityIssueKind::VariantDisabled).unwrap_or_default();

        assert_eq!(json, "\"variant_disabled\"");
    }
}
