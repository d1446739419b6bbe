//! System promotion hook.
//!
//! A single, well-known adjustment rule owns bundle discount distribution at
//! order price recalculation. The rule row is created idempotently during
//! deterministic bootstrap ([`ensure_bundle_rule`]): re-running registration
//! when the rule already exists is a no-op, never a duplicate.
//!
//! [`apply_bundle_adjustments`] is the hook body: it groups order lines by
//! [`BundleKey`], resolves each bundle's discount against the group's
//! current subtotals, runs the allocator, and writes the per-line
//! adjustments back. A malformed group is left unadjusted and logged as an
//! anomaly; it never aborts the rest of the recalculation.

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    allocation::{ComponentLine, allocate},
    bundles::{
        BundleStatus,
        repository::{BundleRepository, RepositoryError},
    },
    orders::{BundleKey, GroupSummary, OrderLine},
};

mod registry;

pub use registry::{
    AdjustmentRule, InMemoryPromotionRegistry, PromotionRegistry, RegistryError,
    ensure_bundle_rule,
};

/// Well-known code identifying the bundle distribution rule.
pub const BUNDLE_RULE_CODE: &str = "sheaf-bundle-distribution";

/// Errors from the recalculation hook itself.
///
/// Per-group problems are not errors: they are anomalies, logged and
/// skipped.
#[derive(Debug, Error)]
pub enum RecalculationError {
    /// Bundle storage failed while resolving a group's bundle.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What one recalculation pass did.
#[derive(Debug, Clone, Default)]
pub struct RecalculationOutcome {
    /// One summary per successfully adjusted bundle-key group.
    pub groups: Vec<GroupSummary<'static>>,
    /// Number of groups left unadjusted because their metadata or inputs
    /// were malformed.
    pub anomalies: usize,
}

/// Applies bundle discounts to every bundle-key group in `lines`.
///
/// Component subtotals are taken from the lines as they are now, so price
/// changes since add-to-cart recompute the discount against current prices.
/// Identical inputs always produce identical adjustments.
///
/// # Errors
///
/// Returns [`RecalculationError::Repository`] only when bundle storage
/// itself fails. Malformed groups (no header, duplicate headers, mixed
/// currencies, unknown or non-ACTIVE bundles, unreconcilable inputs) are
/// counted as anomalies and left unadjusted.
pub async fn apply_bundle_adjustments<R: BundleRepository + ?Sized>(
    repository: &R,
    lines: &mut [OrderLine],
    now: Timestamp,
) -> Result<RecalculationOutcome, RecalculationError> {
    let mut order: Vec<BundleKey> = Vec::new();
    let mut groups: FxHashMap<BundleKey, Vec<usize>> = FxHashMap::default();

    for (index, line) in lines.iter().enumerate() {
        if let Some(meta) = &line.bundle {
            groups.entry(meta.bundle_key).or_insert_with(|| {
                order.push(meta.bundle_key);
                Vec::new()
            });

            if let Some(group) = groups.get_mut(&meta.bundle_key) {
                group.push(index);
            }
        }
    }

    let mut outcome = RecalculationOutcome::default();

    for key in order {
        let Some(indices) = groups.get(&key) else {
            continue;
        };

        match adjust_group(repository, lines, key, indices, now).await {
            Ok(Some(summary)) => outcome.groups.push(summary),
            Ok(None) => outcome.anomalies += 1,
            Err(error) => return Err(error),
        }
    }

    Ok(outcome)
}

/// Adjusts one bundle-key group. `Ok(None)` means the group was anomalous
/// and has been left unadjusted.
async fn adjust_group<R: BundleRepository + ?Sized>(
    repository: &R,
    lines: &mut [OrderLine],
    key: BundleKey,
    indices: &[usize],
    now: Timestamp,
) -> Result<Option<GroupSummary<'static>>, RecalculationError> {
    let mut header: Option<usize> = None;
    let mut components: Vec<usize> = Vec::with_capacity(indices.len());

    for &index in indices {
        let Some(line) = lines.get(index) else {
            continue;
        };

        if line.is_bundle_header() {
            if header.is_some() {
                warn!(bundle_key = %key, "bundle group has multiple header lines, leaving unadjusted");
                return Ok(None);
            }

            header = Some(index);
        } else {
            components.push(index);
        }
    }

    let Some(header) = header else {
        warn!(bundle_key = %key, "bundle group has no header line, leaving unadjusted");
        return Ok(None);
    };

    if components.is_empty() {
        warn!(bundle_key = %key, "bundle group has no component lines, leaving unadjusted");
        return Ok(None);
    }

    let Some((bundle_uuid, currency)) = lines
        .get(header)
        .and_then(|line| line.bundle.as_ref().map(|meta| (meta.bundle_uuid, line.currency)))
    else {
        return Ok(None);
    };

    for &index in indices {
        let Some(line) = lines.get(index) else {
            continue;
        };

        if line.currency != currency {
            warn!(bundle_key = %key, "bundle group mixes currencies, leaving unadjusted");
            return Ok(None);
        }

        if line.bundle.as_ref().is_some_and(|meta| meta.bundle_uuid != bundle_uuid) {
            warn!(bundle_key = %key, "bundle group mixes bundle ids, leaving unadjusted");
            return Ok(None);
        }
    }

    let Some(bundle) = repository.get(bundle_uuid).await? else {
        warn!(bundle_key = %key, %bundle_uuid, "bundle not found, leaving group unadjusted");
        return Ok(None);
    };

    if bundle.status != BundleStatus::Active || !bundle.window.contains(now) {
        // Not an input error, but the discount no longer applies; the group
        // keeps its base prices.
        warn!(
            bundle_key = %key,
            %bundle_uuid,
            status = %bundle.status,
            "bundle not currently applicable, leaving group unadjusted"
        );
        return Ok(None);
    }

    if bundle.currency != currency {
        warn!(bundle_key = %key, %bundle_uuid, "bundle currency differs from order lines, leaving unadjusted");
        return Ok(None);
    }

    // Component lines were emitted in display order at expansion time, so
    // the position within the group doubles as the allocator's tie-break
    // order.
    let component_lines: Vec<ComponentLine> = components
        .iter()
        .enumerate()
        .filter_map(|(position, &index)| {
            lines.get(index).map(|line| ComponentLine {
                subtotal_minor: line.total_minor(),
                display_order: u32::try_from(position).unwrap_or(u32::MAX),
            })
        })
        .collect();

    let subtotal_minor: i64 = component_lines.iter().map(|line| line.subtotal_minor).sum();
    let discount_minor = bundle.discount.resolve_minor(subtotal_minor);

    let allocation = match allocate(discount_minor, &component_lines) {
        Ok(allocation) => allocation,
        Err(error) => {
            warn!(bundle_key = %key, %bundle_uuid, %error, "allocation anomaly, leaving group unadjusted");
            return Ok(None);
        }
    };

    if allocation.degenerate {
        warn!(bundle_key = %key, %bundle_uuid, "bundle subtotal is zero, distributing zero discount");
    }

    for (&index, allocated) in components.iter().zip(&allocation.lines) {
        let Some(line) = lines.get_mut(index) else {
            continue;
        };

        let total = line.total_minor();

        if let Some(meta) = line.bundle.as_mut() {
            meta.adj_amount_minor = allocated.amount_minor;
            meta.share = Some(allocated.share);
            meta.pct_applied = (total > 0).then(|| {
                Decimal::from(allocated.amount_minor) / Decimal::from(total) * Decimal::ONE_HUNDRED
            });
        }

        let quantity = i64::from(line.quantity);
        let effective_total = total - allocated.amount_minor;

        if let Some(meta) = line.bundle.as_mut() {
            meta.effective_unit_price_minor = if quantity > 0 {
                effective_total / quantity
            } else {
                meta.base_unit_price_minor
            };
        }
    }

    debug!(
        bundle_key = %key,
        %bundle_uuid,
        subtotal_minor,
        discount_minor = allocation.total_minor,
        "distributed bundle discount"
    );

    Ok(Some(GroupSummary::from_minor(
        key,
        bundle.name,
        subtotal_minor,
        allocation.total_minor,
        bundle.currency,
        allocation.degenerate,
    )))
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso};
    use testresult::TestResult;

    use crate::{
        bundles::{
            Bundle, DiscountConfig, NewBundle, NewBundleItem, ValidityWindow,
            memory::InMemoryBundleRepository,
        },
        bundles::BundleUuid,
        cart::expand_bundle,
        catalog::VariantUuid,
    };

    use super::*;

    async fn seeded_bundle(
        repository: &InMemoryBundleRepository,
        discount: DiscountConfig,
    ) -> TestResult<Bundle> {
        let now = Timestamp::now();

        let mut bundle = Bundle::create(
            NewBundle {
                name: "Movie Night".into(),
                slug: "movie-night".into(),
                discount,
                currency: iso::USD,
                window: ValidityWindow::UNBOUNDED,
                items: vec![
                    NewBundleItem {
                        variant: VariantUuid::new(),
                        quantity: 1,
                        unit_price_minor: 30_00,
                        display_order: 0,
                        weight: 0,
                    },
                    NewBundleItem {
                        variant: VariantUuid::new(),
                        quantity: 1,
                        unit_price_minor: 10_00,
                        display_order: 1,
                        weight: 0,
                    },
                ],
            },
            now,
        )?;

        bundle.publish(now)?;
        repository.insert(bundle.clone()).await?;

        Ok(bundle)
    }

    #[tokio::test]
    async fn fixed_discount_is_distributed_exactly() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(&repository, DiscountConfig::Fixed { price_minor: 35_00 }).await?;
        let mut lines = expand_bundle(&bundle, 1, now)?;

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        assert_eq!(outcome.anomalies, 0);
        assert_eq!(outcome.groups.len(), 1);

        let adjustments: Vec<i64> = lines
            .iter()
            .filter(|l| !l.is_bundle_header())
            .filter_map(|l| l.bundle.as_ref().map(|m| m.adj_amount_minor))
            .collect();

        assert_eq!(adjustments, vec![3_75, 1_25]);
        assert_eq!(adjustments.iter().sum::<i64>(), 5_00);

        let summary = outcome.groups.first();
        assert!(
            summary.is_some_and(|s| s.discount == Money::from_minor(5_00, iso::USD)
                && s.total == Money::from_minor(35_00, iso::USD)),
            "unexpected summary {summary:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn recalculation_is_deterministic() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(&repository, DiscountConfig::Fixed { price_minor: 33_33 }).await?;

        let mut first = expand_bundle(&bundle, 2, now)?;
        let mut second = first.clone();

        apply_bundle_adjustments(&repository, &mut first, now).await?;
        apply_bundle_adjustments(&repository, &mut second, now).await?;

        let metas = |lines: &[OrderLine]| -> Vec<(i64, Option<Decimal>)> {
            lines
                .iter()
                .filter_map(|l| l.bundle.as_ref().map(|m| (m.adj_amount_minor, m.share)))
                .collect()
        };

        assert_eq!(metas(&first), metas(&second));

        Ok(())
    }

    #[tokio::test]
    async fn group_without_header_is_skipped_and_logged() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(&repository, DiscountConfig::Fixed { price_minor: 35_00 }).await?;
        let mut lines = expand_bundle(&bundle, 1, now)?;

        lines.retain(|l| !l.is_bundle_header());

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        assert_eq!(outcome.anomalies, 1);
        assert!(outcome.groups.is_empty());
        assert!(
            lines
                .iter()
                .all(|l| l.bundle.as_ref().is_some_and(|m| m.adj_amount_minor == 0)),
            "anomalous group must be left unadjusted"
        );

        Ok(())
    }

    #[tokio::test]
    async fn unknown_bundle_is_an_anomaly_not_a_failure() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(&repository, DiscountConfig::Fixed { price_minor: 35_00 }).await?;
        let mut lines = expand_bundle(&bundle, 1, now)?;

        // Point the whole group at a bundle that does not exist.
        for line in &mut lines {
            if let Some(meta) = line.bundle.as_mut() {
                meta.bundle_uuid = BundleUuid::new();
            }
        }

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        assert_eq!(outcome.anomalies, 1);

        Ok(())
    }

    #[tokio::test]
    async fn one_bad_group_does_not_block_a_good_one() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(&repository, DiscountConfig::Fixed { price_minor: 35_00 }).await?;

        let mut lines = expand_bundle(&bundle, 1, now)?;
        let mut broken = expand_bundle(&bundle, 1, now)?;
        broken.retain(|l| !l.is_bundle_header());
        lines.extend(broken);

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        assert_eq!(outcome.anomalies, 1);
        assert_eq!(outcome.groups.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn percent_discount_recomputes_against_current_prices() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(
            &repository,
            DiscountConfig::PercentOff {
                percent: Decimal::from(10),
            },
        )
        .await?;

        let mut lines = expand_bundle(&bundle, 1, now)?;

        // The $30 component was repriced to $50 after add-to-cart.
        if let Some(line) = lines.iter_mut().find(|l| l.unit_price_minor == 30_00) {
            line.unit_price_minor = 50_00;
        }

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        // 10% of the current $60 subtotal, not the $40 snapshot.
        let total: i64 = lines
            .iter()
            .filter_map(|l| l.bundle.as_ref().map(|m| m.adj_amount_minor))
            .sum();

        assert_eq!(total, 6_00);
        assert_eq!(outcome.anomalies, 0);

        Ok(())
    }

    #[tokio::test]
    async fn zero_priced_group_is_degenerate_with_zero_discount() -> TestResult {
        let repository = InMemoryBundleRepository::new();
        let now = Timestamp::now();

        let bundle = seeded_bundle(
            &repository,
            DiscountConfig::PercentOff {
                percent: Decimal::from(50),
            },
        )
        .await?;

        let mut lines = expand_bundle(&bundle, 1, now)?;

        for line in &mut lines {
            line.unit_price_minor = 0;
        }

        let outcome = apply_bundle_adjustments(&repository, &mut lines, now).await?;

        assert_eq!(outcome.anomalies, 0);
        assert!(outcome.groups.first().is_some_and(|s| s.degenerate));
        assert!(
            lines
                .iter()
                .all(|l| l.bundle.as_ref().is_some_and(|m| m.adj_amount_minor == 0)),
            "degenerate group distributes zero to every line"
        );

        Ok(())
    }
}
