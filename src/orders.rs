//! Order lines and bundle metadata.
//!
//! The host's order pipeline owns order lines; this crate defines the typed
//! bundle metadata attached to each line that belongs to a bundle, replacing
//! the loose key-value custom-field bag a host framework would otherwise
//! offer. All lines produced by one "add bundle to cart" action share a
//! [`BundleKey`].

use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use serde::{Deserialize, Serialize};

use crate::{bundles::BundleUuid, ids::TypedUuid};

/// Order line UUID.
pub type OrderLineUuid = TypedUuid<OrderLine>;

/// Opaque correlation id shared by all order lines produced from one
/// add-bundle-to-cart expansion.
pub type BundleKey = TypedUuid<BundleLineMeta>;

/// Bundle metadata attached to one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLineMeta {
    /// Correlation id for this expansion instance.
    pub bundle_key: BundleKey,
    /// The bundle this line came from.
    pub bundle_uuid: BundleUuid,
    /// Bundle name snapshot, for receipts.
    pub bundle_name: String,
    /// `Bundle::version` at add-to-cart time, for auditability. Discounts
    /// recompute against the current bundle, not this snapshot.
    pub bundle_version: u64,
    /// True on the single header line of the group.
    pub is_header: bool,
    /// Units of this component per single bundle.
    pub component_qty: u32,
    /// Unit price before any bundle adjustment, in minor units.
    pub base_unit_price_minor: i64,
    /// Unit price after the bundle adjustment, in minor units. Derived for
    /// display; the exact adjustment is `adj_amount_minor` on the line total.
    pub effective_unit_price_minor: i64,
    /// Effective percentage discount applied to this line.
    pub pct_applied: Option<Decimal>,
    /// This line's slice of the bundle discount, in minor units, applied to
    /// the line total. Per bundle key, these sum exactly to the bundle
    /// discount.
    pub adj_amount_minor: i64,
    /// This line's fractional share of the bundle subtotal.
    pub share: Option<Decimal>,
}

impl BundleLineMeta {
    /// Metadata for a freshly expanded line: no adjustment applied yet.
    #[must_use]
    pub fn unadjusted(
        bundle_key: BundleKey,
        bundle_uuid: BundleUuid,
        bundle_name: String,
        bundle_version: u64,
        is_header: bool,
        component_qty: u32,
        unit_price_minor: i64,
    ) -> Self {
        Self {
            bundle_key,
            bundle_uuid,
            bundle_name,
            bundle_version,
            is_header,
            component_qty,
            base_unit_price_minor: unit_price_minor,
            effective_unit_price_minor: unit_price_minor,
            pct_applied: None,
            adj_amount_minor: 0,
            share: None,
        }
    }
}

/// One order line, as the promotion hook sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    /// Identifier.
    pub uuid: OrderLineUuid,
    /// Units ordered. For bundle component lines this already includes the
    /// bundle quantity.
    pub quantity: u32,
    /// Unit price in minor units.
    pub unit_price_minor: i64,
    /// Currency the line is priced in.
    pub currency: &'static Currency,
    /// Bundle membership, if any.
    pub bundle: Option<BundleLineMeta>,
}

impl OrderLine {
    /// Pre-adjustment line total in minor units.
    #[must_use]
    pub fn total_minor(&self) -> i64 {
        self.unit_price_minor * i64::from(self.quantity)
    }

    /// Line total after the bundle adjustment, in minor units.
    #[must_use]
    pub fn effective_total_minor(&self) -> i64 {
        let adjustment = self.bundle.as_ref().map_or(0, |meta| meta.adj_amount_minor);

        self.total_minor() - adjustment
    }

    /// Whether this line is the header of a bundle group.
    #[must_use]
    pub fn is_bundle_header(&self) -> bool {
        self.bundle.as_ref().is_some_and(|meta| meta.is_header)
    }
}

/// Receipt-level summary of one priced bundle group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary<'a> {
    /// The group's correlation id.
    pub bundle_key: BundleKey,
    /// Bundle name snapshot from the header line.
    pub bundle_name: String,
    /// Pre-discount component subtotal.
    pub subtotal: Money<'a, Currency>,
    /// Discount distributed across the group.
    pub discount: Money<'a, Currency>,
    /// Post-discount total.
    pub total: Money<'a, Currency>,
    /// True when the group's subtotal was zero and the discount was forced
    /// to zero.
    pub degenerate: bool,
}

impl GroupSummary<'_> {
    /// Builds a summary from minor-unit figures in the group's currency.
    #[must_use]
    pub fn from_minor(
        bundle_key: BundleKey,
        bundle_name: String,
        subtotal_minor: i64,
        discount_minor: i64,
        currency: &'static Currency,
        degenerate: bool,
    ) -> Self {
        GroupSummary {
            bundle_key,
            bundle_name,
            subtotal: Money::from_minor(subtotal_minor, currency),
            discount: Money::from_minor(discount_minor, currency),
            total: Money::from_minor(subtotal_minor - discount_minor, currency),
            degenerate,
        }
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso;

    use super::*;

    fn component_line(adj_amount_minor: i64) -> OrderLine {
        let mut meta = BundleLineMeta::unadjusted(
            BundleKey::new(),
            BundleUuid::new(),
            "Snack Box".into(),
            3,
            false,
            2,
            4_50,
        );
        meta.adj_amount_minor = adj_amount_minor;

        OrderLine {
            uuid: OrderLineUuid::new(),
            quantity: 2,
            unit_price_minor: 4_50,
            currency: iso::GBP,
            bundle: Some(meta),
        }
    }

    #[test]
    fn effective_total_subtracts_the_line_adjustment() {
        let line = component_line(1_00);

        assert_eq!(line.total_minor(), 9_00);
        assert_eq!(line.effective_total_minor(), 8_00);
    }

    #[test]
    fn unadjusted_meta_has_no_discount_applied() {
        let meta = BundleLineMeta::unadjusted(
            BundleKey::new(),
            BundleUuid::new(),
            "Snack Box".into(),
            1,
            false,
            1,
            4_50,
        );

        assert_eq!(meta.adj_amount_minor, 0);
        assert_eq!(meta.effective_unit_price_minor, meta.base_unit_price_minor);
        assert!(meta.pct_applied.is_none());
        assert!(meta.share.is_none());
    }

    #[test]
    fn group_summary_totals_reconcile() {
        let summary = GroupSummary::from_minor(
            BundleKey::new(),
            "Snack Box".into(),
            40_00,
            5_00,
            iso::GBP,
            false,
        );

        assert_eq!(summary.subtotal, Money::from_minor(40_00, iso::GBP));
        assert_eq!(summary.discount, Money::from_minor(5_00, iso::GBP));
        assert_eq!(summary.total, Money::from_minor(35_00, iso::GBP));
    }

    #[test]
    fn meta_serializes_and_deserializes() {
        let meta = BundleLineMeta::unadjusted(
            BundleKey::new(),
            BundleUuid::new(),
            "Snack Box".into(),
            7,
            true,
            0,
            0,
        );

        let json = serde_json::to_string(&meta).unwrap_or_default();
        let back: BundleLineMeta = serde_json::from_str(&json).unwrap_or_else(|_| meta.clone());

        assert_eq!(back, meta);
    }
}
