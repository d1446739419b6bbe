//! Bundles
//!
//! A bundle is a named, priced grouping of product variants sold as a single
//! discounted unit. This module owns the bundle aggregate (the bundle plus
//! its exclusively-owned component items), its discount configuration and its
//! lifecycle, with storage behind [`repository::BundleRepository`] and the
//! admin-facing operations on [`service::BundlesService`].

use jiff::Timestamp;
use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use rusty_money::iso::Currency;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{catalog::VariantUuid, ids::TypedUuid};

pub mod memory;
pub mod repository;
pub mod service;
pub mod status;

pub use status::{BundleStatus, TransitionError};

/// Bundle UUID.
pub type BundleUuid = TypedUuid<Bundle>;

/// Errors raised while constructing or editing a bundle's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleConfigError {
    /// Percent-off discounts must lie in the closed range 0..=100.
    #[error("percent-off must be between 0 and 100, got {0}")]
    PercentOutOfRange(Decimal),

    /// Fixed bundle prices must be strictly positive.
    #[error("fixed bundle price must be positive, got {0} minor units")]
    NonPositiveFixedPrice(i64),

    /// `valid_from` must precede `valid_to` when both are set.
    #[error("validity window is empty: valid_from {from} is not before valid_to {to}")]
    EmptyWindow {
        /// Start of the rejected window.
        from: Timestamp,
        /// End of the rejected window.
        to: Timestamp,
    },

    /// Slugs identify bundles in storefront URLs and cannot be blank.
    #[error("bundle slug cannot be empty")]
    EmptySlug,

    /// A component with zero quantity contributes nothing and is a data error.
    #[error("bundle item for variant {0} has zero quantity")]
    ZeroQuantity(VariantUuid),
}

/// How the bundle's discount is configured.
///
/// The enum makes the "exactly one of fixed price / percent off" invariant
/// unrepresentable as invalid data; a bundle with no discount type cannot be
/// constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountConfig {
    /// The whole bundle sells for this price in minor units; the discount is
    /// the gap between the component subtotal and this price.
    Fixed {
        /// Bundle price in the currency's minor unit.
        price_minor: i64,
    },

    /// A percentage off the bundle's current component subtotal.
    #[serde(rename = "percent")]
    PercentOff {
        /// Percentage in the closed range 0..=100.
        percent: Decimal,
    },
}

impl DiscountConfig {
    /// Checks the configuration's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`BundleConfigError::PercentOutOfRange`] or
    /// [`BundleConfigError::NonPositiveFixedPrice`].
    pub fn validate(&self) -> Result<(), BundleConfigError> {
        match *self {
            Self::Fixed { price_minor } if price_minor <= 0 => {
                Err(BundleConfigError::NonPositiveFixedPrice(price_minor))
            }
            Self::PercentOff { percent }
                if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED =>
            {
                Err(BundleConfigError::PercentOutOfRange(percent))
            }
            _ => Ok(()),
        }
    }

    /// Resolves the bundle-level discount in minor units against the current
    /// pre-discount subtotal.
    ///
    /// Percent discounts are always computed against the subtotal passed in,
    /// never against a snapshot, so price changes between bundle versions
    /// recompute naturally. The result is clamped to `0..=subtotal_minor`.
    #[must_use]
    pub fn resolve_minor(&self, subtotal_minor: i64) -> i64 {
        if subtotal_minor <= 0 {
            return 0;
        }

        let raw = match *self {
            Self::Fixed { price_minor } => subtotal_minor.saturating_sub(price_minor),
            Self::PercentOff { percent } => percent_of_minor(percent, subtotal_minor),
        };

        raw.clamp(0, subtotal_minor)
    }
}

/// Discount amount in minor units for a percentage of a minor-unit subtotal,
/// rounded midpoint-away-from-zero.
fn percent_of_minor(percent: Decimal, minor: i64) -> i64 {
    let Some(minor) = Decimal::from_i64(minor) else {
        return 0;
    };

    let Some(applied) = percent.checked_mul(minor) else {
        return 0;
    };

    (applied / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Optional validity window for an ACTIVE bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// The bundle applies from this instant, if set.
    pub from: Option<Timestamp>,
    /// The bundle stops applying after this instant, if set.
    pub to: Option<Timestamp>,
}

impl ValidityWindow {
    /// A window with no bounds: always applicable.
    pub const UNBOUNDED: Self = Self { from: None, to: None };

    /// Checks that `from` precedes `to` when both bounds are set.
    ///
    /// # Errors
    ///
    /// Returns [`BundleConfigError::EmptyWindow`] for an empty window.
    pub fn validate(&self) -> Result<(), BundleConfigError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from >= to => {
                Err(BundleConfigError::EmptyWindow { from, to })
            }
            _ => Ok(()),
        }
    }

    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: Timestamp) -> bool {
        self.from.is_none_or(|from| from <= now) && self.to.is_none_or(|to| now <= to)
    }

    /// Whether the window has closed at `now`.
    #[must_use]
    pub fn expired_at(&self, now: Timestamp) -> bool {
        self.to.is_some_and(|to| to < now)
    }
}

/// One component of a bundle: a variant reference with quantity and a unit
/// price snapshot taken when the component was configured.
///
/// Bundle items are exclusively owned by their bundle and deleted with it;
/// the referenced variant is restrict-delete (see
/// [`crate::bundles::service::BundlesService::can_delete_variant`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleItem {
    /// The referenced product variant.
    pub variant: VariantUuid,
    /// Units of this variant per single bundle.
    pub quantity: u32,
    /// Unit price snapshot in minor units.
    pub unit_price_minor: i64,
    /// Position in admin and storefront listings; also the allocator's
    /// tie-break order.
    pub display_order: u32,
    /// Relative weight for merchandising; carried, not interpreted here.
    pub weight: u32,
}

impl BundleItem {
    /// This component's pre-discount subtotal per single bundle.
    #[must_use]
    pub fn subtotal_minor(&self) -> i64 {
        self.unit_price_minor * i64::from(self.quantity)
    }
}

/// The bundle aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Identifier.
    pub uuid: BundleUuid,
    /// Display name.
    pub name: String,
    /// Unique storefront slug.
    pub slug: String,
    /// Lifecycle state.
    pub status: BundleStatus,
    /// Discount configuration.
    pub discount: DiscountConfig,
    /// Currency all of this bundle's prices are denominated in.
    pub currency: &'static Currency,
    /// Optional validity window.
    pub window: ValidityWindow,
    /// Monotonic counter, incremented on every edit. Used for optimistic
    /// concurrency and snapshotted onto order lines for auditability.
    pub version: u64,
    /// Why the bundle is BROKEN, when it is.
    pub broken_reason: Option<String>,
    /// When the discount was last redistributed for an order.
    pub last_recomputed_at: Option<Timestamp>,
    /// Components, ordered by `display_order`.
    pub items: Vec<BundleItem>,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last edit instant.
    pub updated_at: Timestamp,
}

/// Input for creating a bundle.
#[derive(Debug, Clone)]
pub struct NewBundle {
    /// Display name.
    pub name: String,
    /// Unique storefront slug.
    pub slug: String,
    /// Discount configuration.
    pub discount: DiscountConfig,
    /// Currency for all prices in the bundle.
    pub currency: &'static Currency,
    /// Optional validity window.
    pub window: ValidityWindow,
    /// Components.
    pub items: Vec<NewBundleItem>,
}

/// Input for one component of a new bundle.
#[derive(Debug, Clone)]
pub struct NewBundleItem {
    /// The referenced product variant.
    pub variant: VariantUuid,
    /// Units per single bundle.
    pub quantity: u32,
    /// Unit price snapshot in minor units.
    pub unit_price_minor: i64,
    /// Listing position.
    pub display_order: u32,
    /// Merchandising weight.
    pub weight: u32,
}

/// Partial update applied to an existing bundle.
///
/// `None` fields are left unchanged. Replacing the component list replaces it
/// wholesale; bundle items have no identity of their own.
#[derive(Debug, Clone, Default)]
pub struct BundleUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New slug.
    pub slug: Option<String>,
    /// New discount configuration.
    pub discount: Option<DiscountConfig>,
    /// New validity window.
    pub window: Option<ValidityWindow>,
    /// Replacement component list.
    pub items: Option<Vec<NewBundleItem>>,
}

impl Bundle {
    /// Builds a new DRAFT bundle at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`BundleConfigError`] if the slug is empty, the discount
    /// configuration is inconsistent, the window is empty, or any component
    /// has zero quantity.
    pub fn create(new: NewBundle, now: Timestamp) -> Result<Self, BundleConfigError> {
        if new.slug.trim().is_empty() {
            return Err(BundleConfigError::EmptySlug);
        }

        new.discount.validate()?;
        new.window.validate()?;

        let mut items: Vec<BundleItem> = new
            .items
            .into_iter()
            .map(|item| {
                if item.quantity == 0 {
                    return Err(BundleConfigError::ZeroQuantity(item.variant));
                }

                Ok(BundleItem {
                    variant: item.variant,
                    quantity: item.quantity,
                    unit_price_minor: item.unit_price_minor,
                    display_order: item.display_order,
                    weight: item.weight,
                })
            })
            .collect::<Result<_, _>>()?;

        items.sort_by_key(|item| item.display_order);

        Ok(Self {
            uuid: BundleUuid::new(),
            name: new.name,
            slug: new.slug,
            status: BundleStatus::INITIAL,
            discount: new.discount,
            currency: new.currency,
            window: new.window,
            version: 1,
            broken_reason: None,
            last_recomputed_at: None,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a partial update, bumping the version.
    ///
    /// # Errors
    ///
    /// Returns [`BundleConfigError`] if any updated field is inconsistent.
    pub fn apply_update(&mut self, update: BundleUpdate, now: Timestamp) -> Result<(), BundleConfigError> {
        if let Some(slug) = &update.slug {
            if slug.trim().is_empty() {
                return Err(BundleConfigError::EmptySlug);
            }
        }

        if let Some(discount) = &update.discount {
            discount.validate()?;
        }

        if let Some(window) = &update.window {
            window.validate()?;
        }

        if let Some(name) = update.name {
            self.name = name;
        }

        if let Some(slug) = update.slug {
            self.slug = slug;
        }

        if let Some(discount) = update.discount {
            self.discount = discount;
        }

        if let Some(window) = update.window {
            self.window = window;
        }

        if let Some(items) = update.items {
            let mut replaced: Vec<BundleItem> = items
                .into_iter()
                .map(|item| {
                    if item.quantity == 0 {
                        return Err(BundleConfigError::ZeroQuantity(item.variant));
                    }

                    Ok(BundleItem {
                        variant: item.variant,
                        quantity: item.quantity,
                        unit_price_minor: item.unit_price_minor,
                        display_order: item.display_order,
                        weight: item.weight,
                    })
                })
                .collect::<Result<_, _>>()?;

            replaced.sort_by_key(|item| item.display_order);
            self.items = replaced;
        }

        self.touch(now);

        Ok(())
    }

    /// The bundle's pre-discount component subtotal per single bundle.
    #[must_use]
    pub fn subtotal_minor(&self) -> i64 {
        self.items.iter().map(BundleItem::subtotal_minor).sum()
    }

    /// Transitions DRAFT -> ACTIVE. Integrity must be validated first; the
    /// service enforces that.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the bundle is not in DRAFT.
    pub fn publish(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(BundleStatus::Active)?;
        self.broken_reason = None;
        self.touch(now);

        Ok(())
    }

    /// Transitions ACTIVE -> EXPIRED. Driven by the periodic sweep.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the bundle is not ACTIVE.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(BundleStatus::Expired)?;
        self.touch(now);

        Ok(())
    }

    /// Transitions ACTIVE -> BROKEN with the given reason.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the bundle is not ACTIVE.
    pub fn mark_broken(&mut self, reason: String, now: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(BundleStatus::Broken)?;
        self.broken_reason = Some(reason);
        self.touch(now);

        Ok(())
    }

    /// Transitions EXPIRED -> ACTIVE after the window was extended.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the bundle is not EXPIRED.
    pub fn restore(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(BundleStatus::Active)?;
        self.touch(now);

        Ok(())
    }

    /// Transitions any non-ARCHIVED state to ARCHIVED.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the bundle is already ARCHIVED.
    pub fn archive(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(BundleStatus::Archived)?;
        self.touch(now);

        Ok(())
    }

    fn touch(&mut self, now: Timestamp) {
        self.version += 1;
        self.updated_at = now;
    }
}
