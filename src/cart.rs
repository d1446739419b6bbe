//! Cart expansion.
//!
//! The storefront adds a bundle to the cart as one header line plus one line
//! per component, all tagged with a fresh [`BundleKey`]. The host's
//! order-line creation consumes the expanded lines; the discount itself is
//! applied later, at order price recalculation, by
//! [`crate::promotion::apply_bundle_adjustments`].

use jiff::Timestamp;
use thiserror::Error;

use crate::{
    bundles::{Bundle, BundleStatus},
    orders::{BundleKey, BundleLineMeta, OrderLine, OrderLineUuid},
};

/// Errors rejecting a bundle add-to-cart request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// Only ACTIVE bundles can be added to a cart.
    #[error("bundle is {0}, only ACTIVE bundles can be added to a cart")]
    NotActive(BundleStatus),

    /// The bundle's validity window does not cover the current instant.
    #[error("bundle is outside its validity window")]
    OutsideWindow,

    /// Zero bundles requested.
    #[error("bundle quantity must be positive")]
    ZeroQuantity,

    /// A bundle with no components expands to nothing useful.
    #[error("bundle has no components")]
    NoComponents,
}

/// Expands `quantity` instances of a bundle into order lines.
///
/// The first line is the header (zero-priced, carrying the bundle identity);
/// the rest are component lines in display order, each with quantity
/// `component_qty x quantity` and the component's snapshot unit price. All
/// lines share one fresh [`BundleKey`].
///
/// # Errors
///
/// Returns [`CartError`] if the bundle is not ACTIVE, its window does not
/// contain `now`, `quantity` is zero, or the bundle has no components.
pub fn expand_bundle(
    bundle: &Bundle,
    quantity: u32,
    now: Timestamp,
) -> Result<Vec<OrderLine>, CartError> {
    if bundle.status != BundleStatus::Active {
        return Err(CartError::NotActive(bundle.status));
    }

    if !bundle.window.contains(now) {
        return Err(CartError::OutsideWindow);
    }

    if quantity == 0 {
        return Err(CartError::ZeroQuantity);
    }

    if bundle.items.is_empty() {
        return Err(CartError::NoComponents);
    }

    let bundle_key = BundleKey::new();

    let mut lines = Vec::with_capacity(bundle.items.len() + 1);

    lines.push(OrderLine {
        uuid: OrderLineUuid::new(),
        quantity,
        unit_price_minor: 0,
        currency: bundle.currency,
        bundle: Some(BundleLineMeta::unadjusted(
            bundle_key,
            bundle.uuid,
            bundle.name.clone(),
            bundle.version,
            true,
            0,
            0,
        )),
    });

    for item in &bundle.items {
        lines.push(OrderLine {
            uuid: OrderLineUuid::new(),
            quantity: item.quantity * quantity,
            unit_price_minor: item.unit_price_minor,
            currency: bundle.currency,
            bundle: Some(BundleLineMeta::unadjusted(
                bundle_key,
                bundle.uuid,
                bundle.name.clone(),
                bundle.version,
                false,
                item.quantity,
                item.unit_price_minor,
            )),
        });
    }

    Ok(lines)
}
