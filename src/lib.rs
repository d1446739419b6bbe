//! Sheaf
//!
//! Sheaf is a bundle lifecycle and discount-allocation engine: it owns the
//! bundle entity and its status state machine, distributes bundle-level
//! discounts across component order lines with exact largest-remainder
//! reconciliation, validates bundle integrity against the host's variant
//! catalog, and provides the single idempotently-registered promotion rule
//! that applies the distribution at order price recalculation.
//!
//! The host commerce platform supplies storage ([`bundles::repository`]),
//! the variant catalog ([`catalog`]) and the order pipeline; this crate
//! supplies the business rules.

pub mod allocation;
pub mod bundles;
pub mod cart;
pub mod catalog;
pub mod ids;
pub mod integrity;
pub mod orders;
pub mod prelude;
pub mod promotion;
