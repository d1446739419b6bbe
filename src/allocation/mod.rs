//! Discount allocation.
//!
//! Distributes a bundle-level discount across the bundle's component lines,
//! proportional to each line's contribution to the pre-discount subtotal,
//! with largest-remainder rounding so the per-line amounts reconcile exactly
//! to the bundle-level discount in integer minor units.
//!
//! The arithmetic is pure integer math over `i128` intermediates, so the
//! result is exact and deterministic for identical inputs. That determinism
//! is load-bearing: recomputation during order replay must reproduce the same
//! per-line amounts.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use thiserror::Error;

/// Errors for malformed allocator inputs.
///
/// Callers in the order-recalculation path treat these as anomalies to log
/// and skip, not as fatal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// There is nothing to distribute over.
    #[error("cannot allocate a discount over zero component lines")]
    NoLines,

    /// Discounts are non-negative by construction; a negative one is a bug
    /// upstream.
    #[error("total discount is negative: {0} minor units")]
    NegativeDiscount(i64),

    /// A component line with a negative subtotal is malformed input.
    #[error("component line {index} has negative subtotal {subtotal_minor}")]
    NegativeSubtotal {
        /// Index of the offending line.
        index: usize,
        /// Its subtotal in minor units.
        subtotal_minor: i64,
    },

    /// No line may receive more than its own subtotal, so the total discount
    /// cannot exceed the bundle subtotal.
    #[error("discount {discount_minor} exceeds bundle subtotal {subtotal_minor}")]
    DiscountExceedsSubtotal {
        /// The requested discount in minor units.
        discount_minor: i64,
        /// The bundle subtotal in minor units.
        subtotal_minor: i64,
    },
}

/// One component line as the allocator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentLine {
    /// The line's pre-discount subtotal in minor units
    /// (unit price x component quantity x bundle quantity).
    pub subtotal_minor: i64,
    /// Tie-break order for remainder distribution; lowest wins.
    pub display_order: u32,
}

/// Per-line result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAllocation {
    /// This line's discount in minor units.
    pub amount_minor: i64,
    /// This line's fractional share of the bundle subtotal.
    pub share: Decimal,
}

/// The full distribution for one bundle-key group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome {
    /// Per-line allocations, in input order.
    pub lines: SmallVec<[LineAllocation; 8]>,
    /// Total distributed, in minor units. Always the exact sum of the
    /// per-line amounts.
    pub total_minor: i64,
    /// True when the bundle subtotal was zero (all components free): every
    /// allocation is zero and the discount itself was forced to zero.
    pub degenerate: bool,
}

/// Distributes `discount_minor` across `lines` by the largest-remainder
/// method.
///
/// Each line's raw allocation is `floor(share x discount)`; the leftover
/// minor units are handed out one at a time to the lines with the largest
/// fractional remainders, ties broken by lowest `display_order`, then input
/// order. The per-line amounts always sum to exactly `discount_minor`, and
/// no line receives more than its own subtotal or a negative amount.
///
/// # Errors
///
/// Returns an [`AllocationError`] when `lines` is empty, the discount is
/// negative or exceeds the bundle subtotal, or any line subtotal is
/// negative. A zero bundle subtotal is not an error: it yields an
/// all-zero, `degenerate` outcome.
pub fn allocate(
    discount_minor: i64,
    lines: &[ComponentLine],
) -> Result<AllocationOutcome, AllocationError> {
    if lines.is_empty() {
        return Err(AllocationError::NoLines);
    }

    if discount_minor < 0 {
        return Err(AllocationError::NegativeDiscount(discount_minor));
    }

    for (index, line) in lines.iter().enumerate() {
        if line.subtotal_minor < 0 {
            return Err(AllocationError::NegativeSubtotal {
                index,
                subtotal_minor: line.subtotal_minor,
            });
        }
    }

    let subtotal: i128 = lines.iter().map(|line| i128::from(line.subtotal_minor)).sum();

    if subtotal == 0 {
        // All components free: force the discount to zero rather than divide
        // by zero, and flag the group as degenerate.
        return Ok(AllocationOutcome {
            lines: lines
                .iter()
                .map(|_| LineAllocation {
                    amount_minor: 0,
                    share: Decimal::ZERO,
                })
                .collect(),
            total_minor: 0,
            degenerate: true,
        });
    }

    if i128::from(discount_minor) > subtotal {
        return Err(AllocationError::DiscountExceedsSubtotal {
            discount_minor,
            subtotal_minor: clamp_to_i64(subtotal),
        });
    }

    let discount = i128::from(discount_minor);

    // floor(s_i * D / S) per line, with the exact fractional remainder
    // (s_i * D mod S) kept for the second pass.
    let mut amounts: SmallVec<[i64; 8]> = SmallVec::with_capacity(lines.len());
    let mut remainders: SmallVec<[(usize, i128, u32); 8]> = SmallVec::with_capacity(lines.len());
    let mut distributed: i128 = 0;

    for (index, line) in lines.iter().enumerate() {
        let numerator = i128::from(line.subtotal_minor) * discount;
        let raw = numerator / subtotal;

        distributed += raw;
        amounts.push(clamp_to_i64(raw));
        remainders.push((index, numerator % subtotal, line.display_order));
    }

    // Hand the leftover out one minor unit at a time, largest fractional
    // remainder first, ties by lowest display order, then input order.
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));

    let leftover = discount - distributed;

    for &(index, _, _) in remainders.iter().take(clamp_to_usize(leftover)) {
        if let Some(amount) = amounts.get_mut(index) {
            *amount += 1;
        }
    }

    let subtotal_dec = Decimal::from(clamp_to_i64(subtotal));

    Ok(AllocationOutcome {
        lines: lines
            .iter()
            .zip(&amounts)
            .map(|(line, &amount_minor)| LineAllocation {
                amount_minor,
                share: Decimal::from(line.subtotal_minor) / subtotal_dec,
            })
            .collect(),
        total_minor: discount_minor,
        degenerate: false,
    })
}

fn clamp_to_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn clamp_to_usize(value: i128) -> usize {
    usize::try_from(value).unwrap_or(0)
}
