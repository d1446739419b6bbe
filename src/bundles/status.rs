//! Bundle lifecycle states.
//!
//! The allowed transitions form a small fixed graph:
//!
//! ```text
//! DRAFT ──publish──▶ ACTIVE ──sweep──▶ EXPIRED
//!                      │  ▲               │
//!                      │  └───restore─────┘
//!                      ▼
//!                    BROKEN
//!
//! every non-ARCHIVED state ──▶ ARCHIVED (terminal)
//! ```
//!
//! Any edge outside this table is rejected with [`TransitionError`]; a
//! disallowed transition never silently no-ops.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleStatus {
    /// Being edited by an admin; not visible to the storefront.
    Draft,
    /// Published and eligible for discount application.
    Active,
    /// `valid_to` has passed; may be restored by extending the window.
    Expired,
    /// A referenced variant became invalid; carries a reason.
    Broken,
    /// Terminal retirement. No transitions leave this state.
    Archived,
}

/// Rejected status change, naming the offending edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid bundle status transition: {from} -> {to}")]
pub struct TransitionError {
    /// State the bundle was in.
    pub from: BundleStatus,
    /// State the caller asked for.
    pub to: BundleStatus,
}

impl BundleStatus {
    /// The entry state for every new bundle.
    pub const INITIAL: Self = Self::Draft;

    /// Whether the edge `self -> to` is in the allowed transition table.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Expired | Self::Broken)
                | (Self::Expired, Self::Active)
                | (
                    Self::Draft | Self::Active | Self::Expired | Self::Broken,
                    Self::Archived
                )
        )
    }

    /// Validates the edge `self -> to`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the edge is not in the allowed table.
    pub const fn transition_to(self, to: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    /// Whether no transitions leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived)
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Broken => "BROKEN",
            Self::Archived => "ARCHIVED",
        };

        f.write_str(name)
    }
}
