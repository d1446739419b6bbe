//! Adjustment rule registration.
//!
//! Hosts keep promotion rules in their own storage; [`PromotionRegistry`] is
//! the seam. [`ensure_bundle_rule`] is the deterministic bootstrap step that
//! replaces fire-and-forget startup registration: it is safe to call on
//! every boot and leaves exactly one rule row.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::info;

use crate::promotion::BUNDLE_RULE_CODE;

/// A promotion rule row, identified by its well-known code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentRule {
    /// Globally-unique identifying code.
    pub code: String,
    /// Human-readable description for the admin UI.
    pub description: String,
    /// Disabled rules are kept but not applied.
    pub enabled: bool,
    /// When the rule row was first created.
    pub created_at: Timestamp,
}

impl AdjustmentRule {
    /// The bundle distribution rule as first created.
    #[must_use]
    pub fn bundle_distribution(now: Timestamp) -> Self {
        Self {
            code: BUNDLE_RULE_CODE.to_owned(),
            description: "Distributes bundle discounts across component order lines".to_owned(),
            enabled: true,
            created_at: now,
        }
    }
}

/// Registry storage failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A rule with this code already exists. `ensure_bundle_rule` treats
    /// this as success.
    #[error("promotion rule code already registered")]
    Duplicate,

    /// Anything else the backend raised.
    #[error("promotion registry storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Storage for promotion rule rows.
#[automock]
#[async_trait]
pub trait PromotionRegistry: Send + Sync {
    /// Looks a rule up by its code.
    async fn find(&self, code: String) -> Result<Option<AdjustmentRule>, RegistryError>;

    /// Inserts a new rule; [`RegistryError::Duplicate`] if the code exists.
    async fn insert(&self, rule: AdjustmentRule) -> Result<(), RegistryError>;
}

/// Idempotently creates the bundle distribution rule.
///
/// Called once during system bootstrap, after storage is ready; calling it
/// again is a no-op returning the existing rule. A concurrent bootstrap
/// losing the insert race falls back to reading the winner's row.
///
/// # Errors
///
/// Returns [`RegistryError::Storage`] when the registry backend fails.
pub async fn ensure_bundle_rule<P: PromotionRegistry + ?Sized>(
    registry: &P,
    now: Timestamp,
) -> Result<AdjustmentRule, RegistryError> {
    if let Some(existing) = registry.find(BUNDLE_RULE_CODE.to_owned()).await? {
        return Ok(existing);
    }

    let rule = AdjustmentRule::bundle_distribution(now);

    match registry.insert(rule.clone()).await {
        Ok(()) => {
            info!(code = BUNDLE_RULE_CODE, "registered bundle distribution rule");
            Ok(rule)
        }
        Err(RegistryError::Duplicate) => {
            // Lost the race to another bootstrap; the winner's row stands.
            registry
                .find(BUNDLE_RULE_CODE.to_owned())
                .await?
                .ok_or(RegistryError::Duplicate)
        }
        Err(error) => Err(error),
    }
}

/// Registry held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPromotionRegistry {
    rules: RwLock<FxHashMap<String, AdjustmentRule>>,
}

impl InMemoryPromotionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rules.
    pub fn rule_count(&self) -> usize {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl PromotionRegistry for InMemoryPromotionRegistry {
    async fn find(&self, code: String) -> Result<Option<AdjustmentRule>, RegistryError> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        Ok(rules.get(&code).cloned())
    }

    async fn insert(&self, rule: AdjustmentRule) -> Result<(), RegistryError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);

        if rules.contains_key(&rule.code) {
            return Err(RegistryError::Duplicate);
        }

        rules.insert(rule.code.clone(), rule);

        Ok(())
    }
}
