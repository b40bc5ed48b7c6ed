//! Transition policy
//!
//! A pure finite-state machine evaluating `(role, from, action)` against a
//! rule set loaded from a [`RuleSource`]. Rules are ordered by descending
//! priority with declaration order kept for ties; the first exact match
//! wins. There are no wildcards.
//!
//! The active rule set sits behind an atomically swapped handle: readers
//! clone an `Arc` and evaluate without holding any lock, and
//! [`TransitionPolicy::reload`] replaces the handle only when the new rules
//! load cleanly.
//!
//! # Example
//!
//! ```
//! use toq_shared::policy::{ActionFinished, TransitionPolicy, YamlStrSource};
//! use toq_shared::models::{RoleSlug, RoleStatus};
//!
//! let policy = TransitionPolicy::load(Box::new(YamlStrSource::builtin())).unwrap();
//! let t = policy
//!     .evaluate(RoleSlug::Realtor, RoleStatus::PendingImages, ActionFinished::CreciImagesUploaded)
//!     .unwrap();
//! assert_eq!(t.to, RoleStatus::PendingManual);
//! assert!(t.changed);
//! ```

pub mod kinds;
pub mod rules;

pub use kinds::{ActionFinished, NotificationKind};
pub use rules::{parse_rules_yaml, RuleSource, TransitionRule, YamlFileSource, YamlStrSource};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::models::{RoleSlug, RoleStatus};

/// Policy errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("no transition rule for ({role}, {from}, {action})")]
    NoRule {
        role: RoleSlug,
        from: RoleStatus,
        action: ActionFinished,
    },

    #[error("invalid rule at index {index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("failed to parse rules: {0}")]
    Parse(String),

    #[error("failed to read rule source: {0}")]
    Source(String),
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: RoleStatus,
    pub notification: NotificationKind,
    /// `to != from`
    pub changed: bool,
}

type RuleKey = (RoleSlug, RoleStatus, ActionFinished);

#[derive(Debug, Default)]
struct RuleSet {
    rules: Vec<TransitionRule>,
    index: HashMap<RuleKey, usize>,
}

impl RuleSet {
    fn build(mut rules: Vec<TransitionRule>) -> Self {
        // sort_by is stable, equal priorities keep declaration order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut index = HashMap::with_capacity(rules.len());
        for (position, rule) in rules.iter().enumerate() {
            index
                .entry((rule.role, rule.from, rule.action))
                .or_insert(position);
        }

        Self { rules, index }
    }
}

/// Rule-driven onboarding state machine
pub struct TransitionPolicy {
    source: Box<dyn RuleSource>,
    current: RwLock<Arc<RuleSet>>,
}

impl std::fmt::Debug for TransitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionPolicy")
            .field("source", &self.source.describe())
            .field("rules", &self.snapshot().rules.len())
            .finish()
    }
}

impl TransitionPolicy {
    /// Loads the initial rule set
    ///
    /// # Errors
    ///
    /// Fails if the source cannot be read or any row is invalid.
    pub fn load(source: Box<dyn RuleSource>) -> Result<Self, PolicyError> {
        let rules = source.load()?;
        info!(source = %source.describe(), rules = rules.len(), "Transition rules loaded");

        Ok(Self {
            source,
            current: RwLock::new(Arc::new(RuleSet::build(rules))),
        })
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Evaluates `(role, from, action)`
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::NoRule` iff no rule matches the exact triple.
    pub fn evaluate(
        &self,
        role: RoleSlug,
        from: RoleStatus,
        action: ActionFinished,
    ) -> Result<Transition, PolicyError> {
        let set = self.snapshot();
        let rule = set
            .index
            .get(&(role, from, action))
            .and_then(|&position| set.rules.get(position))
            .ok_or(PolicyError::NoRule { role, from, action })?;

        Ok(Transition {
            to: rule.to,
            notification: rule.notification,
            changed: rule.to != from,
        })
    }

    /// Re-reads the source and swaps the rule set; the previous set is kept
    /// on failure.
    pub fn reload(&self) -> Result<usize, PolicyError> {
        let rules = match self.source.load() {
            Ok(rules) => rules,
            Err(e) => {
                warn!(source = %self.source.describe(), error = %e, "Transition rules reload failed, keeping previous set");
                return Err(e);
            }
        };

        let count = rules.len();
        let next = Arc::new(RuleSet::build(rules));
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }

        info!(source = %self.source.describe(), rules = count, "Transition rules reloaded");
        Ok(count)
    }

    /// Copy of the active rules in evaluation order
    pub fn rules(&self) -> Vec<TransitionRule> {
        self.snapshot().rules.clone()
    }
}
