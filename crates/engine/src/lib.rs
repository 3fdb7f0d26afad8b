//! Whitelist eligibility engine.
//!
//! This crate implements the deterministic whitelist rule:
//! - The state must be one of `Human`, `Verified`, `Newbie`
//! - The stake must be at least the configured minimum (10,000 iDNA by default)
//! - When both fail, the state reason wins
//!
//! Evaluation is a pure function of `(policy, record)`: no I/O, no shared state, safe to
//! call from any number of tasks at once.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use whitelist_core::{IdentityRecord, IdentityState, Stake, DEFAULT_MIN_STAKE_IDNA};

/// Eligibility parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    /// Minimum stake (inclusive).
    pub min_stake: Stake,
}

impl EligibilityPolicy {
    /// Policy with an explicit minimum stake.
    pub const fn new(min_stake: Stake) -> Self {
        Self { min_stake }
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::new(Stake::from_idna(DEFAULT_MIN_STAKE_IDNA))
    }
}

/// Why an address is or is not eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// All conditions hold.
    Eligible,
    /// Known state outside the eligible set.
    IneligibleState(IdentityState),
    /// State outside the known vocabulary.
    UnrecognizedState(String),
    /// Eligible state, stake below the minimum.
    InsufficientStake {
        /// Stake held.
        stake: Stake,
        /// Minimum required.
        minimum: Stake,
    },
    /// The address is not in the identity store.
    NotFound,
}

impl Reason {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Reason::Eligible => "eligible",
            Reason::IneligibleState(_) => "ineligible_state",
            Reason::UnrecognizedState(_) => "unrecognized_state",
            Reason::InsufficientStake { .. } => "insufficient_stake",
            Reason::NotFound => "not_found",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Eligible => f.write_str("Eligible"),
            Reason::IneligibleState(state) => write!(f, "Ineligible state: {}", state),
            Reason::UnrecognizedState(raw) => write!(f, "Unrecognized state: {}", raw),
            Reason::InsufficientStake { stake, minimum } => write!(
                f,
                "Insufficient stake: {} iDNA (minimum {})",
                stake.to_fixed_2(),
                minimum.to_grouped_whole()
            ),
            Reason::NotFound => f.write_str("Address not found in database"),
        }
    }
}

/// Structured eligibility outcome. Never a bare boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    /// Whether the address belongs on the whitelist.
    pub eligible: bool,
    /// Explanation.
    pub reason: Reason,
}

impl Eligibility {
    fn with(reason: Reason) -> Self {
        Self {
            eligible: matches!(reason, Reason::Eligible),
            reason,
        }
    }
}

impl Serialize for Eligibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Eligibility", 3)?;
        s.serialize_field("eligible", &self.eligible)?;
        s.serialize_field("reason_code", self.reason.code())?;
        s.serialize_field("reason", &self.reason.to_string())?;
        s.end()
    }
}

fn state_reason(state: &IdentityState) -> Option<Reason> {
    match state {
        IdentityState::Human | IdentityState::Verified | IdentityState::Newbie => None,
        IdentityState::Unrecognized(raw) => Some(Reason::UnrecognizedState(raw.clone())),
        other => Some(Reason::IneligibleState(other.clone())),
    }
}

/// Evaluate one identity record.
pub fn evaluate(policy: &EligibilityPolicy, record: &IdentityRecord) -> Eligibility {
    if let Some(reason) = state_reason(&record.state) {
        return Eligibility::with(reason);
    }

    if record.stake < policy.min_stake {
        return Eligibility::with(Reason::InsufficientStake {
            stake: record.stake,
            minimum: policy.min_stake,
        });
    }

    Eligibility::with(Reason::Eligible)
}

/// Evaluate a store lookup, mapping absence to [`Reason::NotFound`].
pub fn evaluate_lookup(policy: &EligibilityPolicy, record: Option<&IdentityRecord>) -> Eligibility {
    match record {
        Some(record) => evaluate(policy, record),
        None => Eligibility::with(Reason::NotFound),
    }
}

/// Shorthand for `evaluate(policy, record).eligible`.
pub fn is_eligible(policy: &EligibilityPolicy, record: &IdentityRecord) -> bool {
    evaluate(policy, record).eligible
}
