//! Core types for the whitelist engine.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ADDRESS_HEX_LEN, STAKE_DECIMALS};
use crate::error::CoreError;

/// Atto units per whole iDNA (10^18).
const ATTO_PER_IDNA: u64 = 1_000_000_000_000_000_000;

/// A case-normalized identity address (`0x` followed by 40 lowercase hex digits).
///
/// Ordering is byte-lexicographic over the normalized form, which is the canonical
/// leaf order of the whitelist commitment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityAddress(String);

impl IdentityAddress {
    /// Parse and normalize an address.
    ///
    /// Accepts either case for the hex digits and the prefix; surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CoreError::InvalidAddress(input.to_string()))?;

        if digits.len() != ADDRESS_HEX_LEN || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidAddress(input.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized form as bytes (the leaf preimage).
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for IdentityAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IdentityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for IdentityAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IdentityAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        IdentityAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Identity state as reported by the remote authority.
///
/// Values outside the known vocabulary are preserved verbatim in `Unrecognized`
/// so they can be stored and reported, but they are never eligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityState {
    /// No identity.
    Undefined,
    /// Invited, not yet validated.
    Candidate,
    /// Validated once.
    Newbie,
    /// Validated several times.
    Verified,
    /// Fully validated.
    Human,
    /// Missed a validation.
    Suspended,
    /// Missed validations repeatedly.
    Zombie,
    /// A state name the authority sent that is not part of the known vocabulary.
    Unrecognized(String),
}

impl IdentityState {
    /// Map a wire string onto the vocabulary. Matching ignores ASCII case. Never fails.
    pub fn from_wire(raw: &str) -> Self {
        let trimmed = raw.trim();
        const KNOWN: [(&str, IdentityState); 7] = [
            ("Undefined", IdentityState::Undefined),
            ("Candidate", IdentityState::Candidate),
            ("Newbie", IdentityState::Newbie),
            ("Verified", IdentityState::Verified),
            ("Human", IdentityState::Human),
            ("Suspended", IdentityState::Suspended),
            ("Zombie", IdentityState::Zombie),
        ];

        KNOWN
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
            .map(|(_, state)| state)
            .unwrap_or_else(|| IdentityState::Unrecognized(raw.to_string()))
    }

    /// Canonical string form (raw text for unrecognized states).
    pub fn as_str(&self) -> &str {
        match self {
            IdentityState::Undefined => "Undefined",
            IdentityState::Candidate => "Candidate",
            IdentityState::Newbie => "Newbie",
            IdentityState::Verified => "Verified",
            IdentityState::Human => "Human",
            IdentityState::Suspended => "Suspended",
            IdentityState::Zombie => "Zombie",
            IdentityState::Unrecognized(raw) => raw,
        }
    }

    /// Whether the state belongs to the known vocabulary.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, IdentityState::Unrecognized(_))
    }
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IdentityState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdentityState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(IdentityState::from_wire(&raw))
    }
}

/// Non-negative iDNA amount held losslessly as atto units (10^-18 iDNA).
///
/// Serializes as a decimal string; deserializes from a decimal string or a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stake(U256);

impl Stake {
    /// Zero stake.
    pub const ZERO: Stake = Stake(U256::ZERO);

    /// Stake from atto units.
    pub const fn from_atto(atto: U256) -> Self {
        Stake(atto)
    }

    /// Stake from a whole number of iDNA.
    pub fn from_idna(idna: u64) -> Self {
        Stake(U256::from(idna) * U256::from(ATTO_PER_IDNA))
    }

    /// Parse a decimal iDNA amount such as `"10000"`, `"12.5"` or `"0.000000000000000001"`.
    ///
    /// More than 18 fractional digits would lose precision and is rejected.
    pub fn from_decimal_str(input: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidStake(input.to_string());
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (trimmed, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.len() > STAKE_DECIMALS {
            return Err(invalid());
        }

        let mut digits = String::with_capacity(int_part.len() + STAKE_DECIMALS);
        digits.push_str(if int_part.is_empty() { "0" } else { int_part });
        digits.push_str(frac_part);
        digits.extend(std::iter::repeat('0').take(STAKE_DECIMALS - frac_part.len()));

        U256::from_str_radix(&digits, 10)
            .map(Stake)
            .map_err(|_| invalid())
    }

    /// Raw atto units.
    pub const fn atto(&self) -> U256 {
        self.0
    }

    /// Full-precision decimal form with trailing fractional zeros removed (`"12.5"`, `"10000"`).
    pub fn to_decimal_string(&self) -> String {
        let (int_part, frac_part) = self.split_decimal();
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            int_part
        } else {
            format!("{}.{}", int_part, frac_part)
        }
    }

    /// Decimal form truncated to two fractional digits (`"5000.00"`).
    pub fn to_fixed_2(&self) -> String {
        let (int_part, frac_part) = self.split_decimal();
        format!("{}.{}", int_part, &frac_part[..2])
    }

    /// Whole iDNA part with thousands separators (`"10,000"`).
    pub fn to_grouped_whole(&self) -> String {
        let (int_part, _) = self.split_decimal();
        let len = int_part.len();
        let mut grouped = String::with_capacity(len + len / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (len - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        grouped
    }

    fn split_decimal(&self) -> (String, String) {
        let raw = self.0.to_string();
        let padded = format!("{:0>width$}", raw, width = STAKE_DECIMALS + 1);
        let split = padded.len() - STAKE_DECIMALS;
        (padded[..split].to_string(), padded[split..].to_string())
    }
}

impl fmt::Display for Stake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl FromStr for Stake {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl Serialize for Stake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

const JSON_NUMBER_TOKEN: &str = "$serde_json::private::Number";

impl<'de> Deserialize<'de> for Stake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StakeVisitor;

        impl<'de> serde::de::Visitor<'de> for StakeVisitor {
            type Value = Stake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative decimal iDNA amount as string or number")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Stake, E> {
                Stake::from_decimal_str(v).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Stake, E> {
                Ok(Stake::from_idna(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Stake, E> {
                u64::try_from(v)
                    .map(Stake::from_idna)
                    .map_err(|_| E::custom(CoreError::InvalidStake(v.to_string())))
            }

            fn visit_u128<E: serde::de::Error>(self, v: u128) -> Result<Stake, E> {
                Stake::from_decimal_str(&v.to_string()).map_err(E::custom)
            }

            // Only reached for floats whose text round-trips through f64 exactly;
            // everything else arrives as the literal via `visit_map`.
            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Stake, E> {
                if !v.is_finite() {
                    return Err(E::custom(CoreError::InvalidStake(v.to_string())));
                }
                Stake::from_decimal_str(&v.to_string()).map_err(E::custom)
            }

            /// serde_json (`arbitrary_precision`) hands over a number's literal text as a
            /// single-entry map keyed by its private number token.
            fn visit_map<A>(self, mut map: A) -> Result<Stake, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                use serde::de::Error;

                let (key, literal): (String, String) = map
                    .next_entry()?
                    .ok_or_else(|| A::Error::custom("expected a number, found an empty map"))?;
                if key != JSON_NUMBER_TOKEN {
                    return Err(A::Error::custom(format!("expected a number, found map key {key:?}")));
                }
                Stake::from_decimal_str(&literal).map_err(A::Error::custom)
            }
        }

        deserializer.deserialize_any(StakeVisitor)
    }
}

/// The latest known statement of the remote authority about one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Normalized address (unique key).
    pub address: IdentityAddress,
    /// Verification state.
    pub state: IdentityState,
    /// Staked amount.
    pub stake: Stake,
    /// Start of the ingestion cycle that reported this record.
    pub last_seen_at: DateTime<Utc>,
}

/// Bookkeeping for ingestion cycles.
///
/// `cycle` counts successful ingestions and changes exactly when `last_success_at` does,
/// which makes it a cheap cache key for built commitments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestionWatermark {
    /// Number of successful ingestion cycles so far.
    pub cycle: u64,
    /// Start of the most recent cycle, successful or not.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Start of the most recent successful cycle. Records it committed are at least this fresh.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Error of the most recent cycle, if it failed or partially failed.
    pub last_error: Option<String>,
    /// Addresses that failed individually during the most recent cycle.
    pub failed_count: u64,
}

impl IngestionWatermark {
    /// `last_success_at <= last_attempt_at` (a success implies an attempt).
    pub fn is_consistent(&self) -> bool {
        match (self.last_success_at, self.last_attempt_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(success), Some(attempt)) => success <= attempt,
        }
    }
}
