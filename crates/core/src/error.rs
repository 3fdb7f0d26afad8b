//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Address is not `0x` followed by 40 hex digits.
    #[error("Invalid address format: {0:?}")]
    InvalidAddress(String),

    /// Stake is not a non-negative decimal with at most 18 fractional digits.
    #[error("Invalid stake amount: {0:?}")]
    InvalidStake(String),

    /// Invalid hex encoding.
    #[error("Invalid hex encoding")]
    InvalidHex,
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
