// error.rs - Library error taxonomy

use thiserror::Error;

/// Errors raised by the table, scan, distribution and match-probability engines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KinError {
    /// Non-positive allele code, or an allele above the locus ladder
    #[error("invalid allele {allele}: {reason}")]
    InvalidAllele { allele: i64, reason: String },

    /// Table lookup outside the table bounds (caller or internal bug)
    #[error("index {index} out of range for table with {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    /// Allele referenced without a frequency entry
    #[error("no frequency for allele {allele} at locus {locus}")]
    MissingFrequency { locus: usize, allele: u32 },

    /// Malformed sharding parameters
    #[error("invalid job {job} of {njobs} (job must be in 1..=njobs, njobs >= 1)")]
    InvalidJobIndex { job: i64, njobs: i64 },

    /// Column count or locus layout disagreement
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// Distribution mass outside [1 - tolerance, 1 + tolerance]
    #[error("distribution sums to {total} (tolerance {tolerance})")]
    NormalizationError { total: f64, tolerance: f64 },

    /// Out-of-domain numeric parameter
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Exact convolution would exceed the configured support bound
    #[error("support of {states} states exceeds the limit of {limit}; use an approximate method")]
    SupportTooLarge { states: u128, limit: usize },
}

impl KinError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}

/// Type alias for Results using KinError
pub type Result<T> = std::result::Result<T, KinError>;
