//! Crate-wide error type.
//!
//! Every fallible operation in `kinc_core` returns a [`Result`] whose error
//! variant names one of the kinds from the design: `Io`, `Format`, `Domain`,
//! `Ordering`, `Numeric`, `ThresholdNotFound` or `Cancelled`. `Numeric`
//! errors raised inside the GMM kernel are caught and handled locally (the
//! offending `K` is rejected and the next one tried); they only reach a
//! caller here if every candidate `K` failed for a pair.

use thiserror::Error;

/// The error type shared by every module in this crate.
#[derive(Error, Debug)]
pub enum KincError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("domain error: {0}")]
    Domain(String),

    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("threshold not found before reaching stop; last t={last_t}, chi-square trace={trace:?}")]
    ThresholdNotFound { last_t: f32, trace: Vec<(f32, f32)> },

    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KincError>;

impl KincError {
    pub fn domain<S: Into<String>>(msg: S) -> Self {
        KincError::Domain(msg.into())
    }

    pub fn format<S: Into<String>>(msg: S) -> Self {
        KincError::Format(msg.into())
    }

    pub fn ordering<S: Into<String>>(msg: S) -> Self {
        KincError::Ordering(msg.into())
    }

    pub fn numeric<S: Into<String>>(msg: S) -> Self {
        KincError::Numeric(msg.into())
    }
}
