//! Formula engine error types
//!
//! These are programmer-facing errors (bad indices, misuse of the store
//! API). Spreadsheet-level failures are in-band [`CellError`] values and
//! never surface here.
//!
//! [`CellError`]: tokensheet_core::CellError

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur while managing formulas
#[derive(Debug, Error)]
pub enum FormulaError {
    /// Formula handle does not exist (stale or already removed)
    #[error("Invalid formula handle: {0}")]
    InvalidHandle(usize),

    /// Invalid reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Token stream ended mid-payload
    #[error("unexpected end of token stream at offset {offset}, need {need} bytes")]
    Truncated { offset: usize, need: usize },

    /// Array element payload is malformed
    #[error("malformed array payload: {0}")]
    BadArrayPayload(String),
}
