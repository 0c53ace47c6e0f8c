//! # tokensheet-core
//!
//! Core data structures for the tokensheet formula engine:
//! - [`CellValue`] and [`CellError`] - cell contents and the in-band
//!   spreadsheet error taxonomy
//! - [`CellAddress`] and [`CellRange`] - A1-style addressing
//! - [`Workbook`], [`Sheet`] - the cell-storage collaborator with the
//!   sheet table and the workbook-level name table
//!
//! ## Example
//!
//! ```rust
//! use tokensheet_core::{Workbook, CellValue};
//!
//! let mut workbook = Workbook::new();
//! workbook.set_value_at(0, 0, 0, 42.0).unwrap();
//! assert_eq!(workbook.value_at(0, 0, 0), CellValue::Number(42.0));
//! ```

pub mod address;
pub mod error;
pub mod value;
pub mod workbook;

// Re-exports for convenience
pub use address::{CellAddress, CellRange};
pub use error::{Error, Result};
pub use value::{CellError, CellValue};
pub use workbook::{NameDef, NameTarget, Sheet, Workbook};

/// Maximum number of rows in a sheet (modern limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of rows in a sheet (legacy binary-format limit)
pub const MAX_ROWS_LEGACY: u32 = 65_536;

/// Maximum number of columns in a sheet (modern limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum number of columns in a sheet (legacy binary-format limit)
pub const MAX_COLS_LEGACY: u16 = 256;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
