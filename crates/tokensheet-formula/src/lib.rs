//! # tokensheet-formula
//!
//! The formula engine: a binary token-stream codec, a reference index
//! that keeps stored formulas consistent across structural edits, an
//! RPN evaluator with spreadsheet coercion rules, the built-in function
//! library, and a formula-bar text reconstructor.
//!
//! Formulas are persisted as postfix token streams in the classic
//! binary format (an opcode byte, class bits for reference tokens, and
//! little-endian operand payloads). [`codec::decode`] turns bytes into
//! an [`Expression`], [`codec::encode`] writes it back byte-for-byte,
//! [`eval::evaluate`] runs it against a workbook, and
//! [`render::render`] spells it out as text.
//!
//! ## Example
//!
//! ```rust
//! use tokensheet_core::Workbook;
//! use tokensheet_formula::eval::{evaluate, EvaluationContext, FormulaValue};
//! use tokensheet_formula::token::{BinaryOp, Expression, Token};
//!
//! // =1+2
//! let expr = Expression::from_tokens(vec![
//!     Token::Int(1),
//!     Token::Int(2),
//!     Token::Binary(BinaryOp::Add),
//! ]);
//! let workbook = Workbook::new();
//! let ctx = EvaluationContext::new(&workbook, 0, 0, 0);
//! assert_eq!(evaluate(&expr, &ctx), FormulaValue::Number(3.0));
//! ```

pub mod codec;
pub mod error;
pub mod eval;
pub mod functions;
pub mod refindex;
pub mod render;
pub mod token;

// Re-exports for convenience
pub use codec::{decode, encode, Encoded};
pub use error::{FormulaError, FormulaResult};
pub use eval::{evaluate, evaluate_at_offset, EvaluationContext, FormulaValue, SheetRange};
pub use refindex::{FormulaId, FormulaRecord, FormulaStore, StructuralEdit};
pub use render::{render, RenderContext};
pub use token::{Expression, Token};
