//! Formula token model
//!
//! A decoded formula is an [`Expression`]: an ordered postfix (RPN)
//! sequence of [`Token`]s. `Token` is a closed tagged union covering the
//! operand, reference, name, operator and control families of the binary
//! token format. Classed tokens (references, names, functions, arrays)
//! additionally carry their operand-class bits so re-encoding reproduces
//! the original opcode byte exactly.

use tokensheet_core::CellError;

/// Wire row value meaning "last row" in a whole-column reference.
///
/// This is a sentinel, not a literal row number: structural-edit
/// arithmetic must check it before shifting (legacy streams cap rows at
/// 65 536 while modern sheets allow 1 048 576, and the sentinel means
/// "to the bottom" in both).
pub const WIRE_LAST_ROW: u16 = 0xFFFF;

/// Wire column value meaning "last column" in a whole-row reference
/// (legacy 256-column encoding).
pub const WIRE_LAST_COL: u16 = 0x00FF;

/// Mask for the 14-bit column payload inside a col-with-flags word.
pub const COL_MASK: u16 = 0x3FFF;

/// Operand class of a classed token (the high bits of its opcode).
///
/// The binary format encodes each classed token in one of three variants
/// depending on whether the surrounding expression consumes it as a
/// reference, a dereferenced value, or an array. The decoder normalizes
/// the opcode and keeps the class here so encoding is byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperandClass {
    /// Reference class (opcode base 0x20)
    #[default]
    Reference,
    /// Value class (opcode base 0x40)
    Value,
    /// Array class (opcode base 0x60)
    Array,
}

impl OperandClass {
    /// Class bits to add to the canonical (reference-class) opcode
    pub fn bits(self) -> u8 {
        match self {
            OperandClass::Reference => 0x00,
            OperandClass::Value => 0x20,
            OperandClass::Array => 0x40,
        }
    }

    /// Extract the class from a raw classed opcode (0x20..=0x7F)
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode & 0x60 {
            0x40 => OperandClass::Value,
            0x60 => OperandClass::Array,
            _ => OperandClass::Reference,
        }
    }
}

/// Binary operators, one byte each on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Concat,
    LessThan,
    LessEqual,
    Equal,
    GreaterEqual,
    GreaterThan,
    NotEqual,
    Intersect,
    Union,
    Range,
}

impl BinaryOp {
    /// Wire opcode
    pub fn opcode(self) -> u8 {
        match self {
            BinaryOp::Add => 0x03,
            BinaryOp::Subtract => 0x04,
            BinaryOp::Multiply => 0x05,
            BinaryOp::Divide => 0x06,
            BinaryOp::Power => 0x07,
            BinaryOp::Concat => 0x08,
            BinaryOp::LessThan => 0x09,
            BinaryOp::LessEqual => 0x0A,
            BinaryOp::Equal => 0x0B,
            BinaryOp::GreaterEqual => 0x0C,
            BinaryOp::GreaterThan => 0x0D,
            BinaryOp::NotEqual => 0x0E,
            BinaryOp::Intersect => 0x0F,
            BinaryOp::Union => 0x10,
            BinaryOp::Range => 0x11,
        }
    }

    /// Decode from a wire opcode
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            0x03 => BinaryOp::Add,
            0x04 => BinaryOp::Subtract,
            0x05 => BinaryOp::Multiply,
            0x06 => BinaryOp::Divide,
            0x07 => BinaryOp::Power,
            0x08 => BinaryOp::Concat,
            0x09 => BinaryOp::LessThan,
            0x0A => BinaryOp::LessEqual,
            0x0B => BinaryOp::Equal,
            0x0C => BinaryOp::GreaterEqual,
            0x0D => BinaryOp::GreaterThan,
            0x0E => BinaryOp::NotEqual,
            0x0F => BinaryOp::Intersect,
            0x10 => BinaryOp::Union,
            0x11 => BinaryOp::Range,
            _ => return None,
        })
    }

    /// Infix symbol for rendering
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Power => "^",
            BinaryOp::Concat => "&",
            BinaryOp::LessThan => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Equal => "=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::NotEqual => "<>",
            BinaryOp::Intersect => " ",
            BinaryOp::Union => ",",
            BinaryOp::Range => ":",
        }
    }
}

/// Unary operators, one byte each on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Unary plus
    Plus,
    /// Negation
    Minus,
    /// Percent postfix (divides by 100)
    Percent,
}

impl UnaryOp {
    /// Wire opcode
    pub fn opcode(self) -> u8 {
        match self {
            UnaryOp::Plus => 0x12,
            UnaryOp::Minus => 0x13,
            UnaryOp::Percent => 0x14,
        }
    }

    /// Decode from a wire opcode
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            0x12 => UnaryOp::Plus,
            0x13 => UnaryOp::Minus,
            0x14 => UnaryOp::Percent,
            _ => return None,
        })
    }
}

/// Coordinates of a single-cell reference as stored on the wire
///
/// The row is a plain 16-bit value; the column word packs a 14-bit
/// column with the row-relative (bit 15) and col-relative (bit 14)
/// flags. Both flags are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellCoord {
    pub row: u16,
    pub col: u16,
    pub row_rel: bool,
    pub col_rel: bool,
}

impl CellCoord {
    /// Create a fully relative coordinate
    pub fn relative(row: u16, col: u16) -> Self {
        Self {
            row,
            col,
            row_rel: true,
            col_rel: true,
        }
    }

    /// Create a fully absolute coordinate
    pub fn absolute(row: u16, col: u16) -> Self {
        Self {
            row,
            col,
            row_rel: false,
            col_rel: false,
        }
    }

    /// Pack the column word with its flag bits
    pub fn col_word(&self) -> u16 {
        let mut word = self.col & COL_MASK;
        if self.col_rel {
            word |= 0x4000;
        }
        if self.row_rel {
            word |= 0x8000;
        }
        word
    }

    /// Unpack a column word into (col, row_rel, col_rel)
    pub fn from_words(row: u16, col_word: u16) -> Self {
        Self {
            row,
            col: col_word & COL_MASK,
            row_rel: (col_word & 0x8000) != 0,
            col_rel: (col_word & 0x4000) != 0,
        }
    }
}

/// Coordinates of a rectangular area reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaCoord {
    pub first: CellCoord,
    pub last: CellCoord,
}

impl AreaCoord {
    pub fn new(first: CellCoord, last: CellCoord) -> Self {
        Self { first, last }
    }

    /// Whole-column reference (e.g. A:A): rows span the full sentinel range.
    ///
    /// Must be checked before any row-shift arithmetic.
    pub fn is_whole_column(&self) -> bool {
        self.first.row == 0 && self.last.row == WIRE_LAST_ROW
    }

    /// Whole-row reference (e.g. 5:9): columns span the full sentinel range.
    pub fn is_whole_row(&self) -> bool {
        self.first.col == 0 && (self.last.col == WIRE_LAST_COL || self.last.col == COL_MASK)
    }
}

/// One element of an inline array constant
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Empty,
    Number(f64),
    Str(String),
    Bool(bool),
    Err(CellError),
}

/// Attribute flag bits for [`Token::Attr`]
pub mod attr {
    /// Volatile marker (statement separator in old producers)
    pub const SEMI: u8 = 0x01;
    /// Conditional jump emitted for IF
    pub const IF: u8 = 0x02;
    /// Jump table emitted for CHOOSE
    pub const CHOOSE: u8 = 0x04;
    /// Unconditional jump
    pub const GOTO: u8 = 0x08;
    /// Single-argument SUM shorthand
    pub const SUM: u8 = 0x10;
    /// Leading whitespace preservation
    pub const SPACE: u8 = 0x40;
}

/// One element of a decoded formula
///
/// Variants group into the five families of the token model: operands,
/// references, names, operators and control tokens. The `Unknown`
/// fallback preserves unrecognized bytes verbatim for round-trip
/// fidelity.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Operands ===
    /// Unsigned 16-bit integer constant
    Int(u16),
    /// IEEE 754 double constant
    Number(f64),
    /// String constant
    Str(String),
    /// Boolean constant
    Bool(bool),
    /// Error constant
    Err(CellError),
    /// Omitted argument placeholder (e.g. `IF(A1,,2)`)
    MissingArg,
    /// Inline array constant; element payload is stored after the main
    /// token stream and matched positionally during decode
    Array {
        class: OperandClass,
        /// Seven reserved inline bytes, preserved for round trip
        reserved: [u8; 7],
        /// Rectangular grid of values, row-major
        values: Vec<Vec<ArrayValue>>,
    },

    // === References ===
    /// Single-cell reference on the owning sheet
    Ref {
        class: OperandClass,
        coord: CellCoord,
    },
    /// Single-cell reference through the sheet table
    Ref3d {
        class: OperandClass,
        sheet: u16,
        coord: CellCoord,
    },
    /// Rectangular area on the owning sheet
    Area {
        class: OperandClass,
        area: AreaCoord,
    },
    /// Rectangular area through the sheet table
    Area3d {
        class: OperandClass,
        sheet: u16,
        area: AreaCoord,
    },
    /// Deleted single-cell reference (evaluates to #REF!)
    RefErr {
        class: OperandClass,
        /// Original coordinate bytes, preserved for round trip
        raw: [u8; 4],
    },
    /// Deleted area reference (evaluates to #REF!)
    AreaErr {
        class: OperandClass,
        raw: [u8; 8],
    },
    /// Deleted 3-D single-cell reference
    RefErr3d {
        class: OperandClass,
        sheet: u16,
        raw: [u8; 4],
    },
    /// Deleted 3-D area reference
    AreaErr3d {
        class: OperandClass,
        sheet: u16,
        raw: [u8; 8],
    },
    /// Aggregate of unions/intersections of references, with its
    /// pre-computed sub-expression inline
    MemArea {
        class: OperandClass,
        reserved: [u8; 4],
        tokens: Vec<Token>,
    },
    /// Like `MemArea` but for sub-expressions that cannot be
    /// pre-computed (contain names or 3-D parts)
    MemFunc {
        class: OperandClass,
        reserved: [u8; 4],
        tokens: Vec<Token>,
    },

    // === Names ===
    /// Index into the workbook name table
    Name {
        class: OperandClass,
        index: u16,
        reserved: [u8; 2],
    },
    /// Index into an external name table, via the sheet table
    NameX {
        class: OperandClass,
        sheet: u16,
        index: u16,
        reserved: [u8; 2],
    },

    // === Operators ===
    /// Binary operator
    Binary(BinaryOp),
    /// Unary operator
    Unary(UnaryOp),
    /// Fixed-arity built-in function
    Func { class: OperandClass, id: u16 },
    /// Variable-arity built-in function with explicit argument count
    FuncVar {
        class: OperandClass,
        argc: u8,
        id: u16,
    },

    // === Control ===
    /// Parenthesis grouping (round-trip and display only)
    Paren,
    /// Shared/array formula placeholder pointing at the group anchor cell
    Exp { row: u16, col: u16 },
    /// Attribute marker (jump tables, SUM shorthand, spacing)
    Attr {
        flags: u8,
        data: u16,
        /// CHOOSE jump table entries, empty for other attribute kinds
        jumps: Vec<u16>,
    },
    /// Unrecognized or truncated token; bytes preserved verbatim
    Unknown(Vec<u8>),
}

/// Coarse classification of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Operand,
    Reference,
    Name,
    Operator,
    Control,
}

impl Token {
    /// Which family this token belongs to
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Int(_)
            | Token::Number(_)
            | Token::Str(_)
            | Token::Bool(_)
            | Token::Err(_)
            | Token::MissingArg
            | Token::Array { .. } => TokenKind::Operand,
            Token::Ref { .. }
            | Token::Ref3d { .. }
            | Token::Area { .. }
            | Token::Area3d { .. }
            | Token::RefErr { .. }
            | Token::AreaErr { .. }
            | Token::RefErr3d { .. }
            | Token::AreaErr3d { .. }
            | Token::MemArea { .. }
            | Token::MemFunc { .. } => TokenKind::Reference,
            Token::Name { .. } | Token::NameX { .. } => TokenKind::Name,
            Token::Binary(_) | Token::Unary(_) | Token::Func { .. } | Token::FuncVar { .. } => {
                TokenKind::Operator
            }
            Token::Paren | Token::Exp { .. } | Token::Attr { .. } | Token::Unknown(_) => {
                TokenKind::Control
            }
        }
    }

    /// Number of operands this token pops from the evaluation stack
    pub fn arity(&self) -> usize {
        match self {
            Token::Binary(_) => 2,
            Token::Unary(_) | Token::Paren => 1,
            Token::Func { id, .. } => crate::functions::fixed_arity(*id).unwrap_or(0),
            Token::FuncVar { argc, .. } => *argc as usize,
            Token::Attr { flags, .. } if flags & attr::SUM != 0 => 1,
            _ => 0,
        }
    }

    /// Encoded length in bytes, opcode included
    ///
    /// For array tokens this is the inline portion only; the deferred
    /// element payload lives after the main stream.
    pub fn encoded_len(&self) -> usize {
        match self {
            Token::Binary(_) | Token::Unary(_) | Token::Paren | Token::MissingArg => 1,
            Token::Bool(_) => 2,
            Token::Err(_) => 2,
            Token::Int(_) => 3,
            Token::Func { .. } => 3,
            Token::FuncVar { .. } => 4,
            Token::Attr { jumps, .. } => 4 + jumps.len() * 2,
            Token::Ref { .. } | Token::RefErr { .. } | Token::Name { .. } => 5,
            Token::Exp { .. } => 5,
            Token::Ref3d { .. } | Token::RefErr3d { .. } | Token::NameX { .. } => 7,
            Token::Area { .. } | Token::AreaErr { .. } => 9,
            Token::Number(_) => 9,
            Token::Area3d { .. } | Token::AreaErr3d { .. } => 11,
            Token::Array { .. } => 8,
            Token::Str(s) => {
                let units = s.encode_utf16().count();
                3 + if s.is_ascii() { units } else { units * 2 }
            }
            Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => {
                7 + tokens.iter().map(Token::encoded_len).sum::<usize>()
            }
            Token::Unknown(bytes) => bytes.len(),
        }
    }
}

/// An ordered postfix sequence of tokens belonging to one formula
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    pub tokens: Vec<Token>,
}

impl Expression {
    /// Create an empty expression
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a token sequence (assumed to already be in postfix order)
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    /// Whether the expression contains an opaque fallback token
    pub fn has_unknown(&self) -> bool {
        fn walk(tokens: &[Token]) -> bool {
            tokens.iter().any(|t| match t {
                Token::Unknown(_) => true,
                Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => walk(tokens),
                _ => false,
            })
        }
        walk(&self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn col_word_packs_flags() {
        let coord = CellCoord {
            row: 4,
            col: 0,
            row_rel: true,
            col_rel: false,
        };
        assert_eq!(coord.col_word(), 0x8000);
        assert_eq!(CellCoord::from_words(4, 0x8000), coord);

        let both = CellCoord::relative(9, 2);
        assert_eq!(both.col_word(), 0xC002);
        assert_eq!(CellCoord::from_words(9, 0xC002), both);
    }

    #[test]
    fn whole_column_sentinel() {
        let area = AreaCoord::new(
            CellCoord::absolute(0, 0),
            CellCoord::absolute(WIRE_LAST_ROW, 0),
        );
        assert!(area.is_whole_column());
        assert!(!area.is_whole_row());

        let bounded = AreaCoord::new(CellCoord::absolute(0, 0), CellCoord::absolute(99, 0));
        assert!(!bounded.is_whole_column());
    }

    #[test]
    fn operand_class_from_opcode() {
        assert_eq!(OperandClass::from_opcode(0x24), OperandClass::Reference);
        assert_eq!(OperandClass::from_opcode(0x44), OperandClass::Value);
        assert_eq!(OperandClass::from_opcode(0x64), OperandClass::Array);
    }

    #[test]
    fn token_kinds() {
        assert_eq!(Token::Number(1.0).kind(), TokenKind::Operand);
        assert_eq!(
            Token::Ref {
                class: OperandClass::Value,
                coord: CellCoord::relative(0, 0)
            }
            .kind(),
            TokenKind::Reference
        );
        assert_eq!(Token::Binary(BinaryOp::Add).kind(), TokenKind::Operator);
        assert_eq!(Token::Paren.kind(), TokenKind::Control);
    }

    #[test]
    fn encoded_lengths_match_wire_table() {
        assert_eq!(Token::Binary(BinaryOp::Add).encoded_len(), 1);
        assert_eq!(Token::Int(7).encoded_len(), 3);
        assert_eq!(Token::Number(1.5).encoded_len(), 9);
        assert_eq!(Token::Bool(true).encoded_len(), 2);
        assert_eq!(
            Token::Ref {
                class: OperandClass::Value,
                coord: CellCoord::relative(0, 0)
            }
            .encoded_len(),
            5
        );
        assert_eq!(
            Token::FuncVar {
                class: OperandClass::Value,
                argc: 3,
                id: 4
            }
            .encoded_len(),
            4
        );
        assert_eq!(Token::Str("abc".into()).encoded_len(), 6);
        // Non-ASCII strings switch to two bytes per UTF-16 unit
        assert_eq!(Token::Str("é".into()).encoded_len(), 5);
    }
}
