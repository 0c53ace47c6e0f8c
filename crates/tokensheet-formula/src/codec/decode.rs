//! Token stream decoder.
//!
//! The decoder walks the main stream opcode by opcode, normalizing the
//! operand-class bits of classed tokens, and resolves array constants
//! against the trailing element payload in stream order. It is
//! defensive: an unrecognized opcode or a truncated payload never fails
//! the whole formula, the remaining bytes become a single
//! [`Token::Unknown`] preserved verbatim.

use tokensheet_core::CellError;

use crate::codec::reader::{read_array, read_f64, read_string, read_u16, read_u8};
use crate::error::{FormulaError, FormulaResult};
use crate::token::{
    attr, ArrayValue, CellCoord, Expression, OperandClass, Token,
};

/// Decode a formula from its main token stream and trailing array payload.
///
/// `rgce` is the postfix token stream; `rgcb` holds the element payloads
/// of any inline array constants, in the order their tokens appear.
pub fn decode(rgce: &[u8], rgcb: &[u8]) -> Expression {
    let mut extra = 0;
    let tokens = decode_stream(rgce, rgcb, &mut extra);
    if extra < rgcb.len() {
        log::warn!(
            "formula decode left {} unconsumed array payload bytes",
            rgcb.len() - extra
        );
    }
    Expression::from_tokens(tokens)
}

fn decode_stream(rgce: &[u8], rgcb: &[u8], extra: &mut usize) -> Vec<Token> {
    let mut offset = 0;
    let mut tokens = Vec::new();
    while offset < rgce.len() {
        let start = offset;
        match decode_token(rgce, &mut offset, rgcb, extra) {
            Ok(token) => tokens.push(token),
            Err(err) => {
                log::warn!("formula decode stopped at offset {start}: {err}");
                tokens.push(Token::Unknown(rgce[start..].to_vec()));
                break;
            }
        }
    }
    tokens
}

fn decode_token(
    data: &[u8],
    offset: &mut usize,
    rgcb: &[u8],
    extra: &mut usize,
) -> FormulaResult<Token> {
    let opcode = read_u8(data, offset)?;

    // Plain (classless) tokens
    match opcode {
        0x01 => {
            let row = read_u16(data, offset)?;
            let col = read_u16(data, offset)?;
            return Ok(Token::Exp { row, col });
        }
        0x03..=0x11 => {
            // from_opcode cannot fail inside this range
            let op = crate::token::BinaryOp::from_opcode(opcode)
                .ok_or(FormulaError::Truncated {
                    offset: *offset,
                    need: 0,
                })?;
            return Ok(Token::Binary(op));
        }
        0x12..=0x14 => {
            let op = crate::token::UnaryOp::from_opcode(opcode)
                .ok_or(FormulaError::Truncated {
                    offset: *offset,
                    need: 0,
                })?;
            return Ok(Token::Unary(op));
        }
        0x15 => return Ok(Token::Paren),
        0x16 => return Ok(Token::MissingArg),
        0x17 => {
            let cch = read_u8(data, offset)? as usize;
            let flags = read_u8(data, offset)?;
            let s = read_string(data, offset, cch, flags)?;
            return Ok(Token::Str(s));
        }
        0x19 => return decode_attr(data, offset),
        0x1C => {
            let code = read_u8(data, offset)?;
            let err = CellError::from_code(code).ok_or_else(|| {
                FormulaError::InvalidReference(format!("unknown error code 0x{code:02X}"))
            })?;
            return Ok(Token::Err(err));
        }
        0x1D => {
            let v = read_u8(data, offset)?;
            return Ok(Token::Bool(v != 0));
        }
        0x1E => return Ok(Token::Int(read_u16(data, offset)?)),
        0x1F => return Ok(Token::Number(read_f64(data, offset)?)),
        0x00 | 0x02 | 0x18 | 0x1A | 0x1B => {
            return Err(FormulaError::InvalidReference(format!(
                "unsupported opcode 0x{opcode:02X}"
            )));
        }
        _ => {}
    }

    // Classed tokens: normalize the class bits, dispatch on the base id
    let class = OperandClass::from_opcode(opcode);
    match opcode & 0x1F {
        0x00 => decode_array(data, offset, rgcb, extra, class),
        0x01 => {
            let id = read_u16(data, offset)?;
            Ok(Token::Func { class, id })
        }
        0x02 => {
            let argc = read_u8(data, offset)?;
            let id = read_u16(data, offset)?;
            Ok(Token::FuncVar { class, argc, id })
        }
        0x03 => {
            let index = read_u16(data, offset)?;
            let reserved = read_array::<2>(data, offset)?;
            Ok(Token::Name {
                class,
                index,
                reserved,
            })
        }
        0x04 => Ok(Token::Ref {
            class,
            coord: read_coord(data, offset)?,
        }),
        0x05 => Ok(Token::Area {
            class,
            area: read_area(data, offset)?,
        }),
        0x06 => decode_mem(data, offset, rgcb, extra, class, true),
        0x09 => decode_mem(data, offset, rgcb, extra, class, false),
        0x0A => Ok(Token::RefErr {
            class,
            raw: read_array::<4>(data, offset)?,
        }),
        0x0B => Ok(Token::AreaErr {
            class,
            raw: read_array::<8>(data, offset)?,
        }),
        0x19 => {
            let sheet = read_u16(data, offset)?;
            let index = read_u16(data, offset)?;
            let reserved = read_array::<2>(data, offset)?;
            Ok(Token::NameX {
                class,
                sheet,
                index,
                reserved,
            })
        }
        0x1A => {
            let sheet = read_u16(data, offset)?;
            Ok(Token::Ref3d {
                class,
                sheet,
                coord: read_coord(data, offset)?,
            })
        }
        0x1B => {
            let sheet = read_u16(data, offset)?;
            Ok(Token::Area3d {
                class,
                sheet,
                area: read_area(data, offset)?,
            })
        }
        0x1C => {
            let sheet = read_u16(data, offset)?;
            Ok(Token::RefErr3d {
                class,
                sheet,
                raw: read_array::<4>(data, offset)?,
            })
        }
        0x1D => {
            let sheet = read_u16(data, offset)?;
            Ok(Token::AreaErr3d {
                class,
                sheet,
                raw: read_array::<8>(data, offset)?,
            })
        }
        base => Err(FormulaError::InvalidReference(format!(
            "unsupported classed opcode 0x{opcode:02X} (base 0x{base:02X})"
        ))),
    }
}

fn read_coord(data: &[u8], offset: &mut usize) -> FormulaResult<CellCoord> {
    let row = read_u16(data, offset)?;
    let col_word = read_u16(data, offset)?;
    Ok(CellCoord::from_words(row, col_word))
}

fn read_area(data: &[u8], offset: &mut usize) -> FormulaResult<crate::token::AreaCoord> {
    let row1 = read_u16(data, offset)?;
    let row2 = read_u16(data, offset)?;
    let col1 = read_u16(data, offset)?;
    let col2 = read_u16(data, offset)?;
    Ok(crate::token::AreaCoord::new(
        CellCoord::from_words(row1, col1),
        CellCoord::from_words(row2, col2),
    ))
}

fn decode_attr(data: &[u8], offset: &mut usize) -> FormulaResult<Token> {
    let flags = read_u8(data, offset)?;
    let payload = read_u16(data, offset)?;
    let mut jumps = Vec::new();
    if flags & attr::CHOOSE != 0 {
        // payload counts the choices; the table has one extra entry for
        // the error branch
        for _ in 0..=payload {
            jumps.push(read_u16(data, offset)?);
        }
    }
    Ok(Token::Attr {
        flags,
        data: payload,
        jumps,
    })
}

fn decode_mem(
    data: &[u8],
    offset: &mut usize,
    rgcb: &[u8],
    extra: &mut usize,
    class: OperandClass,
    precomputed: bool,
) -> FormulaResult<Token> {
    let reserved = read_array::<4>(data, offset)?;
    let cce = read_u16(data, offset)? as usize;
    if *offset + cce > data.len() {
        return Err(FormulaError::Truncated {
            offset: *offset,
            need: cce,
        });
    }
    let sub = &data[*offset..*offset + cce];
    *offset += cce;
    let tokens = decode_stream(sub, rgcb, extra);
    Ok(if precomputed {
        Token::MemArea {
            class,
            reserved,
            tokens,
        }
    } else {
        Token::MemFunc {
            class,
            reserved,
            tokens,
        }
    })
}

fn decode_array(
    data: &[u8],
    offset: &mut usize,
    rgcb: &[u8],
    extra: &mut usize,
    class: OperandClass,
) -> FormulaResult<Token> {
    let reserved = read_array::<7>(data, offset)?;

    let cols = read_u8(rgcb, extra)? as usize + 1;
    let rows = read_u16(rgcb, extra)? as usize + 1;
    let mut values = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(cols);
        for _ in 0..cols {
            row.push(decode_array_element(rgcb, extra)?);
        }
        values.push(row);
    }
    Ok(Token::Array {
        class,
        reserved,
        values,
    })
}

fn decode_array_element(rgcb: &[u8], extra: &mut usize) -> FormulaResult<ArrayValue> {
    let kind = read_u8(rgcb, extra)?;
    match kind {
        0x00 => {
            read_array::<8>(rgcb, extra)?;
            Ok(ArrayValue::Empty)
        }
        0x01 => Ok(ArrayValue::Number(read_f64(rgcb, extra)?)),
        0x02 => {
            let cch = read_u16(rgcb, extra)? as usize;
            let flags = read_u8(rgcb, extra)?;
            Ok(ArrayValue::Str(read_string(rgcb, extra, cch, flags)?))
        }
        0x04 => {
            let v = read_u8(rgcb, extra)?;
            read_array::<7>(rgcb, extra)?;
            Ok(ArrayValue::Bool(v != 0))
        }
        0x10 => {
            let code = read_u8(rgcb, extra)?;
            read_array::<7>(rgcb, extra)?;
            let err = CellError::from_code(code).ok_or_else(|| {
                FormulaError::BadArrayPayload(format!("unknown error code 0x{code:02X}"))
            })?;
            Ok(ArrayValue::Err(err))
        }
        other => Err(FormulaError::BadArrayPayload(format!(
            "unknown element type 0x{other:02X}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{AreaCoord, BinaryOp};
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_int_plus_int() {
        // 1 2 + in postfix
        let rgce = [0x1E, 0x01, 0x00, 0x1E, 0x02, 0x00, 0x03];
        let expr = decode(&rgce, &[]);
        assert_eq!(
            expr.tokens,
            vec![Token::Int(1), Token::Int(2), Token::Binary(BinaryOp::Add)]
        );
    }

    #[test]
    fn decodes_value_class_ref() {
        // PtgRefV for B3 relative: row=2, col word = 0xC001
        let rgce = [0x44, 0x02, 0x00, 0x01, 0xC0];
        let expr = decode(&rgce, &[]);
        assert_eq!(
            expr.tokens,
            vec![Token::Ref {
                class: OperandClass::Value,
                coord: CellCoord::relative(2, 1),
            }]
        );
    }

    #[test]
    fn decodes_area_with_mixed_anchoring() {
        // $A$1:B2, first corner absolute, last relative
        let rgce = [
            0x25, // PtgAreaR
            0x00, 0x00, // row1
            0x01, 0x00, // row2
            0x00, 0x00, // col1 word (absolute)
            0x01, 0xC0, // col2 word (relative)
        ];
        let expr = decode(&rgce, &[]);
        assert_eq!(
            expr.tokens,
            vec![Token::Area {
                class: OperandClass::Reference,
                area: AreaCoord::new(CellCoord::absolute(0, 0), CellCoord::relative(1, 1)),
            }]
        );
    }

    #[test]
    fn unknown_opcode_preserves_remainder() {
        let rgce = [0x1E, 0x07, 0x00, 0xFE, 0xAA, 0xBB];
        let expr = decode(&rgce, &[]);
        assert_eq!(expr.tokens.len(), 2);
        assert_eq!(expr.tokens[0], Token::Int(7));
        assert_eq!(expr.tokens[1], Token::Unknown(vec![0xFE, 0xAA, 0xBB]));
        assert!(expr.has_unknown());
    }

    #[test]
    fn truncated_payload_preserves_remainder() {
        // PtgNum with only 4 of 8 mantissa bytes
        let rgce = [0x1F, 0x00, 0x00, 0x00, 0x00];
        let expr = decode(&rgce, &[]);
        assert_eq!(expr.tokens, vec![Token::Unknown(rgce.to_vec())]);
    }

    #[test]
    fn decodes_array_constant_from_payload() {
        // {1,"x"}, one row, two columns
        let rgce = [0x40, 0, 0, 0, 0, 0, 0, 0]; // PtgArrayV + 7 reserved
        let mut rgcb = vec![0x01, 0x00, 0x00]; // cols-1=1, rows-1=0
        rgcb.push(0x01); // SerNum
        rgcb.extend_from_slice(&1.0f64.to_le_bytes());
        rgcb.push(0x02); // SerStr
        rgcb.extend_from_slice(&[0x01, 0x00, 0x00, b'x']);
        let expr = decode(&rgce, &rgcb);
        assert_eq!(
            expr.tokens,
            vec![Token::Array {
                class: OperandClass::Value,
                reserved: [0; 7],
                values: vec![vec![
                    ArrayValue::Number(1.0),
                    ArrayValue::Str("x".into())
                ]],
            }]
        );
    }

    #[test]
    fn decodes_attr_choose_jump_table() {
        let rgce = [0x19, 0x04, 0x02, 0x00, 0x08, 0x00, 0x10, 0x00, 0x18, 0x00];
        let expr = decode(&rgce, &[]);
        assert_eq!(
            expr.tokens,
            vec![Token::Attr {
                flags: attr::CHOOSE,
                data: 2,
                jumps: vec![8, 16, 24],
            }]
        );
    }
}
