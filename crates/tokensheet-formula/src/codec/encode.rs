//! Token stream encoder.
//!
//! Encoding is the exact inverse of decoding: a decoded expression
//! re-encodes to the original bytes, including reserved fields, operand
//! classes and `Unknown` fallbacks.

use crate::token::{ArrayValue, CellCoord, Expression, Token};

/// An encoded formula: main token stream plus trailing array payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoded {
    pub rgce: Vec<u8>,
    pub rgcb: Vec<u8>,
}

/// Encode an expression back into its binary form.
pub fn encode(expr: &Expression) -> Encoded {
    let mut out = Encoded::default();
    encode_tokens(&expr.tokens, &mut out.rgce, &mut out.rgcb);
    out
}

fn encode_tokens(tokens: &[Token], rgce: &mut Vec<u8>, rgcb: &mut Vec<u8>) {
    for token in tokens {
        encode_token(token, rgce, rgcb);
    }
}

fn encode_token(token: &Token, rgce: &mut Vec<u8>, rgcb: &mut Vec<u8>) {
    match token {
        Token::Int(v) => {
            rgce.push(0x1E);
            rgce.extend_from_slice(&v.to_le_bytes());
        }
        Token::Number(v) => {
            rgce.push(0x1F);
            rgce.extend_from_slice(&v.to_le_bytes());
        }
        Token::Str(s) => {
            rgce.push(0x17);
            push_string_u8(rgce, s);
        }
        Token::Bool(v) => {
            rgce.push(0x1D);
            rgce.push(u8::from(*v));
        }
        Token::Err(e) => {
            rgce.push(0x1C);
            rgce.push(e.code());
        }
        Token::MissingArg => rgce.push(0x16),
        Token::Paren => rgce.push(0x15),
        Token::Binary(op) => rgce.push(op.opcode()),
        Token::Unary(op) => rgce.push(op.opcode()),
        Token::Exp { row, col } => {
            rgce.push(0x01);
            rgce.extend_from_slice(&row.to_le_bytes());
            rgce.extend_from_slice(&col.to_le_bytes());
        }
        Token::Attr { flags, data, jumps } => {
            rgce.push(0x19);
            rgce.push(*flags);
            rgce.extend_from_slice(&data.to_le_bytes());
            for jump in jumps {
                rgce.extend_from_slice(&jump.to_le_bytes());
            }
        }
        Token::Func { class, id } => {
            rgce.push(0x21 + class.bits());
            rgce.extend_from_slice(&id.to_le_bytes());
        }
        Token::FuncVar { class, argc, id } => {
            rgce.push(0x22 + class.bits());
            rgce.push(*argc);
            rgce.extend_from_slice(&id.to_le_bytes());
        }
        Token::Name {
            class,
            index,
            reserved,
        } => {
            rgce.push(0x23 + class.bits());
            rgce.extend_from_slice(&index.to_le_bytes());
            rgce.extend_from_slice(reserved);
        }
        Token::NameX {
            class,
            sheet,
            index,
            reserved,
        } => {
            rgce.push(0x39 + class.bits());
            rgce.extend_from_slice(&sheet.to_le_bytes());
            rgce.extend_from_slice(&index.to_le_bytes());
            rgce.extend_from_slice(reserved);
        }
        Token::Ref { class, coord } => {
            rgce.push(0x24 + class.bits());
            push_coord(rgce, coord);
        }
        Token::Area { class, area } => {
            rgce.push(0x25 + class.bits());
            push_area(rgce, area);
        }
        Token::Ref3d {
            class,
            sheet,
            coord,
        } => {
            rgce.push(0x3A + class.bits());
            rgce.extend_from_slice(&sheet.to_le_bytes());
            push_coord(rgce, coord);
        }
        Token::Area3d { class, sheet, area } => {
            rgce.push(0x3B + class.bits());
            rgce.extend_from_slice(&sheet.to_le_bytes());
            push_area(rgce, area);
        }
        Token::RefErr { class, raw } => {
            rgce.push(0x2A + class.bits());
            rgce.extend_from_slice(raw);
        }
        Token::AreaErr { class, raw } => {
            rgce.push(0x2B + class.bits());
            rgce.extend_from_slice(raw);
        }
        Token::RefErr3d { class, sheet, raw } => {
            rgce.push(0x3C + class.bits());
            rgce.extend_from_slice(&sheet.to_le_bytes());
            rgce.extend_from_slice(raw);
        }
        Token::AreaErr3d { class, sheet, raw } => {
            rgce.push(0x3D + class.bits());
            rgce.extend_from_slice(&sheet.to_le_bytes());
            rgce.extend_from_slice(raw);
        }
        Token::MemArea {
            class,
            reserved,
            tokens,
        } => {
            rgce.push(0x26 + class.bits());
            push_mem(rgce, rgcb, reserved, tokens);
        }
        Token::MemFunc {
            class,
            reserved,
            tokens,
        } => {
            rgce.push(0x29 + class.bits());
            push_mem(rgce, rgcb, reserved, tokens);
        }
        Token::Array {
            class,
            reserved,
            values,
        } => {
            rgce.push(0x20 + class.bits());
            rgce.extend_from_slice(reserved);
            push_array_payload(rgcb, values);
        }
        Token::Unknown(bytes) => rgce.extend_from_slice(bytes),
    }
}

fn push_coord(rgce: &mut Vec<u8>, coord: &CellCoord) {
    rgce.extend_from_slice(&coord.row.to_le_bytes());
    rgce.extend_from_slice(&coord.col_word().to_le_bytes());
}

fn push_area(rgce: &mut Vec<u8>, area: &crate::token::AreaCoord) {
    rgce.extend_from_slice(&area.first.row.to_le_bytes());
    rgce.extend_from_slice(&area.last.row.to_le_bytes());
    rgce.extend_from_slice(&area.first.col_word().to_le_bytes());
    rgce.extend_from_slice(&area.last.col_word().to_le_bytes());
}

fn push_mem(rgce: &mut Vec<u8>, rgcb: &mut Vec<u8>, reserved: &[u8; 4], tokens: &[Token]) {
    rgce.extend_from_slice(reserved);
    let mut sub = Vec::new();
    encode_tokens(tokens, &mut sub, rgcb);
    rgce.extend_from_slice(&(sub.len() as u16).to_le_bytes());
    rgce.extend_from_slice(&sub);
}

fn push_array_payload(rgcb: &mut Vec<u8>, values: &[Vec<ArrayValue>]) {
    let rows = values.len().max(1);
    let cols = values.first().map(Vec::len).unwrap_or(0).max(1);
    rgcb.push((cols - 1) as u8);
    rgcb.extend_from_slice(&((rows - 1) as u16).to_le_bytes());
    for row in values {
        for value in row {
            push_array_element(rgcb, value);
        }
    }
}

fn push_array_element(rgcb: &mut Vec<u8>, value: &ArrayValue) {
    match value {
        ArrayValue::Empty => {
            rgcb.push(0x00);
            rgcb.extend_from_slice(&[0; 8]);
        }
        ArrayValue::Number(v) => {
            rgcb.push(0x01);
            rgcb.extend_from_slice(&v.to_le_bytes());
        }
        ArrayValue::Str(s) => {
            rgcb.push(0x02);
            push_string_u16(rgcb, s);
        }
        ArrayValue::Bool(v) => {
            rgcb.push(0x04);
            rgcb.push(u8::from(*v));
            rgcb.extend_from_slice(&[0; 7]);
        }
        ArrayValue::Err(e) => {
            rgcb.push(0x10);
            rgcb.push(e.code());
            rgcb.extend_from_slice(&[0; 7]);
        }
    }
}

/// String with one-byte character count, as used by the string token.
fn push_string_u8(out: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    out.push(units.len() as u8);
    if s.is_ascii() {
        out.push(0x00);
        out.extend(units.iter().map(|&u| u as u8));
    } else {
        out.push(0x01);
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

/// String with two-byte character count, as used by array elements.
fn push_string_u16(out: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as u16).to_le_bytes());
    if s.is_ascii() {
        out.push(0x00);
        out.extend(units.iter().map(|&u| u as u8));
    } else {
        out.push(0x01);
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::token::{attr, BinaryOp, OperandClass};
    use pretty_assertions::assert_eq;

    fn round_trip(rgce: &[u8], rgcb: &[u8]) {
        let expr = decode(rgce, rgcb);
        let encoded = encode(&expr);
        assert_eq!(encoded.rgce, rgce);
        assert_eq!(encoded.rgcb, rgcb);
    }

    #[test]
    fn round_trips_arithmetic() {
        // =1+2*3
        round_trip(
            &[
                0x1E, 0x01, 0x00, 0x1E, 0x02, 0x00, 0x1E, 0x03, 0x00, 0x05, 0x03,
            ],
            &[],
        );
    }

    #[test]
    fn round_trips_classed_refs_and_funcs() {
        // =SUM(A1:B2) via PtgAreaV + PtgFuncVarV
        round_trip(
            &[
                0x45, 0x00, 0x00, 0x01, 0x00, 0x00, 0xC0, 0x01, 0xC0, 0x42, 0x01, 0x04, 0x00,
            ],
            &[],
        );
    }

    #[test]
    fn round_trips_nonzero_reserved_bytes() {
        // PtgName with a producer-specific reserved word
        round_trip(&[0x43, 0x05, 0x00, 0xAB, 0xCD], &[]);
    }

    #[test]
    fn round_trips_array_payload() {
        let rgce = [0x60, 1, 2, 3, 4, 5, 6, 7];
        let mut rgcb = vec![0x00, 0x01, 0x00]; // 1 col, 2 rows
        rgcb.push(0x04);
        rgcb.extend_from_slice(&[0x01, 0, 0, 0, 0, 0, 0, 0]);
        rgcb.push(0x10);
        rgcb.extend_from_slice(&[0x17, 0, 0, 0, 0, 0, 0, 0]); // #REF!
        round_trip(&rgce, &rgcb);
    }

    #[test]
    fn round_trips_unknown_tail() {
        round_trip(&[0x1D, 0x01, 0xFE, 0x12, 0x34], &[]);
    }

    #[test]
    fn encodes_attr_sum_shorthand() {
        let expr = crate::token::Expression::from_tokens(vec![
            Token::Ref {
                class: OperandClass::Value,
                coord: crate::token::CellCoord::relative(0, 0),
            },
            Token::Attr {
                flags: attr::SUM,
                data: 0,
                jumps: vec![],
            },
        ]);
        let encoded = encode(&expr);
        assert_eq!(encoded.rgce, vec![0x44, 0x00, 0x00, 0x00, 0xC0, 0x19, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn wide_string_switches_encoding() {
        let expr = crate::token::Expression::from_tokens(vec![
            Token::Str("é".into()),
            Token::Str("ok".into()),
            Token::Binary(BinaryOp::Concat),
        ]);
        let encoded = encode(&expr);
        let back = decode(&encoded.rgce, &encoded.rgcb);
        assert_eq!(back.tokens, expr.tokens);
    }
}
