//! Formula text reconstruction
//!
//! Walks the postfix token stream with a fragment stack, the same
//! discipline the evaluator uses: operands push text, operators pop
//! their arity's worth of fragments and push the combined piece. The
//! result is formula-bar text in A1 notation.

use tokensheet_core::Workbook;

use crate::eval::format_number;
use crate::refindex::FormulaStore;
use crate::token::{
    attr, ArrayValue, AreaCoord, CellCoord, Expression, Token, UnaryOp, COL_MASK, WIRE_LAST_ROW,
};

/// Context needed to spell out sheet names, defined names, and shared
/// group anchors.
pub struct RenderContext<'a> {
    pub workbook: &'a Workbook,
    store: Option<&'a FormulaStore>,
    /// Cell the rendered formula lives in, for shared-group offsets
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
}

impl<'a> RenderContext<'a> {
    pub fn new(workbook: &'a Workbook, sheet: usize, row: u32, col: u16) -> Self {
        Self {
            workbook,
            store: None,
            sheet,
            row,
            col,
        }
    }

    /// Attach a formula store so shared-group placeholders render as
    /// their anchor's formula with relative offsets applied.
    pub fn with_store(mut self, store: &'a FormulaStore) -> Self {
        self.store = Some(store);
        self
    }

    fn sheet_prefix(&self, sheet: u16) -> String {
        match self.workbook.sheet(sheet as usize) {
            Some(s) => format!("{}!", quote_sheet_name(&s.name)),
            None => "#REF!".to_string(),
        }
    }
}

/// Render an expression to formula-bar text (without the leading `=`).
pub fn render(expr: &Expression, ctx: &RenderContext) -> String {
    render_tokens(&expr.tokens, ctx, (0, 0))
}

fn render_tokens(tokens: &[Token], ctx: &RenderContext, delta: (i32, i32)) -> String {
    let mut stack: Vec<String> = Vec::new();
    // Pending leading spaces from an attribute marker
    let mut spaces = 0usize;
    fn push(stack: &mut Vec<String>, spaces: &mut usize, text: String) {
        if *spaces > 0 {
            stack.push(format!("{}{}", " ".repeat(*spaces), text));
            *spaces = 0;
        } else {
            stack.push(text);
        }
    }
    for token in tokens {
        match token {
            Token::Int(n) => push(&mut stack, &mut spaces, n.to_string()),
            Token::Number(n) => push(&mut stack, &mut spaces, format_number(*n)),
            Token::Str(s) => push(&mut stack, &mut spaces, quote_string(s)),
            Token::Bool(b) => push(&mut stack, &mut spaces, if *b { "TRUE" } else { "FALSE" }.to_string()),
            Token::Err(e) => push(&mut stack, &mut spaces, e.as_str().to_string()),
            Token::MissingArg => push(&mut stack, &mut spaces, String::new()),
            Token::Array { values, .. } => push(&mut stack, &mut spaces, array_text(values)),
            Token::Ref { coord, .. } => push(&mut stack, &mut spaces, coord_text(coord, delta)),
            Token::Ref3d { sheet, coord, .. } => {
                let text = format!("{}{}", ctx.sheet_prefix(*sheet), coord_text(coord, delta));
                push(&mut stack, &mut spaces, text);
            }
            Token::Area { area, .. } => push(&mut stack, &mut spaces, area_text(area, delta)),
            Token::Area3d { sheet, area, .. } => {
                let text = format!("{}{}", ctx.sheet_prefix(*sheet), area_text(area, delta));
                push(&mut stack, &mut spaces, text);
            }
            Token::RefErr { .. } | Token::AreaErr { .. } => {
                push(&mut stack, &mut spaces, "#REF!".to_string())
            }
            Token::RefErr3d { sheet, .. } | Token::AreaErr3d { sheet, .. } => {
                let text = format!("{}#REF!", ctx.sheet_prefix(*sheet));
                push(&mut stack, &mut spaces, text);
            }
            // Mem tokens carry the visible sub-expression inline
            Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => {
                let text = render_tokens(tokens, ctx, delta);
                push(&mut stack, &mut spaces, text);
            }
            Token::Name { index, .. } => push(&mut stack, &mut spaces, name_text(ctx, *index)),
            Token::NameX { sheet, index, .. } => {
                let text = format!("{}{}", ctx.sheet_prefix(*sheet), name_text(ctx, *index));
                push(&mut stack, &mut spaces, text);
            }
            Token::Binary(op) => {
                let b = stack.pop().unwrap_or_default();
                let a = stack.pop().unwrap_or_default();
                push(&mut stack, &mut spaces, format!("{a}{}{b}", op.symbol()));
            }
            Token::Unary(op) => {
                let a = stack.pop().unwrap_or_default();
                let text = match op {
                    UnaryOp::Plus => format!("+{a}"),
                    UnaryOp::Minus => format!("-{a}"),
                    UnaryOp::Percent => format!("{a}%"),
                };
                push(&mut stack, &mut spaces, text);
            }
            Token::Func { id, .. } => {
                let argc = crate::functions::fixed_arity(*id).unwrap_or(0);
                let text = call_text(&mut stack, *id, argc);
                push(&mut stack, &mut spaces, text);
            }
            Token::FuncVar { id, argc, .. } => {
                let text = call_text(&mut stack, *id, *argc as usize);
                push(&mut stack, &mut spaces, text);
            }
            Token::Paren => {
                let a = stack.pop().unwrap_or_default();
                push(&mut stack, &mut spaces, format!("({a})"));
            }
            Token::Exp { row, col } => {
                let text = exp_text(ctx, *row, *col);
                push(&mut stack, &mut spaces, text);
            }
            Token::Attr { flags, data, .. } => {
                if flags & attr::SUM != 0 {
                    let a = stack.pop().unwrap_or_default();
                    push(&mut stack, &mut spaces, format!("SUM({a})"));
                } else if flags & attr::SPACE != 0 {
                    spaces = (*data >> 8) as usize;
                }
                // Jump markers shape evaluation order only
            }
            Token::Unknown(_) => push(&mut stack, &mut spaces, "#NAME?".to_string()),
        }
    }
    match stack.len() {
        1 => stack.remove(0),
        // A malformed stream renders what it can
        _ => stack.join(""),
    }
}

/// Render a shared-group placeholder by expanding the anchor formula
/// with this cell's offset from the anchor.
fn exp_text(ctx: &RenderContext, anchor_row: u16, anchor_col: u16) -> String {
    let Some(store) = ctx.store else {
        return "#NAME?".to_string();
    };
    match store.group_anchor(ctx.sheet, anchor_row as u32, anchor_col) {
        Some(expr) => {
            let delta = (
                ctx.row as i32 - anchor_row as i32,
                ctx.col as i32 - anchor_col as i32,
            );
            render_tokens(&expr.tokens, ctx, delta)
        }
        None => "#REF!".to_string(),
    }
}

fn name_text(ctx: &RenderContext, index: u16) -> String {
    match ctx.workbook.name(index as usize) {
        Some(def) => def.name.clone(),
        None => "#NAME?".to_string(),
    }
}

fn call_text(stack: &mut Vec<String>, id: u16, argc: usize) -> String {
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(stack.pop().unwrap_or_default());
    }
    args.reverse();
    let name = match crate::functions::function_name(id) {
        Some(name) => name.to_string(),
        None => format!("UNKNOWN{id}"),
    };
    format!("{name}({})", args.join(","))
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA
pub fn column_letters(col: u16) -> String {
    let mut out = Vec::new();
    let mut c = col as u32;
    loop {
        out.push(b'A' + (c % 26) as u8);
        if c < 26 {
            break;
        }
        c = c / 26 - 1;
    }
    out.reverse();
    // Always ASCII by construction
    String::from_utf8_lossy(&out).into_owned()
}

fn coord_text(coord: &CellCoord, delta: (i32, i32)) -> String {
    let row = if coord.row_rel {
        (coord.row as i32 + delta.0).rem_euclid(WIRE_LAST_ROW as i32 + 1) as u32
    } else {
        coord.row as u32
    };
    let col = if coord.col_rel {
        (coord.col as i32 + delta.1).rem_euclid(COL_MASK as i32 + 1) as u16
    } else {
        coord.col
    };
    format!(
        "{}{}{}{}",
        if coord.col_rel { "" } else { "$" },
        column_letters(col),
        if coord.row_rel { "" } else { "$" },
        row + 1
    )
}

fn area_text(area: &AreaCoord, delta: (i32, i32)) -> String {
    if area.is_whole_column() {
        return format!(
            "{}{}:{}{}",
            if area.first.col_rel { "" } else { "$" },
            column_letters(area.first.col),
            if area.last.col_rel { "" } else { "$" },
            column_letters(area.last.col),
        );
    }
    if area.is_whole_row() {
        return format!(
            "{}{}:{}{}",
            if area.first.row_rel { "" } else { "$" },
            area.first.row as u32 + 1,
            if area.last.row_rel { "" } else { "$" },
            area.last.row as u32 + 1,
        );
    }
    format!(
        "{}:{}",
        coord_text(&area.first, delta),
        coord_text(&area.last, delta)
    )
}

fn array_text(values: &[Vec<ArrayValue>]) -> String {
    let rows: Vec<String> = values
        .iter()
        .map(|row| {
            row.iter()
                .map(element_text)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    format!("{{{}}}", rows.join(";"))
}

fn element_text(value: &ArrayValue) -> String {
    match value {
        ArrayValue::Empty => String::new(),
        ArrayValue::Number(n) => format_number(*n),
        ArrayValue::Str(s) => quote_string(s),
        ArrayValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        ArrayValue::Err(e) => e.as_str().to_string(),
    }
}

fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Sheet names with anything beyond letters, digits, and underscores
/// get single-quoted, with embedded quotes doubled.
fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::id;
    use crate::token::{BinaryOp, OperandClass};
    use pretty_assertions::assert_eq;

    fn ctx(workbook: &Workbook) -> RenderContext<'_> {
        RenderContext::new(workbook, 0, 0, 0)
    }

    fn text(tokens: Vec<Token>) -> String {
        let wb = Workbook::new();
        render(&Expression::from_tokens(tokens), &ctx(&wb))
    }

    #[test]
    fn infix_arithmetic() {
        assert_eq!(
            text(vec![
                Token::Int(1),
                Token::Int(2),
                Token::Binary(BinaryOp::Add),
            ]),
            "1+2"
        );
    }

    #[test]
    fn explicit_parens_survive() {
        assert_eq!(
            text(vec![
                Token::Int(1),
                Token::Int(2),
                Token::Binary(BinaryOp::Add),
                Token::Paren,
                Token::Int(3),
                Token::Binary(BinaryOp::Multiply),
            ]),
            "(1+2)*3"
        );
    }

    #[test]
    fn addresses_carry_dollar_flags() {
        assert_eq!(
            text(vec![Token::Ref {
                class: OperandClass::Value,
                coord: CellCoord::relative(4, 0),
            }]),
            "A5"
        );
        assert_eq!(
            text(vec![Token::Ref {
                class: OperandClass::Value,
                coord: CellCoord::absolute(4, 0),
            }]),
            "$A$5"
        );
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn function_call_with_range() {
        assert_eq!(
            text(vec![
                Token::Area {
                    class: OperandClass::Reference,
                    area: AreaCoord::new(CellCoord::relative(0, 0), CellCoord::relative(9, 1)),
                },
                Token::FuncVar {
                    class: OperandClass::Value,
                    argc: 1,
                    id: id::SUM,
                },
            ]),
            "SUM(A1:B10)"
        );
    }

    #[test]
    fn whole_column_area() {
        assert_eq!(
            text(vec![
                Token::Area {
                    class: OperandClass::Reference,
                    area: AreaCoord::new(
                        CellCoord::relative(0, 0),
                        CellCoord::relative(WIRE_LAST_ROW, 0),
                    ),
                },
                Token::FuncVar {
                    class: OperandClass::Value,
                    argc: 1,
                    id: id::SUM,
                },
            ]),
            "SUM(A:A)"
        );
    }

    #[test]
    fn missing_argument_renders_empty_slot() {
        assert_eq!(
            text(vec![
                Token::Bool(true),
                Token::MissingArg,
                Token::Int(2),
                Token::FuncVar {
                    class: OperandClass::Value,
                    argc: 3,
                    id: id::IF,
                },
            ]),
            "IF(TRUE,,2)"
        );
    }

    #[test]
    fn strings_double_embedded_quotes() {
        assert_eq!(
            text(vec![Token::Str("say \"hi\"".to_string())]),
            "\"say \"\"hi\"\"\""
        );
    }

    #[test]
    fn sheet_prefix_quotes_awkward_names() {
        let mut wb = Workbook::new();
        wb.add_sheet("P&L 2026").unwrap();
        let tokens = vec![Token::Ref3d {
            class: OperandClass::Value,
            sheet: 1,
            coord: CellCoord::relative(0, 0),
        }];
        assert_eq!(
            render(&Expression::from_tokens(tokens), &ctx(&wb)),
            "'P&L 2026'!A1"
        );
    }

    #[test]
    fn array_literal_rows_and_columns() {
        assert_eq!(
            text(vec![Token::Array {
                class: OperandClass::Array,
                reserved: [0; 7],
                values: vec![
                    vec![ArrayValue::Number(1.0), ArrayValue::Number(2.0)],
                    vec![ArrayValue::Str("x".to_string()), ArrayValue::Bool(true)],
                ],
            }]),
            "{1,2;\"x\",TRUE}"
        );
    }

    #[test]
    fn attr_sum_shorthand() {
        assert_eq!(
            text(vec![
                Token::Ref {
                    class: OperandClass::Value,
                    coord: CellCoord::relative(0, 0),
                },
                Token::Attr {
                    flags: attr::SUM,
                    data: 0,
                    jumps: vec![],
                },
            ]),
            "SUM(A1)"
        );
    }

    #[test]
    fn tombstones_render_as_ref_error() {
        assert_eq!(
            text(vec![Token::RefErr {
                class: OperandClass::Value,
                raw: [0; 4],
            }]),
            "#REF!"
        );
    }

    #[test]
    fn shared_placeholder_expands_anchor_with_offset() {
        let wb = Workbook::new();
        let mut store = FormulaStore::new();
        // Anchor at C1 is =A1*2; follower C3 should read =A3*2
        store
            .bind_shared(
                0,
                0,
                2,
                2,
                2,
                Expression::from_tokens(vec![
                    Token::Ref {
                        class: OperandClass::Value,
                        coord: CellCoord::relative(0, 0),
                    },
                    Token::Int(2),
                    Token::Binary(BinaryOp::Multiply),
                ]),
            )
            .unwrap();
        let follower = store.formula_at(0, 2, 2).unwrap();
        let ctx = RenderContext::new(&wb, 0, 2, 2).with_store(&store);
        assert_eq!(render(&follower, &ctx), "A3*2");
    }
}
