//! Formula evaluator
//!
//! Evaluates a decoded postfix token stream against a workbook. Failures
//! of the spreadsheet kind (bad coercion, division by zero, deleted
//! references) are in-band [`CellError`] values and propagate through
//! operators instead of aborting evaluation.

use std::cell::RefCell;
use std::cmp::Ordering;

use ahash::AHashSet;
use tokensheet_core::{CellError, CellValue, Workbook, MAX_COLS, MAX_ROWS};

use crate::refindex::FormulaStore;
use crate::token::{
    attr, ArrayValue, BinaryOp, CellCoord, Expression, Token, UnaryOp, COL_MASK, WIRE_LAST_ROW,
};

/// Ranges larger than this are materialized sparsely (occupied cells
/// only) instead of as a dense rectangle. Whole-column references would
/// otherwise allocate a million rows.
const DENSE_RANGE_LIMIT: u32 = 0x10000;

/// Value types during formula evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Error(CellError),
    Array(Vec<Vec<FormulaValue>>),
    Empty,
}

impl FormulaValue {
    /// Coerce to a number the way arithmetic does: booleans become 0/1,
    /// blanks become 0, numeric text parses, anything else is #VALUE!.
    pub fn coerce_number(&self) -> Result<f64, CellError> {
        match self {
            FormulaValue::Number(n) => Ok(*n),
            FormulaValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            FormulaValue::Empty => Ok(0.0),
            FormulaValue::String(s) => s.trim().parse().map_err(|_| CellError::Value),
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(rows) => match rows.first().and_then(|r| r.first()) {
                Some(v) => v.coerce_number(),
                None => Err(CellError::Value),
            },
        }
    }

    /// Coerce to a boolean for logical functions
    pub fn coerce_bool(&self) -> Result<bool, CellError> {
        match self {
            FormulaValue::Boolean(b) => Ok(*b),
            FormulaValue::Number(n) => Ok(*n != 0.0),
            FormulaValue::Empty => Ok(false),
            FormulaValue::String(s) => match s.to_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(CellError::Value),
            },
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(rows) => match rows.first().and_then(|r| r.first()) {
                Some(v) => v.coerce_bool(),
                None => Err(CellError::Value),
            },
        }
    }

    /// Coerce to text for concatenation and text functions
    pub fn coerce_string(&self) -> Result<String, CellError> {
        match self {
            FormulaValue::String(s) => Ok(s.clone()),
            FormulaValue::Number(n) => Ok(format_number(*n)),
            FormulaValue::Boolean(true) => Ok("TRUE".to_string()),
            FormulaValue::Boolean(false) => Ok("FALSE".to_string()),
            FormulaValue::Empty => Ok(String::new()),
            FormulaValue::Error(e) => Err(*e),
            FormulaValue::Array(rows) => match rows.first().and_then(|r| r.first()) {
                Some(v) => v.coerce_string(),
                None => Err(CellError::Value),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FormulaValue::Error(_))
    }

    pub fn get_error(&self) -> Option<CellError> {
        match self {
            FormulaValue::Error(e) => Some(*e),
            _ => None,
        }
    }
}

/// Render a number the way cell display does: integers without a
/// fractional part, everything else via the shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<CellValue> for FormulaValue {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Empty => FormulaValue::Empty,
            CellValue::Number(n) => FormulaValue::Number(n),
            CellValue::String(s) => FormulaValue::String(s),
            CellValue::Boolean(b) => FormulaValue::Boolean(b),
            CellValue::Error(e) => FormulaValue::Error(e),
        }
    }
}

impl From<FormulaValue> for CellValue {
    fn from(value: FormulaValue) -> Self {
        match value {
            FormulaValue::Empty => CellValue::Empty,
            FormulaValue::Number(n) => CellValue::Number(n),
            FormulaValue::String(s) => CellValue::String(s),
            FormulaValue::Boolean(b) => CellValue::Boolean(b),
            FormulaValue::Error(e) => CellValue::Error(e),
            // Arrays collapse to their top-left element at the cell level
            FormulaValue::Array(rows) => rows
                .into_iter()
                .next()
                .and_then(|r| r.into_iter().next())
                .map(CellValue::from)
                .unwrap_or(CellValue::Error(CellError::Value)),
        }
    }
}

impl From<&ArrayValue> for FormulaValue {
    fn from(value: &ArrayValue) -> Self {
        match value {
            ArrayValue::Empty => FormulaValue::Empty,
            ArrayValue::Number(n) => FormulaValue::Number(*n),
            ArrayValue::Str(s) => FormulaValue::String(s.clone()),
            ArrayValue::Bool(b) => FormulaValue::Boolean(*b),
            ArrayValue::Err(e) => FormulaValue::Error(*e),
        }
    }
}

/// A resolved rectangular reference on one sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetRange {
    pub sheet: usize,
    pub start_row: u32,
    pub start_col: u16,
    pub end_row: u32,
    pub end_col: u16,
}

impl SheetRange {
    fn cell(sheet: usize, row: u32, col: u16) -> Self {
        Self {
            sheet,
            start_row: row,
            start_col: col,
            end_row: row,
            end_col: col,
        }
    }

    fn is_single_cell(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }

    fn cell_count(&self) -> u64 {
        (self.end_row - self.start_row + 1) as u64 * (self.end_col - self.start_col + 1) as u64
    }

    fn intersect(&self, other: &SheetRange) -> Option<SheetRange> {
        if self.sheet != other.sheet {
            return None;
        }
        let start_row = self.start_row.max(other.start_row);
        let end_row = self.end_row.min(other.end_row);
        let start_col = self.start_col.max(other.start_col);
        let end_col = self.end_col.min(other.end_col);
        (start_row <= end_row && start_col <= end_col).then_some(SheetRange {
            sheet: self.sheet,
            start_row,
            start_col,
            end_row,
            end_col,
        })
    }

    fn bounding(&self, other: &SheetRange) -> SheetRange {
        SheetRange {
            sheet: self.sheet,
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        }
    }
}

/// Intermediate stack entry: a computed value, or a reference that has
/// not been dereferenced yet. Range operators and function arguments
/// consume references directly; everything else dereferences first.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Value(FormulaValue),
    Ranges(Vec<SheetRange>),
}

/// Context for formula evaluation
pub struct EvaluationContext<'a> {
    pub workbook: &'a Workbook,
    store: Option<&'a FormulaStore>,
    /// Sheet owning the formula being evaluated
    pub sheet: usize,
    /// Position of the formula's cell, for shared-group offsets
    pub row: u32,
    pub col: u16,
    /// Cells currently on the recursive evaluation path
    visiting: RefCell<AHashSet<(usize, u32, u16)>>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(workbook: &'a Workbook, sheet: usize, row: u32, col: u16) -> Self {
        Self {
            workbook,
            store: None,
            sheet,
            row,
            col,
            visiting: RefCell::new(AHashSet::new()),
        }
    }

    /// Attach a formula store so referenced cells that hold formulas are
    /// evaluated recursively instead of read as blanks.
    pub fn with_store(mut self, store: &'a FormulaStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Value of a cell, evaluating any formula stored there.
    ///
    /// A reference cycle yields #REF! rather than recursing forever.
    pub fn cell_value(&self, sheet: usize, row: u32, col: u16) -> FormulaValue {
        if let Some(store) = self.store {
            if let Some(expr) = store.formula_at(sheet, row, col) {
                let key = (sheet, row, col);
                if !self.visiting.borrow_mut().insert(key) {
                    return FormulaValue::Error(CellError::Ref);
                }
                let nested = EvaluationContext {
                    workbook: self.workbook,
                    store: self.store,
                    sheet,
                    row,
                    col,
                    visiting: RefCell::new(self.visiting.borrow().clone()),
                };
                let value = evaluate(&expr, &nested);
                self.visiting.borrow_mut().remove(&key);
                return value;
            }
        }
        FormulaValue::from(self.workbook.value_at(sheet, row, col))
    }
}

/// Evaluate a formula to a single value.
pub fn evaluate(expr: &Expression, ctx: &EvaluationContext) -> FormulaValue {
    match eval_tokens(&expr.tokens, ctx, (0, 0)) {
        Ok(operand) => deref_scalar(operand, ctx),
        Err(e) => FormulaValue::Error(e),
    }
}

/// Evaluate a shared-group anchor formula as seen from a follower cell.
///
/// Relative coordinates are offset by the follower's distance from the
/// anchor, wrapping at the 16-bit row and 14-bit column boundaries like
/// the binary format does.
pub fn evaluate_at_offset(
    expr: &Expression,
    ctx: &EvaluationContext,
    delta_row: i32,
    delta_col: i32,
) -> FormulaValue {
    match eval_tokens(&expr.tokens, ctx, (delta_row, delta_col)) {
        Ok(operand) => deref_scalar(operand, ctx),
        Err(e) => FormulaValue::Error(e),
    }
}

fn eval_tokens(
    tokens: &[Token],
    ctx: &EvaluationContext,
    delta: (i32, i32),
) -> Result<Operand, CellError> {
    let mut stack: Vec<Operand> = Vec::new();
    for token in tokens {
        match token {
            Token::Int(v) => stack.push(Operand::Value(FormulaValue::Number(*v as f64))),
            Token::Number(v) => stack.push(Operand::Value(FormulaValue::Number(*v))),
            Token::Str(s) => stack.push(Operand::Value(FormulaValue::String(s.clone()))),
            Token::Bool(b) => stack.push(Operand::Value(FormulaValue::Boolean(*b))),
            Token::Err(e) => stack.push(Operand::Value(FormulaValue::Error(*e))),
            Token::MissingArg => stack.push(Operand::Value(FormulaValue::Empty)),
            Token::Array { values, .. } => {
                let rows = values
                    .iter()
                    .map(|row| row.iter().map(FormulaValue::from).collect())
                    .collect();
                stack.push(Operand::Value(FormulaValue::Array(rows)));
            }

            Token::Ref { coord, .. } => {
                let (row, col) = resolve_coord(coord, delta);
                stack.push(Operand::Ranges(vec![SheetRange::cell(ctx.sheet, row, col)]));
            }
            Token::Ref3d { sheet, coord, .. } => {
                if *sheet as usize >= ctx.workbook.sheet_count() {
                    stack.push(Operand::Value(FormulaValue::Error(CellError::Ref)));
                } else {
                    let (row, col) = resolve_coord(coord, delta);
                    stack.push(Operand::Ranges(vec![SheetRange::cell(
                        *sheet as usize,
                        row,
                        col,
                    )]));
                }
            }
            Token::Area { area, .. } => {
                stack.push(Operand::Ranges(vec![resolve_area(area, ctx.sheet, delta)]));
            }
            Token::Area3d { sheet, area, .. } => {
                if *sheet as usize >= ctx.workbook.sheet_count() {
                    stack.push(Operand::Value(FormulaValue::Error(CellError::Ref)));
                } else {
                    stack.push(Operand::Ranges(vec![resolve_area(
                        area,
                        *sheet as usize,
                        delta,
                    )]));
                }
            }
            Token::RefErr { .. }
            | Token::AreaErr { .. }
            | Token::RefErr3d { .. }
            | Token::AreaErr3d { .. } => {
                stack.push(Operand::Value(FormulaValue::Error(CellError::Ref)));
            }
            Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => {
                // The aggregate carries its own sub-expression; the
                // result replaces whatever it would have pushed.
                stack.push(eval_tokens(tokens, ctx, delta)?);
            }

            Token::Name { index, .. } => stack.push(resolve_name(*index as usize, ctx)),
            Token::NameX { .. } => {
                // External names need a linked workbook
                stack.push(Operand::Value(FormulaValue::Error(CellError::Name)));
            }

            Token::Binary(op) => {
                let b = stack.pop().ok_or(CellError::Value)?;
                let a = stack.pop().ok_or(CellError::Value)?;
                stack.push(apply_binary(*op, a, b, ctx)?);
            }
            Token::Unary(op) => {
                let a = stack.pop().ok_or(CellError::Value)?;
                stack.push(Operand::Value(apply_unary(*op, a, ctx)));
            }
            Token::Func { id, .. } => {
                let argc = crate::functions::fixed_arity(*id).unwrap_or(0);
                call_function(*id, argc, &mut stack, ctx)?;
            }
            Token::FuncVar { argc, id, .. } => {
                call_function(*id, *argc as usize, &mut stack, ctx)?;
            }

            Token::Paren => {}
            Token::Attr { flags, .. } => {
                if flags & attr::SUM != 0 {
                    call_function(crate::functions::id::SUM, 1, &mut stack, ctx)?;
                }
                // Jump attributes steer lazy evaluation in the original
                // producers; branches here are evaluated eagerly, so
                // IF/CHOOSE/GOTO markers are pass-through.
            }
            Token::Exp { row, col } => {
                stack.push(Operand::Value(resolve_shared(*row, *col, ctx)));
            }
            Token::Unknown(_) => {
                stack.push(Operand::Value(FormulaValue::Error(CellError::Name)));
            }
        }
    }
    stack.pop().ok_or(CellError::Value)
}

fn call_function(
    id: u16,
    argc: usize,
    stack: &mut Vec<Operand>,
    ctx: &EvaluationContext,
) -> Result<(), CellError> {
    if stack.len() < argc {
        return Err(CellError::Value);
    }
    let mut args = Vec::with_capacity(argc);
    for operand in stack.drain(stack.len() - argc..) {
        args.push(deref_argument(operand, ctx));
    }
    let result = match crate::functions::registry().get(id) {
        Some(def) => {
            if args.len() < def.min_args || def.max_args.is_some_and(|m| args.len() > m) {
                FormulaValue::Error(CellError::Value)
            } else {
                (def.implementation)(&args, ctx)
            }
        }
        None => FormulaValue::Error(CellError::Name),
    };
    stack.push(Operand::Value(result));
    Ok(())
}

fn resolve_shared(anchor_row: u16, anchor_col: u16, ctx: &EvaluationContext) -> FormulaValue {
    let Some(store) = ctx.store else {
        return FormulaValue::Error(CellError::Ref);
    };
    let Some(expr) = store.group_anchor(ctx.sheet, anchor_row as u32, anchor_col) else {
        return FormulaValue::Error(CellError::Ref);
    };
    let delta_row = ctx.row as i32 - anchor_row as i32;
    let delta_col = ctx.col as i32 - anchor_col as i32;
    evaluate_at_offset(&expr, ctx, delta_row, delta_col)
}

/// Apply a shared-group offset to a wire coordinate. Relative parts
/// wrap modulo the wire field widths; absolute parts are untouched.
fn resolve_coord(coord: &CellCoord, delta: (i32, i32)) -> (u32, u16) {
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
    (row, col)
}

fn resolve_area(area: &crate::token::AreaCoord, sheet: usize, delta: (i32, i32)) -> SheetRange {
    // Sentinels mean "to the edge" and never shift
    let (start_row, end_row) = if area.is_whole_column() {
        (0, MAX_ROWS - 1)
    } else {
        let (r1, _) = resolve_coord(&area.first, delta);
        let (r2, _) = resolve_coord(&area.last, delta);
        (r1.min(r2), r1.max(r2))
    };
    let (start_col, end_col) = if area.is_whole_row() {
        (0, (MAX_COLS - 1) as u16)
    } else {
        let (_, c1) = resolve_coord(&area.first, delta);
        let (_, c2) = resolve_coord(&area.last, delta);
        (c1.min(c2), c1.max(c2))
    };
    SheetRange {
        sheet,
        start_row,
        start_col,
        end_row,
        end_col,
    }
}

fn resolve_name(index: usize, ctx: &EvaluationContext) -> Operand {
    use tokensheet_core::NameTarget;
    let Some(def) = ctx.workbook.name(index) else {
        return Operand::Value(FormulaValue::Error(CellError::Name));
    };
    match &def.target {
        NameTarget::Cell { sheet, address } => Operand::Ranges(vec![SheetRange::cell(
            *sheet,
            address.row,
            address.col,
        )]),
        NameTarget::Range { sheet, range } => Operand::Ranges(vec![SheetRange {
            sheet: *sheet,
            start_row: range.start.row,
            start_col: range.start.col,
            end_row: range.end.row,
            end_col: range.end.col,
        }]),
        NameTarget::Constant(v) => Operand::Value(FormulaValue::from(v.clone())),
    }
}

/// Dereference for scalar use: a single cell reads its value, a larger
/// range materializes to an array, a disjoint union is not a scalar.
fn deref_scalar(operand: Operand, ctx: &EvaluationContext) -> FormulaValue {
    match operand {
        Operand::Value(v) => v,
        Operand::Ranges(ranges) => match ranges.as_slice() {
            [single] if single.is_single_cell() => {
                ctx.cell_value(single.sheet, single.start_row, single.start_col)
            }
            [single] => materialize(single, ctx),
            _ => FormulaValue::Error(CellError::Value),
        },
    }
}

/// Dereference for a function argument: unions flatten into one column
/// so aggregates see every referenced cell.
fn deref_argument(operand: Operand, ctx: &EvaluationContext) -> FormulaValue {
    match operand {
        Operand::Value(v) => v,
        Operand::Ranges(ranges) => match ranges.as_slice() {
            [single] if single.is_single_cell() => {
                ctx.cell_value(single.sheet, single.start_row, single.start_col)
            }
            [single] => materialize(single, ctx),
            many => {
                let mut rows = Vec::new();
                for range in many {
                    match materialize(range, ctx) {
                        FormulaValue::Array(parts) => {
                            for row in parts {
                                for v in row {
                                    rows.push(vec![v]);
                                }
                            }
                        }
                        v => rows.push(vec![v]),
                    }
                }
                FormulaValue::Array(rows)
            }
        },
    }
}

fn materialize(range: &SheetRange, ctx: &EvaluationContext) -> FormulaValue {
    if range.is_single_cell() {
        return ctx.cell_value(range.sheet, range.start_row, range.start_col);
    }
    if range.cell_count() <= DENSE_RANGE_LIMIT as u64 {
        let mut rows = Vec::with_capacity((range.end_row - range.start_row + 1) as usize);
        for r in range.start_row..=range.end_row {
            let mut row = Vec::with_capacity((range.end_col - range.start_col + 1) as usize);
            for c in range.start_col..=range.end_col {
                row.push(ctx.cell_value(range.sheet, r, c));
            }
            rows.push(row);
        }
        return FormulaValue::Array(rows);
    }
    // Sparse: occupied cells only, as a column. Fine for aggregates,
    // which is the only place ranges this large occur in practice.
    let Some(sheet) = ctx.workbook.sheet(range.sheet) else {
        return FormulaValue::Error(CellError::Ref);
    };
    let mut cells: Vec<(u32, u16)> = sheet
        .iter_cells()
        .filter(|(r, c, _)| {
            *r >= range.start_row
                && *r <= range.end_row
                && *c >= range.start_col
                && *c <= range.end_col
        })
        .map(|(r, c, _)| (r, c))
        .collect();
    if let Some(store) = ctx.store {
        for (r, c) in store.positions_in(range.sheet, range.start_row, range.end_row) {
            if c >= range.start_col && c <= range.end_col && !cells.contains(&(r, c)) {
                cells.push((r, c));
            }
        }
    }
    cells.sort_unstable();
    let rows = cells
        .into_iter()
        .map(|(r, c)| vec![ctx.cell_value(range.sheet, r, c)])
        .collect();
    FormulaValue::Array(rows)
}

fn to_ranges(operand: Operand) -> Result<Vec<SheetRange>, CellError> {
    match operand {
        Operand::Ranges(r) => Ok(r),
        Operand::Value(FormulaValue::Error(e)) => Err(e),
        Operand::Value(_) => Err(CellError::Value),
    }
}

fn apply_binary(
    op: BinaryOp,
    a: Operand,
    b: Operand,
    ctx: &EvaluationContext,
) -> Result<Operand, CellError> {
    match op {
        BinaryOp::Range => {
            let lhs = to_ranges(a)?;
            let rhs = to_ranges(b)?;
            let (Some(l), Some(r)) = (lhs.first(), rhs.first()) else {
                return Err(CellError::Ref);
            };
            if l.sheet != r.sheet {
                return Ok(Operand::Value(FormulaValue::Error(CellError::Value)));
            }
            Ok(Operand::Ranges(vec![l.bounding(r)]))
        }
        BinaryOp::Intersect => {
            let lhs = to_ranges(a)?;
            let rhs = to_ranges(b)?;
            let mut out = Vec::new();
            for l in &lhs {
                for r in &rhs {
                    if let Some(overlap) = l.intersect(r) {
                        out.push(overlap);
                    }
                }
            }
            if out.is_empty() {
                Ok(Operand::Value(FormulaValue::Error(CellError::Null)))
            } else {
                Ok(Operand::Ranges(out))
            }
        }
        BinaryOp::Union => {
            let mut lhs = to_ranges(a)?;
            lhs.extend(to_ranges(b)?);
            Ok(Operand::Ranges(lhs))
        }
        _ => {
            let lhs = deref_scalar(a, ctx);
            let rhs = deref_scalar(b, ctx);
            Ok(Operand::Value(binary_scalar(op, &lhs, &rhs)))
        }
    }
}

fn binary_scalar(op: BinaryOp, lhs: &FormulaValue, rhs: &FormulaValue) -> FormulaValue {
    // Arrays broadcast elementwise; scalars extend across the array
    if matches!(lhs, FormulaValue::Array(_)) || matches!(rhs, FormulaValue::Array(_)) {
        return broadcast(op, lhs, rhs);
    }
    if let Some(e) = lhs.get_error() {
        return FormulaValue::Error(e);
    }
    if let Some(e) = rhs.get_error() {
        return FormulaValue::Error(e);
    }
    match op {
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Power => {
            let a = match lhs.coerce_number() {
                Ok(n) => n,
                Err(e) => return FormulaValue::Error(e),
            };
            let b = match rhs.coerce_number() {
                Ok(n) => n,
                Err(e) => return FormulaValue::Error(e),
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => {
                    if b == 0.0 {
                        return FormulaValue::Error(CellError::Div0);
                    }
                    a / b
                }
                BinaryOp::Power => {
                    let p = a.powf(b);
                    if !p.is_finite() {
                        return FormulaValue::Error(CellError::Num);
                    }
                    p
                }
                _ => unreachable!(),
            };
            if result.is_finite() {
                FormulaValue::Number(result)
            } else {
                FormulaValue::Error(CellError::Num)
            }
        }
        BinaryOp::Concat => {
            let a = match lhs.coerce_string() {
                Ok(s) => s,
                Err(e) => return FormulaValue::Error(e),
            };
            let b = match rhs.coerce_string() {
                Ok(s) => s,
                Err(e) => return FormulaValue::Error(e),
            };
            FormulaValue::String(a + &b)
        }
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::LessThan
        | BinaryOp::LessEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterEqual => {
            let ord = compare_values(lhs, rhs);
            let result = match op {
                BinaryOp::Equal => ord == Ordering::Equal,
                BinaryOp::NotEqual => ord != Ordering::Equal,
                BinaryOp::LessThan => ord == Ordering::Less,
                BinaryOp::LessEqual => ord != Ordering::Greater,
                BinaryOp::GreaterThan => ord == Ordering::Greater,
                BinaryOp::GreaterEqual => ord != Ordering::Less,
                _ => unreachable!(),
            };
            FormulaValue::Boolean(result)
        }
        BinaryOp::Range | BinaryOp::Intersect | BinaryOp::Union => {
            FormulaValue::Error(CellError::Value)
        }
    }
}

fn broadcast(op: BinaryOp, lhs: &FormulaValue, rhs: &FormulaValue) -> FormulaValue {
    fn shape(v: &FormulaValue) -> Option<(usize, usize)> {
        match v {
            FormulaValue::Array(rows) => {
                Some((rows.len(), rows.first().map(Vec::len).unwrap_or(0)))
            }
            _ => None,
        }
    }
    fn element(v: &FormulaValue, r: usize, c: usize) -> FormulaValue {
        match v {
            FormulaValue::Array(rows) => {
                let (h, w) = (rows.len(), rows.first().map(Vec::len).unwrap_or(0));
                // A 1-row or 1-column array extends along the missing axis
                let ri = if h == 1 { 0 } else { r };
                let ci = if w == 1 { 0 } else { c };
                rows.get(ri)
                    .and_then(|row| row.get(ci))
                    .cloned()
                    .unwrap_or(FormulaValue::Error(CellError::Value))
            }
            other => other.clone(),
        }
    }

    let ls = shape(lhs);
    let rs = shape(rhs);
    let (rows, cols) = match (ls, rs) {
        (Some((lr, lc)), Some((rr, rc))) => {
            let rows_ok = lr == rr || lr == 1 || rr == 1;
            let cols_ok = lc == rc || lc == 1 || rc == 1;
            if !rows_ok || !cols_ok {
                return FormulaValue::Error(CellError::Value);
            }
            (lr.max(rr), lc.max(rc))
        }
        (Some(s), None) | (None, Some(s)) => s,
        (None, None) => return binary_scalar(op, lhs, rhs),
    };
    let mut out = Vec::with_capacity(rows);
    for r in 0..rows {
        let mut row = Vec::with_capacity(cols);
        for c in 0..cols {
            row.push(binary_scalar(op, &element(lhs, r, c), &element(rhs, r, c)));
        }
        out.push(row);
    }
    FormulaValue::Array(out)
}

fn apply_unary(op: UnaryOp, operand: Operand, ctx: &EvaluationContext) -> FormulaValue {
    let value = deref_scalar(operand, ctx);
    if let FormulaValue::Array(rows) = &value {
        let mapped = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| apply_unary_scalar(op, v))
                    .collect::<Vec<_>>()
            })
            .collect();
        return FormulaValue::Array(mapped);
    }
    apply_unary_scalar(op, &value)
}

fn apply_unary_scalar(op: UnaryOp, value: &FormulaValue) -> FormulaValue {
    if let Some(e) = value.get_error() {
        return FormulaValue::Error(e);
    }
    let n = match value.coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    match op {
        UnaryOp::Plus => FormulaValue::Number(n),
        UnaryOp::Minus => FormulaValue::Number(-n),
        UnaryOp::Percent => FormulaValue::Number(n / 100.0),
    }
}

/// Total order used by the comparison operators.
///
/// Numbers sort before text, text before booleans. A blank adapts to
/// the other operand's type: zero against a number, the empty string
/// against text, FALSE against a boolean. Text compares
/// case-insensitively.
pub fn compare_values(lhs: &FormulaValue, rhs: &FormulaValue) -> Ordering {
    use FormulaValue::*;
    match (lhs, rhs) {
        (Number(a), Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (String(a), String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Boolean(a), Boolean(b)) => a.cmp(b),
        (Empty, Empty) => Ordering::Equal,
        (Empty, Number(_)) => compare_values(&Number(0.0), rhs),
        (Number(_), Empty) => compare_values(lhs, &Number(0.0)),
        (Empty, String(_)) => compare_values(&String(std::string::String::new()), rhs),
        (String(_), Empty) => compare_values(lhs, &String(std::string::String::new())),
        (Empty, Boolean(_)) => compare_values(&Boolean(false), rhs),
        (Boolean(_), Empty) => compare_values(lhs, &Boolean(false)),
        _ => type_rank(lhs).cmp(&type_rank(rhs)),
    }
}

fn type_rank(v: &FormulaValue) -> u8 {
    match v {
        FormulaValue::Number(_) | FormulaValue::Empty => 0,
        FormulaValue::String(_) => 1,
        FormulaValue::Boolean(_) => 2,
        FormulaValue::Error(_) | FormulaValue::Array(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use pretty_assertions::assert_eq;

    fn wb() -> Workbook {
        let mut wb = Workbook::empty();
        wb.add_sheet("Sheet1").unwrap();
        wb.set_value_at(0, 0, 0, CellValue::Number(10.0)).unwrap(); // A1
        wb.set_value_at(0, 1, 0, CellValue::Number(20.0)).unwrap(); // A2
        wb.set_value_at(0, 2, 0, CellValue::String("x".into()))
            .unwrap(); // A3
        wb
    }

    fn eval_bytes(rgce: &[u8], wb: &Workbook) -> FormulaValue {
        let expr = decode(rgce, &[]);
        let ctx = EvaluationContext::new(wb, 0, 0, 1);
        evaluate(&expr, &ctx)
    }

    #[test]
    fn arithmetic_with_coercion() {
        let wb = wb();
        // ="3"+TRUE
        let rgce = [0x17, 0x01, 0x00, b'3', 0x1D, 0x01, 0x03];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Number(4.0));
    }

    #[test]
    fn division_by_zero() {
        let wb = wb();
        let rgce = [0x1E, 0x01, 0x00, 0x1E, 0x00, 0x00, 0x06];
        assert_eq!(
            eval_bytes(&rgce, &wb),
            FormulaValue::Error(CellError::Div0)
        );
    }

    #[test]
    fn error_short_circuits_arithmetic() {
        let wb = wb();
        // =#N/A+1
        let rgce = [0x1C, 0x2A, 0x1E, 0x01, 0x00, 0x03];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Error(CellError::Na));
    }

    #[test]
    fn cell_reference_reads_workbook() {
        let wb = wb();
        // =A1*2 (A1 relative)
        let rgce = [
            0x44, 0x00, 0x00, 0x00, 0xC0, 0x1E, 0x02, 0x00, 0x05,
        ];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Number(20.0));
    }

    #[test]
    fn deleted_reference_yields_ref_error() {
        let wb = wb();
        let rgce = [0x2A, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Error(CellError::Ref));
    }

    #[test]
    fn blank_compares_as_zero_against_numbers() {
        let a = FormulaValue::Empty;
        let b = FormulaValue::Number(0.0);
        assert_eq!(compare_values(&a, &b), Ordering::Equal);
        assert_eq!(
            compare_values(&FormulaValue::Empty, &FormulaValue::Number(-1.0)),
            Ordering::Greater
        );
    }

    #[test]
    fn blank_compares_as_empty_string_against_text() {
        assert_eq!(
            compare_values(&FormulaValue::Empty, &FormulaValue::String("a".into())),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&FormulaValue::Empty, &FormulaValue::String(String::new())),
            Ordering::Equal
        );
    }

    #[test]
    fn numbers_sort_before_text_before_booleans() {
        assert_eq!(
            compare_values(
                &FormulaValue::Number(9e99),
                &FormulaValue::String("a".into())
            ),
            Ordering::Less
        );
        assert_eq!(
            compare_values(
                &FormulaValue::String("zzz".into()),
                &FormulaValue::Boolean(false)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn text_comparison_is_case_insensitive() {
        assert_eq!(
            compare_values(
                &FormulaValue::String("Apple".into()),
                &FormulaValue::String("apple".into())
            ),
            Ordering::Equal
        );
    }

    #[test]
    fn array_broadcast_shape_mismatch() {
        let a = FormulaValue::Array(vec![vec![FormulaValue::Number(1.0); 2]; 2]);
        let b = FormulaValue::Array(vec![vec![FormulaValue::Number(1.0); 3]; 3]);
        assert_eq!(
            binary_scalar(BinaryOp::Add, &a, &b),
            FormulaValue::Error(CellError::Value)
        );
    }

    #[test]
    fn scalar_broadcasts_over_array() {
        let a = FormulaValue::Array(vec![vec![
            FormulaValue::Number(1.0),
            FormulaValue::Number(2.0),
        ]]);
        let b = FormulaValue::Number(10.0);
        assert_eq!(
            binary_scalar(BinaryOp::Multiply, &a, &b),
            FormulaValue::Array(vec![vec![
                FormulaValue::Number(10.0),
                FormulaValue::Number(20.0),
            ]])
        );
    }

    #[test]
    fn intersection_of_disjoint_ranges_is_null_error() {
        let wb = wb();
        // =A1:A2 B5:B6 (intersect)
        let rgce = [
            0x25, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, // A1:A2 abs
            0x25, 0x04, 0x00, 0x05, 0x00, 0x01, 0x00, 0x01, 0x00, // B5:B6 abs
            0x0F,
        ];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Error(CellError::Null));
    }

    #[test]
    fn attr_sum_shorthand_sums_range() {
        let wb = wb();
        // =SUM(A1:A2) via tAttrSum
        let rgce = [
            0x45, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, // A1:A2 abs
            0x19, 0x10, 0x00, 0x00,
        ];
        assert_eq!(eval_bytes(&rgce, &wb), FormulaValue::Number(30.0));
    }
}
