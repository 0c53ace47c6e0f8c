//! Formula store and reference index
//!
//! Formulas live in a slab keyed by stable handles, with a secondary
//! index from (sheet, row, col) to handle. Structural edits (inserting
//! or deleting rows and columns, removing sheets) rewrite every stored
//! token stream in place: relative references shift, absolute
//! references stay anchored, and references whose target span was
//! deleted become #REF! tombstones.

use ahash::AHashMap;

use crate::error::{FormulaError, FormulaResult};
use crate::token::{attr, AreaCoord, CellCoord, Expression, Token, WIRE_LAST_ROW};

/// Stable handle to a stored formula
pub type FormulaId = usize;

/// A stored formula and its owning cell
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRecord {
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
    pub expr: Expression,
    /// Recalculates on every pass (volatile function or marker)
    pub volatile: bool,
}

/// A structural edit to the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralEdit {
    InsertRows { sheet: usize, at: u32, count: u32 },
    DeleteRows { sheet: usize, at: u32, count: u32 },
    InsertCols { sheet: usize, at: u16, count: u16 },
    DeleteCols { sheet: usize, at: u16, count: u16 },
}

/// Slab-backed store of every formula in a workbook
#[derive(Debug, Default)]
pub struct FormulaStore {
    slots: Vec<Option<FormulaRecord>>,
    free: Vec<usize>,
    by_cell: AHashMap<(usize, u32, u16), FormulaId>,
}

impl FormulaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live formulas
    pub fn len(&self) -> usize {
        self.by_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cell.is_empty()
    }

    /// Store a formula at a cell, replacing any formula already there.
    pub fn insert(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        expr: Expression,
    ) -> FormulaId {
        let volatile = is_volatile_expr(&expr);
        let record = FormulaRecord {
            sheet,
            row,
            col,
            expr,
            volatile,
        };
        // Allocate before releasing any replaced formula, so the stale
        // handle keeps pointing at a freed slot instead of aliasing the
        // replacement
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(record);
                id
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        if let Some(&old) = self.by_cell.get(&(sheet, row, col)) {
            self.release(old);
        }
        self.by_cell.insert((sheet, row, col), id);
        id
    }

    /// Fill a rectangular shared group: the expression is stored at the
    /// top-left anchor and every other cell gets a placeholder pointing
    /// back at it.
    pub fn bind_shared(
        &mut self,
        sheet: usize,
        row1: u32,
        col1: u16,
        row2: u32,
        col2: u16,
        expr: Expression,
    ) -> FormulaResult<FormulaId> {
        if row1 > row2 || col1 > col2 {
            return Err(FormulaError::InvalidReference(format!(
                "degenerate group extent {row1},{col1}..{row2},{col2}"
            )));
        }
        if row2 > WIRE_LAST_ROW as u32 {
            return Err(FormulaError::InvalidReference(format!(
                "group extends past addressable rows: {row2}"
            )));
        }
        let anchor = self.insert(sheet, row1, col1, expr);
        for row in row1..=row2 {
            for col in col1..=col2 {
                if (row, col) == (row1, col1) {
                    continue;
                }
                let follower = Expression::from_tokens(vec![Token::Exp {
                    row: row1 as u16,
                    col: col1,
                }]);
                self.insert(sheet, row, col, follower);
            }
        }
        Ok(anchor)
    }

    /// Remove a formula by handle
    pub fn remove(&mut self, id: FormulaId) -> FormulaResult<FormulaRecord> {
        let record = self
            .slots
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(FormulaError::InvalidHandle(id))?;
        self.by_cell
            .remove(&(record.sheet, record.row, record.col));
        self.free.push(id);
        Ok(record)
    }

    fn release(&mut self, id: FormulaId) {
        if let Some(record) = self.slots.get_mut(id).and_then(Option::take) {
            self.by_cell
                .remove(&(record.sheet, record.row, record.col));
            self.free.push(id);
        }
    }

    pub fn get(&self, id: FormulaId) -> FormulaResult<&FormulaRecord> {
        self.slots
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(FormulaError::InvalidHandle(id))
    }

    /// Handle of the formula at a cell, if any
    pub fn id_at(&self, sheet: usize, row: u32, col: u16) -> Option<FormulaId> {
        self.by_cell.get(&(sheet, row, col)).copied()
    }

    /// Expression stored at a cell, if any
    pub fn formula_at(&self, sheet: usize, row: u32, col: u16) -> Option<Expression> {
        self.id_at(sheet, row, col)
            .and_then(|id| self.slots[id].as_ref())
            .map(|r| r.expr.clone())
    }

    /// Anchor expression for a shared-group placeholder. The anchor is
    /// just the formula stored at the anchor cell.
    pub fn group_anchor(&self, sheet: usize, row: u32, col: u16) -> Option<Expression> {
        self.formula_at(sheet, row, col)
            .filter(|expr| !matches!(expr.tokens.as_slice(), [Token::Exp { .. }]))
    }

    /// Formula cell positions on a sheet within a row window
    pub fn positions_in(&self, sheet: usize, row1: u32, row2: u32) -> Vec<(u32, u16)> {
        self.by_cell
            .keys()
            .filter(|(s, r, _)| *s == sheet && *r >= row1 && *r <= row2)
            .map(|(_, r, c)| (*r, *c))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormulaId, &FormulaRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|r| (id, r)))
    }

    /// Apply a structural edit: relocate formulas on the edited sheet
    /// and rewrite references in every stored expression. Formulas whose
    /// own cell was deleted are removed. Returns how many expressions
    /// changed.
    pub fn apply_edit(&mut self, edit: StructuralEdit) -> usize {
        // Drop formulas whose own cell was deleted first, so a survivor
        // relocating onto a freed cell never collides with it
        let doomed: Vec<FormulaId> = self
            .iter()
            .filter(|(_, r)| {
                r.sheet == edit_sheet(&edit)
                    && matches!(relocate(r.row, r.col, &edit), Relocation::Deleted)
            })
            .map(|(id, _)| id)
            .collect();
        for id in doomed {
            self.release(id);
        }

        // Then relocate the survivors with the grid
        for (id, slot) in self.slots.iter_mut().enumerate() {
            let Some(record) = slot else { continue };
            if record.sheet != edit_sheet(&edit) {
                continue;
            }
            if let Relocation::Move(row, col) = relocate(record.row, record.col, &edit) {
                self.by_cell
                    .remove(&(record.sheet, record.row, record.col));
                record.row = row;
                record.col = col;
                self.by_cell.insert((record.sheet, row, col), id);
            }
        }

        // Then rewrite the token streams
        let mut changed = 0;
        for slot in self.slots.iter_mut() {
            let Some(record) = slot else { continue };
            let mut any = false;
            for token in record.expr.tokens.iter_mut() {
                any |= rewrite_token(token, &edit, record.sheet);
            }
            if any {
                changed += 1;
            }
        }
        if changed > 0 {
            log::debug!("structural edit {edit:?} rewrote {changed} formulas");
        }
        changed
    }

    /// Remove a sheet: drop its formulas, turn 3-D references to it into
    /// #REF! tombstones, and renumber references to later sheets.
    pub fn remove_sheet(&mut self, sheet: usize) {
        let doomed: Vec<FormulaId> = self
            .iter()
            .filter(|(_, r)| r.sheet == sheet)
            .map(|(id, _)| id)
            .collect();
        for id in doomed {
            self.release(id);
        }
        let rekeyed = std::mem::take(&mut self.by_cell);
        self.by_cell = rekeyed
            .into_iter()
            .map(|((s, r, c), id)| {
                let s = if s > sheet { s - 1 } else { s };
                ((s, r, c), id)
            })
            .collect();
        for slot in self.slots.iter_mut() {
            let Some(record) = slot else { continue };
            if record.sheet > sheet {
                record.sheet -= 1;
            }
            for token in record.expr.tokens.iter_mut() {
                drop_sheet_in_token(token, sheet);
            }
        }
    }
}

fn edit_sheet(edit: &StructuralEdit) -> usize {
    match edit {
        StructuralEdit::InsertRows { sheet, .. }
        | StructuralEdit::DeleteRows { sheet, .. }
        | StructuralEdit::InsertCols { sheet, .. }
        | StructuralEdit::DeleteCols { sheet, .. } => *sheet,
    }
}

enum Relocation {
    Keep,
    Move(u32, u16),
    Deleted,
}

/// Where a formula's own cell lands after an edit. Cell positions
/// always move with the grid, unlike absolute references in formulas.
fn relocate(row: u32, col: u16, edit: &StructuralEdit) -> Relocation {
    match *edit {
        StructuralEdit::InsertRows { at, count, .. } if row >= at => {
            Relocation::Move(row + count, col)
        }
        StructuralEdit::DeleteRows { at, count, .. } => {
            if row >= at && row < at + count {
                Relocation::Deleted
            } else if row >= at + count {
                Relocation::Move(row - count, col)
            } else {
                Relocation::Keep
            }
        }
        StructuralEdit::InsertCols { at, count, .. } if col >= at => {
            Relocation::Move(row, col + count)
        }
        StructuralEdit::DeleteCols { at, count, .. } => {
            if col >= at && col < at + count {
                Relocation::Deleted
            } else if col >= at + count {
                Relocation::Move(row, col - count)
            } else {
                Relocation::Keep
            }
        }
        _ => Relocation::Keep,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjust {
    Keep,
    Shift(u16),
    Deleted,
}

/// Adjust one row coordinate for a row edit. Inserts shift relative
/// coordinates at or past the edit point; absolute coordinates stay
/// anchored. Deletes tombstone anything inside the span, absolute or
/// not, and shift relative coordinates past it.
fn adjust_row(row: u16, relative: bool, at: u32, count: u32, insert: bool) -> Adjust {
    let r = row as u32;
    if insert {
        if relative && r >= at {
            let shifted = r + count;
            if shifted > WIRE_LAST_ROW as u32 {
                Adjust::Deleted
            } else {
                Adjust::Shift(shifted as u16)
            }
        } else {
            Adjust::Keep
        }
    } else if r >= at && r < at + count {
        Adjust::Deleted
    } else if relative && r >= at + count {
        Adjust::Shift((r - count) as u16)
    } else {
        Adjust::Keep
    }
}

fn adjust_col(col: u16, relative: bool, at: u16, count: u16, insert: bool) -> Adjust {
    let max_col = crate::token::COL_MASK as u32;
    let c = col as u32;
    let (at, count) = (at as u32, count as u32);
    if insert {
        if relative && c >= at {
            let shifted = c + count;
            if shifted > max_col {
                Adjust::Deleted
            } else {
                Adjust::Shift(shifted as u16)
            }
        } else {
            Adjust::Keep
        }
    } else if c >= at && c < at + count {
        Adjust::Deleted
    } else if relative && c >= at + count {
        Adjust::Shift((c - count) as u16)
    } else {
        Adjust::Keep
    }
}

fn coord_raw(coord: &CellCoord) -> [u8; 4] {
    let row = coord.row.to_le_bytes();
    let col = coord.col_word().to_le_bytes();
    [row[0], row[1], col[0], col[1]]
}

fn area_raw(area: &AreaCoord) -> [u8; 8] {
    let r1 = area.first.row.to_le_bytes();
    let r2 = area.last.row.to_le_bytes();
    let c1 = area.first.col_word().to_le_bytes();
    let c2 = area.last.col_word().to_le_bytes();
    [r1[0], r1[1], r2[0], r2[1], c1[0], c1[1], c2[0], c2[1]]
}

/// Apply the edit to a single coordinate, in place.
fn adjust_coord(coord: &mut CellCoord, edit: &StructuralEdit) -> Result<bool, ()> {
    match *edit {
        StructuralEdit::InsertRows { at, count, .. } => {
            match adjust_row(coord.row, coord.row_rel, at, count, true) {
                Adjust::Keep => Ok(false),
                Adjust::Shift(r) => {
                    coord.row = r;
                    Ok(true)
                }
                Adjust::Deleted => Err(()),
            }
        }
        StructuralEdit::DeleteRows { at, count, .. } => {
            match adjust_row(coord.row, coord.row_rel, at, count, false) {
                Adjust::Keep => Ok(false),
                Adjust::Shift(r) => {
                    coord.row = r;
                    Ok(true)
                }
                Adjust::Deleted => Err(()),
            }
        }
        StructuralEdit::InsertCols { at, count, .. } => {
            match adjust_col(coord.col, coord.col_rel, at, count, true) {
                Adjust::Keep => Ok(false),
                Adjust::Shift(c) => {
                    coord.col = c;
                    Ok(true)
                }
                Adjust::Deleted => Err(()),
            }
        }
        StructuralEdit::DeleteCols { at, count, .. } => {
            match adjust_col(coord.col, coord.col_rel, at, count, false) {
                Adjust::Keep => Ok(false),
                Adjust::Shift(c) => {
                    coord.col = c;
                    Ok(true)
                }
                Adjust::Deleted => Err(()),
            }
        }
    }
}

/// Apply the edit to an area, clipping partial overlaps with a deleted
/// span. Whole-column areas ignore row edits and whole-row areas ignore
/// column edits (sentinel endpoints are not coordinates).
fn adjust_area(area: &mut AreaCoord, edit: &StructuralEdit) -> Result<bool, ()> {
    let row_edit = matches!(
        edit,
        StructuralEdit::InsertRows { .. } | StructuralEdit::DeleteRows { .. }
    );
    if row_edit && area.is_whole_column() {
        return Ok(false);
    }
    if !row_edit && area.is_whole_row() {
        return Ok(false);
    }

    let first = adjust_coord(&mut area.first, edit);
    let last = adjust_coord(&mut area.last, edit);
    match (first, last) {
        (Err(()), Err(())) => Err(()),
        (Ok(a), Ok(b)) => Ok(a | b),
        // Partial overlap with a deleted span: clip to the survivors
        (Err(()), Ok(_)) => {
            clip_start(area, edit);
            Ok(true)
        }
        (Ok(_), Err(())) => {
            clip_end(area, edit);
            Ok(true)
        }
    }
}

fn clip_start(area: &mut AreaCoord, edit: &StructuralEdit) {
    match *edit {
        StructuralEdit::DeleteRows { at, .. } => area.first.row = at as u16,
        StructuralEdit::DeleteCols { at, .. } => area.first.col = at,
        _ => {}
    }
}

fn clip_end(area: &mut AreaCoord, edit: &StructuralEdit) {
    match *edit {
        StructuralEdit::DeleteRows { at, .. } => area.last.row = at.saturating_sub(1) as u16,
        StructuralEdit::DeleteCols { at, .. } => area.last.col = at.saturating_sub(1),
        _ => {}
    }
}

/// Rewrite one token for a structural edit. Returns whether it changed.
fn rewrite_token(token: &mut Token, edit: &StructuralEdit, owner_sheet: usize) -> bool {
    let edited = edit_sheet(edit);
    match token {
        Token::Ref { class, coord } if owner_sheet == edited => {
            match adjust_coord(coord, edit) {
                Ok(changed) => changed,
                Err(()) => {
                    *token = Token::RefErr {
                        class: *class,
                        raw: coord_raw(coord),
                    };
                    true
                }
            }
        }
        Token::Ref3d {
            class,
            sheet,
            coord,
        } if *sheet as usize == edited => match adjust_coord(coord, edit) {
            Ok(changed) => changed,
            Err(()) => {
                *token = Token::RefErr3d {
                    class: *class,
                    sheet: *sheet,
                    raw: coord_raw(coord),
                };
                true
            }
        },
        Token::Area { class, area } if owner_sheet == edited => {
            match adjust_area(area, edit) {
                Ok(changed) => changed,
                Err(()) => {
                    *token = Token::AreaErr {
                        class: *class,
                        raw: area_raw(area),
                    };
                    true
                }
            }
        }
        Token::Area3d { class, sheet, area } if *sheet as usize == edited => {
            match adjust_area(area, edit) {
                Ok(changed) => changed,
                Err(()) => {
                    *token = Token::AreaErr3d {
                        class: *class,
                        sheet: *sheet,
                        raw: area_raw(area),
                    };
                    true
                }
            }
        }
        // Group placeholders track their anchor cell, which moves with
        // the grid like any other cell
        Token::Exp { row, col } if owner_sheet == edited => match *edit {
            StructuralEdit::InsertRows { at, count, .. } if *row as u32 >= at => {
                *row = (*row as u32 + count).min(WIRE_LAST_ROW as u32) as u16;
                true
            }
            StructuralEdit::DeleteRows { at, count, .. } if *row as u32 >= at + count => {
                *row = (*row as u32 - count) as u16;
                true
            }
            StructuralEdit::InsertCols { at, count, .. } if *col >= at => {
                *col = (*col as u32 + count as u32).min(crate::token::COL_MASK as u32) as u16;
                true
            }
            StructuralEdit::DeleteCols { at, count, .. } if *col >= at + count => {
                *col -= count;
                true
            }
            _ => false,
        },
        Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => {
            let mut any = false;
            for t in tokens.iter_mut() {
                any |= rewrite_token(t, edit, owner_sheet);
            }
            any
        }
        _ => false,
    }
}

/// Sheet-removal rewrite: tombstone 3-D references to the removed sheet
/// and renumber the rest.
fn drop_sheet_in_token(token: &mut Token, removed: usize) {
    match token {
        Token::Ref3d {
            class,
            sheet,
            coord,
        } => {
            if *sheet as usize == removed {
                *token = Token::RefErr3d {
                    class: *class,
                    sheet: *sheet,
                    raw: coord_raw(coord),
                };
            } else if *sheet as usize > removed {
                *sheet -= 1;
            }
        }
        Token::Area3d { class, sheet, area } => {
            if *sheet as usize == removed {
                *token = Token::AreaErr3d {
                    class: *class,
                    sheet: *sheet,
                    raw: area_raw(area),
                };
            } else if *sheet as usize > removed {
                *sheet -= 1;
            }
        }
        Token::RefErr3d { sheet, .. }
        | Token::AreaErr3d { sheet, .. }
        | Token::NameX { sheet, .. } => {
            if *sheet as usize > removed {
                *sheet -= 1;
            }
        }
        Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => {
            for t in tokens.iter_mut() {
                drop_sheet_in_token(t, removed);
            }
        }
        _ => {}
    }
}

fn is_volatile_expr(expr: &Expression) -> bool {
    fn walk(tokens: &[Token]) -> bool {
        tokens.iter().any(|t| match t {
            Token::Func { id, .. } | Token::FuncVar { id, .. } => {
                crate::functions::is_volatile(*id)
            }
            Token::Attr { flags, .. } => flags & attr::SEMI != 0,
            Token::MemArea { tokens, .. } | Token::MemFunc { tokens, .. } => walk(tokens),
            _ => false,
        })
    }
    walk(&expr.tokens)
}
