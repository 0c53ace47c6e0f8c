//! Workbook and sheet storage
//!
//! This is the cell-storage collaborator of the formula engine: a sparse
//! grid of values per sheet, a sheet table, and a workbook-level name
//! table with stable indices. Structural edits (row/column insert and
//! delete, sheet rename/delete) mutate the stored cells here; propagating
//! those edits into formula tokens is the reference index's job.

use crate::error::{Error, Result};
use crate::value::CellValue;
use crate::{CellAddress, CellRange, MAX_SHEET_NAME_LEN};
use ahash::AHashMap;

/// A single sheet: a name plus a sparse cell grid
#[derive(Debug, Default, Clone)]
pub struct Sheet {
    /// Sheet name as displayed (e.g. "Sheet1")
    pub name: String,
    /// Sparse cell storage keyed by (row, col)
    cells: AHashMap<(u32, u16), CellValue>,
}

impl Sheet {
    /// Create an empty sheet with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: AHashMap::new(),
        }
    }

    /// Get the value at (row, col); empty cells yield [`CellValue::Empty`]
    pub fn value_at(&self, row: u32, col: u16) -> CellValue {
        self.cells.get(&(row, col)).cloned().unwrap_or_default()
    }

    /// Set the value at (row, col); setting `Empty` clears the cell
    pub fn set_value_at(&mut self, row: u32, col: u16, value: CellValue) {
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), value);
        }
    }

    /// Iterate over populated cells
    pub fn iter_cells(&self) -> impl Iterator<Item = (u32, u16, &CellValue)> {
        self.cells.iter().map(|(&(r, c), v)| (r, c, v))
    }

    /// Number of populated cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Shift stored cells for a row insert/delete at `at` spanning `count` rows.
    ///
    /// On delete, cells inside the deleted span are discarded.
    pub fn shift_rows(&mut self, at: u32, count: u32, insert: bool) {
        let old = std::mem::take(&mut self.cells);
        for ((row, col), value) in old {
            if insert {
                let row = if row >= at { row + count } else { row };
                self.cells.insert((row, col), value);
            } else if row < at {
                self.cells.insert((row, col), value);
            } else if row >= at + count {
                self.cells.insert((row - count, col), value);
            }
            // rows in [at, at+count) fall away on delete
        }
    }

    /// Shift stored cells for a column insert/delete at `at` spanning `count` columns.
    pub fn shift_cols(&mut self, at: u16, count: u16, insert: bool) {
        let old = std::mem::take(&mut self.cells);
        for ((row, col), value) in old {
            if insert {
                let col = if col >= at { col + count } else { col };
                self.cells.insert((row, col), value);
            } else if col < at {
                self.cells.insert((row, col), value);
            } else if col >= at + count {
                self.cells.insert((row, col - count), value);
            }
        }
    }
}

/// What a defined name resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum NameTarget {
    /// A single cell on a sheet
    Cell { sheet: usize, address: CellAddress },
    /// A rectangular range on a sheet
    Range { sheet: usize, range: CellRange },
    /// A constant value
    Constant(CellValue),
}

/// A defined name (named range) in the workbook name table
///
/// Formula tokens refer to names by table index, not by text, so both
/// renaming a name and relocating its target leave referencing tokens
/// untouched.
#[derive(Debug, Clone)]
pub struct NameDef {
    /// Display name, case-insensitive for lookup
    pub name: String,
    /// What the name resolves to
    pub target: NameTarget,
}

/// A workbook: ordered sheets plus the name table
#[derive(Debug, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    names: Vec<NameDef>,
}

impl Workbook {
    /// Create a workbook with a single empty "Sheet1"
    pub fn new() -> Self {
        Self {
            sheets: vec![Sheet::new("Sheet1")],
            names: Vec::new(),
        }
    }

    /// Create a workbook with no sheets
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of sheets
    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// Get a sheet by index
    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    /// Get a mutable sheet by index
    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    /// Look up a sheet index by name (case-insensitive)
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Append a new sheet, returning its index
    pub fn add_sheet(&mut self, name: impl Into<String>) -> Result<usize> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_SHEET_NAME_LEN {
            return Err(Error::SheetNotFound(name));
        }
        if self.sheet_index(&name).is_some() {
            return Err(Error::DuplicateSheetName(name));
        }
        self.sheets.push(Sheet::new(name));
        Ok(self.sheets.len() - 1)
    }

    /// Rename a sheet in place; indices of other sheets are unaffected
    pub fn rename_sheet(&mut self, index: usize, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        if let Some(existing) = self.sheet_index(&new_name) {
            if existing != index {
                return Err(Error::DuplicateSheetName(new_name));
            }
        }
        let count = self.sheets.len();
        let sheet = self
            .sheets
            .get_mut(index)
            .ok_or(Error::SheetOutOfBounds(index, count))?;
        sheet.name = new_name;
        Ok(())
    }

    /// Remove a sheet. Later sheets shift down by one index.
    pub fn remove_sheet(&mut self, index: usize) -> Result<Sheet> {
        if index >= self.sheets.len() {
            return Err(Error::SheetOutOfBounds(index, self.sheets.len()));
        }
        Ok(self.sheets.remove(index))
    }

    /// Convenience: value at (sheet, row, col)
    pub fn value_at(&self, sheet: usize, row: u32, col: u16) -> CellValue {
        self.sheets
            .get(sheet)
            .map(|s| s.value_at(row, col))
            .unwrap_or_default()
    }

    /// Convenience: set value at (sheet, row, col)
    pub fn set_value_at(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: impl Into<CellValue>,
    ) -> Result<()> {
        let count = self.sheets.len();
        let s = self
            .sheets
            .get_mut(sheet)
            .ok_or(Error::SheetOutOfBounds(sheet, count))?;
        s.set_value_at(row, col, value.into());
        Ok(())
    }

    // === Name table ===

    /// Define a name, returning its stable table index
    pub fn define_name(&mut self, name: impl Into<String>, target: NameTarget) -> usize {
        self.names.push(NameDef {
            name: name.into(),
            target,
        });
        self.names.len() - 1
    }

    /// Get a name-table entry by index
    pub fn name(&self, index: usize) -> Option<&NameDef> {
        self.names.get(index)
    }

    /// Look up a name-table index by name (case-insensitive)
    pub fn name_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n.name.eq_ignore_ascii_case(name))
    }

    /// Rename a name-table entry in place; its index does not change
    pub fn rename_name(&mut self, index: usize, new_name: impl Into<String>) -> Result<()> {
        let count = self.names.len();
        let def = self
            .names
            .get_mut(index)
            .ok_or(Error::NameOutOfBounds(index, count))?;
        def.name = new_name.into();
        Ok(())
    }

    /// Point a name-table entry at a new target; its index does not change
    pub fn relocate_name(&mut self, index: usize, target: NameTarget) -> Result<()> {
        let count = self.names.len();
        let def = self
            .names
            .get_mut(index)
            .ok_or(Error::NameOutOfBounds(index, count))?;
        def.target = target;
        Ok(())
    }

    /// Number of defined names
    pub fn name_count(&self) -> usize {
        self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sheet_values() {
        let mut wb = Workbook::new();
        wb.set_value_at(0, 0, 0, 42.0).unwrap();
        wb.set_value_at(0, 1, 0, "hello").unwrap();
        assert_eq!(wb.value_at(0, 0, 0), CellValue::Number(42.0));
        assert_eq!(wb.value_at(0, 1, 0), CellValue::String("hello".into()));
        assert_eq!(wb.value_at(0, 5, 5), CellValue::Empty);
    }

    #[test]
    fn sheet_rename_keeps_index() {
        let mut wb = Workbook::new();
        let idx = wb.add_sheet("Data").unwrap();
        wb.rename_sheet(idx, "Data2024").unwrap();
        assert_eq!(wb.sheet_index("data2024"), Some(idx));
        assert_eq!(wb.sheet_index("Data"), None);
    }

    #[test]
    fn duplicate_sheet_name_rejected() {
        let mut wb = Workbook::new();
        assert!(wb.add_sheet("Sheet1").is_err());
    }

    #[test]
    fn row_insert_shifts_cells() {
        let mut sheet = Sheet::new("S");
        sheet.set_value_at(4, 0, CellValue::Number(1.0));
        sheet.set_value_at(2, 0, CellValue::Number(2.0));
        sheet.shift_rows(3, 2, true);
        assert_eq!(sheet.value_at(6, 0), CellValue::Number(1.0));
        assert_eq!(sheet.value_at(2, 0), CellValue::Number(2.0));
        assert_eq!(sheet.value_at(4, 0), CellValue::Empty);
    }

    #[test]
    fn row_delete_discards_span() {
        let mut sheet = Sheet::new("S");
        sheet.set_value_at(1, 0, CellValue::Number(1.0));
        sheet.set_value_at(3, 0, CellValue::Number(3.0));
        sheet.set_value_at(5, 0, CellValue::Number(5.0));
        sheet.shift_rows(2, 2, false);
        assert_eq!(sheet.value_at(1, 0), CellValue::Number(1.0));
        assert_eq!(sheet.value_at(3, 0), CellValue::Number(5.0));
        assert_eq!(sheet.cell_count(), 2);
    }

    #[test]
    fn name_table_stable_indices() {
        let mut wb = Workbook::new();
        let idx = wb.define_name(
            "TaxRate",
            NameTarget::Constant(CellValue::Number(0.0725)),
        );
        wb.define_name(
            "Data",
            NameTarget::Range {
                sheet: 0,
                range: CellRange::parse("A1:A10").unwrap(),
            },
        );

        wb.rename_name(idx, "VatRate").unwrap();
        assert_eq!(wb.name_index("vatrate"), Some(idx));
        assert_eq!(
            wb.name(idx).unwrap().target,
            NameTarget::Constant(CellValue::Number(0.0725))
        );
    }
}
