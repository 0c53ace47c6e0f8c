//! Structural edits against stored formulas, checked end to end
//! through the store, the renderer, and the codec.

use pretty_assertions::assert_eq;
use tokensheet_core::{CellError, NameTarget, Workbook};
use tokensheet_formula::codec::{decode, encode};
use tokensheet_formula::eval::{evaluate, EvaluationContext, FormulaValue};
use tokensheet_formula::refindex::{FormulaStore, StructuralEdit};
use tokensheet_formula::render::{render, RenderContext};
use tokensheet_formula::token::{CellCoord, Expression, OperandClass, Token};

fn rel_a5() -> Expression {
    Expression::from_tokens(vec![Token::Ref {
        class: OperandClass::Value,
        coord: CellCoord::relative(4, 0),
    }])
}

fn abs_a5() -> Expression {
    Expression::from_tokens(vec![Token::Ref {
        class: OperandClass::Value,
        coord: CellCoord::absolute(4, 0),
    }])
}

fn rendered(wb: &Workbook, store: &FormulaStore, sheet: usize, row: u32, col: u16) -> String {
    let expr = store.formula_at(sheet, row, col).unwrap();
    let ctx = RenderContext::new(wb, sheet, row, col).with_store(store);
    render(&expr, &ctx)
}

#[test]
fn inserting_a_row_above_shifts_relative_not_absolute() {
    let wb = Workbook::new();
    let mut store = FormulaStore::new();
    store.insert(0, 0, 1, rel_a5()); // B1 = A5
    store.insert(0, 0, 2, abs_a5()); // C1 = $A$5
    store.apply_edit(StructuralEdit::InsertRows {
        sheet: 0,
        at: 2,
        count: 1,
    });
    assert_eq!(rendered(&wb, &store, 0, 0, 1), "A6");
    assert_eq!(rendered(&wb, &store, 0, 0, 2), "$A$5");
}

#[test]
fn deleting_the_referenced_range_yields_ref_error_not_a_failure() {
    let mut wb = Workbook::new();
    wb.set_value_at(0, 4, 0, 1.0).unwrap();
    let mut store = FormulaStore::new();
    let id = store.insert(0, 0, 1, rel_a5());
    store.apply_edit(StructuralEdit::DeleteRows {
        sheet: 0,
        at: 3,
        count: 4,
    });
    assert_eq!(rendered(&wb, &store, 0, 0, 1), "#REF!");
    let expr = store.get(id).unwrap().expr.clone();
    let ctx = EvaluationContext::new(&wb, 0, 0, 1).with_store(&store);
    assert_eq!(evaluate(&expr, &ctx), FormulaValue::Error(CellError::Ref));
}

#[test]
fn edited_formulas_still_encode_and_decode() {
    let mut store = FormulaStore::new();
    let id = store.insert(0, 0, 1, rel_a5());
    store.apply_edit(StructuralEdit::InsertRows {
        sheet: 0,
        at: 0,
        count: 10,
    });
    let expr = store.get(id).unwrap().expr.clone();
    let bytes = encode(&expr);
    assert_eq!(decode(&bytes.rgce, &bytes.rgcb), expr);
}

#[test]
fn tombstoned_reference_encodes_and_decodes() {
    let mut store = FormulaStore::new();
    let id = store.insert(0, 0, 1, abs_a5());
    store.apply_edit(StructuralEdit::DeleteRows {
        sheet: 0,
        at: 4,
        count: 1,
    });
    let expr = store.get(id).unwrap().expr.clone();
    assert!(matches!(expr.tokens[0], Token::RefErr { .. }));
    let bytes = encode(&expr);
    assert_eq!(decode(&bytes.rgce, &bytes.rgcb), expr);
}

#[test]
fn renaming_a_name_target_changes_nothing_in_the_token_stream() {
    let mut wb = Workbook::new();
    let rate = wb.define_name(
        "Rate",
        NameTarget::Cell {
            sheet: 0,
            address: tokensheet_core::CellAddress::new(0, 0),
        },
    );
    wb.set_value_at(0, 0, 0, 0.07).unwrap();
    let expr = Expression::from_tokens(vec![Token::Name {
        class: OperandClass::Value,
        index: 0,
        reserved: [0; 2],
    }]);
    let before = encode(&expr);

    // Re-point the name at another cell; the token only stores an index
    wb.relocate_name(
        rate,
        NameTarget::Cell {
            sheet: 0,
            address: tokensheet_core::CellAddress::new(1, 0),
        },
    )
    .unwrap();
    wb.set_value_at(0, 1, 0, 0.09).unwrap();
    let after = encode(&expr);
    assert_eq!(before.rgce, after.rgce);

    let ctx = EvaluationContext::new(&wb, 0, 0, 5);
    assert_eq!(evaluate(&expr, &ctx), FormulaValue::Number(0.09));
}

#[test]
fn deleting_a_sheet_tombstones_cross_sheet_references() {
    let mut wb = Workbook::new();
    wb.add_sheet("Data").unwrap();
    let mut store = FormulaStore::new();
    let id = store.insert(
        0,
        0,
        0,
        Expression::from_tokens(vec![Token::Ref3d {
            class: OperandClass::Value,
            sheet: 1,
            coord: CellCoord::relative(0, 0),
        }]),
    );
    store.remove_sheet(1);
    assert!(matches!(
        store.get(id).unwrap().expr.tokens[0],
        Token::RefErr3d { .. }
    ));
}
