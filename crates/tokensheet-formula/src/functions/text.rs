//! Text functions

use crate::eval::{EvaluationContext, FormulaValue};

/// LEN counts characters, not bytes
pub fn fn_len(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_string() {
        Ok(s) => FormulaValue::Number(s.chars().count() as f64),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_concatenate(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let mut out = String::new();
    for arg in args {
        match arg.coerce_string() {
            Ok(s) => out.push_str(&s),
            Err(e) => return FormulaValue::Error(e),
        }
    }
    FormulaValue::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokensheet_core::{CellError, Workbook};

    #[test]
    fn len_counts_chars() {
        let wb = Workbook::new();
        let ctx = EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(
            fn_len(&[FormulaValue::String("héllo".into())], &ctx),
            FormulaValue::Number(5.0)
        );
        // Numbers are stringified first: LEN(123) = 3
        assert_eq!(
            fn_len(&[FormulaValue::Number(123.0)], &ctx),
            FormulaValue::Number(3.0)
        );
    }

    #[test]
    fn concatenate_coerces_and_propagates_errors() {
        let wb = Workbook::new();
        let ctx = EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(
            fn_concatenate(
                &[
                    FormulaValue::String("a=".into()),
                    FormulaValue::Number(1.5),
                    FormulaValue::Boolean(true),
                ],
                &ctx
            ),
            FormulaValue::String("a=1.5TRUE".into())
        );
        assert_eq!(
            fn_concatenate(
                &[
                    FormulaValue::String("x".into()),
                    FormulaValue::Error(CellError::Name)
                ],
                &ctx
            ),
            FormulaValue::Error(CellError::Name)
        );
    }
}
