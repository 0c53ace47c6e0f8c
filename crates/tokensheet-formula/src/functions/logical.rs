//! Logical and error-inspection functions

use tokensheet_core::CellError;

use crate::eval::{EvaluationContext, FormulaValue};

/// IF(condition, [then], [else])
///
/// Both branches arrive already evaluated; jump markers in the token
/// stream are advisory. An omitted branch yields FALSE, matching the
/// cell grammar's `IF(x,y)` form.
pub fn fn_if(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let condition = match args[0].coerce_bool() {
        Ok(b) => b,
        Err(e) => return FormulaValue::Error(e),
    };
    if condition {
        args.get(1).cloned().unwrap_or(FormulaValue::Boolean(true))
    } else {
        args.get(2).cloned().unwrap_or(FormulaValue::Boolean(false))
    }
}

/// AND over every cell of every argument; text in ranges is ignored
pub fn fn_and(args: &[FormulaValue], ctx: &EvaluationContext) -> FormulaValue {
    combine(args, ctx, true, |acc, b| acc && b)
}

pub fn fn_or(args: &[FormulaValue], ctx: &EvaluationContext) -> FormulaValue {
    combine(args, ctx, false, |acc, b| acc || b)
}

fn combine(
    args: &[FormulaValue],
    _ctx: &EvaluationContext,
    start: bool,
    fold: fn(bool, bool) -> bool,
) -> FormulaValue {
    let mut acc = start;
    let mut saw_operand = false;
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                for v in rows.iter().flatten() {
                    match v {
                        FormulaValue::Error(e) => return FormulaValue::Error(*e),
                        FormulaValue::Number(n) => {
                            acc = fold(acc, *n != 0.0);
                            saw_operand = true;
                        }
                        FormulaValue::Boolean(b) => {
                            acc = fold(acc, *b);
                            saw_operand = true;
                        }
                        // Text and blanks in ranges don't participate
                        _ => {}
                    }
                }
            }
            other => match other.coerce_bool() {
                Ok(b) => {
                    acc = fold(acc, b);
                    saw_operand = true;
                }
                Err(e) => return FormulaValue::Error(e),
            },
        }
    }
    if saw_operand {
        FormulaValue::Boolean(acc)
    } else {
        FormulaValue::Error(CellError::Value)
    }
}

pub fn fn_not(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_bool() {
        Ok(b) => FormulaValue::Boolean(!b),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_true(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Boolean(true)
}

pub fn fn_false(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Boolean(false)
}

/// IFERROR(value, fallback): the only operator that consumes errors
pub fn fn_iferror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    if args[0].is_error() {
        args[1].clone()
    } else {
        args[0].clone()
    }
}

/// ISNA distinguishes #N/A from the other error codes
pub fn fn_isna(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Boolean(args[0].get_error() == Some(CellError::Na))
}

pub fn fn_iserror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Boolean(args[0].is_error())
}

pub fn fn_na(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Error(CellError::Na)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokensheet_core::Workbook;

    fn with_ctx(f: impl Fn(&EvaluationContext)) {
        let wb = Workbook::new();
        let ctx = EvaluationContext::new(&wb, 0, 0, 0);
        f(&ctx);
    }

    #[test]
    fn if_defaults_missing_branches() {
        with_ctx(|ctx| {
            assert_eq!(
                fn_if(&[FormulaValue::Boolean(true)], ctx),
                FormulaValue::Boolean(true)
            );
            assert_eq!(
                fn_if(&[FormulaValue::Boolean(false)], ctx),
                FormulaValue::Boolean(false)
            );
            assert_eq!(
                fn_if(
                    &[
                        FormulaValue::Number(1.0),
                        FormulaValue::String("yes".into()),
                        FormulaValue::String("no".into())
                    ],
                    ctx
                ),
                FormulaValue::String("yes".into())
            );
        });
    }

    #[test]
    fn if_propagates_condition_errors() {
        with_ctx(|ctx| {
            assert_eq!(
                fn_if(
                    &[
                        FormulaValue::Error(CellError::Div0),
                        FormulaValue::Number(1.0)
                    ],
                    ctx
                ),
                FormulaValue::Error(CellError::Div0)
            );
        });
    }

    #[test]
    fn and_or_over_mixed_args() {
        with_ctx(|ctx| {
            let range = FormulaValue::Array(vec![vec![
                FormulaValue::Boolean(true),
                FormulaValue::String("ignored".into()),
                FormulaValue::Number(0.0),
            ]]);
            assert_eq!(fn_and(&[range.clone()], ctx), FormulaValue::Boolean(false));
            assert_eq!(fn_or(&[range], ctx), FormulaValue::Boolean(true));
        });
    }

    #[test]
    fn and_with_no_logical_operands_is_value_error() {
        with_ctx(|ctx| {
            let range = FormulaValue::Array(vec![vec![FormulaValue::String("x".into())]]);
            assert_eq!(
                fn_and(&[range], ctx),
                FormulaValue::Error(CellError::Value)
            );
        });
    }

    #[test]
    fn iferror_swallows_only_errors() {
        with_ctx(|ctx| {
            assert_eq!(
                fn_iferror(
                    &[
                        FormulaValue::Error(CellError::Na),
                        FormulaValue::Number(0.0)
                    ],
                    ctx
                ),
                FormulaValue::Number(0.0)
            );
            assert_eq!(
                fn_iferror(
                    &[FormulaValue::Number(7.0), FormulaValue::Number(0.0)],
                    ctx
                ),
                FormulaValue::Number(7.0)
            );
        });
    }

    #[test]
    fn isna_is_specific() {
        with_ctx(|ctx| {
            assert_eq!(
                fn_isna(&[FormulaValue::Error(CellError::Na)], ctx),
                FormulaValue::Boolean(true)
            );
            assert_eq!(
                fn_isna(&[FormulaValue::Error(CellError::Div0)], ctx),
                FormulaValue::Boolean(false)
            );
            assert_eq!(
                fn_iserror(&[FormulaValue::Error(CellError::Div0)], ctx),
                FormulaValue::Boolean(true)
            );
        });
    }
}
