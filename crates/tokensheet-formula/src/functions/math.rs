//! Math functions

use tokensheet_core::CellError;

use crate::eval::{EvaluationContext, FormulaValue};
use crate::functions::criteria::CriteriaMatcher;
use crate::functions::{collect_numbers, flatten_values};

pub fn fn_sum(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match collect_numbers(args) {
        Ok(nums) => FormulaValue::Number(nums.iter().sum()),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_product(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => FormulaValue::Number(0.0),
        Ok(nums) => FormulaValue::Number(nums.iter().product()),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_sqrt(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_number() {
        Ok(n) if n < 0.0 => FormulaValue::Error(CellError::Num),
        Ok(n) => FormulaValue::Number(n.sqrt()),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_abs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_number() {
        Ok(n) => FormulaValue::Number(n.abs()),
        Err(e) => FormulaValue::Error(e),
    }
}

/// INT rounds toward negative infinity, unlike truncation
pub fn fn_int(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_number() {
        Ok(n) => FormulaValue::Number(n.floor()),
        Err(e) => FormulaValue::Error(e),
    }
}

/// ROUND half away from zero, to `digits` decimal places (negative
/// digits round left of the decimal point)
pub fn fn_round(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let n = match args[0].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    let digits = match args[1].coerce_number() {
        Ok(d) => d.trunc() as i32,
        Err(e) => return FormulaValue::Error(e),
    };
    let factor = 10f64.powi(digits);
    if !factor.is_finite() || factor == 0.0 {
        return FormulaValue::Number(if digits > 0 { n } else { 0.0 });
    }
    FormulaValue::Number((n * factor).round() / factor)
}

/// MOD with the sign of the divisor: MOD(-3, 2) = 1
pub fn fn_mod(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let a = match args[0].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    let b = match args[1].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    if b == 0.0 {
        return FormulaValue::Error(CellError::Div0);
    }
    FormulaValue::Number(a - b * (a / b).floor())
}

pub fn fn_power(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let base = match args[0].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    let exp = match args[1].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    let result = base.powf(exp);
    if result.is_finite() {
        FormulaValue::Number(result)
    } else {
        FormulaValue::Error(CellError::Num)
    }
}

pub fn fn_pi(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    FormulaValue::Number(std::f64::consts::PI)
}

/// SUMIF(range, criteria, [sum_range])
pub fn fn_sumif(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let test = flatten_values(&args[0]);
    let matcher = CriteriaMatcher::new(&args[1]);
    let sum_over = args.get(2).map(flatten_values).unwrap_or_else(|| test.clone());
    if sum_over.len() != test.len() {
        return FormulaValue::Error(CellError::Value);
    }
    let mut total = 0.0;
    for (candidate, value) in test.iter().zip(&sum_over) {
        if !matcher.matches(candidate) {
            continue;
        }
        match value {
            FormulaValue::Number(n) => total += n,
            FormulaValue::Error(e) => return FormulaValue::Error(*e),
            _ => {}
        }
    }
    FormulaValue::Number(total)
}

/// SUMIFS(sum_range, criteria_range1, criteria1, ...)
pub fn fn_sumifs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let sum_over = flatten_values(&args[0]);
    let mask = match criteria_mask(&args[1..], sum_over.len()) {
        Ok(mask) => mask,
        Err(e) => return FormulaValue::Error(e),
    };
    let mut total = 0.0;
    for (value, keep) in sum_over.iter().zip(&mask) {
        if !*keep {
            continue;
        }
        match value {
            FormulaValue::Number(n) => total += n,
            FormulaValue::Error(e) => return FormulaValue::Error(*e),
            _ => {}
        }
    }
    FormulaValue::Number(total)
}

/// Build the AND-mask for (criteria_range, criteria) pairs. Every range
/// must have exactly `len` cells.
pub(crate) fn criteria_mask(pairs: &[FormulaValue], len: usize) -> Result<Vec<bool>, CellError> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CellError::Value);
    }
    let mut mask = vec![true; len];
    for pair in pairs.chunks_exact(2) {
        let range = flatten_values(&pair[0]);
        if range.len() != len {
            return Err(CellError::Value);
        }
        let matcher = CriteriaMatcher::new(&pair[1]);
        for (keep, candidate) in mask.iter_mut().zip(&range) {
            *keep = *keep && matcher.matches(candidate);
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokensheet_core::Workbook;

    fn ctx_wb() -> Workbook {
        Workbook::new()
    }

    fn num(n: f64) -> FormulaValue {
        FormulaValue::Number(n)
    }

    fn arr(values: &[f64]) -> FormulaValue {
        FormulaValue::Array(values.iter().map(|&n| vec![num(n)]).collect())
    }

    #[test]
    fn sum_skips_text_in_ranges() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        let range = FormulaValue::Array(vec![vec![
            num(1.0),
            FormulaValue::String("nope".into()),
            num(2.0),
        ]]);
        assert_eq!(fn_sum(&[range], &ctx), num(3.0));
    }

    #[test]
    fn int_floors_negative_numbers() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(fn_int(&[num(-1.5)], &ctx), num(-2.0));
        assert_eq!(fn_int(&[num(1.9)], &ctx), num(1.0));
    }

    #[test]
    fn round_handles_negative_digits() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(fn_round(&[num(1234.5), num(-2.0)], &ctx), num(1200.0));
        assert_eq!(fn_round(&[num(2.675), num(2.0)], &ctx), num(2.68));
        assert_eq!(fn_round(&[num(-2.5), num(0.0)], &ctx), num(-3.0));
    }

    #[test]
    fn mod_takes_sign_of_divisor() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(fn_mod(&[num(-3.0), num(2.0)], &ctx), num(1.0));
        assert_eq!(fn_mod(&[num(3.0), num(-2.0)], &ctx), num(-1.0));
        assert_eq!(
            fn_mod(&[num(3.0), num(0.0)], &ctx),
            FormulaValue::Error(CellError::Div0)
        );
    }

    #[test]
    fn sqrt_of_negative_is_num_error() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        assert_eq!(
            fn_sqrt(&[num(-1.0)], &ctx),
            FormulaValue::Error(CellError::Num)
        );
    }

    #[test]
    fn sumif_with_separate_sum_range() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        let test = arr(&[1.0, 2.0, 3.0]);
        let sums = arr(&[10.0, 20.0, 30.0]);
        assert_eq!(
            fn_sumif(&[test, FormulaValue::String(">1".into()), sums], &ctx),
            num(50.0)
        );
    }

    #[test]
    fn sumifs_intersects_criteria() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        let sums = arr(&[1.0, 2.0, 3.0, 4.0]);
        let c1 = arr(&[1.0, 1.0, 2.0, 2.0]);
        let c2 = arr(&[5.0, 6.0, 5.0, 6.0]);
        assert_eq!(
            fn_sumifs(
                &[sums, c1, num(2.0), c2, num(6.0)],
                &ctx
            ),
            num(4.0)
        );
    }

    #[test]
    fn sumifs_shape_mismatch_is_value_error() {
        let wb = ctx_wb();
        let ctx = crate::eval::EvaluationContext::new(&wb, 0, 0, 0);
        let sums = arr(&[1.0, 2.0]);
        let short = arr(&[1.0]);
        assert_eq!(
            fn_sumifs(&[sums, short, num(1.0)], &ctx),
            FormulaValue::Error(CellError::Value)
        );
    }
}
