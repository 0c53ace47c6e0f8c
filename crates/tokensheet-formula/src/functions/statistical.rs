//! Statistical functions
//!
//! The paired functions (CORREL, SLOPE, ...) walk two ranges
//! positionally and keep only the positions where both cells hold
//! numbers, the way the interpreter lineage does.

use tokensheet_core::CellError;

use crate::eval::{EvaluationContext, FormulaValue};
use crate::functions::criteria::CriteriaMatcher;
use crate::functions::math::criteria_mask;
use crate::functions::{collect_numbers, flatten_values};

/// COUNT: numeric cells only
pub fn fn_count(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let mut count = 0usize;
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                count += rows
                    .iter()
                    .flatten()
                    .filter(|v| matches!(v, FormulaValue::Number(_)))
                    .count();
            }
            // Direct arguments count whenever they coerce
            FormulaValue::Number(_) | FormulaValue::Boolean(_) => count += 1,
            FormulaValue::String(s) if s.trim().parse::<f64>().is_ok() => count += 1,
            _ => {}
        }
    }
    FormulaValue::Number(count as f64)
}

/// Reference: LibreOffice ScInterpreter::ScCount2 (ifCOUNT2)
pub fn fn_counta(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let mut count = 0usize;
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                count += rows
                    .iter()
                    .flatten()
                    .filter(|v| !matches!(v, FormulaValue::Empty))
                    .count();
            }
            FormulaValue::Empty => {}
            _ => count += 1,
        }
    }
    FormulaValue::Number(count as f64)
}

pub fn fn_average(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => FormulaValue::Error(CellError::Div0),
        Ok(nums) => FormulaValue::Number(nums.iter().sum::<f64>() / nums.len() as f64),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_min(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => FormulaValue::Number(0.0),
        Ok(nums) => FormulaValue::Number(nums.iter().cloned().fold(f64::INFINITY, f64::min)),
        Err(e) => FormulaValue::Error(e),
    }
}

pub fn fn_max(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match collect_numbers(args) {
        Ok(nums) if nums.is_empty() => FormulaValue::Number(0.0),
        Ok(nums) => FormulaValue::Number(nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        Err(e) => FormulaValue::Error(e),
    }
}

/// Sample standard deviation (n-1 denominator)
pub fn fn_stdev(args: &[FormulaValue], ctx: &EvaluationContext) -> FormulaValue {
    match fn_var(args, ctx) {
        FormulaValue::Number(v) => FormulaValue::Number(v.sqrt()),
        other => other,
    }
}

/// Sample variance (n-1 denominator)
pub fn fn_var(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let nums = match collect_numbers(args) {
        Ok(nums) => nums,
        Err(e) => return FormulaValue::Error(e),
    };
    if nums.len() < 2 {
        return FormulaValue::Error(CellError::Div0);
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    let ss: f64 = nums.iter().map(|n| (n - mean) * (n - mean)).sum();
    FormulaValue::Number(ss / (nums.len() - 1) as f64)
}

/// Reference: LibreOffice ScInterpreter::ScMedian / GetMedian
pub fn fn_median(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let mut nums = match collect_numbers(args) {
        Ok(nums) => nums,
        Err(e) => return FormulaValue::Error(e),
    };
    if nums.is_empty() {
        return FormulaValue::Error(CellError::Num);
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = nums.len() / 2;
    let median = if nums.len() % 2 == 1 {
        nums[mid]
    } else {
        (nums[mid - 1] + nums[mid]) / 2.0
    };
    FormulaValue::Number(median)
}

/// Reference: LibreOffice ScInterpreter::ScCountIf
pub fn fn_countif(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let matcher = CriteriaMatcher::new(&args[1]);
    let count = flatten_values(&args[0])
        .iter()
        .filter(|v| matcher.matches(v))
        .count();
    FormulaValue::Number(count as f64)
}

/// Reference: LibreOffice ScInterpreter::ScCountIfs
pub fn fn_countifs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let len = flatten_values(&args[0]).len();
    match criteria_mask(args, len) {
        Ok(mask) => FormulaValue::Number(mask.iter().filter(|&&m| m).count() as f64),
        Err(e) => FormulaValue::Error(e),
    }
}

/// Reference: LibreOffice ScInterpreter::ScAverageIf / IterateParametersIf
pub fn fn_averageif(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let test = flatten_values(&args[0]);
    let matcher = CriteriaMatcher::new(&args[1]);
    let avg_over = args.get(2).map(flatten_values).unwrap_or_else(|| test.clone());
    if avg_over.len() != test.len() {
        return FormulaValue::Error(CellError::Value);
    }
    average_masked(&avg_over, test.iter().map(|v| matcher.matches(v)))
}

/// Reference: LibreOffice ScInterpreter::ScAverageIfs
pub fn fn_averageifs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let avg_over = flatten_values(&args[0]);
    match criteria_mask(&args[1..], avg_over.len()) {
        Ok(mask) => average_masked(&avg_over, mask.into_iter()),
        Err(e) => FormulaValue::Error(e),
    }
}

fn average_masked(
    values: &[FormulaValue],
    mask: impl Iterator<Item = bool>,
) -> FormulaValue {
    let mut total = 0.0;
    let mut count = 0usize;
    for (value, keep) in values.iter().zip(mask) {
        if !keep {
            continue;
        }
        match value {
            FormulaValue::Number(n) => {
                total += n;
                count += 1;
            }
            FormulaValue::Error(e) => return FormulaValue::Error(*e),
            _ => {}
        }
    }
    if count == 0 {
        FormulaValue::Error(CellError::Div0)
    } else {
        FormulaValue::Number(total / count as f64)
    }
}

/// Positional (x, y) pairs where both cells hold numbers. Mismatched
/// range sizes are #N/A; errors in either range win.
fn paired(
    xs: &FormulaValue,
    ys: &FormulaValue,
) -> Result<Vec<(f64, f64)>, CellError> {
    let xs = flatten_values(xs);
    let ys = flatten_values(ys);
    if xs.len() != ys.len() {
        return Err(CellError::Na);
    }
    let mut pairs = Vec::with_capacity(xs.len());
    for (x, y) in xs.iter().zip(&ys) {
        if let Some(e) = x.get_error().or_else(|| y.get_error()) {
            return Err(e);
        }
        if let (FormulaValue::Number(x), FormulaValue::Number(y)) = (x, y) {
            pairs.push((*x, *y));
        }
    }
    Ok(pairs)
}

/// Deviation sums over the pairs: (n, sxx, syy, sxy)
fn deviation_sums(pairs: &[(f64, f64)]) -> (usize, f64, f64, f64) {
    let n = pairs.len();
    if n == 0 {
        return (0, 0.0, 0.0, 0.0);
    }
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    (n, sxx, syy, sxy)
}

/// Reference: LibreOffice ScInterpreter::ScCorrel
pub fn fn_correl(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let pairs = match paired(&args[0], &args[1]) {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    let (n, sxx, syy, sxy) = deviation_sums(&pairs);
    if n == 0 || sxx == 0.0 || syy == 0.0 {
        return FormulaValue::Error(CellError::Div0);
    }
    FormulaValue::Number(sxy / (sxx * syy).sqrt())
}

/// Population covariance (divides by n)
pub fn fn_covar(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let pairs = match paired(&args[0], &args[1]) {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    let (n, _, _, sxy) = deviation_sums(&pairs);
    if n == 0 {
        return FormulaValue::Error(CellError::Div0);
    }
    FormulaValue::Number(sxy / n as f64)
}

/// SLOPE(known_ys, known_xs)
pub fn fn_slope(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match slope_intercept(&args[0], &args[1]) {
        Ok((slope, _)) => FormulaValue::Number(slope),
        Err(e) => FormulaValue::Error(e),
    }
}

/// INTERCEPT(known_ys, known_xs)
pub fn fn_intercept(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match slope_intercept(&args[0], &args[1]) {
        Ok((_, intercept)) => FormulaValue::Number(intercept),
        Err(e) => FormulaValue::Error(e),
    }
}

/// FORECAST(x, known_ys, known_xs): the fitted line evaluated at x
pub fn fn_forecast(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let x = match args[0].coerce_number() {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    match slope_intercept(&args[1], &args[2]) {
        Ok((slope, intercept)) => FormulaValue::Number(intercept + slope * x),
        Err(e) => FormulaValue::Error(e),
    }
}

/// RSQ(known_ys, known_xs): squared Pearson correlation
pub fn fn_rsq(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let pairs = match paired(&args[1], &args[0]) {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    let (n, sxx, syy, sxy) = deviation_sums(&pairs);
    if n == 0 || sxx == 0.0 || syy == 0.0 {
        return FormulaValue::Error(CellError::Div0);
    }
    FormulaValue::Number((sxy * sxy) / (sxx * syy))
}

/// STEYX(known_ys, known_xs): standard error of the predicted y
pub fn fn_steyx(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let pairs = match paired(&args[1], &args[0]) {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    let (n, sxx, syy, sxy) = deviation_sums(&pairs);
    if n < 3 {
        return FormulaValue::Error(CellError::Div0);
    }
    if sxx == 0.0 {
        return FormulaValue::Error(CellError::Div0);
    }
    let residual = syy - sxy * sxy / sxx;
    FormulaValue::Number((residual / (n - 2) as f64).sqrt())
}

/// LINEST(known_ys, [known_xs], [const]): returns the 1x2 array
/// {slope, intercept}. Omitted xs default to 1..n; const FALSE forces
/// the line through the origin.
///
/// Reference: LibreOffice ScInterpreter::ScLinest (coefficients only)
pub fn fn_linest(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let ys = flatten_values(&args[0]);
    let xs_value;
    let xs = match args.get(1) {
        Some(FormulaValue::Empty) | None => {
            xs_value = FormulaValue::Array(vec![(1..=ys.len())
                .map(|i| FormulaValue::Number(i as f64))
                .collect()]);
            &xs_value
        }
        Some(v) => v,
    };
    let through_origin = match args.get(2) {
        Some(FormulaValue::Empty) | None => false,
        Some(v) => match v.coerce_bool() {
            Ok(b) => !b,
            Err(e) => return FormulaValue::Error(e),
        },
    };
    let pairs = match paired(xs, &args[0]) {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    if pairs.is_empty() {
        return FormulaValue::Error(CellError::Div0);
    }
    let (slope, intercept) = if through_origin {
        let sxx: f64 = pairs.iter().map(|(x, _)| x * x).sum();
        if sxx == 0.0 {
            return FormulaValue::Error(CellError::Div0);
        }
        let sxy: f64 = pairs.iter().map(|(x, y)| x * y).sum();
        (sxy / sxx, 0.0)
    } else {
        let (_, sxx, _, sxy) = deviation_sums(&pairs);
        if sxx == 0.0 {
            return FormulaValue::Error(CellError::Div0);
        }
        let slope = sxy / sxx;
        let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / pairs.len() as f64;
        let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / pairs.len() as f64;
        (slope, mean_y - slope * mean_x)
    };
    FormulaValue::Array(vec![vec![
        FormulaValue::Number(slope),
        FormulaValue::Number(intercept),
    ]])
}

fn slope_intercept(ys: &FormulaValue, xs: &FormulaValue) -> Result<(f64, f64), CellError> {
    let pairs = paired(xs, ys)?;
    let (n, sxx, _, sxy) = deviation_sums(&pairs);
    if n == 0 || sxx == 0.0 {
        return Err(CellError::Div0);
    }
    let slope = sxy / sxx;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
    Ok((slope, mean_y - slope * mean_x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokensheet_core::Workbook;

    fn num(n: f64) -> FormulaValue {
        FormulaValue::Number(n)
    }

    fn col(values: &[f64]) -> FormulaValue {
        FormulaValue::Array(values.iter().map(|&n| vec![num(n)]).collect())
    }

    fn approx(value: &FormulaValue, expected: f64) {
        match value {
            FormulaValue::Number(n) => assert!(
                (n - expected).abs() < 1e-9,
                "expected {expected}, got {n}"
            ),
            other => panic!("expected number, got {other:?}"),
        }
    }

    fn ctx_run(f: impl Fn(&EvaluationContext)) {
        let wb = Workbook::new();
        let ctx = EvaluationContext::new(&wb, 0, 0, 0);
        f(&ctx);
    }

    #[test]
    fn count_vs_counta() {
        ctx_run(|ctx| {
            let range = FormulaValue::Array(vec![vec![
                num(1.0),
                FormulaValue::String("x".into()),
                FormulaValue::Empty,
                FormulaValue::Boolean(true),
            ]]);
            assert_eq!(fn_count(&[range.clone()], ctx), num(1.0));
            assert_eq!(fn_counta(&[range], ctx), num(3.0));
        });
    }

    #[test]
    fn average_of_nothing_is_div0() {
        ctx_run(|ctx| {
            let range = FormulaValue::Array(vec![vec![FormulaValue::String("x".into())]]);
            assert_eq!(
                fn_average(&[range], ctx),
                FormulaValue::Error(CellError::Div0)
            );
        });
    }

    #[test]
    fn sample_variance_and_stdev() {
        ctx_run(|ctx| {
            let range = col(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
            approx(&fn_var(&[range.clone()], ctx), 32.0 / 7.0);
            approx(&fn_stdev(&[range], ctx), (32.0f64 / 7.0).sqrt());
        });
    }

    #[test]
    fn median_even_and_odd() {
        ctx_run(|ctx| {
            assert_eq!(fn_median(&[col(&[3.0, 1.0, 2.0])], ctx), num(2.0));
            assert_eq!(fn_median(&[col(&[4.0, 1.0, 2.0, 3.0])], ctx), num(2.5));
        });
    }

    #[test]
    fn countif_with_wildcards() {
        ctx_run(|ctx| {
            let range = FormulaValue::Array(vec![vec![
                FormulaValue::String("apple".into()),
                FormulaValue::String("apricot".into()),
                FormulaValue::String("banana".into()),
            ]]);
            assert_eq!(
                fn_countif(&[range, FormulaValue::String("ap*".into())], ctx),
                num(2.0)
            );
        });
    }

    #[test]
    fn averageif_no_match_is_div0() {
        ctx_run(|ctx| {
            let range = col(&[1.0, 2.0]);
            assert_eq!(
                fn_averageif(&[range, FormulaValue::String(">99".into())], ctx),
                FormulaValue::Error(CellError::Div0)
            );
        });
    }

    #[test]
    fn paired_stats_skip_nonnumeric_positions() {
        ctx_run(|ctx| {
            let ys = FormulaValue::Array(vec![
                vec![num(2.0)],
                vec![FormulaValue::String("skip".into())],
                vec![num(6.0)],
                vec![num(8.0)],
            ]);
            let xs = col(&[1.0, 2.0, 3.0, 4.0]);
            // Pairs kept: (1,2), (3,6), (4,8), exactly y = 2x
            approx(&fn_slope(&[ys.clone(), xs.clone()], ctx), 2.0);
            approx(&fn_intercept(&[ys.clone(), xs.clone()], ctx), 0.0);
            approx(&fn_rsq(&[ys, xs], ctx), 1.0);
        });
    }

    #[test]
    fn mismatched_ranges_are_na() {
        ctx_run(|ctx| {
            assert_eq!(
                fn_correl(&[col(&[1.0, 2.0]), col(&[1.0])], ctx),
                FormulaValue::Error(CellError::Na)
            );
        });
    }

    #[test]
    fn correl_and_covar() {
        ctx_run(|ctx| {
            let xs = col(&[1.0, 2.0, 3.0, 4.0]);
            let ys = col(&[2.0, 4.0, 6.0, 8.0]);
            approx(&fn_correl(&[xs.clone(), ys.clone()], ctx), 1.0);
            // Population covariance of x with 2x: 2 * var_p(x) = 2 * 1.25
            approx(&fn_covar(&[xs, ys], ctx), 2.5);
        });
    }

    #[test]
    fn forecast_extends_the_fit() {
        ctx_run(|ctx| {
            let ys = col(&[3.0, 5.0, 7.0]);
            let xs = col(&[1.0, 2.0, 3.0]);
            approx(&fn_forecast(&[num(10.0), ys, xs], ctx), 21.0);
        });
    }

    #[test]
    fn steyx_perfect_fit_is_zero() {
        ctx_run(|ctx| {
            let ys = col(&[2.0, 4.0, 6.0]);
            let xs = col(&[1.0, 2.0, 3.0]);
            approx(&fn_steyx(&[ys, xs], ctx), 0.0);
        });
    }

    #[test]
    fn constant_x_is_div0() {
        ctx_run(|ctx| {
            let ys = col(&[1.0, 2.0, 3.0]);
            let xs = col(&[5.0, 5.0, 5.0]);
            assert_eq!(
                fn_slope(&[ys, xs], ctx),
                FormulaValue::Error(CellError::Div0)
            );
        });
    }

    #[test]
    fn linest_returns_slope_then_intercept() {
        ctx_run(|ctx| {
            let ys = col(&[3.0, 5.0, 7.0]);
            let xs = col(&[1.0, 2.0, 3.0]);
            match fn_linest(&[ys, xs], ctx) {
                FormulaValue::Array(rows) => {
                    approx(&rows[0][0], 2.0);
                    approx(&rows[0][1], 1.0);
                }
                other => panic!("expected array, got {other:?}"),
            }
        });
    }

    #[test]
    fn linest_defaults_xs_to_sequence() {
        ctx_run(|ctx| {
            let ys = col(&[10.0, 20.0, 30.0]);
            match fn_linest(&[ys], ctx) {
                FormulaValue::Array(rows) => {
                    approx(&rows[0][0], 10.0);
                    approx(&rows[0][1], 0.0);
                }
                other => panic!("expected array, got {other:?}"),
            }
        });
    }
}
