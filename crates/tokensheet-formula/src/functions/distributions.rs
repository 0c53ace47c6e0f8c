//! Normal distribution functions
//!
//! These reproduce the classic approximations bit for bit rather than
//! using a maximally accurate erf: results are rounded to 15
//! significant digits so they agree with the historical cell output.

use tokensheet_core::CellError;

use crate::eval::{EvaluationContext, FormulaValue};

/// Round to 15 significant decimal digits
pub(crate) fn round15(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let magnitude = x.abs().log10().floor();
    let factor = 10f64.powf(14.0 - magnitude);
    (x * factor).round() / factor
}

/// Standard normal CDF via Abramowitz & Stegun 26.2.17
///
/// Absolute error below 7.5e-8 over the whole line.
pub(crate) fn normsdist(x: f64) -> f64 {
    const B0: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;

    let t = 1.0 / (1.0 + B0 * x.abs());
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    let pdf = (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt();
    let tail = pdf * poly;
    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF, Acklam's rational approximation
///
/// Relative error below 1.15e-9; the central and tail regions use
/// separate rational polynomials with break points at p = 0.02425.
pub(crate) fn normsinv(p: f64) -> Option<f64> {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if !(0.0..=1.0).contains(&p) || p == 0.0 || p == 1.0 {
        return None;
    }

    let x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    Some(x)
}

pub fn fn_normsdist(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    match args[0].coerce_number() {
        Ok(x) => FormulaValue::Number(round15(normsdist(x))),
        Err(e) => FormulaValue::Error(e),
    }
}

/// NORMSINV(p): #NUM! outside the open unit interval
pub fn fn_normsinv(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let p = match args[0].coerce_number() {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    match normsinv(p) {
        Some(x) => FormulaValue::Number(round15(x)),
        None => FormulaValue::Error(CellError::Num),
    }
}

/// NORMINV(p, mean, stddev): scaled inverse; stddev must be positive
pub fn fn_norminv(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaValue {
    let p = match args[0].coerce_number() {
        Ok(p) => p,
        Err(e) => return FormulaValue::Error(e),
    };
    let mean = match args[1].coerce_number() {
        Ok(m) => m,
        Err(e) => return FormulaValue::Error(e),
    };
    let stddev = match args[2].coerce_number() {
        Ok(s) => s,
        Err(e) => return FormulaValue::Error(e),
    };
    if stddev <= 0.0 {
        return FormulaValue::Error(CellError::Num);
    }
    match normsinv(p) {
        Some(x) => FormulaValue::Number(round15(mean + stddev * x)),
        None => FormulaValue::Error(CellError::Num),
    }
}
