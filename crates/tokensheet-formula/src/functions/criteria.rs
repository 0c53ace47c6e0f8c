//! Criteria matching for the conditional aggregates (SUMIF, COUNTIF,
//! AVERAGEIF and their multi-range variants)
//!
//! A criterion is a value or a string in the cell-entry grammar:
//! - a number matches numeric cells exactly
//! - plain text matches case-insensitively, with `*` and `?` wildcards
//!   and `~` escaping a literal wildcard character
//! - a leading comparison operator (`>`, `>=`, `<`, `<=`, `<>`, `=`)
//!   compares against the rest, numerically when it parses as a number
//!   and textually otherwise
//! - an empty string matches blank cells

use crate::eval::FormulaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl Cmp {
    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Cmp::Equal => ord == Equal,
            Cmp::NotEqual => ord != Equal,
            Cmp::LessThan => ord == Less,
            Cmp::LessEqual => ord != Greater,
            Cmp::GreaterThan => ord == Greater,
            Cmp::GreaterEqual => ord != Less,
        }
    }
}

#[derive(Debug)]
enum Criterion {
    /// Exact numeric match; text that merely looks numeric does not match
    Number(f64),
    /// Numeric comparison; non-numeric cells never match
    NumberCmp(Cmp, f64),
    /// Textual comparison, case-insensitive
    TextCmp(Cmp, String),
    /// Wildcard text pattern, lowercased
    Pattern(String),
    /// Blank cells only
    Blank,
    /// Matches nothing (error criteria)
    Never,
}

/// Compiled criterion, reusable across every cell of a range
#[derive(Debug)]
pub struct CriteriaMatcher {
    criterion: Criterion,
}

impl CriteriaMatcher {
    pub fn new(criteria: &FormulaValue) -> Self {
        let criterion = match criteria {
            FormulaValue::Number(n) => Criterion::Number(*n),
            FormulaValue::Boolean(b) => Criterion::Number(if *b { 1.0 } else { 0.0 }),
            FormulaValue::Empty => Criterion::Blank,
            FormulaValue::String(s) => parse_criterion(s),
            // Error or array criteria never match
            _ => Criterion::Never,
        };
        Self { criterion }
    }

    pub fn matches(&self, value: &FormulaValue) -> bool {
        match &self.criterion {
            Criterion::Number(expected) => {
                cell_number(value).is_some_and(|n| (n - expected).abs() < 1e-10)
            }
            Criterion::NumberCmp(op, expected) => cell_number(value).is_some_and(|n| {
                op.holds(n.partial_cmp(expected).unwrap_or(std::cmp::Ordering::Equal))
            }),
            Criterion::TextCmp(op, expected) => match value {
                FormulaValue::String(s) => op.holds(s.to_lowercase().cmp(expected)),
                _ => false,
            },
            Criterion::Pattern(pattern) => match value {
                FormulaValue::String(s) => wildcard_match(pattern, &s.to_lowercase()),
                FormulaValue::Boolean(b) => {
                    pattern == if *b { "true" } else { "false" }
                }
                _ => false,
            },
            Criterion::Blank => {
                matches!(value, FormulaValue::Empty)
                    || matches!(value, FormulaValue::String(s) if s.is_empty())
            }
            Criterion::Never => false,
        }
    }
}

fn parse_criterion(s: &str) -> Criterion {
    let s = s.trim();
    if s.is_empty() {
        return Criterion::Blank;
    }

    let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
        (Some(Cmp::GreaterEqual), rest)
    } else if let Some(rest) = s.strip_prefix("<=") {
        (Some(Cmp::LessEqual), rest)
    } else if let Some(rest) = s.strip_prefix("<>") {
        (Some(Cmp::NotEqual), rest)
    } else if let Some(rest) = s.strip_prefix('>') {
        (Some(Cmp::GreaterThan), rest)
    } else if let Some(rest) = s.strip_prefix('<') {
        (Some(Cmp::LessThan), rest)
    } else if let Some(rest) = s.strip_prefix('=') {
        (Some(Cmp::Equal), rest)
    } else {
        (None, s)
    };

    match op {
        Some(op) => {
            let rest = rest.trim();
            match rest.parse::<f64>() {
                Ok(n) => Criterion::NumberCmp(op, n),
                Err(_) if op == Cmp::Equal => parse_plain(rest),
                Err(_) => Criterion::TextCmp(op, rest.to_lowercase()),
            }
        }
        None => parse_plain(rest),
    }
}

fn parse_plain(s: &str) -> Criterion {
    if let Ok(n) = s.parse::<f64>() {
        Criterion::Number(n)
    } else {
        Criterion::Pattern(s.to_lowercase())
    }
}

fn cell_number(value: &FormulaValue) -> Option<f64> {
    match value {
        FormulaValue::Number(n) => Some(*n),
        FormulaValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Wildcard matching with `*` (any run) and `?` (one character).
/// A `~` escapes the next character. Iterative with backtracking to the
/// most recent star.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum P {
        Lit(char),
        One,
        Many,
    }

    let mut compiled = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        compiled.push(match c {
            '~' => P::Lit(chars.next().unwrap_or('~')),
            '?' => P::One,
            '*' => P::Many,
            other => P::Lit(other),
        });
    }
    if !compiled.iter().any(|p| matches!(p, P::One | P::Many)) {
        let literal: String = compiled
            .iter()
            .map(|p| match p {
                P::Lit(c) => *c,
                _ => unreachable!(),
            })
            .collect();
        return literal == text;
    }

    let text: Vec<char> = text.chars().collect();
    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < text.len() {
        let matched = match compiled.get(pi) {
            Some(P::Lit(c)) => *c == text[ti],
            Some(P::One) => true,
            _ => false,
        };
        if matched {
            pi += 1;
            ti += 1;
        } else if compiled.get(pi) == Some(&P::Many) {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(sp) = star_pi {
            pi = sp + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while compiled.get(pi) == Some(&P::Many) {
        pi += 1;
    }
    pi == compiled.len()
}
