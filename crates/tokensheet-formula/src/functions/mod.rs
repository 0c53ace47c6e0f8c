//! Built-in function library
//!
//! Functions are keyed by their stable numeric id from the binary
//! format's function table, which is what `Func`/`FuncVar` tokens carry.

pub mod criteria;
pub mod distributions;
pub mod logical;
pub mod math;
pub mod statistical;
pub mod text;

use once_cell::sync::Lazy;

use ahash::AHashMap;
use tokensheet_core::CellError;

use crate::eval::{EvaluationContext, FormulaValue};

/// Well-known function ids from the binary function table
pub mod id {
    pub const COUNT: u16 = 0;
    pub const IF: u16 = 1;
    pub const ISNA: u16 = 2;
    pub const ISERROR: u16 = 3;
    pub const SUM: u16 = 4;
    pub const AVERAGE: u16 = 5;
    pub const MIN: u16 = 6;
    pub const MAX: u16 = 7;
    pub const NA: u16 = 10;
    pub const STDEV: u16 = 12;
    pub const PI: u16 = 19;
    pub const SQRT: u16 = 20;
    pub const ABS: u16 = 24;
    pub const INT: u16 = 25;
    pub const ROUND: u16 = 27;
    pub const LEN: u16 = 32;
    pub const TRUE: u16 = 34;
    pub const FALSE: u16 = 35;
    pub const AND: u16 = 36;
    pub const OR: u16 = 37;
    pub const NOT: u16 = 38;
    pub const MOD: u16 = 39;
    pub const VAR: u16 = 46;
    pub const LINEST: u16 = 49;
    pub const COUNTA: u16 = 169;
    pub const PRODUCT: u16 = 183;
    pub const MEDIAN: u16 = 227;
    pub const NORMSDIST: u16 = 294;
    pub const NORMINV: u16 = 295;
    pub const NORMSINV: u16 = 296;
    pub const CORREL: u16 = 307;
    pub const COVAR: u16 = 308;
    pub const FORECAST: u16 = 309;
    pub const INTERCEPT: u16 = 311;
    pub const RSQ: u16 = 313;
    pub const STEYX: u16 = 314;
    pub const SLOPE: u16 = 315;
    pub const CONCATENATE: u16 = 336;
    pub const POWER: u16 = 337;
    pub const SUMIF: u16 = 345;
    pub const COUNTIF: u16 = 346;
    pub const IFERROR: u16 = 480;
    pub const COUNTIFS: u16 = 481;
    pub const SUMIFS: u16 = 482;
    pub const AVERAGEIF: u16 = 483;
    pub const AVERAGEIFS: u16 = 484;
}

/// Function implementation signature
///
/// Spreadsheet-level failures come back as in-band error values, not
/// `Err`; arguments arrive already dereferenced (ranges as arrays).
pub type FunctionImpl = fn(&[FormulaValue], &EvaluationContext) -> FormulaValue;

/// Function definition
pub struct FunctionDef {
    /// Numeric id in the binary function table
    pub id: u16,
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (recalculates every time)
    pub volatile: bool,
}

/// Function registry
pub struct FunctionRegistry {
    functions: AHashMap<u16, FunctionDef>,
}

/// Global function registry (lazily initialized)
static FUNCTION_REGISTRY: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

pub fn registry() -> &'static FunctionRegistry {
    &FUNCTION_REGISTRY
}

/// Argument count for fixed-arity functions, `None` for variadic ones.
/// Fixed-arity tokens omit the count on the wire, so the table is the
/// only source of it.
pub fn fixed_arity(id: u16) -> Option<usize> {
    let def = registry().get(id)?;
    match def.max_args {
        Some(max) if max == def.min_args => Some(max),
        _ => None,
    }
}

/// Display name of a function id, for text rendering
pub fn function_name(id: u16) -> Option<&'static str> {
    registry().get(id).map(|def| def.name)
}

/// Whether the function forces recalculation on every pass
pub fn is_volatile(id: u16) -> bool {
    registry().get(id).is_some_and(|def| def.volatile)
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: AHashMap::new(),
        };
        registry.register_math_functions();
        registry.register_logical_functions();
        registry.register_text_functions();
        registry.register_statistical_functions();
        registry.register_distribution_functions();
        registry
    }

    /// Look up a function by id
    pub fn get(&self, id: u16) -> Option<&FunctionDef> {
        self.functions.get(&id)
    }

    /// Register a function
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.id, def);
    }

    fn register_math_functions(&mut self) {
        self.register(FunctionDef {
            id: id::SUM,
            name: "SUM",
            min_args: 1,
            max_args: None,
            implementation: math::fn_sum,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::PRODUCT,
            name: "PRODUCT",
            min_args: 1,
            max_args: None,
            implementation: math::fn_product,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::SQRT,
            name: "SQRT",
            min_args: 1,
            max_args: Some(1),
            implementation: math::fn_sqrt,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::ABS,
            name: "ABS",
            min_args: 1,
            max_args: Some(1),
            implementation: math::fn_abs,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::INT,
            name: "INT",
            min_args: 1,
            max_args: Some(1),
            implementation: math::fn_int,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::ROUND,
            name: "ROUND",
            min_args: 2,
            max_args: Some(2),
            implementation: math::fn_round,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::MOD,
            name: "MOD",
            min_args: 2,
            max_args: Some(2),
            implementation: math::fn_mod,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::POWER,
            name: "POWER",
            min_args: 2,
            max_args: Some(2),
            implementation: math::fn_power,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::PI,
            name: "PI",
            min_args: 0,
            max_args: Some(0),
            implementation: math::fn_pi,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::SUMIF,
            name: "SUMIF",
            min_args: 2,
            max_args: Some(3),
            implementation: math::fn_sumif,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::SUMIFS,
            name: "SUMIFS",
            min_args: 3,
            max_args: None,
            implementation: math::fn_sumifs,
            volatile: false,
        });
    }

    fn register_logical_functions(&mut self) {
        self.register(FunctionDef {
            id: id::IF,
            name: "IF",
            min_args: 1,
            max_args: Some(3),
            implementation: logical::fn_if,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::AND,
            name: "AND",
            min_args: 1,
            max_args: None,
            implementation: logical::fn_and,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::OR,
            name: "OR",
            min_args: 1,
            max_args: None,
            implementation: logical::fn_or,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::NOT,
            name: "NOT",
            min_args: 1,
            max_args: Some(1),
            implementation: logical::fn_not,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::TRUE,
            name: "TRUE",
            min_args: 0,
            max_args: Some(0),
            implementation: logical::fn_true,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::FALSE,
            name: "FALSE",
            min_args: 0,
            max_args: Some(0),
            implementation: logical::fn_false,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::IFERROR,
            name: "IFERROR",
            min_args: 2,
            max_args: Some(2),
            implementation: logical::fn_iferror,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::ISNA,
            name: "ISNA",
            min_args: 1,
            max_args: Some(1),
            implementation: logical::fn_isna,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::ISERROR,
            name: "ISERROR",
            min_args: 1,
            max_args: Some(1),
            implementation: logical::fn_iserror,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::NA,
            name: "NA",
            min_args: 0,
            max_args: Some(0),
            implementation: logical::fn_na,
            volatile: false,
        });
    }

    fn register_text_functions(&mut self) {
        self.register(FunctionDef {
            id: id::LEN,
            name: "LEN",
            min_args: 1,
            max_args: Some(1),
            implementation: text::fn_len,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::CONCATENATE,
            name: "CONCATENATE",
            min_args: 1,
            max_args: None,
            implementation: text::fn_concatenate,
            volatile: false,
        });
    }

    fn register_statistical_functions(&mut self) {
        self.register(FunctionDef {
            id: id::COUNT,
            name: "COUNT",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_count,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::COUNTA,
            name: "COUNTA",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_counta,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::AVERAGE,
            name: "AVERAGE",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_average,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::MIN,
            name: "MIN",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_min,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::MAX,
            name: "MAX",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_max,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::STDEV,
            name: "STDEV",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_stdev,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::VAR,
            name: "VAR",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_var,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::MEDIAN,
            name: "MEDIAN",
            min_args: 1,
            max_args: None,
            implementation: statistical::fn_median,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::COUNTIF,
            name: "COUNTIF",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_countif,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::COUNTIFS,
            name: "COUNTIFS",
            min_args: 2,
            max_args: None,
            implementation: statistical::fn_countifs,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::AVERAGEIF,
            name: "AVERAGEIF",
            min_args: 2,
            max_args: Some(3),
            implementation: statistical::fn_averageif,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::AVERAGEIFS,
            name: "AVERAGEIFS",
            min_args: 3,
            max_args: None,
            implementation: statistical::fn_averageifs,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::CORREL,
            name: "CORREL",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_correl,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::COVAR,
            name: "COVAR",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_covar,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::FORECAST,
            name: "FORECAST",
            min_args: 3,
            max_args: Some(3),
            implementation: statistical::fn_forecast,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::INTERCEPT,
            name: "INTERCEPT",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_intercept,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::RSQ,
            name: "RSQ",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_rsq,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::STEYX,
            name: "STEYX",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_steyx,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::SLOPE,
            name: "SLOPE",
            min_args: 2,
            max_args: Some(2),
            implementation: statistical::fn_slope,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::LINEST,
            name: "LINEST",
            min_args: 1,
            max_args: Some(4),
            implementation: statistical::fn_linest,
            volatile: false,
        });
    }

    fn register_distribution_functions(&mut self) {
        self.register(FunctionDef {
            id: id::NORMSDIST,
            name: "NORMSDIST",
            min_args: 1,
            max_args: Some(1),
            implementation: distributions::fn_normsdist,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::NORMSINV,
            name: "NORMSINV",
            min_args: 1,
            max_args: Some(1),
            implementation: distributions::fn_normsinv,
            volatile: false,
        });
        self.register(FunctionDef {
            id: id::NORMINV,
            name: "NORMINV",
            min_args: 3,
            max_args: Some(3),
            implementation: distributions::fn_norminv,
            volatile: false,
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten arguments into numbers under the aggregate rules: direct
/// scalars coerce (text "3" counts), while text and logicals inside a
/// range are ignored. Errors anywhere in the inputs win over any result.
pub(crate) fn collect_numbers(args: &[FormulaValue]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                for v in rows.iter().flatten() {
                    match v {
                        FormulaValue::Number(n) => out.push(*n),
                        FormulaValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            FormulaValue::Error(e) => return Err(*e),
            FormulaValue::Empty => {}
            other => out.push(other.coerce_number()?),
        }
    }
    Ok(out)
}

/// Flatten one argument into a value-per-cell list, keeping blanks and
/// text. Criteria functions need the raw cells, not just the numbers.
pub(crate) fn flatten_values(arg: &FormulaValue) -> Vec<FormulaValue> {
    match arg {
        FormulaValue::Array(rows) => rows.iter().flatten().cloned().collect(),
        other => vec![other.clone()],
    }
}
