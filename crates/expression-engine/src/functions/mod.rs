pub mod math;
pub mod string;

use crate::error::{ExpressionError, Result};
use lazy_static::lazy_static;
use model::core::value::Value;
use std::collections::HashMap;

/// Type alias for function implementations
pub type FunctionImpl = fn(&[Value]) -> Result<Value>;

/// Module whose members can be called without qualification.
pub const DEFAULT_MODULE: &str = "fn";

lazy_static! {
    static ref STANDARD: FunctionRegistry = FunctionRegistry::new();
}

/// Named functions available to expressions: unqualified globals plus
/// modules of members called as `module.name(...)`. Names are
/// case-insensitive.
pub struct FunctionRegistry {
    globals: HashMap<String, FunctionImpl>,
    modules: HashMap<String, HashMap<String, FunctionImpl>>,
}

impl FunctionRegistry {
    /// Create a new function registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            globals: HashMap::new(),
            modules: HashMap::new(),
        };

        registry.register_global("abs", math::eval_abs);
        registry.register_global("min", math::eval_min);
        registry.register_global("max", math::eval_max);
        registry.register_global("round", math::eval_round);
        registry.register_global("len", string::eval_len);
        registry.register_global("str", string::eval_str);
        registry.register_global("int", math::eval_int);
        registry.register_global("float", math::eval_float);

        let text_helpers: [(&str, FunctionImpl); 10] = [
            ("upper", string::eval_upper),
            ("lower", string::eval_lower),
            ("trim", string::eval_trim),
            ("concat", string::eval_concat),
            ("left", string::eval_left),
            ("right", string::eval_right),
            ("mid", string::eval_mid),
            ("replace", string::eval_replace),
            ("pad_left", string::eval_pad_left),
            ("pad_right", string::eval_pad_right),
        ];
        for (name, func) in text_helpers {
            registry.register(DEFAULT_MODULE, name, func);
            registry.register("text", name, func);
        }
        registry.register(DEFAULT_MODULE, "iif", string::eval_iif);
        registry.register(DEFAULT_MODULE, "coalesce", string::eval_coalesce);
        registry.register(DEFAULT_MODULE, "format_number", string::eval_format_number);

        registry.register("math", "sqrt", math::eval_sqrt);
        registry.register("math", "pow", math::eval_pow);
        registry.register("math", "floor", math::eval_floor);
        registry.register("math", "ceil", math::eval_ceil);
        registry.register("math", "log10", math::eval_log10);

        registry
    }

    /// Shared registry holding the built-in functions.
    pub fn standard() -> &'static FunctionRegistry {
        &STANDARD
    }

    pub fn register_global(&mut self, name: &str, func: FunctionImpl) {
        self.globals.insert(name.to_lowercase(), func);
    }

    pub fn register(&mut self, module: &str, name: &str, func: FunctionImpl) {
        self.modules
            .entry(module.to_lowercase())
            .or_default()
            .insert(name.to_lowercase(), func);
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains_key(&name.to_lowercase())
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(&module.to_lowercase())
    }

    /// Resolves a call site to its qualified name and implementation.
    ///
    /// Unqualified names bind to a global first, then to a member of
    /// [`DEFAULT_MODULE`]; qualified names must name an existing member.
    pub fn resolve(&self, module: Option<&str>, name: &str) -> Result<(String, FunctionImpl)> {
        let key = name.to_lowercase();

        let Some(module) = module else {
            if let Some(func) = self.globals.get(&key) {
                return Ok((key, *func));
            }
            return self
                .member(DEFAULT_MODULE, &key)
                .map(|func| (format!("{DEFAULT_MODULE}.{key}"), func))
                .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()));
        };

        let module_key = module.to_lowercase();
        if !self.modules.contains_key(&module_key) {
            return Err(ExpressionError::UnknownModule(module.to_string()));
        }
        self.member(&module_key, &key)
            .map(|func| (format!("{module_key}.{key}"), func))
            .ok_or_else(|| ExpressionError::UnknownFunction(format!("{module}.{name}")))
    }

    pub fn call(&self, module: Option<&str>, name: &str, args: &[Value]) -> Result<Value> {
        let (_, func) = self.resolve(module, name)?;
        func(args)
    }

    fn member(&self, module: &str, name: &str) -> Option<FunctionImpl> {
        self.modules.get(module).and_then(|m| m.get(name)).copied()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks the argument count of `function`.
pub(crate) fn expect_args(function: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(ExpressionError::InvalidFunctionArgs {
            function: function.to_string(),
            message: format!("Expected {expected} argument(s), got {}", args.len()),
        });
    }
    Ok(())
}

pub(crate) fn number_arg(function: &str, args: &[Value], index: usize) -> Result<Option<f64>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| ExpressionError::TypeMismatch {
                expected: format!("number for {function}"),
                actual: v.data_type().to_string(),
            }),
    }
}

pub(crate) fn count_arg(function: &str, args: &[Value], index: usize) -> Result<usize> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ExpressionError::InvalidFunctionArgs {
            function: function.to_string(),
            message: format!("Expected a non-negative count, got {value}"),
        })
}
