//! This module defines the value model shared by the parser and the evaluator.
//! The main enum, [`Value`], is both the runtime datum and the expression tree:
//! a parsed program is a `Value`, and evaluating it produces new `Value`s. Besides
//! plain data (booleans, integers, floats, strings, symbols, lists and options) it
//! carries the two callable kinds ([`Value::Function`] receives unevaluated
//! arguments, [`Value::Procedure`] forces them first) and deferred computations
//! ([`Value::Lazy`]).
//!
//! The module also implements the debug printer (`Display`), conversions from and
//! to common Rust types, and [`values_equal`], the environment-aware structural
//! equality used by `match`.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::evaluator::Environment;

/// Type alias for integer values in the interpreter
pub(crate) type IntType = i64;

/// Canonical signature of every callable: unevaluated argument expressions,
/// the caller's environment and the current evaluation depth.
pub type CallableFn = dyn Fn(&[Value], &Environment, usize) -> Result<Value, Error>;

/// A native or user-defined callable shared between all values that refer to it.
#[derive(Clone)]
pub struct Callable {
    name: Rc<str>,
    func: Rc<CallableFn>,
}

impl Callable {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value], &Environment, usize) -> Result<Value, Error> + 'static,
    {
        Callable {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// The builtin id, or the closure kind for user-defined callables
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(
        &self,
        args: &[Value],
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        (self.func)(args, env, depth)
    }

    /// Identity comparison: two callables are the same only if they share an implementation
    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// A deferred computation: an unevaluated expression and the environment it
/// must be evaluated in. The environment stays alive as long as the thunk does.
pub struct Thunk {
    expr: Value,
    env: Environment,
}

impl Thunk {
    pub fn expr(&self) -> &Value {
        &self.expr
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}

/// Core value type of the interpreter
///
/// Lists are immutable once built; evaluation never rewrites a list in place,
/// it only produces new values. Lists double as data and as call syntax.
///
/// To build values in code and tests, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for empty lists
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone, Default)]
pub enum Value {
    /// Sentinel for an absent value; never produced by evaluation
    #[default]
    Unknown,
    Bool(bool),
    Int(IntType),
    Float(f64),
    String(String),
    /// Identifiers, resolved through the environment when evaluated
    Symbol(String),
    List(Rc<[Value]>),
    /// `Some` payloads are stored unevaluated, exactly as given to `some`
    Option(Option<Box<Value>>),
    /// Callable receiving unevaluated arguments (lazy closures and special forms)
    Function(Callable),
    /// Callable that forces every argument before running
    Procedure(Callable),
    /// Deferred expression paired with its captured environment
    Lazy(Rc<Thunk>),
}

impl Value {
    /// The absent option
    pub fn none() -> Value {
        Value::Option(None)
    }

    /// A present option wrapping `value`
    pub fn some(value: Value) -> Value {
        Value::Option(Some(Box::new(value)))
    }

    /// Defer `expr` until forced, to be evaluated in `env`
    pub fn lazy(expr: Value, env: Environment) -> Value {
        Value::Lazy(Rc::new(Thunk { expr, env }))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(items.into())
    }

    /// Name of this value's tag, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unknown => "unknown",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Option(_) => "option",
            Value::Function(_) => "function",
            Value::Procedure(_) => "procedure",
            Value::Lazy(_) => "lazy",
        }
    }

    /// Only `false` and `none` are false; everything else, including `0`, is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Option(None))
    }

    /// Whether more evaluation is needed to reach a concrete value
    pub(crate) fn is_deferred(&self) -> bool {
        matches!(self, Value::Lazy(_) | Value::List(_))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unknown => write!(f, "Unknown"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::List(list) => {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::Option(Some(v)) => write!(f, "Some({v:?})"),
            Value::Option(None) => write!(f, "None"),
            Value::Function(c) => write!(f, "Function({})", c.name()),
            Value::Procedure(c) => write!(f, "Procedure({})", c.name()),
            Value::Lazy(thunk) => write!(f, "Lazy({:?})", thunk.expr),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unknown => write!(f, "unknown"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            // Integral floats keep their decimal point so they parse back as floats
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => {
                write!(f, "'")?;
                for ch in s.chars() {
                    match ch {
                        '\'' => write!(f, "\\'")?,
                        '\\' => write!(f, "\\\\")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "'")
            }
            Value::Symbol(s) => write!(f, "{s}"),
            Value::List(elements) => {
                write!(f, "[")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "]")
            }
            Value::Option(Some(v)) => write!(f, "[some {v}]"),
            Value::Option(None) => write!(f, "none"),
            Value::Function(c) => write!(f, "<function:{}>", c.name()),
            Value::Procedure(c) => write!(f, "<procedure:{}>", c.name()),
            Value::Lazy(thunk) => write!(f, "<lazy {}>", thunk.expr),
        }
    }
}

/// Environment-free structural equality, used by host code and tests.
/// Symbols compare by name; callables by identity; thunks and `Unknown` never compare equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Option(a), Value::Option(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Procedure(a), Value::Procedure(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Structural equality as used by pattern matching.
///
/// Same-tag data compares by content. Two symbols with different names are
/// still equal if both are bound in `env` to values that are themselves equal,
/// so aliases of the same value match. Every other tag combination is unequal.
pub fn values_equal(a: &Value, b: &Value, env: &Environment) -> bool {
    values_equal_bounded(a, b, env, 0)
}

fn values_equal_bounded(a: &Value, b: &Value, env: &Environment, resolutions: usize) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => {
            if x == y {
                return true;
            }
            // Alias chains can be cyclic
            if resolutions >= MAX_EVAL_DEPTH {
                return false;
            }
            match (env.lookup(x), env.lookup(y)) {
                (Some(x_value), Some(y_value)) => {
                    values_equal_bounded(&x_value, &y_value, env, resolutions + 1)
                }
                _ => false,
            }
        }
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| values_equal_bounded(x, y, env, resolutions))
        }
        (Value::Option(x), Value::Option(y)) => match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => values_equal_bounded(x, y, env, resolutions),
            _ => false,
        },
        _ => false,
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Int(IntType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        Value::Option(v.map(|x| Box::new(x.into())))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl TryFrom<Value> for IntType {
    type Error = Error;

    fn try_from(value: Value) -> Result<IntType, Error> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(Error::TypeError(format!(
                "expected int, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(Error::TypeError(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64, Error> {
        match value {
            Value::Float(x) => Ok(x),
            other => Err(Error::TypeError(format!(
                "expected float, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String, Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(Error::TypeError(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating empty lists
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::List(Rc::from(Vec::new()))
}
