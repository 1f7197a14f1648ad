//! Registry of builtin forms.
//!
//! Every builtin is installed in the global environment as a [`Value::Function`],
//! so it receives its argument expressions unevaluated together with the caller's
//! environment. Each form decides for itself what to force and when:
//!
//! ```text
//! [define x [int-add 1 2]]     ; define evaluates its second argument once
//! [if c then else]             ; if forces c and evaluates only one branch
//! [some [int-add 1 2]]         ; some keeps its argument unevaluated
//! [int-add a b c]              ; arithmetic forces every operand
//! ```
//!
//! ## Adding New Operations
//!
//! 1. **Implement the form** with the signature `fn(&[Value], &Environment, usize) -> Result<Value, Error>`
//! 2. **Add it to BUILTIN_OPS** with its identifier and arity
//! 3. **Force arguments explicitly** with `eval_until_concrete_with_depth` where a concrete value is needed
//! 4. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{IntType, Value};
use crate::evaluator::{
    Environment, eval_define, eval_function, eval_if, eval_match, eval_procedure,
    eval_until_concrete_with_depth,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Implementation of a builtin form: unevaluated arguments, caller environment, current depth
pub type SpecialForm = fn(&[Value], &Environment, usize) -> Result<Value, Error>;

/// Number of arguments a form accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::ArityError {
                expected: *self,
                got,
                expression: None,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Definition of a builtin form
#[derive(Clone)]
pub struct BuiltinOp {
    /// The identifier the form is bound to in the global environment
    pub id: &'static str,
    pub form: SpecialForm,
    pub arity: Arity,
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Validate the argument count, then run the form
    pub(crate) fn call(
        &self,
        args: &[Value],
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        if let Err(Error::ArityError { expected, got, .. }) = self.arity.validate(args.len()) {
            return Err(Error::arity_error_with_expr(expected, got, self.id));
        }
        (self.form)(args, env, depth)
    }
}

//
// Builtin Form Implementations
//

fn builtin_some(args: &[Value], _env: &Environment, _depth: usize) -> Result<Value, Error> {
    match args {
        // The payload is stored as written, not evaluated
        [value] => Ok(Value::some(value.clone())),
        _ => Err(arity_mismatch("some", args.len())),
    }
}

/// Force an arithmetic operand down to an integer
fn force_int(
    arg: &Value,
    env: &Environment,
    depth: usize,
    op_name: &str,
) -> Result<IntType, Error> {
    match eval_until_concrete_with_depth(arg, env, depth + 1)? {
        Value::Int(n) => Ok(n),
        other => Err(Error::TypeError(format!(
            "arguments to {op_name} must be integers, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_int_add(args: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let mut sum: IntType = 0;
    for arg in args {
        let n = force_int(arg, env, depth, "int-add")?;
        sum = sum
            .checked_add(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))?;
    }
    Ok(Value::Int(sum))
}

fn builtin_int_subtract(args: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Value::Int(0));
    };

    let mut result = force_int(first, env, depth, "int-subtract")?;
    for arg in rest {
        let n = force_int(arg, env, depth, "int-subtract")?;
        result = result
            .checked_sub(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into()))?;
    }
    Ok(Value::Int(result))
}

/// Global registry of all builtin forms.
static BUILTIN_OPS: [BuiltinOp; 8] = [
    // Bindings and closures
    BuiltinOp {
        id: "define",
        form: eval_define,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "function",
        form: eval_function,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "procedure",
        form: eval_procedure,
        arity: Arity::Exact(2),
    },
    // Control flow
    BuiltinOp {
        id: "if",
        form: eval_if,
        arity: Arity::Range(2, 3),
    },
    BuiltinOp {
        id: "match",
        form: eval_match,
        arity: Arity::AtLeast(2),
    },
    // Options
    BuiltinOp {
        id: "some",
        form: builtin_some,
        arity: Arity::Exact(1),
    },
    // Arithmetic
    BuiltinOp {
        id: "int-add",
        form: builtin_int_add,
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "int-subtract",
        form: builtin_int_subtract,
        arity: Arity::Any,
    },
];

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Get all builtin forms (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    &BUILTIN_OPS
}

/// Find a builtin form by its identifier
pub(crate) fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Arity error for a form, taken from its registry entry.
///
/// Forms only run through [`BuiltinOp::call`], which checks the count first, so
/// their fallback arms use this instead of restating the expected arity.
pub(crate) fn arity_mismatch(id: &str, got: usize) -> Error {
    match find_builtin_op(id) {
        Some(op) => Error::arity_error_with_expr(op.arity, got, op.id),
        None => Error::EvalError(format!("unknown builtin form: {id}")),
    }
}
