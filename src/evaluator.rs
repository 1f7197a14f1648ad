use crate::Error;
use crate::{MAX_EVAL_DEPTH, MAX_FORCE_STEPS};
use crate::ast::{Callable, Value, values_equal};
use crate::builtinops::{Arity, arity_mismatch, get_builtin_ops};
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Environment for variable bindings
///
/// A cheap handle to a shared scope. Cloning the handle shares the scope, so
/// closures and thunks that capture an environment keep it (and its parents)
/// alive for as long as they are reachable. Several child scopes may share one
/// parent.
#[derive(Clone)]
pub struct Environment(Rc<Scope>);

struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Create an empty root scope
    pub fn new() -> Self {
        Environment(Rc::new(Scope {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// Create an empty scope whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Scope {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.0.parent.as_ref()
    }

    /// Look a symbol up in this scope, then in each enclosing scope
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
    }

    /// Like [`Environment::get`], but reports a miss as `None`
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    /// Bind `name` in this scope only. Outer scopes are never modified;
    /// an existing outer binding of the same name is shadowed.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Whether both handles refer to the same scope
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Register a host function as an eager procedure.
    ///
    /// Arguments are forced to concrete values in the caller's environment
    /// before `func` is called, so `func` never sees thunks or call syntax.
    ///
    /// # Example
    /// ```
    /// use brackish::evaluator::{create_global_env, eval_until_concrete};
    /// use brackish::ast::Value;
    /// use brackish::Error;
    ///
    /// fn negate(args: &[Value]) -> Result<Value, Error> {
    ///     match args {
    ///         [Value::Int(n)] => Ok(Value::Int(-n)),
    ///         _ => Err(Error::TypeError("negate expects one int".into())),
    ///     }
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_procedure("negate", negate);
    /// let call = Value::list(vec![Value::Symbol("negate".into()), Value::Int(4)]);
    /// assert_eq!(eval_until_concrete(&call, &env).unwrap(), Value::Int(-4));
    /// ```
    pub fn register_procedure<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        let callable = Callable::new(name, move |args, caller_env, depth| {
            let forced = args
                .iter()
                .map(|arg| eval_until_concrete_with_depth(arg, caller_env, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            func(&forced)
        });
        self.set(name, Value::Procedure(callable));
    }

    /// Get all bindings visible from this environment
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings: HashMap<String, Value> = match self.parent() {
            Some(parent) => parent.get_all_bindings().into_iter().collect(),
            None => HashMap::new(),
        };

        // Local bindings shadow the parent's
        for (name, value) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment {
    // Bound values may capture this environment, so only names are printed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("parent", &self.0.parent)
            .finish()
    }
}

/// Evaluate an expression one step (public API)
///
/// Calls to `function` closures come back as [`Value::Lazy`]; use
/// [`eval_until_concrete`] to obtain a concrete value.
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Evaluate an expression and keep forcing the result until it is neither a
/// thunk nor call syntax (public API)
pub fn eval_until_concrete(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_until_concrete_with_depth(expr, env, 0)
}

/// Evaluate an expression with depth tracking to prevent stack overflow
pub(crate) fn eval_with_depth_tracking(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::DepthLimitExceeded(MAX_EVAL_DEPTH));
    }
    match expr {
        // Self-evaluating forms
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Option(_) => {
            Ok(expr.clone())
        }

        // Variable lookup
        Value::Symbol(name) => env.get(name),

        // Call
        Value::List(elements) => eval_list(elements, env, depth),

        // Force one layer; not memoized, so the expression is recomputed every time
        Value::Lazy(thunk) => {
            trace!("forcing {}", thunk.expr());
            eval_with_depth_tracking(thunk.expr(), thunk.env(), depth + 1)
        }

        Value::Unknown | Value::Function(_) | Value::Procedure(_) => Err(Error::EvalError(
            format!("unknown expression type: {}", expr.type_name()),
        )),
    }
}

/// Evaluate, then re-evaluate the result while it is deferred
pub(crate) fn eval_until_concrete_with_depth(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    let mut value = eval_with_depth_tracking(expr, env, depth)?;
    let mut steps = 0;
    while value.is_deferred() {
        steps += 1;
        if steps > MAX_FORCE_STEPS {
            return Err(Error::DepthLimitExceeded(MAX_FORCE_STEPS));
        }
        value = eval_with_depth_tracking(&value, env, depth)?;
    }
    Ok(value)
}

/// Evaluate a list expression (function application)
///
/// Every callable receives its argument expressions unevaluated along with the
/// caller's environment. Whether they get forced is up to the callable: `function`
/// closures defer them, `procedure` closures and host procedures force them first.
fn eval_list(elements: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    match elements {
        [] => Ok(Value::none()),

        [func_expr, arg_exprs @ ..] => {
            // The head may itself be a thunk (e.g. a callable passed to a `function` closure)
            let func = eval_until_concrete_with_depth(func_expr, env, depth + 1)?;

            match &func {
                Value::Function(callable) | Value::Procedure(callable) => {
                    trace!("calling {} with {} argument(s)", callable.name(), arg_exprs.len());
                    callable.call(arg_exprs, env, depth + 1)
                }
                _ => Err(Error::NotCallable(func.to_string())),
            }
        }
    }
}

/// Evaluate define special form
pub(crate) fn eval_define(args: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth + 1)?;
            debug!("define {name} as {}", value.type_name());
            env.set(name.clone(), value.clone());
            Ok(value)
        }
        [other, _] => Err(Error::TypeError(format!(
            "first argument to define must be a symbol, got {}",
            other.type_name()
        ))),
        _ => Err(arity_mismatch("define", args.len())),
    }
}

/// Validate a closure parameter list
fn parse_parameters(params: &Value, form: &str) -> Result<Vec<String>, Error> {
    let Value::List(items) = params else {
        return Err(Error::TypeError(format!(
            "{form} parameters must be a list, got {}",
            params.type_name()
        )));
    };

    items
        .iter()
        .map(|param| match param {
            Value::Symbol(name) => Ok(name.clone()),
            other => Err(Error::TypeError(format!(
                "{form} parameters must be symbols, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn check_closure_arity(params: &[String], args: &[Value], form: &str) -> Result<(), Error> {
    if params.len() == args.len() {
        Ok(())
    } else {
        Err(Error::arity_error_with_expr(
            Arity::Exact(params.len()),
            args.len(),
            form,
        ))
    }
}

/// Evaluate function special form: build a lazy closure
///
/// On call, list-shaped arguments are bound as thunks over the caller's
/// environment and atoms are bound as written. The body is returned as a thunk
/// over the new scope instead of being evaluated.
pub(crate) fn eval_function(
    args: &[Value],
    env: &Environment,
    _depth: usize,
) -> Result<Value, Error> {
    match args {
        [params, body] => {
            let params = parse_parameters(params, "function")?;
            let body = body.clone();
            let defining_env = env.clone();
            debug!("function closure over [{}]", params.join(" "));

            let closure = Callable::new("closure", move |call_args, caller_env, _depth| {
                check_closure_arity(&params, call_args, "function")?;

                let inner = Environment::with_parent(&defining_env);
                for (param, arg) in params.iter().zip(call_args) {
                    let bound = match arg {
                        Value::List(_) => Value::lazy(arg.clone(), caller_env.clone()),
                        _ => arg.clone(),
                    };
                    inner.set(param.clone(), bound);
                }
                Ok(Value::lazy(body.clone(), inner))
            });
            Ok(Value::Function(closure))
        }
        _ => Err(arity_mismatch("function", args.len())),
    }
}

/// Evaluate procedure special form: build an eager closure
///
/// On call, every argument is forced in the caller's environment before the
/// body is evaluated in the new scope.
pub(crate) fn eval_procedure(
    args: &[Value],
    env: &Environment,
    _depth: usize,
) -> Result<Value, Error> {
    match args {
        [params, body] => {
            let params = parse_parameters(params, "procedure")?;
            let body = body.clone();
            let defining_env = env.clone();
            debug!("procedure closure over [{}]", params.join(" "));

            let closure = Callable::new("closure", move |call_args, caller_env, depth| {
                check_closure_arity(&params, call_args, "procedure")?;

                let inner = Environment::with_parent(&defining_env);
                for (param, arg) in params.iter().zip(call_args) {
                    let value = eval_until_concrete_with_depth(arg, caller_env, depth + 1)?;
                    inner.set(param.clone(), value);
                }
                eval_with_depth_tracking(&body, &inner, depth + 1)
            });
            Ok(Value::Procedure(closure))
        }
        _ => Err(arity_mismatch("procedure", args.len())),
    }
}

/// Evaluate if special form
///
/// Branches are evaluated in the caller's environment, not a child scope.
pub(crate) fn eval_if(args: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let (condition_expr, then_expr, else_expr) = match args {
        [condition_expr, then_expr] => (condition_expr, then_expr, None),
        [condition_expr, then_expr, else_expr] => (condition_expr, then_expr, Some(else_expr)),
        _ => return Err(arity_mismatch("if", args.len())),
    };

    let condition = eval_until_concrete_with_depth(condition_expr, env, depth + 1)?;
    if condition.is_truthy() {
        eval_with_depth_tracking(then_expr, env, depth + 1)
    } else {
        match else_expr {
            Some(else_expr) => eval_with_depth_tracking(else_expr, env, depth + 1),
            None => Ok(Value::none()),
        }
    }
}

fn is_wildcard(pattern: &Value) -> bool {
    matches!(pattern, Value::Symbol(name) if name == "_")
}

/// Evaluate match special form
///
/// Clauses are tried in order; the first pattern structurally equal to the
/// subject wins. A `_` clause is only used once every other clause has failed.
pub(crate) fn eval_match(args: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let [subject_expr, clauses @ ..] = args else {
        return Err(arity_mismatch("match", args.len()));
    };

    let subject = eval_until_concrete_with_depth(subject_expr, env, depth + 1)?;

    let mut fallback = None;
    for clause in clauses {
        let Value::List(items) = clause else {
            return Err(Error::TypeError(format!(
                "each clause in match must be a list, got {}",
                clause.type_name()
            )));
        };
        let [pattern, result_expr] = &**items else {
            return Err(Error::TypeError(format!(
                "each clause in match must have exactly 2 elements, got {}",
                items.len()
            )));
        };

        if is_wildcard(pattern) {
            fallback = Some(result_expr);
            continue;
        }

        let pattern_value = eval_with_depth_tracking(pattern, env, depth + 1)?;
        if values_equal(&subject, &pattern_value, env) {
            return eval_with_depth_tracking(result_expr, env, depth + 1);
        }
    }

    match fallback {
        Some(result_expr) => eval_with_depth_tracking(result_expr, env, depth + 1),
        None => Ok(Value::none()),
    }
}

/// Create a global environment with all builtin forms and constants
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        env.set(
            builtin_op.id,
            Value::Function(Callable::new(builtin_op.id, move |args, env, depth| {
                builtin_op.call(args, env, depth)
            })),
        );
    }
    env.set("none", Value::none());

    env
}

#[cfg(all(test, feature = "parser"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::ast::{sym, val};
    use crate::parser::parse;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
        ReturnsCallable,             // Evaluation should produce a function or procedure
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    fn parse_test(input: &str) -> Value {
        parse(input, "<test>")
            .unwrap_or_else(|e| panic!("unexpected parse error for '{input}': {e}"))
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = parse_test(input);

        match (eval_until_concrete(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(
                    actual, *expected_val,
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Err(_), Error) => {}
            (Ok(Value::Function(_) | Value::Procedure(_)), ReturnsCallable) => {}
            (result, ReturnsCallable) => {
                panic!("{test_id}: '{input}' expected a callable, got {result:?}");
            }
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: '{input}' expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: '{input}' expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Run each case in a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("2.5", success(2.5)),
            ("-0.5e1", success(-5.0)),
            ("true", success(true)),
            ("false", success(false)),
            ("'hello'", success("hello")),
            ("''", success("")),
            ("none", EvalResult(Value::none())),
            // The empty list evaluates to an absent option
            ("[]", EvalResult(Value::none())),
            // === ARITHMETIC ===
            ("[int-add 1 2 3]", success(6)),
            ("[int-add]", success(0)),
            ("[int-add [int-add 1 2] [int-subtract 10 4]]", success(9)),
            ("[int-subtract 10 3 2]", success(5)),
            ("[int-subtract 7]", success(7)),
            ("[int-subtract]", success(0)),
            ("[int-add 1 'x']", SpecificError("must be integers")),
            ("[int-add 1 2.0]", SpecificError("must be integers")),
            ("[int-add 9223372036854775807 1]", SpecificError("overflow")),
            ("[int-subtract [some 1]]", Error),
            // === IF ===
            ("[if true 1 2]", success(1)),
            ("[if false 1 2]", success(2)),
            ("[if none 1 2]", success(2)),
            ("[if [some 0] 1 2]", success(1)),
            ("[if [some false] 1 2]", success(1)),
            ("[if 0 1 2]", success(1)),
            ("[if '' 1 2]", success(1)),
            ("[if [] 1 2]", success(2)),
            ("[if true 1]", success(1)),
            ("[if false 1]", EvalResult(Value::none())),
            // Only the chosen branch is evaluated
            ("[if true 1 undefined-symbol]", success(1)),
            ("[if false [int-add 1 'x'] 2]", success(2)),
            ("[if true]", SpecificError("ArityError")),
            ("[if true 1 2 3]", SpecificError("ArityError")),
            ("[if missing 1 2]", SpecificError("undefined symbol: missing")),
            // === MATCH ===
            ("[match 2 [0 'zero'] [1 'one'] [_ 'many']]", success("many")),
            ("[match 0 [0 'zero'] [1 'one'] [_ 'many']]", success("zero")),
            ("[match 1 [1 'first'] [1 'second']]", success("first")),
            // The wildcard is tried last wherever it appears
            ("[match 1 [_ 'wild'] [1 'one']]", success("one")),
            ("[match 5 [_ 'wild'] [1 'one']]", success("wild")),
            ("[match 5 [1 'one']]", EvalResult(Value::none())),
            ("[match 'a' ['a' 1] ['b' 2]]", success(1)),
            ("[match true [false 0] [true 1]]", success(1)),
            ("[match 1.5 [1.5 'float'] [_ 'other']]", success("float")),
            ("[match 1 [1.0 'float'] [_ 'other']]", success("other")),
            ("[match none [none 'empty'] [_ 'full']]", success("empty")),
            ("[match [some 1] [none 'empty'] [_ 'full']]", success("full")),
            ("[match [some 1] [[some 1] 'one'] [_ 'other']]", success("one")),
            ("[match [some 2] [[some 1] 'one'] [_ 'other']]", success("other")),
            ("[match [int-add 1 1] [[int-add 0 2] 'two'] [_ 'other']]", success("two")),
            // The result expression of a matching clause is evaluated
            ("[match 1 [1 [int-add 40 2]]]", success(42)),
            // Malformed clauses
            ("[match 1]", SpecificError("ArityError")),
            ("[match 1 2]", SpecificError("must be a list")),
            ("[match 1 [1]]", SpecificError("exactly 2 elements")),
            ("[match 1 [1 2 3]]", SpecificError("exactly 2 elements")),
            // Clauses after the first match are not inspected
            ("[match 1 [1 'ok'] 7]", success("ok")),
            // === OPTIONS ===
            ("[some 1]", EvalResult(Value::some(val(1)))),
            (
                "[some [int-add 1 2]]",
                EvalResult(Value::some(val(vec![sym("int-add"), val(1), val(2)]))),
            ),
            ("[some]", SpecificError("ArityError")),
            // === DEFINE ===
            ("[define x 5]", success(5)),
            ("[define x [int-add 2 3]]", success(5)),
            ("[define 1 2]", SpecificError("must be a symbol")),
            ("[define 'x' 2]", SpecificError("must be a symbol")),
            ("[define x]", SpecificError("ArityError")),
            // === CLOSURE CONSTRUCTION ERRORS ===
            ("[function x 1]", SpecificError("parameters must be a list")),
            ("[function [1] 1]", SpecificError("parameters must be symbols")),
            ("[procedure [a 'b'] 1]", SpecificError("parameters must be symbols")),
            ("[procedure [a]]", SpecificError("ArityError")),
            // === CALL ERRORS ===
            ("undefined-symbol", SpecificError("undefined symbol: undefined-symbol")),
            ("[1 2 3]", SpecificError("not a function or procedure")),
            ("['f' 1]", SpecificError("not a function or procedure")),
            ("[[some 1] 2]", SpecificError("not a function or procedure")),
            ("[undefined-fn 1]", SpecificError("undefined symbol: undefined-fn")),
            ("[[function [a] a] 1 2]", SpecificError("ArityError: function: expected 1")),
            ("[[procedure [a b] a] 1]", SpecificError("ArityError: procedure: expected 2")),
            // === LAZINESS ===
            // Unused list-shaped arguments of a function are never forced
            ("[[function [n] 42] [int-add 1 'x']]", success(42)),
            ("[[function [n] 42] [undefined-fn]]", success(42)),
            // Procedures force every argument at call time
            ("[[procedure [n] 42] [int-add 1 'x']]", SpecificError("must be integers")),
            ("[[procedure [n] 42] [undefined-fn]]", SpecificError("undefined symbol")),
            // Forcing a used argument surfaces its error
            ("[[function [n] [int-add n 1]] [int-add 1 'x']]", SpecificError("must be integers")),
            ("[[function [a b] [int-add a b]] [int-add 1 2] 4]", success(7)),
            ("[[procedure [a b] [int-subtract a b]] [int-add 5 5] 4]", success(6)),
            ("[[procedure [] 7]]", success(7)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_environment_scoping() {
        let environment_test_cases = vec![
            TestEnvironment(vec![
                ("[define x 1]", success(1)),
                ("x", success(1)),
                // define inside a procedure writes the procedure's own scope
                ("[[procedure [] [define x 2]]]", success(2)),
                ("x", success(1)),
                // Parameters shadow outer bindings without touching them
                ("[[procedure [x] x] 10]", success(10)),
                ("x", success(1)),
                // Redefinition in the same scope replaces the binding
                ("[define x [int-add x 1]]", success(2)),
                ("x", success(2)),
            ]),
            TestEnvironment(vec![
                // if and match branches run in the caller's scope, not a child
                ("[if true [define y 9]]", success(9)),
                ("y", success(9)),
                ("[match 1 [1 [define z 3]]]", success(3)),
                ("z", success(3)),
            ]),
            TestEnvironment(vec![
                // Closures capture their defining scope
                ("[define make-adder [procedure [a] [procedure [b] [int-add a b]]]]", ReturnsCallable),
                ("[define add5 [make-adder 5]]", ReturnsCallable),
                ("[add5 10]", success(15)),
                ("[define a 100]", success(100)),
                ("[add5 1]", success(6)),
            ]),
            TestEnvironment(vec![
                // Several closures share one parent scope
                ("[define base 10]", success(10)),
                ("[define plus [procedure [n] [int-add base n]]]", ReturnsCallable),
                ("[define minus [procedure [n] [int-subtract base n]]]", ReturnsCallable),
                ("[plus 1]", success(11)),
                ("[minus 1]", success(9)),
                // Later global definitions are visible to earlier closures
                ("[define base 20]", success(20)),
                ("[plus 1]", success(21)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_function_calls_are_deferred() {
        let env = create_global_env();
        eval(&parse_test("[define id [function [n] n]]"), &env).unwrap();

        // One evaluation step returns the unevaluated body
        let step = eval(&parse_test("[id 1]"), &env).unwrap();
        match &step {
            Value::Lazy(thunk) => assert_eq!(thunk.expr(), &sym("n")),
            other => panic!("expected a thunk, got {other:?}"),
        }

        // Forcing it produces the value
        assert_eq!(eval_until_concrete(&step, &env).unwrap(), val(1));

        // List arguments are bound as thunks over the caller's environment
        let env_inner = create_global_env();
        eval(&parse_test("[define keep [function [n] n]]"), &env_inner).unwrap();
        let bound = eval(&eval(&parse_test("[keep [int-add 1 2]]"), &env_inner).unwrap(), &env_inner)
            .unwrap();
        match &bound {
            Value::Lazy(thunk) => {
                assert_eq!(thunk.expr(), &val(vec![sym("int-add"), val(1), val(2)]));
                assert!(thunk.env().ptr_eq(&env_inner));
            }
            other => panic!("expected a thunk, got {other:?}"),
        }
    }

    #[test]
    fn test_function_binds_atoms_as_written() {
        let env = create_global_env();
        eval(&parse_test("[define id [function [x] x]]"), &env).unwrap();
        eval(&parse_test("[define y 5]"), &env).unwrap();

        // A bare symbol argument is not resolved in the caller's scope
        assert_eq!(
            eval_until_concrete(&parse_test("[id y]"), &env).unwrap(),
            sym("y")
        );
        // Procedures resolve it
        eval(&parse_test("[define id-eager [procedure [x] x]]"), &env).unwrap();
        assert_eq!(
            eval_until_concrete(&parse_test("[id-eager y]"), &env).unwrap(),
            val(5)
        );
    }

    #[test]
    fn test_thunks_are_not_memoized() {
        // Each use of `a` re-runs the define in the caller's scope
        run_tests_in_environment(vec![TestEnvironment(vec![
            ("[define counter 0]", success(0)),
            ("[define twice [function [a] [int-add a a]]]", ReturnsCallable),
            ("[twice [define counter [int-add counter 1]]]", success(3)),
            ("counter", success(2)),
            ("[twice [define counter [int-add counter 1]]]", success(7)),
        ])]);
    }

    #[test]
    fn test_higher_order_callables() {
        run_tests_in_environment(vec![TestEnvironment(vec![
            // A callable passed to a function arrives as a thunk and is forced at the call site
            (
                "[[function [f x] [f x]] [procedure [n] [int-add n 1]] 41]",
                success(42),
            ),
            // List-shaped arguments reach a function as thunks over the caller's scope
            (
                "[[procedure [f x] [f [int-add x 0]]] [function [n] [int-subtract n 1]] 43]",
                success(42),
            ),
            // A bare symbol reaches it as the symbol itself
            (
                "[[procedure [f x] [f x]] [function [n] [int-subtract n 1]] 43]",
                SpecificError("must be integers, got symbol"),
            ),
            // A call in head position
            ("[[[procedure [a] [procedure [b] [int-add a b]]] 2] 3]", success(5)),
            // Builtins are first-class
            ("[[procedure [op] [op 1 2 3]] int-add]", success(6)),
        ])]);
    }

    #[test]
    fn test_recursive_functions() {
        let fib = "[define calc-fib [function [n]
            [match n
                [0 0]
                [1 1]
                [_ [int-add [calc-fib [int-subtract n 1]] [calc-fib [int-subtract n 2]]]]
            ]
        ]]";

        let env = create_global_env();
        eval(&parse_test(fib), &env).unwrap();
        for (n, expected) in [(0, 0), (1, 1), (2, 1), (3, 2), (4, 3), (5, 5), (6, 8), (7, 13)] {
            let expr = parse_test(&format!("[calc-fib {n}]"));
            assert_eq!(
                eval_until_concrete(&expr, &env).unwrap(),
                val(expected),
                "fib({n})"
            );
        }
    }

    #[test]
    fn test_recursive_factorial() {
        let env = create_global_env();
        for definition in [
            "[define mul [procedure [a b]
                [match b
                    [0 0]
                    [_ [int-add a [mul a [int-subtract b 1]]]]]]]",
            "[define fact [function [n]
                [match n
                    [0 1]
                    [_ [mul [fact [int-subtract n 1]] n]]]]]",
        ] {
            eval(&parse_test(definition), &env).unwrap();
        }

        let result = eval_until_concrete(&parse_test("[fact 5]"), &env).unwrap();
        assert_eq!(result, val(120));
        assert_eq!(
            eval_until_concrete(&parse_test("[fact 0]"), &env).unwrap(),
            val(1)
        );
    }

    #[test]
    fn test_deferred_tail_calls_do_not_accumulate_depth() {
        let env = create_global_env();
        eval(
            &parse_test(
                "[define count-down [function [n]
                    [match n [0 'done'] [_ [count-down [int-subtract n 1]]]]]]",
            ),
            &env,
        )
        .unwrap();

        assert_eq!(
            eval_until_concrete(&parse_test("[count-down 30]"), &env).unwrap(),
            val("done")
        );
    }

    #[test]
    fn test_evaluation_depth_limit() {
        run_tests_in_environment(vec![TestEnvironment(vec![
            ("[define loop [procedure [n] [loop [int-add n 1]]]]", ReturnsCallable),
            ("[loop 0]", SpecificError("maximum evaluation depth exceeded")),
            // The environment is still usable afterwards
            ("[int-add 1 1]", success(2)),
        ])]);

        let env = create_global_env();
        let deep = format!("{}1{}", "[int-add ".repeat(200), "]".repeat(200));
        assert_eq!(
            eval(&parse_test(&deep), &env).unwrap_err(),
            Error::DepthLimitExceeded(MAX_EVAL_DEPTH)
        );
    }

    #[test]
    fn test_endless_deferred_recursion_is_bounded() {
        run_tests_in_environment(vec![TestEnvironment(vec![
            ("[define spin [function [n] [spin n]]]", ReturnsCallable),
            ("[spin 0]", SpecificError("maximum evaluation depth exceeded")),
            ("[int-add 1 1]", success(2)),
        ])]);

        let env = create_global_env();
        eval(&parse_test("[define spin [function [n] [spin n]]]"), &env).unwrap();
        assert_eq!(
            eval_until_concrete(&parse_test("[spin 0]"), &env).unwrap_err(),
            Error::DepthLimitExceeded(MAX_FORCE_STEPS)
        );
    }

    #[test]
    fn test_unknown_expression_types() {
        let env = create_global_env();
        let define = env.get("define").unwrap();

        for expr in [Value::Unknown, define] {
            match eval(&expr, &env).unwrap_err() {
                Error::EvalError(msg) => assert!(msg.contains("unknown expression type"), "{msg}"),
                other => panic!("expected EvalError, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_register_procedure() {
        fn string_length(args: &[Value]) -> Result<Value, Error> {
            match args {
                [Value::String(s)] => Ok(Value::Int(s.len() as i64)),
                [other] => Err(Error::TypeError(format!(
                    "string-length expects a string, got {}",
                    other.type_name()
                ))),
                _ => Err(Error::arity_error(1, args.len())),
            }
        }

        let env = create_global_env();
        env.register_procedure("string-length", string_length);

        assert!(matches!(env.get("string-length"), Ok(Value::Procedure(_))));
        eval(&parse_test("[define greeting 'hello']"), &env).unwrap();

        // Arguments arrive forced, including thunks passed through functions
        let cases = vec![
            ("[string-length 'abc']", success(3)),
            ("[string-length greeting]", success(5)),
            ("[[function [s] [string-length s]] [if true 'four' 'x']]", success(4)),
            ("[string-length 1]", SpecificError("expects a string")),
            ("[string-length]", SpecificError("ArityError")),
        ];
        for (i, (input, expected)) in cases.iter().enumerate() {
            execute_test_case(input, expected, &env, &format!("#{}", i + 1));
        }
    }

    #[test]
    fn test_environment_chain() {
        let root = Environment::new();
        root.set("a", val(1));
        let child = Environment::with_parent(&root);
        let sibling = Environment::with_parent(&root);

        child.set("b", val(2));
        assert_eq!(child.get("a").unwrap(), val(1));
        assert_eq!(child.get("b").unwrap(), val(2));
        assert!(sibling.lookup("b").is_none());
        assert_eq!(root.get("b").unwrap_err(), Error::UnboundVariable("b".into()));

        // Setting in a child shadows without mutating the parent
        child.set("a", val(10));
        assert_eq!(child.get("a").unwrap(), val(10));
        assert_eq!(root.get("a").unwrap(), val(1));
        assert_eq!(sibling.get("a").unwrap(), val(1));

        assert!(child.parent().unwrap().ptr_eq(&root));
        assert!(root.parent().is_none());

        let names: Vec<String> = child
            .get_all_bindings()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(child.get_all_bindings()[0].1, val(10));
    }

    #[test]
    fn test_global_env_contents() {
        let env = create_global_env();
        for name in [
            "define",
            "function",
            "procedure",
            "if",
            "match",
            "some",
            "int-add",
            "int-subtract",
        ] {
            assert!(
                matches!(env.get(name), Ok(Value::Function(_))),
                "{name} should be a function"
            );
        }
        assert_eq!(env.get("none").unwrap(), Value::none());
    }
}
