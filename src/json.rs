//! Conversion between data values and JSON
//!
//! Only data converts: `null` is `none`, `{"some": x}` is `[some x]`, and
//! booleans, numbers, strings and arrays map to their obvious counterparts.
//! Integers that fit in an `i64` become `Int`, every other number a `Float`.
//! Symbols, callables and thunks have no JSON form.

use crate::ast::Value;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

const SOME_KEY: &str = "some";

fn json_parse_error(kind: ParseErrorKind, message: String) -> Error {
    ParseError::new(kind, message, None, None).into()
}

/// Parse JSON text into a data value
pub fn parse_json(input: &str) -> Result<Value, Error> {
    let json_value: serde_json::Value = serde_json::from_str(input).map_err(|e| {
        json_parse_error(ParseErrorKind::InvalidSyntax, format!("invalid JSON: {e}"))
    })?;

    from_json_value(json_value)
}

/// Convert an already-parsed `serde_json::Value`
pub fn from_json_value(json: serde_json::Value) -> Result<Value, Error> {
    from_json_value_with_depth(json, 0)
}

fn from_json_value_with_depth(json: serde_json::Value, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(json_parse_error(
            ParseErrorKind::TooDeeplyNested,
            format!("JSON value too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        ));
    }
    match json {
        serde_json::Value::Null => Ok(Value::none()),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Value::Int(i)),
            (None, Some(x)) => Ok(Value::Float(x)),
            (None, None) => Err(json_parse_error(
                ParseErrorKind::InvalidSyntax,
                format!("unrepresentable number: {n}"),
            )),
        },
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(arr) => {
            let elements = arr
                .into_iter()
                .map(|v| from_json_value_with_depth(v, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::list(elements))
        }
        serde_json::Value::Object(obj) => {
            let mut entries = obj.into_iter();
            match (entries.next(), entries.next()) {
                (Some((key, payload)), None) if key == SOME_KEY => Ok(Value::some(
                    from_json_value_with_depth(payload, depth + 1)?,
                )),
                _ => Err(json_parse_error(
                    ParseErrorKind::InvalidSyntax,
                    format!("JSON objects must have the single key \"{SOME_KEY}\""),
                )),
            }
        }
    }
}

/// Render a data value as JSON text
pub fn value_to_json(value: &Value) -> Result<String, Error> {
    let json_value = to_json_value(value)?;
    serde_json::to_string(&json_value)
        .map_err(|e| Error::EvalError(format!("JSON serialization failed: {e}")))
}

/// Convert a data value to a `serde_json::Value`
pub fn to_json_value(value: &Value) -> Result<serde_json::Value, Error> {
    match value {
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::from(*n)),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| Error::TypeError(format!("cannot convert non-finite float {x} to JSON"))),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::List(elements) => {
            let converted: Result<Vec<serde_json::Value>, Error> =
                elements.iter().map(to_json_value).collect();
            Ok(serde_json::Value::Array(converted?))
        }
        Value::Option(None) => Ok(serde_json::Value::Null),
        Value::Option(Some(payload)) => Ok(serde_json::json!({ SOME_KEY: to_json_value(payload)? })),
        Value::Symbol(_)
        | Value::Function(_)
        | Value::Procedure(_)
        | Value::Lazy(_)
        | Value::Unknown => Err(Error::TypeError(format!(
            "cannot convert {} to JSON",
            value.type_name()
        ))),
    }
}
