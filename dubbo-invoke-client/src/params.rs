//! Parameter conversion.
//!
//! Callers pass parameters as JSON (or a bare literal) plus optional Java
//! type hints. Conversion settles each parameter's Java type and coerces the
//! value to it, so the raw protocol layer can build an exact descriptor.

use crate::error::ClientError;
use dubbo_invoke_protocol::Value;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Converted parameters, ready for any layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    /// Fully qualified Java type per parameter.
    pub types: Vec<String>,
    pub values: Vec<Value>,
}

impl Parameters {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON rendering for the HTTP layer. Typed objects keep their `class`.
    pub fn to_json(&self) -> Vec<Json> {
        self.values.iter().map(json_with_class).collect()
    }
}

fn json_with_class(value: &Value) -> Json {
    match value {
        Value::Object { class, fields } => {
            let mut map: serde_json::Map<String, Json> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_with_class(v)))
                .collect();
            map.insert("class".to_string(), Json::String(class.clone()));
            Json::Object(map)
        }
        Value::List(items) => Json::Array(items.iter().map(json_with_class).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_with_class(v)))
                .collect(),
        ),
        other => other.to_json(),
    }
}

/// Expands short type names (`String`, `Long`, `List`, ...) to the fully
/// qualified names providers expect. Primitives and dotted names are kept.
pub fn canonical_type(name: &str) -> String {
    let name = name.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return format!("{}[]", canonical_type(element));
    }
    match name {
        "String" | "Integer" | "Long" | "Double" | "Float" | "Boolean" | "Byte" | "Short"
        | "Character" | "Object" | "Number" => format!("java.lang.{}", name),
        "List" | "ArrayList" | "Map" | "HashMap" | "Set" | "Date" => format!("java.util.{}", name),
        "BigDecimal" | "BigInteger" => format!("java.math.{}", name),
        other => other.to_string(),
    }
}

/// Splits a comma separated list of type hints.
pub fn parse_type_hints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(canonical_type)
        .collect()
}

/// Parses raw parameter text (JSON or a single literal) against `hints`.
pub fn parse_parameters(raw: &str, hints: &[String]) -> Result<Parameters, ClientError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return convert(Vec::new(), hints);
    }
    match serde_json::from_str::<Json>(raw) {
        Ok(json) => convert_json(json, hints),
        // a bare literal such as `123L` or `hello`
        Err(_) => convert(vec![Json::String(raw.to_string())], hints),
    }
}

/// Converts one JSON document: an array is the parameter list, anything else
/// is a single parameter.
pub fn convert_json(json: Json, hints: &[String]) -> Result<Parameters, ClientError> {
    match json {
        Json::Array(items) => {
            let single_list_hint = hints.len() == 1 && is_list_type(&canonical_type(&hints[0]));
            let wrapped_once = items.len() == 1 && items[0].is_array();
            if single_list_hint && !items.is_empty() && !wrapped_once {
                convert(vec![Json::Array(items)], hints)
            } else {
                convert(items, hints)
            }
        }
        other => convert(vec![other], hints),
    }
}

/// Converts positional parameters. Missing hints are inferred.
pub fn convert(params: Vec<Json>, hints: &[String]) -> Result<Parameters, ClientError> {
    if hints.len() > params.len() {
        return Err(ClientError::InvalidParameter(format!(
            "{} type hints given for {} parameters",
            hints.len(),
            params.len()
        )));
    }

    let total = params.len();
    let mut converted = Parameters::default();
    for (index, param) in params.into_iter().enumerate() {
        let hint = hints.get(index).map(|h| canonical_type(h));
        let (java_type, value) = convert_one(param, hint.as_deref(), index, total)
            .map_err(|reason| {
                ClientError::InvalidParameter(format!("parameter {}: {}", index + 1, reason))
            })?;
        converted.types.push(java_type);
        converted.values.push(value);
    }
    Ok(converted)
}

fn convert_one(
    param: Json,
    hint: Option<&str>,
    index: usize,
    total: usize,
) -> Result<(String, Value), String> {
    match param {
        Json::Null => {
            let java_type = match hint {
                Some(hint) => hint.to_string(),
                None => guess_null_type(index, total).to_string(),
            };
            Ok((java_type, Value::Null))
        }
        Json::Array(items) => {
            let java_type = match hint {
                Some(hint) if is_list_type(hint) => hint.to_string(),
                Some(hint) => return Err(format!("an array cannot be passed as {}", hint)),
                None => "java.util.List".to_string(),
            };
            let element = java_type.strip_suffix("[]").map(str::to_string);
            let values = items
                .into_iter()
                .map(|item| match element.as_deref() {
                    Some(element) if is_scalar_type(element) => coerce(item, element),
                    _ => Ok(Value::from(item)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((java_type, Value::List(values)))
        }
        Json::Object(mut map) => match map.remove("class") {
            Some(Json::String(class)) => {
                let fields = map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                Ok((class.clone(), Value::Object { class, fields }))
            }
            other => {
                if let Some(class) = other {
                    map.insert("class".to_string(), class);
                }
                let fields: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                match hint {
                    Some(hint) if !is_map_type(hint) => Ok((
                        hint.to_string(),
                        Value::Object {
                            class: hint.to_string(),
                            fields,
                        },
                    )),
                    Some(hint) => Ok((hint.to_string(), Value::Map(fields))),
                    None => Ok(("java.lang.Object".to_string(), Value::Map(fields))),
                }
            }
        },
        Json::String(text) => match hint {
            Some(hint) => Ok((hint.to_string(), coerce(Json::String(text), hint)?)),
            None => Ok(sniff(&text)),
        },
        Json::Bool(b) => {
            let java_type = hint.unwrap_or("java.lang.Boolean");
            Ok((java_type.to_string(), coerce(Json::Bool(b), java_type)?))
        }
        Json::Number(n) => {
            let java_type = match hint {
                Some(hint) => hint.to_string(),
                None if n.is_f64() => "java.lang.Double".to_string(),
                None => match n.as_i64() {
                    Some(i) if i32::try_from(i).is_ok() => "java.lang.Integer".to_string(),
                    Some(_) => "java.lang.Long".to_string(),
                    None => return Err(format!("{} does not fit a long", n)),
                },
            };
            let value = coerce(Json::Number(n), &java_type)?;
            Ok((java_type, value))
        }
    }
}

/// Type of a `null` parameter with no hint, by position.
fn guess_null_type(index: usize, total: usize) -> &'static str {
    if total >= 2 && index == 0 {
        "java.util.List"
    } else if total >= 3 && index == total - 1 {
        "java.lang.Long"
    } else {
        "java.lang.String"
    }
}

/// Infers the type of an unhinted string literal.
fn sniff(text: &str) -> (String, Value) {
    let trimmed = text.trim();
    let typed = |java_type: &str, value: Value| (java_type.to_string(), value);

    if let Some(digits) = strip_suffix_ci(trimmed, 'L') {
        if let Ok(v) = digits.parse::<i64>() {
            return typed("java.lang.Long", Value::Long(v));
        }
    }
    if let Some(number) = strip_suffix_ci(trimmed, 'F') {
        if let Ok(v) = number.parse::<f64>() {
            return typed("java.lang.Float", Value::Double(v));
        }
    }
    if let Some(number) = strip_suffix_ci(trimmed, 'D') {
        if let Ok(v) = number.parse::<f64>() {
            return typed("java.lang.Double", Value::Double(v));
        }
    }
    if is_integer_literal(trimmed) {
        if let Ok(v) = trimmed.parse::<i64>() {
            return typed("java.lang.Long", Value::Long(v));
        }
    }
    if trimmed.contains('.') {
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return typed("java.lang.Double", Value::Double(v));
            }
        }
    }
    match trimmed {
        "true" => return typed("java.lang.Boolean", Value::Bool(true)),
        "false" => return typed("java.lang.Boolean", Value::Bool(false)),
        _ => {}
    }
    if trimmed.starts_with('[') {
        if let Ok(Json::Array(items)) = serde_json::from_str::<Json>(trimmed) {
            return typed(
                "java.util.List",
                Value::List(items.into_iter().map(Value::from).collect()),
            );
        }
    }
    typed("java.lang.String", Value::String(text.to_string()))
}

/// Coerces a JSON scalar (or numeric string) to `java_type`.
fn coerce(json: Json, java_type: &str) -> Result<Value, String> {
    let mismatch = |json: &Json| format!("cannot convert {} to {}", json, java_type);

    match java_type {
        "int" | "java.lang.Integer" | "short" | "java.lang.Short" | "byte" | "java.lang.Byte" => {
            let v = integer(&json).ok_or_else(|| mismatch(&json))?;
            let v = i32::try_from(v)
                .map_err(|_| format!("{} is out of range for {}", v, java_type))?;
            Ok(Value::Int(v))
        }
        "long" | "java.lang.Long" => {
            integer(&json).map(Value::Long).ok_or_else(|| mismatch(&json))
        }
        "double" | "java.lang.Double" | "float" | "java.lang.Float" => {
            float(&json).map(Value::Double).ok_or_else(|| mismatch(&json))
        }
        "boolean" | "java.lang.Boolean" => match &json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Json::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(mismatch(other)),
        },
        "java.lang.String" | "char" | "java.lang.Character" => match json {
            Json::String(s) => Ok(Value::String(s)),
            Json::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_string())),
        },
        t if is_list_type(t) => match json {
            Json::String(s) => match serde_json::from_str::<Json>(s.trim()) {
                Ok(Json::Array(items)) => {
                    Ok(Value::List(items.into_iter().map(Value::from).collect()))
                }
                _ => Err(format!("{:?} is not a JSON array", s)),
            },
            other => Ok(Value::from(other)),
        },
        _ => match json {
            // untyped targets take the literal as written
            Json::String(s) => Ok(Value::String(s)),
            other => Ok(Value::from(other)),
        },
    }
}

fn integer(json: &Json) -> Option<i64> {
    match json {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => {
            let s = s.trim();
            strip_suffix_ci(s, 'L').unwrap_or(s).parse().ok()
        }
        _ => None,
    }
}

fn float(json: &Json) -> Option<f64> {
    match json {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => {
            let s = s.trim();
            let s = strip_suffix_ci(s, 'F')
                .or_else(|| strip_suffix_ci(s, 'D'))
                .unwrap_or(s);
            s.parse().ok().filter(|v: &f64| v.is_finite())
        }
        _ => None,
    }
}

fn strip_suffix_ci(text: &str, suffix: char) -> Option<&str> {
    text.strip_suffix(suffix)
        .or_else(|| text.strip_suffix(suffix.to_ascii_lowercase()))
        .filter(|rest| !rest.is_empty())
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_scalar_type(java_type: &str) -> bool {
    matches!(
        java_type,
        "int"
            | "long"
            | "double"
            | "float"
            | "boolean"
            | "short"
            | "byte"
            | "char"
            | "java.lang.Integer"
            | "java.lang.Long"
            | "java.lang.Double"
            | "java.lang.Float"
            | "java.lang.Boolean"
            | "java.lang.Short"
            | "java.lang.Byte"
            | "java.lang.Character"
            | "java.lang.String"
    )
}

/// True for arrays and `java.util` collections.
pub fn is_list_type(java_type: &str) -> bool {
    java_type.ends_with("[]")
        || java_type.starts_with('[')
        || matches!(
            java_type,
            "java.util.List"
                | "java.util.ArrayList"
                | "java.util.LinkedList"
                | "java.util.Collection"
                | "java.util.Set"
                | "java.util.HashSet"
        )
}

fn is_map_type(java_type: &str) -> bool {
    matches!(
        java_type,
        "java.util.Map" | "java.util.HashMap" | "java.util.LinkedHashMap" | "java.lang.Object"
    )
}
