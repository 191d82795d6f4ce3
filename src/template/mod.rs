//! `${path}` template resolution over a JSON variable bag (§4.2).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const ARRAY_SENTINEL: &str = "__STRATIX_ARRAY__";
const NULL_SENTINEL: &str = "__STRATIX_NULL__";

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());
static IDENTIFIER_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template expression: {0}")]
    InvalidExpression(String),

    #[error("undefined variable(s) in strict mode: {0:?}")]
    UndefinedVariables(Vec<String>),
}

/// Outcome of a non-strict resolution: the resolved value plus any variable
/// names that had no binding (left in place as the literal `${expr}`).
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: Value,
    pub missing_variables: Vec<String>,
}

/// Reject malformed `${...}` syntax before it reaches resolution.
pub fn validate_template_expression(expr: &str) -> Result<(), TemplateError> {
    let trimmed = expr.trim();
    if !IDENTIFIER_PATH_RE.is_match(trimmed) {
        return Err(TemplateError::InvalidExpression(expr.to_string()));
    }
    Ok(())
}

/// Resolve all `${path}` references within `target` against `variables`,
/// in non-strict mode (unresolved references are left in place).
pub fn resolve(target: &Value, variables: &Value) -> Resolution {
    let mut missing = Vec::new();
    let value = resolve_value(target, variables, false, &mut missing).expect("non-strict never errors");
    Resolution {
        value,
        missing_variables: missing,
    }
}

/// Resolve in strict mode: any unresolved reference is an error.
pub fn resolve_strict(target: &Value, variables: &Value) -> Result<Value, TemplateError> {
    let mut missing = Vec::new();
    let value = resolve_value(target, variables, true, &mut missing)?;
    if !missing.is_empty() {
        return Err(TemplateError::UndefinedVariables(missing));
    }
    Ok(value)
}

fn resolve_value(
    target: &Value,
    variables: &Value,
    strict: bool,
    missing: &mut Vec<String>,
) -> Result<Value, TemplateError> {
    match target {
        Value::String(s) => resolve_string(s, variables, strict, missing),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, variables, strict, missing)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, variables, strict, missing)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    s: &str,
    variables: &Value,
    strict: bool,
    missing: &mut Vec<String>,
) -> Result<Value, TemplateError> {
    // Whole-string match against a single `${expr}`: preserve native type.
    if let Some(caps) = full_match(s) {
        let path = caps.trim();
        return match lookup(variables, path) {
            Some(v) => Ok(decode_sentinel(v)),
            None => {
                missing.push(path.to_string());
                if strict {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(s.to_string()))
                }
            }
        };
    }

    // Embedded templates: stringify each resolved value into the surrounding text.
    let mut out = String::with_capacity(s.len());
    let mut last_end = 0;
    for caps in TEMPLATE_RE.captures_iter(s) {
        let whole = caps.get(0).unwrap();
        let path = caps.get(1).unwrap().as_str().trim();
        out.push_str(&s[last_end..whole.start()]);
        match lookup(variables, path) {
            Some(v) => out.push_str(&stringify(&decode_sentinel(v))),
            None => {
                missing.push(path.to_string());
                out.push_str(whole.as_str());
            }
        }
        last_end = whole.end();
    }
    out.push_str(&s[last_end..]);
    Ok(Value::String(out))
}

fn full_match(s: &str) -> Option<String> {
    let trimmed = s.trim();
    let caps = TEMPLATE_RE.captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        Some(caps.get(1)?.as_str().to_string())
    } else {
        None
    }
}

/// First-hit lookup: try the dotted path as a single flat key, then walk
/// nested segments (§4.2 "Lookup").
fn lookup<'a>(variables: &'a Value, path: &str) -> Option<&'a Value> {
    if let Value::Object(map) = variables {
        if let Some(v) = map.get(path) {
            return Some(v);
        }
    }
    let mut current = variables;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn decode_sentinel(v: &Value) -> Value {
    if let Value::String(s) = v {
        if let Some(json) = s.strip_prefix(ARRAY_SENTINEL) {
            if let Ok(arr) = serde_json::from_str::<Value>(json) {
                return arr;
            }
        }
        if s == NULL_SENTINEL {
            return Value::Null;
        }
    }
    v.clone()
}

/// Encode a value for safe round-tripping through a string-typed slot
/// (§4.2: "a naive toString coercion cannot lose elements").
pub fn encode_sentinel(v: &Value) -> Value {
    match v {
        Value::Array(_) => Value::String(format!("{ARRAY_SENTINEL}{v}")),
        Value::Null => Value::String(NULL_SENTINEL.to_string()),
        other => other.clone(),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_string_preserves_native_type() {
        let vars = json!({"k": 42});
        let r = resolve(&json!("${k}"), &vars);
        assert_eq!(r.value, json!(42));
        assert!(r.missing_variables.is_empty());
    }

    #[test]
    fn whole_string_preserves_array() {
        let vars = json!({"k": [1, 2, 3]});
        let r = resolve(&json!("${k}"), &vars);
        assert_eq!(r.value, json!([1, 2, 3]));
    }

    #[test]
    fn whole_string_preserves_null() {
        let vars = json!({"k": null});
        let r = resolve(&json!("${k}"), &vars);
        assert_eq!(r.value, Value::Null);
    }

    #[test]
    fn embedded_template_is_stringified() {
        let vars = json!({"greeting": "hi"});
        let r = resolve(&json!("hello ${greeting}!"), &vars);
        assert_eq!(r.value, json!("hello hi!"));
    }

    #[test]
    fn nested_path_lookup() {
        let vars = json!({"a": {"out": "hi"}});
        let r = resolve(&json!("${a.out}"), &vars);
        assert_eq!(r.value, json!("hi"));
    }

    #[test]
    fn missing_variable_non_strict_leaves_expression_in_place() {
        let vars = json!({});
        let r = resolve(&json!("${nope}"), &vars);
        assert_eq!(r.value, json!("${nope}"));
        assert_eq!(r.missing_variables, vec!["nope".to_string()]);
    }

    #[test]
    fn missing_variable_strict_fails() {
        let vars = json!({});
        let err = resolve_strict(&json!("${nope}"), &vars).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariables(_)));
    }

    #[test]
    fn no_templates_round_trips_structurally() {
        let obj = json!({"a": 1, "b": [true, "x", null]});
        let r = resolve(&obj, &json!({}));
        assert_eq!(r.value, obj);
    }

    #[test]
    fn nested_object_and_array_resolution() {
        let vars = json!({"x": 1, "y": 2});
        let target = json!({"list": ["${x}", "${y}", "plain"], "obj": {"v": "${x}"}});
        let r = resolve(&target, &vars);
        assert_eq!(r.value, json!({"list": [1, 2, "plain"], "obj": {"v": 1}}));
    }

    #[test]
    fn invalid_expression_rejected() {
        assert!(validate_template_expression("1bad").is_err());
        assert!(validate_template_expression("a.b").is_ok());
        assert!(validate_template_expression(" a.b ").is_ok());
    }

    #[test]
    fn whitespace_inside_braces_is_trimmed() {
        let vars = json!({"k": "v"});
        let r = resolve(&json!("${ k }"), &vars);
        assert_eq!(r.value, json!("v"));
    }
}
