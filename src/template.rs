//! Prompt template rendering.
//!
//! Templates reference variables with `{{name}}`. Values come from the
//! per-graph variable map; non-string values are JSON-stringified before
//! substitution. Dotted paths (`{{node.field}}`) are not supported:
//! interpolation is whole-value only, and structured access happens
//! programmatically on the node result instead.

use crate::{Error, Result};
use serde_json::Value;

/// The variable bag threaded through a graph invocation.
pub type VarMap = serde_json::Map<String, Value>;

/// Render `{{name}}` placeholders in `template` from `vars`.
///
/// Behavior for a missing variable depends on `strict`: lenient mode (the
/// default elsewhere) leaves the placeholder intact, strict mode fails
/// naming the variable. An unterminated `{{` is copied through verbatim.
pub fn render(template: &str, vars: &VarMap, strict: bool) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            // No closing braces; emit the remainder as-is.
            output.push_str(&rest[open..]);
            return Ok(output);
        };

        let name = after_open[..close].trim();
        match vars.get(name) {
            Some(value) => output.push_str(&stringify(value)),
            None if strict => {
                return Err(Error::invalid_input(format!(
                    "undefined template variable '{name}'"
                )));
            }
            None => {
                // Leave the placeholder for a later pass or for debugging.
                output.push_str(&rest[open..open + 2 + close + 2]);
            }
        }
        rest = &after_open[close + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

/// Substitution form of a variable: strings verbatim, everything else as
/// compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> VarMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_basic_substitution() {
        let vars = vars(&[("name", json!("world"))]);
        assert_eq!(render("Hello {{name}}!", &vars, false).unwrap(), "Hello world!");
    }

    #[test]
    fn test_whitespace_inside_braces() {
        let vars = vars(&[("name", json!("x"))]);
        assert_eq!(render("{{ name }}", &vars, false).unwrap(), "x");
    }

    #[test]
    fn test_non_string_values_json_stringified() {
        let vars = vars(&[
            ("n", json!(42)),
            ("flag", json!(true)),
            ("obj", json!({"a": 1})),
        ]);
        assert_eq!(
            render("{{n}} {{flag}} {{obj}}", &vars, false).unwrap(),
            r#"42 true {"a":1}"#
        );
    }

    #[test]
    fn test_missing_variable_lenient_keeps_placeholder() {
        let vars = VarMap::new();
        assert_eq!(
            render("value: {{missing}}", &vars, false).unwrap(),
            "value: {{missing}}"
        );
    }

    #[test]
    fn test_missing_variable_strict_fails() {
        let vars = VarMap::new();
        let err = render("{{missing}}", &vars, true).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unterminated_braces_copied_verbatim() {
        let vars = vars(&[("a", json!("x"))]);
        assert_eq!(render("{{a}} and {{b", &vars, false).unwrap(), "x and {{b");
    }

    #[test]
    fn test_multiple_occurrences() {
        let vars = vars(&[("x", json!("v"))]);
        assert_eq!(render("{{x}}{{x}}{{x}}", &vars, false).unwrap(), "vvv");
    }
}
