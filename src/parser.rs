//! Response parser: extracts tagged sections from terminal text and
//! coerces them against the declared output schema.
//!
//! The model is asked (by the instruction compiler) to wrap each schema
//! field in `<field>…</field>` tags. Extraction is two-pass: properly
//! terminated tags first, then a recovery pass for a tag the model opened
//! but never closed before end of output. With an empty schema the raw
//! text is the result, verbatim.

use crate::schema::{FieldKind, OutputSchema};
use crate::{Error, Result};
use serde_json::Value;

/// Parse terminal text against a schema.
///
/// Returns the raw text as a JSON string when the schema is empty, else a
/// JSON object with one coerced entry per schema field. A required field
/// whose tag is absent fails with a parse error naming the tag.
pub fn parse_response(text: &str, schema: &OutputSchema) -> Result<Value> {
    if schema.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    let text = strip_fence(text);

    let mut object = serde_json::Map::new();
    for (name, kind) in schema.fields() {
        match extract_tag(text, name) {
            Some(body) => {
                let value = coerce(body.trim(), kind)
                    .map_err(|e| Error::parse(format!("field '{name}': {e}")))?;
                object.insert(name.to_string(), value);
            }
            None if kind.is_optional() => {
                object.insert(name.to_string(), Value::Null);
            }
            None => {
                return Err(Error::parse(format!("missing tag '{name}'")));
            }
        }
    }

    Ok(Value::Object(object))
}

/// Strip a surrounding ```json fence, if the whole text is fenced.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Find the body of `<name>…</name>`.
///
/// Greedy across newlines: the body runs from the first opening tag to the
/// last matching close tag. When no close tag exists the body runs to end
/// of string (the dangling-tag recovery pass).
fn extract_tag<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let start = text.find(&open)? + open.len();
    let rest = &text[start..];

    match rest.rfind(&close) {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}

/// Coerce one tag body to its declared kind.
fn coerce(body: &str, kind: &FieldKind) -> std::result::Result<Value, String> {
    match kind {
        FieldKind::Optional(inner) => coerce(body, inner),

        FieldKind::String => {
            // A JSON string literal is unquoted; anything else is taken raw.
            if let Ok(Value::String(s)) = serde_json::from_str::<Value>(body) {
                Ok(Value::String(s))
            } else {
                Ok(Value::String(body.to_string()))
            }
        }

        FieldKind::Number => {
            let parsed: f64 = body
                .parse()
                .map_err(|_| format!("'{body}' is not a number"))?;
            if parsed.is_nan() {
                return Err(format!("'{body}' is not a number"));
            }
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| format!("'{body}' is not a finite number"))
        }

        FieldKind::Boolean => match body.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("'{body}' is not a boolean")),
        },

        FieldKind::StringArray => coerce_array(body, &FieldKind::String),
        FieldKind::NumberArray => coerce_array(body, &FieldKind::Number),
        FieldKind::BooleanArray => coerce_array(body, &FieldKind::Boolean),

        FieldKind::Object => {
            let body = strip_fence(body);
            let value: Value =
                serde_json::from_str(body).map_err(|e| format!("invalid JSON object: {e}"))?;
            if !value.is_object() {
                return Err("expected a JSON object".to_string());
            }
            Ok(value)
        }
    }
}

/// Array coercion: JSON first, comma-split fallback, empty body → `[]`.
fn coerce_array(body: &str, element: &FieldKind) -> std::result::Result<Value, String> {
    if body.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
        let coerced = items
            .into_iter()
            .map(|item| coerce_element(item, element))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(Value::Array(coerced));
    }

    if body.contains(',') {
        let coerced = body
            .split(',')
            .map(|piece| {
                let piece = piece.trim();
                let item = serde_json::from_str::<Value>(piece)
                    .unwrap_or_else(|_| Value::String(piece.to_string()));
                coerce_element(item, element)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(Value::Array(coerced));
    }

    // A single unbracketed element.
    let item =
        serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()));
    Ok(Value::Array(vec![coerce_element(item, element)?]))
}

/// Coerce one already-decoded array element to the element kind.
fn coerce_element(item: Value, element: &FieldKind) -> std::result::Result<Value, String> {
    match (element, item) {
        (FieldKind::String, Value::String(s)) => Ok(Value::String(s)),
        (FieldKind::String, other) => Ok(Value::String(other.to_string())),
        (FieldKind::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (FieldKind::Number, Value::String(s)) => coerce(s.trim(), &FieldKind::Number),
        (FieldKind::Number, other) => Err(format!("'{other}' is not a number")),
        (FieldKind::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (FieldKind::Boolean, Value::String(s)) => coerce(s.trim(), &FieldKind::Boolean),
        (FieldKind::Boolean, other) => Err(format!("'{other}' is not a boolean")),
        (_, item) => Ok(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_one(name: &str, kind: FieldKind) -> OutputSchema {
        OutputSchema::new().field(name, kind)
    }

    #[test]
    fn test_empty_schema_returns_raw_text() {
        let schema = OutputSchema::new();
        let result = parse_response("anything at all", &schema).unwrap();
        assert_eq!(result, json!("anything at all"));
    }

    #[test]
    fn test_string_field() {
        let schema = schema_one("answer", FieldKind::String);
        let result = parse_response("<answer>Paris</answer>", &schema).unwrap();
        assert_eq!(result["answer"], "Paris");
    }

    #[test]
    fn test_string_field_unquotes_json_literal() {
        let schema = schema_one("answer", FieldKind::String);
        let result = parse_response("<answer>\"Paris\"</answer>", &schema).unwrap();
        assert_eq!(result["answer"], "Paris");
    }

    #[test]
    fn test_number_field_and_nan_rejection() {
        let schema = schema_one("score", FieldKind::Number);
        let result = parse_response("<score>0.75</score>", &schema).unwrap();
        assert_eq!(result["score"], 0.75);

        assert!(parse_response("<score>NaN</score>", &schema).is_err());
        assert!(parse_response("<score>abc</score>", &schema).is_err());
    }

    #[test]
    fn test_boolean_field_case_insensitive() {
        let schema = schema_one("ok", FieldKind::Boolean);
        assert_eq!(
            parse_response("<ok>TRUE</ok>", &schema).unwrap()["ok"],
            json!(true)
        );
        assert_eq!(
            parse_response("<ok>false</ok>", &schema).unwrap()["ok"],
            json!(false)
        );
        assert!(parse_response("<ok>yes</ok>", &schema).is_err());
    }

    #[test]
    fn test_missing_required_tag_fails() {
        let schema = schema_one("answer", FieldKind::String);
        let err = parse_response("no tags here", &schema).unwrap_err();
        assert!(err.to_string().contains("missing tag 'answer'"));
    }

    #[test]
    fn test_missing_optional_tag_is_null() {
        let schema = schema_one("notes", FieldKind::optional(FieldKind::String));
        let result = parse_response("nothing tagged", &schema).unwrap();
        assert_eq!(result["notes"], Value::Null);
    }

    #[test]
    fn test_dangling_tag_recovered() {
        let schema = schema_one("answer", FieldKind::String);
        let result = parse_response("<answer>cut off mid-stream", &schema).unwrap();
        assert_eq!(result["answer"], "cut off mid-stream");
    }

    #[test]
    fn test_greedy_extraction_spans_inner_close() {
        // The body itself contains the close tag; greedy takes the last one.
        let schema = schema_one("code", FieldKind::String);
        let result =
            parse_response("<code>first</code> middle </code>", &schema).unwrap();
        assert_eq!(result["code"], "first</code> middle ");
    }

    #[test]
    fn test_string_array_json_form() {
        let schema = schema_one("items", FieldKind::StringArray);
        let result = parse_response(r#"<items>["a", "b"]</items>"#, &schema).unwrap();
        assert_eq!(result["items"], json!(["a", "b"]));
    }

    #[test]
    fn test_string_array_comma_fallback() {
        let schema = schema_one("items", FieldKind::StringArray);
        let result = parse_response("<items>apples, pears, figs</items>", &schema).unwrap();
        assert_eq!(result["items"], json!(["apples", "pears", "figs"]));
    }

    #[test]
    fn test_number_array_comma_fallback_and_empty() {
        let schema = schema_one("nums", FieldKind::NumberArray);
        let result = parse_response("<nums>1, 2.5, 3</nums>", &schema).unwrap();
        assert_eq!(result["nums"], json!([1.0, 2.5, 3.0]));

        let result = parse_response("<nums></nums>", &schema).unwrap();
        assert_eq!(result["nums"], json!([]));
    }

    #[test]
    fn test_object_field_with_fence() {
        let schema = schema_one("data", FieldKind::Object);
        let text = "<data>```json\n{\"x\": 1}\n```</data>";
        let result = parse_response(text, &schema).unwrap();
        assert_eq!(result["data"], json!({"x": 1}));

        assert!(parse_response("<data>[1,2]</data>", &schema).is_err());
    }

    #[test]
    fn test_outer_fence_stripped() {
        let schema = schema_one("answer", FieldKind::String);
        let text = "```json\n<answer>fenced</answer>\n```";
        let result = parse_response(text, &schema).unwrap();
        assert_eq!(result["answer"], "fenced");
    }

    #[test]
    fn test_multiple_fields() {
        let schema = OutputSchema::new()
            .field("title", FieldKind::String)
            .field("count", FieldKind::Number)
            .field("tags", FieldKind::StringArray);
        let text = "<title>Report</title>\n<count>4</count>\n<tags>[\"x\",\"y\"]</tags>";
        let result = parse_response(text, &schema).unwrap();
        assert_eq!(result["title"], "Report");
        assert_eq!(result["count"], 4.0);
        assert_eq!(result["tags"], json!(["x", "y"]));
    }
}
