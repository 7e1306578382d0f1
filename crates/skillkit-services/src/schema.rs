//! Tool arguments checked against a skill's declared `inputs` JSON Schema.
//!
//! The schema is compiled once per load so every invocation reuses it. A null
//! or empty schema accepts anything.

use jsonschema::JSONSchema;
use serde_json::Value;

pub struct InputValidator {
    compiled: Option<JSONSchema>,
}

impl InputValidator {
    /// Compile `schema`; an error names the first problem with the schema itself.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let accepts_anything = match schema {
            Value::Null => true,
            Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if accepts_anything {
            return Ok(Self { compiled: None });
        }
        let compiled = JSONSchema::compile(schema)
            .map_err(|error| format!("failed to compile input schema: {}", error))?;
        Ok(Self {
            compiled: Some(compiled),
        })
    }

    /// First violation found, as `path '<instance path>' violated schema: <why>`.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        compiled.validate(value).map_err(|errors| {
            errors.into_iter().next().map_or_else(
                || "schema validation failed".to_string(),
                |error| format!("path '{}' violated schema: {}", error.instance_path, error),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InputValidator {
        InputValidator::compile(&json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["query"],
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "mode": {"enum": ["fast", "exact"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_accepts_conforming_input() {
        let input = json!({"query": "x", "limit": 5, "mode": "fast", "tags": ["a"]});
        assert!(validator().validate(&input).is_ok());
        assert!(InputValidator::compile(&Value::Null).unwrap().validate(&json!(42)).is_ok());
        assert!(InputValidator::compile(&json!({})).unwrap().validate(&json!("x")).is_ok());
    }

    #[test]
    fn test_reports_first_violation_with_path() {
        let cases = [
            (json!({"query": 1}), "/query"),
            (json!({"query": "x", "limit": 1.5}), "/limit"),
            (json!({"query": "x", "mode": "slow"}), "/mode"),
            (json!({"query": "x", "tags": ["a", 2]}), "/tags/1"),
        ];
        for (input, path) in cases {
            let err = validator().validate(&input).unwrap_err();
            assert!(err.starts_with(&format!("path '{}' violated schema:", path)), "{}", err);
        }
        let err = validator().validate(&json!({})).unwrap_err();
        assert!(err.contains("query"), "{}", err);
    }

    #[test]
    fn test_full_keyword_set_is_enforced() {
        let v = InputValidator::compile(&json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "n": {"type": "integer", "minimum": 1},
                "s": {"type": "string", "minLength": 3}
            }
        }))
        .unwrap();
        assert!(v.validate(&json!({"n": 1, "s": "abc"})).is_ok());

        let err = v.validate(&json!({"n": 1, "zzz": true})).unwrap_err();
        assert!(err.contains("zzz"), "{}", err);
        let err = v.validate(&json!({"n": -5})).unwrap_err();
        assert!(err.starts_with("path '/n' violated schema:"), "{}", err);
        let err = v.validate(&json!({"s": ""})).unwrap_err();
        assert!(err.starts_with("path '/s' violated schema:"), "{}", err);
    }

    #[test]
    fn test_invalid_schema_does_not_compile() {
        assert!(InputValidator::compile(&json!({"type": 12})).is_err());
        assert!(InputValidator::compile(&json!({"properties": {"n": {"minimum": "one"}}})).is_err());
    }
}
