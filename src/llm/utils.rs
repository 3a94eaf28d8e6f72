use serde_json::{Map, Value};

/// Cuts the JSON payload out of a model reply that may carry prose or code fences around it.
pub fn clean_json_output(raw: &str) -> String {
    let object = raw.find('{');
    let array = raw.find('[');
    // Whichever bracket opens first decides the payload kind.
    let array_first = match (array, object) {
        (Some(a), Some(o)) => a < o,
        (Some(_), None) => true,
        _ => false,
    };

    if array_first {
        if let (Some(start), Some(end)) = (array, raw.rfind(']')) {
            if end > start {
                return raw[start..=end].to_string();
            }
        }
    }
    if let (Some(start), Some(end)) = (object, raw.rfind('}')) {
        if end > start {
            return raw[start..=end].to_string();
        }
    }
    raw.trim().to_string()
}

/// Rewrites a JSON Schema into the subset the Gemini `responseSchema` accepts: `$ref`s are
/// inlined, `$schema`, `definitions`, `title` and `additionalProperties` are dropped and
/// `["string", "null"]` style types become a single type with `nullable`.
pub fn gemini_schema(schema: &Value) -> Value {
    let definitions = schema
        .get("definitions")
        .or_else(|| schema.get("$defs"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    simplify(schema, &definitions, 0)
}

const MAX_REF_DEPTH: usize = 8;

fn simplify(node: &Value, definitions: &Map<String, Value>, depth: usize) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(target) = map.get("$ref").and_then(Value::as_str) {
                let name = target.rsplit('/').next().unwrap_or(target);
                return match definitions.get(name) {
                    Some(definition) if depth < MAX_REF_DEPTH => {
                        simplify(definition, definitions, depth + 1)
                    }
                    _ => serde_json::json!({ "type": "object" }),
                };
            }

            // schemars wraps optional refs as `allOf: [{$ref}]` or `anyOf: [{$ref}, {type: null}]`.
            for key in ["allOf", "anyOf"] {
                if let Some(Value::Array(variants)) = map.get(key) {
                    let concrete: Vec<&Value> = variants
                        .iter()
                        .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
                        .collect();
                    if concrete.len() == 1 {
                        let mut inner = simplify(concrete[0], definitions, depth);
                        if concrete.len() < variants.len() {
                            if let Value::Object(inner_map) = &mut inner {
                                inner_map.insert("nullable".to_string(), Value::Bool(true));
                            }
                        }
                        return inner;
                    }
                }
            }

            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "$schema" | "definitions" | "$defs" | "title" | "additionalProperties"
                    | "default" | "format" => {}
                    "type" => match value {
                        Value::Array(types) => {
                            let concrete: Vec<&Value> =
                                types.iter().filter(|t| t.as_str() != Some("null")).collect();
                            if let Some(first) = concrete.first() {
                                out.insert("type".to_string(), (*first).clone());
                            }
                            if concrete.len() < types.len() {
                                out.insert("nullable".to_string(), Value::Bool(true));
                            }
                        }
                        other => {
                            out.insert("type".to_string(), other.clone());
                        }
                    },
                    _ => {
                        out.insert(key.clone(), simplify(value, definitions, depth));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| simplify(item, definitions, depth))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{contract_schema, TrendPointsContract};
    use serde_json::json;

    #[test]
    fn test_clean_json_output_strips_fences() {
        let raw = "Вот ответ:\n```json\n{\"points\": [{\"date\": \"2024-01-01\"}]}\n```";
        assert_eq!(
            clean_json_output(raw),
            "{\"points\": [{\"date\": \"2024-01-01\"}]}"
        );
        assert_eq!(clean_json_output("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(clean_json_output("  нет данных "), "нет данных");
    }

    #[test]
    fn test_gemini_schema_inlines_refs() {
        let schema = contract_schema::<TrendPointsContract>().unwrap();
        let cleaned = gemini_schema(&schema);
        let text = cleaned.to_string();
        assert!(!text.contains("$ref"));
        assert!(!text.contains("$schema"));
        assert!(!text.contains("definitions"));
        assert_eq!(cleaned["properties"]["points"]["type"], json!("array"));
        assert_eq!(
            cleaned["properties"]["points"]["items"]["properties"]["date"]["type"],
            json!("string")
        );
    }

    #[test]
    fn test_gemini_schema_marks_nullable() {
        let schema = json!({
            "type": "object",
            "properties": {"rate": {"type": ["string", "null"], "description": "Ставка"}}
        });
        let cleaned = gemini_schema(&schema);
        assert_eq!(cleaned["properties"]["rate"]["type"], json!("string"));
        assert_eq!(cleaned["properties"]["rate"]["nullable"], json!(true));
    }
}
