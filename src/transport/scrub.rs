//! Field redaction applied to payload bodies before serialization.

use std::collections::HashSet;

use serde_json::Value;

const REDACTED: &str = "*****";

/// Replace the value of every field named in `fields` with a fixed mask.
///
/// Matching is case-insensitive and applies at any nesting depth, inside
/// arrays included. The redacted field keeps its key so the document shape
/// survives. An empty field list returns the value unchanged.
pub fn scrub_value(value: &Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return value.clone();
    }
    let fields: HashSet<String> = fields.iter().map(|field| field.to_ascii_lowercase()).collect();
    scrub_inner(value, &fields)
}

fn scrub_inner(value: &Value, fields: &HashSet<String>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| {
                    if fields.contains(&key.to_ascii_lowercase()) {
                        (key.clone(), Value::String(REDACTED.to_owned()))
                    } else {
                        (key.clone(), scrub_inner(nested, fields))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| scrub_inner(item, fields)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[rstest]
    fn redacts_nested_fields_case_insensitively() {
        let body = json!({
            "user": { "name": "ada", "Password": "hunter2" },
            "password": "also secret",
        });
        let scrubbed = scrub_value(&body, &fields(&["password"]));
        assert_eq!(scrubbed["user"]["Password"], REDACTED);
        assert_eq!(scrubbed["password"], REDACTED);
        assert_eq!(scrubbed["user"]["name"], "ada");
    }

    #[rstest]
    fn descends_into_arrays() {
        let body = json!({ "sessions": [ { "secret": "a" }, { "secret": "b" } ] });
        let scrubbed = scrub_value(&body, &fields(&["secret"]));
        assert_eq!(scrubbed["sessions"][0]["secret"], REDACTED);
        assert_eq!(scrubbed["sessions"][1]["secret"], REDACTED);
    }

    #[rstest]
    fn masks_whole_subtrees() {
        let body = json!({ "credentials": { "user": "u", "pass": "p" } });
        let scrubbed = scrub_value(&body, &fields(&["credentials"]));
        assert_eq!(scrubbed["credentials"], REDACTED);
    }

    #[rstest]
    fn empty_field_list_is_identity() {
        let body = json!({ "password": "kept" });
        assert_eq!(scrub_value(&body, &[]), body);
    }

    #[rstest]
    fn scalars_pass_through() {
        let body = json!("just a string");
        assert_eq!(scrub_value(&body, &fields(&["password"])), body);
    }
}
