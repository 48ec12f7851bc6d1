//! Identifier validation and typed value (de)serialization between
//! JSON records and SQLite storage classes.

use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;

use weft_domain::schema::FieldKind;
use weft_domain::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identifiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Store names: letters, digits, underscore, hyphen.
pub(crate) fn validate_store_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::Validation("store name cannot be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "store name too long (max {MAX_IDENTIFIER_LEN} characters)"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!(
            "store name '{name}' may only contain letters, digits, underscore and hyphen"
        )));
    }
    // Leading underscore is reserved for internal tables (`_stores`).
    if name.starts_with('_') {
        return Err(Error::Validation(format!(
            "store name '{name}' may not start with an underscore"
        )));
    }
    Ok(name)
}

/// Field names: letters, digits, underscore.
pub(crate) fn validate_field_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::Validation("field name cannot be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "field name too long (max {MAX_IDENTIFIER_LEN} characters)"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!(
            "field name '{name}' may only contain letters, digits and underscore"
        )));
    }
    Ok(name)
}

/// Child table for a collection field: `{store}_{field}`.
pub(crate) fn collection_table(store: &str, field: &str) -> String {
    format!("{store}_{field}")
}

pub(crate) fn fts_table(store: &str) -> String {
    format!("fts_{store}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a JSON value into the SQLite storage class for its
/// declared kind. `Null` is accepted for every column kind.
pub(crate) fn serialize_field(
    field: &str,
    kind: FieldKind,
    value: &JsonValue,
) -> Result<SqlValue> {
    if value.is_null() {
        if kind == FieldKind::JsonCollection {
            return Err(collection_set_error(field));
        }
        return Ok(SqlValue::Null);
    }

    match kind {
        FieldKind::Text => match value {
            JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(wrong_kind(field, "text", other)),
        },
        FieldKind::Integer => match value.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => Err(wrong_kind(field, "integer", value)),
        },
        FieldKind::Real => match value.as_f64() {
            Some(f) => Ok(SqlValue::Real(f)),
            None => Err(wrong_kind(field, "real", value)),
        },
        FieldKind::Bool => match value {
            JsonValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            other => Err(wrong_kind(field, "bool", other)),
        },
        FieldKind::Json => {
            let text = serde_json::to_string(value)
                .map_err(|e| Error::Validation(format!("field '{field}' (json): {e}")))?;
            Ok(SqlValue::Text(text))
        }
        FieldKind::JsonCollection => Err(collection_set_error(field)),
    }
}

/// Deserialize a stored value back to JSON for its declared kind.
/// Malformed stored JSON falls back to the raw text rather than losing
/// data.
pub(crate) fn deserialize_field(kind: FieldKind, value: SqlValue) -> JsonValue {
    match (kind, value) {
        (_, SqlValue::Null) => JsonValue::Null,
        (FieldKind::Bool, SqlValue::Integer(i)) => JsonValue::Bool(i != 0),
        (FieldKind::Integer, SqlValue::Integer(i)) => JsonValue::from(i),
        (FieldKind::Real, SqlValue::Real(f)) => {
            serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
        }
        (FieldKind::Real, SqlValue::Integer(i)) => JsonValue::from(i as f64),
        (FieldKind::Json, SqlValue::Text(s)) => {
            serde_json::from_str(&s).unwrap_or(JsonValue::String(s))
        }
        (_, SqlValue::Text(s)) => JsonValue::String(s),
        (_, SqlValue::Integer(i)) => JsonValue::from(i),
        (_, SqlValue::Real(f)) => {
            serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
        }
        (_, SqlValue::Blob(_)) => JsonValue::Null,
    }
}

/// The text copied into the store's FTS row for one indexable field.
/// Collection fields contribute nothing on the parent row; their items
/// are indexed individually as child rows.
pub(crate) fn fts_content(kind: FieldKind, value: &SqlValue) -> String {
    if kind == FieldKind::JsonCollection {
        return String::new();
    }
    match value {
        SqlValue::Text(s) => s.clone(),
        _ => String::new(),
    }
}

fn wrong_kind(field: &str, expected: &str, got: &JsonValue) -> Error {
    let got_kind = match got {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    Error::Validation(format!(
        "field '{field}' expects {expected}, got {got_kind}"
    ))
}

fn collection_set_error(field: &str) -> Error {
    Error::Validation(format!(
        "field '{field}' is a collection; use collection_append to add items"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_name_rules() {
        assert!(validate_store_name("threads").is_ok());
        assert!(validate_store_name("notes-2024").is_ok());
        assert!(validate_store_name("").is_err());
        assert!(validate_store_name("bad name").is_err());
        assert!(validate_store_name("drop;table").is_err());
        assert!(validate_store_name("_stores").is_err());
        assert!(validate_store_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn field_name_rejects_hyphen() {
        assert!(validate_field_name("is_archived").is_ok());
        assert!(validate_field_name("bad-field").is_err());
    }

    #[test]
    fn text_requires_string() {
        assert!(matches!(
            serialize_field("title", FieldKind::Text, &json!("alpha")),
            Ok(SqlValue::Text(_))
        ));
        assert!(serialize_field("title", FieldKind::Text, &json!(3)).is_err());
    }

    #[test]
    fn integer_rejects_bool_and_float() {
        assert_eq!(
            serialize_field("n", FieldKind::Integer, &json!(7)).unwrap(),
            SqlValue::Integer(7)
        );
        assert!(serialize_field("n", FieldKind::Integer, &json!(true)).is_err());
        assert!(serialize_field("n", FieldKind::Integer, &json!(1.5)).is_err());
    }

    #[test]
    fn bool_stored_as_integer() {
        assert_eq!(
            serialize_field("b", FieldKind::Bool, &json!(true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            deserialize_field(FieldKind::Bool, SqlValue::Integer(0)),
            json!(false)
        );
    }

    #[test]
    fn json_roundtrips_structured_values() {
        let input = json!({"tags": ["a", "b"], "n": 3});
        let stored = serialize_field("meta", FieldKind::Json, &input).unwrap();
        assert_eq!(deserialize_field(FieldKind::Json, stored), input);
    }

    #[test]
    fn json_string_value_roundtrips_as_string() {
        let input = json!("plain");
        let stored = serialize_field("meta", FieldKind::Json, &input).unwrap();
        assert_eq!(deserialize_field(FieldKind::Json, stored), input);
    }

    #[test]
    fn collection_cannot_be_set_directly() {
        assert!(serialize_field("messages", FieldKind::JsonCollection, &json!([])).is_err());
        assert!(serialize_field("messages", FieldKind::JsonCollection, &json!(null)).is_err());
    }

    #[test]
    fn null_allowed_for_columns() {
        assert_eq!(
            serialize_field("title", FieldKind::Text, &json!(null)).unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn fts_content_for_kinds() {
        let text = SqlValue::Text("beta gamma".into());
        assert_eq!(fts_content(FieldKind::Text, &text), "beta gamma");
        assert_eq!(fts_content(FieldKind::JsonCollection, &text), "");
        assert_eq!(fts_content(FieldKind::Text, &SqlValue::Null), "");
    }
}
