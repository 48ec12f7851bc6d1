//! WHERE-clause and pagination builders for `find`/`count`.
//!
//! Every clause is AND-combined with `user_id = ?` so no query can
//! escape its tenant. Field names are validated against the store
//! schema; unknown fields or operator/kind mismatches are `Validation`.

use rusqlite::types::Value as SqlValue;

use weft_domain::schema::{FieldKind, Filter, FilterSet, StoreSchema};
use weft_domain::{Error, Result};

use crate::value::{serialize_field, validate_field_name};

/// System columns usable in filters and ordering alongside user fields.
const SYSTEM_FIELDS: [(&str, FieldKind); 2] = [("id", FieldKind::Text), ("created_at", FieldKind::Text)];

fn field_kind(schema: &StoreSchema, name: &str) -> Option<FieldKind> {
    SYSTEM_FIELDS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, k)| *k)
        .or_else(|| schema.get(name))
}

/// Build `WHERE …` and its parameters. Always non-empty: the tenant
/// predicate is unconditional.
pub(crate) fn build_where(
    schema: &StoreSchema,
    user_id: &str,
    filters: &FilterSet,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = vec!["user_id = ?".to_owned()];
    let mut params = vec![SqlValue::Text(user_id.to_owned())];

    for (field, predicate) in filters.iter() {
        let kind = field_kind(schema, field).ok_or_else(|| {
            Error::Validation(format!("unknown filter field '{field}'"))
        })?;
        if kind == FieldKind::JsonCollection {
            return Err(Error::Validation(format!(
                "collection field '{field}' cannot be filtered; search it via full_text_search"
            )));
        }
        let field = validate_field_name(field)?;

        match predicate {
            Filter::Eq(value) => {
                clauses.push(format!("\"{field}\" = ?"));
                params.push(serialize_field(field, kind, value)?);
            }
            Filter::Like(pattern) => {
                if kind != FieldKind::Text {
                    return Err(Error::Validation(format!(
                        "like filter requires a text field, '{field}' is not"
                    )));
                }
                clauses.push(format!("\"{field}\" LIKE ?"));
                params.push(SqlValue::Text(pattern.clone()));
            }
            Filter::Contains(value) => {
                if kind != FieldKind::Json {
                    return Err(Error::Validation(format!(
                        "contains filter requires a json field, '{field}' is not"
                    )));
                }
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(\"{field}\") WHERE json_each.value = ?)"
                ));
                let param = match value {
                    serde_json::Value::String(s) => SqlValue::Text(s.clone()),
                    serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
                    serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                        (Some(i), _) => SqlValue::Integer(i),
                        (None, Some(f)) => SqlValue::Real(f),
                        (None, None) => {
                            return Err(Error::Validation(format!(
                                "contains filter on '{field}' has a non-finite number"
                            )))
                        }
                    },
                    other => {
                        return Err(Error::Validation(format!(
                            "contains filter on '{field}' requires a scalar, got {other}"
                        )))
                    }
                };
                params.push(param);
            }
        }
    }

    Ok((format!("WHERE {}", clauses.join(" AND ")), params))
}

/// Build `ORDER BY` from a validated field, or empty.
pub(crate) fn build_order(
    schema: &StoreSchema,
    order_by: Option<&str>,
    desc: bool,
) -> Result<String> {
    let Some(field) = order_by else {
        return Ok(String::new());
    };
    let kind = field_kind(schema, field)
        .ok_or_else(|| Error::Validation(format!("unknown order_by field '{field}'")))?;
    if kind == FieldKind::JsonCollection {
        return Err(Error::Validation(format!(
            "cannot order by collection field '{field}'"
        )));
    }
    let field = validate_field_name(field)?;
    let direction = if desc { "DESC" } else { "ASC" };
    Ok(format!("ORDER BY \"{field}\" {direction}"))
}

/// Build `LIMIT/OFFSET` and its parameters. SQLite needs a LIMIT to
/// carry an OFFSET, so an offset without a limit uses `LIMIT -1`.
pub(crate) fn build_pagination(limit: Option<u64>, offset: u64) -> (String, Vec<SqlValue>) {
    match (limit, offset) {
        (None, 0) => (String::new(), vec![]),
        (Some(l), 0) => ("LIMIT ?".into(), vec![SqlValue::Integer(l as i64)]),
        (None, o) => (
            "LIMIT -1 OFFSET ?".into(),
            vec![SqlValue::Integer(o as i64)],
        ),
        (Some(l), o) => (
            "LIMIT ? OFFSET ?".into(),
            vec![SqlValue::Integer(l as i64), SqlValue::Integer(o as i64)],
        ),
    }
}
