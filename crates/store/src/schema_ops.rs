//! Store DDL: the `_stores` metadata table, parent/child table
//! creation, FTS5 virtual tables, and additive schema evolution.

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use rusqlite::Transaction;

use weft_domain::schema::{FieldKind, StoreSchema};
use weft_domain::{Error, Result};

use crate::conn::domain_err;
use crate::value::{collection_table, fts_table};

/// Core metadata table registering every declared store.
pub(crate) const STORES_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS _stores (
    name        TEXT PRIMARY KEY,
    schema_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
";

/// Create a store if absent, or evolve an existing one additively.
///
/// Returns `(created, effective_schema)`. A present field whose kind
/// differs from the declaration fails `SchemaConflict`; extra existing
/// fields are kept and ignored.
pub(crate) fn create_store_tx(
    tx: &Transaction<'_>,
    name: &str,
    schema: &StoreSchema,
) -> tokio_rusqlite::Result<(bool, StoreSchema)> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT schema_json FROM _stores WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(raw) => evolve_store(tx, name, schema, &raw).map(|merged| (false, merged)),
        None => {
            create_store(tx, name, schema)?;
            Ok((true, schema.clone()))
        }
    }
}

fn parse_stored_schema(name: &str, raw: &str) -> Result<StoreSchema> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::Storage(format!("corrupt schema for store '{name}': {e}")))?;
    StoreSchema::from_json(&value)
        .ok_or_else(|| Error::Storage(format!("corrupt schema for store '{name}'")))
}

fn evolve_store(
    tx: &Transaction<'_>,
    name: &str,
    requested: &StoreSchema,
    stored_raw: &str,
) -> tokio_rusqlite::Result<StoreSchema> {
    let existing = parse_stored_schema(name, stored_raw).map_err(domain_err)?;

    // Destructive drift fails before any DDL runs.
    for (field, kind) in requested.iter() {
        if let Some(present) = existing.get(field) {
            if present != kind {
                return Err(domain_err(Error::SchemaConflict(format!(
                    "store '{name}' field '{field}' is declared {kind:?} but exists as {present:?}"
                ))));
            }
        }
    }

    let missing: Vec<(&str, FieldKind)> = requested
        .iter()
        .filter(|(field, _)| existing.get(field).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(existing);
    }

    let mut merged = existing;
    for (field, kind) in missing {
        tracing::info!(store = name, field, ?kind, "adding column to existing store");
        if kind == FieldKind::JsonCollection {
            create_child_table(tx, name, field)?;
        } else {
            tx.execute_batch(&format!(
                "ALTER TABLE \"{name}\" ADD COLUMN \"{field}\" {}",
                kind.sql_type()
            ))?;
        }
        if kind.is_indexable() {
            // FTS5 columns are fixed at creation; late fields are not
            // searchable until the index is rebuilt offline.
            tracing::warn!(
                store = name,
                field,
                "field added after FTS table creation will not be full-text indexed"
            );
        }
        merged = merged.field(field, kind);
    }

    tx.execute(
        "UPDATE _stores SET schema_json = ?1 WHERE name = ?2",
        rusqlite::params![merged.to_json().to_string(), name],
    )?;

    Ok(merged)
}

fn create_store(tx: &Transaction<'_>, name: &str, schema: &StoreSchema) -> tokio_rusqlite::Result<()> {
    let mut columns = vec![
        "id TEXT PRIMARY KEY".to_owned(),
        "user_id TEXT NOT NULL".to_owned(),
        "created_at TEXT NOT NULL".to_owned(),
    ];
    for (field, kind) in schema.column_fields() {
        columns.push(format!("\"{field}\" {}", kind.sql_type()));
    }
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{name}\" ({})",
        columns.join(", ")
    ))?;
    tx.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS \"idx_{name}_user_id\" ON \"{name}\" (user_id)"
    ))?;

    for field in schema.collection_fields() {
        create_child_table(tx, name, field)?;
    }

    let indexable: Vec<&str> = schema.indexable_fields().collect();
    if !indexable.is_empty() {
        let fts_columns: Vec<String> = indexable.iter().map(|f| format!("\"{f}\"")).collect();
        tx.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS \"{}\" USING fts5(
                user_id UNINDEXED,
                parent_id UNINDEXED,
                child_id UNINDEXED,
                {},
                tokenize='porter'
            )",
            fts_table(name),
            fts_columns.join(", ")
        ))?;
    }

    tx.execute(
        "INSERT INTO _stores (name, schema_json, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            name,
            schema.to_json().to_string(),
            Utc::now().to_rfc3339()
        ],
    )?;

    tracing::info!(
        store = name,
        fields = schema.len(),
        indexable = indexable.len(),
        "store created"
    );
    Ok(())
}

fn create_child_table(tx: &Transaction<'_>, store: &str, field: &str) -> tokio_rusqlite::Result<()> {
    let child = collection_table(store, field);
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{child}\" (
            record_id   TEXT NOT NULL REFERENCES \"{store}\"(id) ON DELETE CASCADE,
            order_index INTEGER NOT NULL,
            value_json  TEXT NOT NULL,
            PRIMARY KEY (record_id, order_index)
        )"
    ))?;
    Ok(())
}
