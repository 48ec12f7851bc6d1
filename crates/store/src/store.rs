//! [`SqliteStore`] — the SQLite implementation of the store role.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension as _;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

use weft_domain::config::StoreConfig;
use weft_domain::schema::{FieldKind, FilterSet, FindQuery, Record, StoreSchema};
use weft_domain::trace::TraceEvent;
use weft_domain::{Error, Result};
use weft_plugins::{CorePlugin, StorePlugin};

use crate::conn::{domain_err, ConnPair, RetryPolicy};
use crate::filter::{build_order, build_pagination, build_where};
use crate::schema_ops;
use crate::value::{
    collection_table, deserialize_field, fts_content, fts_table, serialize_field,
    validate_field_name, validate_store_name,
};

/// Multi-tenant tabular store backed by a single SQLite file.
///
/// Holds one writer and one reader connection plus an in-process cache
/// of declared schemas (schemas are process-global, not per-user).
pub struct SqliteStore {
    conns: ConnPair,
    schemas: RwLock<HashMap<String, StoreSchema>>,
}

impl SqliteStore {
    /// Open (or create) the database and load registered store schemas.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(config);
        let conns = ConnPair::open(&config.db_path, retry).await?;

        conns
            .with_write(|tx| {
                tx.execute_batch(schema_ops::STORES_TABLE_DDL)?;
                Ok(())
            })
            .await?;

        let rows: Vec<(String, String)> = conns
            .with_read(|conn| {
                let mut stmt = conn.prepare("SELECT name, schema_json FROM _stores")?;
                let mapped = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let mut schemas = HashMap::new();
        for (name, raw) in rows {
            match serde_json::from_str::<JsonValue>(&raw)
                .ok()
                .and_then(|v| StoreSchema::from_json(&v))
            {
                Some(schema) => {
                    schemas.insert(name, schema);
                }
                None => {
                    tracing::warn!(store = %name, "skipping store with corrupt schema_json");
                }
            }
        }

        TraceEvent::StoreOpened {
            path: config.db_path.display().to_string(),
            stores: schemas.len(),
        }
        .emit();

        Ok(Self {
            conns,
            schemas: RwLock::new(schemas),
        })
    }

    /// Schema from cache, falling back to `_stores` (another process
    /// may have created the store).
    async fn load_schema(&self, name: &str) -> Result<Option<StoreSchema>> {
        if let Some(schema) = self.schemas.read().get(name).cloned() {
            return Ok(Some(schema));
        }
        let owned = name.to_owned();
        let raw: Option<String> = self
            .conns
            .with_read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT schema_json FROM _stores WHERE name = ?1",
                        [owned.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        let Some(raw) = raw else { return Ok(None) };
        let schema = serde_json::from_str::<JsonValue>(&raw)
            .ok()
            .and_then(|v| StoreSchema::from_json(&v))
            .ok_or_else(|| Error::Storage(format!("corrupt schema for store '{name}'")))?;
        self.schemas
            .write()
            .insert(name.to_owned(), schema.clone());
        Ok(Some(schema))
    }

    async fn require_schema(&self, name: &str) -> Result<StoreSchema> {
        self.load_schema(name)
            .await?
            .ok_or_else(|| Error::Validation(format!("store '{name}' does not exist")))
    }
}

/// Selected columns for a store: system fields first, then the
/// non-collection user fields in declaration order.
fn column_select(schema: &StoreSchema) -> (Vec<(String, FieldKind)>, String) {
    let mut columns = vec![
        ("id".to_owned(), FieldKind::Text),
        ("user_id".to_owned(), FieldKind::Text),
        ("created_at".to_owned(), FieldKind::Text),
    ];
    for (field, kind) in schema.column_fields() {
        columns.push((field.to_owned(), kind));
    }
    let list = columns
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    (columns, list)
}

fn row_values(row: &rusqlite::Row<'_>, count: usize) -> rusqlite::Result<Vec<SqlValue>> {
    (0..count).map(|i| row.get::<_, SqlValue>(i)).collect()
}

fn record_from_values(columns: &[(String, FieldKind)], values: Vec<SqlValue>) -> Record {
    let mut record = Record::new();
    for ((name, kind), value) in columns.iter().zip(values) {
        record.insert(name.clone(), deserialize_field(*kind, value));
    }
    record
}

/// Indexable fields with, for column-backed ones, their position in
/// the SELECT used to rebuild FTS content.
fn fts_fields(schema: &StoreSchema) -> Vec<(String, FieldKind)> {
    schema
        .iter()
        .filter(|(_, kind)| kind.is_indexable())
        .map(|(name, kind)| (name.to_owned(), kind))
        .collect()
}

fn fts_insert_sql(store: &str, fields: &[(String, FieldKind)]) -> String {
    let mut columns = vec![
        "user_id".to_owned(),
        "parent_id".to_owned(),
        "child_id".to_owned(),
    ];
    columns.extend(fields.iter().map(|(name, _)| format!("\"{name}\"")));
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        fts_table(store),
        columns.join(", "),
        placeholders
    )
}

#[async_trait]
impl CorePlugin for SqliteStore {
    fn name(&self) -> &str {
        "sqlite-store"
    }
}

#[async_trait]
impl StorePlugin for SqliteStore {
    async fn create_store_if_not_exists(&self, name: &str, schema: &StoreSchema) -> Result<bool> {
        let name = validate_store_name(name)?.to_owned();
        for (field, _) in schema.iter() {
            validate_field_name(field)?;
        }

        let tx_name = name.clone();
        let tx_schema = schema.clone();
        let (created, effective) = self
            .conns
            .with_write(move |tx| schema_ops::create_store_tx(tx, &tx_name, &tx_schema))
            .await?;

        self.schemas.write().insert(name.clone(), effective);
        TraceEvent::StoreCreated {
            store: name,
            created,
        }
        .emit();
        Ok(created)
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        self.conns
            .with_read(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM _stores ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    async fn add(
        &self,
        user_id: &str,
        name: &str,
        data: Record,
        record_id: Option<String>,
    ) -> Result<String> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;

        for key in data.keys() {
            match schema.get(key) {
                None => {
                    return Err(Error::Validation(format!(
                        "unknown field '{key}' for store '{name}'"
                    )))
                }
                Some(FieldKind::JsonCollection) => {
                    return Err(Error::Validation(format!(
                        "field '{key}' is a collection; use collection_append to add items"
                    )))
                }
                Some(_) => {}
            }
        }

        let record_id = record_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = Utc::now().to_rfc3339();

        // Serialize columns in declaration order; absent fields store NULL.
        let mut column_names = Vec::new();
        let mut column_values: Vec<SqlValue> = Vec::new();
        for (field, kind) in schema.column_fields() {
            let value = data.get(field).unwrap_or(&JsonValue::Null);
            column_names.push(format!("\"{field}\""));
            column_values.push(serialize_field(field, kind, value)?);
        }

        let insert_sql = format!(
            "INSERT INTO \"{name}\" (id, user_id, created_at{}{}) VALUES (?, ?, ?{})",
            if column_names.is_empty() { "" } else { ", " },
            column_names.join(", "),
            ", ?".repeat(column_values.len()),
        );

        // Parent FTS row content, in indexable-field order.
        let indexable = fts_fields(&schema);
        let fts_sql = (!indexable.is_empty()).then(|| fts_insert_sql(&name, &indexable));
        let mut fts_values: Vec<SqlValue> = Vec::new();
        if fts_sql.is_some() {
            for (field, kind) in &indexable {
                let content = match schema
                    .column_fields()
                    .position(|(f, _)| f == field.as_str())
                {
                    Some(i) => fts_content(*kind, &column_values[i]),
                    None => String::new(), // collection field
                };
                fts_values.push(SqlValue::Text(content));
            }
        }

        let tx_id = record_id.clone();
        let tx_user = user_id.to_owned();
        let tx_name = name.clone();
        self.conns
            .with_write(move |tx| {
                let exists = tx
                    .query_row(
                        &format!("SELECT 1 FROM \"{tx_name}\" WHERE id = ?1"),
                        [tx_id.as_str()],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Err(domain_err(Error::Validation(format!(
                        "record id '{tx_id}' already exists in store '{tx_name}'"
                    ))));
                }

                let mut params: Vec<SqlValue> = vec![
                    SqlValue::Text(tx_id.clone()),
                    SqlValue::Text(tx_user.clone()),
                    SqlValue::Text(created_at.clone()),
                ];
                params.extend(column_values.iter().cloned());
                tx.execute(&insert_sql, rusqlite::params_from_iter(params))?;

                if let Some(fts) = &fts_sql {
                    let mut params: Vec<SqlValue> = vec![
                        SqlValue::Text(tx_user.clone()),
                        SqlValue::Text(tx_id.clone()),
                        SqlValue::Text(String::new()),
                    ];
                    params.extend(fts_values.iter().cloned());
                    tx.execute(fts, rusqlite::params_from_iter(params))?;
                }
                Ok(())
            })
            .await?;

        tracing::debug!(store = %name, record_id = %record_id, "record added");
        Ok(record_id)
    }

    async fn get(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        load_collections: bool,
    ) -> Result<Option<Record>> {
        let name = validate_store_name(name)?.to_owned();
        let Some(schema) = self.load_schema(&name).await? else {
            return Ok(None);
        };
        let (columns, select_list) = column_select(&schema);
        let collections: Vec<String> = if load_collections {
            schema.collection_fields().map(str::to_owned).collect()
        } else {
            Vec::new()
        };

        let sql =
            format!("SELECT {select_list} FROM \"{name}\" WHERE id = ?1 AND user_id = ?2");
        let tx_id = record_id.to_owned();
        let tx_user = user_id.to_owned();
        self.conns
            .with_read(move |conn| {
                let count = columns.len();
                let Some(values) = conn
                    .query_row(&sql, [tx_id.as_str(), tx_user.as_str()], |row| {
                        row_values(row, count)
                    })
                    .optional()?
                else {
                    return Ok(None);
                };
                let mut record = record_from_values(&columns, values);

                for field in &collections {
                    let child = collection_table(&name, field);
                    let mut stmt = conn.prepare(&format!(
                        "SELECT value_json FROM \"{child}\" WHERE record_id = ?1 ORDER BY order_index ASC"
                    ))?;
                    let rows = stmt.query_map([tx_id.as_str()], |row| row.get::<_, String>(0))?;
                    let mut items = Vec::new();
                    for row in rows {
                        match serde_json::from_str(&row?) {
                            Ok(item) => items.push(item),
                            Err(e) => {
                                tracing::warn!(field = %field, error = %e, "skipping malformed collection item");
                            }
                        }
                    }
                    record.insert(field.clone(), JsonValue::Array(items));
                }

                Ok(Some(record))
            })
            .await
    }

    async fn update(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        updates: Record,
    ) -> Result<bool> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;
        if updates.is_empty() {
            return Ok(true);
        }

        let mut set_clauses = Vec::new();
        let mut set_values: Vec<SqlValue> = Vec::new();
        for (key, value) in &updates {
            match schema.get(key) {
                None => {
                    return Err(Error::Validation(format!(
                        "unknown field '{key}' for store '{name}'"
                    )))
                }
                Some(FieldKind::JsonCollection) => {
                    return Err(Error::Validation(format!(
                        "cannot update collection field '{key}'; use collection_append"
                    )))
                }
                Some(kind) => {
                    let field = validate_field_name(key)?;
                    set_clauses.push(format!("\"{field}\" = ?"));
                    set_values.push(serialize_field(field, kind, value)?);
                }
            }
        }

        let update_sql = format!(
            "UPDATE \"{name}\" SET {} WHERE id = ? AND user_id = ?",
            set_clauses.join(", ")
        );

        // After a successful update the parent FTS row is replaced with
        // freshly-read content. Collection child rows are untouched.
        let indexable = fts_fields(&schema);
        let fts_sql = (!indexable.is_empty()).then(|| fts_insert_sql(&name, &indexable));
        let fts_select: Vec<(String, FieldKind)> = indexable
            .iter()
            .filter(|(_, kind)| *kind != FieldKind::JsonCollection)
            .cloned()
            .collect();
        let fts_select_sql = (!fts_select.is_empty()).then(|| {
            format!(
                "SELECT {} FROM \"{name}\" WHERE id = ?1",
                fts_select
                    .iter()
                    .map(|(f, _)| format!("\"{f}\""))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        });

        let tx_id = record_id.to_owned();
        let tx_user = user_id.to_owned();
        let tx_name = name.clone();
        self.conns
            .with_write(move |tx| {
                let mut params: Vec<SqlValue> = set_values.clone();
                params.push(SqlValue::Text(tx_id.clone()));
                params.push(SqlValue::Text(tx_user.clone()));
                let changed = tx.execute(&update_sql, rusqlite::params_from_iter(params))?;
                if changed == 0 {
                    return Ok(false);
                }

                if let Some(fts) = &fts_sql {
                    // Fresh column content for the indexable fields.
                    let mut by_field: HashMap<String, String> = HashMap::new();
                    if let Some(select) = &fts_select_sql {
                        let values = tx.query_row(select, [tx_id.as_str()], |row| {
                            row_values(row, fts_select.len())
                        })?;
                        for ((field, kind), value) in fts_select.iter().zip(values) {
                            by_field.insert(field.clone(), fts_content(*kind, &value));
                        }
                    }

                    tx.execute(
                        &format!(
                            "DELETE FROM \"{}\" WHERE parent_id = ?1 AND child_id = '' AND user_id = ?2",
                            fts_table(&tx_name)
                        ),
                        [tx_id.as_str(), tx_user.as_str()],
                    )?;

                    let mut params: Vec<SqlValue> = vec![
                        SqlValue::Text(tx_user.clone()),
                        SqlValue::Text(tx_id.clone()),
                        SqlValue::Text(String::new()),
                    ];
                    for (field, _) in &indexable {
                        params.push(SqlValue::Text(
                            by_field.get(field).cloned().unwrap_or_default(),
                        ));
                    }
                    tx.execute(fts, rusqlite::params_from_iter(params))?;
                }

                Ok(true)
            })
            .await
    }

    async fn delete(&self, user_id: &str, name: &str, record_id: &str) -> Result<bool> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;
        let has_fts = schema.indexable_fields().next().is_some();

        let tx_id = record_id.to_owned();
        let tx_user = user_id.to_owned();
        let tx_name = name.clone();
        let deleted = self
            .conns
            .with_write(move |tx| {
                if has_fts {
                    tx.execute(
                        &format!(
                            "DELETE FROM \"{}\" WHERE parent_id = ?1 AND user_id = ?2",
                            fts_table(&tx_name)
                        ),
                        [tx_id.as_str(), tx_user.as_str()],
                    )?;
                }
                let changed = tx.execute(
                    &format!("DELETE FROM \"{tx_name}\" WHERE id = ?1 AND user_id = ?2"),
                    [tx_id.as_str(), tx_user.as_str()],
                )?;
                Ok(changed > 0)
            })
            .await?;

        tracing::debug!(store = %name, record_id, deleted, "record delete");
        Ok(deleted)
    }

    async fn find(&self, user_id: &str, name: &str, query: FindQuery) -> Result<Vec<Record>> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;
        let (columns, select_list) = column_select(&schema);

        let (where_sql, mut params) = build_where(&schema, user_id, &query.filters)?;
        let order_sql = build_order(&schema, query.order_by.as_deref(), query.order_desc)?;
        let (page_sql, page_params) = build_pagination(query.limit, query.offset);
        params.extend(page_params);

        let sql = format!(
            "SELECT {select_list} FROM \"{name}\" {where_sql} {order_sql} {page_sql}"
        );

        self.conns
            .with_read(move |conn| {
                let count = columns.len();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), move |row| {
                    row_values(row, count)
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(record_from_values(&columns, row?));
                }
                Ok(out)
            })
            .await
    }

    async fn count(&self, user_id: &str, name: &str, filters: &FilterSet) -> Result<u64> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;
        let (where_sql, params) = build_where(&schema, user_id, filters)?;
        let sql = format!("SELECT COUNT(*) FROM \"{name}\" {where_sql}");

        self.conns
            .with_read(move |conn| {
                let count: i64 =
                    conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    async fn collection_append(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        field: &str,
        item: JsonValue,
    ) -> Result<i64> {
        let name = validate_store_name(name)?.to_owned();
        let field = validate_field_name(field)?.to_owned();
        let schema = self.require_schema(&name).await?;
        match schema.get(&field) {
            None => {
                return Err(Error::Validation(format!(
                    "field '{field}' does not exist in store '{name}'"
                )))
            }
            Some(FieldKind::JsonCollection) => {}
            Some(other) => {
                return Err(Error::Validation(format!(
                    "field '{field}' is {other:?}, not a collection; use update"
                )))
            }
        }
        if !item.is_object() && !item.is_array() {
            return Err(Error::Validation(
                "collection items must be JSON objects or arrays".into(),
            ));
        }

        let item_json = serde_json::to_string(&item)?;
        let child = collection_table(&name, &field);
        let has_fts = schema.indexable_fields().next().is_some();
        let child_id = format!("{field}_{}", Uuid::new_v4());

        let tx_id = record_id.to_owned();
        let tx_user = user_id.to_owned();
        let tx_name = name.clone();
        let tx_field = field.clone();
        let order_index = self
            .conns
            .with_write(move |tx| {
                let parent = tx
                    .query_row(
                        &format!("SELECT 1 FROM \"{tx_name}\" WHERE id = ?1 AND user_id = ?2"),
                        [tx_id.as_str(), tx_user.as_str()],
                        |_| Ok(()),
                    )
                    .optional()?;
                if parent.is_none() {
                    return Err(domain_err(Error::NotFound(format!(
                        "record '{tx_id}' does not exist in store '{tx_name}' for this user"
                    ))));
                }

                // Assigned inside the transaction; concurrent appends
                // serialize through the single writer.
                let order_index: i64 = tx.query_row(
                    &format!(
                        "SELECT COALESCE(MAX(order_index), 0) + 1 FROM \"{child}\" WHERE record_id = ?1"
                    ),
                    [tx_id.as_str()],
                    |row| row.get(0),
                )?;

                tx.execute(
                    &format!(
                        "INSERT INTO \"{child}\" (record_id, order_index, value_json) VALUES (?1, ?2, ?3)"
                    ),
                    rusqlite::params![tx_id, order_index, item_json],
                )?;

                if has_fts {
                    tx.execute(
                        &format!(
                            "INSERT INTO \"{}\" (user_id, parent_id, child_id, \"{tx_field}\") VALUES (?1, ?2, ?3, ?4)",
                            fts_table(&tx_name)
                        ),
                        rusqlite::params![tx_user, tx_id, child_id, item_json],
                    )?;
                }

                Ok(order_index)
            })
            .await?;

        tracing::debug!(
            store = %name,
            record_id,
            field = %field,
            order_index,
            "collection item appended"
        );
        Ok(order_index)
    }

    async fn collection_get(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        field: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<JsonValue>> {
        let name = validate_store_name(name)?.to_owned();
        let field = validate_field_name(field)?.to_owned();
        let schema = self.require_schema(&name).await?;
        if schema.get(&field) != Some(FieldKind::JsonCollection) {
            return Err(Error::Validation(format!(
                "field '{field}' is not a collection in store '{name}'"
            )));
        }

        let child = collection_table(&name, &field);
        let (page_sql, page_params) = build_pagination(limit, offset);
        let sql = format!(
            "SELECT value_json FROM \"{child}\" WHERE record_id = ?1 ORDER BY order_index ASC {page_sql}"
        );

        let tx_id = record_id.to_owned();
        let tx_user = user_id.to_owned();
        let tx_name = name.clone();
        self.conns
            .with_read(move |conn| {
                let parent = conn
                    .query_row(
                        &format!("SELECT 1 FROM \"{tx_name}\" WHERE id = ?1 AND user_id = ?2"),
                        [tx_id.as_str(), tx_user.as_str()],
                        |_| Ok(()),
                    )
                    .optional()?;
                if parent.is_none() {
                    return Err(domain_err(Error::NotFound(format!(
                        "record '{tx_id}' does not exist in store '{tx_name}' for this user"
                    ))));
                }

                let mut params: Vec<SqlValue> = vec![SqlValue::Text(tx_id.clone())];
                params.extend(page_params);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), |row| {
                        row.get::<_, String>(0)
                    })?;
                let mut items = Vec::new();
                for row in rows {
                    match serde_json::from_str(&row?) {
                        Ok(item) => items.push(item),
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed collection item");
                        }
                    }
                }
                Ok(items)
            })
            .await
    }

    async fn full_text_search(
        &self,
        user_id: &str,
        name: &str,
        query: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<Record>> {
        let name = validate_store_name(name)?.to_owned();
        let schema = self.require_schema(&name).await?;
        if schema.indexable_fields().next().is_none() {
            return Ok(Vec::new());
        }
        let (columns, select_list) = column_select(&schema);

        // Phrase-quoted with a trailing wildcard so partial words match.
        let match_string = format!("\"{}\"*", query.replace('"', "\"\""));
        let (page_sql, page_params) = build_pagination(limit, offset);
        let fts = fts_table(&name);

        // Phase A: rank-ordered parent ids (grouped, a parent may match
        // on several rows). Phase B: fetch the parent records and
        // restore rank order in the application.
        let ids_sql = format!(
            "SELECT parent_id, MIN(rank) AS score FROM \"{fts}\"
             WHERE \"{fts}\" MATCH ?1 AND user_id = ?2
             GROUP BY parent_id ORDER BY score {page_sql}"
        );

        let tx_user = user_id.to_owned();
        self.conns
            .with_read(move |conn| {
                let mut params: Vec<SqlValue> = vec![
                    SqlValue::Text(match_string),
                    SqlValue::Text(tx_user.clone()),
                ];
                params.extend(page_params);
                let mut stmt = conn.prepare(&ids_sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    row.get::<_, String>(0)
                })?;
                let mut parent_ids = Vec::new();
                for row in rows {
                    parent_ids.push(row?);
                }
                if parent_ids.is_empty() {
                    return Ok(Vec::new());
                }

                let placeholders = vec!["?"; parent_ids.len()].join(", ");
                let records_sql = format!(
                    "SELECT {select_list} FROM \"{name}\" WHERE id IN ({placeholders}) AND user_id = ?"
                );
                let mut params: Vec<SqlValue> = parent_ids
                    .iter()
                    .map(|id| SqlValue::Text(id.clone()))
                    .collect();
                params.push(SqlValue::Text(tx_user));

                let count = columns.len();
                let mut stmt = conn.prepare(&records_sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), move |row| {
                    row_values(row, count)
                })?;
                let mut by_id: HashMap<String, Record> = HashMap::new();
                for row in rows {
                    let record = record_from_values(&columns, row?);
                    if let Some(JsonValue::String(id)) = record.get("id").cloned() {
                        by_id.insert(id, record);
                    }
                }

                // FTS rank order, preserved.
                Ok(parent_ids
                    .into_iter()
                    .filter_map(|id| by_id.remove(&id))
                    .collect())
            })
            .await
    }
}
