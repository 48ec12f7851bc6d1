//! Store schema vocabulary: field kinds, declared schemas, records,
//! and the filter grammar used by `find`/`count`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record as seen through the store API: field name -> JSON value.
/// System fields (`id`, `user_id`, `created_at`) appear alongside the
/// user-declared fields.
pub type Record = serde_json::Map<String, Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Bool,
    Json,
    /// Append-only child list; lives in a child table, not a parent column.
    JsonCollection,
}

impl FieldKind {
    /// SQLite column type for this kind.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Json => "TEXT",
            FieldKind::Integer | FieldKind::Bool => "INTEGER",
            FieldKind::Real => "REAL",
            // Collections have no parent column; the child table holds TEXT.
            FieldKind::JsonCollection => "TEXT",
        }
    }

    /// Whether the field's content lands in the per-store FTS table.
    pub fn is_indexable(self) -> bool {
        matches!(
            self,
            FieldKind::Text | FieldKind::Json | FieldKind::JsonCollection
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Declared store schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A store's declared schema: ordered field name -> kind pairs.
/// Order is only cosmetic (column order in the created table); all
/// access is by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSchema {
    fields: Vec<(String, FieldKind)>,
}

impl StoreSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    pub fn get(&self, name: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Non-collection fields (those with a parent-table column).
    pub fn column_fields(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.iter().filter(|(_, k)| *k != FieldKind::JsonCollection)
    }

    pub fn collection_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, k)| *k == FieldKind::JsonCollection)
            .map(|(n, _)| n.as_str())
    }

    pub fn indexable_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, k)| k.is_indexable())
            .map(|(n, _)| n.as_str())
    }

    /// Serialize to the `_stores.schema_json` representation.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, kind) in &self.fields {
            if let Ok(value) = serde_json::to_value(kind) {
                map.insert(name.clone(), value);
            }
        }
        Value::Object(map)
    }

    /// Parse back from `_stores.schema_json`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut schema = StoreSchema::new();
        for (name, kind) in map {
            let kind: FieldKind = serde_json::from_value(kind.clone()).ok()?;
            schema.fields.push((name.clone(), kind));
        }
        Some(schema)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter grammar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single field predicate. Predicates are AND-combined, always
/// together with the caller's `user_id`.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Exact equality against the serialized field value.
    Eq(Value),
    /// SQL LIKE pattern match (text fields).
    Like(String),
    /// JSON-array containment: the stored array contains this element.
    Contains(Value),
}

/// An ordered conjunction of field predicates.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    predicates: Vec<(String, Filter)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.predicates.push((field.into(), Filter::Eq(value)));
        self
    }

    pub fn like(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.predicates
            .push((field.into(), Filter::Like(pattern.into())));
        self
    }

    pub fn contains(mut self, field: impl Into<String>, value: Value) -> Self {
        self.predicates.push((field.into(), Filter::Contains(value)));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Filter)> {
        self.predicates.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Query options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filters: FilterSet,
    pub limit: Option<u64>,
    pub offset: u64,
    pub order_by: Option<String>,
    pub order_desc: bool,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, desc: bool) -> Self {
        self.order_by = Some(field.into());
        self.order_desc = desc;
        self
    }
}
