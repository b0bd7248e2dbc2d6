//! Entity rows as returned by the query executor

use super::error::{DatabaseError, Result};
use super::schema::{EntityDefinition, PRIMARY_KEY};
use super::value::{DatabaseRow, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// A stored entity row with any eagerly included related rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    entity: String,
    id: i64,
    values: BTreeMap<String, Value>,
    included: BTreeMap<String, Vec<Row>>,
}

impl Row {
    /// Build a row from a raw result row, restoring declared field types
    pub(crate) fn from_raw(definition: &EntityDefinition, mut raw: DatabaseRow) -> Result<Self> {
        let id = raw
            .get(PRIMARY_KEY)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DatabaseError::query(format!(
                    "row of '{}' has no integer primary key",
                    definition.name()
                ))
            })?;
        for field in definition.fields() {
            if let Some(value) = raw.remove(field.name()) {
                raw.insert(field.name().to_string(), field.field_type().restore(value));
            }
        }
        Ok(Self {
            entity: definition.name().to_string(),
            id,
            values: raw,
            included: BTreeMap::new(),
        })
    }

    /// Entity name
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Primary key
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Column value; `None` if the column does not exist
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Text column shorthand
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// All column values
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Eagerly loaded rows of an association; empty if it was not included
    pub fn related(&self, association: &str) -> &[Row] {
        self.included
            .get(association)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether an association was included
    pub fn is_included(&self, association: &str) -> bool {
        self.included.contains_key(association)
    }

    pub(crate) fn include(&mut self, association: &str, rows: Vec<Row>) {
        self.included.insert(association.to_string(), rows);
    }

    /// Plain object projection: columns plus included associations as arrays
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (column, value) in &self.values {
            object.insert(column.clone(), value.to_json());
        }
        for (name, rows) in &self.included {
            object.insert(
                name.clone(),
                serde_json::Value::Array(rows.iter().map(Row::to_json).collect()),
            );
        }
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{FieldDef, FieldType, SchemaRegistry};

    fn definition() -> EntityDefinition {
        let mut registry = SchemaRegistry::new();
        registry
            .define(
                "player",
                vec![
                    FieldDef::string("name"),
                    FieldDef::new("active", FieldType::Boolean),
                ],
            )
            .unwrap()
    }

    #[test]
    fn test_from_raw_restores_types() {
        let mut raw = DatabaseRow::new();
        raw.insert("id".to_string(), Value::Integer(3));
        raw.insert("name".to_string(), Value::from("john"));
        raw.insert("active".to_string(), Value::Integer(1));

        let row = Row::from_raw(&definition(), raw).unwrap();
        assert_eq!(row.id(), 3);
        assert_eq!(row.entity(), "player");
        assert_eq!(row.get_str("name"), Some("john"));
        assert_eq!(row.get("active"), Some(&Value::Bool(true)));
        assert!(row.related("skills").is_empty());
    }

    #[test]
    fn test_from_raw_requires_id() {
        let mut raw = DatabaseRow::new();
        raw.insert("name".to_string(), Value::from("john"));
        assert!(Row::from_raw(&definition(), raw).is_err());
    }

    #[test]
    fn test_to_json_includes_related() {
        let mut raw = DatabaseRow::new();
        raw.insert("id".to_string(), Value::Integer(1));
        raw.insert("name".to_string(), Value::from("john"));
        let mut row = Row::from_raw(&definition(), raw.clone()).unwrap();
        let skill = Row::from_raw(&definition(), raw).unwrap();
        row.include("skills", vec![skill]);

        let json = row.to_json();
        assert_eq!(json["name"], serde_json::json!("john"));
        assert_eq!(json["skills"][0]["id"], serde_json::json!(1));
        assert!(row.is_included("skills"));
    }
}
