//! Entity definitions and the schema registry
//!
//! The registry is the source of truth for which tables and columns must exist. Field
//! declarations are validated when an entity is defined; nothing is re-checked at insert
//! time except the values themselves.

use super::association::{Association, AssociationKind, AssociationOptions};
use super::error::{DatabaseError, Result};
use super::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// Primary key column present on every entity table
pub const PRIMARY_KEY: &str = "id";
/// Creation timestamp column
pub const CREATED_AT: &str = "createdAt";
/// Last-update timestamp column
pub const UPDATED_AT: &str = "updatedAt";

/// Declared type of an entity field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Short string, VARCHAR(255)
    String,
    /// Unbounded text
    Text,
    /// 64-bit integer
    Integer,
    /// Floating point
    Float,
    /// Boolean stored as 0/1
    Boolean,
    /// Date/time stored as text
    Date,
    /// Binary data
    Blob,
}

impl FieldType {
    /// Column type used in DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String => "VARCHAR(255)",
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Boolean => "TINYINT(1)",
            FieldType::Date => "DATETIME",
            FieldType::Blob => "BLOB",
        }
    }

    /// Check an input value and convert it to the stored representation
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldType::String | FieldType::Text | FieldType::Date, v @ Value::Text(_)) => Ok(v),
            (FieldType::Integer, v @ Value::Integer(_)) => Ok(v),
            (FieldType::Float, v @ Value::Real(_)) => Ok(v),
            (FieldType::Float, Value::Integer(i)) => Ok(Value::Real(i as f64)),
            (FieldType::Boolean, v @ Value::Bool(_)) => Ok(v),
            (FieldType::Boolean, Value::Integer(i @ (0 | 1))) => Ok(Value::Bool(i == 1)),
            (FieldType::Blob, v @ Value::Blob(_)) => Ok(v),
            (_, other) => Err(DatabaseError::validation(format!(
                "field '{}' expects {:?}, got {}",
                field,
                self,
                other.type_name()
            ))),
        }
    }

    /// Convert a value read from storage back to the declared representation
    pub fn restore(&self, value: Value) -> Value {
        match (self, value) {
            (FieldType::Boolean, Value::Integer(i)) => Value::Bool(i != 0),
            (FieldType::Float, Value::Integer(i)) => Value::Real(i as f64),
            (_, v) => v,
        }
    }
}

/// A single field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    field_type: FieldType,
    allow_null: bool,
    unique: bool,
    default: Option<Value>,
}

impl FieldDef {
    /// Declare a nullable field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            allow_null: true,
            unique: false,
            default: None,
        }
    }

    /// Shorthand for a `String` field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Shorthand for an `Integer` field
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Reject NULL values
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    /// Add a UNIQUE constraint
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Value used when `create` omits the field
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Whether NULL is accepted
    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    /// Whether the column is UNIQUE
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Default value, if any
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// Per-entity options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOptions {
    /// Explicit table name; the pluralized entity name otherwise
    pub table_name: Option<String>,
    /// Maintain `createdAt`/`updatedAt`
    pub timestamps: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            table_name: None,
            timestamps: true,
        }
    }
}

/// An immutable entity definition
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDefinition {
    name: String,
    table_name: String,
    fields: Vec<FieldDef>,
    timestamps: bool,
}

impl EntityDefinition {
    /// Entity name (e.g. `player`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name (e.g. `players`)
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a declared field
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether timestamps are maintained
    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    /// Default foreign-key column name pointing at this entity
    pub fn foreign_key_name(&self) -> String {
        format!("{}Id", self.name)
    }
}

/// Naive English pluralization used for table and association names
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiouAEIOU".contains(c)) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

/// Check that a name is a plain SQL identifier
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::invalid_definition(format!(
            "{} name '{}' is not a valid identifier",
            kind, name
        )))
    }
}

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Holds entity definitions and association declarations
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: Vec<EntityDefinition>,
    index: HashMap<String, usize>,
    associations: Vec<Association>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an entity with default options
    pub fn define(&mut self, name: &str, fields: Vec<FieldDef>) -> Result<EntityDefinition> {
        self.define_with_options(name, fields, EntityOptions::default())
    }

    /// Define an entity
    ///
    /// # Errors
    ///
    /// `DuplicateEntity` if the name is taken, `InvalidDefinition` for malformed fields.
    pub fn define_with_options(
        &mut self,
        name: &str,
        fields: Vec<FieldDef>,
        options: EntityOptions,
    ) -> Result<EntityDefinition> {
        if self.index.contains_key(name) {
            return Err(DatabaseError::DuplicateEntity(name.to_string()));
        }
        validate_identifier("entity", name)?;

        let mut seen = Vec::with_capacity(fields.len());
        for field in &fields {
            validate_identifier("field", &field.name)?;
            if [PRIMARY_KEY, CREATED_AT, UPDATED_AT].contains(&field.name.as_str()) {
                return Err(DatabaseError::invalid_definition(format!(
                    "field '{}' on '{}' is managed by the mapper",
                    field.name, name
                )));
            }
            if seen.contains(&field.name.as_str()) {
                return Err(DatabaseError::invalid_definition(format!(
                    "field '{}' declared twice on '{}'",
                    field.name, name
                )));
            }
            if let Some(default) = &field.default {
                field.field_type.coerce(&field.name, default.clone())?;
            }
            seen.push(field.name.as_str());
        }

        let table_name = options.table_name.unwrap_or_else(|| pluralize(name));
        validate_identifier("table", &table_name)?;

        let definition = EntityDefinition {
            name: name.to_string(),
            table_name,
            fields,
            timestamps: options.timestamps,
        };
        debug!(entity = %definition.name, table = %definition.table_name, "entity defined");

        self.index.insert(name.to_string(), self.entities.len());
        self.entities.push(definition.clone());
        Ok(definition)
    }

    /// Declare an association between two registered entities
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if either side is unregistered; `UnsupportedAssociationKind` if a
    /// join table is requested from anything but `BelongsToMany`.
    pub fn associate(
        &mut self,
        kind: AssociationKind,
        left: &str,
        right: &str,
        options: AssociationOptions,
    ) -> Result<Association> {
        let source = self.entity(left)?;
        let target = self.entity(right)?;
        let through = match options.through_entity_name() {
            Some(name) => Some(self.entity(name)?),
            None => None,
        };

        let association = Association::resolve(kind, source, target, through, &options)?;

        if self
            .associations
            .iter()
            .any(|a| a.source() == association.source() && a.name() == association.name())
        {
            return Err(DatabaseError::invalid_definition(format!(
                "association '{}' already declared on '{}'",
                association.name(),
                association.source()
            )));
        }

        debug!(
            kind = %association.kind(),
            source = %association.source(),
            target = %association.target(),
            name = %association.name(),
            "association declared"
        );
        self.associations.push(association.clone());
        Ok(association)
    }

    /// Look up an entity
    pub fn entity(&self, name: &str) -> Result<&EntityDefinition> {
        self.index
            .get(name)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| DatabaseError::UnknownEntity(name.to_string()))
    }

    /// All entities in definition order
    pub fn entities(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.iter()
    }

    /// All associations in declaration order
    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.iter()
    }

    /// Associations owned by an entity
    pub fn associations_of<'a, 'b>(
        &'a self,
        owner: &'b str,
    ) -> impl Iterator<Item = &'a Association> + 'b
    where
        'a: 'b,
    {
        self.associations.iter().filter(move |a| a.source() == owner)
    }

    /// Look up an association by owner and name
    pub fn association(&self, owner: &str, name: &str) -> Result<&Association> {
        self.entity(owner)?;
        self.associations
            .iter()
            .find(|a| a.source() == owner && a.name() == name)
            .ok_or_else(|| DatabaseError::UnknownAssociation {
                entity: owner.to_string(),
                name: name.to_string(),
            })
    }

    /// Physical columns of an entity's table: id, fields, timestamps and foreign keys
    pub fn columns_of(&self, entity: &str) -> Result<Vec<String>> {
        let definition = self.entity(entity)?;
        let mut columns = vec![PRIMARY_KEY.to_string()];
        columns.extend(definition.fields.iter().map(|f| f.name.clone()));
        if definition.timestamps {
            columns.push(CREATED_AT.to_string());
            columns.push(UPDATED_AT.to_string());
        }
        for association in &self.associations {
            for column in association.columns_on(definition.table_name()) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Ok(columns)
    }

    /// Foreign-key columns an entity's table carries
    pub fn foreign_keys_of(&self, entity: &str) -> Result<Vec<String>> {
        let definition = self.entity(entity)?;
        let mut columns: Vec<String> = Vec::new();
        for association in &self.associations {
            for column in association.columns_on(definition.table_name()) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Ok(columns)
    }
}
