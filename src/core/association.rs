//! Association declarations
//!
//! An association is resolved once, at declaration time, into the physical storage that
//! backs it: a foreign-key column or a join table. The foreign key always lives on the
//! belongs-to side; `HasOne` and `HasMany` place it on their target, `BelongsTo` on its
//! source. Join tables can only be requested through `BelongsToMany`.

use super::error::{DatabaseError, Result};
use super::schema::{pluralize, validate_identifier, EntityDefinition};
use std::fmt;
use std::str::FromStr;

/// Declared association kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// Source has at most one target; key on the target
    HasOne,
    /// Source has many targets; key on the targets
    HasMany,
    /// Source points at one target; key on the source
    BelongsTo,
    /// Many-to-many through a join table
    BelongsToMany,
}

impl AssociationKind {
    /// Name used in logs and errors
    pub fn to_str(&self) -> &'static str {
        match self {
            AssociationKind::HasOne => "hasOne",
            AssociationKind::HasMany => "hasMany",
            AssociationKind::BelongsTo => "belongsTo",
            AssociationKind::BelongsToMany => "belongsToMany",
        }
    }

    /// Relationship cardinality seen from the source
    pub fn cardinality(&self) -> Cardinality {
        match self {
            AssociationKind::HasOne | AssociationKind::BelongsTo => Cardinality::OneToOne,
            AssociationKind::HasMany => Cardinality::OneToMany,
            AssociationKind::BelongsToMany => Cardinality::ManyToMany,
        }
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

impl FromStr for AssociationKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "hasone" => Ok(AssociationKind::HasOne),
            "hasmany" => Ok(AssociationKind::HasMany),
            "belongsto" => Ok(AssociationKind::BelongsTo),
            "belongstomany" => Ok(AssociationKind::BelongsToMany),
            "hasmanythrough" => Err(DatabaseError::unsupported_kind(
                s,
                "join tables are declared from the belongs side with belongsToMany",
            )),
            _ => Err(DatabaseError::unsupported_kind(
                s,
                "expected hasOne, hasMany, belongsTo or belongsToMany",
            )),
        }
    }
}

/// Relationship cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// One-to-one
    OneToOne,
    /// One-to-many
    OneToMany,
    /// Many-to-many
    ManyToMany,
}

/// Join mechanism for many-to-many associations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Through {
    /// Auxiliary table holding only the two keys
    Table(String),
    /// A registered entity whose table receives the two keys
    Entity(String),
}

/// Declaration options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationOptions {
    /// Join mechanism; only valid for `BelongsToMany`
    pub through: Option<Through>,
    /// Key column pointing at the owning side
    pub foreign_key: Option<String>,
    /// Key column pointing at the target (join tables only)
    pub other_key: Option<String>,
    /// Accessor name; derived from the target otherwise
    pub alias: Option<String>,
}

impl AssociationOptions {
    /// Join through an auxiliary table
    pub fn through_table(name: impl Into<String>) -> Self {
        Self {
            through: Some(Through::Table(name.into())),
            ..Default::default()
        }
    }

    /// Join through a registered entity
    pub fn through_entity(name: impl Into<String>) -> Self {
        Self {
            through: Some(Through::Entity(name.into())),
            ..Default::default()
        }
    }

    /// Override the foreign key column
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Override the target key column of a join table
    #[must_use]
    pub fn other_key(mut self, column: impl Into<String>) -> Self {
        self.other_key = Some(column.into());
        self
    }

    /// Override the accessor name
    #[must_use]
    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.alias = Some(name.into());
        self
    }

    pub(crate) fn through_entity_name(&self) -> Option<&str> {
        match &self.through {
            Some(Through::Entity(name)) => Some(name),
            _ => None,
        }
    }
}

/// Physical storage backing an association
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationStorage {
    /// Key column `column` on `table`, referencing `references.id`
    ForeignKey {
        table: String,
        column: String,
        references: String,
        /// Whether the key sits on the owner's table (`BelongsTo`)
        on_owner: bool,
    },
    /// Pair table; `source_key` references the owner, `target_key` the target
    JoinTable {
        table: String,
        source_key: String,
        target_key: String,
        /// Set when the join table is a registered entity
        through_entity: Option<String>,
        /// Whether join rows carry `createdAt`/`updatedAt`
        timestamps: bool,
    },
}

/// A resolved association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    kind: AssociationKind,
    source: String,
    target: String,
    source_table: String,
    target_table: String,
    name: String,
    storage: AssociationStorage,
}

impl Association {
    pub(crate) fn resolve(
        kind: AssociationKind,
        source: &EntityDefinition,
        target: &EntityDefinition,
        through: Option<&EntityDefinition>,
        options: &AssociationOptions,
    ) -> Result<Self> {
        if kind != AssociationKind::BelongsToMany && options.through.is_some() {
            return Err(DatabaseError::unsupported_kind(
                kind.to_str(),
                "a join table can only be declared from the belongs side with belongsToMany",
            ));
        }
        if kind != AssociationKind::BelongsToMany && options.other_key.is_some() {
            return Err(DatabaseError::invalid_definition(format!(
                "{} does not use a join table; other_key is not applicable",
                kind
            )));
        }

        let storage = match kind {
            AssociationKind::BelongsTo => AssociationStorage::ForeignKey {
                table: source.table_name().to_string(),
                column: options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| target.foreign_key_name()),
                references: target.table_name().to_string(),
                on_owner: true,
            },
            AssociationKind::HasOne | AssociationKind::HasMany => AssociationStorage::ForeignKey {
                table: target.table_name().to_string(),
                column: options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| source.foreign_key_name()),
                references: source.table_name().to_string(),
                on_owner: false,
            },
            AssociationKind::BelongsToMany => {
                let source_key = options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| source.foreign_key_name());
                let target_key = options
                    .other_key
                    .clone()
                    .unwrap_or_else(|| target.foreign_key_name());
                if source_key == target_key {
                    return Err(DatabaseError::invalid_definition(format!(
                        "join keys of {} -> {} collide ('{}'); set foreign_key and other_key",
                        source.name(),
                        target.name(),
                        source_key
                    )));
                }
                match (&options.through, through) {
                    (Some(Through::Entity(_)), Some(entity)) => {
                        if entity.name() == source.name() || entity.name() == target.name() {
                            return Err(DatabaseError::invalid_definition(format!(
                                "entity '{}' cannot be its own join table",
                                entity.name()
                            )));
                        }
                        AssociationStorage::JoinTable {
                            table: entity.table_name().to_string(),
                            source_key,
                            target_key,
                            through_entity: Some(entity.name().to_string()),
                            timestamps: entity.timestamps(),
                        }
                    }
                    (Some(Through::Table(table)), _) => AssociationStorage::JoinTable {
                        table: table.clone(),
                        source_key,
                        target_key,
                        through_entity: None,
                        timestamps: true,
                    },
                    _ => AssociationStorage::JoinTable {
                        table: format!("{}_{}", source.name(), target.name()),
                        source_key,
                        target_key,
                        through_entity: None,
                        timestamps: true,
                    },
                }
            }
        };

        match &storage {
            AssociationStorage::ForeignKey { column, .. } => {
                validate_identifier("foreign key", column)?
            }
            AssociationStorage::JoinTable {
                table,
                source_key,
                target_key,
                ..
            } => {
                validate_identifier("join table", table)?;
                validate_identifier("foreign key", source_key)?;
                validate_identifier("foreign key", target_key)?;
            }
        }

        let name = match &options.alias {
            Some(alias) => alias.clone(),
            None => match kind.cardinality() {
                Cardinality::OneToOne => target.name().to_string(),
                Cardinality::OneToMany | Cardinality::ManyToMany => pluralize(target.name()),
            },
        };
        validate_identifier("association", &name)?;

        Ok(Self {
            kind,
            source: source.name().to_string(),
            target: target.name().to_string(),
            source_table: source.table_name().to_string(),
            target_table: target.table_name().to_string(),
            name,
            storage,
        })
    }

    /// Declared kind
    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    /// Cardinality seen from the source
    pub fn cardinality(&self) -> Cardinality {
        self.kind.cardinality()
    }

    /// Owning entity name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Target entity name
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Owning entity's table
    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Target entity's table
    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    /// Accessor name (e.g. `skills`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing storage
    pub fn storage(&self) -> &AssociationStorage {
        &self.storage
    }

    /// Join table name, for many-to-many associations
    pub fn join_table(&self) -> Option<&str> {
        match &self.storage {
            AssociationStorage::JoinTable { table, .. } => Some(table),
            AssociationStorage::ForeignKey { .. } => None,
        }
    }

    /// Key columns this association adds to an entity table
    pub(crate) fn columns_on(&self, table_name: &str) -> Vec<String> {
        match &self.storage {
            AssociationStorage::ForeignKey { table, column, .. } if table == table_name => {
                vec![column.clone()]
            }
            AssociationStorage::JoinTable {
                table,
                source_key,
                target_key,
                through_entity: Some(_),
                ..
            } if table == table_name => vec![source_key.clone(), target_key.clone()],
            _ => Vec::new(),
        }
    }
}
