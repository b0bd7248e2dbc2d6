//! Schema synchronization
//!
//! The registry is first laid out as a [`SchemaPlan`]: one table per entity carrying every
//! foreign key that lives on it, plus one table per distinct join table. The plan is then
//! applied either destructively ([`SyncMode::Recreate`]) or additively
//! ([`SyncMode::Migrate`]). Callers run [`synchronize`] inside a transaction so a failure
//! leaves the previous schema in place.
//!
//! Conflicts are detected while planning, before any statement is issued.

use super::association::AssociationStorage;
use super::database::Executor;
use super::error::{DatabaseError, Result};
use super::schema::{quote_ident, SchemaRegistry, CREATED_AT, PRIMARY_KEY, UPDATED_AT};
use super::value::Value;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// How `sync` reconciles the registry with the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Drop every planned table and create it again; all rows are lost
    #[default]
    Recreate,
    /// Create missing tables and add missing columns; never drops data
    Migrate,
}

/// What a sync run changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tables created
    pub created: Vec<String>,
    /// Tables dropped
    pub dropped: Vec<String>,
    /// Columns added, as `table.column`
    pub altered: Vec<String>,
}

/// Whether a planned table stores an entity or only key pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Entity table with an autoincrement primary key
    Entity,
    /// Pair table with a composite primary key
    Join,
}

/// Foreign-key target of a planned column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Referenced table
    pub table: String,
    /// `ON DELETE` action
    pub on_delete: &'static str,
}

/// A planned column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    /// Column name
    pub name: String,
    /// SQL type
    pub sql_type: &'static str,
    /// `NOT NULL`
    pub not_null: bool,
    /// `UNIQUE`
    pub unique: bool,
    /// `INTEGER PRIMARY KEY AUTOINCREMENT`
    pub primary_key: bool,
    /// Foreign-key target, if any
    pub references: Option<Reference>,
}

impl ColumnPlan {
    fn plain(name: &str, sql_type: &'static str, not_null: bool) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            not_null,
            unique: false,
            primary_key: false,
            references: None,
        }
    }

    fn key(name: &str, table: &str, not_null: bool, on_delete: &'static str) -> Self {
        Self {
            references: Some(Reference {
                table: table.to_string(),
                on_delete,
            }),
            ..Self::plain(name, "INTEGER", not_null)
        }
    }

    /// Column definition as used in `CREATE TABLE`
    pub fn definition(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if self.not_null && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(reference) = &self.references {
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {} ON UPDATE CASCADE",
                quote_ident(&reference.table),
                quote_ident(PRIMARY_KEY),
                reference.on_delete
            ));
        }
        sql
    }

    /// Column definition accepted by `ALTER TABLE ... ADD COLUMN`
    fn added_definition(&self) -> String {
        ColumnPlan {
            not_null: false,
            unique: false,
            ..self.clone()
        }
        .definition()
    }
}

/// A planned table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Table name
    pub name: String,
    /// Entity or join table
    pub kind: TableKind,
    /// Columns in creation order
    pub columns: Vec<ColumnPlan>,
    /// Composite primary key (join tables only)
    pub primary_key: Vec<String>,
    /// Key pairs that must be unique together
    pub unique_pairs: Vec<(String, String)>,
}

impl TablePlan {
    fn new(name: &str, kind: TableKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique_pairs: Vec::new(),
        }
    }

    /// Look up a planned column
    pub fn column(&self, name: &str) -> Option<&ColumnPlan> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Tables this one references, excluding itself
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|r| r.table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }

    /// `CREATE TABLE` statement
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnPlan::definition).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                self.primary_key
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        format!("CREATE TABLE {} ({})", quote_ident(&self.name), parts.join(", "))
    }

    /// `CREATE UNIQUE INDEX` statements for the unique key pairs
    pub fn index_sql(&self) -> Vec<String> {
        self.unique_pairs
            .iter()
            .map(|(a, b)| {
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                    quote_ident(&format!("{}_{}_{}_unique", self.name, a, b)),
                    quote_ident(&self.name),
                    quote_ident(a),
                    quote_ident(b)
                )
            })
            .collect()
    }

    /// `DROP TABLE` statement
    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }

    fn add_key(&mut self, column: ColumnPlan) -> Result<()> {
        let target = column
            .references
            .as_ref()
            .map(|r| r.table.as_str())
            .unwrap_or_default();
        match self.column(&column.name) {
            None => {
                self.columns.push(column);
                Ok(())
            }
            Some(existing) => match &existing.references {
                Some(reference) if reference.table == target => Ok(()),
                Some(reference) => Err(DatabaseError::schema_conflict(format!(
                    "column {}.{} is claimed by references to both '{}' and '{}'",
                    self.name, column.name, reference.table, target
                ))),
                None => Err(DatabaseError::schema_conflict(format!(
                    "foreign key {}.{} collides with a declared column",
                    self.name, column.name
                ))),
            },
        }
    }

    fn add_unique_pair(&mut self, a: &str, b: &str) {
        let present = self
            .unique_pairs
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a));
        if !present {
            self.unique_pairs.push((a.to_string(), b.to_string()));
        }
    }
}

/// Physical layout derived from a registry, in creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPlan {
    tables: Vec<TablePlan>,
}

impl SchemaPlan {
    /// Lay out the registry's tables
    ///
    /// # Errors
    ///
    /// `SchemaConflict` when the declarations cannot share one physical schema.
    pub fn build(registry: &SchemaRegistry) -> Result<Self> {
        let mut tables: Vec<TablePlan> = Vec::new();

        for entity in registry.entities() {
            check_table_name(entity.table_name())?;
            if tables.iter().any(|t| t.name == entity.table_name()) {
                return Err(DatabaseError::schema_conflict(format!(
                    "two entities map to table '{}'",
                    entity.table_name()
                )));
            }
            let mut table = TablePlan::new(entity.table_name(), TableKind::Entity);
            table.columns.push(ColumnPlan {
                primary_key: true,
                ..ColumnPlan::plain(PRIMARY_KEY, "INTEGER", true)
            });
            for field in entity.fields() {
                table.columns.push(ColumnPlan {
                    unique: field.is_unique(),
                    ..ColumnPlan::plain(
                        field.name(),
                        field.field_type().sql_type(),
                        !field.allow_null(),
                    )
                });
            }
            if entity.timestamps() {
                table.columns.push(ColumnPlan::plain(CREATED_AT, "DATETIME", true));
                table.columns.push(ColumnPlan::plain(UPDATED_AT, "DATETIME", true));
            }
            tables.push(table);
        }
        let entity_tables = tables.len();

        for association in registry.associations() {
            match association.storage() {
                AssociationStorage::ForeignKey {
                    table,
                    column,
                    references,
                    ..
                } => {
                    let plan = find_table(&mut tables[..entity_tables], table)?;
                    plan.add_key(ColumnPlan::key(column, references, false, "SET NULL"))?;
                }
                AssociationStorage::JoinTable {
                    table,
                    source_key,
                    target_key,
                    through_entity,
                    timestamps,
                } => {
                    let source = ColumnPlan::key(
                        source_key,
                        association.source_table(),
                        true,
                        "CASCADE",
                    );
                    let target = ColumnPlan::key(
                        target_key,
                        association.target_table(),
                        true,
                        "CASCADE",
                    );

                    if through_entity.is_some() {
                        let plan = find_table(&mut tables[..entity_tables], table)?;
                        plan.add_key(ColumnPlan { not_null: false, ..source })?;
                        plan.add_key(ColumnPlan { not_null: false, ..target })?;
                        plan.add_unique_pair(source_key, target_key);
                        continue;
                    }

                    check_table_name(table)?;
                    if let Some(existing) = tables.iter().position(|t| t.name == *table) {
                        if existing < entity_tables {
                            return Err(DatabaseError::schema_conflict(format!(
                                "join table '{}' collides with an entity table",
                                table
                            )));
                        }
                        let plan = &tables[existing];
                        let same_keys = plan.column(source_key).map(|c| &c.references)
                            == Some(&source.references)
                            && plan.column(target_key).map(|c| &c.references)
                                == Some(&target.references);
                        if !same_keys {
                            return Err(DatabaseError::schema_conflict(format!(
                                "join table '{}' is declared twice with different keys",
                                table
                            )));
                        }
                        continue;
                    }

                    let mut plan = TablePlan::new(table, TableKind::Join);
                    if *timestamps {
                        plan.columns.push(ColumnPlan::plain(CREATED_AT, "DATETIME", true));
                        plan.columns.push(ColumnPlan::plain(UPDATED_AT, "DATETIME", true));
                    }
                    plan.primary_key = vec![source_key.clone(), target_key.clone()];
                    plan.columns.push(source);
                    plan.columns.push(target);
                    tables.push(plan);
                }
            }
        }

        Ok(Self {
            tables: dependency_order(tables),
        })
    }

    /// Tables in creation order
    pub fn tables(&self) -> &[TablePlan] {
        &self.tables
    }

    /// Look up a planned table
    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.name == name)
    }
}

fn check_table_name(name: &str) -> Result<()> {
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(DatabaseError::schema_conflict(format!(
            "table name '{}' is reserved by SQLite",
            name
        )));
    }
    Ok(())
}

fn find_table<'a>(tables: &'a mut [TablePlan], name: &str) -> Result<&'a mut TablePlan> {
    tables
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or_else(|| DatabaseError::schema_conflict(format!("no entity owns table '{}'", name)))
}

/// Order tables so that referenced tables come first; ties keep declaration order
fn dependency_order(mut pending: Vec<TablePlan>) -> Vec<TablePlan> {
    let mut ordered: Vec<TablePlan> = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending.iter().position(|table| {
            table.dependencies().iter().all(|dep| {
                ordered.iter().any(|t| t.name == *dep) || !pending.iter().any(|t| t.name == *dep)
            })
        });
        // A reference cycle; SQLite accepts forward references, so take the next one
        let index = ready.unwrap_or(0);
        if ready.is_none() {
            debug!(table = %pending[index].name, "reference cycle, creating table early");
        }
        ordered.push(pending.remove(index));
    }
    ordered
}

async fn existing_tables(executor: &dyn Executor) -> Result<HashSet<String>> {
    let rows = executor
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            &[],
        )
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
        .collect())
}

async fn existing_columns(executor: &dyn Executor, table: &str) -> Result<HashSet<String>> {
    let rows = executor
        .query(&format!("PRAGMA table_info({})", quote_ident(table)), &[])
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
        .collect())
}

async fn create_table(executor: &dyn Executor, table: &TablePlan) -> Result<()> {
    executor.execute(&table.create_sql(), &[]).await?;
    for index in table.index_sql() {
        executor.execute(&index, &[]).await?;
    }
    Ok(())
}

/// Reconcile the database with the registry
pub async fn synchronize(
    executor: &dyn Executor,
    registry: &SchemaRegistry,
    mode: SyncMode,
) -> Result<SyncReport> {
    let plan = SchemaPlan::build(registry)?;
    let existing = existing_tables(executor).await?;
    let mut report = SyncReport::default();

    match mode {
        SyncMode::Recreate => {
            for table in plan.tables().iter().rev() {
                if existing.contains(&table.name) {
                    executor.execute(&table.drop_sql(), &[]).await?;
                    debug!(table = %table.name, "dropped table");
                    report.dropped.push(table.name.clone());
                }
            }
            for table in plan.tables() {
                create_table(executor, table).await?;
                debug!(table = %table.name, "created table");
                report.created.push(table.name.clone());
            }
        }
        SyncMode::Migrate => {
            for table in plan.tables() {
                if !existing.contains(&table.name) {
                    create_table(executor, table).await?;
                    debug!(table = %table.name, "created table");
                    report.created.push(table.name.clone());
                    continue;
                }

                let columns = existing_columns(executor, &table.name).await?;
                for column in &table.columns {
                    if columns.contains(&column.name) {
                        continue;
                    }
                    if column.primary_key || table.primary_key.contains(&column.name) {
                        return Err(DatabaseError::schema_conflict(format!(
                            "existing table '{}' lacks key column '{}'",
                            table.name, column.name
                        )));
                    }
                    executor
                        .execute(
                            &format!(
                                "ALTER TABLE {} ADD COLUMN {}",
                                quote_ident(&table.name),
                                column.added_definition()
                            ),
                            &[],
                        )
                        .await?;
                    debug!(table = %table.name, column = %column.name, "added column");
                    report.altered.push(format!("{}.{}", table.name, column.name));
                }
                for index in table.index_sql() {
                    executor.execute(&index, &[]).await?;
                }
            }
        }
    }

    info!(
        ?mode,
        created = report.created.len(),
        dropped = report.dropped.len(),
        altered = report.altered.len(),
        "schema synchronized"
    );
    Ok(report)
}
