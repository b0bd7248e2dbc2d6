//! Structured and raw queries

use super::Orm;
use crate::backends::Transaction;
use crate::core::association::{Association, AssociationStorage};
use crate::core::database::{Executor, QueryMetadata};
use crate::core::error::{DatabaseError, Result};
use crate::core::query_builder::{
    qualify, DeleteBuilder, Filter, InsertBuilder, JoinType, OrderDirection, SelectBuilder,
    UpdateBuilder,
};
use crate::core::row::Row;
use crate::core::schema::{EntityDefinition, FieldType, CREATED_AT, PRIMARY_KEY, UPDATED_AT};
use crate::core::value::{DatabaseResult, Value, Values};
use tracing::debug;

const PARENT: &str = "t0";
const RELATED: &str = "r";
const JOIN: &str = "j";

/// Ids per read-back query, well under SQLite's bound-variable limit
const READ_BACK_CHUNK: usize = 500;

/// Eager-loading request for one association
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    /// Association name on the queried entity
    pub association: String,
    /// Condition on the related rows
    pub filter: Filter,
    /// Only return parents with at least one matching related row
    pub required: bool,
}

impl Include {
    /// Include every related row; parents without any are kept
    pub fn new(association: impl Into<String>) -> Self {
        Self {
            association: association.into(),
            filter: Filter::new(),
            required: false,
        }
    }

    /// Restrict the related rows; makes the include required
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.required = !filter.is_empty() || self.required;
        self.filter = filter;
        self
    }

    /// Override whether parents need a matching related row
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// Options for `find_all`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Condition on the queried entity
    pub filter: Filter,
    /// Associations to load eagerly
    pub includes: Vec<Include>,
    /// Ordering; by primary key when empty
    pub order: Vec<(String, OrderDirection)>,
    /// Maximum number of rows
    pub limit: Option<usize>,
    /// Rows to skip
    pub offset: Option<usize>,
}

impl FindOptions {
    /// No filter, no includes
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the queried entity
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Eagerly load an association
    #[must_use]
    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    /// Add an ordering column
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    /// Limit the number of rows
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

pub(crate) fn now_stamp() -> Value {
    Value::Text(
        chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S%.3f %:z")
            .to_string(),
    )
}

/// Link between a related row (alias `r` or `t0`) and its owner, for joins and subqueries
fn owner_link(
    association: &Association,
    related: &str,
    owner_column: &str,
) -> (Option<(String, String)>, String) {
    match association.storage() {
        AssociationStorage::ForeignKey {
            column,
            on_owner: false,
            ..
        } => (None, format!("{} = {}", qualify(Some(related), column), owner_column)),
        AssociationStorage::ForeignKey {
            on_owner: true, ..
        } => (
            None,
            format!("{} = {}", qualify(Some(related), PRIMARY_KEY), owner_column),
        ),
        AssociationStorage::JoinTable {
            table,
            source_key,
            target_key,
            ..
        } => (
            Some((
                table.clone(),
                format!(
                    "{} = {}",
                    qualify(Some(JOIN), target_key),
                    qualify(Some(related), PRIMARY_KEY)
                ),
            )),
            format!("{} = {}", qualify(Some(JOIN), source_key), owner_column),
        ),
    }
}

impl Orm {
    /// Check, coerce and complete the values of a new row
    fn prepare_insert(
        &self,
        definition: &EntityDefinition,
        mut values: Values,
        stamp: &Value,
    ) -> Result<Vec<(String, Value)>> {
        self.check_columns(definition.name(), values.keys().map(String::as_str))?;

        let mut prepared = Vec::new();
        if let Some(id) = values.remove(PRIMARY_KEY) {
            prepared.push((
                PRIMARY_KEY.to_string(),
                FieldType::Integer.coerce(PRIMARY_KEY, id)?,
            ));
        }
        for field in definition.fields() {
            let value = match values.remove(field.name()) {
                Some(value) => value,
                None => field.default().cloned().unwrap_or(Value::Null),
            };
            let value = field.field_type().coerce(field.name(), value)?;
            if value.is_null() && !field.allow_null() {
                return Err(DatabaseError::validation(format!(
                    "{}.{} cannot be null",
                    definition.name(),
                    field.name()
                )));
            }
            prepared.push((field.name().to_string(), value));
        }
        if definition.timestamps() {
            for column in [CREATED_AT, UPDATED_AT] {
                let value = values.remove(column).unwrap_or_else(|| stamp.clone());
                prepared.push((column.to_string(), value));
            }
        }
        // Whatever is left is a foreign key
        for (column, value) in values {
            let value = FieldType::Integer.coerce(&column, value)?;
            prepared.push((column, value));
        }
        Ok(prepared)
    }

    async fn insert_prepared(
        &self,
        executor: &dyn Executor,
        definition: &EntityDefinition,
        prepared: Vec<(String, Value)>,
    ) -> Result<i64> {
        let mut builder = InsertBuilder::new(definition.table_name());
        for (column, value) in prepared {
            builder = builder.value(&column, value);
        }
        executor.insert(&builder.build(), &builder.params()).await
    }

    async fn reload(
        &self,
        executor: &dyn Executor,
        definition: &EntityDefinition,
        id: i64,
    ) -> Result<Row> {
        let builder =
            SelectBuilder::new(definition.table_name()).filter(&Filter::new().eq(PRIMARY_KEY, id));
        let raw = executor
            .query(&builder.build(), &builder.params())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::NotFound {
                entity: definition.name().to_string(),
                id,
            })?;
        Row::from_raw(definition, raw)
    }

    /// Insert one row and return it as stored
    ///
    /// # Errors
    ///
    /// A validation `Storage` error for unknown columns, type mismatches, or a missing value
    /// of a non-null field; constraint errors from the engine.
    pub async fn create(
        &self,
        entity: &str,
        values: Values,
        txn: Option<&Transaction>,
    ) -> Result<Row> {
        let definition = self.definition(entity)?;
        let prepared = self.prepare_insert(definition, values, &now_stamp())?;
        let executor = self.executor(txn);
        let id = self.insert_prepared(executor, definition, prepared).await?;
        debug!(entity, id, "row created");
        self.reload(executor, definition, id).await
    }

    /// Insert several rows atomically
    ///
    /// Every row is validated before anything is written. The rows are written and read back
    /// inside one transaction, or a savepoint of `txn`; any failure leaves none of them
    /// persisted.
    pub async fn bulk_create(
        &self,
        entity: &str,
        rows: Vec<Values>,
        txn: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let definition = self.definition(entity)?;
        let stamp = now_stamp();
        let prepared = rows
            .into_iter()
            .map(|values| self.prepare_insert(definition, values, &stamp))
            .collect::<Result<Vec<_>>>()?;
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let scope = self.write_scope(txn).await?;
        let created = async {
            let mut ids = Vec::with_capacity(prepared.len());
            for row in prepared {
                ids.push(self.insert_prepared(scope.executor(), definition, row).await?);
            }
            let mut created = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(READ_BACK_CHUNK) {
                let builder = SelectBuilder::new(definition.table_name())
                    .filter(&Filter::new().in_list(PRIMARY_KEY, chunk.iter().copied()))
                    .order_by(PRIMARY_KEY, OrderDirection::Asc);
                for raw in scope
                    .executor()
                    .query(&builder.build(), &builder.params())
                    .await?
                {
                    created.push(Row::from_raw(definition, raw)?);
                }
            }
            Ok::<_, DatabaseError>(created)
        }
        .await;
        let created = scope.finish(created).await?;
        debug!(entity, count = created.len(), "rows created");
        Ok(created)
    }

    /// First row matching `filter`, by primary key; `None` when nothing matches
    pub async fn find_one(
        &self,
        entity: &str,
        filter: Filter,
        txn: Option<&Transaction>,
    ) -> Result<Option<Row>> {
        let rows = self
            .find_all(entity, FindOptions::new().filter(filter).limit(1), txn)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Row with the given primary key; `None` when absent
    pub async fn find_by_id(
        &self,
        entity: &str,
        id: i64,
        txn: Option<&Transaction>,
    ) -> Result<Option<Row>> {
        self.find_one(entity, Filter::new().eq(PRIMARY_KEY, id), txn)
            .await
    }

    /// Rows matching the options, with included associations loaded
    ///
    /// A required include keeps only parents that have at least one related row matching
    /// the include's filter; the check runs in SQL as an `EXISTS` subquery.
    pub async fn find_all(
        &self,
        entity: &str,
        options: FindOptions,
        txn: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let definition = self.definition(entity)?;
        self.check_columns(entity, options.filter.columns())?;
        self.check_columns(entity, options.order.iter().map(|(c, _)| c.as_str()))?;

        let mut builder = SelectBuilder::new(definition.table_name())
            .alias(PARENT)
            .filter(&options.filter);

        let mut associations = Vec::with_capacity(options.includes.len());
        for include in &options.includes {
            let association = self.registry.association(entity, &include.association)?;
            self.check_columns(association.target(), include.filter.columns())?;
            if include.required {
                let (sql, params) = exists_related(
                    association,
                    &include.filter,
                    &qualify(Some(PARENT), PRIMARY_KEY),
                    PARENT,
                );
                builder = builder.where_raw(sql, params);
            }
            associations.push(association);
        }

        if options.order.is_empty() {
            builder = builder.order_by(PRIMARY_KEY, OrderDirection::Asc);
        }
        for (column, direction) in &options.order {
            builder = builder.order_by(column, *direction);
        }
        if let Some(limit) = options.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = options.offset {
            builder = builder.offset(offset);
        }

        let executor = self.executor(txn);
        let mut rows = executor
            .query(&builder.build(), &builder.params())
            .await?
            .into_iter()
            .map(|raw| Row::from_raw(definition, raw))
            .collect::<Result<Vec<_>>>()?;

        for (include, association) in options.includes.iter().zip(associations) {
            for row in &mut rows {
                let related = self
                    .load_related(executor, association, row, &include.filter)
                    .await?;
                row.include(association.name(), related);
            }
        }
        Ok(rows)
    }

    /// Number of rows matching `filter`
    pub async fn count(
        &self,
        entity: &str,
        filter: Filter,
        txn: Option<&Transaction>,
    ) -> Result<u64> {
        let definition = self.definition(entity)?;
        self.check_columns(entity, filter.columns())?;
        let builder = SelectBuilder::new(definition.table_name())
            .expression("COUNT(*) AS \"count\"")
            .filter(&filter);
        let rows = self
            .executor(txn)
            .query(&builder.build(), &builder.params())
            .await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count as u64)
    }

    /// Update one row by primary key and return it as stored
    ///
    /// # Errors
    ///
    /// `NotFound` when no row has the id; validation errors as for `create`.
    pub async fn update(
        &self,
        entity: &str,
        id: i64,
        mut values: Values,
        txn: Option<&Transaction>,
    ) -> Result<Row> {
        let definition = self.definition(entity)?;
        self.check_columns(entity, values.keys().map(String::as_str))?;
        if values.contains_key(PRIMARY_KEY) {
            return Err(DatabaseError::validation(format!(
                "the primary key of '{}' cannot be updated",
                entity
            )));
        }

        let mut builder = UpdateBuilder::new(definition.table_name());
        let mut assignments = 0;
        for field in definition.fields() {
            if let Some(value) = values.remove(field.name()) {
                let value = field.field_type().coerce(field.name(), value)?;
                if value.is_null() && !field.allow_null() {
                    return Err(DatabaseError::validation(format!(
                        "{}.{} cannot be null",
                        entity,
                        field.name()
                    )));
                }
                builder = builder.set(field.name(), value);
                assignments += 1;
            }
        }
        if definition.timestamps() && !values.contains_key(UPDATED_AT) {
            values.insert(UPDATED_AT.to_string(), now_stamp());
        }
        for (column, value) in values {
            let value = if column == CREATED_AT || column == UPDATED_AT {
                value
            } else {
                FieldType::Integer.coerce(&column, value)?
            };
            builder = builder.set(&column, value);
            assignments += 1;
        }

        let executor = self.executor(txn);
        if assignments > 0 {
            let builder = builder.filter(Filter::new().eq(PRIMARY_KEY, id));
            let affected = executor.execute(&builder.build(), &builder.params()).await?;
            if affected == 0 {
                return Err(DatabaseError::NotFound {
                    entity: entity.to_string(),
                    id,
                });
            }
        }
        self.reload(executor, definition, id).await
    }

    /// Delete rows matching `filter`; an empty filter deletes every row
    pub async fn destroy(
        &self,
        entity: &str,
        filter: Filter,
        txn: Option<&Transaction>,
    ) -> Result<u64> {
        let definition = self.definition(entity)?;
        self.check_columns(entity, filter.columns())?;
        let builder = DeleteBuilder::new(definition.table_name()).filter(filter);
        let affected = self
            .executor(txn)
            .execute(&builder.build(), &builder.params())
            .await?;
        debug!(entity, affected, "rows destroyed");
        Ok(affected)
    }

    /// Run raw SQL and return its rows with metadata
    ///
    /// # Security Warning
    ///
    /// `sql` is executed as is. Never format untrusted input into it; use
    /// [`Orm::raw_query_with_params`] instead.
    pub async fn raw_query(
        &self,
        sql: &str,
        txn: Option<&Transaction>,
    ) -> Result<(DatabaseResult, QueryMetadata)> {
        self.executor(txn).run(sql, &[]).await
    }

    /// Run raw SQL with bound parameters
    pub async fn raw_query_with_params(
        &self,
        sql: &str,
        params: &[Value],
        txn: Option<&Transaction>,
    ) -> Result<(DatabaseResult, QueryMetadata)> {
        self.executor(txn).run(sql, params).await
    }

    /// Rows of `association` related to `owner`, filtered, by target primary key
    pub(crate) async fn load_related(
        &self,
        executor: &dyn Executor,
        association: &Association,
        owner: &Row,
        filter: &Filter,
    ) -> Result<Vec<Row>> {
        let target = self.definition(association.target())?;
        let owner_key = match association.storage() {
            AssociationStorage::ForeignKey {
                column,
                on_owner: true,
                ..
            } => owner.get(column).cloned().unwrap_or(Value::Null),
            _ => Value::Integer(owner.id()),
        };
        if owner_key.is_null() {
            return Ok(Vec::new());
        }

        let (join, link) = owner_link(association, PARENT, "?");
        let mut builder = SelectBuilder::new(target.table_name()).alias(PARENT);
        if let Some((table, on)) = join {
            builder = builder.join(JoinType::Inner, &table, JOIN, &on);
        }
        let builder = builder
            .where_raw(link, vec![owner_key])
            .filter(filter)
            .order_by(PRIMARY_KEY, OrderDirection::Asc);

        executor
            .query(&builder.build(), &builder.params())
            .await?
            .into_iter()
            .map(|raw| Row::from_raw(target, raw))
            .collect()
    }
}

/// `EXISTS` subquery matching parents (alias `parent`) with a related row passing `filter`
fn exists_related(
    association: &Association,
    filter: &Filter,
    parent_id: &str,
    parent: &str,
) -> (String, Vec<Value>) {
    let owner_column = match association.storage() {
        AssociationStorage::ForeignKey {
            column,
            on_owner: true,
            ..
        } => qualify(Some(parent), column),
        _ => parent_id.to_string(),
    };
    let (join, link) = owner_link(association, RELATED, &owner_column);
    let mut builder = SelectBuilder::new(association.target_table())
        .alias(RELATED)
        .expression("1");
    if let Some((table, on)) = join {
        builder = builder.join(JoinType::Inner, &table, JOIN, &on);
    }
    let builder = builder.where_raw(link, Vec::new()).filter(filter);
    (format!("EXISTS ({})", builder.build()), builder.params())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::association::{AssociationKind, AssociationOptions};
    use crate::core::schema::{FieldDef, SchemaRegistry};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        for name in ["team", "player", "skill"] {
            registry.define(name, vec![FieldDef::string("name")]).unwrap();
        }
        registry
            .associate(AssociationKind::BelongsTo, "player", "team", AssociationOptions::default())
            .unwrap();
        registry
            .associate(AssociationKind::HasMany, "team", "player", AssociationOptions::default())
            .unwrap();
        registry
            .associate(
                AssociationKind::BelongsToMany,
                "player",
                "skill",
                AssociationOptions::through_table("player_skill"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_exists_through_join_table() {
        let registry = registry();
        let skills = registry.association("player", "skills").unwrap();
        let (sql, params) = exists_related(
            skills,
            &Filter::new().eq("name", "run"),
            "\"t0\".\"id\"",
            PARENT,
        );
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"skills\" AS \"r\" INNER JOIN \"player_skill\" AS \"j\" \
             ON \"j\".\"skillId\" = \"r\".\"id\" WHERE \"j\".\"playerId\" = \"t0\".\"id\" \
             AND \"r\".\"name\" = ?)"
        );
        assert_eq!(params, vec![Value::from("run")]);
    }

    #[test]
    fn test_exists_foreign_keys() {
        let registry = registry();
        let players = registry.association("team", "players").unwrap();
        let (sql, _) = exists_related(players, &Filter::new(), "\"t0\".\"id\"", PARENT);
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"players\" AS \"r\" WHERE \"r\".\"teamId\" = \"t0\".\"id\")"
        );

        let team = registry.association("player", "team").unwrap();
        let (sql, _) = exists_related(team, &Filter::new(), "\"t0\".\"id\"", PARENT);
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"teams\" AS \"r\" WHERE \"r\".\"id\" = \"t0\".\"teamId\")"
        );
    }

    #[test]
    fn test_include_filter_makes_required() {
        let include = Include::new("skills").filter(Filter::new().eq("name", "run"));
        assert!(include.required);
        let include = Include::new("skills");
        assert!(!include.required);
        let include = include.filter(Filter::new().eq("name", "run")).required(false);
        assert!(!include.required);
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = now_stamp();
        let text = stamp.as_str().unwrap();
        // 2024-01-01 00:00:00.000 +00:00
        assert_eq!(text.len(), 30);
        assert!(text.ends_with("+00:00"));
    }
}
