//! Association accessors
//!
//! Every accessor is resolved by `(owner entity, association name)` and dispatched on where
//! the association stores its keys: a column on the owner, a column on the target, or a
//! join table.

use super::query::now_stamp;
use super::Orm;
use crate::backends::Transaction;
use crate::core::association::{Association, AssociationKind, AssociationStorage};
use crate::core::database::Executor;
use crate::core::error::{DatabaseError, Result};
use crate::core::query_builder::{
    DeleteBuilder, Filter, InsertBuilder, SelectBuilder, UpdateBuilder,
};
use crate::core::row::Row;
use crate::core::schema::{CREATED_AT, PRIMARY_KEY, UPDATED_AT};
use crate::core::value::Value;
use std::collections::BTreeSet;
use tracing::debug;

impl Orm {
    /// Relate `targets` to `owner`
    ///
    /// Returns the number of rows written. Adding a many-to-many pair that already exists
    /// writes nothing, so the call is idempotent.
    ///
    /// # Errors
    ///
    /// - `UnknownAssociation` if `owner` has no association called `name`
    /// - a validation `Storage` error for targets of another entity, or when a one-to-one
    ///   association is given anything but exactly one target
    /// - `ForeignKeyViolation` for targets that are not stored, when keys are enforced. With
    ///   enforcement off, an owner-side key is stored as given, while a key that lives on a
    ///   missing target row fails with `NotFound`. Either way nothing is written.
    /// - `NotFound` when a `BelongsTo` owner is no longer stored
    pub async fn add_related(
        &self,
        owner: &Row,
        name: &str,
        targets: &[Row],
        txn: Option<&Transaction>,
    ) -> Result<u64> {
        let association = self.registry.association(owner.entity(), name)?;
        let ids = target_ids(association, targets)?;

        let written = match (association.kind(), association.storage()) {
            (AssociationKind::BelongsTo, AssociationStorage::ForeignKey { column, .. }) => {
                let target = single_target(association, &ids)?;
                let written = self
                    .set_key(
                        self.executor(txn),
                        association.source(),
                        column,
                        Value::Integer(target),
                        Filter::new().eq(PRIMARY_KEY, owner.id()),
                    )
                    .await?;
                if written == 0 {
                    return Err(DatabaseError::NotFound {
                        entity: owner.entity().to_string(),
                        id: owner.id(),
                    });
                }
                written
            }
            (AssociationKind::HasOne, AssociationStorage::ForeignKey { column, .. }) => {
                let target = single_target(association, &ids)?;
                let scope = self.write_scope(txn).await?;
                let written = async {
                    self.set_key(
                        scope.executor(),
                        association.target(),
                        column,
                        Value::Null,
                        Filter::new()
                            .eq(column, owner.id())
                            .ne(PRIMARY_KEY, target),
                    )
                    .await?;
                    let written = self
                        .set_key(
                            scope.executor(),
                            association.target(),
                            column,
                            Value::Integer(owner.id()),
                            Filter::new().eq(PRIMARY_KEY, target),
                        )
                        .await?;
                    if written == 0 {
                        // Aborting the scope restores the previous holder's key
                        return Err(self.dangling(association, &[target]));
                    }
                    Ok(written)
                }
                .await;
                scope.finish(written).await?
            }
            (_, AssociationStorage::ForeignKey { column, .. }) => {
                if ids.is_empty() {
                    return Ok(0);
                }
                let scope = self.write_scope(txn).await?;
                let written = async {
                    let written = self
                        .set_key(
                            scope.executor(),
                            association.target(),
                            column,
                            Value::Integer(owner.id()),
                            Filter::new().in_list(PRIMARY_KEY, ids.iter().copied()),
                        )
                        .await?;
                    if written < ids.len() as u64 {
                        let missing = self
                            .missing_ids(scope.executor(), association.target(), &ids)
                            .await?;
                        return Err(self.dangling(association, &missing));
                    }
                    Ok(written)
                }
                .await;
                scope.finish(written).await?
            }
            (
                _,
                AssociationStorage::JoinTable {
                    table,
                    source_key,
                    target_key,
                    timestamps,
                    ..
                },
            ) => {
                if ids.is_empty() {
                    return Ok(0);
                }
                let scope = self.write_scope(txn).await?;
                let written = async {
                    let existing = SelectBuilder::new(table.as_str())
                        .columns(&[target_key.as_str()])
                        .filter(
                            &Filter::new()
                                .eq(source_key, owner.id())
                                .in_list(target_key, ids.iter().copied()),
                        );
                    let present = scope
                        .executor()
                        .query(&existing.build(), &existing.params())
                        .await?
                        .iter()
                        .filter_map(|row| row.get(target_key.as_str()).and_then(Value::as_i64))
                        .collect::<BTreeSet<_>>();

                    let missing = ids.iter().filter(|id| !present.contains(id)).copied();
                    let mut columns = vec![source_key.as_str(), target_key.as_str()];
                    if *timestamps {
                        columns.extend([CREATED_AT, UPDATED_AT]);
                    }
                    let stamp = now_stamp();
                    let mut insert = InsertBuilder::new(table.as_str()).columns(&columns);
                    let mut count = 0u64;
                    for id in missing {
                        let mut row = vec![Value::Integer(owner.id()), Value::Integer(id)];
                        if *timestamps {
                            row.extend([stamp.clone(), stamp.clone()]);
                        }
                        insert = insert.row(row);
                        count += 1;
                    }
                    if count > 0 {
                        scope
                            .executor()
                            .execute(&insert.build(), &insert.params())
                            .await?;
                    }
                    Ok::<_, DatabaseError>(count)
                }
                .await;
                scope.finish(written).await?
            }
        };

        debug!(
            entity = owner.entity(),
            id = owner.id(),
            association = name,
            written,
            "related rows added"
        );
        Ok(written)
    }

    /// Rows related to `owner` through `name`, matching `filter`, ordered by target id
    ///
    /// # Errors
    ///
    /// `NotFound` when a `BelongsTo` owner is no longer stored; validation errors for filter
    /// columns the target does not have.
    pub async fn get_related(
        &self,
        owner: &Row,
        name: &str,
        filter: Filter,
        txn: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let association = self.registry.association(owner.entity(), name)?;
        self.check_columns(association.target(), filter.columns())?;
        let executor = self.executor(txn);

        // The owner's key may have changed since the row was read
        let owner = match association.storage() {
            AssociationStorage::ForeignKey { on_owner: true, .. } => {
                self.find_by_id(owner.entity(), owner.id(), txn)
                    .await?
                    .ok_or_else(|| DatabaseError::NotFound {
                        entity: owner.entity().to_string(),
                        id: owner.id(),
                    })?
            }
            _ => owner.clone(),
        };
        self.load_related(executor, association, &owner, &filter).await
    }

    /// Unrelate `targets` from `owner`
    ///
    /// Foreign keys are cleared; join rows are deleted. Returns the number of rows changed.
    pub async fn remove_related(
        &self,
        owner: &Row,
        name: &str,
        targets: &[Row],
        txn: Option<&Transaction>,
    ) -> Result<u64> {
        let association = self.registry.association(owner.entity(), name)?;
        let ids = target_ids(association, targets)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let executor = self.executor(txn);

        let removed = match association.storage() {
            AssociationStorage::ForeignKey {
                column,
                on_owner: true,
                ..
            } => {
                self.set_key(
                    executor,
                    association.source(),
                    column,
                    Value::Null,
                    Filter::new()
                        .eq(PRIMARY_KEY, owner.id())
                        .in_list(column, ids),
                )
                .await?
            }
            AssociationStorage::ForeignKey { column, .. } => {
                self.set_key(
                    executor,
                    association.target(),
                    column,
                    Value::Null,
                    Filter::new()
                        .eq(column, owner.id())
                        .in_list(PRIMARY_KEY, ids),
                )
                .await?
            }
            AssociationStorage::JoinTable {
                table,
                source_key,
                target_key,
                ..
            } => {
                let delete = DeleteBuilder::new(table.as_str()).filter(
                    Filter::new()
                        .eq(source_key, owner.id())
                        .in_list(target_key, ids),
                );
                executor.execute(&delete.build(), &delete.params()).await?
            }
        };

        debug!(
            entity = owner.entity(),
            id = owner.id(),
            association = name,
            removed,
            "related rows removed"
        );
        Ok(removed)
    }

    /// Set a key column on the rows of `entity` matching `filter`, touching `updatedAt`
    async fn set_key(
        &self,
        executor: &dyn Executor,
        entity: &str,
        column: &str,
        value: Value,
        filter: Filter,
    ) -> Result<u64> {
        let definition = self.definition(entity)?;
        let mut update = UpdateBuilder::new(definition.table_name()).set(column, value);
        if definition.timestamps() {
            update = update.set(UPDATED_AT, now_stamp());
        }
        let update = update.filter(filter);
        executor.execute(&update.build(), &update.params()).await
    }

    /// Ids among `ids` with no stored `entity` row
    async fn missing_ids(
        &self,
        executor: &dyn Executor,
        entity: &str,
        ids: &[i64],
    ) -> Result<Vec<i64>> {
        let select = SelectBuilder::new(self.definition(entity)?.table_name())
            .columns(&[PRIMARY_KEY])
            .filter(&Filter::new().in_list(PRIMARY_KEY, ids.iter().copied()));
        let present = executor
            .query(&select.build(), &select.params())
            .await?
            .iter()
            .filter_map(|row| row.get(PRIMARY_KEY).and_then(Value::as_i64))
            .collect::<BTreeSet<_>>();
        Ok(ids.iter().filter(|id| !present.contains(id)).copied().collect())
    }

    /// Error for targets whose key cannot be written because the row is gone
    fn dangling(&self, association: &Association, missing: &[i64]) -> DatabaseError {
        let first = missing.first().copied().unwrap_or_default();
        if self.engine.config().enforce_foreign_keys {
            DatabaseError::ForeignKeyViolation(format!(
                "association '{}' of '{}' references missing '{}' rows {:?}",
                association.name(),
                association.source(),
                association.target(),
                missing
            ))
        } else {
            DatabaseError::NotFound {
                entity: association.target().to_string(),
                id: first,
            }
        }
    }
}

/// Distinct target ids, after checking every target belongs to the association's entity
fn target_ids(association: &Association, targets: &[Row]) -> Result<Vec<i64>> {
    let mut ids = BTreeSet::new();
    for target in targets {
        if target.entity() != association.target() {
            return Err(DatabaseError::validation(format!(
                "association '{}' of '{}' relates '{}' rows, got a '{}' row",
                association.name(),
                association.source(),
                association.target(),
                target.entity()
            )));
        }
        ids.insert(target.id());
    }
    Ok(ids.into_iter().collect())
}

fn single_target(association: &Association, ids: &[i64]) -> Result<i64> {
    match ids {
        [id] => Ok(*id),
        _ => Err(DatabaseError::validation(format!(
            "association '{}' of '{}' is one-to-one and takes exactly one target, got {}",
            association.name(),
            association.source(),
            ids.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::association::AssociationOptions;
    use crate::core::schema::{FieldDef, SchemaRegistry};
    use std::collections::BTreeMap;

    fn row(entity: &str, id: i64) -> Row {
        let mut raw = BTreeMap::new();
        raw.insert(PRIMARY_KEY.to_string(), Value::Integer(id));
        let mut registry = SchemaRegistry::new();
        let definition = registry.define(entity, Vec::new()).unwrap();
        Row::from_raw(&definition, raw).unwrap()
    }

    fn skills() -> Association {
        let mut registry = SchemaRegistry::new();
        registry.define("player", vec![FieldDef::string("name")]).unwrap();
        registry.define("skill", vec![FieldDef::string("name")]).unwrap();
        registry
            .associate(
                AssociationKind::BelongsToMany,
                "player",
                "skill",
                AssociationOptions::through_table("player_skill"),
            )
            .unwrap()
    }

    #[test]
    fn test_target_ids_dedupes() {
        let targets = vec![row("skill", 3), row("skill", 1), row("skill", 3)];
        assert_eq!(target_ids(&skills(), &targets).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_target_ids_rejects_other_entities() {
        let err = target_ids(&skills(), &[row("player", 1)]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_single_target() {
        let association = skills();
        assert_eq!(single_target(&association, &[7]).unwrap(), 7);
        assert!(single_target(&association, &[]).unwrap_err().is_validation());
        assert!(single_target(&association, &[1, 2]).unwrap_err().is_validation());
    }
}
