//! Integration tests for the mapping layer
//!
//! These tests run the sports league schema against file databases in temporary
//! directories and cover:
//! - Schema synchronization
//! - Structured and raw queries
//! - Association accessors
//! - Transaction isolation and rollback

use rust_orm_system::prelude::*;
use tempfile::TempDir;

fn league() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .define(
            "user",
            vec![FieldDef::string("firstName"), FieldDef::string("lastName")],
        )
        .expect("Failed to define user");
    for entity in ["team", "player", "coach", "fan", "skill"] {
        registry
            .define(entity, vec![FieldDef::string("name")])
            .expect("Failed to define entity");
    }

    let associations = [
        (AssociationKind::HasOne, "coach", "team"),
        (AssociationKind::BelongsTo, "player", "team"),
        (AssociationKind::HasMany, "team", "player"),
        (AssociationKind::HasMany, "team", "fan"),
    ];
    for (kind, source, target) in associations {
        registry
            .associate(kind, source, target, AssociationOptions::default())
            .expect("Failed to associate");
    }
    registry
        .associate(
            AssociationKind::BelongsToMany,
            "player",
            "skill",
            AssociationOptions::through_table("player_skill"),
        )
        .expect("Failed to associate skills");
    registry
}

async fn connect(dir: &TempDir, registry: SchemaRegistry) -> Orm {
    let path = dir.path().join("database.sqlite");
    Orm::connect(EngineConfig::sqlite(path.to_string_lossy()), registry)
        .await
        .expect("Failed to connect")
}

async fn fresh_league() -> (TempDir, Orm) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let orm = connect(&dir, league()).await;
    orm.sync(SyncMode::Recreate).await.expect("Failed to sync");
    (dir, orm)
}

fn named(names: &[&str]) -> Vec<Values> {
    names.iter().map(|name| values! { "name" => *name }).collect()
}

async fn seed(orm: &Orm) -> (Vec<Row>, Vec<Row>, Vec<Row>) {
    let players = orm
        .bulk_create("player", named(&["john", "bob", "ken"]), None)
        .await
        .expect("Failed to seed players");
    let skills = orm
        .bulk_create("skill", named(&["run", "work", "talk"]), None)
        .await
        .expect("Failed to seed skills");
    let teams = orm
        .bulk_create("team", named(&["Orange", "Apple", "Banana"]), None)
        .await
        .expect("Failed to seed teams");
    (players, skills, teams)
}

fn names(rows: &[Row]) -> Vec<&str> {
    rows.iter().filter_map(|row| row.get_str("name")).collect()
}

#[tokio::test]
async fn test_recreate_sync_is_idempotent() {
    let (_dir, orm) = fresh_league().await;
    orm.create("player", values! { "name" => "john" }, None)
        .await
        .expect("Failed to create");

    let report = orm.sync(SyncMode::Recreate).await.expect("Failed to resync");
    assert_eq!(report.dropped.len(), report.created.len());
    assert!(report.created.iter().any(|t| t == "player_skill"));

    let report = orm.sync(SyncMode::Recreate).await.expect("Failed to resync");
    assert_eq!(report.created.len(), 7);
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 0);

    let (_, metadata) = orm
        .raw_query("SELECT * FROM player_skill", None)
        .await
        .expect("Join table missing");
    assert_eq!(
        metadata.columns,
        vec!["createdAt", "updatedAt", "playerId", "skillId"]
    );
}

#[tokio::test]
async fn test_find_one_returns_created_row() {
    let (_dir, orm) = fresh_league().await;
    let john = orm
        .create("player", values! { "name" => "john" }, None)
        .await
        .unwrap();
    assert!(john.get("createdAt").and_then(Value::as_str).is_some());
    assert_eq!(john.get("teamId"), Some(&Value::Null));

    let found = orm
        .find_one("player", Filter::new().eq("id", john.id()), None)
        .await
        .unwrap();
    assert_eq!(found.as_ref(), Some(&john));
    assert_eq!(
        orm.find_by_id("player", john.id(), None).await.unwrap(),
        Some(john)
    );

    // Absence is not an error
    let missing = orm
        .find_one("player", Filter::new().eq("name", "nobody"), None)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_create_validates_values() {
    let (_dir, orm) = fresh_league().await;

    let err = orm
        .create("player", values! { "nickname" => "j" }, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = orm
        .create("player", values! { "name" => 42 }, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = orm
        .create("referee", values! { "name" => "x" }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownEntity(_)));
}

#[tokio::test]
async fn test_bulk_create_with_invalid_row_persists_nothing() {
    let (_dir, orm) = fresh_league().await;
    let mut rows = named(&["john", "bob"]);
    rows.push(values! { "name" => "ken", "height" => 180 });

    let err = orm.bulk_create("player", rows, None).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_bulk_create_rolls_back_on_constraint_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = SchemaRegistry::new();
    registry
        .define("badge", vec![FieldDef::string("code").not_null().unique()])
        .unwrap();
    let orm = connect(&dir, registry).await;
    orm.sync(SyncMode::Recreate).await.unwrap();

    let rows = vec![
        values! { "code" => "a" },
        values! { "code" => "b" },
        values! { "code" => "a" },
    ];
    let err = orm.bulk_create("badge", rows, None).await.unwrap_err();
    assert_eq!(err.storage_kind(), Some(StorageErrorKind::Constraint));
    assert_eq!(orm.count("badge", Filter::new(), None).await.unwrap(), 0);

    let err = orm
        .create("badge", values! {}, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_failed_transaction_leaves_no_writes() {
    let (_dir, orm) = fresh_league().await;
    let orm = &orm;

    let result: Result<()> = orm
        .with_transaction(|t| async move {
            orm.create("player", values! { "name" => "john" }, Some(&t))
                .await?;
            orm.create("player", values! { "name" => "bob" }, Some(&t))
                .await?;
            Err(DatabaseError::other("boom"))
        })
        .await;

    assert!(matches!(result, Err(DatabaseError::Other(ref msg)) if msg == "boom"));
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_john_learns_every_skill_in_a_transaction() {
    let (_dir, orm) = fresh_league().await;
    seed(&orm).await;
    let orm = &orm;

    let added = orm
        .with_transaction(|t| async move {
            let skills = orm.find_all("skill", FindOptions::new(), Some(&t)).await?;
            let john = orm
                .find_one("player", Filter::new().eq("name", "john"), Some(&t))
                .await?
                .ok_or_else(|| DatabaseError::other("john missing"))?;
            orm.add_related(&john, "skills", &skills, Some(&t)).await
        })
        .await
        .expect("Transaction failed");
    assert_eq!(added, 3);

    let john = orm
        .find_one("player", Filter::new().eq("name", "john"), None)
        .await
        .unwrap()
        .unwrap();
    let skills = orm
        .get_related(&john, "skills", Filter::new(), None)
        .await
        .unwrap();
    let mut learned = names(&skills);
    learned.sort_unstable();
    assert_eq!(learned, vec!["run", "talk", "work"]);
}

#[tokio::test]
async fn test_many_to_many_add_is_idempotent() {
    let (_dir, orm) = fresh_league().await;
    let (players, skills, _) = seed(&orm).await;
    let john = &players[0];

    assert_eq!(orm.add_related(john, "skills", &skills[..2], None).await.unwrap(), 2);
    assert_eq!(orm.add_related(john, "skills", &skills, None).await.unwrap(), 1);
    assert_eq!(orm.add_related(john, "skills", &skills, None).await.unwrap(), 0);

    let (rows, _) = orm
        .raw_query_with_params(
            "SELECT COUNT(*) AS pairs FROM player_skill WHERE playerId = ?",
            &[Value::from(john.id())],
            None,
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get("pairs"), Some(&Value::Integer(3)));
}

#[tokio::test]
async fn test_orange_team_gets_every_player() {
    let (_dir, orm) = fresh_league().await;
    let (players, _, teams) = seed(&orm).await;
    let orange = &teams[0];

    let moved = orm
        .add_related(orange, "players", &players, None)
        .await
        .unwrap();
    assert_eq!(moved, 3);

    let roster = orm
        .find_all(
            "player",
            FindOptions::new().filter(Filter::new().eq("teamId", orange.id())),
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&roster), vec!["john", "bob", "ken"]);

    // The belongs side reads the key back from storage
    let team = orm
        .get_related(&players[1], "team", Filter::new(), None)
        .await
        .unwrap();
    assert_eq!(names(&team), vec!["Orange"]);

    let apple = orm
        .get_related(&teams[1], "players", Filter::new(), None)
        .await
        .unwrap();
    assert!(apple.is_empty());
}

#[tokio::test]
async fn test_raw_queries_return_rows_and_metadata() {
    let (_dir, orm) = fresh_league().await;
    let (players, skills, _) = seed(&orm).await;
    orm.add_related(&players[0], "skills", &skills, None)
        .await
        .unwrap();

    let (rows, metadata) = orm.raw_query("SELECT * from players;", None).await.unwrap();
    assert_eq!(metadata.sql, "SELECT * from players;");
    assert!(metadata.columns.iter().any(|c| c == "name"));
    assert_eq!(metadata.rows_affected, 0);
    let mut seen: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str))
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec!["bob", "john", "ken"]);

    let (rows, metadata) = orm
        .raw_query(
            "select players.name as player_name,skills.name as skills_name from players \
             left join player_skill on players.id = player_skill.playerId \
             left join skills on player_skill.skillId = skills.id",
            None,
        )
        .await
        .unwrap();
    assert_eq!(metadata.columns, vec!["player_name", "skills_name"]);
    assert_eq!(rows.len(), 5);
    let unskilled = rows
        .iter()
        .filter(|row| row.get("skills_name") == Some(&Value::Null))
        .count();
    assert_eq!(unskilled, 2);

    let (_, metadata) = orm
        .raw_query("UPDATE players SET name = upper(name)", None)
        .await
        .unwrap();
    assert_eq!(metadata.rows_affected, 3);
}

#[tokio::test]
async fn test_required_include_returns_only_matching_parents() {
    let (_dir, orm) = fresh_league().await;
    let (players, skills, _) = seed(&orm).await;
    orm.add_related(&players[0], "skills", &skills, None)
        .await
        .unwrap();
    orm.add_related(&players[1], "skills", &skills[1..2], None)
        .await
        .unwrap();

    let runnable = orm
        .find_all(
            "player",
            FindOptions::new()
                .include(Include::new("skills").filter(Filter::new().eq("name", "run"))),
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&runnable), vec!["john"]);
    assert_eq!(names(runnable[0].related("skills")), vec!["run"]);

    let everyone = orm
        .find_all(
            "player",
            FindOptions::new().include(Include::new("skills")),
            None,
        )
        .await
        .unwrap();
    assert_eq!(everyone.len(), 3);
    assert_eq!(everyone[0].related("skills").len(), 3);
    assert_eq!(names(everyone[1].related("skills")), vec!["work"]);
    assert!(everyone[2].is_included("skills"));
    assert!(everyone[2].related("skills").is_empty());

    let err = orm
        .find_all(
            "player",
            FindOptions::new().include(Include::new("coaches")),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownAssociation { .. }));
}

#[tokio::test]
async fn test_find_all_orders_and_pages() {
    let (_dir, orm) = fresh_league().await;
    seed(&orm).await;

    let page = orm
        .find_all(
            "player",
            FindOptions::new()
                .order_by("name", OrderDirection::Desc)
                .limit(2)
                .offset(1),
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["john", "bob"]);

    let err = orm
        .find_all(
            "player",
            FindOptions::new().filter(Filter::new().eq("nickname", "j")),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_has_one_moves_the_key() {
    let (_dir, orm) = fresh_league().await;
    let (_, _, teams) = seed(&orm).await;
    let coach = orm
        .create("coach", values! { "name" => "MrOrange" }, None)
        .await
        .unwrap();

    orm.add_related(&coach, "team", &teams[..1], None).await.unwrap();
    orm.add_related(&coach, "team", &teams[1..2], None).await.unwrap();

    let orange = orm.find_by_id("team", teams[0].id(), None).await.unwrap().unwrap();
    let apple = orm.find_by_id("team", teams[1].id(), None).await.unwrap().unwrap();
    assert_eq!(orange.get("coachId"), Some(&Value::Null));
    assert_eq!(apple.get("coachId"), Some(&Value::Integer(coach.id())));

    let err = orm
        .add_related(&coach, "team", &teams, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_remove_related() {
    let (_dir, orm) = fresh_league().await;
    let (players, skills, teams) = seed(&orm).await;
    let john = &players[0];
    orm.add_related(john, "skills", &skills, None).await.unwrap();
    orm.add_related(&teams[0], "players", &players, None)
        .await
        .unwrap();

    assert_eq!(
        orm.remove_related(john, "skills", &skills[..1], None)
            .await
            .unwrap(),
        1
    );
    let left = orm
        .get_related(john, "skills", Filter::new(), None)
        .await
        .unwrap();
    assert_eq!(names(&left), vec!["work", "talk"]);

    assert_eq!(
        orm.remove_related(&teams[0], "players", &players[1..], None)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        orm.count("player", Filter::new().is_null("teamId"), None)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_wrong_target_entity_is_rejected() {
    let (_dir, orm) = fresh_league().await;
    let (players, _, teams) = seed(&orm).await;

    let err = orm
        .add_related(&players[0], "skills", &teams, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_dangling_reference_violates_foreign_key() {
    let (_dir, orm) = fresh_league().await;
    let (players, skills, _) = seed(&orm).await;
    orm.destroy("skill", Filter::new().eq("name", "talk"), None)
        .await
        .unwrap();

    let err = orm
        .add_related(&players[0], "skills", &skills, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyViolation(_)));

    // The whole add was undone
    let (rows, _) = orm
        .raw_query("SELECT * FROM player_skill", None)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_has_one_missing_target_keeps_current_holder() {
    let (_dir, orm) = fresh_league().await;
    let (_, _, teams) = seed(&orm).await;
    let coach = orm
        .create("coach", values! { "name" => "MrOrange" }, None)
        .await
        .unwrap();
    orm.add_related(&coach, "team", &teams[..1], None).await.unwrap();
    orm.destroy("team", Filter::new().eq("id", teams[1].id()), None)
        .await
        .unwrap();

    let err = orm
        .add_related(&coach, "team", &teams[1..2], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyViolation(_)));

    let related = orm
        .get_related(&coach, "team", Filter::new(), None)
        .await
        .unwrap();
    assert_eq!(names(&related), vec!["Orange"]);
}

#[tokio::test]
async fn test_has_many_missing_target_writes_nothing() {
    let (_dir, orm) = fresh_league().await;
    let (players, _, teams) = seed(&orm).await;
    orm.destroy("player", Filter::new().eq("name", "john"), None)
        .await
        .unwrap();

    let err = orm
        .add_related(&teams[0], "players", &players, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyViolation(_)));

    let roster = orm
        .get_related(&teams[0], "players", Filter::new(), None)
        .await
        .unwrap();
    assert!(roster.is_empty());
}

#[tokio::test]
async fn test_belongs_to_missing_rows() {
    let (_dir, orm) = fresh_league().await;
    let (players, _, teams) = seed(&orm).await;
    orm.destroy("team", Filter::new().eq("name", "Apple"), None)
        .await
        .unwrap();

    let err = orm
        .add_related(&players[0], "team", &teams[1..2], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyViolation(_)));
    let john = orm
        .find_by_id("player", players[0].id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(john.get("teamId"), Some(&Value::Null));

    // The owner itself is gone
    orm.destroy("player", Filter::new().eq("name", "bob"), None)
        .await
        .unwrap();
    let err = orm
        .add_related(&players[1], "team", &teams[..1], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound { ref entity, .. } if entity == "player"));
}

#[tokio::test]
async fn test_dangling_reference_kept_without_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.sqlite");
    let config = EngineConfig::sqlite(path.to_string_lossy()).with_foreign_keys(false);
    let orm = Orm::connect(config, league()).await.unwrap();
    orm.sync(SyncMode::Recreate).await.unwrap();
    let (players, skills, teams) = seed(&orm).await;
    orm.destroy("skill", Filter::new().eq("name", "talk"), None)
        .await
        .unwrap();
    orm.destroy("team", Filter::new().eq("name", "Apple"), None)
        .await
        .unwrap();
    orm.destroy("player", Filter::new().eq("name", "ken"), None)
        .await
        .unwrap();

    // Keys written on live rows are stored as given
    let added = orm
        .add_related(&players[0], "skills", &skills, None)
        .await
        .unwrap();
    assert_eq!(added, 3);
    orm.add_related(&players[0], "team", &teams[1..2], None)
        .await
        .unwrap();
    let john = orm
        .find_by_id("player", players[0].id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(john.get("teamId"), Some(&Value::Integer(teams[1].id())));

    // A key that lives on a missing row has nowhere to go
    let err = orm
        .add_related(&teams[0], "players", &players[1..], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound { id, .. } if id == players[2].id()));
    let bob = orm
        .find_by_id("player", players[1].id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bob.get("teamId"), Some(&Value::Null));
}

#[tokio::test]
async fn test_bulk_create_beyond_variable_limit() {
    let (_dir, orm) = fresh_league().await;
    let rows: Vec<Values> = (0..40_000)
        .map(|i| values! { "name" => format!("player{}", i) })
        .collect();

    let created = orm.bulk_create("player", rows, None).await.unwrap();
    assert_eq!(created.len(), 40_000);
    assert_eq!(created[0].get_str("name"), Some("player0"));
    assert_eq!(created[39_999].get_str("name"), Some("player39999"));
    assert!(created.windows(2).all(|pair| pair[0].id() < pair[1].id()));
    assert_eq!(
        orm.count("player", Filter::new(), None).await.unwrap(),
        40_000
    );
}

#[tokio::test]
async fn test_update_and_destroy() {
    let (_dir, orm) = fresh_league().await;
    let (players, _, _) = seed(&orm).await;

    let renamed = orm
        .update("player", players[0].id(), values! { "name" => "johnny" }, None)
        .await
        .unwrap();
    assert_eq!(renamed.get_str("name"), Some("johnny"));
    assert_eq!(renamed.get("createdAt"), players[0].get("createdAt"));

    let err = orm
        .update("player", 999, values! { "name" => "ghost" }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound { id: 999, .. }));

    let removed = orm
        .destroy("player", Filter::new().in_list("name", ["bob", "ken"]), None)
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_writes_are_invisible_outside_open_transaction() {
    let (_dir, orm) = fresh_league().await;
    let txn = orm.transaction().await.unwrap();

    orm.create("player", values! { "name" => "john" }, Some(&txn))
        .await
        .unwrap();
    assert_eq!(orm.count("player", Filter::new(), Some(&txn)).await.unwrap(), 1);
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 0);

    txn.commit().await.unwrap();
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 1);

    // A closed handle rejects further use
    let err = orm
        .create("player", values! { "name" => "bob" }, Some(&txn))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::TransactionError(_)));
}

#[tokio::test]
async fn test_bulk_create_inside_transaction_uses_savepoint() {
    let (_dir, orm) = fresh_league().await;
    let txn = orm.transaction().await.unwrap();

    orm.bulk_create("player", named(&["john"]), Some(&txn))
        .await
        .unwrap();
    let err = orm
        .bulk_create(
            "player",
            vec![values! { "name" => "bob" }, values! { "id" => 1, "name" => "dup" }],
            Some(&txn),
        )
        .await
        .unwrap_err();
    assert_eq!(err.storage_kind(), Some(StorageErrorKind::Constraint));

    // Only the failed batch was undone
    assert!(txn.is_active());
    txn.commit().await.unwrap();
    let players = orm.find_all("player", FindOptions::new(), None).await.unwrap();
    assert_eq!(names(&players), vec!["john"]);
}

#[test]
fn test_has_many_through_is_rejected() {
    let mut registry = league();
    let err = registry
        .associate(
            AssociationKind::HasMany,
            "player",
            "skill",
            AssociationOptions::through_table("PlayerSkill"),
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UnsupportedAssociationKind { .. }));
}

#[tokio::test]
async fn test_reserved_table_name_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = SchemaRegistry::new();
    registry
        .define_with_options(
            "meta",
            vec![FieldDef::string("name")],
            EntityOptions {
                table_name: Some("sqlite_meta".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let orm = connect(&dir, registry).await;

    let err = orm.sync(SyncMode::Recreate).await.unwrap_err();
    assert!(matches!(err, DatabaseError::SchemaConflict(_)));
}

#[tokio::test]
async fn test_migrate_adds_columns_without_losing_rows() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut registry = SchemaRegistry::new();
        registry.define("player", vec![FieldDef::string("name")]).unwrap();
        let orm = connect(&dir, registry).await;
        orm.sync(SyncMode::Recreate).await.unwrap();
        orm.create("player", values! { "name" => "john" }, None)
            .await
            .unwrap();
        orm.close();
    }

    let mut registry = SchemaRegistry::new();
    registry
        .define(
            "player",
            vec![FieldDef::string("name"), FieldDef::integer("number")],
        )
        .unwrap();
    registry.define("skill", vec![FieldDef::string("name")]).unwrap();
    let orm = connect(&dir, registry).await;

    let report = orm.sync(SyncMode::Migrate).await.unwrap();
    assert_eq!(report.created, vec!["skills"]);
    assert_eq!(report.altered, vec!["players.number"]);
    assert!(report.dropped.is_empty());

    let john = orm
        .find_one("player", Filter::new().eq("name", "john"), None)
        .await
        .unwrap()
        .expect("row survived migrate");
    assert_eq!(john.get("number"), Some(&Value::Null));

    // A second migrate has nothing to do
    let report = orm.sync(SyncMode::Migrate).await.unwrap();
    assert!(report.created.is_empty() && report.altered.is_empty());
}

#[tokio::test]
async fn test_in_memory_database_in_one_transaction() {
    let orm = Orm::connect(EngineConfig::sqlite(":memory:"), league())
        .await
        .unwrap();
    assert_eq!(orm.engine().stats().max_size, 1);
    orm.sync(SyncMode::Recreate).await.unwrap();
    let orm = &orm;

    let count = orm
        .with_transaction(|t| async move {
            orm.bulk_create("player", named(&["john", "bob"]), Some(&t))
                .await?;
            orm.count("player", Filter::new(), Some(&t)).await
        })
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(orm.count("player", Filter::new(), None).await.unwrap(), 2);
}
