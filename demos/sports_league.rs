//! Sports league walkthrough
//!
//! This example demonstrates the mapping layer end to end:
//! - Declaring entities and associations
//! - Recreating the schema
//! - Bulk seeding
//! - Relating rows inside transactions
//! - Raw queries with metadata
//! - Eager loading with a filter on the related entity
//!
//! Run with: cargo run --example sports_league
//! (set RUST_LOG=rust_orm_system::sql=trace to see every statement)

use rust_orm_system::logging::{init_tracing, TracingConfig};
use rust_orm_system::prelude::*;
use std::time::Duration;

fn named(names: &[&str]) -> Vec<Values> {
    names.iter().map(|name| values! { "name" => *name }).collect()
}

fn league() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.define(
        "user",
        vec![FieldDef::string("firstName"), FieldDef::string("lastName")],
    )?;
    for entity in ["team", "player", "coach", "fan", "skill"] {
        registry.define(entity, vec![FieldDef::string("name")])?;
    }

    registry.associate(
        AssociationKind::HasOne,
        "coach",
        "team",
        AssociationOptions::default(),
    )?;
    registry.associate(
        AssociationKind::BelongsTo,
        "player",
        "team",
        AssociationOptions::default(),
    )?;
    registry.associate(
        AssociationKind::HasMany,
        "team",
        "player",
        AssociationOptions::default(),
    )?;
    registry.associate(
        AssociationKind::HasMany,
        "team",
        "fan",
        AssociationOptions::default(),
    )?;

    // A join table can only be declared from BelongsToMany
    match registry.associate(
        AssociationKind::HasMany,
        "player",
        "skill",
        AssociationOptions::through_table("PlayerSkill"),
    ) {
        Err(DatabaseError::UnsupportedAssociationKind { .. }) => {}
        other => println!("   unexpected result for hasMany through: {:?}", other),
    }
    registry.associate(
        AssociationKind::BelongsToMany,
        "player",
        "skill",
        AssociationOptions::through_table("player_skill"),
    )?;
    Ok(registry)
}

fn print_rows(rows: &DatabaseResult) {
    for row in rows {
        let fields = row
            .iter()
            .map(|(column, value)| format!("{}: {}", column, value))
            .collect::<Vec<_>>()
            .join(", ");
        println!("   {{ {} }}", fields);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&TracingConfig::default())?;
    println!("=== Rust ORM System - Sports League Example ===\n");

    println!("1. Connecting to database...");
    let config = EngineConfig::sqlite("database.sqlite").with_pool(
        5,
        0,
        Duration::from_millis(10_000),
    );
    let orm = match Orm::connect(config, league()?).await {
        Ok(orm) => orm,
        Err(err) => {
            eprintln!("Unable to connect to the database: {}", err);
            return Err(err);
        }
    };
    println!("   Connection has been established successfully.\n");

    println!("2. Recreating schema...");
    let report = orm.sync(SyncMode::Recreate).await?;
    println!("   ✓ Created tables: {}\n", report.created.join(", "));

    println!("3. Seeding...");
    orm.bulk_create("player", named(&["john", "bob", "ken"]), None).await?;
    orm.bulk_create("skill", named(&["run", "work", "talk"]), None).await?;
    orm.bulk_create("coach", named(&["MrOrange", "MrApple", "MrBanana"]), None)
        .await?;
    orm.bulk_create("team", named(&["Orange", "Apple", "Banana"]), None)
        .await?;
    println!("   ✓ Seeded players, skills, coaches and teams\n");

    println!("4. Transaction: john learns every skill...");
    let orm = &orm;
    let added = orm
        .with_transaction(|t| async move {
            let all_skills = orm.find_all("skill", FindOptions::new(), Some(&t)).await?;
            let john = orm
                .find_one("player", Filter::new().eq("name", "john"), Some(&t))
                .await?
                .ok_or_else(|| DatabaseError::other("player 'john' was not seeded"))?;
            orm.add_related(&john, "skills", &all_skills, Some(&t)).await
        })
        .await?;
    println!("   ✓ {} join rows written\n", added);

    println!("5. Transaction: every player joins Orange...");
    let moved = orm
        .with_transaction(|t| async move {
            let orange = orm
                .find_one("team", Filter::new().eq("name", "Orange"), Some(&t))
                .await?
                .ok_or_else(|| DatabaseError::other("team 'Orange' was not seeded"))?;
            let all_players = orm.find_all("player", FindOptions::new(), Some(&t)).await?;
            orm.add_related(&orange, "players", &all_players, Some(&t)).await
        })
        .await?;
    println!("   ✓ {} players moved\n", moved);

    println!("----------Raw Query example 1---------");
    let (results, metadata) = orm.raw_query("SELECT * from players;", None).await?;
    println!("Result of {}", metadata.sql);
    print_rows(&results);
    println!();

    println!("----------Raw Query example 2---------");
    let (results, metadata) = orm
        .raw_query(
            "select players.name as player_name,skills.name as skills_name from players \
             left join player_skill on players.id = player_skill.playerId \
             left join skills on player_skill.skillId = skills.id",
            None,
        )
        .await?;
    println!("Result of {}", metadata.sql);
    print_rows(&results);
    println!();

    println!("----------Value of John---------");
    if let Some(john) = orm
        .find_one("player", Filter::new().eq("name", "john"), None)
        .await?
    {
        println!("{:#?}", john.values());
        println!("{}", john.to_json());
    }
    println!();

    println!("----------Runnable Players--------");
    let runnable = orm
        .find_all(
            "player",
            FindOptions::new()
                .include(Include::new("skills").filter(Filter::new().eq("name", "run"))),
            None,
        )
        .await?;
    for player in &runnable {
        println!("{}", player.get_str("name").unwrap_or_default());
    }

    orm.close();
    println!("\n=== Example completed successfully ===");
    Ok(())
}
