//! Property-based tests using proptest

use proptest::prelude::*;
use rust_orm_system::core::query_builder::{InsertBuilder, SelectBuilder};
use rust_orm_system::core::schema::{pluralize, quote_ident, validate_identifier};
use rust_orm_system::prelude::*;

fn any_value() -> impl Strategy<Value = rust_orm_system::Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>().prop_filter("finite", |v| v.is_finite()).prop_map(Value::Real),
        ".*".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
    ]
}

fn identifier() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
}

// ============================================================================
// Filter Rendering
// ============================================================================

proptest! {
    /// Every bound value gets exactly one placeholder
    #[test]
    fn test_placeholders_match_params(
        conditions in prop::collection::vec((identifier(), any_value(), 0u8..4), 0..12)
    ) {
        let mut filter = Filter::new();
        for (column, value, op) in conditions {
            filter = match op {
                0 => filter.eq(&column, value),
                1 => filter.ne(&column, value),
                2 => filter.gt(&column, value),
                _ => filter.in_list(&column, vec![value.clone(), value]),
            };
        }
        let (sql, params) = filter.render(Some("t0"));
        prop_assert_eq!(sql.matches('?').count(), params.len());
    }

    /// Builders keep placeholders and parameters aligned
    #[test]
    fn test_select_and_insert_params_align(
        rows in prop::collection::vec(prop::collection::vec(any::<i64>(), 3), 1..8),
        limit in prop::option::of(0usize..100),
        offset in prop::option::of(0usize..100),
    ) {
        let mut insert = InsertBuilder::new("t").columns(&["a", "b", "c"]);
        for row in &rows {
            insert = insert.row(row.iter().copied().map(Value::Integer).collect());
        }
        prop_assert_eq!(insert.build().matches('?').count(), insert.params().len());
        prop_assert_eq!(insert.params().len(), rows.len() * 3);

        let mut select = SelectBuilder::new("t")
            .alias("t0")
            .filter(&Filter::new().in_list("a", rows.iter().map(|r| r[0])));
        if let Some(limit) = limit {
            select = select.limit(limit);
        }
        if let Some(offset) = offset {
            select = select.offset(offset);
        }
        let sql = select.build();
        prop_assert_eq!(sql.matches('?').count(), select.params().len());
        prop_assert_eq!(sql.contains("OFFSET"), offset.is_some());
    }

    /// Quoted identifiers never terminate early
    #[test]
    fn test_quote_ident_escapes(name in ".*") {
        let quoted = quote_ident(&name);
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert_eq!(inner.replace("\"\"", "\""), name);
        prop_assert_eq!(inner.matches('"').count() % 2, 0);
    }
}

// ============================================================================
// Naming
// ============================================================================

proptest! {
    #[test]
    fn test_pluralize_extends_word(word in "[a-z]{1,12}") {
        let plural = pluralize(&word);
        prop_assert!(plural.len() > word.len());
        prop_assert!(plural.ends_with('s'));
        prop_assert!(validate_identifier("table", &plural).is_ok());
    }

    #[test]
    fn test_identifier_validation(name in ".{0,20}") {
        let valid = validate_identifier("field", &name).is_ok();
        let expected = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        prop_assert_eq!(valid, expected);
    }
}

// ============================================================================
// Values
// ============================================================================

proptest! {
    #[test]
    fn test_json_projection_no_panic(value in any_value()) {
        let json = value.to_json();
        prop_assert_eq!(json.is_null(), value.is_null());
        let _ = value.to_string();
    }

    #[test]
    fn test_values_macro_keeps_every_column(
        entries in prop::collection::btree_map(identifier(), any::<i64>(), 0..10)
    ) {
        let mut values = values! {};
        for (column, value) in &entries {
            values.extend(values! { column.as_str() => *value });
        }
        prop_assert_eq!(values.len(), entries.len());
    }
}

// ============================================================================
// Storage
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A created row is found again unchanged, whatever its text
    #[test]
    fn test_create_then_find_one(name in "[a-zA-Z0-9 '\"%_-]{0,40}", number in any::<i64>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut registry = SchemaRegistry::new();
            registry
                .define("player", vec![FieldDef::string("name"), FieldDef::integer("number")])
                .unwrap();
            let orm = Orm::connect(EngineConfig::sqlite(":memory:"), registry).await.unwrap();
            orm.sync(SyncMode::Recreate).await.unwrap();

            let created = orm
                .create("player", values! { "name" => name.clone(), "number" => number }, None)
                .await
                .unwrap();
            let found = orm
                .find_one("player", Filter::new().eq("name", name.as_str()), None)
                .await
                .unwrap();
            assert_eq!(found, Some(created));
            orm.close();
        });
    }
}
