//! Integration tests for the SQLite rule store
//!
//! Uses a single-connection in-memory SQLite pool.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use propmap_model::{MappingRule, Transformation};
use propmap_store::{ChangeFeed, RuleChange, RuleStore, SqliteRuleStore};
use sqlx::sqlite::SqlitePoolOptions;

async fn setup_store() -> SqliteRuleStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let store = SqliteRuleStore::new(pool, ChangeFeed::default());
    store.init_schema().await.expect("Failed to create table");
    store
}

#[tokio::test]
async fn test_save_and_query_by_scope() {
    let store = setup_store().await;

    let written = store
        .save(vec![
            MappingRule::for_product("thermostat", "temperature", "temp_f")
                .with_transformation(&Transformation::math("(x - 32) * 5/9")),
            MappingRule::for_device("thermostat", "dev-1", "temperature", "t_raw"),
            MappingRule::for_device("thermostat", "dev-2", "humidity", "h"),
        ])
        .await
        .unwrap();
    assert_eq!(written, 3);

    let rules = store.query("thermostat", Some("dev-1")).await.unwrap();
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| r.device_id.as_deref() != Some("dev-2")));

    let product_rule = rules.iter().find(|r| !r.is_device_scoped()).unwrap();
    assert_eq!(product_rule.id.as_deref(), Some("thermostat:property:temperature"));
    assert!(matches!(
        product_rule.transformation().unwrap(),
        Some(Transformation::MathExpression(_))
    ));

    let product_only = store.query("thermostat", None).await.unwrap();
    assert_eq!(product_only.len(), 1);
}

#[tokio::test]
async fn test_save_upserts_by_derived_id() {
    let store = setup_store().await;

    store
        .save(vec![MappingRule::for_device("p", "d", "speed", "spd")])
        .await
        .unwrap();
    store
        .save(vec![MappingRule::for_device("p", "d", "speed", "velocity")])
        .await
        .unwrap();

    let rules = store.query("p", Some("d")).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].original_id.as_deref(), Some("velocity"));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_metadata_mapping")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_delete_by_ids_and_scope() {
    let store = setup_store().await;
    store
        .save(vec![
            MappingRule::for_product("p", "a", "ra"),
            MappingRule::for_product("p", "b", "rb"),
            MappingRule::for_device("p", "d", "a", "da"),
        ])
        .await
        .unwrap();

    let removed = store
        .delete_by_ids(&[MappingRule::id_for_device(
            "d",
            propmap_model::MetadataType::Property,
            "a",
        )])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.delete_by_scope("p", None).await.unwrap(), 2);
    assert!(store.query("p", Some("d")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_writes_publish_to_feed() {
    let store = setup_store().await;
    let mut changes = store.feed().subscribe();

    store
        .save(vec![MappingRule::for_product("p", "a", "ra")])
        .await
        .unwrap();
    store.delete_by_scope("p", None).await.unwrap();
    // Nothing left to delete, so no signal
    store.delete_by_scope("p", None).await.unwrap();

    assert_eq!(changes.recv().await.unwrap(), RuleChange::Saved);
    assert_eq!(changes.recv().await.unwrap(), RuleChange::Deleted);
    assert!(changes.try_recv().is_err());
}
