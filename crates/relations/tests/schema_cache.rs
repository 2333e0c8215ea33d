mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use elif_relations::{
    load_relation, BelongsToMany, DatabaseConnection, RelationContext, RelationsConfig, RelationsDefaults, SchemaCache,
};

const INTROSPECTION: &str = "pragma_table_info";

#[tokio::test]
async fn test_lookups_within_ttl_hit_the_database_once() {
    let db = database().await;
    let cache = SchemaCache::new(Duration::from_secs(60));

    let first = cache.columns(db.as_ref(), "post_tag").await.unwrap();
    let second = cache.columns(db.as_ref(), "post_tag").await.unwrap();

    assert_eq!(db.count_matching(INTROSPECTION), 1);
    assert_eq!(
        first.as_slice(),
        ["post_id", "tag_id", "role", "meta", "created_at", "updated_at"].map(String::from)
    );
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_zero_ttl_always_requeries() {
    let db = database().await;
    let cache = SchemaCache::new(Duration::from_secs(60));
    cache.columns(db.as_ref(), "tags").await.unwrap();

    cache.configure_ttl(Duration::ZERO);
    cache.columns(db.as_ref(), "tags").await.unwrap();
    cache.columns(db.as_ref(), "tags").await.unwrap();

    assert_eq!(db.count_matching(INTROSPECTION), 3);
}

#[tokio::test]
async fn test_clear_and_forget() {
    let db = database().await;
    let cache = SchemaCache::default();
    cache.columns(db.as_ref(), "tags").await.unwrap();
    cache.columns(db.as_ref(), "posts").await.unwrap();

    cache.forget("tags");
    assert!(cache.cached("tags").is_none());
    assert!(cache.cached("posts").is_some());

    cache.clear();
    assert!(cache.cached("posts").is_none());
    cache.columns(db.as_ref(), "posts").await.unwrap();
    assert_eq!(db.count_matching(INTROSPECTION), 3);
}

#[tokio::test]
async fn test_missing_table_is_not_cached() {
    let db = database().await;
    let cache = SchemaCache::default();

    assert!(cache.columns(db.as_ref(), "nope").await.unwrap().is_empty());
    assert!(cache.cached("nope").is_none());
    assert!(!cache.has_column(db.as_ref(), "tags", "slug").await.unwrap());
    assert!(cache.has_column(db.as_ref(), "tags", "name").await.unwrap());
}

#[tokio::test]
async fn test_ensure_columns_names_every_missing_column() {
    let db = database().await;
    let cache = SchemaCache::default();

    cache.ensure_columns(db.as_ref(), "taggables", &["tag_id", "taggable_type"]).await.unwrap();
    let error = cache
        .ensure_columns(db.as_ref(), "taggables", &["tag_id", "weight", "position"])
        .await
        .unwrap_err()
        .to_string();
    assert!(error.contains("weight, position"), "{error}");
}

#[tokio::test]
async fn test_pivot_discovery_shares_the_context_cache() {
    let db = database().await;
    let connection: Arc<dyn DatabaseConnection> = db.clone();
    let cache = Arc::new(SchemaCache::default());
    let ctx = RelationContext::new(connection).with_schema_cache(Arc::clone(&cache));

    for _ in 0..2 {
        let mut owners = load(&ctx, &posts(), &[1, 2]).await;
        let mut relation = BelongsToMany::new(tags(), "post_tag", "post_id", "tag_id", "id", "id")
            .with_pivot(&["*"])
            .unwrap();
        load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();
        let pivot = owners[0].related_many("tags")[0].pivot().unwrap();
        assert!(pivot.get("meta").is_some());
    }

    assert_eq!(db.count_matching(INTROSPECTION), 1);
    assert!(cache.cached("post_tag").is_some());
}

#[tokio::test]
async fn test_config_ttl_applies_only_to_injected_caches() {
    let db = database().await;
    let connection: Arc<dyn DatabaseConnection> = db.clone();
    let config = RelationsConfig {
        schema_cache_ttl_secs: 0,
        ..RelationsConfig::default()
    };

    let cache = Arc::new(SchemaCache::new(Duration::from_secs(60)));
    let injected = RelationContext::new(Arc::clone(&connection))
        .with_schema_cache(Arc::clone(&cache))
        .with_config(config.clone());
    assert_eq!(injected.schema().ttl(), Duration::ZERO);

    let shared = RelationContext::new(connection).with_config(config);
    assert!(!SchemaCache::is_global(&cache));
    assert_eq!(
        shared.schema().ttl(),
        Duration::from_secs(RelationsDefaults::SCHEMA_CACHE_TTL_SECS)
    );
}
