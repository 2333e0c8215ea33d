mod common;

use std::collections::BTreeMap;

use common::*;
use elif_relations::query::OrderDirection;
use elif_relations::{
    load_relation, BelongsToMany, DatabaseValue, PivotRow, QueryMethods, Relation, RelationError, RelationsConfig,
};

fn post_tags() -> BelongsToMany {
    BelongsToMany::new(tags(), "post_tag", "post_id", "tag_id", "id", "id")
}

async fn pivot_ids(db: &std::sync::Arc<RecordingConnection>, post_id: i64) -> Vec<i64> {
    use elif_relations::DatabaseConnection;

    let rows = db
        .select(
            "select tag_id from post_tag where post_id = ? order by tag_id",
            &[DatabaseValue::Int64(post_id)],
        )
        .await
        .unwrap();
    rows.iter()
        .map(|row| row.get("tag_id").and_then(DatabaseValue::as_i64).unwrap())
        .collect()
}

#[tokio::test]
async fn test_each_owner_gets_its_own_pivot() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1, 2, 3, 4]).await;

    let mut relation = post_tags().with_pivot(&["role"]).unwrap().order_by("tags.id");
    load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("tags")), vec![1, 2]);
    assert_eq!(ids(owners[1].related_many("tags")), vec![1]);
    assert_eq!(ids(owners[2].related_many("tags")), vec![3]);
    assert!(owners[3].related_many("tags").is_empty());

    let shared_first = &owners[0].related_many("tags")[0];
    let shared_second = &owners[1].related_many("tags")[0];
    let role = |tag: &elif_relations::Record| tag.pivot().and_then(|p| p.get("role")).cloned();
    assert_eq!(role(shared_first), Some(DatabaseValue::from("admin")));
    assert_eq!(role(shared_second), Some(DatabaseValue::from("viewer")));
    assert!(shared_first.attributes().keys().all(|name| !name.starts_with("pivot_")));
    assert_eq!(
        shared_first.pivot().and_then(|p| p.get("post_id")).and_then(DatabaseValue::as_i64),
        Some(1)
    );
}

#[tokio::test]
async fn test_pivot_constraints_filter_results() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1, 2, 3]).await;

    let mut relation = post_tags().where_pivot("role", "=", "admin").unwrap();
    load_relation(&ctx, &mut owners, "admin_tags", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("admin_tags")), vec![1]);
    assert!(owners[1].related_many("admin_tags").is_empty());
    assert_eq!(ids(owners[2].related_many("admin_tags")), vec![3]);
}

#[tokio::test]
async fn test_pivot_constraints_added_after_join_apply_immediately() {
    let db = database().await;
    let ctx = context(&db);
    let owners = load(&ctx, &posts(), &[1, 2]).await;

    let mut relation = post_tags();
    relation.add_eager_constraints(&owners);
    let mut relation = relation.where_pivot_in("role", ["viewer"]).unwrap();
    let results = relation.get_eager(&ctx).await.unwrap();

    let mut matched = owners.clone();
    relation.match_eager(&mut matched, results, "tags");
    assert_eq!(ids(matched[0].related_many("tags")), vec![2]);
    assert_eq!(ids(matched[1].related_many("tags")), vec![1]);
}

#[tokio::test]
async fn test_json_pivot_constraints() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1, 2]).await;

    let mut relation = post_tags().where_pivot_json_contains("meta", "$.labels", "b").unwrap();
    load_relation(&ctx, &mut owners, "labelled", &mut relation).await.unwrap();
    assert_eq!(ids(owners[0].related_many("labelled")), vec![1]);
    assert!(owners[1].related_many("labelled").is_empty());

    let mut relation = post_tags().where_pivot_json_length("meta", "$.labels", ">=", 2).unwrap();
    load_relation(&ctx, &mut owners, "busy", &mut relation).await.unwrap();
    assert_eq!(ids(owners[0].related_many("busy")), vec![1]);

    let error = post_tags().where_pivot_json_contains("meta", "$..labels", "b").unwrap_err();
    assert!(matches!(error, RelationError::InvalidJsonPath(_)));
}

#[tokio::test]
async fn test_with_pivot_star_discovers_columns_once_materialized() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1, 3]).await;
    db.clear();

    let mut relation = post_tags().with_pivot(&["*"]).unwrap();
    assert!(db.statements().is_empty());
    load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();

    assert_eq!(db.count_matching("pragma_table_info"), 1);
    let pivot = owners[0].related_many("tags")[0].pivot().unwrap();
    for column in ["post_id", "tag_id", "role", "meta", "created_at", "updated_at"] {
        assert!(pivot.get(column).is_some(), "missing pivot column {column}");
    }
}

#[tokio::test]
async fn test_pivot_limit_per_owner() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1, 2]).await;

    let mut relation = post_tags().order_by_pivot("tag_id", OrderDirection::Desc).unwrap().limit(1);
    load_relation(&ctx, &mut owners, "top_tag", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("top_tag")), vec![2]);
    assert_eq!(ids(owners[1].related_many("top_tag")), vec![1]);
    assert!(owners[0].related_many("top_tag")[0].pivot().is_some());
}

#[tokio::test]
async fn test_lazy_pivot_results_carry_pivot() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1]).await;

    let mut relation = post_tags().with_pivot(&["role"]).unwrap().order_by("tags.id");
    load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();

    let tags = owners[0].related_many("tags");
    assert_eq!(ids(tags), vec![1, 2]);
    assert_eq!(tags[1].pivot().and_then(|p| p.get("role")), Some(&DatabaseValue::from("viewer")));
    assert!(tags[1].get("pivot_role").is_none());
}

#[tokio::test]
async fn test_attach_then_detach() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[4]).await.remove(0);
    let relation = post_tags();

    relation
        .attach(&ctx, &owner, vec![PivotRow::new(5).with("role", "admin")])
        .await
        .unwrap();
    assert!(relation.pivot_exists(&ctx, &owner, 5).await.unwrap());

    relation.detach(&ctx, &owner, Some(vec![DatabaseValue::from(5)])).await.unwrap();
    assert!(!relation.pivot_exists(&ctx, &owner, 5).await.unwrap());
    assert!(pivot_ids(&db, 4).await.is_empty());
}

#[tokio::test]
async fn test_detach_all_and_empty_detach() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags();

    assert_eq!(relation.detach(&ctx, &owner, Some(Vec::new())).await.unwrap(), 0);
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 2]);

    assert_eq!(relation.detach(&ctx, &owner, None).await.unwrap(), 2);
    assert!(pivot_ids(&db, 1).await.is_empty());
    assert_eq!(pivot_ids(&db, 2).await, vec![1]);
}

#[tokio::test]
async fn test_sync_reports_changes_and_is_idempotent() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags();

    relation.sync(&ctx, &owner, PivotRow::from_ids([2, 3, 4])).await.unwrap();
    assert_eq!(pivot_ids(&db, 1).await, vec![2, 3, 4]);

    let changes = relation.sync(&ctx, &owner, PivotRow::from_ids([1, 2, 3])).await.unwrap();
    assert_eq!(changes.attached, vec![DatabaseValue::Int32(1)]);
    assert_eq!(changes.detached.iter().filter_map(DatabaseValue::as_i64).collect::<Vec<_>>(), vec![4]);
    assert!(changes.updated.is_empty());
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 2, 3]);

    let again = relation.sync(&ctx, &owner, PivotRow::from_ids([1, 2, 3])).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_sync_updates_rows_with_attributes() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags().with_timestamps();

    let changes = relation
        .sync_without_detaching(&ctx, &owner, vec![PivotRow::new(2).with("role", "owner"), PivotRow::new(5)])
        .await
        .unwrap();
    assert_eq!(changes.updated, vec![DatabaseValue::Int32(2)]);
    assert_eq!(changes.attached, vec![DatabaseValue::Int32(5)]);
    assert!(changes.detached.is_empty());
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 2, 5]);

    let mut owners = vec![owner];
    let mut loaded = post_tags().with_pivot(&["role"]).unwrap().with_timestamps().where_pivot("tag_id", "=", 5).unwrap();
    load_relation(&ctx, &mut owners, "tags", &mut loaded).await.unwrap();
    let pivot = owners[0].related_many("tags")[0].pivot().unwrap().clone();
    assert!(!pivot.get("created_at").unwrap().is_null());
    assert!(!pivot.get("updated_at").unwrap().is_null());
}

#[tokio::test]
async fn test_repeated_sync_with_same_attributes_reports_no_updates() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags();
    let rows = || vec![PivotRow::new(1).with("role", "admin"), PivotRow::new(2).with("role", "owner")];

    let first = relation.sync(&ctx, &owner, rows()).await.unwrap();
    assert_eq!(first.updated, vec![DatabaseValue::Int32(2)]);

    let second = relation.sync(&ctx, &owner, rows()).await.unwrap();
    assert!(second.is_empty(), "{second:?}");

    let mut attributes = BTreeMap::new();
    attributes.insert("role".to_string(), DatabaseValue::from("owner"));
    assert_eq!(relation.update_existing_pivot(&ctx, &owner, 2, attributes).await.unwrap(), 0);
}

#[tokio::test]
async fn test_chunked_sync_matches_plain_sync() {
    let db = database().await;
    let config = RelationsConfig {
        sync_chunk_threshold: 2,
        sync_chunk_size: 2,
        ..RelationsConfig::default()
    };
    let ctx = context_with_config(&db, config);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags();

    let changes = relation.sync(&ctx, &owner, PivotRow::from_ids([1, 2, 3, 4, 5])).await.unwrap();
    assert_eq!(changes.attached.len(), 3);
    assert!(changes.detached.is_empty());
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 2, 3, 4, 5]);

    let changes = relation.sync(&ctx, &owner, PivotRow::from_ids([5, 4, 1])).await.unwrap();
    let mut detached: Vec<i64> = changes.detached.iter().filter_map(DatabaseValue::as_i64).collect();
    detached.sort();
    assert_eq!(detached, vec![2, 3]);
    assert!(changes.attached.is_empty());
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 4, 5]);
}

#[tokio::test]
async fn test_toggle_flips_membership() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);
    let relation = post_tags();

    let changes = relation.toggle(&ctx, &owner, PivotRow::from_ids([2, 3])).await.unwrap();
    assert_eq!(changes.detached, vec![DatabaseValue::Int32(2)]);
    assert_eq!(changes.attached, vec![DatabaseValue::Int32(3)]);
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 3]);
}

#[tokio::test]
async fn test_update_existing_pivot() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[2]).await.remove(0);
    let relation = post_tags().with_timestamps();

    let mut attributes = BTreeMap::new();
    attributes.insert("role".to_string(), DatabaseValue::from("editor"));
    assert_eq!(relation.update_existing_pivot(&ctx, &owner, 1, attributes.clone()).await.unwrap(), 1);
    assert_eq!(relation.update_existing_pivot(&ctx, &owner, 3, attributes).await.unwrap(), 0);

    let mut owners = vec![owner];
    let mut loaded = post_tags().with_pivot(&["role", "updated_at"]).unwrap();
    load_relation(&ctx, &mut owners, "tags", &mut loaded).await.unwrap();
    let pivot = owners[0].related_many("tags")[0].pivot().unwrap().clone();
    assert_eq!(pivot.get("role"), Some(&DatabaseValue::from("editor")));
    assert!(!pivot.get("updated_at").unwrap().is_null());
}

#[tokio::test]
async fn test_pivot_value_defaults_are_written_and_filtered() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[4]).await.remove(0);
    let relation = post_tags().with_pivot_value("role", "featured").unwrap();

    relation.attach(&ctx, &owner, PivotRow::from_ids([2])).await.unwrap();
    assert!(relation.pivot_exists(&ctx, &owner, 2).await.unwrap());
    // Rows with a different role are outside this relation
    assert!(!relation.pivot_exists(&ctx, &owner.clone().with("id", 1), 2).await.unwrap());
}

#[tokio::test]
async fn test_mutations_validate_before_writing() {
    let db = database().await;
    let ctx = context(&db);
    let relation = post_tags();

    let orphan = posts().new_record();
    let error = relation.attach(&ctx, &orphan, PivotRow::from_ids([1])).await.unwrap_err();
    assert!(matches!(error, RelationError::MissingKey { .. }));

    let owner = load(&ctx, &posts(), &[4]).await.remove(0);
    let nested = PivotRow::new(1).with("meta", DatabaseValue::Array(vec![DatabaseValue::from(1)]));
    let error = relation.attach(&ctx, &owner, vec![nested]).await.unwrap_err();
    assert!(error.is_invalid_input());
    assert!(pivot_ids(&db, 4).await.is_empty());
}

#[tokio::test]
async fn test_failed_sync_rolls_back() {
    let db = database().await;
    let ctx = context(&db);
    let owner = load(&ctx, &posts(), &[1]).await.remove(0);

    // `missing` is not a pivot column, so the insert fails after the delete ran
    let relation = post_tags();
    let result = relation
        .sync(&ctx, &owner, vec![PivotRow::new(3).with("missing", "x")])
        .await;
    assert!(result.unwrap_err().is_execution_failure());
    assert_eq!(pivot_ids(&db, 1).await, vec![1, 2]);
}

#[tokio::test]
async fn test_verify_pivot_schema() {
    let db = database().await;
    let ctx = context(&db);

    post_tags().verify_pivot_schema(&ctx).await.unwrap();

    let broken = BelongsToMany::new(tags(), "post_tag", "article_id", "tag_id", "id", "id");
    let error = broken.verify_pivot_schema(&ctx).await.unwrap_err();
    assert!(matches!(error, RelationError::Schema(message) if message.contains("article_id")));
}
