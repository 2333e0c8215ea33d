mod common;

use std::collections::BTreeMap;

use common::*;
use elif_relations::{
    load_relation, BelongsToMany, DatabaseValue, EagerLoader, HasOneOrMany, MorphOneOrMany, MorphTo, PivotRow,
    QueryMethods, Record, RelationError, RelationsConfig,
};

fn commentable() -> MorphTo {
    MorphTo::new(morph_map(), "commentable")
}

fn related_id(owner: &Record, relation: &str) -> Option<i64> {
    owner.related_one(relation)?.get("id")?.as_i64()
}

fn sorted_ids(records: &[Record]) -> Vec<i64> {
    let mut ids = ids(records);
    ids.sort();
    ids
}

#[tokio::test]
async fn test_morph_to_uses_one_union_for_compatible_types() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[1, 7]).await;
    db.clear();

    let mut relation = commentable();
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    assert_eq!(db.count_matching("union all"), 1);
    assert_eq!(db.count_matching("from \"posts\""), 1);

    let post = owners[0].related_one("commentable").unwrap();
    assert_eq!(post.descriptor().table(), "posts");
    assert_eq!(text(post, "title"), "first");
    assert!(post.get("elif_morph_type").is_none());

    let video = owners[1].related_one("commentable").unwrap();
    assert_eq!(video.descriptor().table(), "videos");
    assert_eq!(text(video, "title"), "intro");
}

#[tokio::test]
async fn test_type_constraint_forces_per_type_queries() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[1, 4, 7]).await;
    db.clear();

    let mut relation = commentable().constrain("post", |query| query.where_eq("posts.title", "first"));
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    assert_eq!(db.count_matching("union all"), 0);
    assert_eq!(db.statements().len(), 2);
    assert_eq!(related_id(&owners[0], "commentable"), Some(1));
    assert!(owners[1].related_one("commentable").is_none());
    assert_eq!(text(owners[2].related_one("commentable").unwrap(), "url"), "https://example.test/1");
}

#[tokio::test]
async fn test_union_disabled_by_configuration() {
    let db = database().await;
    let config = RelationsConfig {
        polymorphic_union: false,
        ..RelationsConfig::default()
    };
    let ctx = context_with_config(&db, config);
    let mut owners = load(&ctx, &comments(), &[2, 8]).await;
    db.clear();

    let mut relation = commentable();
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    assert_eq!(db.count_matching("union all"), 0);
    assert_eq!(db.statements().len(), 2);
    assert_eq!(text(owners[1].related_one("commentable").unwrap(), "title"), "demo");
}

#[tokio::test]
async fn test_failed_introspection_falls_back_to_per_type_queries() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[1, 7]).await;
    db.clear();
    db.fail_on("pragma_table_info");

    let mut relation = commentable();
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    assert_eq!(db.count_matching("pragma_table_info"), 1);
    assert_eq!(db.count_matching("union all"), 0);
    assert_eq!(db.statements().len(), 3);
    assert_eq!(text(owners[0].related_one("commentable").unwrap(), "title"), "first");
    assert_eq!(text(owners[1].related_one("commentable").unwrap(), "title"), "intro");
}

#[tokio::test]
async fn test_morph_many_limit_ranks_each_owner_type_separately() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1]).await;
    owners.extend(load(&ctx, &videos(), &[1]).await);

    let mut relation = MorphOneOrMany::morph_many(comments(), "commentable", "id")
        .order_by_desc("comments.id")
        .limit(2);
    load_relation(&ctx, &mut owners, "comments", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("comments")), vec![3, 2]);
    assert_eq!(ids(owners[1].related_many("comments")), vec![7]);
}

#[tokio::test]
async fn test_morph_to_many_limit_ranks_each_owner_type_separately() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1]).await;
    owners.extend(load(&ctx, &videos(), &[1]).await);

    let mut relation = BelongsToMany::morph_to_many(tags(), "taggable", "taggables", "tag_id")
        .order_by_desc("tags.id")
        .limit(1);
    load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("tags")), vec![1]);
    assert_eq!(ids(owners[1].related_many("tags")), vec![2]);
}

#[tokio::test]
async fn test_morph_to_single_type_and_missing_targets() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[1, 2, 6]).await;
    owners[2].set("commentable_id", 99);

    let mut relation = commentable();
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    assert_eq!(related_id(&owners[0], "commentable"), Some(1));
    assert_eq!(related_id(&owners[1], "commentable"), Some(1));
    assert!(owners[2].relation_loaded("commentable"));
    assert!(owners[2].related_one("commentable").is_none());
}

#[tokio::test]
async fn test_morph_with_loads_per_type_relations() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[4, 7]).await;

    let nested = EagerLoader::new().with("comments", HasOneOrMany::has_many(comments(), "post_id", "id"));
    let mut relation = commentable().morph_with("post", nested);
    load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap();

    let post = owners[0].related_one("commentable").unwrap();
    assert_eq!(sorted_ids(post.related_many("comments")), vec![4, 5]);
    let video = owners[1].related_one("commentable").unwrap();
    assert!(!video.relation_loaded("comments"));
}

#[tokio::test]
async fn test_unknown_morph_type_fails() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &comments(), &[1, 2]).await;
    owners[1].set("commentable_type", "audio");

    let mut relation = commentable();
    let error = load_relation(&ctx, &mut owners, "commentable", &mut relation).await.unwrap_err();
    assert!(matches!(error, RelationError::UnknownMorphType(ref name) if name == "audio"));
}

#[tokio::test]
async fn test_associate_and_dissociate() {
    let db = database().await;
    let ctx = context(&db);
    let mut comment = load(&ctx, &comments(), &[1]).await.remove(0);
    let video = load(&ctx, &videos(), &[2]).await.remove(0);
    let relation = commentable();

    relation.associate(&mut comment, &video, "commentable").unwrap();
    assert_eq!(comment.get("commentable_type"), Some(&DatabaseValue::from("video")));
    assert_eq!(comment.get("commentable_id").and_then(DatabaseValue::as_i64), Some(2));
    assert_eq!(text(comment.related_one("commentable").unwrap(), "title"), "demo");

    relation.dissociate(&mut comment, "commentable");
    assert!(comment.get("commentable_type").unwrap().is_null());
    assert!(comment.related_one("commentable").is_none());

    let unsaved = videos().new_record();
    assert!(matches!(
        relation.associate(&mut comment, &unsaved, "commentable"),
        Err(RelationError::MissingKey { .. })
    ));
}

#[tokio::test]
async fn test_morph_many_for_each_owner_type() {
    let db = database().await;
    let ctx = context(&db);

    let mut posts_loaded = load(&ctx, &posts(), &[1, 2, 3, 4]).await;
    let mut relation = MorphOneOrMany::morph_many(comments(), "commentable", "id");
    load_relation(&ctx, &mut posts_loaded, "comments", &mut relation).await.unwrap();
    assert_eq!(sorted_ids(posts_loaded[0].related_many("comments")), vec![1, 2, 3]);
    assert_eq!(sorted_ids(posts_loaded[1].related_many("comments")), vec![4, 5]);
    assert_eq!(sorted_ids(posts_loaded[2].related_many("comments")), vec![6]);
    assert!(posts_loaded[3].related_many("comments").is_empty());

    let mut videos_loaded = load(&ctx, &videos(), &[1, 2]).await;
    let mut relation = MorphOneOrMany::morph_many(comments(), "commentable", "id");
    load_relation(&ctx, &mut videos_loaded, "comments", &mut relation).await.unwrap();
    assert_eq!(sorted_ids(videos_loaded[0].related_many("comments")), vec![7]);
    assert_eq!(sorted_ids(videos_loaded[1].related_many("comments")), vec![8]);
}

#[tokio::test]
async fn test_morph_many_mixed_owners_match_by_type() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1]).await;
    owners.extend(load(&ctx, &videos(), &[1]).await);

    let mut relation = MorphOneOrMany::morph_many(comments(), "commentable", "id");
    load_relation(&ctx, &mut owners, "comments", &mut relation).await.unwrap();

    assert_eq!(sorted_ids(owners[0].related_many("comments")), vec![1, 2, 3]);
    assert_eq!(sorted_ids(owners[1].related_many("comments")), vec![7]);
}

#[tokio::test]
async fn test_morph_one_create_writes_type() {
    let db = database().await;
    let ctx = context(&db);
    let video = load(&ctx, &videos(), &[2]).await.remove(0);

    let relation = MorphOneOrMany::morph_one(comments(), "commentable", "id");
    let mut attributes = BTreeMap::new();
    attributes.insert("body".to_string(), DatabaseValue::from("c9"));
    let created = relation.create(&ctx, &video, attributes).await.unwrap();
    assert_eq!(created.get("commentable_type"), Some(&DatabaseValue::from("video")));

    let mut owners = vec![video];
    let mut relation = MorphOneOrMany::morph_many(comments(), "commentable", "id").order_by("comments.id");
    load_relation(&ctx, &mut owners, "comments", &mut relation).await.unwrap();
    let bodies: Vec<&str> = owners[0].related_many("comments").iter().map(|c| text(c, "body")).collect();
    assert_eq!(bodies, vec!["c8", "c9"]);
}

#[tokio::test]
async fn test_morph_to_many_matches_by_owner_type() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &posts(), &[1]).await;
    owners.extend(load(&ctx, &videos(), &[1, 2]).await);

    let mut relation = BelongsToMany::morph_to_many(tags(), "taggable", "taggables", "tag_id");
    load_relation(&ctx, &mut owners, "tags", &mut relation).await.unwrap();

    assert_eq!(ids(owners[0].related_many("tags")), vec![1]);
    assert_eq!(ids(owners[1].related_many("tags")), vec![2]);
    assert_eq!(ids(owners[2].related_many("tags")), vec![3]);
    let pivot = owners[1].related_many("tags")[0].pivot().unwrap();
    assert_eq!(pivot.get("taggable_type"), Some(&DatabaseValue::from("video")));
}

#[tokio::test]
async fn test_morphed_by_many_filters_related_type() {
    let db = database().await;
    let ctx = context(&db);
    let mut owners = load(&ctx, &tags(), &[1, 2, 3]).await;

    let mut relation = BelongsToMany::morphed_by_many(videos(), "taggable", "taggables", "tag_id");
    load_relation(&ctx, &mut owners, "videos", &mut relation).await.unwrap();

    assert!(owners[0].related_many("videos").is_empty());
    assert_eq!(ids(owners[1].related_many("videos")), vec![1]);
    assert_eq!(ids(owners[2].related_many("videos")), vec![2]);
}

#[tokio::test]
async fn test_morph_to_many_attach_writes_owner_type() {
    let db = database().await;
    let ctx = context(&db);
    let video = load(&ctx, &videos(), &[2]).await.remove(0);
    let post = load(&ctx, &posts(), &[2]).await.remove(0);
    let relation = BelongsToMany::morph_to_many(tags(), "taggable", "taggables", "tag_id");

    relation.attach(&ctx, &video, PivotRow::from_ids([4])).await.unwrap();
    assert!(relation.pivot_exists(&ctx, &video, 4).await.unwrap());
    // Same id, other owner type
    assert!(!relation.pivot_exists(&ctx, &post, 4).await.unwrap());

    let changes = relation.sync(&ctx, &video, PivotRow::from_ids([4])).await.unwrap();
    assert_eq!(changes.detached.iter().filter_map(DatabaseValue::as_i64).collect::<Vec<_>>(), vec![3]);

    let mut owners = vec![video];
    let mut loaded = BelongsToMany::morph_to_many(tags(), "taggable", "taggables", "tag_id");
    load_relation(&ctx, &mut owners, "tags", &mut loaded).await.unwrap();
    assert_eq!(ids(owners[0].related_many("tags")), vec![4]);
}
