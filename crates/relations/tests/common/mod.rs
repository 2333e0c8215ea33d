//! Shared fixtures: an in-memory SQLite database with a small blog schema,
//! behind a connection that records every statement it runs.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use elif_relations::backends::Grammar;
use elif_relations::{
    DatabaseConnection, DatabaseTransaction, DatabaseValue, ModelDescriptor, MorphMap, OrmResult, Record,
    RelationContext, RelationError, RelationsConfig, Row, SchemaCache, SqliteConnection,
};

/// Connection decorator recording statements run outside transactions
pub struct RecordingConnection {
    inner: SqliteConnection,
    grammar: Grammar,
    statements: Mutex<Vec<String>>,
    /// Statements containing this fragment fail after being recorded
    failing: Mutex<Option<String>>,
}

impl RecordingConnection {
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().unwrap().clear();
    }

    /// Number of recorded statements containing `fragment`
    pub fn count_matching(&self, fragment: &str) -> usize {
        self.statements().iter().filter(|sql| sql.contains(fragment)).count()
    }

    /// Make every later statement containing `fragment` fail
    pub fn fail_on(&self, fragment: &str) {
        *self.failing.lock().unwrap() = Some(fragment.to_string());
    }

    fn record(&self, sql: &str) -> OrmResult<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        match self.failing.lock().unwrap().as_deref() {
            Some(fragment) if sql.contains(fragment) => Err(RelationError::Database(format!("refused: {sql}"))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DatabaseConnection for RecordingConnection {
    async fn select(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        self.record(sql)?;
        self.inner.select(sql, bindings).await
    }

    async fn execute(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<u64> {
        self.record(sql)?;
        self.inner.execute(sql, bindings).await
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.inner.begin_transaction().await
    }

    fn grammar(&self) -> &Grammar {
        &self.grammar
    }
}

const SCHEMA: &[&str] = &[
    "create table countries (id integer primary key, name text not null)",
    "create table users (id integer primary key, country_id integer, name text not null)",
    "create table posts (id integer primary key, user_id integer, title text not null)",
    "create table videos (id integer primary key, title text not null, url text)",
    "create table comments (id integer primary key, post_id integer, body text not null, \
     commentable_type text, commentable_id integer)",
    "create table tags (id integer primary key, name text not null)",
    "create table post_tag (post_id integer not null, tag_id integer not null, role text, meta text, \
     created_at text, updated_at text)",
    "create table taggables (tag_id integer not null, taggable_id integer not null, taggable_type text not null)",
];

const SEED: &[&str] = &[
    "insert into countries (id, name) values (1, 'NL'), (2, 'BE')",
    "insert into users (id, country_id, name) values (1, 1, 'ana'), (2, 1, 'bo'), (3, 2, 'cy')",
    "insert into posts (id, user_id, title) values (1, 1, 'first'), (2, 1, 'second'), (3, 2, 'third'), (4, 3, 'fourth')",
    "insert into videos (id, title, url) values (1, 'intro', 'https://example.test/1'), (2, 'demo', null)",
    "insert into comments (id, post_id, body, commentable_type, commentable_id) values \
     (1, 1, 'c1', 'post', 1), (2, 1, 'c2', 'post', 1), (3, 1, 'c3', 'post', 1), \
     (4, 2, 'c4', 'post', 2), (5, 2, 'c5', 'post', 2), (6, 3, 'c6', 'post', 3), \
     (7, null, 'c7', 'video', 1), (8, null, 'c8', 'video', 2)",
    "insert into tags (id, name) values (1, 'rust'), (2, 'sql'), (3, 'orm'), (4, 'async'), (5, 'misc')",
    "insert into post_tag (post_id, tag_id, role, meta) values \
     (1, 1, 'admin', '{\"labels\": [\"a\", \"b\"]}'), (1, 2, 'viewer', '{\"labels\": []}'), \
     (2, 1, 'viewer', null), (3, 3, 'admin', null)",
    "insert into taggables (tag_id, taggable_id, taggable_type) values (1, 1, 'post'), (2, 1, 'video'), (3, 2, 'video')",
];

pub async fn database() -> Arc<RecordingConnection> {
    database_with_grammar(Grammar::sqlite()).await
}

/// Seeded database whose grammar can disable features
pub async fn database_with_grammar(grammar: Grammar) -> Arc<RecordingConnection> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let inner = SqliteConnection::in_memory().await.unwrap();
    for statement in SCHEMA.iter().chain(SEED) {
        inner.execute(statement, &[]).await.unwrap();
    }

    Arc::new(RecordingConnection {
        inner,
        grammar,
        statements: Mutex::new(Vec::new()),
        failing: Mutex::new(None),
    })
}

/// Context with its own schema cache, so tests do not share cached columns
pub fn context(connection: &Arc<RecordingConnection>) -> RelationContext {
    context_with_config(connection, RelationsConfig::default())
}

pub fn context_with_config(connection: &Arc<RecordingConnection>, config: RelationsConfig) -> RelationContext {
    let connection: Arc<dyn DatabaseConnection> = connection.clone();
    RelationContext::new(connection)
        .with_schema_cache(Arc::new(SchemaCache::default()))
        .with_config(config)
}

pub fn posts() -> ModelDescriptor {
    ModelDescriptor::new("posts").with_morph_class("post")
}

pub fn videos() -> ModelDescriptor {
    ModelDescriptor::new("videos").with_morph_class("video")
}

pub fn comments() -> ModelDescriptor {
    ModelDescriptor::new("comments")
}

pub fn tags() -> ModelDescriptor {
    ModelDescriptor::new("tags")
}

pub fn users() -> ModelDescriptor {
    ModelDescriptor::new("users")
}

pub fn countries() -> ModelDescriptor {
    ModelDescriptor::new("countries")
}

pub fn morph_map() -> Arc<MorphMap> {
    Arc::new(MorphMap::new().register(posts()).register(videos()))
}

/// Load `table` rows with the given ids, in id order
pub async fn load(ctx: &RelationContext, descriptor: &ModelDescriptor, ids: &[i64]) -> Vec<Record> {
    use elif_relations::{QueryBuilder, QueryMethods};

    let query = QueryBuilder::table(descriptor.table())
        .where_in(&descriptor.qualified_key(), ids.iter().copied())
        .order_by(&descriptor.qualified_key());
    query.get(ctx.connection(), descriptor).await.unwrap()
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .map(|record| record.get("id").and_then(DatabaseValue::as_i64).unwrap())
        .collect()
}

pub fn text<'a>(record: &'a Record, column: &str) -> &'a str {
    record.get(column).and_then(DatabaseValue::as_str).unwrap()
}
