//! # elif-relations: Relationship resolution for elif.rs
//!
//! Resolves relations between already-loaded records without issuing one
//! query per owner: eager loads are batched into a single IN query and the
//! results are matched back by key.
//!
//! Supported topologies are has-one/has-many, belongs-to, has-one/many
//! through an intermediate table, many-to-many through a pivot table, and the
//! polymorphic variants of each. Per-owner limits are planned with window
//! functions, and pivot writes (attach, detach, sync, toggle) run in a
//! single transaction.
//!
//! ```no_run
//! use std::sync::Arc;
//! use elif_relations::{EagerLoader, HasOneOrMany, ModelDescriptor, QueryMethods, RelationContext, SqliteConnection};
//!
//! # async fn run() -> elif_relations::OrmResult<()> {
//! let ctx = RelationContext::new(Arc::new(SqliteConnection::connect("sqlite://app.db", 5).await?));
//! let posts = ModelDescriptor::new("posts");
//! let mut records = posts.hydrate(ctx.select(&elif_relations::QueryBuilder::table("posts")).await?);
//!
//! let latest = HasOneOrMany::has_many(ModelDescriptor::new("comments"), "post_id", "id")
//!     .order_by_desc("id")
//!     .limit(3);
//! EagerLoader::new().with("comments", latest).load(&ctx, &mut records).await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod context;
pub mod error;
pub mod loading;
pub mod model;
pub mod query;
pub mod relationships;
pub mod schema;

pub use backends::{
    DatabaseBackendType, DatabaseConnection, DatabaseTransaction, DatabaseValue, Grammar, PostgresConnection, Row,
    SqliteConnection,
};
pub use config::{RelationsConfig, RelationsDefaults};
pub use context::{Page, RelationContext};
pub use error::{OrmResult, RelationError};
pub use loading::{load_relation, EagerLoader};
pub use model::{Model, ModelDescriptor, MorphMap, Pivot, Record, RelationValue};
pub use query::{QueryBuilder, QueryMethods};
pub use relationships::*;
pub use schema::SchemaCache;
