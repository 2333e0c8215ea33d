//! Schema introspection

pub mod cache;

pub use cache::SchemaCache;
