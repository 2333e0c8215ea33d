//! Relation loading - lazy and eager resolution onto owner records

pub mod eager_loader;

pub use eager_loader::{load_relation, EagerLoader};
