//! Relationship types and the machinery shared between them

pub mod belongs_to;
pub mod belongs_to_many;
pub mod contract;
pub mod dictionary;
pub mod has_many_through;
pub mod has_one_or_many;
pub mod morph_one_or_many;
pub mod morph_to;
pub mod pivot;
pub mod window;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, MorphToMany};
pub use contract::{Cardinality, Relation};
pub use dictionary::MatchKey;
pub use has_many_through::HasOneOrManyThrough;
pub use has_one_or_many::HasOneOrMany;
pub use morph_one_or_many::MorphOneOrMany;
pub use morph_to::MorphTo;
pub use pivot::{PivotConstraintSet, PivotRow, SyncChanges};
pub use window::WindowPlan;
