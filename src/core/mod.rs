// Core types and primitives

pub mod canonical_json;
pub mod slug;
pub mod strong_types;

pub use strong_types::{EntityId, EntityKind, IdOrSlug, UserId};
