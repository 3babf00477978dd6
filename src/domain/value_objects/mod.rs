//! Value objects - Immutable objects defined by their attributes

mod entity_type;
mod ids;

pub use entity_type::EntityType;
pub use ids::*;
