//! Entity instances, their identity state and capabilities.

mod arena;
mod entity_type;
mod fetch_group;
mod instance;
mod state;
mod tracking;

pub use arena::EntityArena;
pub use entity_type::{Capabilities, EntityType, EntityTypeBuilder, SoftDeletion};
pub use fetch_group::{FetchGroup, FetchGroupKind};
pub use instance::{Entity, EntityId};
pub use state::EntityState;
pub use tracking::{AttributeChange, AttributeChangeListener};
