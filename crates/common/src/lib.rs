//! Shared types: entity identity and the spatial facts the scheduler ranks by.

mod types;

pub use types::{EntityId, EntityState, Priority};

pub fn crate_info() -> &'static str {
    "updatecast-common v0.1.0"
}
