use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue priority. Larger values are dequeued first.
pub type Priority = u32;

/// Unique identifier for an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an id from a raw 128-bit value (used for deterministic fixtures).
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The spatial facts about a changed entity that the scene layer hands over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub position: Vec3,
    /// Bounding-box extents; its length is the box diagonal.
    pub bounding_size: Vec3,
}

impl EntityState {
    pub fn new(position: Vec3, bounding_size: Vec3) -> Self {
        Self {
            position,
            bounding_size,
        }
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            bounding_size: Vec3::ONE,
        }
    }
}
