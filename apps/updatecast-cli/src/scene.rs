use glam::Vec3;
use updatecast_common::EntityId;

/// A simulated object owned by one producer thread.
#[derive(Debug, Clone, Copy)]
pub struct SimEntity {
    pub id: EntityId,
    pub position: Vec3,
    pub bounding_size: Vec3,
}

/// Deterministic random source so a given seed always replays the same churn.
pub struct SceneRng {
    state: u64,
}

impl SceneRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = splitmix64(self.state);
        self.state
    }

    /// Uniform in `[lo, hi)`.
    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        lo + (hi - lo) * unit
    }
}

/// Spread `count` entities over a square of half-width `extent`, split
/// round-robin into `shards` groups (one per producer).
pub fn populate(count: usize, shards: usize, extent: f32, seed: u64) -> Vec<Vec<SimEntity>> {
    let shards = shards.max(1);
    let mut rng = SceneRng::new(seed);
    let mut out = vec![Vec::new(); shards];
    for i in 0..count {
        let entity = SimEntity {
            id: EntityId::from_u128(i as u128 + 1),
            position: Vec3::new(rng.range(-extent, extent), 0.0, rng.range(-extent, extent)),
            bounding_size: Vec3::splat(rng.range(0.25, 4.0)),
        };
        out[i % shards].push(entity);
    }
    out
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
