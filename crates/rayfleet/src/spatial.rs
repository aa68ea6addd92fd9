//! Spatial assignment of meshes to workers.
//!
//! Every mesh centroid is quantized into a 63-bit Morton code (21 bits per
//! axis, interleaved x/y/z) within the configured scene bounds. The code
//! range is cut into equal chunks, one per worker, and the chunks are dealt
//! to workers in shuffled order so neighbouring regions of space do not all
//! land on the same host.

use glam::Vec3;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::WorkerId;

const AXIS_BITS: u32 = 21;

/// Largest possible spacecode: 63 bits, all set.
pub const SPACECODE_MAX: u64 = (1 << (3 * AXIS_BITS)) - 1;

fn quantize(v: f32, lo: f32, hi: f32) -> u64 {
    let t = if hi > lo {
        ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let max = (1u64 << AXIS_BITS) - 1;
    (t as f64 * max as f64) as u64
}

/// Spread the low 21 bits of `v` out so two zero bits follow each.
fn spread(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | x << 32) & 0x1f00000000ffff;
    x = (x | x << 16) & 0x1f0000ff0000ff;
    x = (x | x << 8) & 0x100f00f00f00f00f;
    x = (x | x << 4) & 0x10c30c30c30c30c3;
    x = (x | x << 2) & 0x1249249249249249;
    x
}

/// Morton-encode `point` within the scene bounds `[min, max]`. Points
/// outside the bounds are clamped onto them.
pub fn space_encode(point: Vec3, min: Vec3, max: Vec3) -> u64 {
    let qx = quantize(point.x, min.x, max.x);
    let qy = quantize(point.y, min.y, max.y);
    let qz = quantize(point.z, min.z, max.z);
    spread(qx) | spread(qy) << 1 | spread(qz) << 2
}

/// Maps spacecodes to owning workers.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    slots: Vec<WorkerId>,
    chunk_size: u64,
}

impl SpatialIndex {
    pub fn build(worker_count: usize) -> Self {
        Self::build_with(worker_count, &mut rand::thread_rng())
    }

    pub fn build_with(worker_count: usize, rng: &mut impl Rng) -> Self {
        assert!(worker_count > 0);
        let mut slots: Vec<WorkerId> = (1..=worker_count as WorkerId).collect();
        slots.shuffle(rng);

        // ceil((SPACECODE_MAX + 1) / workers) + 1; the +1 keeps the last
        // slot index strictly below worker_count.
        let chunk_size = (SPACECODE_MAX + 1).div_ceil(worker_count as u64) + 1;

        Self { slots, chunk_size }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The worker owning `spacecode`. Total: every code in
    /// `[0, SPACECODE_MAX]` has an owner.
    pub fn lookup(&self, spacecode: u64) -> WorkerId {
        self.slots[(spacecode / self.chunk_size) as usize]
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn encode_hits_the_corners() {
        let min = Vec3::splat(-10.0);
        let max = Vec3::splat(10.0);
        assert_eq!(space_encode(min, min, max), 0);
        assert_eq!(space_encode(max, min, max), SPACECODE_MAX);
        // Clamped, not wrapped.
        assert_eq!(space_encode(Vec3::splat(-999.0), min, max), 0);
        assert_eq!(space_encode(Vec3::splat(999.0), min, max), SPACECODE_MAX);
    }

    #[test]
    fn encode_orders_along_an_axis() {
        let min = Vec3::ZERO;
        let max = Vec3::splat(1.0);
        let a = space_encode(Vec3::new(0.1, 0.0, 0.0), min, max);
        let b = space_encode(Vec3::new(0.9, 0.0, 0.0), min, max);
        assert!(a < b);
    }

    #[test]
    fn every_spacecode_has_an_owner() {
        let mut rng = StdRng::seed_from_u64(7);
        for workers in [1usize, 2, 3, 5, 8, 64, 509] {
            let index = SpatialIndex::build_with(workers, &mut rng);
            for code in [
                0,
                1,
                index.chunk_size() - 1,
                index.chunk_size(),
                SPACECODE_MAX / 2,
                SPACECODE_MAX - 1,
                SPACECODE_MAX,
            ] {
                let id = index.lookup(code);
                assert!(
                    (1..=workers as WorkerId).contains(&id),
                    "code {code} mapped to {id} with {workers} workers"
                );
            }
        }
    }

    #[test]
    fn two_workers_split_the_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let index = SpatialIndex::build_with(2, &mut rng);
        let lo = index.lookup(0);
        let hi = index.lookup(SPACECODE_MAX);
        assert_ne!(lo, hi);
    }
}
