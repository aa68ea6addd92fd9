use bincode::{Decode, Encode};
use glam::Vec3;

/// Axis aligned bounding box.
///
/// Workers report one of these after building their local BVH, and the WBVH
/// is built over them, so `Bounds` has a fixed 24-byte wire form next to its
/// in-memory one.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Size of the on-wire encoding: six little-endian f32s.
pub const BOUNDS_WIRE_SIZE: usize = 24;

impl Bounds {
    /// An empty box that unions as the identity.
    pub const EMPTY: Bounds = Bounds {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.to_array(),
            max: max.to_array(),
        }
    }

    pub fn min(&self) -> Vec3 {
        Vec3::from_array(self.min)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::from_array(self.max)
    }

    /// Grow to contain `point`.
    pub fn grow(&mut self, point: Vec3) {
        *self = Self::new(self.min().min(point), self.max().max(point));
    }

    pub fn union(self, other: Bounds) -> Bounds {
        Self::new(self.min().min(other.min()), self.max().max(other.max()))
    }

    pub fn centroid(&self) -> Vec3 {
        (self.min() + self.max()) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max() - self.min()
    }

    pub fn to_le_bytes(&self) -> [u8; BOUNDS_WIRE_SIZE] {
        let mut out = [0u8; BOUNDS_WIRE_SIZE];
        for (slot, v) in out
            .chunks_exact_mut(4)
            .zip(self.min.iter().chain(self.max.iter()))
        {
            slot.copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode from the wire form. `bytes` must be exactly
    /// [`BOUNDS_WIRE_SIZE`] long.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BOUNDS_WIRE_SIZE {
            return None;
        }
        let mut vals = [0f32; 6];
        for (v, chunk) in vals.iter_mut().zip(bytes.chunks_exact(4)) {
            *v = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Some(Self {
            min: [vals[0], vals[1], vals[2]],
            max: [vals[3], vals[4], vals[5]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_grow() {
        let mut b = Bounds::EMPTY;
        b.grow(Vec3::new(1.0, -2.0, 3.0));
        b.grow(Vec3::new(-1.0, 2.0, 0.0));
        assert_eq!(b.min(), Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.max(), Vec3::new(1.0, 2.0, 3.0));

        let c = b.union(Bounds::new(Vec3::splat(-5.0), Vec3::splat(-4.0)));
        assert_eq!(c.min(), Vec3::splat(-5.0));
        assert_eq!(c.max(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn wire_roundtrip() {
        let b = Bounds::new(Vec3::new(-1.5, 0.0, 2.25), Vec3::new(4.0, 8.0, 16.0));
        let bytes = b.to_le_bytes();
        assert_eq!(bytes.len(), BOUNDS_WIRE_SIZE);
        assert_eq!(Bounds::from_le_bytes(&bytes), Some(b));
        assert_eq!(Bounds::from_le_bytes(&bytes[..23]), None);
    }
}
