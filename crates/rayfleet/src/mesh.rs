use bincode::{Decode, Encode};
use glam::{Mat4, Vec3};

use crate::math::bounds::Bounds;
use crate::MeshId;

/// One triangle mesh, exactly as it travels to its owning worker in a
/// `SYNC_MESH` body. Vertices stay in object space; workers apply the
/// transform themselves and need the inverse for ray transformation.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Mesh {
    pub id: MeshId,
    pub material: u32,
    /// Column-major object-to-world matrix.
    pub transform: [f32; 16],
    pub transform_inv: [f32; 16],
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// The id is assigned later, when the streaming pipeline hands the
    /// mesh over to the registry.
    pub fn new(
        material: u32,
        transform: Mat4,
        vertices: Vec<[f32; 3]>,
        faces: Vec<[u32; 3]>,
    ) -> Self {
        Self {
            id: 0,
            material,
            transform: transform.to_cols_array(),
            transform_inv: transform.inverse().to_cols_array(),
            vertices,
            faces,
        }
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array(&self.transform)
    }

    /// World-space bounds of the transformed vertices.
    pub fn bounds(&self) -> Bounds {
        let transform = self.transform();
        let mut bounds = Bounds::EMPTY;
        for v in &self.vertices {
            bounds.grow(transform.transform_point3(Vec3::from_array(*v)));
        }
        bounds
    }

    /// The centroid that drives spatial assignment: center of the
    /// world-space bounds.
    pub fn centroid(&self) -> Vec3 {
        self.bounds().centroid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_follows_the_transform() {
        let mesh = Mesh::new(
            1,
            Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            vec![[-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]],
            vec![],
        );
        assert_eq!(mesh.centroid(), Vec3::new(10.0, 0.0, 0.0));

        let bounds = mesh.bounds();
        assert_eq!(bounds.min(), Vec3::new(9.0, -1.0, -1.0));
        assert_eq!(bounds.max(), Vec3::new(11.0, 1.0, 1.0));
    }
}
