//! The registry owning everything a render needs: configuration, camera,
//! the final film, asset and mesh tables, worker records and the spatial
//! index. Single-threaded except for the mesh id allocator, which the
//! scene parsing job shares.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::assets::{Material, Shader, Texture};
use crate::camera::Camera;
use crate::config::Config;
use crate::film::Film;
use crate::mesh::Mesh;
use crate::net::node::WorkerNode;
use crate::spatial::{space_encode, SpatialIndex};
use crate::{MeshId, WorkerId};

/// Dense id-indexed storage. Slot 0 exists and is permanently vacant, so
/// id 0 can mean "none" everywhere.
#[derive(Debug)]
pub struct Table<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            slots: vec![None],
        }
    }
}

impl<T> Table<T> {
    /// Assign slot `id`, growing the table as needed. `None` vacates the
    /// slot and drops any previous occupant; later ids never shift.
    pub fn store(&mut self, id: u32, value: Option<T>) {
        assert!(id != 0, "id 0 is reserved");
        let id = id as usize;
        if id >= self.slots.len() {
            self.slots.resize_with(id + 1, || None);
        }
        self.slots[id] = value;
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn take(&mut self, id: u32) -> Option<T> {
        self.slots.get_mut(id as usize).and_then(Option::take)
    }

    /// Occupied slots only.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|v| (id as u32, v)))
    }

    pub fn ids(&self) -> Vec<u32> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Monotonic mesh id allocator starting at 1. Cloneable so the scene
/// parsing job can assign ids off-thread; this is the only piece of the
/// registry that crosses threads.
#[derive(Debug, Clone)]
pub struct MeshIdAlloc(Arc<AtomicU32>);

impl Default for MeshIdAlloc {
    fn default() -> Self {
        Self(Arc::new(AtomicU32::new(1)))
    }
}

impl MeshIdAlloc {
    pub fn next(&self) -> MeshId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Library {
    config: Config,
    camera: Option<Camera>,
    film: Option<Film>,
    workers: Table<WorkerNode>,
    meshes: Table<Mesh>,
    materials: Table<Material>,
    textures: Table<Texture>,
    shaders: Table<Shader>,
    material_names: HashMap<String, u32>,
    emissive: Vec<MeshId>,
    spatial: Option<SpatialIndex>,
    mesh_ids: MeshIdAlloc,
}

impl Library {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            camera: None,
            film: None,
            workers: Table::default(),
            meshes: Table::default(),
            materials: Table::default(),
            textures: Table::default(),
            shaders: Table::default(),
            material_names: HashMap::new(),
            emissive: Vec::new(),
            spatial: None,
            mesh_ids: MeshIdAlloc::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn store_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    pub fn film(&self) -> Option<&Film> {
        self.film.as_ref()
    }

    pub fn film_mut(&mut self) -> Option<&mut Film> {
        self.film.as_mut()
    }

    pub fn store_film(&mut self, film: Film) {
        self.film = Some(film);
    }

    // Workers

    pub fn store_worker(&mut self, id: WorkerId, worker: WorkerNode) {
        self.workers.store(id, Some(worker));
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerNode> {
        self.workers.get(id)
    }

    pub fn worker_mut(&mut self, id: WorkerId) -> Option<&mut WorkerNode> {
        self.workers.get_mut(id)
    }

    pub fn take_worker(&mut self, id: WorkerId) -> Option<WorkerNode> {
        self.workers.take(id)
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.ids()
    }

    pub fn workers(&self) -> impl Iterator<Item = (WorkerId, &WorkerNode)> {
        self.workers.iter()
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count()
    }

    // Meshes

    pub fn mesh_ids(&self) -> MeshIdAlloc {
        self.mesh_ids.clone()
    }

    /// Store a mesh under `id`; emissive meshes are also remembered in the
    /// light list. `store_mesh(id, None)` frees the geometry while keeping
    /// the id reserved.
    pub fn store_mesh(&mut self, id: MeshId, mesh: Option<Mesh>) {
        if let Some(mesh) = &mesh {
            let emissive = self
                .materials
                .get(mesh.material)
                .is_some_and(Material::is_emissive);
            if emissive {
                self.emissive.push(id);
            }
        }
        self.meshes.store(id, mesh);
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id)
    }

    pub fn take_mesh(&mut self, id: MeshId) -> Option<Mesh> {
        self.meshes.take(id)
    }

    /// Ids of meshes whose material is emissive, in arrival order.
    pub fn emissive_meshes(&self) -> &[MeshId] {
        &self.emissive
    }

    // Shading assets

    pub fn store_material(&mut self, id: u32, material: Option<Material>) {
        if let Some(material) = &material {
            self.material_names.insert(material.name.clone(), id);
        }
        self.materials.store(id, material);
    }

    pub fn material(&self, id: u32) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn materials(&self) -> impl Iterator<Item = (u32, &Material)> {
        self.materials.iter()
    }

    pub fn material_id(&self, name: &str) -> Option<u32> {
        self.material_names.get(name).copied()
    }

    pub fn store_texture(&mut self, id: u32, texture: Option<Texture>) {
        self.textures.store(id, texture);
    }

    pub fn textures(&self) -> impl Iterator<Item = (u32, &Texture)> {
        self.textures.iter()
    }

    pub fn store_shader(&mut self, id: u32, shader: Option<Shader>) {
        self.shaders.store(id, shader);
    }

    pub fn shaders(&self) -> impl Iterator<Item = (u32, &Shader)> {
        self.shaders.iter()
    }

    // Spatial index

    pub fn build_spatial_index(&mut self) {
        self.spatial = Some(SpatialIndex::build(self.config.worker_count()));
    }

    /// The worker owning `spacecode`. Panics if called before
    /// `build_spatial_index`; streaming never starts earlier.
    pub fn worker_by_spacecode(&self, spacecode: u64) -> WorkerId {
        self.spatial
            .as_ref()
            .expect("spatial index built before streaming")
            .lookup(spacecode)
    }

    /// Spacecode of a mesh centroid within the configured scene bounds.
    pub fn spacecode_of(&self, mesh: &Mesh) -> u64 {
        space_encode(
            mesh.centroid(),
            self.config.scene_min(),
            self.config.scene_max(),
        )
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;

    fn test_config() -> Config {
        serde_json::from_str(
            r#"{
                "name": "test",
                "width": 64,
                "height": 64,
                "workers": ["a", "b"],
                "min": [-1, -1, -1],
                "max": [1, 1, 1]
            }"#,
        )
        .unwrap()
    }

    fn flat_mesh(material: u32) -> Mesh {
        Mesh::new(
            material,
            Mat4::IDENTITY,
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn table_assigns_by_index() {
        let mut table = Table::default();
        table.store(3, Some("c"));
        table.store(1, Some("a"));
        assert_eq!(table.get(1), Some(&"a"));
        assert_eq!(table.get(2), None);
        assert_eq!(table.get(3), Some(&"c"));

        // Restoring replaces in place, it never shifts neighbours.
        table.store(1, Some("a2"));
        assert_eq!(table.get(1), Some(&"a2"));
        assert_eq!(table.get(3), Some(&"c"));

        table.store(1, None);
        assert_eq!(table.get(1), None);
        assert_eq!(table.ids(), vec![3]);
    }

    #[test]
    #[should_panic]
    fn id_zero_is_reserved() {
        let mut table: Table<u8> = Table::default();
        table.store(0, Some(1));
    }

    #[test]
    fn mesh_ids_are_monotonic_from_one() {
        let lib = Library::new(test_config());
        let ids = lib.mesh_ids();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        // Clones share the counter.
        assert_eq!(lib.mesh_ids().next(), 3);
    }

    #[test]
    fn emissive_meshes_are_tracked_on_store() {
        let mut lib = Library::new(test_config());
        lib.store_material(
            1,
            Some(Material {
                name: "lamp".into(),
                albedo: [1.0; 3],
                emissive: [5.0, 5.0, 5.0],
                texture: None,
                shader: None,
            }),
        );
        lib.store_material(
            2,
            Some(Material {
                name: "wall".into(),
                albedo: [0.5; 3],
                emissive: [0.0; 3],
                texture: None,
                shader: None,
            }),
        );

        lib.store_mesh(1, Some(flat_mesh(1)));
        lib.store_mesh(2, Some(flat_mesh(2)));
        assert_eq!(lib.emissive_meshes(), [1]);

        // Dropping the geometry keeps the light list intact.
        lib.store_mesh(1, None);
        assert!(lib.mesh(1).is_none());
        assert_eq!(lib.emissive_meshes(), [1]);

        assert_eq!(lib.material_id("lamp"), Some(1));
        assert_eq!(lib.material_id("nope"), None);
    }
}
