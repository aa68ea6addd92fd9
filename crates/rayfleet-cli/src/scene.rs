//! Scene loading.
//!
//! A scene is a JSON manifest declaring the camera, shading assets and a
//! list of OBJ objects. The cheap parts (camera, materials, textures,
//! shaders) install into the registry at startup; the geometry is streamed
//! later, one mesh at a time, from the worker pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glam::{Mat4, Quat, Vec3};
use rayfleet::assets::{Material, Shader, Texture};
use rayfleet::camera::Camera;
use rayfleet::library::Library;
use rayfleet::mesh::Mesh;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SceneManifest {
    pub camera: Camera,
    #[serde(default)]
    pub materials: Vec<MaterialDecl>,
    #[serde(default)]
    pub shaders: Vec<ShaderDecl>,
    pub objects: Vec<ObjectDecl>,
}

#[derive(Debug, Deserialize)]
pub struct MaterialDecl {
    pub name: String,
    #[serde(default = "default_albedo")]
    pub albedo: [f32; 3],
    #[serde(default)]
    pub emissive: [f32; 3],
    /// Optional albedo texture image, relative to the manifest.
    #[serde(default)]
    pub texture: Option<PathBuf>,
    /// Optional shader name from the `shaders` section.
    #[serde(default)]
    pub shader: Option<String>,
}

fn default_albedo() -> [f32; 3] {
    [0.8, 0.8, 0.8]
}

#[derive(Debug, Deserialize)]
pub struct ShaderDecl {
    pub name: String,
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ObjectDecl {
    /// OBJ file, relative to the manifest.
    pub mesh: PathBuf,
    pub material: String,
    #[serde(default)]
    pub translate: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Yaw around +Y, degrees.
    #[serde(default)]
    pub rotate_y: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl ObjectDecl {
    fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            Quat::from_rotation_y(self.rotate_y.to_radians()),
            Vec3::from_array(self.translate),
        )
    }
}

pub struct Scene {
    manifest: SceneManifest,
    dir: PathBuf,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading scene from {}.", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't open scene file {}", path.display()))?;
        let manifest: SceneManifest = serde_json::from_str(&text)
            .with_context(|| format!("can't parse scene file {}", path.display()))?;
        Ok(Self {
            manifest,
            dir: path.parent().unwrap_or(Path::new(".")).to_owned(),
        })
    }

    pub fn from_manifest(manifest: SceneManifest, dir: PathBuf) -> Self {
        Self { manifest, dir }
    }

    /// Install the camera and every shading asset into the registry and
    /// return the material name table the geometry stream resolves
    /// against. Cheap; runs on the event-loop thread before any worker is
    /// contacted.
    pub fn install_prelude(&self, lib: &mut Library) -> Result<HashMap<String, u32>> {
        lib.store_camera(self.manifest.camera.clone());

        let mut shader_ids = HashMap::new();
        for (i, decl) in self.manifest.shaders.iter().enumerate() {
            let id = i as u32 + 1;
            let path = self.dir.join(&decl.file);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("can't read shader {}", path.display()))?;
            shader_ids.insert(decl.name.clone(), id);
            lib.store_shader(
                id,
                Some(Shader {
                    name: decl.name.clone(),
                    source,
                }),
            );
        }

        let mut material_ids = HashMap::new();
        let mut next_texture = 1u32;
        for (i, decl) in self.manifest.materials.iter().enumerate() {
            let id = i as u32 + 1;
            let texture = match &decl.texture {
                Some(file) => {
                    let texture_id = next_texture;
                    next_texture += 1;
                    lib.store_texture(texture_id, Some(load_texture(&self.dir.join(file))?));
                    Some(texture_id)
                }
                None => None,
            };
            let shader = match &decl.shader {
                Some(name) => Some(*shader_ids.get(name).with_context(|| {
                    format!("material {:?} references unknown shader {name:?}", decl.name)
                })?),
                None => None,
            };
            material_ids.insert(decl.name.clone(), id);
            lib.store_material(
                id,
                Some(Material {
                    name: decl.name.clone(),
                    albedo: decl.albedo,
                    emissive: decl.emissive,
                    texture,
                    shader,
                }),
            );
        }

        for object in &self.manifest.objects {
            if !material_ids.contains_key(&object.material) {
                bail!(
                    "object {} references unknown material {:?}",
                    object.mesh.display(),
                    object.material
                );
            }
        }

        Ok(material_ids)
    }

    /// Parse the geometry and feed it through `sink`, one mesh at a time.
    /// CPU-bound; meant to run on the worker pool while the event loop
    /// ships each mesh out.
    pub fn stream_meshes(
        &self,
        material_ids: &HashMap<String, u32>,
        sink: &mut dyn FnMut(Mesh) -> Result<u32>,
    ) -> Result<()> {
        for object in &self.manifest.objects {
            let material = material_ids[&object.material];
            let path = self.dir.join(&object.mesh);

            let mut options = tobj::GPU_LOAD_OPTIONS;
            options.single_index = true;
            let (models, _materials) = tobj::load_obj(&path, &options)
                .with_context(|| format!("can't load mesh {}", path.display()))?;
            if models.is_empty() {
                bail!("mesh {} contains no geometry", path.display());
            }

            for model in models {
                log::debug!("Loaded model {} from {}.", model.name, path.display());
                let tobj::Mesh {
                    positions, indices, ..
                } = model.mesh;
                if positions.len() % 3 != 0 || indices.len() % 3 != 0 {
                    bail!("mesh {} has a malformed vertex stream", path.display());
                }
                let vertices = bytemuck::cast_slice::<f32, [f32; 3]>(&positions).to_vec();
                let faces = bytemuck::cast_slice::<u32, [u32; 3]>(&indices).to_vec();
                let id = sink(Mesh::new(material, object.transform(), vertices, faces))?;
                log::trace!("Streamed mesh {id}.");
            }
        }
        Ok(())
    }
}

fn load_texture(path: &Path) -> Result<Texture> {
    let image = image::open(path)
        .with_context(|| format!("can't load texture {}", path.display()))?
        .into_rgb32f();
    Ok(Texture {
        name: path.display().to_string(),
        width: image.width(),
        height: image.height(),
        texels: image.into_raw(),
    })
}
