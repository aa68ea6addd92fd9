//! Shading assets: unlike meshes these are broadcast to every worker
//! during configuration, never spatially partitioned.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Material {
    pub name: String,
    #[serde(default = "default_albedo")]
    pub albedo: [f32; 3],
    #[serde(default)]
    pub emissive: [f32; 3],
    /// Optional albedo texture id.
    #[serde(default)]
    pub texture: Option<u32>,
    /// Optional shader id; workers fall back to their built-in diffuse.
    #[serde(default)]
    pub shader: Option<u32>,
}

fn default_albedo() -> [f32; 3] {
    [0.8, 0.8, 0.8]
}

impl Material {
    /// Emissive meshes end up in the light list synced to every worker.
    pub fn is_emissive(&self) -> bool {
        self.emissive.iter().any(|&c| c > 0.0)
    }
}

/// An RGB float texture, fully decoded; workers receive the raw texels.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub texels: Vec<f32>,
}

/// A worker-side shader program, shipped as source.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Shader {
    pub name: String,
    pub source: String,
}
