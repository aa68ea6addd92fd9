use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The scene camera, parsed from the scene manifest and broadcast to every
/// worker as the `SYNC_CAMERA` body. The coordinator never generates rays
/// from it; workers do.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Camera {
    pub position: [f32; 3],
    pub look_at: [f32; 3],
    #[serde(default = "default_up")]
    pub up: [f32; 3],
    /// Vertical field of view in degrees.
    #[serde(default = "default_vfov")]
    pub vfov: f32,
    /// Lens diameter; 0 disables depth of field.
    #[serde(default)]
    pub aperture: f32,
    /// Distance to the focus plane; 0 means focus on `look_at`.
    #[serde(default)]
    pub focal_distance: f32,
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_vfov() -> f32 {
    70.0
}
