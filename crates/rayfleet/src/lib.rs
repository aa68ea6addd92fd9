pub mod assets;
pub mod camera;
pub mod config;
pub mod film;
pub mod library;
pub mod math;
pub mod mesh;
pub mod net;
pub mod spatial;
pub mod stats;
pub mod wbvh;

/// Mesh ids are dense, start at 1 and never repeat within a run. Id 0 is
/// reserved and means "no mesh".
pub type MeshId = u32;

/// Worker ids are assigned at startup from the order of the config's worker
/// list, starting at 1. Id 0 is reserved and means "no worker".
pub type WorkerId = u32;
