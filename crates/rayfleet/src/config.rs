use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bincode::{Decode, Encode};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Render configuration, loaded from a JSON file at startup and shipped to
/// every worker verbatim as the `SYNC_CONFIG` body.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Config {
    /// Base name of the render; output files are derived from it.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Worker addresses, `host[:port]`. Worker ids are positions in this
    /// list, starting at 1.
    pub workers: Vec<String>,
    /// Scene bounds used for spatial mesh assignment.
    pub min: [f32; 3],
    pub max: [f32; 3],
    /// Progress delta beyond the slowest worker that counts as a runaway.
    #[serde(default = "default_runaway")]
    pub runaway: f32,
    /// Film buffers every worker renders and the coordinator merges.
    #[serde(default = "default_buffers")]
    pub buffers: Vec<String>,
    #[serde(default = "default_samples")]
    pub samples: u32,
    #[serde(default = "default_max_bounces")]
    pub max_bounces: u32,
}

fn default_runaway() -> f32 {
    0.2
}

fn default_buffers() -> Vec<String> {
    vec!["color".to_owned()]
}

fn default_samples() -> u32 {
    32
}

fn default_max_bounces() -> u32 {
    64
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("can't open config file {}", path.display()))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("can't parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            bail!("config declares no workers");
        }
        if self.width == 0 || self.height == 0 {
            bail!("config has a degenerate image size {}x{}", self.width, self.height);
        }
        if self.width < self.workers.len() as u32 {
            bail!(
                "image width {} is narrower than the worker count {}",
                self.width,
                self.workers.len()
            );
        }
        if self.runaway < 0.0 {
            bail!("runaway delta must be non-negative, got {}", self.runaway);
        }
        let (min, max) = (self.scene_min(), self.scene_max());
        if !(min.x < max.x && min.y < max.y && min.z < max.z) {
            bail!("scene bounds are empty: min {min:?}, max {max:?}");
        }
        if self.buffers.is_empty() {
            bail!("config declares no film buffers");
        }
        Ok(())
    }

    pub fn scene_min(&self) -> Vec3 {
        Vec3::from_array(self.min)
    }

    pub fn scene_max(&self) -> Vec3 {
        Vec3::from_array(self.max)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = parse(
            r#"{
                "name": "test",
                "width": 64,
                "height": 48,
                "workers": ["a", "b:19500"],
                "min": [-1, -1, -1],
                "max": [1, 1, 1]
            }"#,
        )
        .unwrap();
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.runaway, 0.2);
        assert_eq!(config.buffers, ["color"]);
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(parse(r#"{"name":"t","width":64,"height":48,"workers":[],"min":[0,0,0],"max":[1,1,1]}"#).is_err());
        assert!(parse(r#"{"name":"t","width":0,"height":48,"workers":["a"],"min":[0,0,0],"max":[1,1,1]}"#).is_err());
        assert!(parse(r#"{"name":"t","width":64,"height":48,"workers":["a"],"min":[1,1,1],"max":[0,0,0]}"#).is_err());
    }
}
