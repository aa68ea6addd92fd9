mod coordinator;
mod output;
mod pipeline;
mod report;
mod scene;
mod tiles;
mod timers;

use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Parser;
use rayfleet::config::Config;

use crate::coordinator::{Coordinator, RunOpts};
use crate::scene::Scene;

#[derive(Parser, Debug)]
pub struct Args {
    /// Render configuration file
    config: PathBuf,

    /// Scene description file
    scene: PathBuf,

    #[arg(long, default_value_t = 5)]
    /// Stats intervals the fleet may stay quiet before the render is
    /// considered finished
    intervals: u32,

    #[arg(long, default_value_t = false)]
    /// Route rays by scanning worker bounds linearly instead of syncing a
    /// worker BVH
    linear_scan: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    ensure!(args.intervals > 0, "--intervals must be at least 1");

    log::info!("Loading config from {}.", args.config.display());
    let config = Config::load(&args.config)?;
    log::info!("Config loaded.");

    let scene = Scene::load(&args.scene)?;

    let opts = RunOpts::new(args.intervals, args.linear_scan);
    Coordinator::new(config, scene, opts)?.run()
}
