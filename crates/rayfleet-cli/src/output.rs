use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rayfleet::film::Film;
use rayfleet::net::node::WorkerAddr;
use rayfleet::stats::StatsHistory;

/// Output stem for one worker's artifacts: `<name>-<ip>_<port>`.
pub fn component_stem(name: &str, addr: &WorkerAddr) -> PathBuf {
    PathBuf::from(format!("{}-{}_{}", name, addr.host, addr.port))
}

/// Write one worker's component image and stats next to the final image.
pub fn write_component(
    name: &str,
    addr: &WorkerAddr,
    film: &Film,
    stats: &StatsHistory,
) -> Result<()> {
    let stem = component_stem(name, addr);

    log::info!("Writing image to {}.exr...", stem.display());
    film.write_exr(&stem)?;

    // Appended, not `with_extension`: the stem contains the worker's
    // dotted IP.
    let mut csv = stem.clone().into_os_string();
    csv.push(".csv");
    let csv = PathBuf::from(csv);
    log::info!("Writing stats to {}...", csv.display());
    let file = File::create(&csv).with_context(|| format!("can't write {}", csv.display()))?;
    stats
        .write_csv(BufWriter::new(file))
        .with_context(|| format!("can't write {}", csv.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_follow_the_worker_address() {
        let addr = WorkerAddr {
            host: "10.0.0.7".into(),
            port: 19400,
        };
        assert_eq!(
            component_stem("render", &addr),
            PathBuf::from("render-10.0.0.7_19400")
        );
    }
}
