//! The render coordinator.
//!
//! One instance drives an entire render: it connects the worker fleet,
//! walks every connection through the sync protocol, streams the scene,
//! referees the render with the interest and runaway timers, and merges
//! the returned images. Everything network-facing runs on this thread; the
//! only other thread is the scene parsing job on the worker pool, coupled
//! through the streaming pipeline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use rayfleet::config::Config;
use rayfleet::film::Film;
use rayfleet::library::Library;
use rayfleet::math::bounds::{Bounds, BOUNDS_WIRE_SIZE};
use rayfleet::mesh::Mesh;
use rayfleet::net::message::{Frame, Message, MessageKind};
use rayfleet::net::node::{PollStatus, WorkerAddr, WorkerNode, WorkerState};
use rayfleet::net::{decode_body, encode_body};
use rayfleet::stats::{RenderStats, STATS_WIRE_SIZE};
use rayfleet::wbvh::Wbvh;
use rayfleet::{MeshId, WorkerId};

use crate::output;
use crate::pipeline::{pipeline, Handoff, StreamSide};
use crate::report::PhaseClock;
use crate::scene::Scene;
use crate::tiles::column_tiles;
use crate::timers::Interval;

/// How long to wait for more data before flushing the send buffers.
pub const FLUSH_TIMEOUT_MS: u64 = 10;

/// Workers report render stats once per interval of this length.
pub const STATS_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct RunOpts {
    /// Stats intervals the whole fleet may stay quiet before the render is
    /// declared finished.
    pub max_intervals: u32,
    /// Route rays by linear scan instead of building and syncing a WBVH.
    pub use_linear_scan: bool,
    pub flush_timeout: Duration,
    pub stats_timeout: Duration,
}

impl RunOpts {
    pub fn new(max_intervals: u32, use_linear_scan: bool) -> Self {
        Self {
            max_intervals,
            use_linear_scan,
            flush_timeout: Duration::from_millis(FLUSH_TIMEOUT_MS),
            stats_timeout: Duration::from_millis(STATS_TIMEOUT_MS),
        }
    }
}

/// One global phase: counts workers reaching it and fires its action
/// exactly once, when the last worker arrives.
#[derive(Debug, Default)]
struct Phase {
    reached: usize,
    fired: bool,
}

impl Phase {
    fn bump(&mut self, total: usize) -> bool {
        self.reached += 1;
        debug_assert!(self.reached <= total);
        if self.reached == total && !self.fired {
            self.fired = true;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAction {
    Pause,
    Resume,
}

/// The runaway decision for every worker, given `(id, progress, paused)`
/// triples.
///
/// Pause triggers strictly above `slowest + runaway`, resume at or below
/// `slowest`. A worker strictly between the thresholds (or exactly at
/// `slowest + runaway`) keeps whatever state its history put it in; the
/// dead band is what stops pause/resume flapping.
pub fn runaway_actions(
    workers: &[(WorkerId, f32, bool)],
    runaway: f32,
) -> Vec<(WorkerId, ThrottleAction)> {
    let slowest = workers
        .iter()
        .map(|&(_, progress, _)| progress)
        .fold(f32::INFINITY, f32::min);

    workers
        .iter()
        .filter_map(|&(id, progress, paused)| {
            if progress > slowest + runaway && !paused {
                Some((id, ThrottleAction::Pause))
            } else if progress <= slowest && paused {
                Some((id, ThrottleAction::Resume))
            } else {
                None
            }
        })
        .collect()
}

pub struct Coordinator {
    lib: Library,
    scene: Arc<Scene>,
    opts: RunOpts,
    material_ids: HashMap<String, u32>,

    connected: Phase,
    syncing: Phase,
    built: Phase,
    ready: Phase,
    complete: Phase,

    /// Armed while the scene is streaming; the idle step polls it.
    stream: Option<StreamSide>,
    /// The one mesh currently on the wire, 0 when none.
    current_mesh: MeshId,
    /// Which worker each mesh was shipped to; feeds the emissive list.
    mesh_owners: HashMap<MeshId, WorkerId>,
    worker_bounds: Vec<(WorkerId, Bounds)>,

    flush_timer: Interval,
    interest_timer: Option<Interval>,
    runaway_timer: Option<Interval>,
    clock: PhaseClock,
    finished: bool,
}

impl Coordinator {
    pub fn new(config: Config, scene: Scene, opts: RunOpts) -> Result<Self> {
        let mut lib = Library::new(config);
        let material_ids = scene.install_prelude(&mut lib)?;
        let flush_timer = Interval::new(opts.flush_timeout);
        Ok(Self {
            lib,
            scene: Arc::new(scene),
            opts,
            material_ids,
            connected: Phase::default(),
            syncing: Phase::default(),
            built: Phase::default(),
            ready: Phase::default(),
            complete: Phase::default(),
            stream: None,
            current_mesh: 0,
            mesh_owners: HashMap::new(),
            worker_bounds: Vec::new(),
            flush_timer,
            interest_timer: None,
            runaway_timer: None,
            clock: PhaseClock::default(),
            finished: false,
        })
    }

    /// Drive the render to completion. Returns once the final image is on
    /// disk and every connection is closed.
    pub fn run(&mut self) -> Result<()> {
        self.connect_all()?;

        let mut scratch = vec![0u8; 64 * 1024];
        while !self.finished {
            let mut busy = self.poll_connections(&mut scratch)?;
            busy |= self.sync_idle_step()?;
            self.tick_timers()?;
            if !busy {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    fn connect_all(&mut self) -> Result<()> {
        let addrs = self.lib.config().workers.clone();
        log::info!("Connecting to {} workers...", addrs.len());

        for (i, addr) in addrs.iter().enumerate() {
            let addr: WorkerAddr = addr.parse()?;
            let id = i as WorkerId + 1;
            let node = WorkerNode::connect(id, addr)?;
            log::info!("[{}] Connected on port {}.", node.addr.host, node.addr.port);
            self.lib.store_worker(id, node);
            self.on_worker_connected()?;
        }
        Ok(())
    }

    /// Phase action: all workers connected. Hand every worker its own id.
    fn on_worker_connected(&mut self) -> Result<()> {
        if !self.connected.bump(self.lib.worker_count()) {
            return Ok(());
        }
        self.clock.sync_start = Some(Instant::now());
        for id in self.lib.worker_ids() {
            self.lib.worker_mut(id).unwrap().state = WorkerState::Initializing;
            self.send_to(id, &Message::with_u32(MessageKind::Init, id))?;
        }
        Ok(())
    }

    fn poll_connections(&mut self, scratch: &mut [u8]) -> Result<bool> {
        let mut inbox: Vec<(WorkerId, Frame)> = Vec::new();

        for id in self.lib.worker_ids() {
            let node = self.lib.worker_mut(id).unwrap();
            let mut frames = Vec::new();
            match node.poll(scratch, &mut frames) {
                Ok(PollStatus::Idle) => {}
                Ok(PollStatus::Eof) => {
                    bail!("[{}] worker disconnected mid-run", node.addr);
                }
                Err(rayfleet::net::node::PollError::Io(err)) => {
                    log::error!("[{}] read: {err}", node.addr);
                }
                Err(rayfleet::net::node::PollError::Wire(err)) => {
                    bail!("[{}] corrupt stream: {err}", node.addr);
                }
            }
            inbox.extend(frames.into_iter().map(|f| (id, f)));
        }

        let busy = !inbox.is_empty();
        for (id, frame) in inbox {
            self.dispatch(id, frame)?;
        }
        Ok(busy)
    }

    fn dispatch(&mut self, id: WorkerId, frame: Frame) -> Result<()> {
        match MessageKind::from_u32(frame.kind) {
            Some(MessageKind::Ok) => self.on_ok(id, frame.body),
            // Stats and images bypass the state ladder: stats arrive while
            // rendering or paused, the image while syncing images.
            Some(MessageKind::RenderStats) => self.on_render_stats(id, &frame.body),
            Some(MessageKind::SyncImage) => self.on_sync_image(id, &frame.body),
            Some(MessageKind::Error) => {
                log::error!(
                    "[{}] Worker reported an error: {}",
                    self.addr_of(id),
                    String::from_utf8_lossy(&frame.body)
                );
                Ok(())
            }
            _ => {
                log::error!(
                    "[{}] Received unexpected message kind {}.",
                    self.addr_of(id),
                    frame.kind
                );
                Ok(())
            }
        }
    }

    /// The per-worker protocol ladder. Each `OK` acknowledges whatever the
    /// worker's state asked of it; the handler advances the state and
    /// sends what the next state requires.
    fn on_ok(&mut self, id: WorkerId, body: Vec<u8>) -> Result<()> {
        let Some(node) = self.lib.worker(id) else {
            return Ok(());
        };
        let state = node.state;
        let addr = node.addr.clone();

        match state {
            WorkerState::Initializing => {
                self.lib.worker_mut(id).unwrap().state = WorkerState::Configuring;
                log::info!("[{addr}] Configuring worker.");
                self.send_config(id)
            }

            WorkerState::Configuring => {
                self.lib.worker_mut(id).unwrap().state = WorkerState::SyncingAssets;
                log::info!("[{addr}] Ready to sync.");
                if self.syncing.bump(self.lib.worker_count()) {
                    self.start_sync()?;
                }
                Ok(())
            }

            WorkerState::SyncingAssets => {
                // The owner acked the in-flight mesh: drop our copy and
                // release the parser for the next one.
                if self.current_mesh != 0 {
                    self.lib.store_mesh(self.current_mesh, None);
                    self.current_mesh = 0;
                }
                if let Some(stream) = &self.stream {
                    stream.release();
                }
                Ok(())
            }

            WorkerState::SyncingCamera => {
                let list: Vec<(MeshId, WorkerId)> = self
                    .lib
                    .emissive_meshes()
                    .iter()
                    .map(|&mesh| (mesh, self.mesh_owners.get(&mesh).copied().unwrap_or(0)))
                    .collect();
                self.lib.worker_mut(id).unwrap().state = WorkerState::SyncingEmissive;
                log::info!("[{addr}] Syncing list of emissive workers.");
                self.send_to(
                    id,
                    &Message::with_body(MessageKind::SyncEmissive, encode_body(&list)),
                )
            }

            WorkerState::SyncingEmissive => {
                self.lib.worker_mut(id).unwrap().state = WorkerState::BuildingBvh;
                log::info!("[{addr}] Building local BVH.");
                self.send_to(id, &Message::new(MessageKind::BuildBvh))
            }

            WorkerState::BuildingBvh => {
                ensure!(
                    body.len() == BOUNDS_WIRE_SIZE,
                    "[{addr}] BVH OK carried {} body bytes, expected {BOUNDS_WIRE_SIZE}",
                    body.len()
                );
                let bounds = Bounds::from_le_bytes(&body).expect("length checked above");
                self.lib.worker_mut(id).unwrap().bounds = Some(bounds);
                self.worker_bounds.push((id, bounds));
                log::info!("[{addr}] Local BVH ready.");

                let all_built = self.built.bump(self.lib.worker_count());
                if self.opts.use_linear_scan {
                    // No WBVH to sync; take the next rung immediately.
                    self.lib.worker_mut(id).unwrap().state = WorkerState::SyncingWbvh;
                    return self.on_ok(id, Vec::new());
                }
                if all_built {
                    self.build_wbvh()?;
                }
                Ok(())
            }

            WorkerState::SyncingWbvh => {
                self.lib.worker_mut(id).unwrap().state = WorkerState::Ready;
                log::info!("[{addr}] Ready to render.");
                if self.ready.bump(self.lib.worker_count()) {
                    self.start_render()?;
                }
                Ok(())
            }

            _ => {
                log::error!("[{addr}] Received OK in unexpected state {state:?}.");
                Ok(())
            }
        }
    }

    /// `SYNC_CONFIG` plus every shading asset, one batch the worker acks
    /// once. Assets need no individual acks: they precede all geometry on
    /// the wire, and TCP keeps them in order.
    fn send_config(&mut self, id: WorkerId) -> Result<()> {
        let config_body = encode_body(self.lib.config());
        let shaders: Vec<Vec<u8>> = self
            .lib
            .shaders()
            .map(|(sid, shader)| encode_body(&(sid, shader.clone())))
            .collect();
        let textures: Vec<Vec<u8>> = self
            .lib
            .textures()
            .map(|(tid, texture)| encode_body(&(tid, texture.clone())))
            .collect();
        let materials: Vec<Vec<u8>> = self
            .lib
            .materials()
            .map(|(mid, material)| encode_body(&(mid, material.clone())))
            .collect();

        self.send_to(id, &Message::with_body(MessageKind::SyncConfig, config_body))?;
        for body in shaders {
            self.send_to(id, &Message::with_body(MessageKind::SyncShader, body))?;
        }
        for body in textures {
            self.send_to(id, &Message::with_body(MessageKind::SyncTexture, body))?;
        }
        for body in materials {
            self.send_to(id, &Message::with_body(MessageKind::SyncMaterial, body))?;
        }
        Ok(())
    }

    /// Phase action: every worker is ready for assets. Builds the spatial
    /// index and the final film, then hands scene parsing to the worker
    /// pool and arms the idle step.
    fn start_sync(&mut self) -> Result<()> {
        self.lib.build_spatial_index();

        let config = self.lib.config();
        let (width, height) = (config.width, config.height);
        let buffers = config.buffers.clone();
        let mut film = Film::new(width, height);
        for buffer in &buffers {
            film.add_buffer(buffer);
        }
        self.lib.store_film(film);

        let (parser, stream) = pipeline(self.lib.mesh_ids());
        self.stream = Some(stream);

        let scene = Arc::clone(&self.scene);
        let materials = self.material_ids.clone();
        rayon::spawn(move || {
            let mut sink = |mesh: Mesh| parser.sync_mesh(Some(mesh));
            if let Err(err) = scene.stream_meshes(&materials, &mut sink) {
                log::error!("Can't continue with a bad scene: {err:#}");
                std::process::exit(1);
            }
            if let Err(err) = parser.sync_mesh(None) {
                log::error!("{err:#}");
                std::process::exit(1);
            }
            log::info!("Scene distributed.");
        });
        Ok(())
    }

    /// The idle step of the streaming pipeline: ship the pending mesh to
    /// its spatial owner, or finish the stream on the sentinel. Returns
    /// immediately when the parser has nothing for us.
    fn sync_idle_step(&mut self) -> Result<bool> {
        let Some(stream) = &self.stream else {
            return Ok(false);
        };
        let Some(handoff) = stream.try_take() else {
            return Ok(false);
        };

        match handoff {
            Handoff::Done => {
                self.stream = None;
                self.clock.build_start = Some(Instant::now());

                let camera_body =
                    encode_body(self.lib.camera().context("scene declared no camera")?);
                for id in self.lib.worker_ids() {
                    let node = self.lib.worker_mut(id).unwrap();
                    node.state = WorkerState::SyncingCamera;
                    log::info!("[{}] Syncing camera.", node.addr);
                    self.send_to(
                        id,
                        &Message::with_body(MessageKind::SyncCamera, camera_body.clone()),
                    )?;
                }
            }
            Handoff::Mesh { id, mesh } => {
                let spacecode = self.lib.spacecode_of(&mesh);
                let owner = self.lib.worker_by_spacecode(spacecode);
                self.current_mesh = id;
                self.mesh_owners.insert(id, owner);
                self.lib.store_mesh(id, Some(*mesh));

                let body = encode_body(self.lib.mesh(id).expect("just stored"));
                log::info!(
                    "[{}] Sending mesh {id} to worker {owner}.",
                    self.addr_of(owner)
                );
                self.send_to(owner, &Message::with_body(MessageKind::SyncMesh, body))?;
            }
        }
        Ok(true)
    }

    /// Phase action: every worker reported its bounds. Build the WBVH once
    /// and sync it to the whole fleet.
    fn build_wbvh(&mut self) -> Result<()> {
        log::info!("Building WBVH.");
        let wbvh = Wbvh::build(&self.worker_bounds);
        log::info!("Worker BVH size: {} bytes.", wbvh.size_in_bytes());

        let body = encode_body(&wbvh);
        for id in self.lib.worker_ids() {
            let node = self.lib.worker_mut(id).unwrap();
            node.state = WorkerState::SyncingWbvh;
            log::info!("[{}] Syncing WBVH.", node.addr);
            self.send_to(id, &Message::with_body(MessageKind::SyncWbvh, body.clone()))?;
        }
        self.clock.build_stop = Some(Instant::now());
        Ok(())
    }

    /// Phase action: every worker is ready. Assign column tiles and start
    /// the render clocks and watchdogs.
    fn start_render(&mut self) -> Result<()> {
        self.clock.sync_stop = Some(Instant::now());
        self.clock.render_start = Some(Instant::now());

        let tiles = column_tiles(self.lib.config().width, self.lib.worker_count());
        for id in self.lib.worker_ids() {
            let tile = tiles[id as usize - 1];
            let node = self.lib.worker_mut(id).unwrap();
            node.state = WorkerState::Rendering;
            log::info!("[{}] Starting render.", node.addr);
            self.send_to(id, &Message::with_u32(MessageKind::RenderStart, tile.pack()))?;
        }

        self.interest_timer = Some(Interval::new(
            self.opts.stats_timeout * self.opts.max_intervals,
        ));
        self.runaway_timer = Some(Interval::new(self.opts.stats_timeout));
        log::info!("Rendering has started.");
        Ok(())
    }

    fn stop_render(&mut self) -> Result<()> {
        self.clock.render_stop = Some(Instant::now());
        self.interest_timer = None;
        self.runaway_timer = None;

        for id in self.lib.worker_ids() {
            let node = self.lib.worker_mut(id).unwrap();
            node.state = WorkerState::SyncingImages;
            log::info!("[{}] Stopping render.", node.addr);
            self.send_to(id, &Message::new(MessageKind::RenderStop))?;
        }
        log::info!("Rendering has stopped, syncing images.");
        Ok(())
    }

    fn tick_timers(&mut self) -> Result<()> {
        let now = Instant::now();
        if self.flush_timer.due(now) {
            self.flush_tick()?;
        }
        if self.interest_timer.as_mut().is_some_and(|t| t.due(now)) {
            self.interest_tick()?;
        }
        if self.runaway_timer.as_mut().is_some_and(|t| t.due(now)) {
            self.runaway_tick()?;
        }
        Ok(())
    }

    /// Flush every connection that queued bytes but hasn't flushed since
    /// the previous tick, then reset all flush flags.
    fn flush_tick(&mut self) -> Result<()> {
        for id in self.lib.worker_ids() {
            let node = self.lib.worker_mut(id).unwrap();
            if node.needs_flush() {
                let addr = node.addr.clone();
                node.flush().with_context(|| format!("[{addr}] write failed"))?;
            }
            node.end_flush_tick();
        }
        Ok(())
    }

    /// If nobody has shown ray activity for a whole window, the render is
    /// done; otherwise report the fleet-wide ray counts.
    fn interest_tick(&mut self) -> Result<()> {
        let intervals = self.opts.max_intervals;
        let interesting = self
            .lib
            .workers()
            .any(|(_, node)| node.is_interesting(intervals));
        if !interesting {
            log::info!("Workers are no longer interesting.");
            return self.stop_render();
        }

        let mut produced = 0u64;
        let mut killed = 0u64;
        let mut queued = 0u64;
        for (_, node) in self.lib.workers() {
            produced += node.stats.rays_produced(intervals);
            killed += node.stats.rays_killed(intervals);
            queued += node.stats.rays_queued(intervals);
        }
        log::info!("RAYS:  +{produced}  -{killed}  ~{queued}");
        Ok(())
    }

    fn runaway_tick(&mut self) -> Result<()> {
        let progress: Vec<(WorkerId, f32, bool)> = self
            .lib
            .workers()
            .map(|(id, node)| (id, node.progress(), node.state == WorkerState::Paused))
            .collect();

        for (id, action) in runaway_actions(&progress, self.lib.config().runaway) {
            let node = self.lib.worker_mut(id).unwrap();
            match action {
                ThrottleAction::Pause => {
                    log::info!("[{}] Runaway detected. Pausing work generation.", node.addr);
                    node.state = WorkerState::Paused;
                    self.send_to(id, &Message::new(MessageKind::RenderPause))?;
                }
                ThrottleAction::Resume => {
                    log::info!("[{}] Runaway eliminated. Resuming work generation.", node.addr);
                    node.state = WorkerState::Rendering;
                    self.send_to(id, &Message::new(MessageKind::RenderResume))?;
                }
            }
        }
        Ok(())
    }

    fn on_render_stats(&mut self, id: WorkerId, body: &[u8]) -> Result<()> {
        let Some(stats) = RenderStats::from_le_bytes(body) else {
            bail!(
                "[{}] RENDER_STATS body of {} bytes, expected {STATS_WIRE_SIZE}",
                self.addr_of(id),
                body.len()
            );
        };
        if let Some(node) = self.lib.worker_mut(id) {
            node.stats.record(stats);
        }
        Ok(())
    }

    fn on_sync_image(&mut self, id: WorkerId, body: &[u8]) -> Result<()> {
        let component: Film = decode_body("SYNC_IMAGE", body)?;
        let name = self.lib.config().name.clone();

        let node = self.lib.worker(id).context("image from unknown worker")?;
        let addr = node.addr.clone();
        output::write_component(&name, &addr, &component, &node.stats)?;

        self.lib
            .film_mut()
            .context("no final image to merge into")?
            .merge(&component)
            .with_context(|| format!("[{addr}] component image doesn't fit the final image"))?;
        log::info!("[{addr}] Merged image.");

        self.lib.worker_mut(id).unwrap().state = WorkerState::Done;
        if self.complete.bump(self.lib.worker_count()) {
            self.finish()?;
        }
        Ok(())
    }

    /// Phase action: every image merged. Write the final image, report the
    /// phase timings and tear the fleet down.
    fn finish(&mut self) -> Result<()> {
        let name = self.lib.config().name.clone();
        self.lib
            .film()
            .context("no final image to write")?
            .write_exr(Path::new(&name))?;
        log::info!("Wrote {name}.exr.");

        self.clock.report(self.opts.use_linear_scan);

        for id in self.lib.worker_ids() {
            if let Some(node) = self.lib.take_worker(id) {
                log::info!("[{}] Disconnected.", node.addr);
            }
        }
        self.finished = true;
        Ok(())
    }

    fn send_to(&mut self, id: WorkerId, msg: &Message) -> Result<()> {
        let node = self
            .lib
            .worker_mut(id)
            .with_context(|| format!("no connection for worker {id}"))?;
        let addr = node.addr.clone();
        node.send(msg)
            .with_context(|| format!("[{addr}] write failed"))
    }

    fn addr_of(&self, id: WorkerId) -> String {
        self.lib
            .worker(id)
            .map(|n| n.addr.to_string())
            .unwrap_or_else(|| format!("worker {id}"))
    }
}
