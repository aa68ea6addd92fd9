//! Per-worker connection records.

use std::fmt;
use std::io::{self, Read};
use std::net::TcpStream;
use std::str::FromStr;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::math::bounds::Bounds;
use crate::net::frame::{FrameReader, WriteBuffer};
use crate::net::message::{Frame, Message};
use crate::net::WireError;
use crate::stats::StatsHistory;
use crate::WorkerId;

pub const DEFAULT_PORT: u16 = 19400;

/// Where a worker's connection stands in the render protocol. Driven by
/// inbound `OK` messages; see the coordinator for the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connected,
    Initializing,
    Configuring,
    SyncingAssets,
    SyncingCamera,
    SyncingEmissive,
    BuildingBvh,
    SyncingWbvh,
    Ready,
    Rendering,
    Paused,
    SyncingImages,
    Done,
}

/// `host[:port]`, port defaulting to [`DEFAULT_PORT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for WorkerAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => Ok(Self {
                host: host.to_owned(),
                port: port
                    .parse()
                    .with_context(|| format!("bad port in worker address {s:?}"))?,
            }),
            None => Ok(Self {
                host: s.to_owned(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

impl fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Nothing more to read right now.
    Idle,
    /// The worker closed its end of the connection.
    Eof,
}

/// One remote worker: its connection, protocol state and bookkeeping.
#[derive(Debug)]
pub struct WorkerNode {
    pub id: WorkerId,
    pub addr: WorkerAddr,
    pub state: WorkerState,
    pub stats: StatsHistory,
    /// Advertised once the worker's local BVH build completes.
    pub bounds: Option<Bounds>,
    stream: TcpStream,
    reader: FrameReader,
    writer: WriteBuffer,
}

impl WorkerNode {
    /// Blocking connect; the stream switches to non-blocking afterwards so
    /// the event loop can poll it.
    pub fn connect(id: WorkerId, addr: WorkerAddr) -> Result<Self> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port))
            .with_context(|| format!("failed connecting to {addr}"))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        log::debug!("[{addr}] socket up, worker id {id}");
        Ok(Self {
            id,
            addr,
            state: WorkerState::Connected,
            stats: StatsHistory::default(),
            bounds: None,
            stream,
            reader: FrameReader::new(),
            writer: WriteBuffer::new(),
        })
    }

    /// Queue a message into the coalescing buffer. It reaches the wire on
    /// the next flush (or earlier if the buffer runs full).
    pub fn send(&mut self, msg: &Message) -> io::Result<()> {
        self.writer.queue(msg, &mut self.stream)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        log::trace!("[{}] flushing {} bytes", self.addr, self.writer.nwritten());
        self.writer.flush(&mut self.stream)
    }

    /// True when the flush timer owes this connection a flush: bytes are
    /// buffered and nothing has flushed since the last tick.
    pub fn needs_flush(&self) -> bool {
        !self.writer.flushed && self.writer.nwritten() > 0
    }

    /// Clears the per-tick flush flag; called at the end of every tick.
    pub fn end_flush_tick(&mut self) {
        self.writer.flushed = false;
    }

    /// Drain everything currently readable, appending completed frames to
    /// `inbox` in wire order.
    pub fn poll(&mut self, scratch: &mut [u8], inbox: &mut Vec<Frame>) -> Result<PollStatus, PollError> {
        loop {
            match self.stream.read(scratch) {
                Ok(0) => return Ok(PollStatus::Eof),
                Ok(n) => self.reader.consume(&scratch[..n], inbox)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(PollStatus::Idle),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn progress(&self) -> f32 {
        self.stats.progress()
    }

    pub fn is_interesting(&self, intervals: u32) -> bool {
        self.stats.is_interesting(intervals)
    }
}
