//! The scene-streaming handshake.
//!
//! Scene parsing is CPU-bound and runs on the worker pool; the network
//! side is the single-threaded event loop. The two ping-pong one token so
//! that exactly one mesh is ever in flight: the parser may only hand over
//! a mesh after the event loop is done with the previous one, and the
//! event loop only learns about a mesh through the handoff.
//!
//! Two rendezvous channels of capacity one stand in for the pair of
//! counting semaphores this design is usually built from: `read` carries
//! the handoff itself (the "mesh_read" token), `synced` carries the
//! release back (the "mesh_synced" token, primed with one).

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use anyhow::{Context, Result};
use rayfleet::library::MeshIdAlloc;
use rayfleet::mesh::Mesh;
use rayfleet::MeshId;

#[derive(Debug)]
pub enum Handoff {
    Mesh { id: MeshId, mesh: Box<Mesh> },
    /// End of scene; the parser is finished and will not take the token
    /// again.
    Done,
}

/// The parser-thread side.
pub struct ParserHandle {
    synced: Receiver<()>,
    read: SyncSender<Handoff>,
    ids: MeshIdAlloc,
}

/// The event-loop side.
pub struct StreamSide {
    read: Receiver<Handoff>,
    synced: SyncSender<()>,
}

pub fn pipeline(ids: MeshIdAlloc) -> (ParserHandle, StreamSide) {
    let (read_tx, read_rx) = sync_channel(1);
    let (synced_tx, synced_rx) = sync_channel(1);
    // The parser goes first.
    synced_tx.send(()).expect("fresh channel has capacity");
    (
        ParserHandle {
            synced: synced_rx,
            read: read_tx,
            ids,
        },
        StreamSide {
            read: read_rx,
            synced: synced_tx,
        },
    )
}

impl ParserHandle {
    /// Hand one mesh to the event loop, or `None` once the scene is
    /// exhausted. Blocks until the previous mesh has been shipped and
    /// acknowledged; returns the id assigned to the mesh (0 for the
    /// sentinel).
    pub fn sync_mesh(&self, mesh: Option<Mesh>) -> Result<MeshId> {
        self.synced
            .recv()
            .context("event loop dropped the mesh stream")?;

        let (id, handoff) = match mesh {
            Some(mut mesh) => {
                let id = self.ids.next();
                mesh.id = id;
                (id, Handoff::Mesh { id, mesh: Box::new(mesh) })
            }
            None => (0, Handoff::Done),
        };
        self.read
            .send(handoff)
            .ok()
            .context("event loop dropped the mesh stream")?;
        Ok(id)
    }
}

impl StreamSide {
    /// Non-blocking take; the event loop calls this from its idle step and
    /// moves on immediately when no mesh is pending.
    pub fn try_take(&self) -> Option<Handoff> {
        self.read.try_recv().ok()
    }

    /// Give the token back, releasing the parser to produce the next mesh.
    /// Called when the owning worker acknowledges the shipped mesh.
    pub fn release(&self) {
        // The parser may already be gone (it exits right after the
        // sentinel); that is not an error.
        let _ = self.synced.send(());
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use glam::Mat4;

    use super::*;

    fn triangle() -> Mesh {
        Mesh::new(
            1,
            Mat4::IDENTITY,
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn ids_are_assigned_in_stream_order() {
        let (parser, stream) = pipeline(MeshIdAlloc::default());
        let producer = thread::spawn(move || {
            for _ in 0..3 {
                parser.sync_mesh(Some(triangle())).unwrap();
            }
            assert_eq!(parser.sync_mesh(None).unwrap(), 0);
        });

        let mut seen = Vec::new();
        loop {
            match stream.try_take() {
                Some(Handoff::Mesh { id, mesh }) => {
                    assert_eq!(mesh.id, id);
                    seen.push(id);
                    stream.release();
                }
                Some(Handoff::Done) => break,
                None => thread::yield_now(),
            }
        }
        assert_eq!(seen, [1, 2, 3]);
        producer.join().unwrap();
    }

    #[test]
    fn one_mesh_in_flight_until_released() {
        let (parser, stream) = pipeline(MeshIdAlloc::default());
        let producer = thread::spawn(move || {
            parser.sync_mesh(Some(triangle())).unwrap();
            parser.sync_mesh(Some(triangle())).unwrap();
            parser.sync_mesh(None).unwrap();
        });

        // Wait for the first mesh.
        let first = loop {
            if let Some(h) = stream.try_take() {
                break h;
            }
            thread::yield_now();
        };
        assert!(matches!(first, Handoff::Mesh { id: 1, .. }));

        // Without a release the second mesh must not appear, however long
        // we wait.
        thread::sleep(Duration::from_millis(30));
        assert!(stream.try_take().is_none());

        stream.release();
        let second = loop {
            if let Some(h) = stream.try_take() {
                break h;
            }
            thread::yield_now();
        };
        assert!(matches!(second, Handoff::Mesh { id: 2, .. }));

        stream.release();
        loop {
            match stream.try_take() {
                Some(Handoff::Done) => break,
                Some(_) => panic!("unexpected extra handoff"),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn parser_errors_out_when_the_loop_goes_away() {
        let (parser, stream) = pipeline(MeshIdAlloc::default());
        drop(stream);
        assert!(parser.sync_mesh(Some(triangle())).is_err());
    }
}
