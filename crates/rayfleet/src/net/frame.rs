//! Length-prefixed framing over a byte stream.
//!
//! The read side is a two-state automaton that consumes arbitrary chunks
//! exactly: one chunk may hold any number of whole or partial messages. The
//! write side coalesces messages into a fixed buffer so many small sends
//! become one stream write.

use std::io::{self, Write};
use std::mem;
use std::time::Duration;

use super::message::{decode_header, Frame, Message, HEADER_SIZE};
use super::{WireError, MAX_BODY_SIZE};

/// Capacity of the coalescing write buffer of one connection.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Header,
    Body,
}

/// Incremental parser of inbound frames.
#[derive(Debug)]
pub struct FrameReader {
    mode: ReadMode,
    header: [u8; HEADER_SIZE],
    nread: usize,
    kind: u32,
    want: usize,
    body: Vec<u8>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            mode: ReadMode::Header,
            header: [0; HEADER_SIZE],
            nread: 0,
            kind: 0,
            want: 0,
            body: Vec::new(),
        }
    }

    /// Feed one chunk of stream bytes, appending every completed frame to
    /// `out` in wire order.
    pub fn consume(&mut self, mut chunk: &[u8], out: &mut Vec<Frame>) -> Result<(), WireError> {
        loop {
            match self.mode {
                ReadMode::Header => {
                    let take = usize::min(HEADER_SIZE - self.nread, chunk.len());
                    self.header[self.nread..self.nread + take].copy_from_slice(&chunk[..take]);
                    self.nread += take;
                    chunk = &chunk[take..];

                    if self.nread < HEADER_SIZE {
                        return Ok(());
                    }

                    let (kind, size) = decode_header(&self.header);
                    if size > MAX_BODY_SIZE {
                        return Err(WireError::OversizedBody(size));
                    }
                    self.kind = kind;
                    self.want = size as usize;
                    self.body = Vec::with_capacity(self.want);
                    self.nread = 0;
                    self.mode = ReadMode::Body;
                }
                ReadMode::Body => {
                    let take = usize::min(self.want - self.body.len(), chunk.len());
                    self.body.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];

                    if self.body.len() < self.want {
                        return Ok(());
                    }

                    out.push(Frame {
                        kind: self.kind,
                        body: mem::take(&mut self.body),
                    });
                    self.nread = 0;
                    self.mode = ReadMode::Header;
                }
            }
        }
    }
}

/// Coalescing outbound buffer with a fixed capacity.
///
/// `queue` never grows the buffer past [`WRITE_BUFFER_SIZE`]: if the header
/// would overflow it flushes first, and a large body is drained through the
/// buffer in capacity-sized runs.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    /// Set by `flush`, cleared once per flush-timer tick.
    pub flushed: bool,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(WRITE_BUFFER_SIZE),
            flushed: false,
        }
    }

    /// Bytes buffered but not yet written to the stream.
    pub fn nwritten(&self) -> usize {
        self.buf.len()
    }

    pub fn queue(&mut self, msg: &Message, sink: &mut impl Write) -> io::Result<()> {
        if self.buf.len() + HEADER_SIZE > WRITE_BUFFER_SIZE {
            self.flush(sink)?;
        }
        self.buf.extend_from_slice(&msg.header());

        let mut body = msg.body.as_slice();
        loop {
            let space = WRITE_BUFFER_SIZE - self.buf.len();
            if body.len() <= space {
                self.buf.extend_from_slice(body);
                return Ok(());
            }
            self.buf.extend_from_slice(&body[..space]);
            body = &body[space..];
            self.flush(sink)?;
        }
    }

    /// Write everything buffered as one stream write and reset.
    ///
    /// The sink may be a non-blocking socket; `WouldBlock` is retried after
    /// a short pause since the protocol never has both sides mid-transfer
    /// at once.
    pub fn flush(&mut self, sink: &mut impl Write) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut off = 0;
        while off < self.buf.len() {
            match sink.write(&self.buf[off..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream refused buffered bytes",
                    ))
                }
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_micros(100));
                }
                Err(e) => return Err(e),
            }
        }
        self.buf.clear();
        self.flushed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::message::MessageKind;
    use super::*;

    fn wire_bytes(messages: &[Message]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for m in messages {
            bytes.extend_from_slice(&m.header());
            bytes.extend_from_slice(&m.body);
        }
        bytes
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::with_u32(MessageKind::Init, 3),
            Message::new(MessageKind::BuildBvh),
            Message::with_body(MessageKind::SyncMesh, (0u8..=255).collect()),
            Message::new(MessageKind::RenderStop),
        ]
    }

    #[test]
    fn reader_handles_any_chunking() {
        let messages = sample_messages();
        let bytes = wire_bytes(&messages);

        for chunk_size in [1, 2, 3, 7, 8, 9, 64, bytes.len()] {
            let mut reader = FrameReader::new();
            let mut frames = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                reader.consume(chunk, &mut frames).unwrap();
            }
            assert_eq!(frames.len(), messages.len(), "chunk size {chunk_size}");
            for (frame, msg) in frames.iter().zip(&messages) {
                assert_eq!(frame.kind, msg.kind as u32);
                assert_eq!(frame.body, msg.body);
            }
        }
    }

    #[test]
    fn reader_emits_zero_size_frames_without_waiting() {
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        let msg = Message::new(MessageKind::Ok);
        reader.consume(&wire_bytes(&[msg]), &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].body.is_empty());
    }

    #[test]
    fn reader_rejects_absurd_sizes() {
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        let header = super::super::message::encode_header(1, u32::MAX);
        assert!(reader.consume(&header, &mut frames).is_err());
    }

    /// An io::Write that records each individual write call.
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<Vec<u8>>,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn small_messages_coalesce_into_one_write() {
        let mut sink = RecordingSink::default();
        let mut writer = WriteBuffer::new();

        for msg in [
            Message::new(MessageKind::RenderPause),
            Message::with_u32(MessageKind::Init, 1),
            Message::new(MessageKind::RenderResume),
        ] {
            writer.queue(&msg, &mut sink).unwrap();
        }
        assert!(sink.writes.is_empty());

        writer.flush(&mut sink).unwrap();
        assert_eq!(sink.writes.len(), 1);
        assert_eq!(writer.nwritten(), 0);
        assert!(writer.flushed);

        // The coalesced bytes still parse as the original three messages.
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        reader.consume(&sink.writes[0], &mut frames).unwrap();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn oversized_body_drains_through_the_buffer() {
        let mut sink = RecordingSink::default();
        let mut writer = WriteBuffer::new();

        let body = vec![0xabu8; WRITE_BUFFER_SIZE * 2 + 100];
        let msg = Message::with_body(MessageKind::SyncMesh, body.clone());
        writer.queue(&msg, &mut sink).unwrap();
        writer.flush(&mut sink).unwrap();

        // Interleaved flushes, but never a buffer past capacity.
        assert!(sink.writes.iter().all(|w| w.len() <= WRITE_BUFFER_SIZE));
        let total: usize = sink.writes.iter().map(Vec::len).sum();
        assert_eq!(total, HEADER_SIZE + body.len());

        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        for w in &sink.writes {
            reader.consume(w, &mut frames).unwrap();
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, body);
    }

    #[test]
    fn header_never_splits_across_a_flush() {
        let mut sink = RecordingSink::default();
        let mut writer = WriteBuffer::new();

        // Fill the buffer to within a few bytes of capacity.
        let filler = Message::with_body(MessageKind::SyncMesh, vec![0; WRITE_BUFFER_SIZE - 12]);
        writer.queue(&filler, &mut sink).unwrap();
        assert_eq!(writer.nwritten(), WRITE_BUFFER_SIZE - 4);

        // Appending another header would overflow, so the buffer flushes
        // first and the new message starts at offset zero.
        writer.queue(&Message::new(MessageKind::RenderStop), &mut sink).unwrap();
        assert_eq!(sink.writes.len(), 1);
        assert_eq!(writer.nwritten(), HEADER_SIZE);
    }
}
