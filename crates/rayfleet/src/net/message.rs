/// Every message kind on the coordinator/worker wire. The numeric values
/// are the protocol; they never change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    None = 0,
    Ok = 1,
    Error = 2,
    Init = 100,
    SyncConfig = 200,
    SyncShader = 201,
    SyncTexture = 202,
    SyncMaterial = 203,
    SyncMesh = 204,
    SyncCamera = 205,
    SyncEmissive = 206,
    BuildBvh = 250,
    SyncWbvh = 260,
    SyncImage = 290,
    RenderStart = 300,
    RenderStop = 301,
    RenderStats = 302,
    RenderPause = 303,
    RenderResume = 304,
    /// Exchanged between workers only; the coordinator never handles it.
    Ray = 400,
}

impl MessageKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        use MessageKind::*;
        Some(match value {
            0 => None,
            1 => Ok,
            2 => Error,
            100 => Init,
            200 => SyncConfig,
            201 => SyncShader,
            202 => SyncTexture,
            203 => SyncMaterial,
            204 => SyncMesh,
            205 => SyncCamera,
            206 => SyncEmissive,
            250 => BuildBvh,
            260 => SyncWbvh,
            290 => SyncImage,
            300 => RenderStart,
            301 => RenderStop,
            302 => RenderStats,
            303 => RenderPause,
            304 => RenderResume,
            400 => Ray,
            _ => return Option::None,
        })
    }
}

/// Fixed message header: `{kind: u32 LE, size: u32 LE}`.
pub const HEADER_SIZE: usize = 8;

/// An outbound message: a kind plus its already-encoded body.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub body: Vec<u8>,
}

impl Message {
    /// A message with an empty body.
    pub fn new(kind: MessageKind) -> Self {
        Self { kind, body: Vec::new() }
    }

    pub fn with_body(kind: MessageKind, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// A message whose body is a single little-endian u32.
    pub fn with_u32(kind: MessageKind, value: u32) -> Self {
        Self::with_body(kind, value.to_le_bytes().to_vec())
    }

    pub fn header(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.kind as u32, self.body.len() as u32)
    }
}

pub fn encode_header(kind: u32, size: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[..4].copy_from_slice(&kind.to_le_bytes());
    out[4..].copy_from_slice(&size.to_le_bytes());
    out
}

pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> (u32, u32) {
    let kind = u32::from_le_bytes(bytes[..4].try_into().unwrap());
    let size = u32::from_le_bytes(bytes[4..].try_into().unwrap());
    (kind, size)
}

/// A fully framed inbound message. The kind is left raw so that unknown
/// kinds can be reported instead of dropped during framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = encode_header(204, 4096);
        assert_eq!(decode_header(&header), (204, 4096));
        // Little-endian on the wire.
        assert_eq!(header, [204, 0, 0, 0, 0, 16, 0, 0]);
    }

    #[test]
    fn kind_mapping_is_total_over_the_wire_set() {
        for kind in [
            MessageKind::None,
            MessageKind::Ok,
            MessageKind::Error,
            MessageKind::Init,
            MessageKind::SyncConfig,
            MessageKind::SyncShader,
            MessageKind::SyncTexture,
            MessageKind::SyncMaterial,
            MessageKind::SyncMesh,
            MessageKind::SyncCamera,
            MessageKind::SyncEmissive,
            MessageKind::BuildBvh,
            MessageKind::SyncWbvh,
            MessageKind::SyncImage,
            MessageKind::RenderStart,
            MessageKind::RenderStop,
            MessageKind::RenderStats,
            MessageKind::RenderPause,
            MessageKind::RenderResume,
            MessageKind::Ray,
        ] {
            assert_eq!(MessageKind::from_u32(kind as u32), Some(kind));
        }
        assert_eq!(MessageKind::from_u32(99), None);
        assert_eq!(MessageKind::from_u32(305), None);
    }
}
