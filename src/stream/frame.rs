use bytes::{BufMut, Bytes, BytesMut};

/// Length of a frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Stream tag carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn tag(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// One unit of multiplexed container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn stdout(payload: impl Into<Bytes>) -> Self {
        Self::new(StreamKind::Stdout, payload)
    }

    pub fn stderr(payload: impl Into<Bytes>) -> Self {
        Self::new(StreamKind::Stderr, payload)
    }

    /// Encodes the frame in wire format.
    ///
    /// Payloads longer than `u32::MAX` cannot be represented and are truncated to fit.
    pub fn encode(&self) -> Bytes {
        let len = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + len as usize);
        buf.put_u8(self.kind.tag());
        buf.put_bytes(0, 3);
        buf.put_u32(len);
        buf.put_slice(&self.payload[..len as usize]);
        buf.freeze()
    }
}
