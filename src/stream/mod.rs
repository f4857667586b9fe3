//! Framed container output
//!
//! Container runtimes multiplex stdout and stderr onto one byte stream. Each frame is an
//! 8-byte header (stream tag, three reserved bytes, big-endian payload length) followed by
//! the payload. [`copy_stream`] turns that stream into prefixed output on a [`FrameSink`].

mod demux;
mod frame;
mod sink;

pub use demux::{copy_stream, copy_stream_until};
pub use frame::{Frame, StreamKind, HEADER_LEN};
pub use sink::{FrameSink, TailSink};
