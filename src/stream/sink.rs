use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Destination for demultiplexed frames
///
/// A single call writes one frame's prefix and payload. Implementations shared between
/// concurrent stages must not interleave two calls.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()>;
}

#[async_trait]
impl<W> FrameSink for Mutex<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()> {
        let mut writer = self.lock().await;
        writer.write_all(prefix).await?;
        writer.write_all(payload).await?;
        writer.flush().await
    }
}

/// Forwards frames to an inner sink while keeping the last `limit` payload bytes
pub struct TailSink {
    inner: Arc<dyn FrameSink>,
    tail: StdMutex<Vec<u8>>,
    limit: usize,
}

impl TailSink {
    pub fn new(inner: Arc<dyn FrameSink>, limit: usize) -> Self {
        Self {
            inner,
            tail: StdMutex::new(Vec::new()),
            limit,
        }
    }

    /// Captured output, lossily decoded
    pub fn tail(&self) -> String {
        String::from_utf8_lossy(&self.lock_tail()).into_owned()
    }

    fn lock_tail(&self) -> MutexGuard<'_, Vec<u8>> {
        self.tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, payload: &[u8]) {
        let mut tail = self.lock_tail();
        tail.extend_from_slice(payload);
        if tail.len() > self.limit {
            let excess = tail.len() - self.limit;
            tail.drain(..excess);
        }
    }
}

#[async_trait]
impl FrameSink for TailSink {
    async fn write_frame(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()> {
        self.record(payload);
        self.inner.write_frame(prefix, payload).await
    }
}
