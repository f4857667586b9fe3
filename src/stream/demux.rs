use super::frame::HEADER_LEN;
use super::sink::FrameSink;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Copies framed output from `src` to `dst`, writing `prefix` once before every payload.
///
/// Stops silently at end of stream, on a read or write error, or on a truncated frame.
/// A truncated frame contributes nothing to `dst`. Stdout and stderr frames are treated
/// identically and forwarded in arrival order.
pub async fn copy_stream<S, R>(dst: &S, src: &mut R, prefix: &str)
where
    S: FrameSink + ?Sized,
    R: AsyncRead + Unpin,
{
    copy_frames(dst, src, prefix.as_bytes(), None).await;
}

/// Like [`copy_stream`], but also stops before reading the next frame once `cancel` fires.
pub async fn copy_stream_until<S, R>(
    dst: &S,
    src: &mut R,
    prefix: &str,
    cancel: &CancellationToken,
) where
    S: FrameSink + ?Sized,
    R: AsyncRead + Unpin,
{
    copy_frames(dst, src, prefix.as_bytes(), Some(cancel)).await;
}

async fn copy_frames<S, R>(
    dst: &S,
    src: &mut R,
    prefix: &[u8],
    cancel: Option<&CancellationToken>,
) where
    S: FrameSink + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut frames = 0usize;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            trace!(frames, "Output drain cancelled");
            break;
        }

        if src.read_exact(&mut header).await.is_err() {
            break;
        }

        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as u64;

        // Grows with the data actually received so a bogus length cannot force a huge allocation
        let mut payload = Vec::new();
        match (&mut *src).take(len).read_to_end(&mut payload).await {
            Ok(n) if n as u64 == len => {}
            _ => break,
        }

        if dst.write_frame(prefix, &payload).await.is_err() {
            break;
        }
        frames += 1;
    }

    trace!(frames, "Output drain finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Frame;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex;

    fn encode_all(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_copies_frames_with_prefix_in_order() {
        let input = encode_all(&[
            Frame::stderr("Compile message from stderr.\n"),
            Frame::stdout("Compile message from stdout.\n"),
        ]);
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "[app] % ").await;

        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "[app] % Compile message from stderr.\n[app] % Compile message from stdout.\n"
        );
    }

    #[tokio::test]
    async fn test_multiline_payload_gets_single_prefix() {
        let input = encode_all(&[Frame::stdout("one\ntwo\nthree\n")]);
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "> ").await;

        assert_eq!(sink.into_inner(), b"> one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_empty_payload_still_writes_prefix() {
        let input = encode_all(&[Frame::stdout(""), Frame::stdout("x")]);
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "> ").await;

        assert_eq!(sink.into_inner(), b"> > x");
    }

    #[tokio::test]
    async fn test_empty_stream_writes_nothing() {
        let sink = Mutex::new(Vec::new());
        copy_stream(&sink, &mut &b""[..], "> ").await;
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_payload_keeps_only_complete_frames() {
        let mut input = encode_all(&[Frame::stdout("complete\n"), Frame::stdout("partial line\n")]);
        input.truncate(input.len() - 4);
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "> ").await;

        assert_eq!(sink.into_inner(), b"> complete\n");
    }

    #[tokio::test]
    async fn test_truncated_header_stops_cleanly() {
        let mut input = encode_all(&[Frame::stdout("complete\n")]);
        input.extend_from_slice(&[1, 0, 0]);
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "> ").await;

        assert_eq!(sink.into_inner(), b"> complete\n");
    }

    #[tokio::test]
    async fn test_unknown_stream_tag_is_forwarded() {
        let mut input = vec![9, 0, 0, 0, 0, 0, 0, 3];
        input.extend_from_slice(b"abc");
        let sink = Mutex::new(Vec::new());

        copy_stream(&sink, &mut input.as_slice(), "").await;

        assert_eq!(sink.into_inner(), b"abc");
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_next_frame() {
        let input = encode_all(&[Frame::stdout("never\n")]);
        let sink = Mutex::new(Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        copy_stream_until(&sink, &mut input.as_slice(), "> ", &cancel).await;

        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_copies_never_interleave_within_a_frame() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();

        for app in ["alpha", "beta", "gamma"] {
            let (mut writer, mut reader) = tokio::io::duplex(16);
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                copy_stream(&*sink, &mut reader, &format!("[{app}] ")).await;
            }));
            tokio::spawn(async move {
                for i in 0..50 {
                    let frame = Frame::stdout(format!("{app} line {i} with some padding text\n"));
                    // Dribble bytes so reads from different streams overlap
                    for chunk in frame.encode().chunks(5) {
                        if writer.write_all(chunk).await.is_err() {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            });
        }

        for task in tasks {
            task.await.unwrap();
        }

        let output = String::from_utf8(sink.lock().await.clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 150);
        for line in lines {
            let (prefix, rest) = line.split_once("] ").unwrap();
            let app = prefix.trim_start_matches('[');
            assert!(
                rest.starts_with(app) && rest.ends_with("with some padding text"),
                "interleaved line: {line}"
            );
        }
    }
}
