//! Terminator-delimited frame assembly over raw port reads.
//!
//! The device ends every message with a single terminator byte. A frame is
//! complete once a read leaves the terminator in the last position; the
//! terminator is only meaningful there, so no scanning of interior bytes
//! happens.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// One completed read attempt: the bytes gathered and the I/O error, if any,
/// that ended it.
#[derive(Debug)]
pub(crate) struct ReadOutcome {
    pub frame: Vec<u8>,
    pub error: Option<io::Error>,
}

impl ReadOutcome {
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.error {
            None => Ok(self.frame),
            Some(source) => Err(Error::Read {
                partial: self.frame,
                source,
            }),
        }
    }
}

/// Read one frame of at most `capacity` bytes.
///
/// Keeps issuing reads while the last byte received is not `terminator` and
/// the buffer still has room. A full buffer is delivered as-is. A zero-length
/// read means the stream ended and is reported as `UnexpectedEof`.
pub(crate) async fn read_frame<R>(port: &mut R, terminator: u8, capacity: usize) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; capacity.max(1)];
    let mut len = 0;

    let error = loop {
        match port.read(&mut buf[len..]).await {
            Ok(0) => {
                break Some(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port reached end of stream",
                ))
            }
            Ok(n) => {
                len += n;
                if buf[len - 1] == terminator || len == buf.len() {
                    break None;
                }
            }
            Err(e) => break Some(e),
        }
    };

    buf.truncate(len);
    if buf.last() == Some(&terminator) {
        buf.pop();
    }

    ReadOutcome { frame: buf, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use test_case::test_case;
    use tokio::io::ReadBuf;

    const STOP: u8 = b'\n';

    // Yields one scripted chunk per read; an empty script reads as EOF.
    struct Chunks(VecDeque<std::result::Result<Vec<u8>, io::ErrorKind>>);

    impl Chunks {
        fn new(script: Vec<std::result::Result<Vec<u8>, io::ErrorKind>>) -> Self {
            Self(script.into())
        }

        fn text(chunks: &[&str]) -> Self {
            Self::new(chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect())
        }
    }

    impl AsyncRead for Chunks {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.remaining());
                    buf.put_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.0.push_front(Ok(bytes[n..].to_vec()));
                    }
                    Poll::Ready(Ok(()))
                }
                Some(Err(kind)) => Poll::Ready(Err(io::Error::from(kind))),
                None => Poll::Ready(Ok(())),
            }
        }
    }

    #[test_case(&["abc\n"], "abc" ; "single read")]
    #[test_case(&["ab", "c\n"], "abc" ; "split across reads")]
    #[test_case(&["a", "b", "c", "\n"], "abc" ; "byte at a time")]
    #[test_case(&["\n"], "" ; "terminator only")]
    #[test_case(&["a\nb\n"], "a\nb" ; "interior terminator kept")]
    #[tokio::test]
    async fn assembles_frames(chunks: &[&str], expected: &str) {
        let mut port = Chunks::text(chunks);
        let outcome = read_frame(&mut port, STOP, 32).await;
        assert!(outcome.error.is_none(), "unexpected error {:?}", outcome.error);
        assert_eq!(outcome.frame, expected.as_bytes());
    }

    #[tokio::test]
    async fn full_buffer_is_delivered_without_terminator() {
        let mut port = Chunks::text(&["abcdef\n"]);

        let first = read_frame(&mut port, STOP, 4).await;
        assert!(first.error.is_none());
        assert_eq!(first.frame, b"abcd");

        let second = read_frame(&mut port, STOP, 4).await;
        assert!(second.error.is_none());
        assert_eq!(second.frame, b"ef");
    }

    #[tokio::test]
    async fn error_keeps_partial_frame() {
        let mut port = Chunks::new(vec![Ok(b"ab".to_vec()), Err(io::ErrorKind::BrokenPipe)]);
        let outcome = read_frame(&mut port, STOP, 32).await;
        assert_eq!(outcome.frame, b"ab");
        assert_eq!(outcome.error.map(|e| e.kind()), Some(io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn end_of_stream_is_an_error() {
        let mut port = Chunks::new(vec![]);
        let outcome = read_frame(&mut port, STOP, 32).await;
        assert!(outcome.frame.is_empty());
        assert_eq!(
            outcome.error.map(|e| e.kind()),
            Some(io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn outcome_with_error_maps_to_read_error() {
        let outcome = ReadOutcome {
            frame: b"xy".to_vec(),
            error: Some(io::Error::from(io::ErrorKind::TimedOut)),
        };
        match outcome.into_result() {
            Err(Error::Read { partial, source }) => {
                assert_eq!(partial, b"xy");
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected read error, got {:?}", other),
        }
    }
}
