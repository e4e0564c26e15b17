//! Line framing shared by the gate and supervisor sockets.
//!
//! Wraps [`LinesCodec`] so that an oversize or non-UTF-8 line becomes a
//! frame of its own instead of a stream error. The rest of the connection
//! keeps decoding after it.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A complete line, without its terminator.
    Line(String),
    /// A line longer than the limit; its bytes were discarded.
    Oversize,
    /// A line that was not valid UTF-8.
    NotUtf8,
}

/// Newline-delimited framing with a per-line byte limit.
#[derive(Debug, Clone)]
pub(crate) struct FrameCodec {
    inner: LinesCodec,
}

impl FrameCodec {
    /// Accept lines of at most `max_length` bytes.
    #[must_use]
    pub(crate) fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn classify(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversize)),
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::NotUtf8))
            },
            Err(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::classify(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::classify(self.inner.decode_eof(buf))
    }
}

impl<T: AsRef<str>> Encoder<T> for FrameCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.inner.encode(line, buf)
    }
}
