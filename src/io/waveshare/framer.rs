// src/io/waveshare/framer.rs
//
// Splits the gateway's TCP byte stream into fixed 13-byte frames.
//
// TCP delivers bytes in arbitrary chunks; a read may end mid-frame or carry
// several frames at once. WireFramer keeps the remainder between reads.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::codec::{constants::FRAME_LEN, WireFrame};
use crate::io::error::IoError;

const READ_CHUNK: usize = 2048;

/// Accumulates stream bytes and emits complete frames in arrival order.
///
/// One framer per connection; a new connection starts with an empty buffer.
#[derive(Debug, Default)]
pub struct WireFramer {
    buffer: Vec<u8>,
}

impl WireFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_LEN * 4),
        }
    }

    /// Append received bytes and drain every complete frame.
    pub fn feed(&mut self, data: &[u8]) -> Vec<WireFrame> {
        self.buffer.extend_from_slice(data);

        let complete = self.buffer.len() / FRAME_LEN;
        let mut frames = Vec::with_capacity(complete);
        for chunk in self.buffer.chunks_exact(FRAME_LEN) {
            let mut frame = [0u8; FRAME_LEN];
            frame.copy_from_slice(chunk);
            frames.push(frame);
        }
        self.buffer.drain(..complete * FRAME_LEN);

        frames
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Close out the stream. A leftover partial frame can never complete,
    /// so it is reported instead of dropped.
    pub fn finish(self) -> Result<(), IoError> {
        match self.buffer.len() {
            0 => Ok(()),
            pending => Err(IoError::StreamClosed { pending }),
        }
    }
}

struct FrameReader<R> {
    reader: R,
    device: String,
    framer: WireFramer,
    ready: VecDeque<WireFrame>,
    read_buf: Vec<u8>,
    done: bool,
}

/// Lazily read frames from `reader` until it ends.
///
/// Yields `Err(StreamClosed)` when EOF leaves a partial frame and
/// `Err(Read)` on an I/O error; the stream ends after either.
pub fn wire_frames<R>(
    reader: R,
    device: impl Into<String>,
) -> impl Stream<Item = Result<WireFrame, IoError>>
where
    R: AsyncRead + Unpin,
{
    let state = FrameReader {
        reader,
        device: device.into(),
        framer: WireFramer::new(),
        ready: VecDeque::new(),
        read_buf: vec![0u8; READ_CHUNK],
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.done {
                return None;
            }

            match st.reader.read(&mut st.read_buf).await {
                Ok(0) => {
                    st.done = true;
                    if let Err(e) = std::mem::take(&mut st.framer).finish() {
                        return Some((Err(e), st));
                    }
                }
                Ok(n) => {
                    let frames = st.framer.feed(&st.read_buf[..n]);
                    st.ready.extend(frames);
                }
                Err(e) => {
                    st.done = true;
                    let err = IoError::read(&st.device, e.to_string());
                    return Some((Err(err), st));
                }
            }
        }
    })
}
