//! Length-prefixed framing.
//!
//! Every frame on the wire is a big-endian `u32` holding the **total** frame
//! length (header included), followed by the payload bytes:
//!
//! ```text
//! +---------------------+--------------------------------+
//! | total_len (u32, BE) | payload (total_len - 4 bytes)  |
//! +---------------------+--------------------------------+
//!        4 bytes                  variable
//! ```
//!
//! There is no escaping, checksum, type tag or version field. A zero-length
//! payload is a valid 4-byte frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::FrameError;

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Largest total frame length representable by the prefix.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Encode `payload` into a complete frame.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    let total = payload
        .len()
        .checked_add(HEADER_SIZE)
        .filter(|total| *total <= MAX_FRAME_LEN)
        .ok_or(FrameError::PayloadTooLarge { len: payload.len() })?;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(total as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Outcome of [`try_decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A full frame is present at the front of the buffer.
    Frame {
        payload: &'a [u8],
        remainder: &'a [u8],
    },
    /// The buffer holds only part of a frame (or of its header).
    NeedMoreData,
}

/// Decode the frame at the front of `buf`, if it is complete.
///
/// Can be called repeatedly on the returned `remainder` to drain every frame
/// delivered by a single read.
pub fn try_decode(buf: &[u8]) -> Result<Decoded<'_>, FrameError> {
    let Some(header) = buf.first_chunk::<HEADER_SIZE>() else {
        return Ok(Decoded::NeedMoreData);
    };
    let declared = u32::from_be_bytes(*header);
    let total = declared as usize;
    if total < HEADER_SIZE {
        return Err(FrameError::LengthTooSmall { declared });
    }
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }
    Ok(Decoded::Frame {
        payload: &buf[HEADER_SIZE..total],
        remainder: &buf[total..],
    })
}

/// Accumulating receive buffer for one connection.
///
/// Raw chunks go in through [`extend`](Self::extend); whole payloads come out
/// of [`next_frame`](Self::next_frame) in arrival order. Chunks may carry any
/// number of frames, and frames may span any number of chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk read from the socket.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let total = match try_decode(&self.buf)? {
            Decoded::NeedMoreData => return Ok(None),
            Decoded::Frame { payload, .. } => HEADER_SIZE + payload.len(),
        };
        let mut frame = self.buf.split_to(total);
        frame.advance(HEADER_SIZE);
        Ok(Some(frame.freeze()))
    }

    /// Append `chunk` and hand every frame it completes to `on_frame`.
    ///
    /// Returns the number of frames delivered.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        mut on_frame: impl FnMut(Bytes),
    ) -> Result<usize, FrameError> {
        self.extend(chunk);
        let mut delivered = 0;
        while let Some(frame) = self.next_frame()? {
            on_frame(frame);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
