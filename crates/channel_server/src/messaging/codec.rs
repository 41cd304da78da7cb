//! Packet framing.
//!
//! Every packet on the wire is `[u16 LE size][u16 LE command][payload]`,
//! where `size` counts the command code and the payload.

/// Largest accepted value of the size field.
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

const SIZE_FIELD: usize = 2;
const COMMAND_FIELD: usize = 2;

/// Framing errors. Any of them ends the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame size {0} is smaller than the command code")]
    TooShort(usize),

    #[error("frame size {0} exceeds the limit of {MAX_FRAME_SIZE} bytes")]
    TooLarge(usize),
}

/// Builds one frame.
pub fn encode_frame(command_code: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let size = COMMAND_FIELD + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(size));
    }
    let mut frame = Vec::with_capacity(SIZE_FIELD + size);
    frame.extend_from_slice(&(size as u16).to_le_bytes());
    frame.extend_from_slice(&command_code.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder for a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete frame as `(command_code, payload)`, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<(u16, Vec<u8>)>, FrameError> {
        if self.buffer.len() < SIZE_FIELD {
            return Ok(None);
        }
        let size = usize::from(u16::from_le_bytes([self.buffer[0], self.buffer[1]]));
        if size < COMMAND_FIELD {
            return Err(FrameError::TooShort(size));
        }
        if size > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(size));
        }
        if self.buffer.len() < SIZE_FIELD + size {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..SIZE_FIELD + size).collect();
        let command_code = u16::from_le_bytes([frame[2], frame[3]]);
        Ok(Some((command_code, frame[SIZE_FIELD + COMMAND_FIELD..].to_vec())))
    }

    /// Bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
