use std::io::{self, Read, Write};

use thiserror::Error;

use crate::{ClientMessage, PortalSnapshot, ServerMessage};

/// Upper bound for a single frame; anything larger is treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {len} bytes exceeds the frame size limit")]
    FrameTooLarge { len: usize },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub fn encode_server(message: &ServerMessage) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(message)?)
}

pub fn decode_server(bytes: &[u8]) -> Result<ServerMessage, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(message)?)
}

pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_snapshot_json(snapshot: &PortalSnapshot) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Write `payload` prefixed with its little-endian `u32` length.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len: payload.len() });
    }
    let len = payload.len() as u32;
    let mut buffer = Vec::with_capacity(4 + payload.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);
    writer.write_all(&buffer)?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` signals a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
