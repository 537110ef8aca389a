//! Binary frame codec for the Open Live push channel.
//!
//! Every frame starts with a fixed 16-byte big-endian header:
//!
//! ```text
//! [packet_length: u32][header_length: u16][protocol_version: u16][operation: u32][sequence: u32]
//! ```
//!
//! followed by `packet_length - 16` bytes of body. A single WebSocket message may
//! carry several concatenated frames, and compressed frames (zlib / brotli) wrap
//! a nested frame stream.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::{debug, warn};

use crate::error::{OpenLiveError, Result};

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Sequence number used for every client-originated frame.
pub const DEFAULT_SEQUENCE: u32 = 1;

/// Operation codes
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const SEND_MESSAGE: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol versions
pub mod ver {
    /// Plain JSON text.
    pub const JSON: u16 = 0;
    /// Big-endian integer payload (heartbeat reply popularity).
    pub const INT: u16 = 1;
    /// zlib-compressed nested frame stream.
    pub const ZLIB: u16 = 2;
    /// brotli-compressed nested frame stream.
    pub const BROTLI: u16 = 3;
}

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_length: u32,
    pub header_length: u16,
    pub protocol_version: u16,
    pub operation: u32,
    pub sequence: u32,
    pub body: Bytes,
}

impl Frame {
    /// Read the popularity counter carried by a heartbeat reply.
    pub fn popularity(&self) -> Option<u32> {
        (self.operation == op::HEARTBEAT_REPLY && self.body.len() >= 4)
            .then(|| BigEndian::read_u32(&self.body[..4]))
    }
}

/// Build a frame with the given body and header fields.
pub fn encode_frame(body: &[u8], operation: u32, protocol_version: u16, sequence: u32) -> Bytes {
    let packet_len = HEADER_LEN + body.len();
    let mut packet = BytesMut::with_capacity(packet_len);

    packet.put_u32(packet_len as u32);
    packet.put_u16(HEADER_LEN as u16);
    packet.put_u16(protocol_version);
    packet.put_u32(operation);
    packet.put_u32(sequence);
    packet.put_slice(body);

    packet.freeze()
}

/// Build the authentication frame from the serialized auth payload.
pub fn auth_frame(auth_body: &str) -> Bytes {
    encode_frame(auth_body.as_bytes(), op::AUTH, ver::JSON, DEFAULT_SEQUENCE)
}

/// Build a heartbeat frame.
pub fn heartbeat_frame() -> Bytes {
    encode_frame(b"{}", op::HEARTBEAT, ver::JSON, DEFAULT_SEQUENCE)
}

/// Scan a buffer for frames without interpreting their bodies.
///
/// Stops at the first truncated or inconsistent header; frames fully contained
/// before that point are still returned.
pub fn decode_frames(data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset + HEADER_LEN <= data.len() {
        let header = &data[offset..offset + HEADER_LEN];
        let packet_len = BigEndian::read_u32(&header[0..4]);
        let header_len = BigEndian::read_u16(&header[4..6]);
        let protocol_version = BigEndian::read_u16(&header[6..8]);
        let operation = BigEndian::read_u32(&header[8..12]);
        let sequence = BigEndian::read_u32(&header[12..16]);

        let remaining = data.len() - offset;
        if (packet_len as usize) < HEADER_LEN
            || header_len as u32 > packet_len
            || packet_len as usize > remaining
        {
            warn!(
                packet_len,
                header_len,
                offset,
                total = data.len(),
                "Inconsistent frame header, dropping rest of buffer"
            );
            break;
        }

        let body_start = offset + (header_len as usize).max(HEADER_LEN);
        let body_end = offset + packet_len as usize;

        frames.push(Frame {
            packet_length: packet_len,
            header_length: header_len,
            protocol_version,
            operation,
            sequence,
            body: Bytes::copy_from_slice(&data[body_start..body_end]),
        });

        offset = body_end;
    }

    frames
}

/// Deepest compressed-within-compressed nesting that is still unpacked.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Upper bound on the inflated size of a single compressed body.
pub const MAX_INFLATED_LEN: u64 = 8 * 1024 * 1024;

/// Decode a buffer into leaf frames, inflating compressed frames recursively.
///
/// A frame whose body fails to decompress, inflates past [`MAX_INFLATED_LEN`]
/// or nests deeper than [`MAX_NESTING_DEPTH`] is dropped on its own; its
/// siblings are still returned.
pub fn unpack_frames(data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    unpack_into(data, 0, &mut frames);
    frames
}

fn unpack_into(data: &[u8], depth: usize, frames: &mut Vec<Frame>) {
    for frame in decode_frames(data) {
        let inflated = match frame.protocol_version {
            ver::JSON | ver::INT => {
                frames.push(frame);
                continue;
            }
            ver::ZLIB | ver::BROTLI if depth >= MAX_NESTING_DEPTH => {
                warn!(
                    operation = frame.operation,
                    depth, "Compressed frame nested too deeply, dropping"
                );
                continue;
            }
            ver::ZLIB => decompress_zlib(&frame.body),
            ver::BROTLI => decompress_brotli(&frame.body),
            other => {
                debug!(protocol_version = other, "Unknown protocol version, skipping frame");
                continue;
            }
        };

        match inflated {
            Ok(inflated) => unpack_into(&inflated, depth + 1, frames),
            Err(e) => warn!(operation = frame.operation, "{}", e),
        }
    }
}

fn read_bounded(reader: impl Read, kind: &str) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    reader
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| OpenLiveError::decompression(format!("{} decompression failed: {}", kind, e)))?;

    if decompressed.len() as u64 > MAX_INFLATED_LEN {
        return Err(OpenLiveError::decompression(format!(
            "{} body inflates past {} bytes",
            kind, MAX_INFLATED_LEN
        )));
    }
    Ok(decompressed)
}

/// Decompress zlib data, refusing output larger than [`MAX_INFLATED_LEN`].
pub fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    read_bounded(ZlibDecoder::new(data), "zlib")
}

/// Decompress brotli data, refusing output larger than [`MAX_INFLATED_LEN`].
pub fn decompress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    read_bounded(brotli::Decompressor::new(data, 4096), "brotli")
}

/// Compress data with zlib.
pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| OpenLiveError::decompression(format!("zlib compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| OpenLiveError::decompression(format!("zlib compression failed: {}", e)))
}

/// Compress data with brotli.
pub fn compress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut compressed = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
        writer.write_all(data).map_err(|e| {
            OpenLiveError::decompression(format!("brotli compression failed: {}", e))
        })?;
    }
    Ok(compressed)
}
