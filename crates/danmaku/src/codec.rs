//! Binary frame codec for the live danmaku protocol.
//!
//! Every frame starts with a 16-byte big-endian header:
//!
//! | offset | size | field         |
//! |--------|------|---------------|
//! | 0      | 4    | total length  |
//! | 4      | 2    | header length |
//! | 6      | 2    | version       |
//! | 8      | 4    | operation     |
//! | 12     | 4    | sequence      |
//!
//! Versions 0/1 carry a plain body. Versions 2 (zlib) and 3 (brotli) carry a
//! compressed batch of further frames, which are decoded recursively and
//! flattened into the same output.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use std::io::Read;
use tracing::{debug, trace};

use crate::error::{DanmakuError, Result};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Nested compressed batches deeper than this are dropped.
const MAX_NESTING: usize = 4;

/// Operation codes
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const NOTIFICATION: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol versions
pub mod ver {
    pub const RAW_JSON: u16 = 0;
    pub const POPULARITY: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

/// Heartbeat packet (operation = 2)
/// Header: len=31, header_len=16, ver=1, op=2, seq=1
/// Body: "[object Object]"
pub const HEARTBEAT_FRAME: &[u8] = &[
    0x00, 0x00, 0x00, 0x1f, // packet length = 31
    0x00, 0x10, // header length = 16
    0x00, 0x01, // version = 1
    0x00, 0x00, 0x00, 0x02, // operation = 2 (heartbeat)
    0x00, 0x00, 0x00, 0x01, // sequence = 1
    // "[object Object]"
    0x5b, 0x6f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x20, 0x4f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x5d,
];

/// A single decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub total_length: u32,
    pub header_length: u16,
    pub version: u16,
    pub operation: u32,
    pub sequence: u32,
    pub payload: Bytes,
}

/// Header fields read from the front of a buffer.
#[derive(Debug, Clone, Copy)]
struct Header {
    total_length: u32,
    header_length: u16,
    version: u16,
    operation: u32,
    sequence: u32,
}

impl Header {
    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            total_length: BigEndian::read_u32(&data[0..4]),
            header_length: BigEndian::read_u16(&data[4..6]),
            version: BigEndian::read_u16(&data[6..8]),
            operation: BigEndian::read_u32(&data[8..12]),
            sequence: BigEndian::read_u32(&data[12..16]),
        })
    }

    /// Lengths that would make the payload slice nonsensical.
    fn is_corrupt(&self) -> bool {
        let total = self.total_length as usize;
        let header = self.header_length as usize;
        header < HEADER_LEN || total < header
    }
}

/// Outcome of decoding one inbound buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodeReport {
    /// Compressed frames whose body could not be inflated.
    pub decompress_failures: usize,
    /// Frames skipped because of an unknown version or excessive nesting.
    pub skipped: usize,
    /// Parsing stopped because a frame declared more bytes than were available.
    pub truncated: bool,
    /// Parsing stopped on an unreadable header.
    pub corrupt: bool,
}

impl DecodeReport {
    /// Number of frames that were lost while decoding.
    pub fn dropped(&self) -> usize {
        self.decompress_failures + self.skipped
    }
}

/// Parse a buffer into a flat list of frames.
///
/// Incomplete or corrupt trailing data ends the batch without an error.
pub fn parse_frames(data: &Bytes) -> Vec<Frame> {
    parse_frames_with_report(data).0
}

/// Parse a buffer into frames and report what was dropped along the way.
pub fn parse_frames_with_report(data: &Bytes) -> (Vec<Frame>, DecodeReport) {
    let mut frames = Vec::new();
    let mut report = DecodeReport::default();
    decode_into(data, 0, &mut frames, &mut report);
    (frames, report)
}

fn decode_into(data: &Bytes, depth: usize, frames: &mut Vec<Frame>, report: &mut DecodeReport) {
    let mut offset = 0;

    while offset < data.len() {
        let Some(header) = Header::read(&data[offset..]) else {
            trace!(remaining = data.len() - offset, "Incomplete frame header");
            report.truncated = true;
            break;
        };

        if header.is_corrupt() {
            debug!(
                total_length = header.total_length,
                header_length = header.header_length,
                "Corrupt frame header, discarding rest of buffer"
            );
            report.corrupt = true;
            break;
        }

        let packet_len = header.total_length as usize;
        if offset + packet_len > data.len() {
            trace!(
                declared = packet_len,
                available = data.len() - offset,
                "Frame exceeds buffer, discarding remainder"
            );
            report.truncated = true;
            break;
        }

        let body = data.slice(offset + header.header_length as usize..offset + packet_len);

        match header.version {
            ver::RAW_JSON | ver::POPULARITY => frames.push(Frame {
                total_length: header.total_length,
                header_length: header.header_length,
                version: header.version,
                operation: header.operation,
                sequence: header.sequence,
                payload: body,
            }),
            ver::ZLIB | ver::BROTLI if depth >= MAX_NESTING => {
                debug!(depth, "Compressed batch nested too deeply, skipping");
                report.skipped += 1;
            }
            ver::ZLIB | ver::BROTLI => {
                let inflated = if header.version == ver::ZLIB {
                    decompress_zlib(&body)
                } else {
                    decompress_brotli(&body)
                };
                match inflated {
                    Ok(inner) => decode_into(&Bytes::from(inner), depth + 1, frames, report),
                    Err(e) => {
                        debug!(error = %e, "Dropping compressed frame");
                        report.decompress_failures += 1;
                    }
                }
            }
            other => {
                debug!("Unknown protocol version: {}", other);
                report.skipped += 1;
            }
        }

        offset += packet_len;
    }
}

/// Encode a frame with an explicit version and sequence.
pub fn encode_frame(operation: u32, version: u16, sequence: u32, body: &[u8]) -> Bytes {
    let packet_len = HEADER_LEN + body.len();
    let mut packet = BytesMut::with_capacity(packet_len);

    packet.put_u32(packet_len as u32);
    packet.put_u16(HEADER_LEN as u16);
    packet.put_u16(version);
    packet.put_u32(operation);
    packet.put_u32(sequence);
    packet.put_slice(body);

    packet.freeze()
}

/// Build a packet with the given body and operation code.
pub fn build_packet(body: &[u8], operation: u32) -> Bytes {
    encode_frame(operation, ver::POPULARITY, 1, body)
}

/// Body of the registration (auth) frame.
#[derive(Debug, Serialize)]
struct RegistrationBody {
    #[serde(rename = "roomid")]
    room_id: u64,
    #[serde(rename = "uid")]
    client_id: u64,
    #[serde(rename = "protover")]
    protocol_version: u16,
}

/// Build the registration frame that subscribes a connection to a room.
pub fn build_registration_frame(room_id: u64, client_id: u64) -> Result<Bytes> {
    build_registration_frame_with_version(room_id, client_id, ver::ZLIB)
}

/// Registration frame requesting a specific batch compression version.
pub fn build_registration_frame_with_version(
    room_id: u64,
    client_id: u64,
    protocol_version: u16,
) -> Result<Bytes> {
    let body = serde_json::to_vec(&RegistrationBody {
        room_id,
        client_id,
        protocol_version,
    })?;
    Ok(build_packet(&body, op::AUTH))
}

/// Decompress zlib data.
fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| DanmakuError::decompress(format!("zlib decompression failed: {}", e)))?;
    Ok(decompressed)
}

/// Decompress brotli data.
fn decompress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut decompressed)
        .map_err(|e| DanmakuError::decompress(format!("brotli decompression failed: {}", e)))?;
    Ok(decompressed)
}
