//! Track codec
//!
//! Converts a track (metadata, source payload, position) to and from the
//! opaque base64 string the controller stores and sends back.
//!
//! Binary layout (big-endian):
//!
//! ```text
//! i32   header: (flags << 30) | message_size
//! u8    version              (only when flags & VERSIONED)
//! utf   title
//! utf   author
//! i64   length_ms
//! utf   identifier
//! bool  is_stream
//! bool + utf  uri            (version >= 2; present flag then value)
//! utf   source_name
//! ...   source payload       (opaque)
//! i64   position_ms          (last 8 bytes of the message)
//! ```
//!
//! `utf` is a u16 byte length followed by UTF-8 bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use thiserror::Error;

use crate::engine::{AudioTrack, AudioTrackInfo};

/// Header flag marking a message that starts with a version byte
pub const TRACK_INFO_VERSIONED: u32 = 1;

/// Version written by [`encode_track`]
pub const TRACK_INFO_VERSION: u8 = 2;

const MESSAGE_SIZE_MASK: u32 = 0x3FFF_FFFF;
const MESSAGE_FLAGS_SHIFT: u32 = 30;

/// Why a track string could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("track string is not valid base64")]
    InvalidText,

    #[error("track data ended early")]
    Truncated,

    #[error("message header declares {declared} bytes but only {actual} are present")]
    MessageSize { declared: usize, actual: usize },

    #[error("unsupported track info version {0}")]
    UnsupportedVersion(u8),

    #[error("track field is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {0}")]
    Malformed(&'static str),
}

impl From<std::io::Error> for DecodeError {
    // Reads from an in-memory slice only fail at end of input
    fn from(_: std::io::Error) -> Self {
        DecodeError::Truncated
    }
}

/// Why a track could not be encoded
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{field} is {len} bytes, longer than the 65535 byte field limit")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("message of {0} bytes exceeds the header size limit")]
    MessageTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode a track as a base64 string
pub fn encode_track(track: &AudioTrack) -> Result<String, EncodeError> {
    let info = track.info();
    let mut body = Vec::with_capacity(128 + track.payload().len());

    body.write_u8(TRACK_INFO_VERSION)?;
    write_utf(&mut body, "title", &info.title)?;
    write_utf(&mut body, "author", &info.author)?;
    body.write_i64::<BigEndian>(info.length_ms)?;
    write_utf(&mut body, "identifier", &info.identifier)?;
    body.write_u8(info.is_stream as u8)?;
    match &info.uri {
        Some(uri) => {
            body.write_u8(1)?;
            write_utf(&mut body, "uri", uri)?;
        }
        None => body.write_u8(0)?,
    }
    write_utf(&mut body, "source name", &info.source_name)?;
    body.extend_from_slice(track.payload());
    body.write_i64::<BigEndian>(clamp_position(track.position_ms()))?;

    if body.len() > MESSAGE_SIZE_MASK as usize {
        return Err(EncodeError::MessageTooLarge(body.len()));
    }

    let header = (TRACK_INFO_VERSIONED << MESSAGE_FLAGS_SHIFT) | body.len() as u32;
    let mut message = Vec::with_capacity(body.len() + 4);
    message.write_u32::<BigEndian>(header)?;
    message.extend_from_slice(&body);

    Ok(STANDARD.encode(message))
}

/// Decode a base64 track string
pub fn decode_track(text: &str) -> Result<AudioTrack, DecodeError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|_| DecodeError::InvalidText)?;

    let mut input = bytes.as_slice();
    let header = input.read_u32::<BigEndian>()?;
    let flags = header >> MESSAGE_FLAGS_SHIFT;
    let size = (header & MESSAGE_SIZE_MASK) as usize;

    if size > input.len() {
        return Err(DecodeError::MessageSize {
            declared: size,
            actual: input.len(),
        });
    }
    let mut body = &input[..size];

    let version = if flags & TRACK_INFO_VERSIONED != 0 {
        body.read_u8()?
    } else {
        1
    };
    if version == 0 || version > TRACK_INFO_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let title = read_utf(&mut body)?;
    let author = read_utf(&mut body)?;
    let length_ms = body.read_i64::<BigEndian>()?;
    if length_ms < 0 {
        return Err(DecodeError::Malformed("track length"));
    }
    let identifier = read_utf(&mut body)?;
    let is_stream = body.read_u8()? != 0;
    let uri = if version >= 2 && body.read_u8()? != 0 {
        Some(read_utf(&mut body)?)
    } else {
        None
    };
    let source_name = read_utf(&mut body)?;

    // Whatever sits between the source name and the trailing position
    // belongs to the source
    let payload_len = body.len().checked_sub(8).ok_or(DecodeError::Truncated)?;
    let payload = body[..payload_len].to_vec();
    body = &body[payload_len..];
    let position = body.read_i64::<BigEndian>()?;
    if position < 0 {
        return Err(DecodeError::Malformed("track position"));
    }

    let track = AudioTrack::new(
        AudioTrackInfo {
            title,
            author,
            length_ms,
            identifier,
            is_stream,
            uri,
            source_name,
        },
        payload,
    );
    track.set_position_ms(position as u64);
    Ok(track)
}

fn clamp_position(position_ms: u64) -> i64 {
    i64::try_from(position_ms).unwrap_or(i64::MAX)
}

fn write_utf(out: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), EncodeError> {
    let len = u16::try_from(value.len()).map_err(|_| EncodeError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    out.write_u16::<BigEndian>(len)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_utf(input: &mut &[u8]) -> Result<String, DecodeError> {
    let len = input.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}
