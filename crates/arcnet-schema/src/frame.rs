// SPDX-License-Identifier: MIT OR Apache-2.0
//! Self-describing binary frame.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic "ARCF" | frame version u8 | kind-tag len u16 | kind tag bytes
//! | schema version u32 | payload len u32 | payload bytes (JSON)
//! ```
//!
//! The framing is orthogonal to the content: the payload is an encoded
//! JSON document, and the frame carries the logical entity kind and
//! schema version so a consumer can route and migrate without touching
//! the payload.

use arcnet_core::{EntityKind, WireEntity};
use serde_json::Value;
use thiserror::Error;

/// Frame magic bytes.
pub const MAGIC: [u8; 4] = *b"ARCF";

/// Frame layout version this build reads and writes.
pub const FRAME_VERSION: u8 = 1;

/// Longest accepted kind tag, in bytes.
const MAX_TAG_LEN: usize = 64;

/// Errors from frame encoding and decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The buffer does not start with [`MAGIC`].
    #[error("bad frame magic")]
    BadMagic,

    /// The frame layout version is not [`FRAME_VERSION`].
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    /// The buffer ended before the advertised length.
    #[error("truncated frame: needed {needed} bytes, had {have}")]
    Truncated {
        /// Bytes the frame header promised.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// The kind tag was not valid UTF-8 or not a known kind.
    #[error("unknown entity kind tag {0:?}")]
    UnknownKind(String),

    /// The kind tag length field was out of range.
    #[error("kind tag length {0} out of range")]
    BadTagLength(usize),

    /// The payload was not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// A decoded frame: entity identity plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical kind of the payload.
    pub kind: EntityKind,
    /// Schema version the producer stamped.
    pub schema_version: u32,
    /// Encoded JSON payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Frame an already-encoded payload.
    #[must_use]
    pub fn new(kind: EntityKind, schema_version: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            schema_version,
            payload,
        }
    }

    /// Frame an entity at its compiled version.
    pub fn from_entity<T: WireEntity>(entity: &T) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(entity)?;
        Ok(Self::new(T::KIND, T::CURRENT_VERSION, payload))
    }

    /// Parse the payload into a raw JSON value.
    pub fn payload_json(&self) -> Result<Value, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serialize the frame to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let tag = self.kind.as_str().as_bytes();
        let mut out = Vec::with_capacity(4 + 1 + 2 + tag.len() + 4 + 4 + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(FRAME_VERSION);
        out.extend_from_slice(&(tag.len() as u16).to_be_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(&self.schema_version.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a frame from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        fn take<'a>(buf: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], FrameError> {
            if buf.len() < *at + n {
                return Err(FrameError::Truncated {
                    needed: *at + n,
                    have: buf.len(),
                });
            }
            let slice = &buf[*at..*at + n];
            *at += n;
            Ok(slice)
        }

        let mut at = 0usize;
        if take(buf, &mut at, 4)? != MAGIC {
            return Err(FrameError::BadMagic);
        }
        let version = take(buf, &mut at, 1)?[0];
        if version != FRAME_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let tag_len =
            u16::from_be_bytes(take(buf, &mut at, 2)?.try_into().unwrap_or([0; 2])) as usize;
        if tag_len == 0 || tag_len > MAX_TAG_LEN {
            return Err(FrameError::BadTagLength(tag_len));
        }
        let tag_bytes = take(buf, &mut at, tag_len)?;
        let tag = std::str::from_utf8(tag_bytes)
            .map_err(|_| FrameError::UnknownKind(format!("{tag_bytes:?}")))?;
        let kind = EntityKind::parse(tag).ok_or_else(|| FrameError::UnknownKind(tag.to_string()))?;

        let schema_version = u32::from_be_bytes(take(buf, &mut at, 4)?.try_into().unwrap_or([0; 4]));
        let payload_len =
            u32::from_be_bytes(take(buf, &mut at, 4)?.try_into().unwrap_or([0; 4])) as usize;
        let payload = take(buf, &mut at, payload_len)?.to_vec();

        Ok(Self {
            kind,
            schema_version,
            payload,
        })
    }
}
