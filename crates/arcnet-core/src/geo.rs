// SPDX-License-Identifier: MIT OR Apache-2.0
//! Geohash and geozone value types.
//!
//! A geohash is a fixed-length base-32 spatial identifier; the geozone is
//! its three-character prefix, used as the coarse region key throughout
//! the control plane.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Required geohash length, in characters.
pub const GEOHASH_LEN: usize = 6;

/// Geozone prefix length, in characters.
pub const GEOZONE_PREFIX_LEN: usize = 3;

/// The geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
const ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

/// Errors from [`Geohash::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeohashError {
    /// The input was not exactly [`GEOHASH_LEN`] characters.
    #[error("geohash must be exactly {GEOHASH_LEN} characters, got {0}")]
    BadLength(usize),
    /// The input contained a character outside the base-32 alphabet.
    #[error("invalid geohash character {0:?}")]
    BadCharacter(char),
}

/// A validated six-character geohash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct Geohash(String);

impl Geohash {
    /// Validate and wrap a geohash string.
    pub fn parse(s: &str) -> Result<Self, GeohashError> {
        if s.chars().count() != GEOHASH_LEN {
            return Err(GeohashError::BadLength(s.chars().count()));
        }
        for c in s.chars() {
            if !ALPHABET.contains(c.to_ascii_lowercase()) {
                return Err(GeohashError::BadCharacter(c));
            }
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The geohash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the coarse region key: the first [`GEOZONE_PREFIX_LEN`] characters.
    #[must_use]
    pub fn geozone(&self) -> GeozoneId {
        GeozoneId(self.0[..GEOZONE_PREFIX_LEN].to_string())
    }

    /// Whether this geohash falls under the given prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(&prefix.to_ascii_lowercase())
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Geohash {
    type Error = GeohashError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Geohash> for String {
    fn from(g: Geohash) -> Self {
        g.0
    }
}

/// A coarse region key derived from a geohash prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct GeozoneId(String);

impl GeozoneId {
    /// Wrap a raw geozone string (already a prefix, no validation beyond
    /// case folding).
    #[must_use]
    pub fn new(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }

    /// The geozone as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeozoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
