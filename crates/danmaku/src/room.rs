//! Public room references.

use std::fmt;

use url::Url;

use crate::error::{DanmakuError, Result};

/// The public identifier of a live room, as found at the end of its page URL.
///
/// This is not necessarily the internal room id used on the wire; see
/// [`crate::resolver::RoomResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomRef(String);

impl RoomRef {
    /// Parse a bare id, `live.bilibili.com/<id>` or a full URL.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DanmakuError::config("empty room reference"));
        }

        if !input.contains('/') {
            return Self::from_segment(input);
        }

        let normalized = if input.starts_with("http://") || input.starts_with("https://") {
            input.to_string()
        } else {
            format!("http://{}", input)
        };

        let url = Url::parse(&normalized)
            .map_err(|e| DanmakuError::config(format!("invalid room url {}: {}", input, e)))?;

        let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .ok_or_else(|| DanmakuError::config(format!("no room id in {}", input)))?;

        Self::from_segment(segment)
    }

    fn from_segment(segment: &str) -> Result<Self> {
        let segment = segment.split(['?', '#']).next().unwrap_or_default();
        if segment.is_empty() {
            return Err(DanmakuError::config("empty room reference"));
        }
        Ok(Self(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
